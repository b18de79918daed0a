//! # Kernel Boot Information

use kernel_memory_addresses::PhysicalAddress;

/// What the 32→64-bit trampoline hands to the memory bring-up.
///
/// Keep this `#[repr(C)]`: the assembly entry code fills it in before the
/// first Rust function runs.
#[repr(C)]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct BootHandoff {
    /// Physical address of the multiboot2 boot information structure (from `EBX`).
    pub multiboot_info: u64,

    /// First physical byte past the loaded kernel image (linker symbol).
    pub kernel_physical_end: u64,

    /// What the loader left in `EAX`; the multiboot2 magic if it is compliant.
    pub bootloader_magic: u32,
}

impl BootHandoff {
    #[inline]
    #[must_use]
    pub const fn multiboot_info(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.multiboot_info)
    }

    #[inline]
    #[must_use]
    pub const fn kernel_physical_end(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.kernel_physical_end)
    }
}

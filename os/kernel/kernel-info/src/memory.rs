//! # Memory Layout
//!
//! Build-time constants shared by the boot linkage, the physical frame
//! allocator and the virtual memory manager, plus [`MemoryLayout`], the
//! runtime view of the same numbers.

use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};

/// Size of a physical frame and of a virtual page, in bytes.
pub const PAGE_SIZE: u64 = 4096;

/// Upper bound of the physical range tracked by the frame bitmap (4 GiB).
///
/// Memory-map regions beyond this are ignored.
pub const MAX_MEMORY_SIZE: u64 = 0x1_0000_0000;

/// Number of frames tracked by the frame bitmap.
pub const FRAMES_COUNT: u64 = MAX_MEMORY_SIZE / PAGE_SIZE;

/// Size of the frame bitmap in bytes (one bit per frame, 128 KiB).
pub const FRAME_BITMAP_SIZE: u64 = FRAMES_COUNT / 8;

/// Fixed physical location of the frame bitmap (16 MiB).
///
/// Chosen above the kernel image and the multiboot information, inside the
/// window identity-mapped by the boot loader.
pub const FRAME_BITMAP_BASE: u64 = 0x0100_0000;

/// Where the kernel executes (VMA), matches the linker script.
///
/// Physical address `pa` of the boot window is visible at `KERNEL_BASE + pa`.
pub const KERNEL_BASE: u64 = 0xffff_ffff_8000_0000;

/// Where the boot loader places the kernel image in *physical* memory (LMA).
pub const PHYS_LOAD: u64 = 0x0010_0000; // 1 MiB

/// Frames below this physical address are never handed out, whatever the
/// memory map says (firmware and boot loader structures).
pub const LOW_RESERVED_FLOOR: u64 = 0x20_0000; // 2 MiB

/// Low physical window mapped twice (identity and at [`KERNEL_BASE`]) when
/// paging is taken over: kernel image, frame bitmap and legacy MMIO.
pub const BOOT_WINDOW_SIZE: u64 = 0x800_0000; // 128 MiB

const _: () = {
    assert!(PAGE_SIZE.is_power_of_two());
    assert!(MAX_MEMORY_SIZE.is_multiple_of(PAGE_SIZE * 8));
    assert!(FRAME_BITMAP_BASE.is_multiple_of(PAGE_SIZE));
    assert!(FRAME_BITMAP_BASE >= LOW_RESERVED_FLOOR);
    assert!(FRAME_BITMAP_BASE + FRAME_BITMAP_SIZE <= BOOT_WINDOW_SIZE);
    assert!(LOW_RESERVED_FLOOR.is_multiple_of(PAGE_SIZE));
    assert!(BOOT_WINDOW_SIZE.is_multiple_of(PAGE_SIZE));
    assert!(PHYS_LOAD < BOOT_WINDOW_SIZE);
    assert!(KERNEL_BASE.is_multiple_of(PAGE_SIZE));
};

/// Runtime memory layout consumed by the memory managers.
///
/// [`MemoryLayout::DEFAULT`] mirrors the build-time constants above. Tests and
/// unusual boot environments construct their own to shrink the managed range
/// or move the reservations around.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct MemoryLayout {
    /// Exclusive upper bound of the physical range the frame bitmap tracks.
    pub max_memory_size: u64,
    /// Physical base of the frame bitmap storage.
    pub frame_bitmap_base: PhysicalAddress,
    /// Frames below this address always stay reserved.
    pub low_reserved_floor: u64,
    /// Physical load address of the kernel image.
    pub kernel_load: PhysicalAddress,
    /// Virtual base the kernel was linked against.
    pub kernel_offset: VirtualAddress,
    /// Size of the low window mapped by the virtual memory bootstrap.
    pub boot_window_size: u64,
}

impl MemoryLayout {
    pub const DEFAULT: Self = Self {
        max_memory_size: MAX_MEMORY_SIZE,
        frame_bitmap_base: PhysicalAddress::new(FRAME_BITMAP_BASE),
        low_reserved_floor: LOW_RESERVED_FLOOR,
        kernel_load: PhysicalAddress::new(PHYS_LOAD),
        kernel_offset: VirtualAddress::new(KERNEL_BASE),
        boot_window_size: BOOT_WINDOW_SIZE,
    };

    /// Number of frames tracked by a bitmap for this layout.
    #[inline]
    #[must_use]
    pub const fn frames_count(&self) -> u64 {
        self.max_memory_size / PAGE_SIZE
    }

    /// Bytes of bitmap storage needed for [`frames_count`](Self::frames_count) frames.
    #[inline]
    #[must_use]
    pub const fn frame_bitmap_size(&self) -> u64 {
        self.frames_count().div_ceil(8)
    }

    /// Higher-half alias of a physical address inside the boot window.
    #[inline]
    #[must_use]
    pub const fn high_alias(&self, pa: PhysicalAddress) -> VirtualAddress {
        VirtualAddress::new(self.kernel_offset.as_u64().wrapping_add(pa.as_u64()))
    }
}

impl Default for MemoryLayout {
    fn default() -> Self {
        Self::DEFAULT
    }
}

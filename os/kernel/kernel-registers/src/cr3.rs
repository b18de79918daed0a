use bitfield_struct::bitfield;
use kernel_memory_addresses::{PhysicalPage, Size4K};

#[cfg(all(feature = "asm", target_arch = "x86_64"))]
use crate::StoreRegisterUnsafe;

/// CR3, the Page-Map Level-4 base register (IA-32e paging, PCID disabled).
///
/// ```text
/// 63      52 51                      12 11   5  4   3  2  0
/// ┌─────────┬──────────────────────────┬──────┬───┬───┬────┐
/// │ reserved│ PML4 frame number        │ rsvd │PCD│PWT│rsvd│
/// └─────────┴──────────────────────────┴──────┴───┴───┴────┘
/// ```
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct Cr3 {
    #[bits(3)]
    __: u8,

    /// Page-level write-through for accesses to the PML4.
    pub pwt: bool,

    /// Page-level cache disable for accesses to the PML4.
    pub pcd: bool,

    #[bits(7)]
    __: u8,

    /// Physical frame number of the PML4.
    #[bits(40)]
    root_frame: u64,

    #[bits(12)]
    __: u16,
}

impl Cr3 {
    /// CR3 value selecting `root` as the PML4, write-back cached.
    #[must_use]
    pub const fn from_root(root: PhysicalPage<Size4K>) -> Self {
        Self::new().with_root_frame(root.frame_index())
    }

    /// The PML4 frame this value points at.
    #[must_use]
    pub const fn root(&self) -> PhysicalPage<Size4K> {
        PhysicalPage::from_frame_index(self.root_frame())
    }
}

#[cfg(all(feature = "asm", target_arch = "x86_64"))]
impl StoreRegisterUnsafe for Cr3 {
    unsafe fn store_unsafe(self) {
        let cr3 = self.into_bits();
        unsafe {
            core::arch::asm!("mov cr3, {}", in(reg) cr3, options(nostack, preserves_flags));
        }
    }
}

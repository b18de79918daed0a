use core::fmt::Debug;
use core::hash::Hash;

mod sealed {
    pub trait Sealed {}
}

/// A page granularity the paging code can be instantiated with.
///
/// Sealed: the walker only ever installs 4 KiB leaves, so [`Size4K`] is the
/// only implementor.
pub trait PageSize: sealed::Sealed + Copy + Ord + Hash + Debug {
    /// Bytes per page.
    const SIZE: u64;
    /// Number of low address bits selecting a byte inside the page.
    const SHIFT: u32;
    /// Short label used in `Debug` and `Display` output.
    const NAME: &'static str;

    /// Mask of the in-page bits.
    const MASK: u64 = Self::SIZE - 1;
}

/// 4 KiB, one frame of the physical allocator and one page table.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Size4K;

impl sealed::Sealed for Size4K {}

impl PageSize for Size4K {
    const SIZE: u64 = 4096;
    const SHIFT: u32 = 12;
    const NAME: &'static str = "4K";
}

use crate::{MemoryPage, PageOffset, PageSize, PhysicalAddress};
use core::fmt;

/// A page of physical memory.
///
/// With `S = Size4K` this is a frame: what the physical allocator hands out
/// and what every page table occupies. The frame index is `base / S::SIZE`,
/// the bit position in the allocator's bitmap.
///
/// ```rust
/// # use kernel_memory_addresses::*;
/// let frame = PhysicalPage::<Size4K>::from_frame_index(0x300);
/// assert_eq!(frame.base(), PhysicalAddress::new(0x30_0000));
///
/// let pa = PhysicalAddress::new(0x30_0042);
/// assert_eq!(pa.page::<Size4K>(), frame);
/// assert_eq!(frame.join(pa.offset()), pa);
/// ```
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysicalPage<S: PageSize>(pub(crate) MemoryPage<S>);

impl<S: PageSize> PhysicalPage<S> {
    /// The page `addr` falls into.
    #[inline]
    #[must_use]
    pub const fn from_addr(addr: PhysicalAddress) -> Self {
        Self(MemoryPage::containing(addr.0))
    }

    #[inline]
    #[must_use]
    pub const fn from_frame_index(index: u64) -> Self {
        Self(MemoryPage::from_index(index))
    }

    #[inline]
    #[must_use]
    pub const fn frame_index(self) -> u64 {
        self.0.index()
    }

    #[inline]
    #[must_use]
    pub const fn base(self) -> PhysicalAddress {
        PhysicalAddress(self.0.base())
    }

    /// The byte at `offset` inside this page.
    #[inline]
    #[must_use]
    pub const fn join(self, offset: PageOffset<S>) -> PhysicalAddress {
        PhysicalAddress(self.0.with_offset(offset))
    }
}

impl<S: PageSize> fmt::Display for PhysicalPage<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}/{}", self.0.base().as_u64(), S::NAME)
    }
}

impl<S: PageSize> fmt::Debug for PhysicalPage<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysicalPage<{}>(#{})", S::NAME, self.0.index())
    }
}

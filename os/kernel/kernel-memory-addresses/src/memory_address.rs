use crate::{MemoryPage, PageOffset, PageSize};

/// Untyped 64-bit address underneath [`PhysicalAddress`](crate::PhysicalAddress)
/// and [`VirtualAddress`](crate::VirtualAddress).
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub(crate) struct MemoryAddress(u64);

impl MemoryAddress {
    #[inline]
    pub(crate) const fn new(value: u64) -> Self {
        Self(value)
    }

    #[inline]
    pub(crate) const fn as_u64(self) -> u64 {
        self.0
    }

    #[inline]
    pub(crate) const fn page<S: PageSize>(self) -> MemoryPage<S> {
        MemoryPage::containing(self)
    }

    #[inline]
    pub(crate) const fn offset<S: PageSize>(self) -> PageOffset<S> {
        PageOffset::of(self.0)
    }

    #[inline]
    pub(crate) const fn is_aligned<S: PageSize>(self) -> bool {
        self.0 & S::MASK == 0
    }
}

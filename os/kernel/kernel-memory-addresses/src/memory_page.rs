use crate::{MemoryAddress, PageOffset, PageSize};
use core::marker::PhantomData;

/// Aligned page base shared by the physical and virtual page wrappers.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub(crate) struct MemoryPage<S: PageSize> {
    base: u64,
    _size: PhantomData<S>,
}

impl<S: PageSize> MemoryPage<S> {
    #[inline]
    pub(crate) const fn containing(addr: MemoryAddress) -> Self {
        Self {
            base: addr.as_u64() & !S::MASK,
            _size: PhantomData,
        }
    }

    #[inline]
    pub(crate) const fn from_index(index: u64) -> Self {
        Self {
            base: index << S::SHIFT,
            _size: PhantomData,
        }
    }

    #[inline]
    pub(crate) const fn index(self) -> u64 {
        self.base >> S::SHIFT
    }

    #[inline]
    pub(crate) const fn base(self) -> MemoryAddress {
        MemoryAddress::new(self.base)
    }

    #[inline]
    pub(crate) const fn with_offset(self, offset: PageOffset<S>) -> MemoryAddress {
        MemoryAddress::new(self.base | offset.as_u64())
    }
}

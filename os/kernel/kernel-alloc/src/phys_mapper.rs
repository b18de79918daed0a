//! # Physical Mappers
//!
//! Ways to turn a page-table frame number into something the walker can
//! read and write:
//!
//! | Mapper                 | Where                     | Frame `f` is at      |
//! |------------------------|---------------------------|----------------------|
//! | [`IdentityPhysMapper`] | boot window, identity     | `f * 4096`           |
//! | [`FrameArena`]         | hosted builds and tests   | owned storage by `f` |
//!
//! A mapper reports the end of what it reaches through
//! [`PhysMapper::limit`], and the walker only allocates table frames below
//! it. The identity mapper takes its safety obligations in `new`; after that
//! every access is bounds-checked against the window in debug builds.

use kernel_info::memory::PAGE_SIZE;
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K};
use kernel_vmem::{PageTable, PhysMapper};

/// Frames are visible at their own physical address.
#[derive(Debug)]
pub struct IdentityPhysMapper {
    limit: u64,
}

impl IdentityPhysMapper {
    /// # Safety
    /// Physical `[0, limit)` must be identity-mapped and writable for the
    /// lifetime of the mapper, and nothing else may alias the page-table
    /// frames it is asked for.
    #[must_use]
    pub const unsafe fn new(limit: u64) -> Self {
        Self { limit }
    }

    #[inline]
    fn address_of(&self, frame: PhysicalPage<Size4K>) -> usize {
        let pa = frame.base().as_u64();
        debug_assert!(
            pa + PAGE_SIZE <= self.limit,
            "frame {frame} outside the identity window"
        );
        usize::try_from(pa).unwrap_or(usize::MAX)
    }
}

impl PhysMapper for IdentityPhysMapper {
    fn table(&self, frame: PhysicalPage<Size4K>) -> &PageTable {
        let ptr = self.address_of(frame) as *const PageTable;
        // SAFETY: the window is mapped (constructor contract) and frames are 4 KiB aligned.
        unsafe { &*ptr }
    }

    fn table_mut(&mut self, frame: PhysicalPage<Size4K>) -> &mut PageTable {
        let ptr = self.address_of(frame) as *mut PageTable;
        // SAFETY: as above; `&mut self` keeps this the only live view.
        unsafe { &mut *ptr }
    }

    fn limit(&self) -> Option<PhysicalAddress> {
        Some(PhysicalAddress::new(self.limit))
    }
}

#[cfg(any(test, feature = "arena"))]
pub use arena::FrameArena;

#[cfg(any(test, feature = "arena"))]
mod arena {
    use super::{PageTable, PhysMapper, PhysicalAddress, PhysicalPage, Size4K};
    use alloc::boxed::Box;
    use alloc::collections::BTreeMap;
    use kernel_vmem::PageTableEntry;

    /// What a frame holds before anybody wrote to it.
    static POISON: PageTable = PageTable::filled(PageTableEntry::from_bits(u64::MAX));

    /// Physical memory as owned storage indexed by frame number.
    ///
    /// Frames materialize on first write. Until then they read as all-ones,
    /// like uninitialized RAM would, so a table that was linked without
    /// being zeroed shows up as garbage entries.
    #[derive(Default)]
    pub struct FrameArena {
        frames: BTreeMap<u64, Box<PageTable>>,
        limit: Option<PhysicalAddress>,
    }

    impl FrameArena {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// An arena that, like a bounded window, only reaches frames below `limit`.
        #[must_use]
        pub fn with_limit(limit: PhysicalAddress) -> Self {
            Self {
                limit: Some(limit),
                ..Self::default()
            }
        }

        /// Number of frames written so far.
        #[must_use]
        pub fn touched(&self) -> usize {
            self.frames.len()
        }

        #[must_use]
        pub fn is_touched(&self, frame: PhysicalPage<Size4K>) -> bool {
            self.frames.contains_key(&frame.frame_index())
        }
    }

    impl PhysMapper for FrameArena {
        fn table(&self, frame: PhysicalPage<Size4K>) -> &PageTable {
            self.frames
                .get(&frame.frame_index())
                .map_or(&POISON, |t| &**t)
        }

        fn table_mut(&mut self, frame: PhysicalPage<Size4K>) -> &mut PageTable {
            if let Some(limit) = self.limit {
                assert!(frame.base() < limit, "frame {frame} written outside the window");
            }
            self.frames
                .entry(frame.frame_index())
                .or_insert_with(|| Box::new(POISON.clone()))
        }

        fn limit(&self) -> Option<PhysicalAddress> {
            self.limit
        }
    }

    impl core::fmt::Debug for FrameArena {
        fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
            f.debug_struct("FrameArena")
                .field("touched", &self.frames.len())
                .field("limit", &self.limit)
                .finish()
        }
    }
}

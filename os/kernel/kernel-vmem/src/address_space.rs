//! # Address Space (x86-64, PML4-rooted)
//!
//! - [`AddressSpace::ensure_chain`] allocates and links missing intermediate
//!   tables down to the PT covering an address.
//! - [`AddressSpace::map_one`] installs one 4 KiB leaf.
//! - [`AddressSpace::unmap_one`] clears one leaf without allocating.
//! - [`AddressSpace::query`] translates a VA to a PA.
//!
//! The address space never touches the TLB; whoever owns the CPU side
//! ([`Mmu`]) invalidates after edits to an active hierarchy.

use crate::{
    FrameAlloc, Mmu, PageFlags, PageTableEntry, PageTableLevel, PhysMapper, split_indices,
};
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K, VirtualAddress, VirtualPage};
use log::debug;

/// What [`AddressSpace::map_one`] does with an existing leaf.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum MapMode {
    /// Overwrite any previous mapping.
    Replace,
    /// Fail with [`AddressSpaceMapError::AlreadyMapped`] and leave it alone.
    IfAbsent,
}

/// Error returned by [`AddressSpace::ensure_chain`] when a new table frame
/// cannot be allocated.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnsureChainError {
    #[error("out of memory allocating a {0} table")]
    OutOfMemory(PageTableLevel),
}

impl EnsureChainError {
    /// Level of the table that could not be allocated.
    #[must_use]
    pub const fn level(&self) -> PageTableLevel {
        match self {
            Self::OutOfMemory(level) => *level,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressSpaceMapError {
    #[error(transparent)]
    EnsureChain(#[from] EnsureChainError),
    #[error("{va} is already mapped to {existing}")]
    AlreadyMapped {
        va: VirtualAddress,
        existing: PhysicalAddress,
    },
}

/// One 4-level hierarchy and the mapper used to reach its tables.
pub struct AddressSpace<M> {
    root: PhysicalPage<Size4K>,
    mapper: M,
}

/// A frame for a new table that `mapper` can reach.
fn table_frame<M: PhysMapper, A: FrameAlloc>(mapper: &M, alloc: &mut A) -> Option<PhysicalPage<Size4K>> {
    match mapper.limit() {
        Some(limit) => alloc.alloc_4k_below(limit),
        None => alloc.alloc_4k(),
    }
}

impl<M: PhysMapper> AddressSpace<M> {
    /// Allocate and zero a fresh PML4.
    ///
    /// # Errors
    /// [`EnsureChainError::OutOfMemory`] at [`PageTableLevel::Pml4`].
    pub fn create<A: FrameAlloc>(mut mapper: M, alloc: &mut A) -> Result<Self, EnsureChainError> {
        let root = table_frame(&mapper, alloc)
            .ok_or(EnsureChainError::OutOfMemory(PageTableLevel::Pml4))?;
        mapper.table_mut(root).zero();
        debug!("Allocated PML4 at {root}");
        Ok(Self { root, mapper })
    }

    /// Physical page of the PML4.
    #[inline]
    pub const fn root(&self) -> PhysicalPage<Size4K> {
        self.root
    }

    /// Point this address space at another hierarchy, returning the old root.
    ///
    /// `root` must hold a valid PML4 reachable through the mapper.
    #[inline]
    pub const fn replace_root(&mut self, root: PhysicalPage<Size4K>) -> PhysicalPage<Size4K> {
        core::mem::replace(&mut self.root, root)
    }

    #[inline]
    pub const fn mapper(&self) -> &M {
        &self.mapper
    }

    /// Load this hierarchy's root through `mmu`.
    ///
    /// # Safety
    /// See [`Mmu::load_root`].
    #[inline]
    pub unsafe fn activate<C: Mmu + ?Sized>(&self, mmu: &mut C) {
        unsafe { mmu.load_root(self.root) };
    }

    /// Ensure PDPT, PD and PT exist for `va`, returning the PT frame.
    ///
    /// Present entries are followed as they are; a missing table is
    /// allocated, zero-filled and only then linked.
    ///
    /// # Errors
    /// [`EnsureChainError::OutOfMemory`] naming the level that could not be
    /// allocated. Tables linked before the failure stay linked.
    pub fn ensure_chain<A: FrameAlloc>(
        &mut self,
        alloc: &mut A,
        va: VirtualAddress,
    ) -> Result<PhysicalPage<Size4K>, EnsureChainError> {
        let (i4, i3, i2, _) = split_indices(va);

        let pdpt = self.next_table(alloc, self.root, i4.as_usize(), PageTableLevel::Pdpt)?;
        let pd = self.next_table(alloc, pdpt, i3.as_usize(), PageTableLevel::Pd)?;
        self.next_table(alloc, pd, i2.as_usize(), PageTableLevel::Pt)
    }

    fn next_table<A: FrameAlloc>(
        &mut self,
        alloc: &mut A,
        parent: PhysicalPage<Size4K>,
        index: usize,
        level: PageTableLevel,
    ) -> Result<PhysicalPage<Size4K>, EnsureChainError> {
        let entry = self.mapper.table(parent).get(index);
        if let Some(child) = entry.present_frame() {
            debug_assert!(!entry.huge_page(), "huge pages are not supported");
            debug_assert!(
                alloc.is_allocated(child),
                "{level} link at {parent}[{index}] points at free frame {child}"
            );
            return Ok(child);
        }

        let child = table_frame(&self.mapper, alloc).ok_or(EnsureChainError::OutOfMemory(level))?;
        self.mapper.table_mut(child).zero();
        self.mapper
            .table_mut(parent)
            .set(index, PageTableEntry::table_link(child));
        debug!("Linked new {level} table {child} at {parent}[{index}]");
        Ok(child)
    }

    /// PT frame covering `va`, without allocating.
    fn page_table_for(&self, va: VirtualAddress) -> Option<PhysicalPage<Size4K>> {
        let (i4, i3, i2, _) = split_indices(va);

        let pdpt = self.mapper.table(self.root).get(i4.as_usize()).present_frame()?;
        let pd = self.mapper.table(pdpt).get(i3.as_usize()).present_frame()?;
        let pde = self.mapper.table(pd).get(i2.as_usize());
        if pde.huge_page() {
            return None;
        }
        pde.present_frame()
    }

    /// Map `page → pa` with `flags`, writing exactly `pa | flags` into the PT.
    ///
    /// Returns the previous leaf entry (possibly empty).
    ///
    /// # Errors
    /// - Allocation failures from [`ensure_chain`](Self::ensure_chain).
    /// - [`AddressSpaceMapError::AlreadyMapped`] under [`MapMode::IfAbsent`]
    ///   when the leaf is present. Nothing is allocated in that case.
    pub fn map_one<A: FrameAlloc>(
        &mut self,
        alloc: &mut A,
        page: VirtualPage<Size4K>,
        pa: PhysicalAddress,
        flags: PageFlags,
        mode: MapMode,
    ) -> Result<PageTableEntry, AddressSpaceMapError> {
        let va = page.base();
        debug_assert!(pa.is_aligned::<Size4K>(), "physical address {pa} not page aligned");

        if mode == MapMode::IfAbsent
            && let Some(existing) = self.leaf(va)
        {
            return Err(AddressSpaceMapError::AlreadyMapped {
                va,
                existing: existing.address(),
            });
        }

        let pt = self.ensure_chain(alloc, va)?;
        let index = PageTableLevel::Pt.index_of(va);
        let table = self.mapper.table_mut(pt);
        let previous = table.get(index);
        table.set(index, PageTableEntry::leaf(pa, flags));
        Ok(previous)
    }

    /// Clear the leaf for `page`.
    ///
    /// Returns `None` when no PT covers `page` (nothing is allocated and
    /// nothing changes), otherwise the entry that was cleared.
    pub fn unmap_one(&mut self, page: VirtualPage<Size4K>) -> Option<PageTableEntry> {
        let va = page.base();
        let pt = self.page_table_for(va)?;
        let index = PageTableLevel::Pt.index_of(va);
        let table = self.mapper.table_mut(pt);
        let previous = table.get(index);
        table.set(index, PageTableEntry::EMPTY);
        Some(previous)
    }

    /// The present leaf entry for `va`, if any.
    #[must_use]
    pub fn leaf(&self, va: VirtualAddress) -> Option<PageTableEntry> {
        let pt = self.page_table_for(va)?;
        let entry = self.mapper.table(pt).get(PageTableLevel::Pt.index_of(va));
        entry.present().then_some(entry)
    }

    /// Translate `va` to the physical address it currently maps to.
    #[must_use]
    pub fn query(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        let entry = self.leaf(va)?;
        Some(entry.frame().join(va.offset::<Size4K>()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PageTable;
    use std::collections::BTreeMap;

    /// Hands out consecutive frames from `[next, end)`.
    struct BumpAlloc {
        next: u64,
        end: u64,
        first: u64,
    }

    impl BumpAlloc {
        fn new(first: u64, end: u64) -> Self {
            Self {
                next: first,
                end,
                first,
            }
        }

        fn used(&self) -> u64 {
            self.next - self.first
        }
    }

    impl FrameAlloc for BumpAlloc {
        fn alloc_4k(&mut self) -> Option<PhysicalPage<Size4K>> {
            if self.next >= self.end {
                return None;
            }
            let frame = PhysicalPage::from_frame_index(self.next);
            self.next += 1;
            Some(frame)
        }

        fn alloc_4k_below(&mut self, limit: PhysicalAddress) -> Option<PhysicalPage<Size4K>> {
            if (self.next + 1) * 4096 > limit.as_u64() {
                return None;
            }
            self.alloc_4k()
        }

        fn free_4k(&mut self, _frame: PhysicalPage<Size4K>) {}

        fn is_allocated(&self, frame: PhysicalPage<Size4K>) -> bool {
            (self.first..self.next).contains(&frame.frame_index())
        }
    }

    /// Simulated RAM: untouched frames read as all-ones.
    #[derive(Default)]
    struct TestPhys {
        frames: BTreeMap<u64, Box<PageTable>>,
        limit: Option<PhysicalAddress>,
    }

    impl PhysMapper for TestPhys {
        fn table(&self, frame: PhysicalPage<Size4K>) -> &PageTable {
            static GARBAGE: PageTable = PageTable::filled(PageTableEntry::from_bits(u64::MAX));
            self.frames
                .get(&frame.frame_index())
                .map_or(&GARBAGE, |t| &**t)
        }

        fn table_mut(&mut self, frame: PhysicalPage<Size4K>) -> &mut PageTable {
            self.frames
                .entry(frame.frame_index())
                .or_insert_with(|| Box::new(PageTable::filled(PageTableEntry::from_bits(u64::MAX))))
        }

        fn limit(&self) -> Option<PhysicalAddress> {
            self.limit
        }
    }

    fn space() -> (AddressSpace<TestPhys>, BumpAlloc) {
        let mut alloc = BumpAlloc::new(0x100, 0x140);
        let aspace = AddressSpace::create(TestPhys::default(), &mut alloc).unwrap();
        (aspace, alloc)
    }

    fn page(va: u64) -> VirtualPage<Size4K> {
        VirtualPage::containing_address(VirtualAddress::new(va))
    }

    #[test]
    fn map_one_creates_three_zeroed_tables_and_the_leaf() {
        let (mut aspace, mut alloc) = space();
        let prev = aspace
            .map_one(
                &mut alloc,
                page(0x1000),
                PhysicalAddress::new(0x2000),
                PageFlags::KERNEL_RW,
                MapMode::Replace,
            )
            .unwrap();
        assert_eq!(prev, PageTableEntry::EMPTY);
        assert_eq!(alloc.used(), 4);

        let pml4 = aspace.mapper().table(aspace.root());
        assert_eq!(pml4.present_count(), 1);
        let e4 = pml4.get(0);
        assert_eq!(e4.flags(), PageFlags::TABLE_LINK);

        let pdpt = aspace.mapper().table(e4.frame());
        assert_eq!(pdpt.present_count(), 1);
        let pd = aspace.mapper().table(pdpt.get(0).frame());
        assert_eq!(pd.present_count(), 1);
        let pt = aspace.mapper().table(pd.get(0).frame());
        assert_eq!(pt.present_count(), 1);
        assert_eq!(pt.get(1).into_bits(), 0x2003);
    }

    #[test]
    fn second_mapping_in_the_same_pt_allocates_nothing() {
        let (mut aspace, mut alloc) = space();
        for va in [0x40_0000, 0x40_1000, 0x5f_f000] {
            aspace
                .map_one(
                    &mut alloc,
                    page(va),
                    PhysicalAddress::new(va),
                    PageFlags::KERNEL_RW,
                    MapMode::Replace,
                )
                .unwrap();
        }
        assert_eq!(alloc.used(), 4);
        assert_eq!(aspace.query(VirtualAddress::new(0x5f_f123)), Some(PhysicalAddress::new(0x5f_f123)));
    }

    #[test]
    fn out_of_memory_reports_the_level() {
        let mut alloc = BumpAlloc::new(0x100, 0x102);
        let mut aspace = AddressSpace::create(TestPhys::default(), &mut alloc).unwrap();
        let err = aspace
            .map_one(
                &mut alloc,
                page(0x1000),
                PhysicalAddress::new(0x2000),
                PageFlags::KERNEL_RW,
                MapMode::Replace,
            )
            .unwrap_err();
        assert_eq!(
            err,
            AddressSpaceMapError::EnsureChain(EnsureChainError::OutOfMemory(PageTableLevel::Pd))
        );
    }

    #[test]
    fn if_absent_refuses_to_overwrite() {
        let (mut aspace, mut alloc) = space();
        let va = page(0xffff_ffff_8000_0000);
        aspace
            .map_one(&mut alloc, va, PhysicalAddress::new(0x1000), PageFlags::KERNEL_RW, MapMode::IfAbsent)
            .unwrap();
        let used = alloc.used();

        let err = aspace
            .map_one(&mut alloc, va, PhysicalAddress::new(0x9000), PageFlags::KERNEL_RW, MapMode::IfAbsent)
            .unwrap_err();
        assert_eq!(
            err,
            AddressSpaceMapError::AlreadyMapped {
                va: va.base(),
                existing: PhysicalAddress::new(0x1000)
            }
        );
        assert_eq!(alloc.used(), used);
        assert_eq!(aspace.query(va.base()), Some(PhysicalAddress::new(0x1000)));
    }

    #[test]
    fn unmap_without_chain_is_a_no_op() {
        let (mut aspace, _alloc) = space();
        assert_eq!(aspace.unmap_one(page(0x7000_0000)), None);
        assert!(aspace.mapper().table(aspace.root()).is_empty());
    }

    #[test]
    fn unmap_keeps_intermediate_tables() {
        let (mut aspace, mut alloc) = space();
        aspace
            .map_one(&mut alloc, page(0x3000), PhysicalAddress::new(0x8000), PageFlags::KERNEL_RW, MapMode::Replace)
            .unwrap();

        let prev = aspace.unmap_one(page(0x3000)).unwrap();
        assert_eq!(prev.address(), PhysicalAddress::new(0x8000));
        assert_eq!(aspace.query(VirtualAddress::new(0x3000)), None);
        assert!(aspace.mapper().table(aspace.root()).get(0).present());
        assert!(alloc.is_allocated(aspace.root()));
    }

    #[test]
    fn leaf_reports_only_present_entries() {
        let (mut aspace, mut alloc) = space();
        aspace.ensure_chain(&mut alloc, VirtualAddress::new(0x20_0000)).unwrap();
        assert_eq!(aspace.leaf(VirtualAddress::new(0x20_0000)), None);
        assert_eq!(aspace.leaf(VirtualAddress::new(0x1_0000_0000)), None);
    }

    #[test]
    fn tables_are_only_allocated_below_the_mapper_limit() {
        let mut alloc = BumpAlloc::new(0x100, 0x140);
        let phys = TestPhys {
            limit: Some(PhysicalAddress::new(0x10_2000)),
            ..TestPhys::default()
        };
        let mut aspace = AddressSpace::create(phys, &mut alloc).unwrap();

        let err = aspace
            .map_one(&mut alloc, page(0x1000), PhysicalAddress::new(0x5000), PageFlags::KERNEL_RW, MapMode::Replace)
            .unwrap_err();
        assert_eq!(err, AddressSpaceMapError::EnsureChain(EnsureChainError::OutOfMemory(PageTableLevel::Pd)));
        // PML4 and PDPT fit under the limit, the PD would not.
        assert_eq!(alloc.used(), 2);
        assert!(alloc.next < alloc.end);
    }
}

//! # Virtual Memory Support
//!
//! x86-64 4-level paging with 4 KiB pages: entry and table layouts, virtual
//! address decomposition, and an [`AddressSpace`] that walks, builds and
//! edits one PML4-rooted hierarchy.
//!
//! ## What you get
//! - [`PageTableEntry`], the hardware entry as a bitfield, and [`PageFlags`],
//!   the permission bits a caller asks for.
//! - [`PageTable`], a 4 KiB-aligned array of 512 entries, and the typed
//!   per-level indices produced by [`split_indices`].
//! - Three seams to the rest of the kernel: [`FrameAlloc`] supplies table
//!   frames, [`PhysMapper`] makes a frame addressable, [`Mmu`] loads CR3 and
//!   invalidates TLB entries.
//!
//! ## x86-64 Virtual Address → Physical Address Walk
//!
//! ```text
//!  CR3 → PML4 ──[47:39]──► PDPT ──[38:30]──► PD ──[29:21]──► PT ──[20:12]──► frame + [11:0]
//! ```
//!
//! | Level | Table | Entry points to |
//! |:------|:------|:----------------|
//! | 4 | PML4 | a PDPT |
//! | 3 | PDPT | a PD |
//! | 2 | PD   | a PT |
//! | 1 | PT   | the mapped 4 KiB frame (leaf) |
//!
//! ## Table ownership
//!
//! Intermediate tables are allocated on demand from the [`FrameAlloc`],
//! below the [`PhysMapper::limit`] of the mapper that has to reach them,
//! zero-filled before they are linked, and linked as `PRESENT | WRITABLE`.
//! The leaf carries the caller's flags, so effective permissions are decided
//! at the leaf. Unmapping clears the leaf only; intermediate tables stay
//! allocated and linked for the lifetime of the address space.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod address_space;
mod entry;
mod table;

pub use crate::address_space::{AddressSpace, AddressSpaceMapError, EnsureChainError, MapMode};
pub use crate::entry::{ENTRY_ADDRESS_MASK, PageFlags, PageTableEntry};
pub use crate::table::{
    ENTRIES_PER_TABLE, L1Index, L2Index, L3Index, L4Index, PageTable, PageTableLevel,
    split_indices,
};

use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K, VirtualPage};

/// Source of **physical** 4 KiB frames for page tables.
pub trait FrameAlloc {
    /// Allocate one frame, `None` when memory is exhausted.
    fn alloc_4k(&mut self) -> Option<PhysicalPage<Size4K>>;

    /// Allocate one frame lying entirely below `limit`, `None` if there is none.
    fn alloc_4k_below(&mut self, limit: PhysicalAddress) -> Option<PhysicalPage<Size4K>>;

    /// Return a frame. Frames that are not allocated are ignored.
    fn free_4k(&mut self, frame: PhysicalPage<Size4K>);

    /// Whether `frame` is currently handed out (or otherwise unavailable).
    fn is_allocated(&self, frame: PhysicalPage<Size4K>) -> bool;
}

impl<A: FrameAlloc + ?Sized> FrameAlloc for &mut A {
    #[inline]
    fn alloc_4k(&mut self) -> Option<PhysicalPage<Size4K>> {
        (**self).alloc_4k()
    }

    #[inline]
    fn alloc_4k_below(&mut self, limit: PhysicalAddress) -> Option<PhysicalPage<Size4K>> {
        (**self).alloc_4k_below(limit)
    }

    #[inline]
    fn free_4k(&mut self, frame: PhysicalPage<Size4K>) {
        (**self).free_4k(frame);
    }

    #[inline]
    fn is_allocated(&self, frame: PhysicalPage<Size4K>) -> bool {
        (**self).is_allocated(frame)
    }
}

/// Makes page-table frames addressable in the current address space.
///
/// On hardware this is an identity view of the low physical window;
/// in host tests it is owned storage indexed by frame number. Implementors
/// that hand out views of raw memory take their safety obligations in their
/// constructor, so the accessors are safe.
pub trait PhysMapper {
    /// Read-only view of the table stored in `frame`.
    fn table(&self, frame: PhysicalPage<Size4K>) -> &PageTable;

    /// Writable view of the table stored in `frame`.
    fn table_mut(&mut self, frame: PhysicalPage<Size4K>) -> &mut PageTable;

    /// Exclusive upper bound of the frames this mapper reaches, `None` if unbounded.
    ///
    /// New tables are only ever allocated below it.
    fn limit(&self) -> Option<PhysicalAddress> {
        None
    }
}

impl<M: PhysMapper + ?Sized> PhysMapper for &mut M {
    #[inline]
    fn table(&self, frame: PhysicalPage<Size4K>) -> &PageTable {
        (**self).table(frame)
    }

    #[inline]
    fn table_mut(&mut self, frame: PhysicalPage<Size4K>) -> &mut PageTable {
        (**self).table_mut(frame)
    }

    #[inline]
    fn limit(&self) -> Option<PhysicalAddress> {
        (**self).limit()
    }
}

/// The CPU side of paging: root register and TLB.
pub trait Mmu {
    /// Make `root` the active PML4.
    ///
    /// # Safety
    /// The hierarchy under `root` must map the code, stack and data the CPU
    /// is about to touch, including the caller itself.
    unsafe fn load_root(&mut self, root: PhysicalPage<Size4K>);

    /// Drop the cached translation of one page.
    fn invalidate(&mut self, page: VirtualPage<Size4K>);
}

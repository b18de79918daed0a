//! # Kernel Virtual Memory Manager
//!
//! Owns the kernel's single address space and the CPU side of paging.
//!
//! ```text
//!   Vmm::new ──────────► Built ──activate / switch_root──► Active
//!   Vmm::bootstrap ─────────────────────────────────────► Active
//! ```
//!
//! While *Built*, edits go to tables the CPU does not walk yet and the TLB
//! is left alone; the CR3 load at activation flushes it. Once *Active*,
//! every edited page is invalidated with `invlpg`. There is no way back.

use kernel_info::memory::{MemoryLayout, PAGE_SIZE};
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K, VirtualAddress, VirtualPage};
use kernel_vmem::{
    AddressSpace, AddressSpaceMapError, EnsureChainError, FrameAlloc, MapMode, Mmu, PageFlags,
    PageTableEntry, PageTableLevel, PhysMapper,
};
use log::{debug, info};

/// Physical extent of the loaded kernel image.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct KernelImage {
    pub start: PhysicalAddress,
    pub end: PhysicalAddress,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VmmError {
    #[error("out of memory allocating a {level} table")]
    OutOfMemory { level: PageTableLevel },
    #[error("{va} is already mapped to {existing}")]
    AlreadyMapped {
        va: VirtualAddress,
        existing: PhysicalAddress,
    },
    #[error("kernel image {start}..{end} is not fully mapped, first gap at {missing}")]
    KernelNotCovered {
        start: PhysicalAddress,
        end: PhysicalAddress,
        missing: PhysicalAddress,
    },
}

impl From<EnsureChainError> for VmmError {
    fn from(value: EnsureChainError) -> Self {
        Self::OutOfMemory {
            level: value.level(),
        }
    }
}

impl From<AddressSpaceMapError> for VmmError {
    fn from(value: AddressSpaceMapError) -> Self {
        match value {
            AddressSpaceMapError::EnsureChain(e) => e.into(),
            AddressSpaceMapError::AlreadyMapped { va, existing } => {
                Self::AlreadyMapped { va, existing }
            }
        }
    }
}

pub struct Vmm<M, C> {
    space: AddressSpace<M>,
    mmu: C,
    active: bool,
}

impl<M: PhysMapper, C: Mmu> Vmm<M, C> {
    /// A manager with a fresh, empty root that is not active yet.
    ///
    /// # Errors
    /// [`VmmError::OutOfMemory`] if no frame is left for the PML4.
    pub fn new<A: FrameAlloc>(mapper: M, mmu: C, alloc: &mut A) -> Result<Self, VmmError> {
        let space = AddressSpace::create(mapper, alloc)?;
        Ok(Self {
            space,
            mmu,
            active: false,
        })
    }

    /// Build the kernel address space and switch to it.
    ///
    /// Maps `[0, boot_window_size)` twice, at identity and at
    /// `kernel_offset + pa`, checks that both aliases cover `kernel`, then
    /// loads the new root.
    ///
    /// # Errors
    /// - [`VmmError::OutOfMemory`] while building the tables.
    /// - [`VmmError::KernelNotCovered`] if the window misses part of the
    ///   kernel image. The root is not loaded in that case.
    pub fn bootstrap<A: FrameAlloc>(
        mapper: M,
        mmu: C,
        alloc: &mut A,
        layout: &MemoryLayout,
        kernel: KernelImage,
    ) -> Result<Self, VmmError> {
        let mut vmm = Self::new(mapper, mmu, alloc)?;

        info!(
            "Mapping boot window 0..{:#x} at identity and at {}",
            layout.boot_window_size, layout.kernel_offset
        );
        let mut pa = 0;
        while pa < layout.boot_window_size {
            let phys = PhysicalAddress::new(pa);
            vmm.map_page(alloc, VirtualAddress::new(pa), phys, PageFlags::KERNEL_RW)?;
            vmm.map_page(alloc, layout.high_alias(phys), phys, PageFlags::KERNEL_RW)?;
            pa += PAGE_SIZE;
        }

        vmm.verify_kernel_mapped(layout, kernel)?;

        // SAFETY: both aliases of the kernel image (code, data, boot stack)
        // were verified above.
        unsafe { vmm.activate() };
        Ok(vmm)
    }

    fn verify_kernel_mapped(&self, layout: &MemoryLayout, kernel: KernelImage) -> Result<(), VmmError> {
        let mut page = kernel.start.page::<Size4K>();
        while page.base() < kernel.end {
            let pa = page.base();
            let identity = self.translate(VirtualAddress::new(pa.as_u64()));
            let high = self.translate(layout.high_alias(pa));
            if identity != Some(pa) || high != Some(pa) {
                return Err(VmmError::KernelNotCovered {
                    start: kernel.start,
                    end: kernel.end,
                    missing: pa,
                });
            }
            page = PhysicalPage::from_frame_index(page.frame_index() + 1);
        }
        debug!("Kernel image {}..{} mapped at both aliases", kernel.start, kernel.end);
        Ok(())
    }

    fn flush(&mut self, page: VirtualPage<Size4K>) {
        if self.active {
            self.mmu.invalidate(page);
        }
    }

    fn map_with<A: FrameAlloc>(
        &mut self,
        alloc: &mut A,
        va: VirtualAddress,
        pa: PhysicalAddress,
        flags: PageFlags,
        mode: MapMode,
    ) -> Result<(), VmmError> {
        let page = VirtualPage::containing_address(va);
        let frame = pa.page::<Size4K>().base();
        self.space.map_one(alloc, page, frame, flags, mode)?;
        self.flush(page);
        Ok(())
    }

    /// Map the page containing `va` to the frame containing `pa`, replacing
    /// any previous mapping. Mapping the same triple twice changes nothing.
    ///
    /// # Errors
    /// [`VmmError::OutOfMemory`] naming the table level that could not be allocated.
    pub fn map_page<A: FrameAlloc>(
        &mut self,
        alloc: &mut A,
        va: VirtualAddress,
        pa: PhysicalAddress,
        flags: PageFlags,
    ) -> Result<(), VmmError> {
        self.map_with(alloc, va, pa, flags, MapMode::Replace)
    }

    /// Like [`map_page`](Self::map_page), but never replaces a present mapping.
    ///
    /// # Errors
    /// [`VmmError::AlreadyMapped`] if `va` is mapped, or [`VmmError::OutOfMemory`].
    pub fn map_page_if_absent<A: FrameAlloc>(
        &mut self,
        alloc: &mut A,
        va: VirtualAddress,
        pa: PhysicalAddress,
        flags: PageFlags,
    ) -> Result<(), VmmError> {
        self.map_with(alloc, va, pa, flags, MapMode::IfAbsent)
    }

    /// Remove the mapping of the page containing `va`.
    ///
    /// Returns the frame it pointed to. Intermediate tables are kept even
    /// when they become empty; nothing is allocated.
    pub fn unmap_page(&mut self, va: VirtualAddress) -> Option<PhysicalAddress> {
        let page = VirtualPage::containing_address(va);
        let previous = self.space.unmap_one(page)?;
        self.flush(page);
        previous.present().then_some(previous.address())
    }

    /// The physical address `va` translates to.
    #[must_use]
    pub fn translate(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        self.space.query(va)
    }

    /// The present leaf entry of `va`.
    #[must_use]
    pub fn leaf_entry(&self, va: VirtualAddress) -> Option<PageTableEntry> {
        self.space.leaf(va)
    }

    #[inline]
    #[must_use]
    pub const fn root(&self) -> PhysicalPage<Size4K> {
        self.space.root()
    }

    #[inline]
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active
    }

    /// Load this manager's root.
    ///
    /// # Safety
    /// The hierarchy must map the running code, its stack and data.
    pub unsafe fn activate(&mut self) {
        // SAFETY: forwarded to the caller.
        unsafe { self.space.activate(&mut self.mmu) };
        self.active = true;
    }

    /// Switch to another PML4 and manage it from now on. Returns the old root.
    ///
    /// # Safety
    /// `root` must be a PML4 reachable through this manager's mapper that maps
    /// the running code, its stack and data.
    pub unsafe fn switch_root(&mut self, root: PhysicalPage<Size4K>) -> PhysicalPage<Size4K> {
        let previous = self.space.replace_root(root);
        // SAFETY: forwarded to the caller.
        unsafe { self.activate() };
        previous
    }

    #[inline]
    #[must_use]
    pub const fn mapper(&self) -> &M {
        self.space.mapper()
    }

    #[inline]
    #[must_use]
    pub const fn mmu(&self) -> &C {
        &self.mmu
    }
}

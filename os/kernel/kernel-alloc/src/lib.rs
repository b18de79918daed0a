//! # Kernel Memory Management
//!
//! Physical frame allocation and the kernel's virtual address space, wired
//! together behind one interrupt-safe facade.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │ KernelMemory        SpinLock<Vmm>  →  SpinLock<PMM>   │
//! └───────────┬───────────────────────────────┬──────────┘
//!             │                               │
//! ┌───────────▼──────────────┐   ┌────────────▼──────────┐
//! │ Vmm (vmm)                │   │ BitmapFrameAlloc      │
//! │  AddressSpace + Mmu      │──►│ (frame_alloc)         │
//! │  identity + higher half  │   │ 1 bit per 4 KiB frame │
//! └───────────┬──────────────┘   └───────────────────────┘
//!             │
//! ┌───────────▼──────────────┐
//! │ PhysMapper (phys_mapper) │
//! │ identity / arena         │
//! └──────────────────────────┘
//! ```
//!
//! ## Components
//!
//! | Module          | Owns                                                 |
//! |-----------------|------------------------------------------------------|
//! | [`frame_alloc`] | the frame bitmap, its free counter and search cursor |
//! | [`vmm`]         | the active PML4 and TLB maintenance                  |
//! | [`phys_mapper`] | how a page-table frame becomes addressable           |
//! | `mmu`           | CR3 and `invlpg` on x86-64                           |
//! | [`boot`]        | the bring-up order from multiboot2 to `KernelMemory` |
//!
//! ## Locking
//!
//! Both managers sit behind their own [`SpinLock`] and are always taken
//! with interrupts masked. Operations needing both lock the VMM first and
//! the PMM second; nothing takes them the other way round.
//!
//! ## Usage
//!
//! ```rust
//! use kernel_alloc::frame_alloc::{BitmapFrameAlloc, PmmConfig};
//! use kernel_memory_addresses::PhysicalAddress;
//! use kernel_multiboot::{MemoryRegion, MemoryRegionKind};
//!
//! let config = PmmConfig {
//!     max_memory_size: 16 * 1024 * 1024,
//!     frame_bitmap_base: PhysicalAddress::new(0x80_0000),
//!     low_reserved_floor: 0x20_0000,
//! };
//! let mut bitmap = vec![0u8; config.bitmap_bytes()];
//! let ram = MemoryRegion::new(0, 16 * 1024 * 1024, MemoryRegionKind::Available);
//! let mut pmm = BitmapFrameAlloc::init(&mut bitmap, config, [ram], PhysicalAddress::new(0x30_0000));
//!
//! let frame = pmm.alloc_frame().unwrap();
//! assert_eq!(frame.base(), PhysicalAddress::new(0x30_0000));
//! pmm.free_frame(frame);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

#[cfg(any(test, feature = "arena"))]
extern crate alloc;

pub mod boot;
pub mod frame_alloc;
#[cfg(target_arch = "x86_64")]
pub mod mmu;
pub mod phys_mapper;
#[cfg(test)]
mod testing;
pub mod vmm;

use crate::frame_alloc::BitmapFrameAlloc;
use crate::vmm::{Vmm, VmmError};
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K, VirtualAddress};
use kernel_sync::SpinLock;
use kernel_vmem::{Mmu, PageFlags, PhysMapper};

/// The kernel's physical and virtual memory managers behind their locks.
pub struct KernelMemory<'b, M, C> {
    vmm: SpinLock<Vmm<M, C>>,
    pmm: SpinLock<BitmapFrameAlloc<'b>>,
}

impl<'b, M: PhysMapper, C: Mmu> KernelMemory<'b, M, C> {
    #[must_use]
    pub const fn new(vmm: Vmm<M, C>, pmm: BitmapFrameAlloc<'b>) -> Self {
        Self {
            vmm: SpinLock::new(vmm),
            pmm: SpinLock::new(pmm),
        }
    }

    #[must_use]
    pub fn alloc_frame(&self) -> Option<PhysicalPage<Size4K>> {
        self.pmm.with_lock_irq(BitmapFrameAlloc::alloc_frame)
    }

    pub fn free_frame(&self, frame: PhysicalPage<Size4K>) {
        self.pmm.with_lock_irq(|pmm| pmm.free_frame(frame));
    }

    #[must_use]
    pub fn free_frames(&self) -> u64 {
        self.pmm.with_lock_irq(|pmm| pmm.free_frames())
    }

    #[must_use]
    pub fn is_frame_used(&self, frame: PhysicalPage<Size4K>) -> bool {
        self.pmm.with_lock_irq(|pmm| pmm.is_frame_used(frame))
    }

    /// See [`Vmm::map_page`].
    ///
    /// # Errors
    /// As [`Vmm::map_page`].
    pub fn map_page(
        &self,
        va: VirtualAddress,
        pa: PhysicalAddress,
        flags: PageFlags,
    ) -> Result<(), VmmError> {
        let mut vmm = self.vmm.lock_irq();
        let mut pmm = self.pmm.lock_irq();
        vmm.map_page(&mut *pmm, va, pa, flags)
    }

    /// See [`Vmm::map_page_if_absent`].
    ///
    /// # Errors
    /// As [`Vmm::map_page_if_absent`].
    pub fn map_page_if_absent(
        &self,
        va: VirtualAddress,
        pa: PhysicalAddress,
        flags: PageFlags,
    ) -> Result<(), VmmError> {
        let mut vmm = self.vmm.lock_irq();
        let mut pmm = self.pmm.lock_irq();
        vmm.map_page_if_absent(&mut *pmm, va, pa, flags)
    }

    #[must_use]
    pub fn unmap_page(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        self.vmm.with_lock_irq(|vmm| vmm.unmap_page(va))
    }

    #[must_use]
    pub fn translate(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        self.vmm.with_lock_irq(|vmm| vmm.translate(va))
    }

    #[must_use]
    pub fn root(&self) -> PhysicalPage<Size4K> {
        self.vmm.with_lock_irq(|vmm| vmm.root())
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.vmm.with_lock_irq(|vmm| vmm.is_active())
    }

    /// See [`Vmm::switch_root`].
    ///
    /// # Safety
    /// As [`Vmm::switch_root`].
    #[must_use]
    pub unsafe fn switch_root(&self, root: PhysicalPage<Size4K>) -> PhysicalPage<Size4K> {
        // SAFETY: forwarded to the caller.
        self.vmm.with_lock_irq(|vmm| unsafe { vmm.switch_root(root) })
    }

    /// Take both managers apart again.
    #[must_use]
    pub fn into_inner(self) -> (Vmm<M, C>, BitmapFrameAlloc<'b>) {
        (self.vmm.into_inner(), self.pmm.into_inner())
    }
}

//! The [`Mmu`] of the executing x86-64 CPU.

use kernel_memory_addresses::{PhysicalPage, Size4K, VirtualPage};
use kernel_registers::{Cr3, StoreRegisterUnsafe, tlb};
use kernel_vmem::Mmu;
use log::info;

/// CR3 and `invlpg` on the current CPU.
#[derive(Debug)]
pub struct X86Mmu {
    _ring0: (),
}

impl X86Mmu {
    /// # Safety
    /// Only constructible in ring 0 with paging enabled.
    #[must_use]
    pub const unsafe fn new() -> Self {
        Self { _ring0: () }
    }
}

impl Mmu for X86Mmu {
    unsafe fn load_root(&mut self, root: PhysicalPage<Size4K>) {
        info!("Loading CR3 with PML4 at {root}");
        // SAFETY: the caller guarantees `root` maps the running code.
        unsafe { Cr3::from_root(root).store_unsafe() };
    }

    fn invalidate(&mut self, page: VirtualPage<Size4K>) {
        // SAFETY: ring 0 per constructor contract.
        unsafe { tlb::invlpg(page) };
    }
}

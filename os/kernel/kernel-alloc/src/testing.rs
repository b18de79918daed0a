//! Test doubles shared by the unit tests of this crate.

use kernel_info::memory::{KERNEL_BASE, MemoryLayout, PHYS_LOAD};
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K, VirtualAddress, VirtualPage};
use kernel_multiboot::{MemoryRegion, MemoryRegionKind};
use kernel_vmem::Mmu;

const MIB: u64 = 1024 * 1024;

/// 64 MiB of tracked memory, a 4 MiB boot window, bitmap at 3.5 MiB.
pub const fn small_layout() -> MemoryLayout {
    MemoryLayout {
        max_memory_size: 64 * MIB,
        frame_bitmap_base: PhysicalAddress::new(0x38_0000),
        low_reserved_floor: 2 * MIB,
        kernel_load: PhysicalAddress::new(PHYS_LOAD),
        kernel_offset: VirtualAddress::new(KERNEL_BASE),
        boot_window_size: 4 * MIB,
    }
}

pub fn available(base: u64, len: u64) -> MemoryRegion {
    MemoryRegion::new(base, len, MemoryRegionKind::Available)
}

/// Records what would have reached CR3 and `invlpg`.
#[derive(Debug, Default)]
pub struct RecordingMmu {
    pub loads: Vec<PhysicalPage<Size4K>>,
    pub invalidated: Vec<VirtualPage<Size4K>>,
}

impl Mmu for RecordingMmu {
    unsafe fn load_root(&mut self, root: PhysicalPage<Size4K>) {
        self.loads.push(root);
    }

    fn invalidate(&mut self, page: VirtualPage<Size4K>) {
        self.invalidated.push(page);
    }
}

//! # Memory Bring-Up
//!
//! The first thing the 64-bit kernel does with memory:
//!
//! ```text
//!   multiboot2 info ──► memory map ──► BitmapFrameAlloc::init
//!                                              │
//!                                              ▼
//!                        Vmm::bootstrap (identity + higher half, CR3)
//!                                              │
//!                                              ▼
//!                                        KernelMemory
//! ```
//!
//! A boot information structure that fails to parse, or that carries no
//! memory map, is logged and treated as "no usable memory": the kernel
//! keeps running with an allocator that has no free frames, and the
//! bootstrap fails with [`VmmError::OutOfMemory`] right after.

use crate::KernelMemory;
use crate::frame_alloc::{BitmapFrameAlloc, PmmConfig};
use crate::vmm::{KernelImage, Vmm, VmmError};
use kernel_info::memory::MemoryLayout;
use kernel_memory_addresses::PhysicalAddress;
use kernel_multiboot::{BootInformation, MemoryMap, MultibootError};
use kernel_vmem::{Mmu, PhysMapper};
use log::{info, warn};

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BootError {
    #[error(transparent)]
    Vmm(#[from] VmmError),
    #[error("frame bitmap {base}..{end} lies outside the {window:#x} byte boot window")]
    BitmapOutsideWindow {
        base: PhysicalAddress,
        end: PhysicalAddress,
        window: u64,
    },
}

/// Where the loader put its boot information.
#[derive(Debug, Clone)]
pub struct BootSource<'i> {
    /// The parsed header, or why it could not be parsed.
    pub info: Result<BootInformation<'i>, MultibootError>,
    /// Physical address of `info`; its frames are withheld from the allocator.
    pub info_address: Option<PhysicalAddress>,
    /// First physical byte past the kernel image.
    pub kernel_physical_end: PhysicalAddress,
}

fn memory_map<'i>(info: &Result<BootInformation<'i>, MultibootError>) -> Option<MemoryMap<'i>> {
    let info = match info {
        Ok(info) => info,
        Err(e) => {
            warn!("Unusable multiboot2 information, assuming no memory: {e}");
            return None;
        }
    };

    match info.memory_map() {
        Ok(Some(map)) => Some(map),
        Ok(None) => {
            warn!("Multiboot2 information has no memory map, assuming no memory");
            None
        }
        Err(e) => {
            warn!("Malformed multiboot2 memory map, assuming no memory: {e}");
            None
        }
    }
}

/// Initialize the frame allocator and switch to the kernel address space.
///
/// `bitmap` is the frame bitmap storage described by `layout`. `mapper` must
/// reach every frame below its [`limit`](PhysMapper::limit), both before and
/// after the new root is loaded; page tables are only allocated there.
///
/// # Errors
/// - [`BootError::BitmapOutsideWindow`] if the bitmap would become
///   unreachable once the boot window replaces the loader's mappings.
/// - [`BootError::Vmm`] if the kernel address space cannot be built.
pub fn bring_up<'b, M, C>(
    bitmap: &'b mut [u8],
    layout: &MemoryLayout,
    source: &BootSource<'_>,
    mapper: M,
    mmu: C,
) -> Result<KernelMemory<'b, M, C>, BootError>
where
    M: PhysMapper,
    C: Mmu,
{
    let base = layout.frame_bitmap_base;
    let end = PhysicalAddress::new(base.as_u64() + layout.frame_bitmap_size());
    if end.as_u64() > layout.boot_window_size {
        return Err(BootError::BitmapOutsideWindow {
            base,
            end,
            window: layout.boot_window_size,
        });
    }

    let regions = memory_map(&source.info).into_iter().flatten();
    let mut pmm = BitmapFrameAlloc::init(
        bitmap,
        PmmConfig::from_layout(layout),
        regions,
        source.kernel_physical_end,
    );

    if let (Ok(info), Some(address)) = (&source.info, source.info_address) {
        let info_end = PhysicalAddress::new(address.as_u64() + info.total_size() as u64);
        pmm.reserve_range(address, info_end);
    }

    let kernel = KernelImage {
        start: layout.kernel_load,
        end: source.kernel_physical_end,
    };
    let vmm = Vmm::bootstrap(mapper, mmu, &mut pmm, layout, kernel)?;

    info!(
        "Memory up: {} of {} frames free, PML4 at {}",
        pmm.free_frames(),
        pmm.total_frames(),
        vmm.root()
    );
    Ok(KernelMemory::new(vmm, pmm))
}

/// Bring up memory on the executing CPU from the trampoline's handoff.
///
/// # Errors
/// As [`bring_up`].
///
/// # Safety
/// - Must run once, in ring 0, before anything else touches physical memory.
/// - The loader's page tables must identity-map the default boot window,
///   including the boot information and the frame bitmap storage.
/// - Nothing may alias the bitmap storage for the rest of the kernel's life.
#[cfg(target_arch = "x86_64")]
pub unsafe fn init_memory(
    handoff: &kernel_info::boot::BootHandoff,
) -> Result<KernelMemory<'static, crate::phys_mapper::IdentityPhysMapper, crate::mmu::X86Mmu>, BootError>
{
    use crate::mmu::X86Mmu;
    use crate::phys_mapper::IdentityPhysMapper;

    let layout = MemoryLayout::DEFAULT;
    let address = handoff.multiboot_info();

    // SAFETY: identity-mapped and reserved below before any frame is handed out.
    let info = unsafe { BootInformation::from_loader(handoff.bootloader_magic, address) };
    let source = BootSource {
        info,
        info_address: Some(address),
        kernel_physical_end: handoff.kernel_physical_end(),
    };

    let len = usize::try_from(layout.frame_bitmap_size()).unwrap_or(usize::MAX);
    let ptr = layout.frame_bitmap_base.as_u64() as *mut u8;
    // SAFETY: identity-mapped, excluded from allocation by the PMM and not
    // aliased per the caller's contract.
    let bitmap = unsafe { core::slice::from_raw_parts_mut(ptr, len) };

    // SAFETY: the boot window is identity-mapped under both the loader's
    // tables and the ones built by the bootstrap.
    let mapper = unsafe { IdentityPhysMapper::new(layout.boot_window_size) };
    // SAFETY: ring 0 per the caller's contract.
    let mmu = unsafe { X86Mmu::new() };

    bring_up(bitmap, &layout, &source, mapper, mmu)
}

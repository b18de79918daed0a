//! Translation lookaside buffer maintenance.

use kernel_memory_addresses::{Size4K, VirtualPage};

/// Drop the cached translation for a single page on the executing CPU.
///
/// # Safety
/// Ring 0 only. Invalidation itself cannot corrupt state, but it must run
/// after the page-table write it publishes.
#[cfg(all(feature = "asm", target_arch = "x86_64"))]
#[inline]
pub unsafe fn invlpg(page: VirtualPage<Size4K>) {
    let va = page.base().as_u64();
    unsafe {
        core::arch::asm!("invlpg [{}]", in(reg) va, options(nostack, preserves_flags));
    }
}


//! # Bitmap Physical Frame Allocator
//!
//! One bit per 4 KiB frame over `[0, max_memory_size)`: `1` means used or
//! unavailable, `0` means free. Frame `i` lives in bit `i % 8` of byte `i / 8`.
//!
//! ```text
//! byte 0                byte 1
//! ┌─┬─┬─┬─┬─┬─┬─┬─┐     ┌─┬─┬─┬─┬─┬─┬─┬─┐
//! │7│6│5│4│3│2│1│0│     │F│E│D│C│B│A│9│8│   frame numbers
//! └─┴─┴─┴─┴─┴─┴─┴─┘     └─┴─┴─┴─┴─┴─┴─┴─┘
//! ```
//!
//! The free counter always equals the number of zero bits; the cursor is a
//! hint where the next search starts. Allocation scans from the cursor to the
//! end and then wraps around from frame 0.
//!
//! ## Initialization
//!
//! 1. Every frame is marked used.
//! 2. Frames of "available" memory-map regions are freed, clamped to the
//!    tracked range, except the frames holding the bitmap itself.
//! 3. Frames `0 .. max(ceil(kernel_end / 4096), low_reserved_floor / 4096)`
//!    are marked used again (low memory and the kernel image).
//! 4. The free counter is recomputed from the bitmap; the cursor is reset.

use core::fmt;
use core::ops::Range;
use kernel_info::memory::{MemoryLayout, PAGE_SIZE};
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K};
use kernel_multiboot::MemoryRegion;
use kernel_vmem::FrameAlloc;
use log::{debug, info, warn};

/// Configuration of a [`BitmapFrameAlloc`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct PmmConfig {
    /// Exclusive upper bound of the tracked physical range.
    pub max_memory_size: u64,
    /// Physical address of the bitmap storage; its frames are never handed out.
    pub frame_bitmap_base: PhysicalAddress,
    /// Frames below this address are always reserved.
    pub low_reserved_floor: u64,
}

impl PmmConfig {
    pub const DEFAULT: Self = Self::from_layout(&MemoryLayout::DEFAULT);

    #[must_use]
    pub const fn from_layout(layout: &MemoryLayout) -> Self {
        Self {
            max_memory_size: layout.max_memory_size,
            frame_bitmap_base: layout.frame_bitmap_base,
            low_reserved_floor: layout.low_reserved_floor,
        }
    }

    /// Number of tracked frames.
    #[must_use]
    pub const fn frames_count(&self) -> u64 {
        self.max_memory_size / PAGE_SIZE
    }

    /// Bitmap bytes needed for [`frames_count`](Self::frames_count) frames.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn bitmap_bytes(&self) -> usize {
        self.frames_count().div_ceil(8) as usize
    }

    /// Frames occupied by the bitmap storage.
    #[must_use]
    pub const fn bitmap_frames(&self) -> Range<u64> {
        let start = self.frame_bitmap_base.as_u64() / PAGE_SIZE;
        let end = (self.frame_bitmap_base.as_u64() + self.bitmap_bytes() as u64).div_ceil(PAGE_SIZE);
        start..end
    }
}

impl Default for PmmConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// The physical memory manager.
///
/// Borrows its bitmap storage so the same code runs over the fixed physical
/// bitmap at boot and over a plain buffer in tests.
pub struct BitmapFrameAlloc<'b> {
    bitmap: &'b mut [u8],
    frames: u64,
    free: u64,
    next_free: u64,
    reserved_bitmap: Range<u64>,
    reserved_low: u64,
}

impl<'b> BitmapFrameAlloc<'b> {
    /// Build the allocator state from a memory map.
    ///
    /// `bitmap` should hold [`PmmConfig::bitmap_bytes`] bytes; a shorter
    /// buffer shrinks the tracked range to what it can describe. An empty
    /// memory map yields an allocator without free frames.
    pub fn init<I>(
        bitmap: &'b mut [u8],
        config: PmmConfig,
        regions: I,
        kernel_physical_end: PhysicalAddress,
    ) -> Self
    where
        I: IntoIterator<Item = MemoryRegion>,
    {
        let capacity = (bitmap.len() as u64).saturating_mul(8);
        let frames = config.frames_count().min(capacity);
        if frames < config.frames_count() {
            warn!(
                "Frame bitmap holds {} bytes, tracking {frames} of {} frames",
                bitmap.len(),
                config.frames_count()
            );
        }

        let mut pmm = Self {
            bitmap,
            frames,
            free: 0,
            next_free: 0,
            reserved_bitmap: config.bitmap_frames(),
            reserved_low: 0,
        };

        pmm.bitmap.fill(0xFF);

        for region in regions {
            if !region.kind.is_available() {
                debug!(
                    "Skipping {:?} region {}..{:#x}",
                    region.kind,
                    region.base,
                    region.end()
                );
                continue;
            }

            info!("Available region {}..{:#x}", region.base, region.end());
            let start = region.base.as_u64() / PAGE_SIZE;
            let end = (region.end() / PAGE_SIZE).min(pmm.frames);
            for frame in start..end {
                if !pmm.reserved_bitmap.contains(&frame) {
                    pmm.clear(frame);
                }
            }
        }

        let reserved = kernel_physical_end
            .as_u64()
            .div_ceil(PAGE_SIZE)
            .max(config.low_reserved_floor.div_ceil(PAGE_SIZE))
            .min(pmm.frames);
        for frame in 0..reserved {
            pmm.set(frame);
        }
        pmm.reserved_low = reserved;

        pmm.free = pmm.count_free();
        pmm.next_free = 0;
        info!(
            "Physical memory: {} of {} frames free ({} KiB), frames below {reserved} reserved",
            pmm.free,
            pmm.frames,
            pmm.free * (PAGE_SIZE / 1024)
        );
        pmm
    }

    #[inline]
    #[allow(clippy::cast_possible_truncation)]
    const fn locate(frame: u64) -> (usize, u8) {
        ((frame / 8) as usize, 1 << (frame % 8))
    }

    #[inline]
    fn test(&self, frame: u64) -> bool {
        let (byte, mask) = Self::locate(frame);
        self.bitmap[byte] & mask != 0
    }

    #[inline]
    fn set(&mut self, frame: u64) {
        let (byte, mask) = Self::locate(frame);
        self.bitmap[byte] |= mask;
    }

    #[inline]
    fn clear(&mut self, frame: u64) {
        let (byte, mask) = Self::locate(frame);
        self.bitmap[byte] &= !mask;
    }

    fn count_free(&self) -> u64 {
        let full_bytes = usize::try_from(self.frames / 8).unwrap_or(usize::MAX);
        let whole: u64 = self.bitmap[..full_bytes]
            .iter()
            .map(|b| u64::from(b.count_zeros()))
            .sum();
        let tail = (self.frames & !7..self.frames)
            .filter(|&f| !self.test(f))
            .count() as u64;
        whole + tail
    }

    /// First free frame in `range`, skipping fully used bytes.
    fn find_free(&self, range: Range<u64>) -> Option<u64> {
        let mut frame = range.start;
        while frame < range.end {
            if frame.is_multiple_of(8) && frame + 8 <= range.end {
                let (byte, _) = Self::locate(frame);
                if self.bitmap[byte] == 0xFF {
                    frame += 8;
                    continue;
                }
            }
            if !self.test(frame) {
                return Some(frame);
            }
            frame += 1;
        }
        None
    }

    /// Allocate one frame, `None` when no frame is free.
    pub fn alloc_frame(&mut self) -> Option<PhysicalPage<Size4K>> {
        self.alloc_before(self.frames)
    }

    /// Allocate one frame lying entirely below `limit`.
    ///
    /// `None` when every frame below `limit` is used, even if frames above it are free.
    pub fn alloc_frame_below(&mut self, limit: PhysicalAddress) -> Option<PhysicalPage<Size4K>> {
        self.alloc_before((limit.as_u64() / PAGE_SIZE).min(self.frames))
    }

    /// First free frame below frame `end`, searching from the cursor and wrapping once.
    fn alloc_before(&mut self, end: u64) -> Option<PhysicalPage<Size4K>> {
        if self.free == 0 {
            return None;
        }

        let start = self.next_free.min(end);
        let frame = self
            .find_free(start..end)
            .or_else(|| self.find_free(0..start))?;

        self.set(frame);
        self.free -= 1;
        self.next_free = frame + 1;
        Some(PhysicalPage::from_frame_index(frame))
    }

    /// Return a frame.
    ///
    /// Out-of-range and already free frames are ignored, and so are the
    /// frames reserved at [`init`](Self::init) for low memory, the kernel
    /// image and the bitmap itself.
    pub fn free_frame(&mut self, page: PhysicalPage<Size4K>) {
        let frame = page.frame_index();
        if frame >= self.frames {
            debug!("Ignoring free of untracked frame {page}");
            return;
        }
        if frame < self.reserved_low || self.reserved_bitmap.contains(&frame) {
            debug!("Ignoring free of reserved frame {page}");
            return;
        }
        if !self.test(frame) {
            debug!("Ignoring double free of frame {page}");
            return;
        }

        self.clear(frame);
        self.free += 1;
        if frame < self.next_free {
            self.next_free = frame;
        }
    }

    /// Number of free frames.
    #[inline]
    #[must_use]
    pub const fn free_frames(&self) -> u64 {
        self.free
    }

    /// Number of tracked frames.
    #[inline]
    #[must_use]
    pub const fn total_frames(&self) -> u64 {
        self.frames
    }

    /// Whether `page` is unavailable; frames outside the tracked range always are.
    #[must_use]
    pub fn is_frame_used(&self, page: PhysicalPage<Size4K>) -> bool {
        let frame = page.frame_index();
        frame >= self.frames || self.test(frame)
    }

    /// Mark every frame overlapping `[start, end)` used (boot modules, firmware tables).
    ///
    /// Returns the number of frames that were free before.
    pub fn reserve_range(&mut self, start: PhysicalAddress, end: PhysicalAddress) -> u64 {
        let first = start.as_u64() / PAGE_SIZE;
        let last = end.as_u64().div_ceil(PAGE_SIZE).min(self.frames);
        let mut taken = 0;
        for frame in first..last {
            if !self.test(frame) {
                self.set(frame);
                taken += 1;
            }
        }
        self.free -= taken;
        debug!("Reserved {start}..{end}, {taken} frames were free");
        taken
    }

    /// Frames holding the bitmap storage.
    #[must_use]
    pub fn bitmap_frames(&self) -> Range<u64> {
        self.reserved_bitmap.clone()
    }
}

impl FrameAlloc for BitmapFrameAlloc<'_> {
    #[inline]
    fn alloc_4k(&mut self) -> Option<PhysicalPage<Size4K>> {
        self.alloc_frame()
    }

    #[inline]
    fn alloc_4k_below(&mut self, limit: PhysicalAddress) -> Option<PhysicalPage<Size4K>> {
        self.alloc_frame_below(limit)
    }

    #[inline]
    fn free_4k(&mut self, frame: PhysicalPage<Size4K>) {
        self.free_frame(frame);
    }

    #[inline]
    fn is_allocated(&self, frame: PhysicalPage<Size4K>) -> bool {
        self.is_frame_used(frame)
    }
}

impl fmt::Debug for BitmapFrameAlloc<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BitmapFrameAlloc")
            .field("frames", &self.frames)
            .field("free", &self.free)
            .field("next_free", &self.next_free)
            .field("bitmap_frames", &self.reserved_bitmap)
            .field("reserved_low", &self.reserved_low)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_multiboot::MemoryRegionKind;
    use std::collections::HashSet;

    const MIB: u64 = 1024 * 1024;

    /// 64 MiB tracked, bitmap at 16 MiB.
    const SMALL: PmmConfig = PmmConfig {
        max_memory_size: 64 * MIB,
        frame_bitmap_base: PhysicalAddress::new(0x100_0000),
        low_reserved_floor: 2 * MIB,
    };

    fn available(base: u64, len: u64) -> MemoryRegion {
        MemoryRegion::new(base, len, MemoryRegionKind::Available)
    }

    fn bitmap(config: &PmmConfig) -> Vec<u8> {
        vec![0u8; config.bitmap_bytes()]
    }

    #[test]
    fn default_config_tracks_four_gib_with_a_128k_bitmap() {
        let c = PmmConfig::DEFAULT;
        assert_eq!(c.frames_count(), 1 << 20);
        assert_eq!(c.bitmap_bytes(), 128 * 1024);
        assert_eq!(c.bitmap_frames(), 4096..4128);
    }

    #[test]
    fn scenario_single_region_with_kernel_ending_at_3mib() {
        let config = PmmConfig::DEFAULT;
        let mut storage = bitmap(&config);
        let pmm = BitmapFrameAlloc::init(
            &mut storage,
            config,
            [available(0x10_0000, 0x200_0000 - 0x10_0000)],
            PhysicalAddress::new(0x30_0000),
        );

        // ceil(3 MiB / 4 KiB) = 768 is above the 512-frame floor.
        for frame in [0, 256, 511, 512, 767] {
            assert!(pmm.is_frame_used(PhysicalPage::from_frame_index(frame)), "{frame}");
        }
        assert!(!pmm.is_frame_used(PhysicalPage::from_frame_index(768)));
        assert!(!pmm.is_frame_used(PhysicalPage::from_frame_index(0x1fff)));
        assert!(pmm.is_frame_used(PhysicalPage::from_frame_index(0x2000)));

        // Bitmap frames 4096..4128 lie inside the region and stay used.
        assert!(pmm.is_frame_used(PhysicalPage::from_frame_index(4096)));
        assert!(pmm.is_frame_used(PhysicalPage::from_frame_index(4127)));
        assert!(!pmm.is_frame_used(PhysicalPage::from_frame_index(4128)));

        assert_eq!(pmm.free_frames(), (0x2000 - 768) - 32);
    }

    #[test]
    fn small_kernel_is_rounded_up_to_the_floor() {
        let mut storage = bitmap(&SMALL);
        let pmm = BitmapFrameAlloc::init(
            &mut storage,
            SMALL,
            [available(0, 8 * MIB)],
            PhysicalAddress::new(0x10_0001),
        );
        assert!(pmm.is_frame_used(PhysicalPage::from_frame_index(511)));
        assert!(!pmm.is_frame_used(PhysicalPage::from_frame_index(512)));
        assert_eq!(pmm.free_frames(), 2048 - 512);
    }

    #[test]
    fn floor_is_configurable() {
        let config = PmmConfig {
            low_reserved_floor: 0x1000,
            ..SMALL
        };
        let mut storage = bitmap(&config);
        let pmm = BitmapFrameAlloc::init(&mut storage, config, [available(0, MIB)], PhysicalAddress::zero());
        assert!(pmm.is_frame_used(PhysicalPage::from_frame_index(0)));
        assert_eq!(pmm.free_frames(), 255);
    }

    #[test]
    fn conservation_counts_only_available_minus_reservations() {
        let regions = [
            available(0, 0x9_fc00),
            MemoryRegion::new(0x9_fc00, 0x400, MemoryRegionKind::Reserved),
            MemoryRegion::new(0xf_0000, 0x1_0000, MemoryRegionKind::Reserved),
            available(0x10_0000, 0x1ff_0000),
            MemoryRegion::new(0x300_0000, 0x10_0000, MemoryRegionKind::AcpiReclaimable),
            available(0x310_0000, 0x10_0000),
            MemoryRegion::new(0x320_0000, 0x10_0000, MemoryRegionKind::BadMemory),
        ];
        let mut storage = bitmap(&SMALL);
        let pmm = BitmapFrameAlloc::init(&mut storage, SMALL, regions, PhysicalAddress::new(0x28_0000));

        // Frames below 32 MiB, minus those below 2.5 MiB (which swallow the
        // low region and the hole under 1 MiB), minus the bitmap frame.
        let second = (0x10_0000 + 0x1ff_0000) / PAGE_SIZE - 640 - 1;
        let third = 0x10_0000 / PAGE_SIZE;
        assert_eq!(pmm.free_frames(), second + third);
        assert_eq!(pmm.free_frames(), pmm.count_free());
    }

    #[test]
    fn regions_beyond_the_tracked_range_are_clamped() {
        let mut storage = bitmap(&SMALL);
        let pmm = BitmapFrameAlloc::init(
            &mut storage,
            SMALL,
            [available(60 * MIB, 1 << 40), available(1 << 41, MIB)],
            PhysicalAddress::zero(),
        );
        assert_eq!(pmm.free_frames(), 4 * MIB / PAGE_SIZE);
        assert!(pmm.is_frame_used(PhysicalPage::from_frame_index(1 << 30)));
    }

    #[test]
    fn missing_map_leaves_nothing_free() {
        let mut storage = bitmap(&SMALL);
        let mut pmm = BitmapFrameAlloc::init(&mut storage, SMALL, [], PhysicalAddress::zero());
        assert_eq!(pmm.free_frames(), 0);
        assert_eq!(pmm.alloc_frame(), None);
    }

    #[test]
    fn short_bitmap_shrinks_the_tracked_range() {
        let mut storage = vec![0u8; 64];
        let pmm = BitmapFrameAlloc::init(&mut storage, SMALL, [available(0, 64 * MIB)], PhysicalAddress::zero());
        assert_eq!(pmm.total_frames(), 512);
        assert_eq!(pmm.free_frames(), 0);
    }

    #[test]
    fn allocations_are_exclusive_across_interleaved_frees() {
        let mut storage = bitmap(&SMALL);
        let mut pmm = BitmapFrameAlloc::init(&mut storage, SMALL, [available(0, 8 * MIB)], PhysicalAddress::zero());

        let mut live = HashSet::new();
        for round in 0..2000u64 {
            if round % 3 == 2 {
                let victim = *live.iter().next().unwrap();
                live.remove(&victim);
                pmm.free_frame(victim);
            } else {
                let frame = pmm.alloc_frame().unwrap();
                assert!(frame.frame_index() >= 512);
                assert!(live.insert(frame), "{frame} handed out twice");
            }
            assert_eq!(pmm.free_frames(), 1536 - live.len() as u64);
        }
    }

    #[test]
    fn alloc_free_alloc_round_trip() {
        let mut storage = bitmap(&SMALL);
        let mut pmm = BitmapFrameAlloc::init(&mut storage, SMALL, [available(0, 8 * MIB)], PhysicalAddress::zero());
        let before = pmm.free_frames();

        let a = pmm.alloc_frame().unwrap();
        assert_eq!(a.base().as_u64(), 0x20_0000);
        assert_eq!(pmm.free_frames(), before - 1);

        let b = pmm.alloc_frame().unwrap();
        pmm.free_frame(a);
        assert_eq!(pmm.free_frames(), before - 1);

        // The cursor moved back to `a`.
        assert_eq!(pmm.alloc_frame(), Some(a));
        assert_eq!(pmm.free_frames(), before - 2);
        assert_ne!(a, b);
    }

    #[test]
    fn freed_frames_are_reused_lowest_first() {
        let mut storage = bitmap(&SMALL);
        let mut pmm = BitmapFrameAlloc::init(&mut storage, SMALL, [available(0, 0x20_4000)], PhysicalAddress::zero());
        let frames: Vec<_> = (0..4).map(|_| pmm.alloc_frame().unwrap()).collect();
        assert_eq!(pmm.alloc_frame(), None);

        pmm.free_frame(frames[1]);
        pmm.free_frame(frames[3]);
        assert_eq!(pmm.alloc_frame(), Some(frames[1]));
        assert_eq!(pmm.alloc_frame(), Some(frames[3]));
    }

    #[test]
    fn exhaustion_boundary() {
        let mut storage = bitmap(&SMALL);
        let mut pmm = BitmapFrameAlloc::init(&mut storage, SMALL, [available(0, 0x21_0000)], PhysicalAddress::zero());
        assert_eq!(pmm.free_frames(), 16);

        let drained: Vec<_> = std::iter::from_fn(|| pmm.alloc_frame()).collect();
        assert_eq!(drained.len(), 16);
        assert_eq!(pmm.free_frames(), 0);
        assert_eq!(pmm.alloc_frame(), None);
        assert_eq!(pmm.free_frames(), 0);

        pmm.free_frame(drained[7]);
        assert_eq!(pmm.alloc_frame(), Some(drained[7]));
    }

    #[test]
    fn invalid_frees_are_ignored() {
        let mut storage = bitmap(&SMALL);
        let mut pmm = BitmapFrameAlloc::init(&mut storage, SMALL, [available(0, 4 * MIB)], PhysicalAddress::zero());
        let before = pmm.free_frames();

        pmm.free_frame(PhysicalPage::from_frame_index(600));
        pmm.free_frame(PhysicalPage::from_frame_index(1 << 30));
        assert_eq!(pmm.free_frames(), before);

        let a = pmm.alloc_frame().unwrap();
        pmm.free_frame(a);
        pmm.free_frame(a);
        assert_eq!(pmm.free_frames(), before);
    }

    #[test]
    fn reserve_range_keeps_the_counter_exact() {
        let mut storage = bitmap(&SMALL);
        let mut pmm = BitmapFrameAlloc::init(&mut storage, SMALL, [available(0, 4 * MIB)], PhysicalAddress::zero());
        let before = pmm.free_frames();

        let taken = pmm.reserve_range(PhysicalAddress::new(0x1f_f800), PhysicalAddress::new(0x20_2001));
        assert_eq!(taken, 3);
        assert_eq!(pmm.free_frames(), before - 3);
        assert_eq!(pmm.reserve_range(PhysicalAddress::new(0x20_0000), PhysicalAddress::new(0x20_3000)), 0);
        assert_eq!(pmm.alloc_frame().unwrap().frame_index(), 0x203);
    }

    #[test]
    fn reserved_frames_survive_a_stray_free() {
        let config = PmmConfig::DEFAULT;
        let mut storage = bitmap(&config);
        let mut pmm = BitmapFrameAlloc::init(
            &mut storage,
            config,
            [available(0x10_0000, 0x200_0000 - 0x10_0000)],
            PhysicalAddress::new(0x30_0000),
        );
        assert_eq!(pmm.free_frames(), 7392);

        // Bitmap storage, kernel image, low memory.
        for frame in [4096, 4127, 300, 767, 0] {
            pmm.free_frame(PhysicalPage::from_frame_index(frame));
        }
        assert_eq!(pmm.free_frames(), 7392);

        let drained: Vec<_> = std::iter::from_fn(|| pmm.alloc_frame()).collect();
        assert_eq!(drained.len(), 7392);
        assert!(drained.iter().all(|f| f.frame_index() >= 768));
        assert!(!drained.iter().any(|f| pmm.bitmap_frames().contains(&f.frame_index())));
    }

    #[test]
    fn bounded_allocation_stays_below_the_limit() {
        let mut storage = bitmap(&SMALL);
        let mut pmm = BitmapFrameAlloc::init(&mut storage, SMALL, [available(0, 8 * MIB)], PhysicalAddress::zero());
        let limit = PhysicalAddress::new(0x20_3000);

        let below: Vec<_> = std::iter::from_fn(|| pmm.alloc_frame_below(limit)).collect();
        assert_eq!(below.iter().map(|f| f.frame_index()).collect::<Vec<_>>(), [0x200, 0x201, 0x202]);
        assert_eq!(pmm.alloc_frame_below(limit), None);

        // Unbounded allocation still finds memory above the limit.
        assert_eq!(pmm.alloc_frame().map(PhysicalPage::frame_index), Some(0x203));

        // Frames freed below the limit are handed out again.
        pmm.free_frame(below[1]);
        assert_eq!(pmm.alloc_frame_below(limit), Some(below[1]));
    }
}

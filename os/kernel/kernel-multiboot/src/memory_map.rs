use crate::{MultibootError, read_u32, read_u64};
use kernel_memory_addresses::PhysicalAddress;

/// `entry_size` + `entry_version` preceding the entries.
const MEMORY_MAP_HEADER_SIZE: usize = 8;

/// `base` + `length` + `type` + `reserved`.
pub const MIN_ENTRY_SIZE: u32 = 24;

/// The type of a memory-map region as reported by the firmware.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum MemoryRegionKind {
    /// Usable RAM (type 1).
    Available,
    /// Reserved by firmware or hardware (type 2).
    Reserved,
    /// ACPI tables, reusable once they have been read (type 3).
    AcpiReclaimable,
    /// ACPI non-volatile storage, must be preserved across sleep (type 4).
    AcpiNvs,
    /// Defective RAM (type 5).
    BadMemory,
    /// Any other value. Treated like [`Reserved`](Self::Reserved).
    Unknown(u32),
}

impl MemoryRegionKind {
    #[inline]
    #[must_use]
    pub const fn is_available(self) -> bool {
        matches!(self, Self::Available)
    }
}

impl From<u32> for MemoryRegionKind {
    fn from(value: u32) -> Self {
        match value {
            1 => Self::Available,
            2 => Self::Reserved,
            3 => Self::AcpiReclaimable,
            4 => Self::AcpiNvs,
            5 => Self::BadMemory,
            other => Self::Unknown(other),
        }
    }
}

impl From<MemoryRegionKind> for u32 {
    fn from(value: MemoryRegionKind) -> Self {
        match value {
            MemoryRegionKind::Available => 1,
            MemoryRegionKind::Reserved => 2,
            MemoryRegionKind::AcpiReclaimable => 3,
            MemoryRegionKind::AcpiNvs => 4,
            MemoryRegionKind::BadMemory => 5,
            MemoryRegionKind::Unknown(other) => other,
        }
    }
}

/// A physical range reported by the memory map.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct MemoryRegion {
    pub base: PhysicalAddress,
    pub length: u64,
    pub kind: MemoryRegionKind,
}

impl MemoryRegion {
    #[must_use]
    pub const fn new(base: u64, length: u64, kind: MemoryRegionKind) -> Self {
        Self {
            base: PhysicalAddress::new(base),
            length,
            kind,
        }
    }

    /// Exclusive end of the region, saturated at `u64::MAX`.
    #[inline]
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.base.as_u64().saturating_add(self.length)
    }
}

/// The memory-map tag (type 6).
#[derive(Debug, Copy, Clone)]
pub struct MemoryMap<'a> {
    entry_size: u32,
    entry_version: u32,
    entries: &'a [u8],
}

impl<'a> MemoryMap<'a> {
    /// Parse the payload of a memory-map tag (everything after `type`/`size`).
    ///
    /// # Errors
    /// [`MultibootError::MemoryMapTruncated`] if the payload cannot hold the
    /// `entry_size`/`entry_version` header, [`MultibootError::EntrySizeTooSmall`]
    /// if an entry could not hold the fields read from it.
    pub fn from_payload(payload: &'a [u8]) -> Result<Self, MultibootError> {
        let (Some(entry_size), Some(entry_version)) = (read_u32(payload, 0), read_u32(payload, 4))
        else {
            return Err(MultibootError::MemoryMapTruncated(payload.len()));
        };
        if entry_size < MIN_ENTRY_SIZE {
            return Err(MultibootError::EntrySizeTooSmall(entry_size));
        }

        Ok(Self {
            entry_size,
            entry_version,
            entries: &payload[MEMORY_MAP_HEADER_SIZE..],
        })
    }

    #[inline]
    #[must_use]
    pub const fn entry_size(&self) -> u32 {
        self.entry_size
    }

    #[inline]
    #[must_use]
    pub const fn entry_version(&self) -> u32 {
        self.entry_version
    }

    /// Number of complete entries. A trailing partial entry is ignored.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.entries.len() / self.entry_size as usize
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub const fn regions(&self) -> MemoryRegions<'a> {
        MemoryRegions {
            entries: self.entries,
            entry_size: self.entry_size as usize,
            index: 0,
            count: self.len(),
        }
    }
}

impl<'a> IntoIterator for MemoryMap<'a> {
    type Item = MemoryRegion;
    type IntoIter = MemoryRegions<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.regions()
    }
}

/// Iterator over the entries of a [`MemoryMap`].
#[derive(Debug, Clone)]
pub struct MemoryRegions<'a> {
    entries: &'a [u8],
    entry_size: usize,
    index: usize,
    count: usize,
}

impl Iterator for MemoryRegions<'_> {
    type Item = MemoryRegion;

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.count {
            return None;
        }
        let at = self.index * self.entry_size;
        self.index += 1;

        let base = read_u64(self.entries, at)?;
        let length = read_u64(self.entries, at + 8)?;
        let kind = read_u32(self.entries, at + 16)?;
        Some(MemoryRegion::new(base, length, kind.into()))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.count - self.index;
        (left, Some(left))
    }
}

impl ExactSizeIterator for MemoryRegions<'_> {}

//! # Multiboot2 Boot Information
//!
//! Read-only parsing of the boot information structure a multiboot2-compliant
//! loader (GRUB, QEMU `-kernel`) leaves in memory and passes in `EBX`. The
//! memory bring-up only needs the memory-map tag, but the tag list is exposed
//! as a whole.
//!
//! ## Layout
//!
//! ```text
//! offset  size  field
//! 0       4     total_size   (bytes, including this header)
//! 4       4     reserved
//! 8       ...   tags, each 8-byte aligned:
//!
//!               ┌──────────┬──────────┬─────────────────────┐
//!               │ type u32 │ size u32 │ payload (size - 8)  │  padding to 8
//!               └──────────┴──────────┴─────────────────────┘
//!
//!               a tag with type 0 (size 8) terminates the list
//! ```
//!
//! Tag 6 is the memory map:
//!
//! ```text
//! entry_size u32, entry_version u32, then (size - 16) / entry_size entries:
//! base u64, length u64, type u32, reserved u32
//! ```
//!
//! ## Validation
//!
//! Everything here comes from the boot loader and is treated as untrusted.
//! The parser never reads outside `total_size` and rejects structurally
//! impossible input with a [`MultibootError`]:
//!
//! * a buffer shorter than the 8-byte header,
//! * a `total_size` smaller than the header or larger than the buffer,
//! * a tag whose header or declared size runs past `total_size`,
//! * a memory map with `entry_size` smaller than 24 bytes.
//!
//! A rejected structure is for the caller to interpret; the memory bring-up
//! treats it as "no available memory".
//!
//! ## Usage
//!
//! ```rust
//! use kernel_multiboot::{BootInformation, MemoryRegionKind};
//!
//! # let image = {
//! #     let mut v = Vec::new();
//! #     v.extend_from_slice(&16u32.to_le_bytes());
//! #     v.extend_from_slice(&0u32.to_le_bytes());
//! #     v.extend_from_slice(&0u32.to_le_bytes());
//! #     v.extend_from_slice(&8u32.to_le_bytes());
//! #     v
//! # };
//! let info = BootInformation::from_bytes(&image)?;
//! let available: u64 = info
//!     .memory_map()?
//!     .into_iter()
//!     .flat_map(|map| map.regions())
//!     .filter(|r| r.kind == MemoryRegionKind::Available)
//!     .map(|r| r.length)
//!     .sum();
//! assert_eq!(available, 0);
//! # Ok::<(), kernel_multiboot::MultibootError>(())
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod memory_map;
mod tag;

pub use crate::memory_map::{MemoryMap, MemoryRegion, MemoryRegionKind, MemoryRegions};
pub use crate::tag::{Tag, TagType, Tags};

use kernel_memory_addresses::PhysicalAddress;

/// Magic value a multiboot2-compliant loader leaves in `EAX`.
pub const BOOTLOADER_MAGIC: u32 = 0x36d7_6289;

/// Size of the fixed `total_size`/`reserved` header.
pub const HEADER_SIZE: usize = 8;

/// Tags start on 8-byte boundaries.
pub const TAG_ALIGN: usize = 8;

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum MultibootError {
    #[error("loader magic {0:#010x} is not the multiboot2 magic")]
    BadMagic(u32),
    #[error("boot information pointer is null")]
    NullPointer,
    #[error("boot information truncated: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },
    #[error("total_size {0} is smaller than the boot information header")]
    SizeTooSmall(u32),
    #[error("tag at offset {offset:#x} runs past the end of the boot information")]
    TagPastEnd { offset: usize },
    #[error("tag at offset {offset:#x} declares size {size}, smaller than its header")]
    TagTooSmall { offset: usize, size: u32 },
    #[error("memory map payload of {0} bytes is shorter than its header")]
    MemoryMapTruncated(usize),
    #[error("memory map entry size {0} is smaller than 24 bytes")]
    EntrySizeTooSmall(u32),
}

/// A validated view of the multiboot2 boot information structure.
#[derive(Debug, Copy, Clone)]
pub struct BootInformation<'a> {
    bytes: &'a [u8],
}

impl<'a> BootInformation<'a> {
    /// Validate the header and bound the view to `total_size` bytes.
    ///
    /// # Errors
    /// [`MultibootError::Truncated`] if `bytes` is shorter than the header or
    /// than the declared `total_size`, [`MultibootError::SizeTooSmall`] if the
    /// declared size cannot even hold the header.
    pub fn from_bytes(bytes: &'a [u8]) -> Result<Self, MultibootError> {
        let total = read_u32(bytes, 0).ok_or(MultibootError::Truncated {
            needed: HEADER_SIZE,
            available: bytes.len(),
        })?;
        if bytes.len() < HEADER_SIZE {
            return Err(MultibootError::Truncated {
                needed: HEADER_SIZE,
                available: bytes.len(),
            });
        }

        let total_size = total as usize;
        if total_size < HEADER_SIZE {
            return Err(MultibootError::SizeTooSmall(total));
        }
        if total_size > bytes.len() {
            return Err(MultibootError::Truncated {
                needed: total_size,
                available: bytes.len(),
            });
        }

        Ok(Self {
            bytes: &bytes[..total_size],
        })
    }

    /// View the boot information the loader placed at physical address `addr`.
    ///
    /// # Errors
    /// As [`from_bytes`](Self::from_bytes), plus [`MultibootError::NullPointer`].
    ///
    /// # Safety
    /// `addr` must be readable through the current mapping (identity-mapped at
    /// boot) for its full `total_size`, and must stay untouched for `'static`.
    /// In particular no frame covering it may be handed out by the frame
    /// allocator while the view is alive.
    pub unsafe fn from_addr(addr: PhysicalAddress) -> Result<BootInformation<'static>, MultibootError> {
        if addr.as_u64() == 0 {
            return Err(MultibootError::NullPointer);
        }

        let ptr = addr.as_u64() as *const u8;
        // SAFETY: the caller guarantees the header is readable.
        let total = unsafe { core::ptr::read_unaligned(ptr.cast::<u32>()) };
        let len = (total as usize).max(HEADER_SIZE);

        // SAFETY: the caller guarantees `total_size` bytes are readable and immutable.
        let bytes = unsafe { core::slice::from_raw_parts(ptr, len) };
        BootInformation::from_bytes(bytes)
    }

    /// View the boot information handed over by the loader, after checking
    /// the `EAX` magic it left behind.
    ///
    /// # Errors
    /// [`MultibootError::BadMagic`] when `magic` is not [`BOOTLOADER_MAGIC`];
    /// `addr` is not touched then. Otherwise as [`from_addr`](Self::from_addr).
    ///
    /// # Safety
    /// As [`from_addr`](Self::from_addr).
    pub unsafe fn from_loader(
        magic: u32,
        addr: PhysicalAddress,
    ) -> Result<BootInformation<'static>, MultibootError> {
        if magic != BOOTLOADER_MAGIC {
            return Err(MultibootError::BadMagic(magic));
        }
        // SAFETY: forwarded to the caller.
        unsafe { BootInformation::from_addr(addr) }
    }

    /// The declared `total_size`.
    #[inline]
    #[must_use]
    pub const fn total_size(&self) -> usize {
        self.bytes.len()
    }

    /// The raw bytes covered by `total_size`.
    #[inline]
    #[must_use]
    pub const fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Iterate over the tags up to (excluding) the end tag.
    #[must_use]
    pub fn tags(&self) -> Tags<'a> {
        Tags::new(self.bytes)
    }

    /// First tag of the given type, if any.
    ///
    /// # Errors
    /// Any structural error met while walking to it.
    pub fn find_tag(&self, ty: TagType) -> Result<Option<Tag<'a>>, MultibootError> {
        for tag in self.tags() {
            let tag = tag?;
            if tag.ty() == ty {
                return Ok(Some(tag));
            }
        }
        Ok(None)
    }

    /// The memory-map tag, if the loader provided one.
    ///
    /// # Errors
    /// Any structural error in the tag list or in the memory-map header.
    pub fn memory_map(&self) -> Result<Option<MemoryMap<'a>>, MultibootError> {
        match self.find_tag(TagType::MEMORY_MAP)? {
            Some(tag) => MemoryMap::from_payload(tag.payload()).map(Some),
            None => Ok(None),
        }
    }
}

#[inline]
pub(crate) fn read_u32(bytes: &[u8], offset: usize) -> Option<u32> {
    let raw = bytes.get(offset..offset.checked_add(4)?)?;
    Some(u32::from_le_bytes(raw.try_into().ok()?))
}

#[inline]
pub(crate) fn read_u64(bytes: &[u8], offset: usize) -> Option<u64> {
    let raw = bytes.get(offset..offset.checked_add(8)?)?;
    Some(u64::from_le_bytes(raw.try_into().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loader_magic_is_checked_before_the_pointer() {
        let bogus = PhysicalAddress::new(0xdead_0000);
        let err = unsafe { BootInformation::from_loader(0x2bad_b002, bogus) }.unwrap_err();
        assert_eq!(err, MultibootError::BadMagic(0x2bad_b002));

        let err = unsafe { BootInformation::from_loader(BOOTLOADER_MAGIC, PhysicalAddress::zero()) }
            .unwrap_err();
        assert_eq!(err, MultibootError::NullPointer);
    }

    #[test]
    fn loader_handoff_reads_the_structure_in_place() {
        let mut bytes = vec![0u64; 2];
        bytes[0] = 16;
        bytes[1] = 8 << 32;
        let addr = PhysicalAddress::new(bytes.as_ptr() as u64);

        let info = unsafe { BootInformation::from_loader(BOOTLOADER_MAGIC, addr) }.unwrap();
        assert_eq!(info.total_size(), 16);
        assert_eq!(info.tags().count(), 0);
    }

    #[test]
    fn header_must_fit() {
        assert_eq!(
            BootInformation::from_bytes(&[0u8; 4]).unwrap_err(),
            MultibootError::Truncated {
                needed: 8,
                available: 4
            }
        );
    }

    #[test]
    fn total_size_smaller_than_header() {
        let mut bytes = [0u8; 8];
        bytes[..4].copy_from_slice(&4u32.to_le_bytes());
        assert_eq!(
            BootInformation::from_bytes(&bytes).unwrap_err(),
            MultibootError::SizeTooSmall(4)
        );
    }

    #[test]
    fn view_is_bounded_by_total_size() {
        let mut bytes = [0u8; 32];
        bytes[..4].copy_from_slice(&16u32.to_le_bytes());
        bytes[12..16].copy_from_slice(&8u32.to_le_bytes());
        let info = BootInformation::from_bytes(&bytes).unwrap();
        assert_eq!(info.total_size(), 16);
        assert_eq!(info.tags().count(), 0);
    }

    #[test]
    fn little_endian_reads_reject_out_of_bounds() {
        let bytes = [1, 0, 0, 0, 2, 0, 0, 0];
        assert_eq!(read_u32(&bytes, 4), Some(2));
        assert_eq!(read_u32(&bytes, 5), None);
        assert_eq!(read_u64(&bytes, 0), Some(0x2_0000_0001));
        assert_eq!(read_u64(&bytes, usize::MAX), None);
    }
}

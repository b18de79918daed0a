use crate::{HEADER_SIZE, MultibootError, TAG_ALIGN, read_u32};
use core::fmt;

/// Size of the `type`/`size` header every tag starts with.
const TAG_HEADER_SIZE: usize = 8;

/// Multiboot2 tag type.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
#[repr(transparent)]
pub struct TagType(pub u32);

impl TagType {
    pub const END: Self = Self(0);
    pub const COMMAND_LINE: Self = Self(1);
    pub const BOOT_LOADER_NAME: Self = Self(2);
    pub const MODULE: Self = Self(3);
    pub const BASIC_MEMORY_INFO: Self = Self(4);
    pub const MEMORY_MAP: Self = Self(6);
}

impl fmt::Debug for TagType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match *self {
            Self::END => "End",
            Self::COMMAND_LINE => "CommandLine",
            Self::BOOT_LOADER_NAME => "BootLoaderName",
            Self::MODULE => "Module",
            Self::BASIC_MEMORY_INFO => "BasicMemoryInfo",
            Self::MEMORY_MAP => "MemoryMap",
            Self(other) => return write!(f, "TagType({other})"),
        };
        f.write_str(name)
    }
}

/// One tag of the boot information list.
#[derive(Debug, Copy, Clone)]
pub struct Tag<'a> {
    ty: TagType,
    offset: usize,
    payload: &'a [u8],
}

impl<'a> Tag<'a> {
    #[inline]
    #[must_use]
    pub const fn ty(&self) -> TagType {
        self.ty
    }

    /// Byte offset of the tag header from the start of the boot information.
    #[inline]
    #[must_use]
    pub const fn offset(&self) -> usize {
        self.offset
    }

    /// The tag contents after its 8-byte header, `size - 8` bytes.
    #[inline]
    #[must_use]
    pub const fn payload(&self) -> &'a [u8] {
        self.payload
    }

    /// Payload of a string tag (command line, loader name) without the NUL.
    #[must_use]
    pub fn as_str(&self) -> Option<&'a str> {
        let end = self
            .payload
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.payload.len());
        core::str::from_utf8(&self.payload[..end]).ok()
    }
}

/// Iterator over the tags of a [`BootInformation`](crate::BootInformation).
///
/// Yields `Err` once on a structural problem and then stops; stops silently
/// at the end tag or when the buffer is exhausted exactly at a tag boundary.
#[derive(Debug, Clone)]
pub struct Tags<'a> {
    bytes: &'a [u8],
    offset: usize,
    done: bool,
}

impl<'a> Tags<'a> {
    pub(crate) const fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            offset: HEADER_SIZE,
            done: false,
        }
    }

    fn fail(&mut self, err: MultibootError) -> Option<Result<Tag<'a>, MultibootError>> {
        self.done = true;
        Some(Err(err))
    }
}

impl<'a> Iterator for Tags<'a> {
    type Item = Result<Tag<'a>, MultibootError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.offset >= self.bytes.len() {
            self.done = true;
            return None;
        }

        let offset = self.offset;
        let (Some(ty), Some(size)) = (
            read_u32(self.bytes, offset),
            read_u32(self.bytes, offset + 4),
        ) else {
            return self.fail(MultibootError::TagPastEnd { offset });
        };

        let ty = TagType(ty);
        if ty == TagType::END {
            self.done = true;
            return None;
        }

        let len = size as usize;
        if len < TAG_HEADER_SIZE {
            return self.fail(MultibootError::TagTooSmall { offset, size });
        }
        let Some(end) = offset.checked_add(len).filter(|&end| end <= self.bytes.len()) else {
            return self.fail(MultibootError::TagPastEnd { offset });
        };

        self.offset = end.next_multiple_of(TAG_ALIGN);
        Some(Ok(Tag {
            ty,
            offset,
            payload: &self.bytes[offset + TAG_HEADER_SIZE..end],
        }))
    }
}

impl core::iter::FusedIterator for Tags<'_> {}

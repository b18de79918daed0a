//! # Virtual and Physical Memory Address Types
//!
//! Typed addresses for the memory manager: frames handed out by the physical
//! allocator, table frames linked into the paging hierarchy, and the virtual
//! addresses those tables translate.
//!
//! | Type | Meaning |
//! |------|---------|
//! | [`PhysicalAddress`] / [`PhysicalPage<S>`] | RAM frames, table bases, boot structures |
//! | [`VirtualAddress`] / [`VirtualPage<S>`] | addresses translated by the page tables |
//! | [`PageOffset<S>`] | the in-page bits, carried across a translation |
//!
//! Both address kinds wrap the same untyped 64-bit value, so they cannot be
//! mixed up at a call site. Pages are generic over a sealed [`PageSize`]; only
//! [`Size4K`] exists, since the kernel maps exclusively with 4 KiB leaves.
//!
//! ## Frames
//!
//! The physical allocator names a frame by its **frame index**
//! (`address / 4096`). [`PhysicalPage::frame_index`] and
//! [`PhysicalPage::from_frame_index`] convert between the two views, so the
//! bitmap never shifts raw addresses.
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let frame = PhysicalPage::<Size4K>::from_frame_index(512);
//! assert_eq!(frame.base().as_u64(), 0x20_0000);
//!
//! let va = VirtualAddress::new(0xFFFF_FFFF_8000_1234);
//! assert_eq!(frame.join(va.offset()).as_u64(), 0x20_0234);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

mod memory_address;
mod memory_page;
mod page_offset;
mod page_size;
mod physical_address;
mod physical_page;
mod virtual_address;
mod virtual_page;

use crate::memory_address::MemoryAddress;
use crate::memory_page::MemoryPage;

pub use crate::page_offset::PageOffset;
pub use crate::page_size::{PageSize, Size4K};
pub use crate::physical_address::PhysicalAddress;
pub use crate::physical_page::PhysicalPage;
pub use crate::virtual_address::VirtualAddress;
pub use crate::virtual_page::VirtualPage;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_index_and_address_agree() {
        let pa = PhysicalAddress::new(0x0030_0042);
        let frame = pa.page::<Size4K>();
        assert_eq!(frame.frame_index(), 0x300);
        assert_eq!(PhysicalPage::<Size4K>::from_frame_index(0x300), frame);
        assert_eq!(PhysicalPage::from_addr(pa), frame);
        assert_eq!(frame.base().as_u64(), 0x0030_0000);
    }

    #[test]
    fn translation_keeps_the_in_page_offset() {
        let va = VirtualAddress::new(0xFFFF_FFFF_8010_0ABC);
        let frame = PhysicalPage::<Size4K>::from_frame_index(0xB8);
        assert_eq!(va.offset::<Size4K>().as_u64(), 0xABC);
        assert_eq!(frame.join(va.offset()), PhysicalAddress::new(0xB8ABC));
    }

    #[test]
    fn virtual_pages_align_down() {
        let page = VirtualPage::<Size4K>::containing_address(VirtualAddress::new(0xFFFF_FFFF_8010_0ABC));
        assert_eq!(page.base().as_u64(), 0xFFFF_FFFF_8010_0000);
        assert_eq!(VirtualAddress::new(0x1fff).page::<Size4K>().base().as_u64(), 0x1000);
    }

    #[test]
    fn alignment_is_checked_against_the_page_size() {
        assert!(PhysicalAddress::new(0x2000).is_aligned::<Size4K>());
        assert!(!PhysicalAddress::new(0x2008).is_aligned::<Size4K>());
        assert!(PhysicalAddress::zero().is_aligned::<Size4K>());
    }

    #[test]
    fn pages_render_with_their_size() {
        let frame = PhysicalPage::<Size4K>::from_frame_index(0x203);
        assert_eq!(frame.to_string(), "0x0000000000203000/4K");
        assert_eq!(format!("{frame:?}"), "PhysicalPage<4K>(#515)");
        assert_eq!(PhysicalAddress::new(0x1000).to_string(), "0x0000000000001000");
    }
}

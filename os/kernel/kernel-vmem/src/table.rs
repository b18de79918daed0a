//! # Page Tables and Index Decomposition
//!
//! ```text
//! | 63‒48 | 47‒39 | 38‒30 | 29‒21 | 20‒12 | 11‒0   |
//! | sign  |  PML4 |  PDPT |   PD  |   PT  | Offset |
//! ```

use crate::PageTableEntry;
use core::fmt;
use kernel_memory_addresses::VirtualAddress;

/// Entries per table at every level.
pub const ENTRIES_PER_TABLE: usize = 512;

/// The four levels of the 4-level hierarchy, root first.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum PageTableLevel {
    /// Level 4, the root referenced by CR3.
    Pml4,
    /// Level 3, page-directory-pointer table.
    Pdpt,
    /// Level 2, page directory.
    Pd,
    /// Level 1, page table holding the 4 KiB leaves.
    Pt,
}

impl PageTableLevel {
    /// Position of the lowest index bit at this level.
    #[must_use]
    pub const fn shift(self) -> u32 {
        match self {
            Self::Pml4 => 39,
            Self::Pdpt => 30,
            Self::Pd => 21,
            Self::Pt => 12,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pml4 => "PML4",
            Self::Pdpt => "PDPT",
            Self::Pd => "PD",
            Self::Pt => "PT",
        }
    }

    /// The 9-bit index of `va` at this level.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn index_of(self, va: VirtualAddress) -> usize {
        ((va.as_u64() >> self.shift()) & 0x1ff) as usize
    }
}

impl fmt::Display for PageTableLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

macro_rules! level_index {
    ($(#[$meta:meta])* $name:ident, $level:expr) => {
        $(#[$meta])*
        #[repr(transparent)]
        #[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
        pub struct $name(u16);

        impl $name {
            /// Extract this level's index from a virtual address.
            #[inline]
            #[must_use]
            #[allow(clippy::cast_possible_truncation)]
            pub const fn from(va: VirtualAddress) -> Self {
                Self($level.index_of(va) as u16)
            }

            #[inline]
            #[must_use]
            pub const fn new(v: u16) -> Self {
                debug_assert!((v as usize) < ENTRIES_PER_TABLE);
                Self(v)
            }

            #[inline]
            #[must_use]
            pub const fn as_usize(self) -> usize {
                self.0 as usize
            }
        }
    };
}

level_index!(
    /// Index into the PML4 (VA bits `[47:39]`).
    L4Index,
    PageTableLevel::Pml4
);
level_index!(
    /// Index into a PDPT (VA bits `[38:30]`).
    L3Index,
    PageTableLevel::Pdpt
);
level_index!(
    /// Index into a PD (VA bits `[29:21]`).
    L2Index,
    PageTableLevel::Pd
);
level_index!(
    /// Index into a PT (VA bits `[20:12]`).
    L1Index,
    PageTableLevel::Pt
);

#[inline]
#[must_use]
pub const fn split_indices(va: VirtualAddress) -> (L4Index, L3Index, L2Index, L1Index) {
    (
        L4Index::from(va),
        L3Index::from(va),
        L2Index::from(va),
        L1Index::from(va),
    )
}

/// One 4 KiB page-table frame, any level.
#[repr(C, align(4096))]
#[derive(Clone)]
pub struct PageTable {
    entries: [PageTableEntry; ENTRIES_PER_TABLE],
}

const _: () = assert!(size_of::<PageTable>() == 4096);

impl PageTable {
    /// A table whose every entry is `entry`.
    #[must_use]
    pub const fn filled(entry: PageTableEntry) -> Self {
        Self {
            entries: [entry; ENTRIES_PER_TABLE],
        }
    }

    #[must_use]
    pub const fn zeroed() -> Self {
        Self::filled(PageTableEntry::EMPTY)
    }

    /// Clear every entry.
    #[inline]
    pub fn zero(&mut self) {
        self.entries.fill(PageTableEntry::EMPTY);
    }

    #[inline]
    #[must_use]
    pub const fn get(&self, index: usize) -> PageTableEntry {
        self.entries[index]
    }

    #[inline]
    pub const fn set(&mut self, index: usize, entry: PageTableEntry) {
        self.entries[index] = entry;
    }

    #[inline]
    #[must_use]
    pub fn entries(&self) -> &[PageTableEntry; ENTRIES_PER_TABLE] {
        &self.entries
    }

    /// Number of present entries.
    #[must_use]
    pub fn present_count(&self) -> usize {
        self.entries.iter().filter(|e| e.present()).count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(|e| e.into_bits() == 0)
    }
}

impl Default for PageTable {
    fn default() -> Self {
        Self::zeroed()
    }
}

impl fmt::Debug for PageTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (i, e) in self.entries.iter().enumerate().filter(|(_, e)| e.present()) {
            map.entry(&i, e);
        }
        map.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PageFlags;
    use kernel_memory_addresses::PhysicalAddress;

    #[test]
    fn indices_of_a_higher_half_address() {
        let va = VirtualAddress::new(0xFFFF_FFFF_8010_2000);
        let (i4, i3, i2, i1) = split_indices(va);
        assert_eq!(i4.as_usize(), 511);
        assert_eq!(i3.as_usize(), 510);
        assert_eq!(i2.as_usize(), 0);
        assert_eq!(i1.as_usize(), 0x102);
    }

    #[test]
    fn indices_of_a_low_address() {
        let (i4, i3, i2, i1) = split_indices(VirtualAddress::new(0x1000));
        assert_eq!(
            (i4.as_usize(), i3.as_usize(), i2.as_usize(), i1.as_usize()),
            (0, 0, 0, 1)
        );
        assert_eq!(PageTableLevel::Pd.index_of(VirtualAddress::new(0x0060_0000)), 3);
    }

    #[test]
    fn zeroing_clears_every_entry() {
        let mut t = PageTable::filled(PageTableEntry::from_bits(u64::MAX));
        assert_eq!(t.present_count(), ENTRIES_PER_TABLE);
        t.zero();
        assert!(t.is_empty());

        t.set(7, PageTableEntry::leaf(PhysicalAddress::new(0x9000), PageFlags::KERNEL_RW));
        assert_eq!(t.present_count(), 1);
        assert_eq!(t.get(7).frame().frame_index(), 9);
    }

    #[test]
    fn levels_display_their_names() {
        assert_eq!(PageTableLevel::Pdpt.to_string(), "PDPT");
        assert!(PageTableLevel::Pml4 < PageTableLevel::Pt);
    }
}

use bitfield_struct::bitfield;
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K};

/// Bits 12..=51 of an entry: the physical frame address.
pub const ENTRY_ADDRESS_MASK: u64 = 0x000f_ffff_ffff_f000;

bitflags::bitflags! {
    /// Permission and caching flags of a page-table entry.
    ///
    /// A leaf entry is written as `physical_address | flags`, so these are
    /// the raw hardware bit positions.
    #[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
    pub struct PageFlags: u64 {
        /// The entry is valid.
        const PRESENT       = 1 << 0;
        /// Writes are allowed (subject to `CR0.WP` in ring 0).
        const WRITABLE      = 1 << 1;
        /// Accessible from ring 3.
        const USER          = 1 << 2;
        const WRITE_THROUGH = 1 << 3;
        const CACHE_DISABLE = 1 << 4;
        /// Survives a CR3 reload when `CR4.PGE` is set.
        const GLOBAL        = 1 << 8;
        /// Instruction fetches fault (requires `EFER.NXE`).
        const NO_EXECUTE    = 1 << 63;
    }
}

impl PageFlags {
    /// Flags of every intermediate link created by a walk.
    pub const TABLE_LINK: Self = Self::PRESENT.union(Self::WRITABLE);

    /// Kernel read/write data.
    pub const KERNEL_RW: Self = Self::PRESENT.union(Self::WRITABLE);
}

/// One 64-bit x86-64 page-table entry, the same layout at every level.
///
/// | Bits  | Field             |
/// |-------|-------------------|
/// | 0     | present           |
/// | 1     | writable          |
/// | 2     | user              |
/// | 3     | write-through     |
/// | 4     | cache disable     |
/// | 5     | accessed          |
/// | 6     | dirty (leaf)      |
/// | 7     | huge page (L3/L2) |
/// | 8     | global (leaf)     |
/// | 9–11  | available to OS   |
/// | 12–51 | frame number      |
/// | 52–58 | available to OS   |
/// | 59–62 | protection key    |
/// | 63    | no-execute        |
///
/// Huge pages are never created here; `huge_page` exists so a walk can
/// notice one that somebody else installed.
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct PageTableEntry {
    pub present: bool,
    pub writable: bool,
    pub user: bool,
    pub write_through: bool,
    pub cache_disable: bool,
    pub accessed: bool,
    pub dirty: bool,
    pub huge_page: bool,
    pub global: bool,
    #[bits(3)]
    pub os_low: u8,
    #[bits(40)]
    frame_number: u64,
    #[bits(7)]
    pub os_high: u8,
    #[bits(4)]
    pub protection_key: u8,
    pub no_execute: bool,
}

impl PageTableEntry {
    /// The empty, non-present entry.
    pub const EMPTY: Self = Self::new();

    /// A link to a lower-level table, `PRESENT | WRITABLE`.
    #[inline]
    #[must_use]
    pub const fn table_link(table: PhysicalPage<Size4K>) -> Self {
        Self::leaf(table.base(), PageFlags::TABLE_LINK)
    }

    /// A leaf entry holding exactly `pa | flags`.
    ///
    /// Bits of `pa` outside the frame field are dropped.
    #[inline]
    #[must_use]
    pub const fn leaf(pa: PhysicalAddress, flags: PageFlags) -> Self {
        Self::from_bits((pa.as_u64() & ENTRY_ADDRESS_MASK) | flags.bits())
    }

    /// The frame this entry points at, present or not.
    #[inline]
    #[must_use]
    pub const fn frame(&self) -> PhysicalPage<Size4K> {
        PhysicalPage::from_frame_index(self.frame_number())
    }

    #[inline]
    #[must_use]
    pub const fn address(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.into_bits() & ENTRY_ADDRESS_MASK)
    }

    /// Permission bits understood by [`PageFlags`]; accessed/dirty and OS bits are dropped.
    #[inline]
    #[must_use]
    pub const fn flags(&self) -> PageFlags {
        PageFlags::from_bits_truncate(self.into_bits() & !ENTRY_ADDRESS_MASK)
    }

    /// The frame, if the entry is present.
    #[inline]
    #[must_use]
    pub const fn present_frame(&self) -> Option<PhysicalPage<Size4K>> {
        if self.present() {
            Some(self.frame())
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaf_is_address_or_flags() {
        let e = PageTableEntry::leaf(PhysicalAddress::new(0x2000), PageFlags::KERNEL_RW);
        assert_eq!(e.into_bits(), 0x2003);
        assert!(e.present());
        assert!(e.writable());
        assert!(!e.user());
        assert_eq!(e.frame().frame_index(), 2);
    }

    #[test]
    fn no_execute_is_bit_63() {
        let e = PageTableEntry::leaf(
            PhysicalAddress::new(0x0000_0008_0000_0000),
            PageFlags::PRESENT | PageFlags::NO_EXECUTE,
        );
        assert_eq!(e.into_bits(), 0x8000_0008_0000_0001);
        assert!(e.no_execute());
        assert_eq!(e.flags(), PageFlags::PRESENT | PageFlags::NO_EXECUTE);
        assert_eq!(e.address().as_u64(), 0x0000_0008_0000_0000);
    }

    #[test]
    fn table_link_is_present_and_writable() {
        let e = PageTableEntry::table_link(PhysicalPage::from_frame_index(0x1234));
        assert_eq!(e.into_bits(), 0x0123_4003);
        assert_eq!(e.present_frame(), Some(PhysicalPage::from_frame_index(0x1234)));
        assert_eq!(PageTableEntry::EMPTY.present_frame(), None);
    }

    #[test]
    fn flags_ignore_hardware_managed_bits() {
        let e = PageTableEntry::leaf(PhysicalAddress::new(0x5000), PageFlags::KERNEL_RW)
            .with_accessed(true)
            .with_dirty(true);
        assert_eq!(e.flags(), PageFlags::KERNEL_RW);
    }
}

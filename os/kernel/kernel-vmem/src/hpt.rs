//! # x86-64 Host Page Table (HPT)
//!
//! Four-level IA-32e paging as walked by the CPU for host execution.
//!
//! | Bits   | Field            | Meaning                                  |
//! |--------|------------------|------------------------------------------|
//! | 0      | `P`              | Present                                  |
//! | 1      | `RW`             | Writable                                 |
//! | 2      | `US`             | User accessible                          |
//! | 3      | `PWT`            | Write-through                            |
//! | 4      | `PCD`            | Cache disable                            |
//! | 5      | `A`              | Accessed                                 |
//! | 6      | `D`              | Dirty (leaf only)                        |
//! | 7      | `PS`             | Large page at levels 1 and 2             |
//! | 8      | `G`              | Global (leaf only)                       |
//! | 9      | software         | Borrowed subtree ([`PteFormat::BORROWED`]) |
//! | 12..51 | `addr`           | Frame or next table                      |
//! | 63     | `NX`             | Execute disable                          |
//!
//! The CPU has a single execute-disable bit, so [`Permissions::XU`] and
//! [`Permissions::XS`] are encoded together and decoded as a pair.

use crate::{CacheType, Memattr, Permissions, PteFormat};
use bitfield_struct::bitfield;

/// Raw HPT entry.
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct HptEntry {
    pub present: bool,
    pub writable: bool,
    pub user: bool,
    pub write_through: bool,
    pub cache_disabled: bool,
    pub accessed: bool,
    pub dirty: bool,
    pub large_page: bool,
    pub global: bool,
    /// Software-available: the entry references another tree's table.
    pub borrowed: bool,
    #[bits(2)]
    __: u8,
    /// Frame number (physical address bits `[51:12]`).
    #[bits(40)]
    pub frame: u64,
    #[bits(11)]
    __: u16,
    pub no_execute: bool,
}

/// Host page-table format marker.
#[derive(Debug, Copy, Clone)]
pub enum Hpt {}

impl PteFormat for Hpt {
    const LEVELS: u32 = 4;
    const MAX_LEAF: u32 = 2;
    const BORROWED: u64 = 1 << 9;

    fn table(pa: u64) -> u64 {
        HptEntry::new()
            .with_present(true)
            .with_writable(true)
            .with_user(true)
            .with_accessed(true)
            .with_frame(pa >> 12)
            .into_bits()
    }

    fn leaf(pa: u64, level: u32, pm: Permissions, ma: Memattr) -> u64 {
        let uncached = ma.cache == CacheType::Uncacheable;
        HptEntry::new()
            .with_present(pm.intersects(Permissions::R | Permissions::W | Permissions::XU | Permissions::XS))
            .with_writable(pm.contains(Permissions::W))
            .with_user(pm.contains(Permissions::U))
            .with_global(pm.contains(Permissions::G))
            .with_write_through(uncached)
            .with_cache_disabled(uncached)
            .with_accessed(true)
            .with_dirty(pm.contains(Permissions::W))
            .with_large_page(level > 0)
            .with_no_execute(!pm.intersects(Permissions::XU | Permissions::XS))
            .with_frame(pa >> 12)
            .into_bits()
    }

    fn is_present(raw: u64) -> bool {
        HptEntry::from_bits(raw).present()
    }

    fn is_table(raw: u64, level: u32) -> bool {
        let e = HptEntry::from_bits(raw);
        e.present() && level > 0 && !e.large_page()
    }

    fn addr(raw: u64) -> u64 {
        HptEntry::from_bits(raw).frame() << 12
    }

    fn permissions(raw: u64) -> Permissions {
        let e = HptEntry::from_bits(raw);
        let mut pm = Permissions::empty();
        if !e.present() {
            return pm;
        }
        pm |= Permissions::R;
        pm.set(Permissions::W, e.writable());
        pm.set(Permissions::U, e.user());
        pm.set(Permissions::G, e.global());
        pm.set(Permissions::XU | Permissions::XS, !e.no_execute());
        pm
    }

    fn memattr(raw: u64) -> Memattr {
        if HptEntry::from_bits(raw).cache_disabled() {
            Memattr::dev()
        } else {
            Memattr::ram()
        }
    }
}

//! # DMA Page Table (DPT)
//!
//! VT-d second-level translation walked by the IOMMU on behalf of devices.
//! Only read and write are meaningful; cacheable RAM mappings request snooping
//! so device accesses stay coherent with CPU caches.

use crate::{Memattr, Permissions, PteFormat};
use bitfield_struct::bitfield;

/// Raw DPT entry.
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct DptEntry {
    pub read: bool,
    pub write: bool,
    #[bits(5)]
    __: u8,
    pub large_page: bool,
    #[bits(3)]
    __: u8,
    pub snoop: bool,
    #[bits(40)]
    pub frame: u64,
    #[bits(12)]
    __: u16,
}

/// DMA page-table format marker.
#[derive(Debug, Copy, Clone)]
pub enum Dpt {}

impl PteFormat for Dpt {
    const LEVELS: u32 = 4;
    const MAX_LEAF: u32 = 2;

    fn table(pa: u64) -> u64 {
        DptEntry::new().with_read(true).with_write(true).with_frame(pa >> 12).into_bits()
    }

    fn leaf(pa: u64, level: u32, pm: Permissions, ma: Memattr) -> u64 {
        DptEntry::new()
            .with_read(pm.contains(Permissions::R))
            .with_write(pm.contains(Permissions::W))
            .with_large_page(level > 0)
            .with_snoop(ma.is_ram())
            .with_frame(pa >> 12)
            .into_bits()
    }

    fn is_present(raw: u64) -> bool {
        let e = DptEntry::from_bits(raw);
        e.read() || e.write()
    }

    fn is_table(raw: u64, level: u32) -> bool {
        Self::is_present(raw) && level > 0 && !DptEntry::from_bits(raw).large_page()
    }

    fn addr(raw: u64) -> u64 {
        DptEntry::from_bits(raw).frame() << 12
    }

    fn permissions(raw: u64) -> Permissions {
        let e = DptEntry::from_bits(raw);
        let mut pm = Permissions::empty();
        pm.set(Permissions::R, e.read());
        pm.set(Permissions::W, e.write());
        pm
    }

    fn memattr(raw: u64) -> Memattr {
        if DptEntry::from_bits(raw).snoop() {
            Memattr::ram()
        } else {
            Memattr::dev()
        }
    }
}

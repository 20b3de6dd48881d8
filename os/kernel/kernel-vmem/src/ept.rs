//! # Extended Page Table (EPT)
//!
//! Second-stage translation of guest-physical addresses. An entry is present
//! when any access right is granted; leaves carry the memory type directly and
//! ignore the guest's PAT.

use crate::{CacheType, Memattr, Permissions, PteFormat};
use bitfield_struct::bitfield;

/// Raw EPT entry.
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct EptEntry {
    pub read: bool,
    pub write: bool,
    /// Supervisor-mode execute (or any execute without mode-based control).
    pub exec: bool,
    #[bits(3)]
    pub memory_type: u8,
    pub ignore_pat: bool,
    pub large_page: bool,
    pub accessed: bool,
    pub dirty: bool,
    /// User-mode execute (mode-based execute control).
    pub exec_user: bool,
    #[bits(1)]
    __: u8,
    #[bits(40)]
    pub frame: u64,
    #[bits(12)]
    __: u16,
}

const MT_UC: u8 = 0;
const MT_WB: u8 = 6;

/// Extended page-table format marker.
#[derive(Debug, Copy, Clone)]
pub enum Ept {}

impl PteFormat for Ept {
    const LEVELS: u32 = 4;
    const MAX_LEAF: u32 = 2;

    fn table(pa: u64) -> u64 {
        EptEntry::new()
            .with_read(true)
            .with_write(true)
            .with_exec(true)
            .with_exec_user(true)
            .with_frame(pa >> 12)
            .into_bits()
    }

    fn leaf(pa: u64, level: u32, pm: Permissions, ma: Memattr) -> u64 {
        let mt = match ma.cache {
            CacheType::Uncacheable => MT_UC,
            CacheType::WriteBack => MT_WB,
        };
        EptEntry::new()
            .with_read(pm.contains(Permissions::R))
            .with_write(pm.contains(Permissions::W))
            .with_exec(pm.contains(Permissions::XS))
            .with_exec_user(pm.contains(Permissions::XU))
            .with_memory_type(mt)
            .with_ignore_pat(true)
            .with_large_page(level > 0)
            .with_frame(pa >> 12)
            .into_bits()
    }

    fn is_present(raw: u64) -> bool {
        let e = EptEntry::from_bits(raw);
        e.read() || e.write() || e.exec() || e.exec_user()
    }

    fn is_table(raw: u64, level: u32) -> bool {
        Self::is_present(raw) && level > 0 && !EptEntry::from_bits(raw).large_page()
    }

    fn addr(raw: u64) -> u64 {
        EptEntry::from_bits(raw).frame() << 12
    }

    fn permissions(raw: u64) -> Permissions {
        let e = EptEntry::from_bits(raw);
        let mut pm = Permissions::empty();
        pm.set(Permissions::R, e.read());
        pm.set(Permissions::W, e.write());
        pm.set(Permissions::XS, e.exec());
        pm.set(Permissions::XU, e.exec_user());
        pm
    }

    fn memattr(raw: u64) -> Memattr {
        if EptEntry::from_bits(raw).memory_type() == MT_UC {
            Memattr::dev()
        } else {
            Memattr::ram()
        }
    }
}

//! Host page-table operations beyond the generic engine: sharing subtrees of
//! the master table, temporary remap windows and pre-sized global mappings.

use crate::info::{
    MMAP_TMP_RW0E, MMAP_TMP_RW0S, MMAP_TMP_RW1E, MMAP_TMP_RW1S, PAGE_BITS, PAGE_SIZE, offs_mask, page_size,
};
use crate::ptab::ENTRIES;
use crate::{Hpt, IAddr, Memattr, OAddr, Permissions, Ptab, PteFormat, align_down, align_up, aligned_order};
use core::sync::atomic::Ordering;

/// Host page table.
pub type Hptp = Ptab<Hpt>;

/// Invalidation of the executing CPU's host TLB.
pub trait LocalTlb {
    fn invalidate_page(&self, va: IAddr);
    fn invalidate_all(&self);
}

/// One of the two per-CPU temporary mapping windows.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RemapWindow {
    Rw0,
    Rw1,
}

impl RemapWindow {
    /// Start and exclusive end of the window.
    #[must_use]
    pub const fn bounds(self) -> (IAddr, IAddr) {
        match self {
            Self::Rw0 => (MMAP_TMP_RW0S, MMAP_TMP_RW0E),
            Self::Rw1 => (MMAP_TMP_RW1S, MMAP_TMP_RW1E),
        }
    }
}

impl Ptab<Hpt> {
    /// Make the slot covering `v` reference the same subtree (or leaf) as in
    /// `src`. The slot level is the highest one at which `v` and `o` differ,
    /// so the shared region never reaches `o`.
    ///
    /// Returns `true` if the slot changed. Publishing the same value twice is
    /// a no-op, so concurrent callers converge on the source's entry.
    pub fn share_from(&self, src: &Self, v: IAddr, o: IAddr) -> bool {
        assert_ne!(v, o, "shared region must not contain its bound");

        let l = Self::diverge(v, o);

        let Some(s) = src.walk(v, l, false) else {
            return false;
        };
        let Some(d) = self.walk(v, l, true) else {
            return false;
        };

        let mut spte = s.load(Ordering::Acquire);
        if Hpt::is_present(spte) {
            spte |= Hpt::BORROWED;
        }

        if d.load(Ordering::Acquire) == spte {
            return false;
        }

        let old = d.swap(spte, Ordering::AcqRel);
        if Hpt::is_table(old, l) && old & Hpt::BORROWED == 0 {
            self.retire(Hpt::addr(old), l - 1);
        }

        true
    }

    /// Share every slot of `master` covering `[s, e)`, stepping by the
    /// largest slot that stays clear of `e`.
    pub fn share_from_master(&self, master: &Self, mut s: IAddr, e: IAddr) {
        while s < e {
            self.share_from(master, s, e);
            let step = page_size(Self::diverge(s, e));
            s = align_down(s, step) + step;
        }
    }

    /// Map `[phys, phys + size)` into a remap window of this table and return
    /// the address of `phys` inside it, or `None` if it does not fit or a
    /// table could not be allocated. The local TLB is flushed either way.
    pub fn map_tmp(
        &self,
        tlb: &dyn LocalTlb,
        phys: OAddr,
        size: u64,
        pm: Permissions,
        ma: Memattr,
        w: RemapWindow,
    ) -> Option<IAddr> {
        let (mut v, e) = w.bounds();
        let mut p = align_down(phys, PAGE_SIZE);
        let mut s = align_up(phys + size, PAGE_SIZE) - p;

        if s > e - v {
            return None;
        }

        let mut r = Some(v | (phys & offs_mask(0)));

        while s != 0 {
            let o = aligned_order(s, v, p);

            if let Err(err) = self.update(v, p, o - PAGE_BITS, pm, ma) {
                log::warn!("map_tmp {p:#x}+{:#x}: {err}", 1u64 << o);
                r = None;
            }

            s -= 1 << o;
            v += 1 << o;
            p += 1 << o;
        }

        tlb.invalidate_all();

        r
    }

    /// Map `n` consecutive 2 MiB pages at `v` and return the address of `p`
    /// inside them. The level-1 table covering `v` must already exist; this
    /// runs before frames can be handed out. `None` if it does not or if the
    /// run leaves the table.
    pub fn map(
        &self,
        tlb: &dyn LocalTlb,
        v: IAddr,
        p: OAddr,
        pm: Permissions,
        ma: Memattr,
        n: usize,
    ) -> Option<IAddr> {
        let s = page_size(1);
        let t = self.descend(v, 1, false)?;
        let idx = Self::index(v, 1);

        if idx + n > ENTRIES {
            return None;
        }

        let table = self.table(t);
        let base = p & !offs_mask(1);

        for i in 0..n {
            let va = v + i as u64 * s;
            let old = table[idx + i].swap(Hpt::leaf(base + i as u64 * s, 1, pm, ma), Ordering::AcqRel);
            if Hpt::is_table(old, 1) && old & Hpt::BORROWED == 0 {
                self.retire(Hpt::addr(old), 0);
            }
            tlb.invalidate_page(va);
        }

        Some(v | (p & offs_mask(1)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::info::{LINK_ADDR, MMAP_CPU, MMAP_GLB_MAP0, MMAP_GLB_SMMU};
    use crate::testing::{CountingTlb, TestPool};
    use alloc::sync::Arc;
    use std::thread;

    const RW: Permissions = Permissions::R.union(Permissions::W);

    fn pair(frames: usize) -> (Arc<TestPool>, Hptp, Hptp) {
        let pool = Arc::new(TestPool::with_capacity(frames));
        let master = Hptp::new(pool.clone());
        let local = Hptp::new(pool.clone());
        (pool, master, local)
    }

    #[test]
    fn share_is_idempotent() {
        let (_pool, master, local) = pair(32);
        master.update(LINK_ADDR, 0x10_0000, 0, RW, Memattr::ram()).unwrap();

        assert!(local.share_from(&master, LINK_ADDR, MMAP_CPU));
        assert!(!local.share_from(&master, LINK_ADDR, MMAP_CPU));

        assert_eq!(local.lookup(LINK_ADDR), master.lookup(LINK_ADDR));
    }

    #[test]
    fn sharing_sees_later_master_updates() {
        let (_pool, master, local) = pair(32);
        master.update(LINK_ADDR, 0x10_0000, 0, RW, Memattr::ram()).unwrap();
        local.share_from(&master, LINK_ADDR, MMAP_CPU);

        master.update(LINK_ADDR + 0x1000, 0x20_0000, 0, RW, Memattr::ram()).unwrap();
        assert_eq!(local.lookup(LINK_ADDR + 0x1000).map(|m| m.phys), Some(0x20_0000));
    }

    #[test]
    fn missing_source_is_not_shared() {
        let (_pool, master, local) = pair(32);
        master.root_init();
        assert!(!local.share_from(&master, LINK_ADDR, MMAP_CPU));
    }

    #[test]
    fn share_range_stops_before_bound() {
        let (_pool, master, local) = pair(64);
        master.update(LINK_ADDR, 0x10_0000, 0, RW, Memattr::ram()).unwrap();
        master.update(MMAP_GLB_SMMU, 0xfed9_0000, 0, RW, Memattr::dev()).unwrap();
        master.update(MMAP_CPU, 0x30_0000, 0, RW, Memattr::ram()).unwrap();

        local.share_from_master(&master, LINK_ADDR, MMAP_CPU);

        assert_eq!(local.lookup(LINK_ADDR), master.lookup(LINK_ADDR));
        assert!(local.lookup(MMAP_CPU).is_none());
    }

    #[test]
    fn borrowed_tables_survive_borrower() {
        let (pool, master, local) = pair(32);
        master.update(LINK_ADDR, 0x10_0000, 0, RW, Memattr::ram()).unwrap();
        let master_frames = pool.live();

        local.share_from(&master, LINK_ADDR, MMAP_CPU);
        drop(local);

        assert_eq!(pool.live(), master_frames);
        assert!(master.lookup(LINK_ADDR).is_some());
    }

    #[test]
    fn concurrent_share_converges() {
        let (_pool, master, local) = pair(32);
        master.update(LINK_ADDR, 0x10_0000, 0, RW, Memattr::ram()).unwrap();

        let changed: usize = thread::scope(|s| {
            let workers: Vec<_> = (0..4)
                .map(|_| s.spawn(|| usize::from(local.share_from(&master, LINK_ADDR, MMAP_CPU))))
                .collect();
            workers.into_iter().map(|w| w.join().unwrap()).sum()
        });

        assert!(changed >= 1);
        assert!(!local.share_from(&master, LINK_ADDR, MMAP_CPU));
        assert_eq!(local.lookup(LINK_ADDR), master.lookup(LINK_ADDR));
    }

    #[test]
    fn map_tmp_returns_offset_into_window() {
        let pool = Arc::new(TestPool::with_capacity(16));
        let pt = Hptp::new(pool);
        let tlb = CountingTlb::default();

        let va = pt
            .map_tmp(&tlb, 0x1234_5678, 0x2000, Permissions::R, Memattr::ram(), RemapWindow::Rw0)
            .unwrap();

        assert_eq!(va, MMAP_TMP_RW0S + 0x678);
        assert_eq!(pt.lookup(va).map(|m| m.phys), Some(0x1234_5678));
        assert_eq!(pt.lookup(va + 0x2000).map(|m| m.phys), Some(0x1234_7678));
        assert_eq!(tlb.flushes(), 1);
    }

    #[test]
    fn map_tmp_rejects_oversized_range() {
        let pool = Arc::new(TestPool::with_capacity(16));
        let pt = Hptp::new(pool);
        let tlb = CountingTlb::default();

        let (s, e) = RemapWindow::Rw1.bounds();
        assert!(
            pt.map_tmp(&tlb, 0x1000, e - s + 1, Permissions::R, Memattr::ram(), RemapWindow::Rw1)
                .is_none()
        );
        assert_eq!(tlb.flushes(), 0);
    }

    #[test]
    fn map_tmp_fails_without_memory_but_flushes() {
        let pool = Arc::new(TestPool::with_capacity(1));
        let pt = Hptp::new(pool);
        let tlb = CountingTlb::default();

        assert!(
            pt.map_tmp(&tlb, 0x1000, 0x1000, Permissions::R, Memattr::ram(), RemapWindow::Rw0)
                .is_none()
        );
        assert_eq!(tlb.flushes(), 1);
    }

    #[test]
    fn map_installs_superpages() {
        let pool = Arc::new(TestPool::with_capacity(16));
        let pt = Hptp::new(pool);
        let tlb = CountingTlb::default();
        pt.walk(MMAP_GLB_MAP0, 1, true).unwrap();

        let va = pt
            .map(&tlb, MMAP_GLB_MAP0, 0x7fe0_1234, Permissions::R, Memattr::ram(), 2)
            .unwrap();

        assert_eq!(va, MMAP_GLB_MAP0 + 0x1234);
        let m = pt.lookup(va + page_size(1)).unwrap();
        assert_eq!((m.phys, m.order), (0x8000_1234, 9));
        assert_eq!(tlb.pages(), 2);
    }

    #[test]
    fn map_needs_table_and_room() {
        let pool = Arc::new(TestPool::with_capacity(16));
        let pt = Hptp::new(pool);
        let tlb = CountingTlb::default();
        assert!(pt.map(&tlb, MMAP_GLB_MAP0, 0, Permissions::R, Memattr::ram(), 1).is_none());

        pt.walk(0x3fe0_0000, 1, true).unwrap();
        assert!(pt.map(&tlb, 0x3fe0_0000, 0, Permissions::R, Memattr::ram(), 2).is_none());
    }
}

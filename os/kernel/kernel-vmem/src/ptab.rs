//! # Generic radix page table
//!
//! [`Ptab`] owns one tree of 4 KiB tables whose entry layout is given by a
//! [`PteFormat`]. Tables come from the shared [`FramePool`] and are reached
//! through its [`PhysMapper`](crate::PhysMapper) view.
//!
//! ## Concurrency
//!
//! Entries are `AtomicU64`s. Installing an intermediate table is a CAS, so
//! concurrent walkers never lose a table, but there is no lock: callers
//! serialize mutation of a given address range (one owner per space). Tables
//! that an update disconnects are kept on a zombie list until the owner has
//! invalidated translation caches ([`Ptab::take_zombies`]).

use crate::info::{PAGE_BITS, PAGE_SIZE, PTE_BPL, levl_bits, offs_mask, page_size};
use crate::{FramePool, IAddr, Memattr, OAddr, Permissions, PteFormat, bit_scan_msb};
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::marker::PhantomData;
use core::sync::atomic::{AtomicU64, Ordering};
use kernel_sync::SpinLock;

pub(crate) const ENTRIES: usize = 1 << PTE_BPL;

type Table = [AtomicU64; ENTRIES];

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PtabError {
    #[error("out of memory (page table)")]
    OutOfMemory,
}

/// A translation found by [`Ptab::lookup`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Mapping {
    /// Output address of the looked-up input address (not the block base).
    pub phys: OAddr,
    /// Size of the covering block as log2 of base pages.
    pub order: u32,
    pub perm: Permissions,
    pub attr: Memattr,
}

/// A page-table tree of format `F`.
pub struct Ptab<F: PteFormat> {
    /// Physical address of the root table, zero until [`Ptab::root_init`].
    root: AtomicU64,
    pool: Arc<dyn FramePool>,
    zombies: SpinLock<Vec<OAddr>>,
    _format: PhantomData<F>,
}

impl<F: PteFormat> Ptab<F> {
    #[must_use]
    pub fn new(pool: Arc<dyn FramePool>) -> Self {
        Self {
            root: AtomicU64::new(0),
            pool,
            zombies: SpinLock::new(Vec::new()),
            _format: PhantomData,
        }
    }

    /// Number of base pages the tree can address.
    #[must_use]
    pub const fn selectors() -> u64 {
        1 << (F::IBITS - PAGE_BITS)
    }

    /// Largest order a single leaf can map.
    #[must_use]
    pub fn max_order() -> u32 {
        F::lev_ord()
    }

    /// Allocate the root table unless present; returns its physical address.
    pub fn root_init(&self) -> Option<OAddr> {
        if let Some(r) = self.root() {
            return Some(r);
        }

        let t = self.alloc_table()?;
        match self.root.compare_exchange(0, t, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => Some(t),
            Err(winner) => {
                self.pool.free_4k(t);
                Some(winner)
            }
        }
    }

    #[inline]
    #[must_use]
    pub fn root(&self) -> Option<OAddr> {
        match self.root.load(Ordering::Acquire) {
            0 => None,
            r => Some(r),
        }
    }

    /// Root of a tree walked with only `levels` levels (index 0 at every
    /// level above), for translation units with a narrower input width.
    pub fn root_for(&self, levels: u32) -> Option<OAddr> {
        assert!(levels > 0 && levels <= F::LEVELS);
        self.descend(0, levels - 1, true)
    }

    #[inline]
    pub fn pool(&self) -> &Arc<dyn FramePool> {
        &self.pool
    }

    /// Highest level at which `v` and `o` select different slots.
    #[must_use]
    pub fn diverge(v: IAddr, o: IAddr) -> u32 {
        match bit_scan_msb(v ^ o) {
            Some(b) if b >= PAGE_BITS => ((b - PAGE_BITS) / PTE_BPL).min(F::LEVELS - 1),
            _ => 0,
        }
    }

    #[inline]
    pub(crate) const fn index(v: IAddr, l: u32) -> usize {
        (v >> levl_bits(l)) as usize & (ENTRIES - 1)
    }

    #[inline]
    pub(crate) fn table(&self, pa: OAddr) -> &Table {
        // SAFETY: `pa` is a table frame owned by (or shared into) this tree;
        // frames stay mapped until freed, which only happens after retirement.
        unsafe { &*self.pool.phys_to_ptr(pa).cast::<Table>() }
    }

    fn alloc_table(&self) -> Option<OAddr> {
        let pa = self.pool.alloc_4k()?;
        // SAFETY: freshly allocated frame, exclusively ours.
        unsafe { core::ptr::write_bytes(self.pool.phys_to_ptr(pa), 0, PAGE_SIZE as usize) };
        Some(pa)
    }

    /// Fill table `t` with leaves at `level` reproducing the superpage `raw`.
    fn split(&self, t: OAddr, raw: u64, level: u32) {
        let (base, pm, ma) = (F::addr(raw) & !offs_mask(level + 1), F::permissions(raw), F::memattr(raw));
        for (i, e) in self.table(t).iter().enumerate() {
            e.store(F::leaf(base + i as u64 * page_size(level), level, pm, ma), Ordering::Relaxed);
        }
    }

    /// Physical address of the table at level `l` covering `v`.
    pub(crate) fn descend(&self, v: IAddr, l: u32, alloc: bool) -> Option<OAddr> {
        let mut table = if alloc { self.root_init()? } else { self.root()? };
        let mut lev = F::LEVELS - 1;

        while lev > l {
            let slot = &self.table(table)[Self::index(v, lev)];
            let raw = slot.load(Ordering::Acquire);

            if F::is_table(raw, lev) {
                table = F::addr(raw);
                lev -= 1;
                continue;
            }

            if !alloc {
                return None;
            }

            let t = self.alloc_table()?;
            if F::is_present(raw) {
                self.split(t, raw, lev - 1);
            }

            if slot
                .compare_exchange(raw, F::table(t), Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                table = t;
                lev -= 1;
            } else {
                // Lost the race; re-examine the slot.
                self.pool.free_4k(t);
            }
        }

        Some(table)
    }

    /// Entry slot at level `l` for `v`, allocating missing tables if `alloc`.
    pub fn walk(&self, v: IAddr, l: u32, alloc: bool) -> Option<&AtomicU64> {
        let t = self.descend(v, l, alloc)?;
        Some(&self.table(t)[Self::index(v, l)])
    }

    /// Translation covering `v`, if any.
    #[must_use]
    pub fn lookup(&self, v: IAddr) -> Option<Mapping> {
        let mut table = self.root()?;

        for lev in (0..F::LEVELS).rev() {
            let raw = self.table(table)[Self::index(v, lev)].load(Ordering::Acquire);

            if !F::is_present(raw) {
                return None;
            }

            if F::is_table(raw, lev) {
                table = F::addr(raw);
                continue;
            }

            return Some(Mapping {
                phys: (F::addr(raw) & !offs_mask(lev)) | (v & offs_mask(lev)),
                order: lev * PTE_BPL,
                perm: F::permissions(raw),
                attr: F::memattr(raw),
            });
        }

        None
    }

    /// Map `2^o` base pages at `v` to `p`, or unmap them if `pm` is empty.
    ///
    /// Blocks larger than one leaf are written as consecutive leaves at
    /// [`PteFormat::MAX_LEAF`]. Existing superpages covering a smaller block
    /// are split first. Tables replaced by a leaf are retired, not freed.
    pub fn update(&self, v: IAddr, p: OAddr, o: u32, pm: Permissions, ma: Memattr) -> Result<(), PtabError> {
        let lev = (o / PTE_BPL).min(F::MAX_LEAF);
        let step = page_size(lev);
        let count = 1u64 << (o - lev * PTE_BPL);

        debug_assert_eq!(v & offs_mask(lev), 0, "unaligned input address {v:#x}");
        debug_assert_eq!(p & offs_mask(lev), 0, "unaligned output address {p:#x}");

        for i in 0..count {
            let va = v + i * step;

            let slot = if pm.is_empty() {
                match self.walk(va, lev, false) {
                    Some(slot) => slot,
                    // Covered by a larger leaf that has to be split first.
                    None if self.lookup(va).is_some() => self.walk(va, lev, true).ok_or(PtabError::OutOfMemory)?,
                    None => continue,
                }
            } else {
                self.walk(va, lev, true).ok_or(PtabError::OutOfMemory)?
            };

            let new = if pm.is_empty() { 0 } else { F::leaf(p + i * step, lev, pm, ma) };
            let old = slot.swap(new, Ordering::AcqRel);

            if F::is_table(old, lev) && old & F::BORROWED == 0 {
                self.retire(F::addr(old), lev - 1);
            }
        }

        Ok(())
    }

    /// Queue a disconnected subtree for release after invalidation.
    pub(crate) fn retire(&self, pa: OAddr, level: u32) {
        if level > 0 {
            for e in self.table(pa) {
                let raw = e.load(Ordering::Acquire);
                if F::is_table(raw, level) && raw & F::BORROWED == 0 {
                    self.retire(F::addr(raw), level - 1);
                }
            }
        }
        self.zombies.lock().push(pa);
    }

    /// Frames of retired tables. The caller frees them once no translation
    /// cache can still reference them.
    pub fn take_zombies(&self) -> Vec<OAddr> {
        core::mem::take(&mut *self.zombies.lock())
    }

    /// Free retired tables immediately.
    pub fn reclaim(&self) {
        for pa in self.take_zombies() {
            self.pool.free_4k(pa);
        }
    }

    fn free_subtree(&self, pa: OAddr, level: u32) {
        if level > 0 {
            for e in self.table(pa) {
                let raw = e.load(Ordering::Acquire);
                if F::is_table(raw, level) && raw & F::BORROWED == 0 {
                    self.free_subtree(F::addr(raw), level - 1);
                }
            }
        }
        self.pool.free_4k(pa);
    }
}

impl<F: PteFormat> Drop for Ptab<F> {
    fn drop(&mut self) {
        if let Some(r) = self.root() {
            self.free_subtree(r, F::LEVELS - 1);
        }
        self.reclaim();
    }
}

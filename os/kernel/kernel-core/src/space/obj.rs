//! # Object space
//!
//! The capability table of a protection domain: a radix tree of 4 KiB
//! tables from the frame pool, [`OBJ_LEVELS`] deep. Interior entries hold
//! the physical address of the next table; leaf entries point to a
//! heap-allocated [`Capability`] or are null.
//!
//! ```text
//!   sel = [ idx 1 | idx 0 ]     root ──▶ leaf ──▶ Box<Capability>
//!           9 bit   9 bit
//! ```
//!
//! Lookups take no lock. Inserting is a CAS on a null slot; removing swaps
//! the slot to null and hands the capability to RCU, so a reader that
//! loaded the pointer before the swap can still clone it.

use crate::capability::Capability;
use crate::kernel::Kernel;
use crate::kobject::{Kobject, Kref, RefCount, Refptr, kalloc};
use crate::pd::Pd;
use crate::status::{Result, Status};
use alloc::boxed::Box;
use alloc::sync::Arc;
use core::ptr;
use core::sync::atomic::{AtomicPtr, AtomicU64, Ordering};
use kernel_alloc::SlabCache;
use kernel_info::config::OBJ_LEVELS;
use kernel_sync::CpuId;
use kernel_vmem::info::{PAGE_SIZE, PTE_BPL};
use kernel_vmem::{FramePool, OAddr};

/// Selectors the boot code populates for the root domain.
pub mod root {
    /// Root Pd, in the kernel's object space.
    pub const PD: u64 = 1;
    /// Root object space, in the kernel's object space.
    pub const OBJ: u64 = 2;
    /// Remaining root objects, in the root object space.
    pub const HST: u64 = 3;
    pub const PIO: u64 = 4;
    pub const EC: u64 = 5;
    pub const SC: u64 = 6;
}

const ENTRIES: usize = 1 << PTE_BPL;

/// Interior table; zero marks a missing subtree.
type Table = [AtomicU64; ENTRIES];

/// Leaf table; null marks a free selector.
type Slots = [AtomicPtr<Capability>; ENTRIES];

/// Capability table of a protection domain.
pub struct SpaceObj {
    refcount: RefCount,
    pd: Option<Refptr<Pd>>,
    pool: Arc<dyn FramePool>,
    /// Physical address of the root table, zero until allocated.
    root: AtomicU64,
}

impl SpaceObj {
    pub(crate) fn nova(pool: Arc<dyn FramePool>) -> Self {
        Self {
            refcount: RefCount::new(),
            pd: None,
            pool,
            root: AtomicU64::new(0),
        }
    }

    pub fn create(k: &Kernel, cache: &SlabCache<Self>, pd: &Kref<Pd>) -> Result<Refptr<Self>> {
        let pd = Refptr::acquire(pd).ok_or(Status::Aborted)?;

        let obj = kalloc(
            cache,
            Self {
                refcount: RefCount::new(),
                pd: Some(pd),
                pool: k.pool().clone(),
                root: AtomicU64::new(0),
            },
        )?;

        obj.root_init().ok_or(Status::MemObj)?;

        log::trace!("OBJ {:p} created", &**obj);
        Ok(Refptr::adopt(obj))
    }

    /// Number of selectors the table tree resolves.
    #[must_use]
    pub const fn selectors() -> u64 {
        1 << (OBJ_LEVELS * PTE_BPL)
    }

    #[must_use]
    pub fn pd(&self) -> Option<&Refptr<Pd>> {
        self.pd.as_ref()
    }

    pub(crate) fn root_init(&self) -> Option<OAddr> {
        self.table_at(&self.root, true)
    }

    #[inline]
    const fn index(sel: u64, level: u32) -> usize {
        (sel >> (level * PTE_BPL)) as usize & (ENTRIES - 1)
    }

    #[inline]
    fn frame<T>(&self, pa: OAddr) -> &T {
        // SAFETY: `pa` is a table frame of this tree. Frames are zeroed on
        // allocation and only freed when the space itself is dropped.
        unsafe { &*self.pool.phys_to_ptr(pa).cast::<T>() }
    }

    fn alloc_table(&self) -> Option<OAddr> {
        let pa = self.pool.alloc_4k()?;
        // SAFETY: freshly allocated frame, exclusively ours.
        unsafe { ptr::write_bytes(self.pool.phys_to_ptr(pa), 0, PAGE_SIZE as usize) };
        Some(pa)
    }

    /// Table referenced by `slot`, installing an empty one if `alloc`.
    fn table_at(&self, slot: &AtomicU64, alloc: bool) -> Option<OAddr> {
        match slot.load(Ordering::Acquire) {
            0 if alloc => {}
            0 => return None,
            pa => return Some(pa),
        }

        let t = self.alloc_table()?;
        match slot.compare_exchange(0, t, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => Some(t),
            Err(winner) => {
                self.pool.free_4k(t);
                Some(winner)
            }
        }
    }

    /// Leaf slot of `sel`, allocating missing tables if `alloc`.
    fn slot(&self, sel: u64, alloc: bool) -> Option<&AtomicPtr<Capability>> {
        let mut table = self.table_at(&self.root, alloc)?;
        for level in (1..OBJ_LEVELS).rev() {
            let t: &Table = self.frame(table);
            table = self.table_at(&t[Self::index(sel, level)], alloc)?;
        }

        let slots: &Slots = self.frame(table);
        Some(&slots[Self::index(sel, 0)])
    }

    /// Store `cap` at `sel`. On failure `cap` is dropped, releasing its
    /// reference.
    pub fn insert(&self, sel: u64, cap: Capability) -> Result<()> {
        if sel >= Self::selectors() {
            return Err(Status::BadPar);
        }

        let slot = self.slot(sel, true).ok_or(Status::MemObj)?;
        let new = Box::into_raw(Box::new(cap));

        if slot
            .compare_exchange(ptr::null_mut(), new, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            // SAFETY: `new` was never published.
            drop(unsafe { Box::from_raw(new) });
            return Err(Status::BadCap);
        }
        Ok(())
    }

    /// A copy of the capability at `sel`, holding its own reference.
    ///
    /// The caller must not pass a quiescent state while the lookup runs.
    #[must_use]
    pub fn lookup(&self, sel: u64) -> Option<Capability> {
        if sel >= Self::selectors() {
            return None;
        }

        let p = self.slot(sel, false)?.load(Ordering::Acquire);
        // SAFETY: a published capability is freed only after a grace period
        // that starts once it is unlinked, so it outlives this read.
        unsafe { p.as_ref() }.cloned()
    }

    /// Clear `sel`. The capability is dropped after a grace period, so
    /// lookups that raced with the removal can still use the object.
    pub fn remove(&self, k: &Kernel, cpu: CpuId, sel: u64) -> bool {
        if sel >= Self::selectors() {
            return false;
        }
        let Some(slot) = self.slot(sel, false) else {
            return false;
        };

        let p = slot.swap(ptr::null_mut(), Ordering::AcqRel);
        if p.is_null() {
            return false;
        }

        // SAFETY: the swap unlinked `p`; no later lookup can reach it.
        let cap = unsafe { Box::from_raw(p) };
        log::trace!("OBJ {:p} sel {sel:#x}: {cap:?} removed", self);
        k.rcu().call(cpu, move || drop(cap));
        true
    }

    /// Copy the capability at `ssel` of `src` to `dsel` of this space,
    /// keeping only the permissions in `pmask`.
    pub fn delegate(&self, src: &Self, ssel: u64, dsel: u64, pmask: u8) -> Result<()> {
        let cap = src.lookup(ssel).ok_or(Status::BadCap)?;
        let cap = cap.restrict(pmask).ok_or(Status::BadCap)?;
        self.insert(dsel, cap)
    }

    /// Number of occupied selectors.
    #[must_use]
    pub fn len(&self) -> usize {
        match self.table_at(&self.root, false) {
            Some(r) => self.count(r, OBJ_LEVELS - 1),
            None => 0,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn count(&self, pa: OAddr, level: u32) -> usize {
        if level == 0 {
            let slots: &Slots = self.frame(pa);
            return slots.iter().filter(|s| !s.load(Ordering::Acquire).is_null()).count();
        }

        let t: &Table = self.frame(pa);
        t.iter()
            .map(|e| e.load(Ordering::Acquire))
            .filter(|&c| c != 0)
            .map(|c| self.count(c, level - 1))
            .sum()
    }

    /// Drop every capability below `pa` and free the tables.
    fn teardown(&self, pa: OAddr, level: u32) {
        if level == 0 {
            let slots: &Slots = self.frame(pa);
            for s in slots {
                let p = s.swap(ptr::null_mut(), Ordering::AcqRel);
                if !p.is_null() {
                    // SAFETY: the space is being dropped; nobody can look it up.
                    drop(unsafe { Box::from_raw(p) });
                }
            }
        } else {
            let t: &Table = self.frame(pa);
            for e in t {
                match e.load(Ordering::Acquire) {
                    0 => {}
                    c => self.teardown(c, level - 1),
                }
            }
        }
        self.pool.free_4k(pa);
    }
}

impl Drop for SpaceObj {
    fn drop(&mut self) {
        let root = *self.root.get_mut();
        if root != 0 {
            self.teardown(root, OBJ_LEVELS - 1);
        }
    }
}

impl Kobject for SpaceObj {
    fn refcount(&self) -> &RefCount {
        &self.refcount
    }

    fn collect(&self) {
        log::trace!("OBJ {:p} collected", self);
    }
}

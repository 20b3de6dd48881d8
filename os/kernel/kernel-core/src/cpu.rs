//! Per-CPU kernel state.
//!
//! Apart from the remote request queue and the counters remote CPUs poll,
//! everything here is only touched by its own CPU. The locks are there to
//! keep the type `Sync`; they are uncontended.

use crate::ec::Ec;
use crate::kobject::Kref;
use crate::sc::Sc;
use alloc::collections::VecDeque;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use kernel_info::config::SC_PRIORITIES;
use kernel_sync::{CpuId, SpinLock};
use kernel_vmem::Hptp;

bitflags::bitflags! {
    /// Work a CPU has to do before it returns to user or guest mode.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct Hazard: u32 {
        /// Reschedule.
        const SCHED = 1 << 0;
        /// Pass a quiescent state.
        const RCU = 1 << 1;
        /// The FPU is enabled.
        const FPU = 1 << 2;
        /// Enter a sleep state.
        const SLEEP = 1 << 3;
    }
}

/// Ready scheduling contexts, one FIFO per priority.
pub(crate) struct ReadyQueue {
    lists: [VecDeque<Kref<Sc>>; SC_PRIORITIES],
    /// No list above this priority is populated.
    prio_top: usize,
}

impl ReadyQueue {
    fn new() -> Self {
        Self {
            lists: core::array::from_fn(|_| VecDeque::new()),
            prio_top: 0,
        }
    }

    /// Queue `sc` at the front of its list if it has budget left, else
    /// refill it and queue it at the back.
    pub(crate) fn enqueue(&mut self, sc: Kref<Sc>) {
        let p = usize::from(sc.prio());
        sc.mark_queued();

        if sc.left() > 0 {
            self.lists[p].push_front(sc);
        } else {
            sc.refill();
            self.lists[p].push_back(sc);
        }

        self.prio_top = self.prio_top.max(p);
    }

    pub(crate) fn dequeue(&mut self) -> Option<Kref<Sc>> {
        let sc = self.lists[self.prio_top].pop_front();

        while self.prio_top > 0 && self.lists[self.prio_top].is_empty() {
            self.prio_top -= 1;
        }

        let sc = sc?;
        sc.mark_dequeued();
        Some(sc)
    }

    fn len(&self) -> usize {
        self.lists.iter().map(VecDeque::len).sum()
    }
}

pub struct Cpu {
    id: CpuId,
    hazard: AtomicU32,

    current_ec: SpinLock<Kref<Ec>>,
    current_sc: SpinLock<Kref<Sc>>,
    idle_sc: Kref<Sc>,
    fpowner: SpinLock<Option<Kref<Ec>>>,

    pub(crate) ready: SpinLock<ReadyQueue>,
    /// Scs other CPUs made runnable here.
    pub(crate) remote: SpinLock<VecDeque<Kref<Sc>>>,

    /// Time the current Sc was last charged up to.
    tsc: AtomicU64,

    /// Depth of the donation chain walked by the last activation.
    donations: AtomicU64,
    helping: AtomicU64,
    /// Acknowledged remote kernel entries; shootdowns wait for a change.
    rke: AtomicU64,

    /// This CPU's kernel table, home of the remap windows.
    hptp: Hptp,
}

impl Cpu {
    pub(crate) fn new(id: CpuId, idle_ec: Kref<Ec>, idle_sc: Kref<Sc>, hptp: Hptp) -> Self {
        Self {
            id,
            hazard: AtomicU32::new(0),
            current_ec: SpinLock::new(idle_ec),
            current_sc: SpinLock::new(idle_sc.clone()),
            idle_sc,
            fpowner: SpinLock::new(None),
            ready: SpinLock::new(ReadyQueue::new()),
            remote: SpinLock::new(VecDeque::new()),
            tsc: AtomicU64::new(0),
            donations: AtomicU64::new(0),
            helping: AtomicU64::new(0),
            rke: AtomicU64::new(0),
            hptp,
        }
    }

    #[must_use]
    pub const fn id(&self) -> CpuId {
        self.id
    }

    #[must_use]
    pub fn hazard(&self) -> Hazard {
        Hazard::from_bits_truncate(self.hazard.load(Ordering::Acquire))
    }

    pub fn set_hazard(&self, h: Hazard) {
        self.hazard.fetch_or(h.bits(), Ordering::AcqRel);
    }

    pub fn clear_hazard(&self, h: Hazard) {
        self.hazard.fetch_and(!h.bits(), Ordering::AcqRel);
    }

    #[must_use]
    pub fn current_ec(&self) -> Kref<Ec> {
        self.current_ec.lock().clone()
    }

    pub(crate) fn set_current_ec(&self, ec: Kref<Ec>) {
        *self.current_ec.lock() = ec;
    }

    #[must_use]
    pub fn current_sc(&self) -> Kref<Sc> {
        self.current_sc.lock().clone()
    }

    pub(crate) fn set_current_sc(&self, sc: Kref<Sc>) {
        *self.current_sc.lock() = sc;
    }

    #[must_use]
    pub const fn idle_sc(&self) -> &Kref<Sc> {
        &self.idle_sc
    }

    #[must_use]
    pub fn is_idle(&self, sc: &Kref<Sc>) -> bool {
        Arc::ptr_eq(sc, &self.idle_sc)
    }

    #[must_use]
    pub fn is_fpu_owner(&self, ec: &Kref<Ec>) -> bool {
        self.fpowner.lock().as_ref().is_some_and(|o| Arc::ptr_eq(o, ec))
    }

    #[must_use]
    pub fn fpu_owner(&self) -> Option<Kref<Ec>> {
        self.fpowner.lock().clone()
    }

    pub(crate) fn replace_fpu_owner(&self, ec: Option<Kref<Ec>>) -> Option<Kref<Ec>> {
        core::mem::replace(&mut *self.fpowner.lock(), ec)
    }

    /// Number of Scs in the ready queue.
    #[must_use]
    pub fn ready_len(&self) -> usize {
        self.ready.lock().len()
    }

    /// Number of Scs waiting in the remote request queue.
    #[must_use]
    pub fn remote_len(&self) -> usize {
        self.remote.lock().len()
    }

    pub(crate) fn tsc(&self) -> u64 {
        self.tsc.load(Ordering::Relaxed)
    }

    pub(crate) fn set_tsc(&self, t: u64) {
        self.tsc.store(t, Ordering::Relaxed);
    }

    pub(crate) fn set_donations(&self, depth: u64) {
        self.donations.store(depth, Ordering::Relaxed);
    }

    pub(crate) fn count_help(&self) {
        self.helping.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn ack_rke(&self) {
        self.rke.fetch_add(1, Ordering::AcqRel);
    }

    #[must_use]
    pub fn donations(&self) -> u64 {
        self.donations.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn helping(&self) -> u64 {
        self.helping.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn rke_count(&self) -> u64 {
        self.rke.load(Ordering::Acquire)
    }

    #[must_use]
    pub const fn hptp(&self) -> &Hptp {
        &self.hptp
    }
}

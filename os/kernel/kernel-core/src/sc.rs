//! # Scheduling contexts and the per-CPU scheduler
//!
//! An Sc is CPU time: a priority and a budget on one CPU, bound to the Ec it
//! runs. Each CPU schedules its own Scs from 128 FIFO lists; the highest
//! populated priority runs, round-robin within a priority.
//!
//! ```text
//!   prio 127 ┌───┐
//!            │   │
//!   prio_top ├───┤──▶ Sc ─▶ Sc ─▶ Sc      head runs next
//!            │   │
//!   prio 0   └───┘
//! ```
//!
//! An Sc that is preempted with budget left goes back to the head of its
//! list; one whose budget ran out is refilled and goes to the tail. Other
//! CPUs never touch a ready queue directly: they append to the owner's
//! request queue and send an RRQ IPI.

use crate::cpu::Hazard;
use crate::ec::Ec;
use crate::kernel::Kernel;
use crate::kobject::{Kobject, Kref, RefCount, Refptr, kalloc};
use crate::platform::Request;
use crate::status::{Result, Status};
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use kernel_info::config::SC_PRIORITIES;
use kernel_sync::CpuId;

pub struct Sc {
    refcount: RefCount,
    ec: Refptr<Ec>,
    cpu: CpuId,
    prio: u8,
    budget: u64,
    /// Budget remaining in the current period.
    left: AtomicU64,
    /// Total time consumed.
    time: AtomicU64,
    queued: AtomicBool,
}

impl Sc {
    pub(crate) const fn new(ec: Refptr<Ec>, cpu: CpuId, budget: u64, prio: u8) -> Self {
        Self {
            refcount: RefCount::new(),
            ec,
            cpu,
            prio,
            budget,
            left: AtomicU64::new(budget),
            time: AtomicU64::new(0),
            queued: AtomicBool::new(false),
        }
    }

    pub fn create(k: &Kernel, ec: &Kref<Ec>, cpu: CpuId, budget: u64, prio: u8) -> Result<Refptr<Self>> {
        k.check_cpu(cpu)?;

        if budget == 0 || usize::from(prio) >= SC_PRIORITIES {
            return Err(Status::BadPar);
        }

        let ec = Refptr::acquire(ec).ok_or(Status::Aborted)?;
        let sc = kalloc(k.sc_cache(), Self::new(ec, cpu, budget, prio))?;

        log::trace!("SC {:p} created ({cpu}, prio {prio}, budget {budget})", &**sc);
        Ok(Refptr::adopt(sc))
    }

    #[must_use]
    pub fn ec(&self) -> &Kref<Ec> {
        self.ec.kref()
    }

    #[must_use]
    pub const fn cpu(&self) -> CpuId {
        self.cpu
    }

    #[must_use]
    pub const fn prio(&self) -> u8 {
        self.prio
    }

    #[must_use]
    pub const fn budget(&self) -> u64 {
        self.budget
    }

    #[must_use]
    pub fn left(&self) -> u64 {
        self.left.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn time(&self) -> u64 {
        self.time.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn is_queued(&self) -> bool {
        self.queued.load(Ordering::Acquire)
    }

    pub(crate) fn refill(&self) {
        self.left.store(self.budget, Ordering::Relaxed);
    }

    pub(crate) fn mark_queued(&self) {
        let was = self.queued.swap(true, Ordering::AcqRel);
        assert!(!was, "SC {:p} enqueued twice", self);
    }

    pub(crate) fn mark_dequeued(&self) {
        self.queued.store(false, Ordering::Release);
    }

    /// Consume `t` ticks; returns whether budget is left.
    fn charge(&self, t: u64) -> bool {
        self.time.fetch_add(t, Ordering::Relaxed);
        let left = self.left().saturating_sub(t);
        self.left.store(left, Ordering::Relaxed);
        left > 0
    }

    /// Charge the current Sc of `cpu` for the time since it was last charged.
    fn account(k: &Kernel, cpu: CpuId) -> (Kref<Self>, bool) {
        let c = k.cpu(cpu);
        let now = k.platform().now();
        let cur = c.current_sc();
        let left = cur.charge(now.saturating_sub(c.tsc()));
        c.set_tsc(now);
        (cur, left)
    }

    /// Pick and run the next Sc of `cpu`. Unless `suspend`, the current Sc
    /// stays runnable. Nothing may follow this call on the caller's path.
    pub fn schedule(k: &Kernel, cpu: CpuId, suspend: bool) {
        let c = k.cpu(cpu);
        c.clear_hazard(Hazard::SCHED);

        let (cur, _) = Self::account(k, cpu);
        if !suspend && !c.is_idle(&cur) {
            c.ready.lock().enqueue(cur);
        }

        let next = c.ready.lock().dequeue().unwrap_or_else(|| c.idle_sc().clone());

        k.platform().set_timer(cpu, c.tsc().saturating_add(next.left()));
        c.set_current_sc(next.clone());

        log::trace!("{cpu}: schedule SC {:p} (prio {})", &**next, next.prio);
        Ec::activate(next.ec(), k, cpu);
    }

    /// Make `sc` runnable on its CPU, from `cpu`.
    pub fn remote_enqueue(sc: &Kref<Self>, k: &Kernel, cpu: CpuId) {
        if sc.cpu == cpu {
            Self::enqueue_local(sc.clone(), k, cpu);
            return;
        }

        let c = k.cpu(sc.cpu);
        let first = {
            let mut q = c.remote.lock();
            q.push_back(sc.clone());
            q.len() == 1
        };

        if first {
            k.platform().send_ipi(sc.cpu, Request::Rrq);
        }
    }

    fn enqueue_local(sc: Kref<Self>, k: &Kernel, cpu: CpuId) {
        let c = k.cpu(cpu);
        let preempt = sc.prio > c.current_sc().prio;
        c.ready.lock().enqueue(sc);
        if preempt {
            c.set_hazard(Hazard::SCHED);
        }
    }

    /// RRQ IPI: move every Sc other CPUs queued for `cpu` into its ready
    /// queue.
    pub fn rrq_handler(k: &Kernel, cpu: CpuId) {
        let queued = core::mem::take(&mut *k.cpu(cpu).remote.lock());
        for sc in queued {
            Self::enqueue_local(sc, k, cpu);
        }
    }

    /// RKE IPI: acknowledge a shootdown; the reschedule reloads the
    /// translation root.
    pub fn rke_handler(k: &Kernel, cpu: CpuId) {
        let c = k.cpu(cpu);
        c.ack_rke();
        c.set_hazard(Hazard::SCHED);
    }

    /// Budget timer interrupt.
    pub fn timer_tick(k: &Kernel, cpu: CpuId) {
        let (cur, left) = Self::account(k, cpu);
        if !left && !k.cpu(cpu).is_idle(&cur) {
            k.cpu(cpu).set_hazard(Hazard::SCHED);
        }
    }
}

impl Kobject for Sc {
    fn refcount(&self) -> &RefCount {
        &self.refcount
    }

    fn collect(&self) {
        log::trace!("SC {:p} collected", self);
    }
}

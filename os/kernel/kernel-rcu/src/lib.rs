//! # Read-Copy-Update
//!
//! Deferred reclamation without locks on the read side. A CPU that unlinks
//! an object registers a callback with [`Rcu::call`]; the callback runs once
//! every CPU has passed a quiescent state after the registration.
//!
//! ## Epoch counter
//!
//! All global state is one packed counter plus a countdown:
//!
//! ```text
//!  63                                  2   1   0
//! ┌──────────────────────────────────────┬───┬───┐
//! │             generation               │ C │ R │
//! └──────────────────────────────────────┴───┴───┘
//!   R: another epoch was requested    C: the current epoch completed
//! ```
//!
//! Once both bits are set the generation advances and both bits clear; this
//! starts a new grace period and resets the countdown to the CPU count. Each
//! CPU observes the new generation in [`Rcu::check`], which raises its RCU
//! hazard. The hazard is cleared at the next quiescent state
//! ([`Rcu::quiet`]); the CPU taking the countdown to zero sets `C`.
//!
//! ## Callback lists
//!
//! Each CPU keeps three FIFO lists. `next` collects new callbacks, `curr`
//! waits for its target epoch, `done` is ready to run. Promotion
//! `next → curr → done` only happens after the epoch `curr` waits for
//! completed on all CPUs.
//!
//! ```rust
//! use kernel_rcu::Rcu;
//! use kernel_sync::CpuId;
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicBool, Ordering};
//!
//! let rcu = Rcu::new(1);
//! let cpu = CpuId::BSP;
//! let freed = Arc::new(AtomicBool::new(false));
//!
//! let f = freed.clone();
//! rcu.call(cpu, move || f.store(true, Ordering::Relaxed));
//!
//! while !freed.load(Ordering::Relaxed) {
//!     rcu.check(cpu);
//!     if rcu.hazard(cpu) {
//!         rcu.quiet(cpu);
//!     }
//! }
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]

extern crate alloc;

use alloc::boxed::Box;
use alloc::collections::VecDeque;
use core::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use kernel_sync::{CpuId, PerCpu, SpinLock};

/// Deferred work run after a grace period.
pub type Callback = Box<dyn FnOnce() + Send>;

const REQUESTED: u64 = 1 << 0;
const COMPLETED: u64 = 1 << 1;
const FULL: u64 = REQUESTED | COMPLETED;

/// Whether the epoch `c` completed according to counter value `e`.
#[inline]
const fn complete(e: u64, c: u64) -> bool {
    #[allow(clippy::cast_possible_wrap)]
    let d = (e & !REQUESTED).wrapping_sub(c << 2) as i64;
    d > 0
}

#[derive(Default)]
struct Lists {
    /// Generation last observed by this CPU.
    epoch_l: u64,
    /// Generation `curr` waits for.
    epoch_c: u64,
    next: VecDeque<Callback>,
    curr: VecDeque<Callback>,
    done: VecDeque<Callback>,
}

#[derive(Default)]
struct PerCpuRcu {
    hazard: AtomicBool,
    lists: SpinLock<Lists>,
}

pub struct Rcu {
    epoch: AtomicU64,
    count: AtomicUsize,
    cpus: PerCpu<PerCpuRcu>,
}

impl Rcu {
    /// Engine for `ncpus` CPUs, starting in the completed state of
    /// generation 0.
    #[must_use]
    pub fn new(ncpus: usize) -> Self {
        Self {
            epoch: AtomicU64::new(COMPLETED),
            count: AtomicUsize::new(0),
            cpus: PerCpu::new(ncpus, |_| PerCpuRcu::default()),
        }
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.epoch.load(Ordering::Acquire) >> 2
    }

    /// Whether `cpu` still owes a quiescent state for the current epoch.
    #[must_use]
    pub fn hazard(&self, cpu: CpuId) -> bool {
        self.cpus[cpu].hazard.load(Ordering::Acquire)
    }

    /// Callbacks of `cpu` not yet invoked.
    #[must_use]
    pub fn pending(&self, cpu: CpuId) -> usize {
        let l = self.cpus[cpu].lists.lock();
        l.next.len() + l.curr.len() + l.done.len()
    }

    /// Defer `f` until all CPUs passed a quiescent state.
    pub fn call(&self, cpu: CpuId, f: impl FnOnce() + Send + 'static) {
        self.cpus[cpu].lists.lock().next.push_back(Box::new(f));
    }

    /// Set `s` in the counter for generation `epoch_l`, advancing the
    /// generation if the complementary bit is already set.
    fn set_state(&self, epoch_l: u64, s: u64) {
        let mut e = self.epoch.load(Ordering::Acquire);

        loop {
            if e >> 2 != epoch_l || e & s != 0 {
                return;
            }
            match self
                .epoch
                .compare_exchange_weak(e, e | s, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => break,
                Err(now) => e = now,
            }
        }

        if (e ^ !s) & FULL != 0 {
            return;
        }

        self.count.store(self.cpus.len(), Ordering::Release);
        let prev = self.epoch.fetch_add(1, Ordering::AcqRel);
        log::trace!("RCU: epoch {} started", (prev >> 2) + 1);
    }

    /// Report a quiescent state of `cpu`.
    ///
    /// # Panics
    /// If `cpu` has no pending RCU hazard.
    pub fn quiet(&self, cpu: CpuId) {
        let c = &self.cpus[cpu];
        assert!(c.hazard.swap(false, Ordering::AcqRel), "{cpu:?}: quiescent state without epoch");

        let epoch_l = c.lists.lock().epoch_l;
        if self.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.set_state(epoch_l, COMPLETED);
        }
    }

    /// Advance the lists of `cpu` and run every callback that became safe.
    pub fn check(&self, cpu: CpuId) {
        let c = &self.cpus[cpu];
        let e = self.epoch.load(Ordering::Acquire);

        let done = {
            let mut l = c.lists.lock();

            if l.epoch_l != e >> 2 {
                l.epoch_l = e >> 2;
                c.hazard.store(true, Ordering::Release);
            }

            if !l.curr.is_empty() && complete(e, l.epoch_c) {
                let mut curr = core::mem::take(&mut l.curr);
                l.done.append(&mut curr);
            }

            if !l.next.is_empty() && l.curr.is_empty() {
                l.curr = core::mem::take(&mut l.next);
                l.epoch_c = l.epoch_l + 1;
                self.set_state(l.epoch_l, REQUESTED);
            }

            core::mem::take(&mut l.done)
        };

        for f in done {
            f();
        }
    }
}

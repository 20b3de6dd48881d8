//! # Execution contexts
//!
//! An Ec is a thread of control: a saved register set plus the spaces it
//! runs in. It has no time of its own; it runs on whatever scheduling
//! context activates it.
//!
//! ## Donation
//!
//! A call links caller and callee. While linked, activating the caller
//! runs the callee on the caller's Sc instead, following `callee` links to
//! the end of the chain:
//!
//! ```text
//!   Sc ──▶ A ──callee──▶ B ──callee──▶ C      A.activate() runs C,
//!          ◀──caller───   ◀──caller───        donations == 2
//! ```
//!
//! A reply unlinks the pair and resumes the caller directly.
//!
//! ## Continuations
//!
//! What an Ec does when it next runs is named by its [`Cont`]. Kernel
//! paths that switch away store the continuation first, so a reply or kill
//! can rewrite it (for instance to turn a pending hypercall into an
//! `Aborted` status).

use crate::fpu::FpuState;
use crate::kernel::Kernel;
use crate::kobject::{Kobject, Kref, RefCount, Refptr, kalloc};
use crate::pd::Pd;
use crate::sc::Sc;
use crate::space::{SpaceGst, SpaceHst, SpaceObj, SpacePio};
use crate::status::{Result, Status};
use alloc::collections::VecDeque;
use alloc::sync::{Arc, Weak};
use core::sync::atomic::{AtomicBool, Ordering};
use kernel_alloc::SlabBox;
use kernel_sync::{CpuId, SpinLock};

/// What runs when the Ec is next made current.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Cont {
    /// Never runs again.
    Dead,
    /// The per-CPU idle loop.
    Idle,
    /// Return from a hypercall with success.
    RetUserHypercall,
    /// Return from an exception or interrupt.
    RetUserException,
    /// Return from a hypercall with the given status.
    SysFinish(Status),
}

/// Saved user register state.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct Regs {
    pub ip: u64,
    pub sp: u64,
    /// Event selector base for exceptions of this Ec.
    pub evt: u64,
    /// Host address of the Ec's UTCB or vLAPIC page.
    pub hva: u64,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Kind {
    Kernel,
    Host,
    Guest,
}

bitflags::bitflags! {
    /// Creation flags of [`Pd::create_ec`].
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct EcFlags: u8 {
        /// Virtual CPU instead of a host thread.
        const GUEST = 1 << 0;
        /// Give the Ec an FPU save area.
        const FPU = 1 << 1;
    }
}

pub struct Ec {
    refcount: RefCount,
    cpu: CpuId,
    kind: Kind,
    cont: SpinLock<Cont>,
    regs: SpinLock<Regs>,
    fpu: Option<SpinLock<SlabBox<FpuState>>>,

    obj: Option<Refptr<SpaceObj>>,
    hst: Option<Refptr<SpaceHst>>,
    pio: Option<Refptr<SpacePio>>,
    gst: SpinLock<Option<Refptr<SpaceGst>>>,

    caller: SpinLock<Weak<SlabBox<Ec>>>,
    callee: SpinLock<Option<Kref<Ec>>>,

    blocked: AtomicBool,
    /// Scheduling contexts parked on this Ec while it is blocked.
    waiters: SpinLock<VecDeque<Kref<Sc>>>,
}

impl Ec {
    fn new(cpu: CpuId, kind: Kind, cont: Cont, regs: Regs) -> Self {
        Self {
            refcount: RefCount::new(),
            cpu,
            kind,
            cont: SpinLock::new(cont),
            regs: SpinLock::new(regs),
            fpu: None,
            obj: None,
            hst: None,
            pio: None,
            gst: SpinLock::new(None),
            caller: SpinLock::new(Weak::new()),
            callee: SpinLock::new(None),
            blocked: AtomicBool::new(false),
            waiters: SpinLock::new(VecDeque::new()),
        }
    }

    /// A kernel thread in the kernel's own spaces.
    pub(crate) fn kernel_thread(
        cpu: CpuId,
        cont: Cont,
        obj: Option<Refptr<SpaceObj>>,
        hst: Option<Refptr<SpaceHst>>,
    ) -> Self {
        Self {
            obj,
            hst,
            ..Self::new(cpu, Kind::Kernel, cont, Regs::default())
        }
    }

    /// A kernel thread on `cpu` that starts with `cont`.
    pub fn create(k: &Kernel, cpu: CpuId, cont: Cont) -> Result<Refptr<Self>> {
        k.check_cpu(cpu)?;
        let ec = Self::kernel_thread(cpu, cont, Some(k.obj_nova().clone()), Some(k.hst_nova().clone()));
        let ec = kalloc(k.ec_cache(), ec)?;
        log::trace!("EC {:p} created (kernel, {cpu})", &**ec);
        Ok(Refptr::adopt(ec))
    }

    /// A host thread of `pd`. All space references are taken before
    /// anything is allocated; failing either step releases everything.
    pub fn create_hst(k: &Kernel, pd: &Kref<Pd>, fpu: bool, cpu: CpuId, evt: u64, sp: u64, hva: u64) -> Result<Refptr<Self>> {
        k.check_cpu(cpu)?;

        let (Some(obj), Some(hst), Some(pio)) = (pd.get_obj(), pd.get_hst(), pd.get_pio()) else {
            return Err(Status::Aborted);
        };

        let fpu = Self::fpu_area(pd, fpu)?;
        let regs = Regs { ip: 0, sp, evt, hva };
        let ec = kalloc(
            k.ec_cache(),
            Self {
                fpu,
                obj: Some(obj),
                hst: Some(hst),
                pio: Some(pio),
                ..Self::new(cpu, Kind::Host, Cont::RetUserException, regs)
            },
        )?;

        log::trace!("EC {:p} created (host, {cpu})", &**ec);
        Ok(Refptr::adopt(ec))
    }

    /// A virtual CPU of `pd`. Its guest space is bound later with
    /// [`Ec::bind_gst`].
    pub fn create_gst(k: &Kernel, pd: &Kref<Pd>, fpu: bool, cpu: CpuId, evt: u64, sp: u64, hva: u64) -> Result<Refptr<Self>> {
        k.check_cpu(cpu)?;

        let (Some(obj), Some(hst)) = (pd.get_obj(), pd.get_hst()) else {
            return Err(Status::Aborted);
        };

        let fpu = Self::fpu_area(pd, fpu)?;
        let regs = Regs { ip: 0, sp, evt, hva };
        let ec = kalloc(
            k.ec_cache(),
            Self {
                fpu,
                obj: Some(obj),
                hst: Some(hst),
                ..Self::new(cpu, Kind::Guest, Cont::RetUserException, regs)
            },
        )?;

        log::trace!("EC {:p} created (guest, {cpu})", &**ec);
        Ok(Refptr::adopt(ec))
    }

    fn fpu_area(pd: &Pd, wanted: bool) -> Result<Option<SpinLock<SlabBox<FpuState>>>> {
        if !wanted {
            return Ok(None);
        }
        let area = pd.fpu_cache.alloc(FpuState::new()).map_err(|_| Status::MemObj)?;
        Ok(Some(SpinLock::new(area)))
    }

    /// Bind the guest space a virtual CPU runs in.
    pub fn bind_gst(&self, gst: &Kref<SpaceGst>) -> Result<()> {
        if self.kind != Kind::Guest {
            return Err(Status::BadPar);
        }
        let gst = Refptr::acquire(gst).ok_or(Status::Aborted)?;
        *self.gst.lock() = Some(gst);
        Ok(())
    }

    #[must_use]
    pub const fn cpu(&self) -> CpuId {
        self.cpu
    }

    #[must_use]
    pub const fn kind(&self) -> Kind {
        self.kind
    }

    #[must_use]
    pub fn cont(&self) -> Cont {
        *self.cont.lock()
    }

    pub fn set_cont(&self, cont: Cont) {
        *self.cont.lock() = cont;
    }

    #[must_use]
    pub fn regs(&self) -> Regs {
        *self.regs.lock()
    }

    pub fn set_regs(&self, regs: Regs) {
        *self.regs.lock() = regs;
    }

    #[must_use]
    pub fn is_dead(&self) -> bool {
        self.cont() == Cont::Dead
    }

    #[must_use]
    pub fn blocked(&self) -> bool {
        self.blocked.load(Ordering::Acquire)
    }

    #[must_use]
    pub const fn has_fpu(&self) -> bool {
        self.fpu.is_some()
    }

    #[must_use]
    pub fn obj(&self) -> Option<&Refptr<SpaceObj>> {
        self.obj.as_ref()
    }

    #[must_use]
    pub fn hst(&self) -> Option<&Refptr<SpaceHst>> {
        self.hst.as_ref()
    }

    #[must_use]
    pub fn pio(&self) -> Option<&Refptr<SpacePio>> {
        self.pio.as_ref()
    }

    /// Whether this Ec runs in `hst`.
    #[must_use]
    pub fn runs_hst(&self, hst: &SpaceHst) -> bool {
        self.hst.as_ref().is_some_and(|h| h.ptr_eq(hst))
    }

    /// Whether this Ec runs in `gst`.
    #[must_use]
    pub fn runs_gst(&self, gst: &SpaceGst) -> bool {
        self.gst.lock().as_ref().is_some_and(|g| g.ptr_eq(gst))
    }

    #[must_use]
    pub fn callee(&self) -> Option<Kref<Self>> {
        self.callee.lock().clone()
    }

    #[must_use]
    pub fn caller(&self) -> Option<Kref<Self>> {
        self.caller.lock().upgrade()
    }

    /// Number of scheduling contexts parked on this Ec.
    #[must_use]
    pub fn waiters(&self) -> usize {
        self.waiters.lock().len()
    }

    /// Run the end of the donation chain starting at `ec` on the current Sc.
    ///
    /// Records the chain depth in the CPU's donation counter. Returns
    /// `false` without switching if that Ec is dead.
    pub fn activate(ec: &Kref<Self>, k: &Kernel, cpu: CpuId) -> bool {
        let c = k.cpu(cpu);

        let mut e = ec.clone();
        let mut depth = 0;
        while let Some(next) = e.callee() {
            depth += 1;
            e = next;
        }
        c.set_donations(depth);

        if e.is_dead() {
            log::trace!("EC {:p} is dead, not activated", &**e);
            return false;
        }

        if e.blocked() && Self::block_sc(&e, k, cpu) {
            return true;
        }

        Self::make_current(&e, k, cpu);
        true
    }

    /// Park the current Sc on `ec` if it is still blocked, then reschedule.
    fn block_sc(ec: &Kref<Self>, k: &Kernel, cpu: CpuId) -> bool {
        {
            let mut w = ec.waiters.lock();
            if !ec.blocked() {
                return false;
            }
            w.push_back(k.cpu(cpu).current_sc());
        }

        Sc::schedule(k, cpu, true);
        true
    }

    /// Make `ec` the running Ec of `cpu`.
    pub fn make_current(ec: &Kref<Self>, k: &Kernel, cpu: CpuId) {
        let c = k.cpu(cpu);

        if !c.is_fpu_owner(ec) {
            k.platform().fpu_disable(cpu);
            c.clear_hazard(crate::cpu::Hazard::FPU);
        }

        if let Some(hst) = &ec.hst {
            hst.make_current(k, cpu);
        }

        if let Some(gst) = ec.gst.lock().as_ref() {
            gst.flush_stale(k, cpu);
        }

        c.set_current_ec(ec.clone());
        log::trace!("{cpu}: switch to EC {:p} ({:?})", &**ec, ec.cont());
        k.platform().load_context(cpu, &ec.regs.lock());
    }

    /// Lend the current Sc to `target` until it blocks, replies or is
    /// preempted. The current Ec continues with `cont` afterwards.
    ///
    /// Reschedules only when activation did not switch, since a successful
    /// activation already committed to the chain's end.
    pub fn help(k: &Kernel, cpu: CpuId, target: &Kref<Self>, cont: Cont) {
        if target.is_dead() {
            return;
        }

        let c = k.cpu(cpu);
        c.current_ec().set_cont(cont);

        if c.hazard().contains(crate::cpu::Hazard::SCHED) {
            Sc::schedule(k, cpu, false);
            return;
        }

        c.count_help();

        if !Self::activate(target, k, cpu) {
            Sc::schedule(k, cpu, true);
        }
    }

    /// Call `callee` from the current Ec, donating the current Sc. A callee
    /// that is already serving another call is helped instead.
    pub fn call(k: &Kernel, cpu: CpuId, callee: &Kref<Self>, cont: Cont) -> Result<()> {
        if callee.is_dead() {
            return Err(Status::Aborted);
        }

        if callee.caller().is_some() {
            Self::help(k, cpu, callee, cont);
            return Ok(());
        }

        let cur = k.cpu(cpu).current_ec();
        if Arc::ptr_eq(&cur, callee) {
            return Err(Status::BadPar);
        }

        cur.set_cont(cont);
        *callee.caller.lock() = Arc::downgrade(&cur);
        *cur.callee.lock() = Some(callee.clone());

        Self::activate(callee, k, cpu);
        Ok(())
    }

    /// Finish the current call: unlink from the caller and resume it, or
    /// reschedule if there is none. The current Ec continues with `cont`.
    pub fn reply(k: &Kernel, cpu: CpuId, cont: Cont) {
        let cur = k.cpu(cpu).current_ec();
        cur.set_cont(cont);

        let caller = core::mem::take(&mut *cur.caller.lock()).upgrade();
        if let Some(caller) = caller {
            caller.callee.lock().take();
            Self::make_current(&caller, k, cpu);
            return;
        }

        Sc::schedule(k, cpu, true);
    }

    /// Terminate the current Ec. A caller waiting in a hypercall sees it
    /// fail with `Aborted`; any other caller dies as well.
    pub fn kill(k: &Kernel, cpu: CpuId, reason: &str) {
        let cur = k.cpu(cpu).current_ec();
        log::trace!("EC {:p} killed: {reason}", &**cur);

        if let Some(caller) = cur.caller() {
            let mut cc = caller.cont.lock();
            *cc = if *cc == Cont::RetUserHypercall {
                Cont::SysFinish(Status::Aborted)
            } else {
                Cont::Dead
            };
        }

        Self::reply(k, cpu, Cont::Dead);
    }

    /// Mark `ec` blocked. If it is running on `cpu`, its Sc is parked on it
    /// and the CPU reschedules.
    pub fn block(ec: &Kref<Self>, k: &Kernel, cpu: CpuId) {
        ec.blocked.store(true, Ordering::Release);

        if Arc::ptr_eq(&k.cpu(cpu).current_ec(), ec) {
            Self::block_sc(ec, k, cpu);
        }
    }

    /// Clear the blocked state and make every parked Sc runnable again.
    pub fn unblock(&self, k: &Kernel, cpu: CpuId) {
        let parked = {
            let mut w = self.waiters.lock();
            self.blocked.store(false, Ordering::Release);
            core::mem::take(&mut *w)
        };

        for sc in parked {
            Sc::remote_enqueue(&sc, k, cpu);
        }
    }

    /// Give the FPU of `cpu` to `ec` (or to nobody), saving the previous
    /// owner's state. `false` if `ec` has no save area.
    pub fn switch_fpu(k: &Kernel, cpu: CpuId, ec: Option<&Kref<Self>>) -> bool {
        let c = k.cpu(cpu);

        if let Some(ec) = ec {
            assert!(!c.is_fpu_owner(ec), "EC {:p} already owns the FPU", &***ec);
            assert!(!c.hazard().contains(crate::cpu::Hazard::FPU), "FPU enabled on {cpu}");

            if !ec.has_fpu() {
                return false;
            }
        }

        k.platform().fpu_enable(cpu);
        c.set_hazard(crate::cpu::Hazard::FPU);

        let prev = c.replace_fpu_owner(ec.cloned());
        if let Some(area) = prev.as_ref().and_then(|p| p.fpu.as_ref()) {
            k.platform().fpu_save(cpu, &mut area.lock());
        }
        if let Some(area) = ec.and_then(|e| e.fpu.as_ref()) {
            k.platform().fpu_load(cpu, &area.lock());
        }

        true
    }

    /// First FPU use of the current Ec on `cpu`.
    pub fn fpu_trap(k: &Kernel, cpu: CpuId) {
        let cur = k.cpu(cpu).current_ec();
        if !Self::switch_fpu(k, cpu, Some(&cur)) {
            Self::kill(k, cpu, "FPU access");
        }
    }
}

impl Kobject for Ec {
    fn refcount(&self) -> &RefCount {
        &self.refcount
    }

    fn collect(&self) {
        log::trace!("EC {:p} collected", self);
    }
}

//! # The kernel context
//!
//! Everything that is a global in a classic kernel hangs off [`Kernel`]: the
//! platform, the frame pool, RCU, the per-CPU state, the global object caches
//! and the kernel's own ("nova") spaces. Kernel paths receive it explicitly
//! together with the id of the executing CPU.
//!
//! ```text
//!   Kernel
//!   ├── platform, pool, rcu
//!   ├── cpus: PerCpu<Cpu>       idle Ec/Sc, ready queue, CPU-local Hptp
//!   ├── pd / ec / sc caches
//!   ├── hst_nova                master copy of the global area
//!   ├── dma_nova, obj_nova
//!   └── smmus
//! ```

use crate::capability::Capability;
use crate::cpu::{Cpu, Hazard};
use crate::ec::{Cont, Ec, EcFlags};
use crate::kobject::{Kref, Refptr, kalloc};
use crate::pd::Pd;
use crate::platform::{CpuTlb, Platform};
use crate::sc::Sc;
use crate::smmu::Smmu;
use crate::space::{MemSpace, SpaceDma, SpaceHst, SpaceObj, root};
use crate::status::{Result, Status};
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::ops::Range;
use kernel_alloc::SlabCache;
use kernel_info::config::{DEFAULT_PRIO, DEFAULT_QUANTUM, KOBJ_SLOTS, MAX_CPUS};
use kernel_rcu::Rcu;
use kernel_sync::{CpuId, PerCpu, SpinLock};
use kernel_vmem::info::{LINK_ADDR, MMAP_CPU};
use kernel_vmem::{FramePool, Hptp, IAddr, Memattr, Permissions, RemapWindow};

pub struct Kernel {
    platform: Arc<dyn Platform>,
    pool: Arc<dyn FramePool>,
    rcu: Rcu,
    cpus: PerCpu<Cpu>,

    pd_cache: SlabCache<Pd>,
    ec_cache: SlabCache<Ec>,
    sc_cache: SlabCache<Sc>,

    hst_nova: Refptr<SpaceHst>,
    dma_nova: Refptr<SpaceDma>,
    obj_nova: Refptr<SpaceObj>,

    smmus: SpinLock<Vec<Arc<Smmu>>>,
}

impl Kernel {
    /// Bring up the kernel spaces and the state of `ncpus` CPUs, each
    /// running its idle Ec.
    pub fn new(platform: Arc<dyn Platform>, pool: Arc<dyn FramePool>, ncpus: usize) -> Result<Self> {
        if ncpus == 0 || ncpus > MAX_CPUS {
            return Err(Status::BadCpu);
        }

        let hst_nova = Refptr::adopt(kalloc(&SlabCache::new("hst_nova", 1), SpaceHst::nova(pool.clone()))?);
        let dma_nova = Refptr::adopt(kalloc(&SlabCache::new("dma_nova", 1), SpaceDma::nova(pool.clone()))?);
        let obj_nova = Refptr::adopt(kalloc(&SlabCache::new("obj_nova", 1), SpaceObj::nova(pool.clone()))?);

        hst_nova.hptp().root_init().ok_or(Status::MemObj)?;
        dma_nova.ptab().root_init().ok_or(Status::MemObj)?;
        obj_nova.root_init().ok_or(Status::MemObj)?;

        let ec_cache = SlabCache::new("ec", KOBJ_SLOTS);
        let sc_cache = SlabCache::new("sc", KOBJ_SLOTS);

        let cpus = (0..ncpus)
            .map(|i| {
                let id = CpuId::new(u16::try_from(i).map_err(|_| Status::BadCpu)?);

                let idle = Ec::kernel_thread(id, Cont::Idle, Some(obj_nova.clone()), Some(hst_nova.clone()));
                let idle_ec = kalloc(&ec_cache, idle)?;
                let idle_sc = kalloc(&sc_cache, Sc::new(Refptr::adopt(idle_ec.clone()), id, u64::MAX, 0))?;

                let hptp = Hptp::new(pool.clone());
                hptp.root_init().ok_or(Status::MemObj)?;
                hptp.share_from_master(hst_nova.hptp(), LINK_ADDR, MMAP_CPU);

                Ok(Cpu::new(id, idle_ec, idle_sc, hptp))
            })
            .collect::<Result<PerCpu<Cpu>>>()?;

        log::debug!("kernel: {ncpus} CPUs up");

        Ok(Self {
            rcu: Rcu::new(ncpus),
            cpus,
            pd_cache: SlabCache::new("pd", KOBJ_SLOTS),
            ec_cache,
            sc_cache,
            hst_nova,
            dma_nova,
            obj_nova,
            smmus: SpinLock::new(Vec::new()),
            platform,
            pool,
        })
    }

    /// Create the root protection domain with its object, host and port
    /// spaces and a runnable Ec on `cpu`, and publish them at the [`root`]
    /// selectors.
    pub fn create_root(&self, cpu: CpuId) -> Result<Kref<Pd>> {
        self.check_cpu(cpu)?;

        let pd = Pd::create_pd(self, &self.obj_nova, root::PD, Capability::ALL)?;
        let obj = Pd::create_obj(&pd, self, &self.obj_nova, root::OBJ)?;
        Pd::create_hst(&pd, self, &obj, root::HST)?;
        Pd::create_pio(&pd, &obj, root::PIO)?;

        let ec = Pd::create_ec(self, &obj, root::EC, &pd, cpu, 0, 0, 0, EcFlags::FPU)?;
        let sc = Pd::create_sc(self, &obj, root::SC, &ec, cpu, DEFAULT_QUANTUM, DEFAULT_PRIO)?;

        log::debug!("root PD {:p} on {cpu}", &**pd);
        Sc::remote_enqueue(&sc, self, cpu);
        Ok(pd)
    }

    #[must_use]
    pub fn platform(&self) -> &dyn Platform {
        &*self.platform
    }

    #[must_use]
    pub fn platform_arc(&self) -> Arc<dyn Platform> {
        self.platform.clone()
    }

    #[must_use]
    pub const fn pool(&self) -> &Arc<dyn FramePool> {
        &self.pool
    }

    #[must_use]
    pub const fn rcu(&self) -> &Rcu {
        &self.rcu
    }

    #[must_use]
    pub fn cpu(&self, id: CpuId) -> &Cpu {
        &self.cpus[id]
    }

    #[must_use]
    pub const fn cpus(&self) -> &PerCpu<Cpu> {
        &self.cpus
    }

    #[must_use]
    pub fn cpu_count(&self) -> usize {
        self.cpus.len()
    }

    pub fn check_cpu(&self, cpu: CpuId) -> Result<()> {
        if cpu.as_usize() < self.cpus.len() {
            Ok(())
        } else {
            Err(Status::BadCpu)
        }
    }

    #[must_use]
    pub const fn pd_cache(&self) -> &SlabCache<Pd> {
        &self.pd_cache
    }

    #[must_use]
    pub const fn ec_cache(&self) -> &SlabCache<Ec> {
        &self.ec_cache
    }

    #[must_use]
    pub const fn sc_cache(&self) -> &SlabCache<Sc> {
        &self.sc_cache
    }

    #[must_use]
    pub const fn hst_nova(&self) -> &Refptr<SpaceHst> {
        &self.hst_nova
    }

    #[must_use]
    pub const fn dma_nova(&self) -> &Refptr<SpaceDma> {
        &self.dma_nova
    }

    #[must_use]
    pub const fn obj_nova(&self) -> &Refptr<SpaceObj> {
        &self.obj_nova
    }

    /// Snapshot of the registered SMMUs.
    #[must_use]
    pub fn smmus(&self) -> Vec<Arc<Smmu>> {
        self.smmus.lock().clone()
    }

    pub(crate) fn register_smmu(&self, smmu: Arc<Smmu>) {
        self.smmus.lock().push(smmu);
    }

    /// Map `[phys, phys + size)` into a remap window of `cpu`.
    pub fn map_tmp(
        &self,
        cpu: CpuId,
        phys: u64,
        size: u64,
        pm: Permissions,
        ma: Memattr,
        w: RemapWindow,
    ) -> Option<IAddr> {
        let tlb = CpuTlb::new(self.platform(), cpu);
        self.cpu(cpu).hptp().map_tmp(&tlb, phys, size, pm, ma, w)
    }

    /// Let user mode read the console ring at `ring` through the kernel's
    /// host space.
    pub fn share_console(&self, Range { start, end }: Range<u64>) -> Result<()> {
        log::debug!("console ring at {start:#x}..{end:#x} shared");
        SpaceHst::access_ctrl(self, start, end - start, Permissions::R | Permissions::U)
    }

    /// Advance RCU on `cpu` and mirror its pending quiescent state into the
    /// RCU hazard.
    pub fn rcu_check(&self, cpu: CpuId) {
        self.rcu.check(cpu);
        if self.rcu.hazard(cpu) {
            self.cpu(cpu).set_hazard(Hazard::RCU);
        }
    }

    /// One pass of the idle loop of `cpu`.
    pub fn idle_step(&self, cpu: CpuId) {
        let c = self.cpu(cpu);

        self.rcu_check(cpu);
        if c.hazard().contains(Hazard::RCU) {
            c.clear_hazard(Hazard::RCU);
            self.rcu.quiet(cpu);
        }

        c.clear_hazard(Hazard::SLEEP);

        if c.hazard().contains(Hazard::SCHED) {
            Sc::schedule(self, cpu, false);
        } else {
            self.platform.halt(cpu);
        }
    }

    pub fn rrq_handler(&self, cpu: CpuId) {
        Sc::rrq_handler(self, cpu);
    }

    pub fn rke_handler(&self, cpu: CpuId) {
        Sc::rke_handler(self, cpu);
    }

    pub fn timer_tick(&self, cpu: CpuId) {
        Sc::timer_tick(self, cpu);
    }
}

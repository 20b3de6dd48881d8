//! In-memory platform for driving the core on the host.

#![allow(dead_code, clippy::cast_possible_truncation)]

use kernel_alloc::HeapFramePool;
use kernel_core::smmu::{SmmuRegs, reg};
use kernel_core::{FpuState, Hazard, Kernel, Platform, Regs, Request};
use kernel_sync::{Clock, CpuId};
use kernel_vmem::{IAddr, OAddr, Pcid, Vmid};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};

pub const TICKS_PER_MS: u64 = 1000;

/// Hardware of `n` CPUs. Time only moves when a test says so, or by `step`
/// ticks on every read once [`SimPlatform::auto_tick`] is set.
pub struct SimPlatform {
    now: AtomicU64,
    step: AtomicU64,
    kernel: OnceLock<Weak<Kernel>>,
    /// Remote CPUs acknowledge RKE IPIs right away.
    pub ack_rke: AtomicBool,

    pub ipis: Mutex<Vec<(CpuId, Request)>>,
    pub timers: Mutex<HashMap<CpuId, u64>>,
    pub halts: AtomicUsize,
    pub switches: AtomicUsize,
    pub hst_loads: Mutex<Vec<(CpuId, OAddr, Pcid)>>,
    pub gst_flushes: Mutex<Vec<(CpuId, Vmid)>>,
    pub tlb_flushes: AtomicUsize,

    /// FPU register file and enable bit of every CPU.
    pub fpu: Mutex<Vec<(bool, FpuState)>>,
}

impl SimPlatform {
    pub fn new(ncpus: usize) -> Self {
        Self {
            now: AtomicU64::new(0),
            step: AtomicU64::new(0),
            kernel: OnceLock::new(),
            ack_rke: AtomicBool::new(true),
            ipis: Mutex::new(Vec::new()),
            timers: Mutex::new(HashMap::new()),
            halts: AtomicUsize::new(0),
            switches: AtomicUsize::new(0),
            hst_loads: Mutex::new(Vec::new()),
            gst_flushes: Mutex::new(Vec::new()),
            tlb_flushes: AtomicUsize::new(0),
            fpu: Mutex::new(vec![(false, FpuState::new()); ncpus]),
        }
    }

    pub fn attach(&self, k: &Arc<Kernel>) {
        assert!(self.kernel.set(Arc::downgrade(k)).is_ok());
    }

    pub fn advance(&self, ticks: u64) {
        self.now.fetch_add(ticks, Ordering::SeqCst);
    }

    pub fn auto_tick(&self, step: u64) {
        self.step.store(step, Ordering::SeqCst);
    }

    pub fn ipis_to(&self, cpu: CpuId) -> Vec<Request> {
        self.ipis.lock().unwrap().iter().filter(|(c, _)| *c == cpu).map(|(_, r)| *r).collect()
    }

    pub fn fpu_regs(&self, cpu: CpuId) -> FpuState {
        self.fpu.lock().unwrap()[cpu.as_usize()].1.clone()
    }

    /// What the running Ec computes with the FPU.
    pub fn fpu_write(&self, cpu: CpuId, byte: u8) {
        let mut f = self.fpu.lock().unwrap();
        assert!(f[cpu.as_usize()].0, "FPU of {cpu:?} disabled");
        f[cpu.as_usize()].1.data = [byte; 512];
    }

    pub fn fpu_enabled(&self, cpu: CpuId) -> bool {
        self.fpu.lock().unwrap()[cpu.as_usize()].0
    }
}

impl Clock for SimPlatform {
    fn now(&self) -> u64 {
        let step = self.step.load(Ordering::SeqCst);
        self.now.fetch_add(step, Ordering::SeqCst)
    }

    fn ticks_per_ms(&self) -> u64 {
        TICKS_PER_MS
    }
}

impl Platform for SimPlatform {
    fn send_ipi(&self, cpu: CpuId, req: Request) {
        self.ipis.lock().unwrap().push((cpu, req));

        if req == Request::Rke && self.ack_rke.load(Ordering::SeqCst) {
            if let Some(k) = self.kernel.get().and_then(Weak::upgrade) {
                k.rke_handler(cpu);
            }
        }
    }

    fn set_timer(&self, cpu: CpuId, deadline: u64) {
        self.timers.lock().unwrap().insert(cpu, deadline);
    }

    fn halt(&self, _cpu: CpuId) {
        self.halts.fetch_add(1, Ordering::SeqCst);
    }

    fn fpu_enable(&self, cpu: CpuId) {
        self.fpu.lock().unwrap()[cpu.as_usize()].0 = true;
    }

    fn fpu_disable(&self, cpu: CpuId) {
        self.fpu.lock().unwrap()[cpu.as_usize()].0 = false;
    }

    fn fpu_save(&self, cpu: CpuId, area: &mut FpuState) {
        area.clone_from(&self.fpu.lock().unwrap()[cpu.as_usize()].1);
    }

    fn fpu_load(&self, cpu: CpuId, area: &FpuState) {
        self.fpu.lock().unwrap()[cpu.as_usize()].1 = area.clone();
    }

    fn load_hst(&self, cpu: CpuId, root: OAddr, pcid: Pcid) {
        self.hst_loads.lock().unwrap().push((cpu, root, pcid));
    }

    fn load_context(&self, _cpu: CpuId, _regs: &Regs) {
        self.switches.fetch_add(1, Ordering::SeqCst);
    }

    fn invalidate_page(&self, _cpu: CpuId, _va: IAddr) {
        self.tlb_flushes.fetch_add(1, Ordering::SeqCst);
    }

    fn invalidate_tlb(&self, _cpu: CpuId) {
        self.tlb_flushes.fetch_add(1, Ordering::SeqCst);
    }

    fn invalidate_gst(&self, cpu: CpuId, vmid: Vmid) {
        self.gst_flushes.lock().unwrap().push((cpu, vmid));
    }
}

pub fn boot(ncpus: usize) -> (Arc<SimPlatform>, Arc<HeapFramePool>, Arc<Kernel>) {
    let p = Arc::new(SimPlatform::new(ncpus));
    let pool = Arc::new(HeapFramePool::new(4096));
    let k = Arc::new(Kernel::new(p.clone(), pool.clone(), ncpus).unwrap());
    p.attach(&k);
    (p, pool, k)
}

/// Let every CPU pass enough quiescent states for all queued RCU callbacks
/// to run.
pub fn grace_period(k: &Kernel) {
    for _ in 0..4 {
        for cpu in k.cpus().ids() {
            k.rcu_check(cpu);
            let c = k.cpu(cpu);
            if c.hazard().contains(Hazard::RCU) {
                c.clear_hazard(Hazard::RCU);
                k.rcu().quiet(cpu);
            }
        }
    }
}

/// Register file of a remapping unit. Invalidations complete immediately
/// unless `stuck` is set; GCMD bits show up in GSTS.
pub struct FakeSmmu {
    pub regs: Mutex<HashMap<usize, u64>>,
    pub log: Mutex<Vec<(usize, u64)>>,
    pub stuck: AtomicBool,
}

impl FakeSmmu {
    /// CAP: 4-level SAGAW, fault records at 0x200, 4 of them. ECAP: IOTLB
    /// registers at 0x100.
    pub const CAP: u64 = 3 << 40 | 0x20 << 24 | 0b0_0100 << 8;
    pub const ECAP: u64 = 0x10 << 8;
    pub const IOTLB: usize = 0x100 + 8;
    pub const FRR: usize = 0x200;

    pub fn new() -> Arc<Self> {
        let mut regs = HashMap::new();
        regs.insert(reg::VER, 0x10);
        regs.insert(reg::CAP, Self::CAP);
        regs.insert(reg::ECAP, Self::ECAP);
        Arc::new(Self {
            regs: Mutex::new(regs),
            log: Mutex::new(Vec::new()),
            stuck: AtomicBool::new(false),
        })
    }

    pub fn get(&self, off: usize) -> u64 {
        self.regs.lock().unwrap().get(&off).copied().unwrap_or(0)
    }

    pub fn set(&self, off: usize, v: u64) {
        self.regs.lock().unwrap().insert(off, v);
    }

    pub fn writes_to(&self, off: usize) -> Vec<u64> {
        self.log.lock().unwrap().iter().filter(|(o, _)| *o == off).map(|(_, v)| *v).collect()
    }

    fn write(&self, off: usize, val: u64) {
        self.log.lock().unwrap().push((off, val));
        let mut r = self.regs.lock().unwrap();

        match off {
            reg::GCMD => {
                r.insert(reg::GSTS, val);
            }
            reg::FSTS => {
                let v = r.get(&off).copied().unwrap_or(0) & !(val & 0x7d);
                r.insert(off, v);
            }
            reg::CCMD | Self::IOTLB if !self.stuck.load(Ordering::SeqCst) => {
                r.insert(off, val & !(1 << 63));
            }
            o if o >= Self::FRR && (o - Self::FRR) % 16 == 8 => {
                let v = r.get(&off).copied().unwrap_or(0) & !(val & 1 << 63);
                r.insert(off, v);
            }
            _ => {
                r.insert(off, val);
            }
        }
    }
}

/// Hands the shared register file to the kernel.
pub struct Regfile(pub Arc<FakeSmmu>);

impl SmmuRegs for Regfile {
    fn read32(&self, off: usize) -> u32 {
        self.0.get(off) as u32
    }

    fn write32(&self, off: usize, val: u32) {
        self.0.write(off, u64::from(val));
    }

    fn read64(&self, off: usize) -> u64 {
        self.0.get(off)
    }

    fn write64(&self, off: usize, val: u64) {
        self.0.write(off, val);
    }
}

//! The hardware below the core.
//!
//! Everything architecture-specific (interrupt controller, timer, FPU
//! instructions, CR3/VMCS loads) sits behind [`Platform`]. The core calls it
//! with the executing CPU's id; implementations must only touch that CPU's
//! state unless the operation is explicitly cross-core (`send_ipi`).

use crate::ec::Regs;
use crate::fpu::FpuState;
use kernel_sync::{Clock, CpuId};
use kernel_vmem::{IAddr, LocalTlb, OAddr, Pcid, Vmid};

/// Inter-processor request.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Request {
    /// Remote ready-queue: drain the request queue.
    Rrq,
    /// Remote kernel entry: acknowledge a shootdown and reschedule.
    Rke,
}

pub trait Platform: Clock + Send + Sync {
    fn send_ipi(&self, cpu: CpuId, req: Request);

    /// Arm the one-shot budget timer of `cpu` for absolute time `deadline`.
    fn set_timer(&self, cpu: CpuId, deadline: u64);

    /// Wait for the next interrupt.
    fn halt(&self, cpu: CpuId);

    fn fpu_enable(&self, cpu: CpuId);
    fn fpu_disable(&self, cpu: CpuId);
    fn fpu_save(&self, cpu: CpuId, area: &mut FpuState);
    fn fpu_load(&self, cpu: CpuId, area: &FpuState);

    /// Switch the host translation root.
    fn load_hst(&self, cpu: CpuId, root: OAddr, pcid: Pcid);

    /// Load the register state the next return to user (or guest) uses.
    fn load_context(&self, cpu: CpuId, regs: &Regs);

    fn invalidate_page(&self, cpu: CpuId, va: IAddr);
    fn invalidate_tlb(&self, cpu: CpuId);

    /// Flush guest-physical translations tagged `vmid`.
    fn invalidate_gst(&self, cpu: CpuId, vmid: Vmid);
}

/// The host TLB of one CPU, for page-table code that flushes locally.
pub struct CpuTlb<'a> {
    platform: &'a dyn Platform,
    cpu: CpuId,
}

impl<'a> CpuTlb<'a> {
    #[must_use]
    pub const fn new(platform: &'a dyn Platform, cpu: CpuId) -> Self {
        Self { platform, cpu }
    }
}

impl LocalTlb for CpuTlb<'_> {
    fn invalidate_page(&self, va: IAddr) {
        self.platform.invalidate_page(self.cpu, va);
    }

    fn invalidate_all(&self) {
        self.platform.invalidate_tlb(self.cpu);
    }
}

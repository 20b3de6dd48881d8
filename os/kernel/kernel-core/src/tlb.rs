//! Cross-CPU TLB shootdown.
//!
//! After a space dropped translations, every CPU currently running in it
//! has to leave kernel mode once so it reloads the (possibly retired) root.
//! The local CPU just reschedules; remote CPUs get an RKE IPI and are waited
//! for by watching their acknowledgement counter.

use crate::cpu::Hazard;
use crate::kernel::Kernel;
use crate::platform::Request;
use crate::space::{SpaceGst, SpaceHst};
use kernel_info::config::SHOOTDOWN_TIMEOUT_MS;
use kernel_sync::{CpuId, wait_until};

/// The space whose translations went stale.
#[derive(Copy, Clone)]
pub enum Binding<'a> {
    Hst(&'a SpaceHst),
    Gst(&'a SpaceGst),
}

impl Binding<'_> {
    fn runs_on(self, k: &Kernel, cpu: CpuId) -> bool {
        let ec = k.cpu(cpu).current_ec();
        match self {
            Self::Hst(hst) => ec.runs_hst(hst),
            Self::Gst(gst) => ec.runs_gst(gst),
        }
    }
}

/// Interrupt every CPU running in `b`, from `cpu`. Returns how many remote
/// CPUs failed to acknowledge in time.
pub fn shootdown(k: &Kernel, cpu: CpuId, b: Binding<'_>) -> usize {
    let mut missed = 0;

    for c in k.cpus().ids() {
        if !b.runs_on(k, c) {
            continue;
        }

        if c == cpu {
            k.cpu(cpu).set_hazard(Hazard::SCHED);
            continue;
        }

        let remote = k.cpu(c);
        let seen = remote.rke_count();
        k.platform().send_ipi(c, Request::Rke);

        if !wait_until(k.platform(), SHOOTDOWN_TIMEOUT_MS, || remote.rke_count() != seen) {
            log::warn!("{cpu}: shootdown timed out waiting for {c}");
            missed += 1;
        }
    }

    missed
}

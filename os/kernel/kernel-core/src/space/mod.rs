//! # Spaces
//!
//! A space is one mapping table of a protection domain:
//!
//! | Space        | Indexed by          | Backing                        |
//! |--------------|---------------------|--------------------------------|
//! | [`SpaceHst`] | host virtual page   | [`Hptp`](kernel_vmem::Hptp)    |
//! | [`SpaceGst`] | guest physical page | `Ptab<Ept>`                    |
//! | [`SpaceDma`] | device address page | `Ptab<Dpt>`                    |
//! | [`SpacePio`] | I/O port            | permission bitmap              |
//! | [`SpaceMsr`] | MSR index           | read and write bitmaps         |
//! | [`SpaceObj`] | selector            | capability table               |
//!
//! Every space is created from a slab cache owned by its Pd and holds a
//! counted reference to that Pd, so the cache outlives every space carved
//! from it. Dropping the last handle returns the slot to that same cache.
//!
//! The three page-table backed kinds share [`MemSpace`]; their `sync`
//! differs in who has to be told about stale translations.

mod dma;
mod gst;
mod hst;
mod msr;
mod obj;
mod pio;

pub use dma::SpaceDma;
pub use gst::SpaceGst;
pub use hst::SpaceHst;
pub use msr::SpaceMsr;
pub use obj::{SpaceObj, root};
pub use pio::SpacePio;

use crate::kernel::Kernel;
use crate::status::Result;
use kernel_sync::CpuId;
use kernel_vmem::info::{PAGE_BITS, PAGE_SIZE};
use kernel_vmem::{IAddr, Mapping, Memattr, OAddr, Permissions, Ptab, PteFormat, align_down, align_up, aligned_order};

/// Operations of the page-table backed spaces.
pub trait MemSpace {
    type Format: PteFormat;

    fn ptab(&self) -> &Ptab<Self::Format>;

    /// Number of addressable base pages.
    #[must_use]
    fn selectors() -> u64
    where
        Self: Sized,
    {
        Ptab::<Self::Format>::selectors()
    }

    /// Largest order a single mapping can have.
    #[must_use]
    fn max_order() -> u32
    where
        Self: Sized,
    {
        Ptab::<Self::Format>::max_order()
    }

    fn lookup(&self, v: IAddr) -> Option<Mapping> {
        self.ptab().lookup(v)
    }

    /// Map (or with empty `pm`, unmap) `2^o` pages. Callers follow up with
    /// [`MemSpace::sync`] before relying on the old translations being gone.
    fn update(&self, v: IAddr, p: OAddr, o: u32, pm: Permissions, ma: Memattr) -> Result<()> {
        Ok(self.ptab().update(v, p, o, pm, ma)?)
    }

    /// Invalidate cached translations, then release superseded tables once
    /// a grace period has passed. `cpu` is the executing CPU.
    fn sync(&self, k: &Kernel, cpu: CpuId);
}

/// Hand the retired tables of `ptab` to RCU.
pub(crate) fn reclaim<F: PteFormat>(k: &Kernel, cpu: CpuId, ptab: &Ptab<F>) {
    let zombies = ptab.take_zombies();
    if zombies.is_empty() {
        return;
    }

    log::trace!("{} table frames retired", zombies.len());

    let pool = ptab.pool().clone();
    k.rcu().call(cpu, move || {
        for pa in zombies {
            pool.free_4k(pa);
        }
    });
}

/// Identity-map the pages covering `[phys, phys + size)` with the largest
/// blocks alignment permits.
pub(crate) fn identity_map<F: PteFormat>(ptab: &Ptab<F>, phys: u64, size: u64, pm: Permissions, ma: Memattr) -> Result<()> {
    let end = align_up(phys + size, PAGE_SIZE);
    let mut phys = align_down(phys, PAGE_SIZE);
    let mut size = end - phys;

    while size != 0 {
        let o = aligned_order(size, phys, phys);
        ptab.update(phys, phys, o - PAGE_BITS, pm, ma)?;
        size -= 1 << o;
        phys += 1 << o;
    }
    Ok(())
}

use crate::kernel::Kernel;
use crate::kobject::{Kobject, Kref, RefCount, Refptr, kalloc};
use crate::pd::Pd;
use crate::space::{MemSpace, reclaim};
use crate::status::{Result, Status};
use crate::tlb::{self, Binding};
use kernel_alloc::SlabCache;
use kernel_sync::{CpuId, CpuSet};
use kernel_vmem::{Ept, Ptab, Vmid};

/// Guest physical address space of a virtual machine.
pub struct SpaceGst {
    refcount: RefCount,
    pd: Refptr<Pd>,
    eptp: Ptab<Ept>,
    vmid: Vmid,
    /// CPUs whose guest TLB may still hold stale translations.
    gtlb: CpuSet,
}

impl SpaceGst {
    pub fn create(k: &Kernel, cache: &SlabCache<Self>, pd: &Kref<Pd>) -> Result<Refptr<Self>> {
        let pd = Refptr::acquire(pd).ok_or(Status::Aborted)?;

        let gst = kalloc(
            cache,
            Self {
                refcount: RefCount::new(),
                pd,
                eptp: Ptab::new(k.pool().clone()),
                vmid: Vmid::alloc(),
                gtlb: CpuSet::new(),
            },
        )?;

        gst.eptp.root_init().ok_or(Status::MemObj)?;

        log::trace!("GST {:p} created (VMID {:#x})", &**gst, gst.vmid.raw());
        Ok(Refptr::adopt(gst))
    }

    #[must_use]
    pub const fn pd(&self) -> &Refptr<Pd> {
        &self.pd
    }

    #[must_use]
    pub const fn vmid(&self) -> Vmid {
        self.vmid
    }

    /// Flush the guest TLB of `cpu` if a `sync` left it stale. Runs before
    /// every entry into a guest of this space.
    pub fn flush_stale(&self, k: &Kernel, cpu: CpuId) {
        if self.gtlb.chk_clr(cpu) {
            k.platform().invalidate_gst(cpu, self.vmid);
        }
    }

    #[must_use]
    pub fn is_stale(&self, cpu: CpuId) -> bool {
        self.gtlb.contains(cpu)
    }
}

impl Kobject for SpaceGst {
    fn refcount(&self) -> &RefCount {
        &self.refcount
    }

    fn collect(&self) {
        log::trace!("GST {:p} collected", self);
    }
}

impl MemSpace for SpaceGst {
    type Format = Ept;

    fn ptab(&self) -> &Ptab<Ept> {
        &self.eptp
    }

    fn sync(&self, k: &Kernel, cpu: CpuId) {
        self.gtlb.set_all(k.cpu_count());
        tlb::shootdown(k, cpu, Binding::Gst(self));
        reclaim(k, cpu, &self.eptp);
    }
}

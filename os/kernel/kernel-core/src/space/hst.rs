use crate::kernel::Kernel;
use crate::kobject::{Kobject, Kref, RefCount, Refptr, kalloc};
use crate::pd::Pd;
use crate::space::{MemSpace, identity_map, reclaim};
use crate::status::{Result, Status};
use crate::tlb::{self, Binding};
use alloc::sync::Arc;
use kernel_alloc::SlabCache;
use kernel_sync::{CpuId, CpuSet};
use kernel_vmem::info::{LINK_ADDR, MMAP_CPU};
use kernel_vmem::{FramePool, Hpt, Hptp, Memattr, Pcid, Permissions, Ptab};

/// Host virtual address space.
pub struct SpaceHst {
    refcount: RefCount,
    pd: Option<Refptr<Pd>>,
    hptp: Hptp,
    pcid: Pcid,
    /// CPUs that loaded this space at least once.
    cpus: CpuSet,
}

impl SpaceHst {
    /// The kernel's own instance; its table is the master copy of the
    /// global area.
    pub(crate) fn nova(pool: Arc<dyn FramePool>) -> Self {
        Self {
            refcount: RefCount::new(),
            pd: None,
            hptp: Hptp::new(pool),
            pcid: Pcid::alloc(),
            cpus: CpuSet::new(),
        }
    }

    pub fn create(k: &Kernel, cache: &SlabCache<Self>, pd: &Kref<Pd>) -> Result<Refptr<Self>> {
        let pd = Refptr::acquire(pd).ok_or(Status::Aborted)?;

        let hst = kalloc(
            cache,
            Self {
                refcount: RefCount::new(),
                pd: Some(pd),
                hptp: Hptp::new(k.pool().clone()),
                pcid: Pcid::alloc(),
                cpus: CpuSet::new(),
            },
        )?;

        hst.hptp.root_init().ok_or(Status::MemObj)?;
        hst.hptp.share_from_master(&k.hst_nova().hptp, LINK_ADDR, MMAP_CPU);

        log::trace!("HST {:p} created (PCID {:#x})", &**hst, hst.pcid.raw());
        Ok(Refptr::adopt(hst))
    }

    #[must_use]
    pub fn pd(&self) -> Option<&Refptr<Pd>> {
        self.pd.as_ref()
    }

    #[must_use]
    pub const fn pcid(&self) -> Pcid {
        self.pcid
    }

    #[must_use]
    pub const fn hptp(&self) -> &Hptp {
        &self.hptp
    }

    /// Whether `cpu` ever ran on this space.
    #[must_use]
    pub fn loaded_on(&self, cpu: CpuId) -> bool {
        self.cpus.contains(cpu)
    }

    pub fn make_current(&self, k: &Kernel, cpu: CpuId) {
        if let Some(root) = self.hptp.root() {
            self.cpus.set(cpu);
            k.platform().load_hst(cpu, root, self.pcid);
        }
    }

    /// Set the kernel's own access to `[phys, phys + size)`; an empty `perm`
    /// removes it.
    pub fn access_ctrl(k: &Kernel, phys: u64, size: u64, perm: Permissions) -> Result<()> {
        identity_map(&k.hst_nova().hptp, phys, size, perm, Memattr::dev())
    }
}

impl Kobject for SpaceHst {
    fn refcount(&self) -> &RefCount {
        &self.refcount
    }

    fn collect(&self) {
        log::trace!("HST {:p} collected", self);
    }
}

impl MemSpace for SpaceHst {
    type Format = Hpt;

    fn ptab(&self) -> &Ptab<Hpt> {
        &self.hptp
    }

    fn sync(&self, k: &Kernel, cpu: CpuId) {
        tlb::shootdown(k, cpu, Binding::Hst(self));
        reclaim(k, cpu, &self.hptp);
    }
}

use crate::kernel::Kernel;
use crate::kobject::{Kobject, Kref, RefCount, Refptr, kalloc};
use crate::pd::Pd;
use crate::space::{MemSpace, identity_map, reclaim};
use crate::status::{Result, Status};
use alloc::sync::Arc;
use kernel_alloc::SlabCache;
use kernel_sync::CpuId;
use kernel_vmem::{Dpt, FramePool, Memattr, OAddr, Permissions, Ptab, Sdid};

/// Device address space, translated by the SMMUs.
pub struct SpaceDma {
    refcount: RefCount,
    pd: Option<Refptr<Pd>>,
    dptp: Ptab<Dpt>,
    sdid: Sdid,
}

impl SpaceDma {
    pub(crate) fn nova(pool: Arc<dyn FramePool>) -> Self {
        Self {
            refcount: RefCount::new(),
            pd: None,
            dptp: Ptab::new(pool),
            sdid: Sdid::alloc(),
        }
    }

    pub fn create(k: &Kernel, cache: &SlabCache<Self>, pd: &Kref<Pd>) -> Result<Refptr<Self>> {
        let pd = Refptr::acquire(pd).ok_or(Status::Aborted)?;

        let dma = kalloc(
            cache,
            Self {
                refcount: RefCount::new(),
                pd: Some(pd),
                dptp: Ptab::new(k.pool().clone()),
                sdid: Sdid::alloc(),
            },
        )?;

        dma.dptp.root_init().ok_or(Status::MemObj)?;

        log::trace!("DMA {:p} created (SDID {:#x})", &**dma, dma.sdid.raw());
        Ok(Refptr::adopt(dma))
    }

    #[must_use]
    pub fn pd(&self) -> Option<&Refptr<Pd>> {
        self.pd.as_ref()
    }

    #[must_use]
    pub const fn sdid(&self) -> Sdid {
        self.sdid
    }

    /// Root of the table as seen by a unit walking `levels` levels.
    #[must_use]
    pub fn root_for(&self, levels: u32) -> Option<OAddr> {
        self.dptp.root_for(levels)
    }

    /// Set device access to `[phys, phys + size)` in the kernel's DMA space.
    pub fn access_ctrl(k: &Kernel, phys: u64, size: u64, perm: Permissions) -> Result<()> {
        identity_map(&k.dma_nova().dptp, phys, size, perm, Memattr::ram())
    }
}

impl Kobject for SpaceDma {
    fn refcount(&self) -> &RefCount {
        &self.refcount
    }

    fn collect(&self) {
        log::trace!("DMA {:p} collected", self);
    }
}

impl MemSpace for SpaceDma {
    type Format = Dpt;

    fn ptab(&self) -> &Ptab<Dpt> {
        &self.dptp
    }

    fn sync(&self, k: &Kernel, cpu: CpuId) {
        for smmu in k.smmus() {
            smmu.invalidate_tlb_all(self.sdid);
        }
        reclaim(k, cpu, &self.dptp);
    }
}

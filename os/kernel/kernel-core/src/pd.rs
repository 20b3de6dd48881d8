//! Protection domains.
//!
//! A Pd is the unit of isolation: it binds at most one object, host and
//! port-I/O space (attached exclusively) plus any number of guest, DMA and
//! MSR spaces, and owns the slab caches all of them are carved from.
//!
//! The `create_*` factories create an object and publish a capability for it
//! in an object space. If publishing fails the object is destroyed again,
//! so a failed call leaves no trace.

use crate::capability::{Capability, Object};
use crate::ec::{Ec, EcFlags};
use crate::fpu::FpuState;
use crate::kernel::Kernel;
use crate::kobject::{Kobject, Kref, RefCount, Refptr, kalloc};
use crate::sc::Sc;
use crate::space::{SpaceDma, SpaceGst, SpaceHst, SpaceMsr, SpaceObj, SpacePio};
use crate::status::{Result, Status};
use alloc::sync::{Arc, Weak};
use core::sync::atomic::{AtomicU8, Ordering};
use kernel_alloc::{SlabBox, SlabCache};
use kernel_info::config::{PD_FPU_SLOTS, PD_SPACE_SLOTS};
use kernel_sync::{CpuId, SpinLock};

bitflags::bitflags! {
    /// Spaces a Pd can attach at most once.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct Subtype: u8 {
        const OBJ = 1 << 0;
        const HST = 1 << 1;
        const PIO = 1 << 2;
    }
}

pub struct Pd {
    refcount: RefCount,
    attached: AtomicU8,

    pub(crate) obj_cache: SlabCache<SpaceObj>,
    pub(crate) hst_cache: SlabCache<SpaceHst>,
    pub(crate) gst_cache: SlabCache<SpaceGst>,
    pub(crate) dma_cache: SlabCache<SpaceDma>,
    pub(crate) pio_cache: SlabCache<SpacePio>,
    pub(crate) msr_cache: SlabCache<SpaceMsr>,
    pub(crate) fpu_cache: SlabCache<FpuState>,

    // Weak: each space holds a reference to its Pd.
    space_obj: SpinLock<Weak<SlabBox<SpaceObj>>>,
    space_hst: SpinLock<Weak<SlabBox<SpaceHst>>>,
    space_pio: SpinLock<Weak<SlabBox<SpacePio>>>,
}

impl Pd {
    fn new() -> Self {
        Self {
            refcount: RefCount::new(),
            attached: AtomicU8::new(0),
            obj_cache: SlabCache::new("obj", PD_SPACE_SLOTS),
            hst_cache: SlabCache::new("hst", PD_SPACE_SLOTS),
            gst_cache: SlabCache::new("gst", PD_SPACE_SLOTS),
            dma_cache: SlabCache::new("dma", PD_SPACE_SLOTS),
            pio_cache: SlabCache::new("pio", PD_SPACE_SLOTS),
            msr_cache: SlabCache::new("msr", PD_SPACE_SLOTS),
            fpu_cache: SlabCache::new("fpu", PD_FPU_SLOTS),
            space_obj: SpinLock::new(Weak::new()),
            space_hst: SpinLock::new(Weak::new()),
            space_pio: SpinLock::new(Weak::new()),
        }
    }

    pub fn create(k: &Kernel) -> Result<Refptr<Self>> {
        let pd = kalloc(k.pd_cache(), Self::new())?;
        log::trace!("PD {:p} created", &**pd);
        Ok(Refptr::adopt(pd))
    }

    /// Claim `sub`; `false` if it is already attached.
    pub fn attach(&self, sub: Subtype) -> bool {
        self.attached.fetch_or(sub.bits(), Ordering::AcqRel) & sub.bits() == 0
    }

    pub fn detach(&self, sub: Subtype) {
        self.attached.fetch_and(!sub.bits(), Ordering::AcqRel);
    }

    #[must_use]
    pub fn attached(&self) -> Subtype {
        Subtype::from_bits_truncate(self.attached.load(Ordering::Acquire))
    }

    /// Cache the object spaces of this Pd are carved from.
    #[must_use]
    pub const fn obj_cache(&self) -> &SlabCache<SpaceObj> {
        &self.obj_cache
    }

    #[must_use]
    pub const fn hst_cache(&self) -> &SlabCache<SpaceHst> {
        &self.hst_cache
    }

    #[must_use]
    pub const fn gst_cache(&self) -> &SlabCache<SpaceGst> {
        &self.gst_cache
    }

    #[must_use]
    pub fn get_obj(&self) -> Option<Refptr<SpaceObj>> {
        Refptr::acquire(&self.space_obj.lock().upgrade()?)
    }

    #[must_use]
    pub fn get_hst(&self) -> Option<Refptr<SpaceHst>> {
        Refptr::acquire(&self.space_hst.lock().upgrade()?)
    }

    #[must_use]
    pub fn get_pio(&self) -> Option<Refptr<SpacePio>> {
        Refptr::acquire(&self.space_pio.lock().upgrade()?)
    }

    pub fn create_obj(pd: &Kref<Self>, k: &Kernel, obj: &SpaceObj, sel: u64) -> Result<Kref<SpaceObj>> {
        if !pd.attach(Subtype::OBJ) {
            return Err(Status::Aborted);
        }

        let r = SpaceObj::create(k, &pd.obj_cache, pd).and_then(|o| publish(obj, sel, o, Object::Obj, Capability::ALL));
        match r {
            Ok(o) => {
                *pd.space_obj.lock() = Arc::downgrade(&o);
                Ok(o)
            }
            Err(s) => {
                pd.detach(Subtype::OBJ);
                Err(s)
            }
        }
    }

    pub fn create_hst(pd: &Kref<Self>, k: &Kernel, obj: &SpaceObj, sel: u64) -> Result<Kref<SpaceHst>> {
        if !pd.attach(Subtype::HST) {
            return Err(Status::Aborted);
        }

        let r = SpaceHst::create(k, &pd.hst_cache, pd).and_then(|o| publish(obj, sel, o, Object::Hst, Capability::ALL));
        match r {
            Ok(o) => {
                *pd.space_hst.lock() = Arc::downgrade(&o);
                Ok(o)
            }
            Err(s) => {
                pd.detach(Subtype::HST);
                Err(s)
            }
        }
    }

    pub fn create_gst(pd: &Kref<Self>, k: &Kernel, obj: &SpaceObj, sel: u64) -> Result<Kref<SpaceGst>> {
        SpaceGst::create(k, &pd.gst_cache, pd).and_then(|o| publish(obj, sel, o, Object::Gst, Capability::ALL))
    }

    pub fn create_dma(pd: &Kref<Self>, k: &Kernel, obj: &SpaceObj, sel: u64) -> Result<Kref<SpaceDma>> {
        SpaceDma::create(k, &pd.dma_cache, pd).and_then(|o| publish(obj, sel, o, Object::Dma, Capability::ALL))
    }

    /// The first port-I/O space of a Pd becomes its attached one; later
    /// ones are free-standing.
    pub fn create_pio(pd: &Kref<Self>, obj: &SpaceObj, sel: u64) -> Result<Kref<SpacePio>> {
        let a = pd.attach(Subtype::PIO);

        let r = SpacePio::create(&pd.pio_cache, pd).and_then(|o| publish(obj, sel, o, Object::Pio, Capability::ALL));
        match r {
            Ok(o) => {
                if a {
                    *pd.space_pio.lock() = Arc::downgrade(&o);
                }
                Ok(o)
            }
            Err(s) => {
                if a {
                    pd.detach(Subtype::PIO);
                }
                Err(s)
            }
        }
    }

    pub fn create_msr(pd: &Kref<Self>, obj: &SpaceObj, sel: u64) -> Result<Kref<SpaceMsr>> {
        SpaceMsr::create(&pd.msr_cache, pd).and_then(|o| publish(obj, sel, o, Object::Msr, Capability::ALL))
    }

    pub fn create_pd(k: &Kernel, obj: &SpaceObj, sel: u64, perms: u8) -> Result<Kref<Self>> {
        Self::create(k).and_then(|o| publish(obj, sel, o, Object::Pd, perms))
    }

    /// Create an Ec bound to the spaces of `pd` and publish it at `sel`.
    #[allow(clippy::too_many_arguments)]
    pub fn create_ec(
        k: &Kernel,
        obj: &SpaceObj,
        sel: u64,
        pd: &Kref<Self>,
        cpu: CpuId,
        evt: u64,
        sp: u64,
        hva: u64,
        flags: EcFlags,
    ) -> Result<Kref<Ec>> {
        let fpu = flags.contains(EcFlags::FPU);
        let ec = if flags.contains(EcFlags::GUEST) {
            Ec::create_gst(k, pd, fpu, cpu, evt, sp, hva)
        } else {
            Ec::create_hst(k, pd, fpu, cpu, evt, sp, hva)
        };
        ec.and_then(|o| publish(obj, sel, o, Object::Ec, Capability::ALL))
    }

    pub fn create_sc(
        k: &Kernel,
        obj: &SpaceObj,
        sel: u64,
        ec: &Kref<Ec>,
        cpu: CpuId,
        budget: u64,
        prio: u8,
    ) -> Result<Kref<Sc>> {
        Sc::create(k, ec, cpu, budget, prio).and_then(|o| publish(obj, sel, o, Object::Sc, Capability::ALL))
    }
}

impl Kobject for Pd {
    fn refcount(&self) -> &RefCount {
        &self.refcount
    }

    fn collect(&self) {
        log::trace!("PD {:p} collected", self);
    }
}

/// Insert a capability for `o` at `sel` of `obj`. On failure the capability
/// and with it the last reference to `o` is dropped, destroying it.
fn publish<T: Kobject>(
    obj: &SpaceObj,
    sel: u64,
    o: Refptr<T>,
    wrap: fn(Refptr<T>) -> Object,
    perms: u8,
) -> Result<Kref<T>> {
    let k = o.kref().clone();
    obj.insert(sel, Capability::new(wrap(o), perms)).map(|()| k)
}

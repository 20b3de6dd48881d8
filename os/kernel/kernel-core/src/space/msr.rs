#![allow(clippy::cast_possible_truncation)]

use crate::kobject::{Kobject, Kref, RefCount, Refptr, kalloc};
use crate::pd::Pd;
use crate::status::{Result, Status};
use alloc::boxed::Box;
use alloc::vec;
use kernel_alloc::SlabCache;
use kernel_sync::SpinLock;
use kernel_vmem::Permissions;

/// MSRs per bitmap half: `0..0x2000` and `0xc000_0000..0xc000_2000`.
const HALF: u64 = 0x2000;
const HIGH_BASE: u32 = 0xc000_0000;

struct Bitmaps {
    read: Box<[u64]>,
    write: Box<[u64]>,
}

/// MSR permissions of virtual CPUs. Selectors index the two architectural
/// MSR ranges back to back; a set bit intercepts the access.
pub struct SpaceMsr {
    refcount: RefCount,
    pd: Refptr<Pd>,
    maps: SpinLock<Bitmaps>,
}

impl SpaceMsr {
    pub fn create(cache: &SlabCache<Self>, pd: &Kref<Pd>) -> Result<Refptr<Self>> {
        let pd = Refptr::acquire(pd).ok_or(Status::Aborted)?;

        let words = (Self::selectors() / 64) as usize;
        let msr = kalloc(
            cache,
            Self {
                refcount: RefCount::new(),
                pd,
                maps: SpinLock::new(Bitmaps {
                    read: vec![u64::MAX; words].into_boxed_slice(),
                    write: vec![u64::MAX; words].into_boxed_slice(),
                }),
            },
        )?;

        log::trace!("MSR {:p} created", &**msr);
        Ok(Refptr::adopt(msr))
    }

    #[must_use]
    pub const fn selectors() -> u64 {
        2 * HALF
    }

    #[must_use]
    pub const fn max_order() -> u32 {
        13
    }

    /// Selector of MSR `msr`, if it is covered by the bitmaps.
    #[must_use]
    pub const fn index(msr: u32) -> Option<u64> {
        if (msr as u64) < HALF {
            Some(msr as u64)
        } else if msr >= HIGH_BASE && ((msr - HIGH_BASE) as u64) < HALF {
            Some(HALF + (msr - HIGH_BASE) as u64)
        } else {
            None
        }
    }

    #[must_use]
    pub const fn pd(&self) -> &Refptr<Pd> {
        &self.pd
    }

    /// Set read (`R`) and write (`W`) pass-through for `2^o` selectors.
    pub fn update(&self, idx: u64, o: u32, pm: Permissions) -> Result<()> {
        if o > Self::max_order() || idx + (1 << o) > Self::selectors() {
            return Err(Status::BadPar);
        }

        let mut maps = self.maps.lock();
        for i in idx..idx + (1 << o) {
            let (w, b) = ((i / 64) as usize, 1u64 << (i % 64));
            set(&mut maps.read[w], b, pm.contains(Permissions::R));
            set(&mut maps.write[w], b, pm.contains(Permissions::W));
        }
        Ok(())
    }

    #[must_use]
    pub fn lookup(&self, idx: u64) -> Permissions {
        if idx >= Self::selectors() {
            return Permissions::empty();
        }

        let maps = self.maps.lock();
        let (w, b) = ((idx / 64) as usize, 1u64 << (idx % 64));
        let mut pm = Permissions::empty();
        pm.set(Permissions::R, maps.read[w] & b == 0);
        pm.set(Permissions::W, maps.write[w] & b == 0);
        pm
    }
}

/// Clear the intercept bit to allow.
fn set(word: &mut u64, bit: u64, allow: bool) {
    if allow {
        *word &= !bit;
    } else {
        *word |= bit;
    }
}

impl Kobject for SpaceMsr {
    fn refcount(&self) -> &RefCount {
        &self.refcount
    }

    fn collect(&self) {
        log::trace!("MSR {:p} collected", self);
    }
}

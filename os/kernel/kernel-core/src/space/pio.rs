#![allow(clippy::cast_possible_truncation)]

use crate::kobject::{Kobject, Kref, RefCount, Refptr, kalloc};
use crate::pd::Pd;
use crate::status::{Result, Status};
use alloc::boxed::Box;
use alloc::vec;
use kernel_alloc::SlabCache;
use kernel_sync::SpinLock;
use kernel_vmem::Permissions;

const PORTS: usize = 1 << 16;

/// Port I/O permissions. A set bit intercepts the port, as in the
/// hardware I/O bitmap.
pub struct SpacePio {
    refcount: RefCount,
    pd: Refptr<Pd>,
    bitmap: SpinLock<Box<[u64]>>,
}

impl SpacePio {
    pub fn create(cache: &SlabCache<Self>, pd: &Kref<Pd>) -> Result<Refptr<Self>> {
        let pd = Refptr::acquire(pd).ok_or(Status::Aborted)?;

        let pio = kalloc(
            cache,
            Self {
                refcount: RefCount::new(),
                pd,
                bitmap: SpinLock::new(vec![u64::MAX; PORTS / 64].into_boxed_slice()),
            },
        )?;

        log::trace!("PIO {:p} created", &**pio);
        Ok(Refptr::adopt(pio))
    }

    #[must_use]
    pub const fn selectors() -> u64 {
        PORTS as u64
    }

    #[must_use]
    pub const fn max_order() -> u32 {
        16
    }

    #[must_use]
    pub const fn pd(&self) -> &Refptr<Pd> {
        &self.pd
    }

    /// Grant (non-empty `pm`) or revoke the `2^o` ports starting at `port`.
    pub fn update(&self, port: u64, o: u32, pm: Permissions) -> Result<()> {
        if o > Self::max_order() || port + (1 << o) > Self::selectors() {
            return Err(Status::BadPar);
        }

        let mut bitmap = self.bitmap.lock();
        for p in port..port + (1 << o) {
            let (w, b) = ((p / 64) as usize, p % 64);
            if pm.is_empty() {
                bitmap[w] |= 1 << b;
            } else {
                bitmap[w] &= !(1 << b);
            }
        }
        Ok(())
    }

    /// Read and write access to `port`, or nothing.
    #[must_use]
    pub fn lookup(&self, port: u64) -> Permissions {
        if port >= Self::selectors() {
            return Permissions::empty();
        }
        if self.bitmap.lock()[(port / 64) as usize] & 1 << (port % 64) == 0 {
            Permissions::R | Permissions::W
        } else {
            Permissions::empty()
        }
    }
}

impl Kobject for SpacePio {
    fn refcount(&self) -> &RefCount {
        &self.refcount
    }

    fn collect(&self) {
        log::trace!("PIO {:p} collected", self);
    }
}

//! Reference-counted kernel objects.
//!
//! Every kernel object lives in a slab slot held by a [`Kref`]. The `Arc`
//! around the slot keeps the memory valid for anyone holding a pointer; the
//! object's own [`RefCount`] decides whether it is still *alive*. A
//! [`Refptr`] owns one logical reference and can only be taken while the
//! count is non-zero, so an object whose last capability went away cannot be
//! revived by a racing lookup.

use crate::status::{Result, Status};
use alloc::sync::Arc;
use core::fmt;
use core::ops::Deref;
use core::sync::atomic::{AtomicUsize, Ordering};
use kernel_alloc::{SlabBox, SlabCache};

/// Shared handle to a slab-resident object.
pub type Kref<T> = Arc<SlabBox<T>>;

/// Place `value` into `cache` and wrap it in a [`Kref`].
pub fn kalloc<T>(cache: &SlabCache<T>, value: T) -> Result<Kref<T>> {
    cache.alloc(value).map(Arc::new).map_err(|_| Status::MemObj)
}

/// Logical reference count; starts at one, owned by the creator.
#[derive(Debug)]
pub struct RefCount(AtomicUsize);

impl RefCount {
    #[must_use]
    pub const fn new() -> Self {
        Self(AtomicUsize::new(1))
    }

    /// Take a reference unless the count already reached zero.
    pub fn acquire(&self) -> bool {
        self.0
            .fetch_update(Ordering::Acquire, Ordering::Relaxed, |n| (n != 0).then_some(n + 1))
            .is_ok()
    }

    /// Drop a reference; `true` for the one that reached zero.
    pub fn release(&self) -> bool {
        let n = self.0.fetch_sub(1, Ordering::AcqRel);
        assert_ne!(n, 0, "reference count underflow");
        n == 1
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.0.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_dead(&self) -> bool {
        self.count() == 0
    }
}

impl Default for RefCount {
    fn default() -> Self {
        Self::new()
    }
}

pub trait Kobject: Send + Sync {
    fn refcount(&self) -> &RefCount;

    /// Runs once, when the last reference is released.
    fn collect(&self) {}
}

impl<T: Kobject> Kobject for SlabBox<T> {
    fn refcount(&self) -> &RefCount {
        (**self).refcount()
    }

    fn collect(&self) {
        (**self).collect();
    }
}

/// One counted reference to a live `T`.
pub struct Refptr<T: Kobject>(Kref<T>);

impl<T: Kobject> Refptr<T> {
    /// Take a new reference; `None` if `obj` is already dead.
    #[must_use]
    pub fn acquire(obj: &Kref<T>) -> Option<Self> {
        obj.refcount().acquire().then(|| Self(obj.clone()))
    }

    /// Take over the creator's initial reference.
    pub(crate) fn adopt(obj: Kref<T>) -> Self {
        Self(obj)
    }

    #[must_use]
    pub fn kref(&self) -> &Kref<T> {
        &self.0
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &T) -> bool {
        core::ptr::eq(&**self, other)
    }
}

impl<T: Kobject> Clone for Refptr<T> {
    fn clone(&self) -> Self {
        // Holding `self` keeps the count above zero.
        let ok = self.0.refcount().acquire();
        debug_assert!(ok);
        Self(self.0.clone())
    }
}

impl<T: Kobject> Deref for Refptr<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T: Kobject> Drop for Refptr<T> {
    fn drop(&mut self) {
        if self.0.refcount().release() {
            self.0.collect();
        }
    }
}

impl<T: Kobject> fmt::Debug for Refptr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Refptr({:p}, {})", &**self, self.0.refcount().count())
    }
}

//! # Typed slab caches
//!
//! A [`SlabCache<T>`] is a fixed-capacity arena of `T` slots. Allocation hands
//! out a [`SlabBox<T>`], an owning handle that knows which cache its slot came
//! from and gives the slot back to exactly that cache when dropped.
//!
//! The arena stays alive while any handle does, so a handle can outlive the
//! [`SlabCache`] value it was allocated through.
//!
//! ```rust
//! use kernel_alloc::slab::SlabCache;
//!
//! let cache = SlabCache::new("demo", 2);
//! let a = cache.alloc(7_u32).unwrap();
//! let b = cache.alloc(8_u32).unwrap();
//! assert_eq!(cache.alloc(9_u32).err(), Some(9));
//!
//! assert_eq!(*a + *b, 15);
//! drop(a);
//! assert_eq!(cache.free_count(), 1);
//! assert!(b.is_from(&cache));
//! ```

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::cell::UnsafeCell;
use core::fmt;
use core::marker::PhantomData;
use core::mem::MaybeUninit;
use core::ops::{Deref, DerefMut};
use kernel_sync::SpinLock;

struct Slab<T> {
    name: &'static str,
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
    free: SpinLock<Vec<usize>>,
}

// SAFETY: a slot is only accessed through the unique `SlabBox` owning it;
// the free list is lock-protected.
unsafe impl<T: Send> Send for Slab<T> {}
unsafe impl<T: Send> Sync for Slab<T> {}

/// Fixed-capacity arena of `T`.
pub struct SlabCache<T> {
    slab: Arc<Slab<T>>,
}

impl<T> SlabCache<T> {
    #[must_use]
    pub fn new(name: &'static str, capacity: usize) -> Self {
        Self {
            slab: Arc::new(Slab {
                name,
                slots: (0..capacity).map(|_| UnsafeCell::new(MaybeUninit::uninit())).collect(),
                free: SpinLock::new((0..capacity).rev().collect()),
            }),
        }
    }

    /// Place `value` into a free slot, or hand it back if the cache is full.
    pub fn alloc(&self, value: T) -> Result<SlabBox<T>, T> {
        let Some(idx) = self.slab.free.lock().pop() else {
            log::trace!("slab {}: exhausted", self.slab.name);
            return Err(value);
        };

        // SAFETY: the index came off the free list, so nothing references it.
        unsafe { (*self.slab.slots[idx].get()).write(value) };

        Ok(SlabBox {
            slab: self.slab.clone(),
            idx,
            _owns: PhantomData,
        })
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.slab.name
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slab.slots.len()
    }

    #[must_use]
    pub fn free_count(&self) -> usize {
        self.slab.free.lock().len()
    }
}

impl<T> Clone for SlabCache<T> {
    fn clone(&self) -> Self {
        Self {
            slab: self.slab.clone(),
        }
    }
}

impl<T> fmt::Debug for SlabCache<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlabCache")
            .field("name", &self.slab.name)
            .field("capacity", &self.capacity())
            .field("free", &self.free_count())
            .finish()
    }
}

/// Owning handle to one slot of a [`SlabCache`].
pub struct SlabBox<T> {
    slab: Arc<Slab<T>>,
    idx: usize,
    _owns: PhantomData<T>,
}

impl<T> SlabBox<T> {
    /// The cache this slot returns to.
    #[must_use]
    pub fn origin(this: &Self) -> SlabCache<T> {
        SlabCache {
            slab: this.slab.clone(),
        }
    }

    #[must_use]
    pub fn is_from(&self, cache: &SlabCache<T>) -> bool {
        Arc::ptr_eq(&self.slab, &cache.slab)
    }
}

impl<T> Deref for SlabBox<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: initialized in `alloc`, dropped only in `Drop`.
        unsafe { (*self.slab.slots[self.idx].get()).assume_init_ref() }
    }
}

impl<T> DerefMut for SlabBox<T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: as above, and `&mut self` makes the access unique.
        unsafe { (*self.slab.slots[self.idx].get()).assume_init_mut() }
    }
}

impl<T> Drop for SlabBox<T> {
    fn drop(&mut self) {
        // SAFETY: the slot is initialized and this handle is its only owner.
        unsafe { (*self.slab.slots[self.idx].get()).assume_init_drop() };
        self.slab.free.lock().push(self.idx);
    }
}

impl<T: fmt::Debug> fmt::Debug for SlabBox<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

//! Physical frame pools.
//!
//! [`BitmapFramePool`] manages one physical range with one bit per 4 KiB
//! frame and reaches the frames through a [`DirectMap`]. Allocation and
//! release are lock-free: a frame is claimed by setting its bit with a CAS.
//!
//! [`HeapFramePool`] takes frames from the global allocator instead. Its
//! "physical" addresses are host addresses, which is what hosted runs and
//! tests of the page-table code want.

use crate::phys_mapper::DirectMap;
use alloc::alloc::{Layout, alloc_zeroed, dealloc};
use alloc::boxed::Box;
use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use kernel_info::memory::{PAGE_BITS, PAGE_SIZE};
use kernel_info::platform::PhysRange;
use kernel_vmem::{FrameAlloc, OAddr, PhysMapper};

const FRAME: Layout = match Layout::from_size_align(PAGE_SIZE as usize, PAGE_SIZE as usize) {
    Ok(l) => l,
    Err(_) => panic!("frame layout"),
};

/// Bitmap allocator over a fixed physical range.
pub struct BitmapFramePool {
    range: PhysRange,
    map: DirectMap,
    frames: usize,
    /// One bit per frame, set while allocated.
    bits: Box<[AtomicU64]>,
    /// Word to start the next scan at.
    hint: AtomicUsize,
    free: AtomicUsize,
}

impl BitmapFramePool {
    /// Manage the whole frames of `range`. `map` must cover the range.
    #[must_use]
    pub fn new(range: PhysRange, map: DirectMap) -> Self {
        let base = kernel_vmem::align_up(range.base, PAGE_SIZE);
        let end = kernel_vmem::align_down(range.end(), PAGE_SIZE);
        let frames = (end.saturating_sub(base) >> PAGE_BITS) as usize;

        log::debug!("frame pool {base:#x}..{end:#x}: {frames} frames");

        Self {
            range: PhysRange::new(base, end.saturating_sub(base)),
            map,
            frames,
            bits: (0..frames.div_ceil(64)).map(|_| AtomicU64::new(0)).collect(),
            hint: AtomicUsize::new(0),
            free: AtomicUsize::new(frames),
        }
    }

    #[must_use]
    pub const fn range(&self) -> PhysRange {
        self.range
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.frames
    }

    #[must_use]
    pub fn free_frames(&self) -> usize {
        self.free.load(Ordering::Relaxed)
    }

    /// Claim one frame, returning its index.
    fn claim(&self) -> Option<usize> {
        let words = self.bits.len();
        let start = self.hint.load(Ordering::Relaxed);

        for n in 0..words {
            let w = (start + n) % words;
            let word = &self.bits[w];
            let mut cur = word.load(Ordering::Relaxed);

            loop {
                let bit = (!cur).trailing_zeros() as usize;
                let idx = w * 64 + bit;
                if bit == 64 || idx >= self.frames {
                    break;
                }
                match word.compare_exchange_weak(cur, cur | 1 << bit, Ordering::Acquire, Ordering::Relaxed) {
                    Ok(_) => {
                        self.hint.store(w, Ordering::Relaxed);
                        return Some(idx);
                    }
                    Err(now) => cur = now,
                }
            }
        }

        None
    }
}

impl FrameAlloc for BitmapFramePool {
    fn alloc_4k(&self) -> Option<OAddr> {
        let idx = self.claim()?;
        self.free.fetch_sub(1, Ordering::Relaxed);
        Some(self.range.base + ((idx as u64) << PAGE_BITS))
    }

    fn free_4k(&self, pa: OAddr) {
        assert!(self.range.contains(pa), "frame {pa:#x} outside pool");
        let idx = ((pa - self.range.base) >> PAGE_BITS) as usize;
        let mask = 1u64 << (idx % 64);
        let old = self.bits[idx / 64].fetch_and(!mask, Ordering::Release);
        assert!(old & mask != 0, "double free of frame {pa:#x}");
        self.free.fetch_add(1, Ordering::Relaxed);
    }
}

impl PhysMapper for BitmapFramePool {
    #[inline]
    fn phys_to_ptr(&self, pa: OAddr) -> *mut u8 {
        self.map.phys_to_ptr(pa)
    }
}

/// Frames from the global allocator; physical address equals host address.
pub struct HeapFramePool {
    capacity: usize,
    allocated: AtomicUsize,
}

impl HeapFramePool {
    #[must_use]
    pub const fn new(capacity: usize) -> Self {
        Self {
            capacity,
            allocated: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }
}

impl FrameAlloc for HeapFramePool {
    fn alloc_4k(&self) -> Option<OAddr> {
        self.allocated
            .fetch_update(Ordering::AcqRel, Ordering::Relaxed, |n| (n < self.capacity).then_some(n + 1))
            .ok()?;

        // SAFETY: FRAME has non-zero size.
        let p = unsafe { alloc_zeroed(FRAME) };
        if p.is_null() {
            self.allocated.fetch_sub(1, Ordering::Relaxed);
            return None;
        }
        Some(p as OAddr)
    }

    fn free_4k(&self, pa: OAddr) {
        // SAFETY: `pa` came from `alloc_4k` with the same layout.
        unsafe { dealloc(pa as *mut u8, FRAME) };
        self.allocated.fetch_sub(1, Ordering::Relaxed);
    }
}

impl PhysMapper for HeapFramePool {
    #[inline]
    fn phys_to_ptr(&self, pa: OAddr) -> *mut u8 {
        pa as *mut u8
    }
}

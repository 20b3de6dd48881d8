//! Host-backed frames and a counting TLB for unit tests.

use crate::{FrameAlloc, IAddr, LocalTlb, OAddr, PhysMapper};
use std::alloc::{Layout, alloc_zeroed, dealloc};
use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

const FRAME: Layout = match Layout::from_size_align(4096, 4096) {
    Ok(l) => l,
    Err(_) => panic!("bad frame layout"),
};

/// Frames from the host heap; a physical address is the host address.
pub struct TestPool {
    capacity: usize,
    live: Mutex<HashSet<OAddr>>,
}

impl TestPool {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            live: Mutex::new(HashSet::new()),
        }
    }

    pub fn live(&self) -> usize {
        self.live.lock().unwrap().len()
    }
}

impl FrameAlloc for TestPool {
    fn alloc_4k(&self) -> Option<OAddr> {
        let mut live = self.live.lock().unwrap();
        if live.len() == self.capacity {
            return None;
        }
        let pa = unsafe { alloc_zeroed(FRAME) } as OAddr;
        assert_ne!(pa, 0);
        live.insert(pa);
        Some(pa)
    }

    fn free_4k(&self, pa: OAddr) {
        assert!(self.live.lock().unwrap().remove(&pa), "double free of {pa:#x}");
        unsafe { dealloc(pa as *mut u8, FRAME) };
    }
}

impl PhysMapper for TestPool {
    fn phys_to_ptr(&self, pa: OAddr) -> *mut u8 {
        pa as *mut u8
    }
}

impl Drop for TestPool {
    fn drop(&mut self) {
        for pa in self.live.get_mut().unwrap().drain() {
            unsafe { dealloc(pa as *mut u8, FRAME) };
        }
    }
}

#[derive(Default)]
pub struct CountingTlb {
    all: AtomicUsize,
    pages: AtomicUsize,
}

impl CountingTlb {
    pub fn flushes(&self) -> usize {
        self.all.load(Ordering::Relaxed)
    }

    pub fn pages(&self) -> usize {
        self.pages.load(Ordering::Relaxed)
    }
}

impl LocalTlb for CountingTlb {
    fn invalidate_page(&self, _va: IAddr) {
        self.pages.fetch_add(1, Ordering::Relaxed);
    }

    fn invalidate_all(&self) {
        self.all.fetch_add(1, Ordering::Relaxed);
    }
}

mod common;

use common::{SimPlatform, boot};
use kernel_alloc::HeapFramePool;
use kernel_console::Mbuf;
use kernel_core::space::{MemSpace, root};
use kernel_core::{Kernel, Status, Subtype};
use kernel_sync::CpuId;
use kernel_vmem::info::MMAP_TMP_RW0S;
use kernel_vmem::{Memattr, Permissions, RemapWindow};
use std::sync::Arc;
use std::sync::atomic::Ordering;

#[test]
fn cpu_count_is_checked() {
    let pool = Arc::new(HeapFramePool::new(64));
    let none = Kernel::new(Arc::new(SimPlatform::new(1)), pool.clone(), 0);
    assert_eq!(none.err(), Some(Status::BadCpu));

    let (_, _, k) = boot(2);
    assert_eq!(k.cpu_count(), 2);
    assert_eq!(k.check_cpu(CpuId::new(2)), Err(Status::BadCpu));
    assert_eq!(k.create_root(CpuId::new(2)).err(), Some(Status::BadCpu));
}

#[test]
fn every_cpu_starts_idle() {
    let (_, _, k) = boot(2);

    for (id, c) in k.cpus().iter() {
        assert_eq!(c.id(), id);
        assert!(c.is_idle(&c.current_sc()));
        assert_eq!(c.current_sc().cpu(), id);
        assert!(c.hptp().root().is_some());
    }
}

#[test]
fn root_domain_is_published() {
    let (_, _, k) = boot(1);
    let pd = k.create_root(CpuId::BSP).unwrap();
    assert_eq!(pd.attached(), Subtype::all());

    let nova = k.obj_nova();
    assert!(nova.lookup(root::PD).unwrap().pd().is_some());
    let obj = nova.lookup(root::OBJ).unwrap();
    let obj = obj.obj().unwrap();

    for (sel, kind) in [(root::HST, "hst"), (root::PIO, "pio"), (root::EC, "ec"), (root::SC, "sc")] {
        assert_eq!(obj.lookup(sel).unwrap().object().kind(), kind);
    }

    // The root Sc is ready and preempts the idle loop.
    assert_eq!(k.cpu(CpuId::BSP).ready_len(), 1);
    k.idle_step(CpuId::BSP);
    let ec = k.cpu(CpuId::BSP).current_ec();
    assert!(ec.has_fpu());
    assert!(ec.hst().is_some_and(|h| pd.get_hst().is_some_and(|r| h.ptr_eq(&r))));
}

#[test]
fn idle_loop_halts_without_work() {
    let (p, _, k) = boot(1);
    k.idle_step(CpuId::BSP);
    k.idle_step(CpuId::BSP);
    assert_eq!(p.halts.load(Ordering::SeqCst), 2);
    assert_eq!(p.switches.load(Ordering::SeqCst), 0);
}

#[test]
fn remap_window_maps_physical_range() {
    let (p, _, k) = boot(1);
    let rw = Permissions::R | Permissions::W;

    let va = k.map_tmp(CpuId::BSP, 0x1234_5678, 0x2000, rw, Memattr::ram(), RemapWindow::Rw0);
    assert_eq!(va, Some(MMAP_TMP_RW0S | 0x678));
    assert_eq!(p.tlb_flushes.load(Ordering::SeqCst), 1);

    let m = k.cpu(CpuId::BSP).hptp().lookup(MMAP_TMP_RW0S + 0x1000).unwrap();
    assert_eq!(m.phys, 0x1234_6000);
}

#[test]
fn console_ring_is_shared_read_only() {
    static RING: Mbuf<4096> = Mbuf::new();

    let (_, _, k) = boot(1);
    let ring = RING.region();
    k.share_console(ring.clone()).unwrap();

    let ro = Permissions::R | Permissions::U;
    for va in [ring.start, ring.start | 0xfff, ring.end - 1] {
        let m = k.hst_nova().lookup(va).unwrap();
        assert_eq!(m.phys, va);
        assert_eq!(m.perm, ro);
        assert_eq!(m.attr, Memattr::dev());
    }
    assert!(k.hst_nova().lookup((ring.end + 0xfff) & !0xfff).is_none());
}

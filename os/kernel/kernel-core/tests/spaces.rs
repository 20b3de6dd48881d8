mod common;

use common::{boot, grace_period};
use kernel_core::space::{MemSpace, SpaceDma, SpaceMsr, SpaceObj, SpacePio, root};
use kernel_core::{Capability, Kobject, Object, Pd, Refptr, Status, Subtype};
use kernel_sync::CpuId;
use kernel_vmem::{FrameAlloc, Memattr, Permissions};
use proptest::prelude::*;

const RW: Permissions = Permissions::R.union(Permissions::W);

#[test]
fn spaces_of_a_dead_pd_are_refused() {
    let (_, _, k) = boot(1);

    let pd = Pd::create(&k).unwrap();
    let kref = pd.kref().clone();
    drop(pd);
    assert!(kref.refcount().is_dead());

    assert_eq!(Pd::create_hst(&kref, &k, k.obj_nova(), 0x40).err(), Some(Status::Aborted));
    assert_eq!(Pd::create_gst(&kref, &k, k.obj_nova(), 0x41).err(), Some(Status::Aborted));
    assert!(kref.attached().is_empty());
    assert!(k.obj_nova().lookup(0x40).is_none());
}

#[test]
fn failed_table_allocation_undoes_attach() {
    let (_, pool, k) = boot(1);
    let pd = Pd::create(&k).unwrap();
    let free = pd.hst_cache().free_count();

    while pool.alloc_4k().is_some() {}

    assert_eq!(Pd::create_hst(pd.kref(), &k, k.obj_nova(), 0x40).err(), Some(Status::MemObj));
    assert!(!pd.attached().contains(Subtype::HST));
    assert_eq!(pd.refcount().count(), 1);
    assert_eq!(pd.hst_cache().free_count(), free);

    assert_eq!(Pd::create_obj(pd.kref(), &k, k.obj_nova(), 0x41).err(), Some(Status::MemObj));
    assert!(!pd.attached().contains(Subtype::OBJ));
    assert_eq!(pd.refcount().count(), 1);
    assert_eq!(pd.obj_cache().free_count(), pd.obj_cache().capacity());
}

#[test]
fn destroyed_space_returns_slot_to_its_pd() {
    let (_, _, k) = boot(1);
    let cpu = CpuId::BSP;
    let root = k.create_root(cpu).unwrap();
    let obj = root.get_obj().unwrap();

    let a = Pd::create_pd(&k, &obj, 0x20, Capability::ALL).unwrap();
    let b = Pd::create_pd(&k, &obj, 0x21, Capability::ALL).unwrap();
    let (fa, fb) = (a.gst_cache().free_count(), b.gst_cache().free_count());

    let gst = Pd::create_gst(&a, &k, &obj, 0x22).unwrap();
    assert!(gst.is_from(a.gst_cache()));
    assert!(!gst.is_from(b.gst_cache()));
    assert_eq!(a.gst_cache().free_count(), fa - 1);
    assert_eq!(b.gst_cache().free_count(), fb);

    drop(gst);
    assert!(obj.remove(&k, cpu, 0x22));
    assert_eq!(a.gst_cache().free_count(), fa - 1);

    grace_period(&k);
    assert_eq!(a.gst_cache().free_count(), fa);
    assert_eq!(b.gst_cache().free_count(), fb);
}

#[test]
fn pd_space_cache_is_bounded() {
    let (_, _, k) = boot(1);
    let pd = k.create_root(CpuId::BSP).unwrap();
    let obj = pd.get_obj().unwrap();

    for sel in 0x100..0x110 {
        Pd::create_gst(&pd, &k, &obj, sel).unwrap();
    }
    assert_eq!(Pd::create_gst(&pd, &k, &obj, 0x110).err(), Some(Status::MemObj));
}

#[test]
fn occupied_selector_destroys_new_object() {
    let (_, _, k) = boot(1);
    let pd = k.create_root(CpuId::BSP).unwrap();
    let obj = pd.get_obj().unwrap();

    let refs = pd.refcount().count();
    let caps = obj.len();

    assert_eq!(Pd::create_dma(&pd, &k, &obj, root::EC).err(), Some(Status::BadCap));
    assert_eq!(pd.refcount().count(), refs);
    assert_eq!(obj.len(), caps);
}

#[test]
fn exclusive_spaces_attach_once() {
    let (_, _, k) = boot(1);
    let pd = k.create_root(CpuId::BSP).unwrap();
    let obj = pd.get_obj().unwrap();
    assert_eq!(pd.attached(), Subtype::all());

    assert_eq!(Pd::create_obj(&pd, &k, &obj, 0x20).err(), Some(Status::Aborted));
    assert_eq!(Pd::create_hst(&pd, &k, &obj, 0x21).err(), Some(Status::Aborted));

    // A second port space is created but does not replace the first.
    let pio = Pd::create_pio(&pd, &obj, 0x22).unwrap();
    assert!(!pd.get_pio().unwrap().ptr_eq(&pio));
    assert_eq!(pd.attached(), Subtype::all());
}

#[test]
fn capabilities_delegate_and_remove() {
    let (_, _, k) = boot(1);
    let cpu = CpuId::BSP;
    let pd = k.create_root(cpu).unwrap();
    let obj = pd.get_obj().unwrap();

    let child = Pd::create_pd(&k, &obj, 0x20, Capability::ALL).unwrap();
    let cobj = Pd::create_obj(&child, &k, &obj, 0x21).unwrap();

    cobj.delegate(&obj, root::EC, 7, 0x3).unwrap();
    let cap = cobj.lookup(7).unwrap();
    assert_eq!(cap.object().kind(), "ec");
    assert_eq!(cap.perms(), 0x3);

    assert_eq!(cobj.delegate(&obj, root::EC, 8, 0x0).err(), Some(Status::BadCap));
    assert_eq!(cobj.delegate(&obj, 0x999, 8, 0x3).err(), Some(Status::BadCap));
    assert_eq!(cobj.delegate(&obj, root::SC, 7, 0x3).err(), Some(Status::BadCap));

    let Object::Ec(ec) = cap.object() else {
        panic!("{cap:?} is not an EC");
    };
    let ec = ec.kref().clone();
    drop(cap);
    let refs = ec.refcount().count();

    assert!(cobj.remove(&k, cpu, 7));
    assert!(!cobj.remove(&k, cpu, 7));
    assert!(cobj.lookup(7).is_none());

    // Still referenced until the grace period ends.
    assert_eq!(ec.refcount().count(), refs);
    grace_period(&k);
    assert_eq!(ec.refcount().count(), refs - 1);
}

#[test]
fn object_space_grows_one_table_at_a_time() {
    let (_, pool, k) = boot(1);
    let cpu = CpuId::BSP;
    let pd = k.create_root(cpu).unwrap();
    let obj = pd.get_obj().unwrap();
    let child = Pd::create_pd(&k, &obj, 0x20, Capability::ALL).unwrap();

    let frames = pool.allocated();
    let cobj = Pd::create_obj(&child, &k, &obj, 0x21).unwrap();
    assert_eq!(pool.allocated(), frames + 1);
    assert!(cobj.is_empty());

    cobj.delegate(&obj, root::EC, 7, 0x3).unwrap();
    cobj.delegate(&obj, root::SC, 8, 0x3).unwrap();
    assert_eq!(pool.allocated(), frames + 2);

    cobj.delegate(&obj, root::SC, 1 << 9, 0x3).unwrap();
    assert_eq!(pool.allocated(), frames + 3);
    assert_eq!(cobj.len(), 3);
    assert!(cobj.lookup(1 << 9 | 7).is_none());

    // The tables go with the space, after its last capability is gone.
    drop(cobj);
    assert!(obj.remove(&k, cpu, 0x21));
    grace_period(&k);
    assert_eq!(pool.allocated(), frames);
}

#[test]
fn insert_without_table_memory_fails() {
    let (_, pool, k) = boot(1);
    let pd = k.create_root(CpuId::BSP).unwrap();
    let obj = pd.get_obj().unwrap();

    while pool.alloc_4k().is_some() {}

    let cap = Capability::new(Object::Pd(Refptr::acquire(&pd).unwrap()), Capability::ALL);
    let refs = pd.refcount().count();
    assert_eq!(obj.insert(1 << 9, cap).err(), Some(Status::MemObj));
    assert_eq!(pd.refcount().count(), refs - 1);

    // Selectors in an existing leaf table need no memory.
    let cap = Capability::new(Object::Pd(Refptr::acquire(&pd).unwrap()), Capability::ALL);
    obj.insert(0x30, cap).unwrap();
    assert_eq!(obj.lookup(0x30).unwrap().object().kind(), "pd");
}

#[test]
fn selectors_are_bounded() {
    let (_, _, k) = boot(1);
    let pd = k.create_root(CpuId::BSP).unwrap();
    let obj = pd.get_obj().unwrap();

    let cap = Capability::new(Object::Pd(Refptr::acquire(&pd).unwrap()), Capability::ALL);
    let refs = pd.refcount().count();

    assert_eq!(SpaceObj::selectors(), 1 << 18);
    assert_eq!(obj.insert(SpaceObj::selectors(), cap).err(), Some(Status::BadPar));
    assert_eq!(pd.refcount().count(), refs - 1);
    assert!(obj.lookup(SpaceObj::selectors()).is_none());
    assert!(!obj.remove(&k, CpuId::BSP, SpaceObj::selectors()));
}

#[test]
fn port_access_follows_bitmap() {
    let (_, _, k) = boot(1);
    let pd = k.create_root(CpuId::BSP).unwrap();
    let pio = pd.get_pio().unwrap();

    assert!(pio.lookup(0x3f8).is_empty());

    pio.update(0x3f8, 3, RW).unwrap();
    assert!((0x3f8..0x400).all(|p| pio.lookup(p) == RW));
    assert!(pio.lookup(0x400).is_empty());

    pio.update(0x3f8, 0, Permissions::empty()).unwrap();
    assert!(pio.lookup(0x3f8).is_empty());
    assert_eq!(pio.lookup(0x3f9), RW);

    assert_eq!(pio.update(SpacePio::selectors() - 1, 1, RW).err(), Some(Status::BadPar));
    assert!(pio.lookup(SpacePio::selectors()).is_empty());
}

#[test]
fn msr_read_and_write_are_separate() {
    let (_, _, k) = boot(1);
    let pd = k.create_root(CpuId::BSP).unwrap();
    let obj = pd.get_obj().unwrap();
    let msr = Pd::create_msr(&pd, &obj, 0x30).unwrap();

    let efer = SpaceMsr::index(0xc000_0080).unwrap();
    assert_eq!(efer, 0x2080);
    assert_eq!(SpaceMsr::index(0x4000_0000), None);

    msr.update(efer, 0, Permissions::R).unwrap();
    assert_eq!(msr.lookup(efer), Permissions::R);

    msr.update(0x10, 4, RW).unwrap();
    assert_eq!(msr.lookup(0x1f), RW);
    assert!(msr.lookup(0x20).is_empty());

    assert_eq!(msr.update(SpaceMsr::selectors(), 0, RW).err(), Some(Status::BadPar));
}

#[test]
fn device_access_covers_whole_pages() {
    let (_, _, k) = boot(1);
    let dma = k.dma_nova();

    SpaceDma::access_ctrl(&k, 0x1234_5678, 0x2000, RW).unwrap();

    assert!(dma.lookup(0x1234_4fff).is_none());
    for va in [0x1234_5000, 0x1234_6abc, 0x1234_7fff] {
        let m = dma.lookup(va).unwrap();
        assert_eq!(m.phys, va);
        assert_eq!(m.perm, RW);
        assert_eq!(m.attr, Memattr::ram());
    }
    assert!(dma.lookup(0x1234_8000).is_none());

    SpaceDma::access_ctrl(&k, 0x1234_5678, 0x2000, Permissions::empty()).unwrap();
    assert!(dma.lookup(0x1234_6000).is_none());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn guest_mapping_translates_whole_block(
        gfn in 0u64..1 << 36,
        pfn in 0u64..1 << 28,
        order in 0u32..=9,
        offs in 0u64..1 << 21,
    ) {
        let (_, _, k) = boot(1);
        let pd = k.create_root(CpuId::BSP).unwrap();
        let obj = pd.get_obj().unwrap();
        let gst = Pd::create_gst(&pd, &k, &obj, 0x40).unwrap();

        let mask = (1u64 << (order + 12)) - 1;
        let (v, p) = ((gfn << 12) & !mask, (pfn << 12) & !mask);
        gst.update(v, p, order, RW, Memattr::ram()).unwrap();

        let m = gst.lookup(v + (offs & mask)).unwrap();
        prop_assert_eq!(m.phys, p + (offs & mask));
        prop_assert_eq!(m.perm, RW);
        prop_assert_eq!(m.attr, Memattr::ram());
        prop_assert!(gst.lookup(v + mask + 1).is_none());
    }

    #[test]
    fn port_update_touches_only_its_block(port in 0u64..1 << 16, order in 0u32..=5) {
        let (_, _, k) = boot(1);
        let pd = k.create_root(CpuId::BSP).unwrap();
        let pio = pd.get_pio().unwrap();

        let base = port & !((1 << order) - 1);
        pio.update(base, order, RW).unwrap();

        prop_assert!((base..base + (1 << order)).all(|p| pio.lookup(p) == RW));
        if base > 0 {
            prop_assert!(pio.lookup(base - 1).is_empty());
        }
        prop_assert!(pio.lookup(base + (1 << order)).is_empty());
    }
}

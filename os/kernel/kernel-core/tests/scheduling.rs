mod common;

use common::boot;
use kernel_core::{Cont, Ec, Hazard, Refptr, Sc, Status};
use kernel_sync::CpuId;
use std::sync::Arc;

fn kernel_ec(k: &kernel_core::Kernel, cpu: CpuId) -> Refptr<Ec> {
    Ec::create(k, cpu, Cont::RetUserException).unwrap()
}

#[test]
fn activation_follows_donation_chain() {
    let (_, _, k) = boot(1);
    let cpu = CpuId::BSP;

    let (a, b, c) = (kernel_ec(&k, cpu), kernel_ec(&k, cpu), kernel_ec(&k, cpu));
    Ec::make_current(a.kref(), &k, cpu);

    Ec::call(&k, cpu, b.kref(), Cont::RetUserHypercall).unwrap();
    Ec::call(&k, cpu, c.kref(), Cont::RetUserHypercall).unwrap();
    assert!(Arc::ptr_eq(&k.cpu(cpu).current_ec(), c.kref()));
    assert_eq!(k.cpu(cpu).donations(), 0);

    assert!(Ec::activate(a.kref(), &k, cpu));
    assert!(Arc::ptr_eq(&k.cpu(cpu).current_ec(), c.kref()));
    assert_eq!(k.cpu(cpu).donations(), 2);

    Ec::reply(&k, cpu, Cont::RetUserException);
    assert!(Arc::ptr_eq(&k.cpu(cpu).current_ec(), b.kref()));
    assert!(b.callee().is_none());
    assert!(c.caller().is_none());
}

#[test]
fn donation_count_is_chain_depth() {
    let (_, _, k) = boot(1);
    let cpu = CpuId::BSP;

    let (a, b, c) = (kernel_ec(&k, cpu), kernel_ec(&k, cpu), kernel_ec(&k, cpu));
    Ec::make_current(a.kref(), &k, cpu);
    Ec::call(&k, cpu, b.kref(), Cont::RetUserHypercall).unwrap();
    Ec::call(&k, cpu, c.kref(), Cont::RetUserHypercall).unwrap();

    assert!(Ec::activate(a.kref(), &k, cpu));
    assert_eq!(k.cpu(cpu).donations(), 2);
    assert!(Ec::activate(a.kref(), &k, cpu));
    assert_eq!(k.cpu(cpu).donations(), 2);

    // A shorter walk overwrites the previous depth.
    assert!(Ec::activate(b.kref(), &k, cpu));
    assert_eq!(k.cpu(cpu).donations(), 1);
    assert!(Ec::activate(c.kref(), &k, cpu));
    assert_eq!(k.cpu(cpu).donations(), 0);
}

#[test]
fn call_rejects_dead_and_self() {
    let (_, _, k) = boot(1);
    let cpu = CpuId::BSP;

    let (a, dead) = (kernel_ec(&k, cpu), kernel_ec(&k, cpu));
    dead.set_cont(Cont::Dead);
    Ec::make_current(a.kref(), &k, cpu);

    assert_eq!(Ec::call(&k, cpu, dead.kref(), Cont::RetUserHypercall), Err(Status::Aborted));
    assert_eq!(Ec::call(&k, cpu, a.kref(), Cont::RetUserHypercall), Err(Status::BadPar));
}

#[test]
fn kill_aborts_pending_hypercall() {
    let (_, _, k) = boot(1);
    let cpu = CpuId::BSP;

    let (a, b) = (kernel_ec(&k, cpu), kernel_ec(&k, cpu));
    Ec::make_current(a.kref(), &k, cpu);
    Ec::call(&k, cpu, b.kref(), Cont::RetUserHypercall).unwrap();

    Ec::kill(&k, cpu, "test");

    assert!(b.is_dead());
    assert_eq!(a.cont(), Cont::SysFinish(Status::Aborted));
    assert!(Arc::ptr_eq(&k.cpu(cpu).current_ec(), a.kref()));
}

#[test]
fn helping_a_dead_ec_changes_nothing() {
    let (_, _, k) = boot(1);
    let cpu = CpuId::BSP;

    let (a, dead) = (kernel_ec(&k, cpu), kernel_ec(&k, cpu));
    dead.set_cont(Cont::Dead);
    Ec::make_current(a.kref(), &k, cpu);

    Ec::help(&k, cpu, dead.kref(), Cont::RetUserHypercall);
    assert_eq!(a.cont(), Cont::RetUserException);
    assert_eq!(k.cpu(cpu).helping(), 0);
}

#[test]
fn higher_priority_runs_first_then_lower_after_block() {
    let (p, _, k) = boot(1);
    let cpu = CpuId::BSP;

    let (e10, e5) = (kernel_ec(&k, cpu), kernel_ec(&k, cpu));
    let sc10 = Sc::create(&k, e10.kref(), cpu, 100, 10).unwrap();
    let sc5 = Sc::create(&k, e5.kref(), cpu, 100, 5).unwrap();

    Sc::remote_enqueue(sc5.kref(), &k, cpu);
    Sc::remote_enqueue(sc10.kref(), &k, cpu);
    assert!(k.cpu(cpu).hazard().contains(Hazard::SCHED));
    assert_eq!(k.cpu(cpu).ready_len(), 2);

    k.idle_step(cpu);
    assert!(Arc::ptr_eq(&k.cpu(cpu).current_ec(), e10.kref()));
    assert!(Arc::ptr_eq(&k.cpu(cpu).current_sc(), sc10.kref()));
    assert_eq!(p.timers.lock().unwrap()[&cpu], 100);

    // Budget runs out.
    p.advance(100);
    k.timer_tick(cpu);
    assert_eq!(sc10.left(), 0);
    assert!(k.cpu(cpu).hazard().contains(Hazard::SCHED));

    Ec::block(e10.kref(), &k, cpu);
    assert!(Arc::ptr_eq(&k.cpu(cpu).current_ec(), e5.kref()));
    assert_eq!(e10.waiters(), 1);
    assert!(!k.cpu(cpu).hazard().contains(Hazard::SCHED));

    // Unblocking brings the refilled Sc back and preempts.
    e10.unblock(&k, cpu);
    assert_eq!(e10.waiters(), 0);
    assert_eq!(sc10.left(), 100);
    assert!(k.cpu(cpu).hazard().contains(Hazard::SCHED));

    Sc::schedule(&k, cpu, false);
    assert!(Arc::ptr_eq(&k.cpu(cpu).current_ec(), e10.kref()));
    assert!(sc5.is_queued());
}

#[test]
fn preempted_sc_keeps_its_place() {
    let (p, _, k) = boot(1);
    let cpu = CpuId::BSP;

    let (e1, e2) = (kernel_ec(&k, cpu), kernel_ec(&k, cpu));
    let s1 = Sc::create(&k, e1.kref(), cpu, 50, 3).unwrap();
    let s2 = Sc::create(&k, e2.kref(), cpu, 50, 3).unwrap();
    Sc::remote_enqueue(s1.kref(), &k, cpu);
    Sc::remote_enqueue(s2.kref(), &k, cpu);

    // Both have budget, so each went to the head: s2 runs first.
    k.idle_step(cpu);
    assert!(Arc::ptr_eq(&k.cpu(cpu).current_sc(), s2.kref()));

    // Preempted with budget left: back to the head, runs again.
    p.advance(10);
    Sc::schedule(&k, cpu, false);
    assert!(Arc::ptr_eq(&k.cpu(cpu).current_sc(), s2.kref()));
    assert_eq!(s2.left(), 40);
    assert_eq!(s2.time(), 10);

    // Exhausted: refilled and queued behind s1.
    p.advance(40);
    Sc::schedule(&k, cpu, false);
    assert!(Arc::ptr_eq(&k.cpu(cpu).current_sc(), s1.kref()));
    assert_eq!(s2.left(), 50);
}

#[test]
fn remote_enqueue_uses_request_queue() {
    let (p, _, k) = boot(2);
    let (bsp, ap) = (CpuId::BSP, CpuId::new(1));

    let (e1, e2) = (kernel_ec(&k, ap), kernel_ec(&k, ap));
    let s1 = Sc::create(&k, e1.kref(), ap, 100, 3).unwrap();
    let s2 = Sc::create(&k, e2.kref(), ap, 100, 4).unwrap();

    Sc::remote_enqueue(s1.kref(), &k, bsp);
    Sc::remote_enqueue(s2.kref(), &k, bsp);

    assert_eq!(k.cpu(ap).remote_len(), 2);
    assert_eq!(k.cpu(ap).ready_len(), 0);
    assert_eq!(p.ipis_to(ap), [kernel_core::Request::Rrq]);
    assert!(k.cpu(bsp).ready_len() == 0 && !k.cpu(bsp).hazard().contains(Hazard::SCHED));

    k.rrq_handler(ap);
    assert_eq!(k.cpu(ap).remote_len(), 0);
    assert_eq!(k.cpu(ap).ready_len(), 2);
    assert!(k.cpu(ap).hazard().contains(Hazard::SCHED));

    k.idle_step(ap);
    assert!(Arc::ptr_eq(&k.cpu(ap).current_ec(), e2.kref()));
}

#[test]
fn sc_create_checks_parameters() {
    let (_, _, k) = boot(1);
    let ec = kernel_ec(&k, CpuId::BSP);

    assert_eq!(Sc::create(&k, ec.kref(), CpuId::new(7), 10, 1).err(), Some(Status::BadCpu));
    assert_eq!(Sc::create(&k, ec.kref(), CpuId::BSP, 0, 1).err(), Some(Status::BadPar));
    assert_eq!(Sc::create(&k, ec.kref(), CpuId::BSP, 10, 128).err(), Some(Status::BadPar));

    let kref = ec.kref().clone();
    drop(ec);
    assert_eq!(Sc::create(&k, &kref, CpuId::BSP, 10, 1).err(), Some(Status::Aborted));
}

#[test]
fn idle_cpu_halts() {
    let (p, _, k) = boot(1);
    k.idle_step(CpuId::BSP);
    assert_eq!(p.halts.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert!(k.cpu(CpuId::BSP).is_idle(&k.cpu(CpuId::BSP).current_sc()));
}

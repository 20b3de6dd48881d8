use kernel_rcu::Rcu;
use kernel_sync::CpuId;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;

/// One scheduling round on every CPU except those in `busy`, which are
/// inside a read-side section and cannot pass a quiescent state.
fn round(rcu: &Rcu, ncpus: u16, busy: &[u16]) {
    for i in 0..ncpus {
        let cpu = CpuId::new(i);
        rcu.check(cpu);
        if rcu.hazard(cpu) && !busy.contains(&i) {
            rcu.quiet(cpu);
        }
    }
}

#[test]
fn reader_holds_back_reclamation() {
    let rcu = Rcu::new(4);
    let freed = Arc::new(AtomicBool::new(false));

    let f = freed.clone();
    rcu.call(CpuId::new(1), move || f.store(true, Ordering::SeqCst));

    // CPU 3 sits in a read-side section for a long time.
    for _ in 0..50 {
        round(&rcu, 4, &[3]);
        assert!(!freed.load(Ordering::SeqCst));
    }
    assert!(rcu.hazard(CpuId::new(3)));

    for _ in 0..4 {
        round(&rcu, 4, &[]);
    }
    assert!(freed.load(Ordering::SeqCst));
    assert_eq!(rcu.pending(CpuId::new(1)), 0);
}

#[test]
fn callbacks_run_in_registration_order() {
    let rcu = Rcu::new(2);
    let order = Arc::new(Mutex::new(Vec::new()));

    for i in 0..5 {
        let o = order.clone();
        rcu.call(CpuId::BSP, move || o.lock().unwrap().push(i));
    }

    for _ in 0..5 {
        round(&rcu, 2, &[]);
    }
    assert_eq!(*order.lock().unwrap(), [0, 1, 2, 3, 4]);
}

#[test]
fn late_callbacks_wait_for_a_later_epoch() {
    let rcu = Rcu::new(2);
    let first = Arc::new(AtomicBool::new(false));
    let second = Arc::new(AtomicBool::new(false));

    let f = first.clone();
    rcu.call(CpuId::BSP, move || f.store(true, Ordering::SeqCst));
    round(&rcu, 2, &[]);
    let gen_first = rcu.generation();

    // Registered while the first grace period is still open on CPU 1.
    let s = second.clone();
    rcu.call(CpuId::BSP, move || s.store(true, Ordering::SeqCst));

    while !first.load(Ordering::SeqCst) {
        round(&rcu, 2, &[]);
    }
    while !second.load(Ordering::SeqCst) {
        round(&rcu, 2, &[]);
    }
    assert!(rcu.generation() > gen_first);
}

#[test]
fn idle_system_stays_in_generation_zero() {
    let rcu = Rcu::new(3);
    for _ in 0..10 {
        round(&rcu, 3, &[]);
    }
    assert_eq!(rcu.generation(), 0);
}

#[test]
fn concurrent_cpus_reclaim_everything() {
    const CPUS: u16 = 4;
    const PER_CPU: usize = 500;

    let rcu = Arc::new(Rcu::new(CPUS.into()));
    let ran = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(CPUS.into()));

    let handles: Vec<_> = (0..CPUS)
        .map(|i| {
            let (rcu, ran, barrier) = (rcu.clone(), ran.clone(), barrier.clone());
            thread::spawn(move || {
                let cpu = CpuId::new(i);
                barrier.wait();

                for n in 0..PER_CPU {
                    let r = ran.clone();
                    rcu.call(cpu, move || {
                        r.fetch_add(1, Ordering::Relaxed);
                    });
                    if n % 16 == 0 {
                        rcu.check(cpu);
                    }
                }

                while ran.load(Ordering::Relaxed) < PER_CPU * usize::from(CPUS) {
                    rcu.check(cpu);
                    if rcu.hazard(cpu) {
                        rcu.quiet(cpu);
                    }
                    thread::yield_now();
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(ran.load(Ordering::Relaxed), PER_CPU * usize::from(CPUS));
}

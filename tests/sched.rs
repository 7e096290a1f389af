// Copyright (c) 2025 Sirocco Project Contributors
// SPDX-License-Identifier: Apache-2.0

//! Scheduler behavior: spawn preemption, the scheduler lock, yielding,
//! sleeping against announced ticks, and the priority-change capability.

use sirocco::sched::Kernel;
use sirocco::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use sirocco::sync::Arc;
use sirocco::task::{TaskId, PRIO_INVALID};
use sirocco::time::Duration;
use sirocco::Error;

#[test]
fn spawn_preempts_only_more_urgent_tasks() {
    let k = Kernel::new();
    k.init_main(20).unwrap();

    let order = Arc::new(AtomicU32::new(0));
    let urgent_ran = Arc::new(AtomicU32::new(0));
    let lazy_ran = Arc::new(AtomicU32::new(0));

    let (o, s) = (order.clone(), urgent_ran.clone());
    k.spawn("urgent", 10, move || {
        s.store(o.fetch_add(1, Ordering::Relaxed) + 1, Ordering::Relaxed);
    })
    .unwrap();
    // More urgent than main: already ran to completion inside spawn.
    assert_eq!(urgent_ran.load(Ordering::Relaxed), 1);

    let (o, s) = (order.clone(), lazy_ran.clone());
    let lazy = k
        .spawn("lazy", 25, move || {
            s.store(o.fetch_add(1, Ordering::Relaxed) + 1, Ordering::Relaxed);
        })
        .unwrap();
    // Less urgent than main: spawning did not schedule it.
    assert_eq!(lazy_ran.load(Ordering::Relaxed), 0);
    // Neither does yielding; yield only rotates within a priority class.
    k.yield_now();
    assert_eq!(lazy_ran.load(Ordering::Relaxed), 0);

    // Raising its urgency above ours hands it the processor at once.
    k.change_task_priority(lazy, 15).unwrap();
    assert_eq!(lazy_ran.load(Ordering::Relaxed), 2);
}

#[test]
fn sched_lock_defers_and_yield_rotates_equals() {
    let k = Kernel::new();
    k.init_main(30).unwrap();

    let order = Arc::new(AtomicU32::new(0));
    let events: Vec<Arc<AtomicU32>> = (0..4).map(|_| Arc::new(AtomicU32::new(0))).collect();

    k.sched_lock();
    for (i, name) in [(0usize, "a"), (2, "b")] {
        let k2 = k.clone();
        let order = order.clone();
        let first = events[i].clone();
        let second = events[i + 1].clone();
        k.spawn(name, 5, move || {
            first.store(order.fetch_add(1, Ordering::Relaxed) + 1, Ordering::Relaxed);
            k2.yield_now();
            second.store(order.fetch_add(1, Ordering::Relaxed) + 1, Ordering::Relaxed);
        })
        .unwrap();
    }
    // Both spawned more urgent than main, but the lock held them off.
    assert_eq!(order.load(Ordering::Relaxed), 0);

    k.sched_unlock();

    // FIFO among equals, and yield sends each to the back of the class:
    // a, b, a, b.
    assert_eq!(events[0].load(Ordering::Relaxed), 1);
    assert_eq!(events[2].load(Ordering::Relaxed), 2);
    assert_eq!(events[1].load(Ordering::Relaxed), 3);
    assert_eq!(events[3].load(Ordering::Relaxed), 4);
}

#[test]
fn sleep_wakes_on_announced_ticks() {
    let k = Kernel::new();
    k.init_main(10).unwrap();

    let woke_at = Arc::new(AtomicU64::new(u64::MAX));
    let (k2, w) = (k.clone(), woke_at.clone());
    k.spawn("sleeper", 5, move || {
        k2.sleep(Duration::from_ticks(7)).unwrap();
        w.store(k2.now(), Ordering::Relaxed);
    })
    .unwrap();

    k.tick_announce(3);
    assert_eq!(woke_at.load(Ordering::Relaxed), u64::MAX);

    k.tick_announce(4);
    assert_eq!(woke_at.load(Ordering::Relaxed), 7);
    assert_eq!(k.now(), 7);
}

#[test]
fn current_task_is_visible_to_itself() {
    let k = Kernel::new();
    let main = k.init_main(10).unwrap();
    assert_eq!(k.current(), Some(main));

    let seen = Arc::new(std::sync::Mutex::new(None::<TaskId>));
    let (k2, s) = (k.clone(), seen.clone());
    let worker = k
        .spawn("worker", 5, move || {
            *s.lock().unwrap() = k2.current();
        })
        .unwrap();

    assert_eq!(*seen.lock().unwrap(), Some(worker));
    assert_eq!(k.current(), Some(main));
}

#[test]
fn handles_from_another_kernel_are_rejected() {
    let other = Kernel::new();
    other.init_main(10).unwrap();
    let foreign = other.spawn("x", 5, || {}).unwrap();

    let k = Kernel::new();
    k.init_main(10).unwrap();

    assert_eq!(k.priority_of(foreign), PRIO_INVALID);
    assert_eq!(k.change_task_priority(foreign, 5), Err(Error::InvalidArgument));
    assert_eq!(k.defer_priority(foreign, 5), Err(Error::InvalidArgument));
}

#[test]
fn priority_arguments_are_validated() {
    let k = Kernel::new();
    assert_eq!(k.init_main(PRIO_INVALID), Err(Error::InvalidArgument));

    let main = k.init_main(10).unwrap();
    assert_eq!(k.init_main(10), Err(Error::InvalidArgument));
    assert_eq!(
        k.spawn("bad", PRIO_INVALID, || {}),
        Err(Error::InvalidArgument)
    );
    assert_eq!(
        k.change_task_priority(main, PRIO_INVALID),
        Err(Error::InvalidArgument)
    );
}

#[test]
fn irq_context_nests() {
    let k = Kernel::new();
    assert!(!k.in_irq());
    k.irq_enter();
    k.irq_enter();
    k.irq_exit();
    assert!(k.in_irq());
    k.irq_exit();
    assert!(!k.in_irq());
}

mod common;

use common::*;
use kestrel::prelude::*;
use kestrel::ThreadState;
use std::sync::atomic::{AtomicUsize, Ordering};

#[test]
fn urgent_thread_finishes_before_equals_round_robin() {
    let kernel = kernel(1, KernelConfig::new().with_time_slice(10, Priority::preempt(0)));
    spawn(kernel, "A", 1);
    spawn(kernel, "B", 1);
    spawn(kernel, "C", 0);
    assert_eq!(current(kernel), "C");

    // C has no equal-priority peer, its slice expiring changes nothing
    tick(kernel, 10);
    assert_eq!(current(kernel), "C");
    kernel.thread_exit();

    let mut observed = Vec::new();
    for _ in 0..6 {
        observed.push(current(kernel));
        tick(kernel, 10);
    }
    assert_eq!(observed, vec!["A", "B", "A", "B", "A", "B"]);
    assert_eq!(
        kernel.hal().switched_in(),
        vec!["A", "C", "A", "B", "A", "B", "A", "B", "A"]
    );
}

#[test]
fn neither_equal_thread_starves() {
    let slice = 4;
    let kernel = kernel(1, KernelConfig::new().with_time_slice(slice, Priority::preempt(0)));
    let a = spawn(kernel, "a", 5);
    let b = spawn(kernel, "b", 5);
    let mut since_run = [0u64; 2];
    for _ in 0..200 {
        tick(kernel, 1);
        let running = kernel.current_thread().unwrap();
        for (index, thread) in [a, b].into_iter().enumerate() {
            if thread == running {
                since_run[index] = 0;
            } else {
                since_run[index] += 1;
            }
            assert!(since_run[index] <= slice as u64);
        }
    }
}

#[test]
fn slice_is_not_applied_above_max_priority() {
    let kernel = kernel(1, KernelConfig::new().with_time_slice(5, Priority::preempt(4)));
    spawn(kernel, "a", 2);
    spawn(kernel, "b", 2);
    tick(kernel, 50);
    assert_eq!(current(kernel), "a");

    kernel.set_time_slice(5, Priority::preempt(2));
    tick(kernel, 5);
    assert_eq!(current(kernel), "b");

    kernel.set_time_slice(0, Priority::preempt(2));
    tick(kernel, 50);
    assert_eq!(current(kernel), "b");
}

#[test]
fn cooperative_threads_are_never_sliced() {
    let kernel = kernel(1, KernelConfig::new().with_time_slice(3, Priority::HIGHEST));
    let a = spawn(kernel, "a", -2);
    spawn(kernel, "b", -2);
    kernel.thread_set_time_slice(a, 3, None, 0);
    tick(kernel, 30);
    assert_eq!(current(kernel), "a");
}

#[test]
fn sched_locked_thread_keeps_its_slice() {
    let kernel = kernel(1, KernelConfig::new().with_time_slice(3, Priority::preempt(0)));
    spawn(kernel, "a", 4);
    spawn(kernel, "b", 4);
    kernel.sched_lock();
    tick(kernel, 9);
    assert_eq!(current(kernel), "a");
    kernel.sched_unlock();
    tick(kernel, 3);
    assert_eq!(current(kernel), "b");
}

static EXPIRED: AtomicUsize = AtomicUsize::new(0);

fn on_expiry(_thread: ThreadHandle, data: usize) {
    EXPIRED.fetch_add(data, Ordering::SeqCst);
}

#[test]
fn thread_slice_overrides_global_and_runs_callback() {
    let kernel = kernel(1, KernelConfig::new().with_time_slice(100, Priority::preempt(5)));
    let a = spawn(kernel, "a", 1);
    spawn(kernel, "b", 1);
    kernel.thread_set_time_slice(a, 2, Some(on_expiry), 7);

    tick(kernel, 1);
    assert_eq!(current(kernel), "a");
    tick(kernel, 1);
    assert_eq!(current(kernel), "b");
    assert_eq!(EXPIRED.load(Ordering::SeqCst), 7);

    // "b" has no slice of its own and is above the global threshold
    tick(kernel, 200);
    assert_eq!(current(kernel), "b");
}

#[test]
fn alarm_tracks_earliest_deadline() {
    let kernel = kernel(1, KernelConfig::new().with_time_slice(8, Priority::preempt(0)));
    assert_eq!(kernel.hal().wakeup(), None);
    spawn(kernel, "a", 3);
    assert_eq!(kernel.hal().wakeup(), Some(8));
    let queue = kernel.wait_queue_create().unwrap();
    spawn(kernel, "sleeper", 1);
    assert!(kernel.pend_current(&queue, Timeout::ticks(3)).is_ok());
    assert_eq!(kernel.hal().wakeup(), Some(3));
}

#[test]
fn stale_expiry_in_switch_window_is_ignored() {
    let kernel = kernel(1, KernelConfig::new().with_time_slice(5, Priority::preempt(0)));
    let queue = kernel.wait_queue_create().unwrap();
    let a = spawn(kernel, "a", 3);
    spawn(kernel, "b", 3);
    tick(kernel, 4);

    // The old slice deadline of "a" passes while its switch out is in flight
    kernel.hal().set_switch_hook(move |switch| {
        assert_eq!(switch.from, "a");
        tick(kernel, 1);
    });
    assert_eq!(kernel.pend_current(&queue, Timeout::Forever), Ok(a));

    assert_eq!(current(kernel), "b");
    assert_eq!(kernel.hal().switched_in(), vec!["a", "b"]);
    assert_eq!(kernel.wait_queue_len(&queue), 1);
    assert!(is_state(kernel, a, ThreadState::Pending));

    // The slice of "b" started at the switch
    tick(kernel, 3);
    assert_eq!(current(kernel), "b");
}

mod common;

use common::*;
use kestrel::prelude::*;
use kestrel::ThreadState;
use proptest::prelude::*;

#[test]
fn pend_times_out() {
    let kernel = kernel(1, KernelConfig::new());
    let queue = kernel.wait_queue_create().unwrap();
    spawn(kernel, "background", 9);
    let waiter = spawn(kernel, "waiter", 1);
    assert_eq!(kernel.pend_current(&queue, Timeout::ticks(5)), Ok(waiter));

    tick(kernel, 4);
    assert!(is_state(kernel, waiter, ThreadState::Pending));
    tick(kernel, 1);
    assert_eq!(current(kernel), "waiter");
    assert_eq!(kernel.take_wait_result(waiter), Some(WaitResult::TimedOut));
    assert_eq!(kernel.wait_queue_len(&queue), 0);
    assert_eq!(kernel.unpend_first(&queue), None);
}

#[test]
fn no_wait_fails_immediately_also_in_interrupts() {
    let kernel = kernel(1, KernelConfig::new());
    let queue = kernel.wait_queue_create().unwrap();
    spawn(kernel, "thread", 3);
    assert_eq!(kernel.pend(&queue, Timeout::NoWait), WaitResult::TimedOut);
    kernel.interrupt_enter();
    assert_eq!(kernel.pend(&queue, Timeout::ticks(0)), WaitResult::TimedOut);
    kernel.interrupt_exit();
    assert_eq!(kernel.hal().switched_in(), vec!["thread"]);
}

#[test]
fn pend_resolved_inside_switch_window() {
    let kernel = kernel(1, KernelConfig::new());
    let queue = kernel.wait_queue_create().unwrap();
    spawn(kernel, "waker", 6);
    spawn(kernel, "waiter", 2);
    kernel.hal().set_switch_hook(move |switch| {
        assert_eq!(switch.to, "waker");
        kernel.unpend_first_with(&queue, 42);
    });
    assert_eq!(kernel.pend(&queue, Timeout::ticks(10)), WaitResult::Success(42));
    assert_eq!(current(kernel), "waiter");

    // The timeout was disarmed with the wakeup
    tick(kernel, 20);
    assert_eq!(current(kernel), "waiter");
    assert_eq!(kernel.take_wait_result(kernel.current_thread().unwrap()), None);
}

#[test]
fn sleep_and_early_wakeup() {
    let kernel = kernel(1, KernelConfig::new());
    let sleeper = spawn(kernel, "sleeper", 2);
    kernel.hal().set_switch_hook(move |_| tick(kernel, 10));
    assert_eq!(kernel.sleep(Timeout::ticks(10)), 0);
    assert_eq!(kernel.uptime(), 10);

    kernel.hal().set_switch_hook(move |_| {
        tick(kernel, 4);
        kernel.wakeup(sleeper);
    });
    assert_eq!(kernel.sleep(Timeout::ticks(10)), 6);

    kernel.hal().set_switch_hook(move |_| kernel.wakeup(sleeper));
    assert_eq!(kernel.sleep(Timeout::Forever), u64::MAX);
}

#[test]
fn wakeup_ignores_threads_that_are_not_sleeping() {
    let kernel = kernel(1, KernelConfig::new());
    let queue = kernel.wait_queue_create().unwrap();
    let waiter = spawn(kernel, "waiter", 2);
    assert!(kernel.pend_current(&queue, Timeout::Forever).is_ok());
    kernel.wakeup(waiter);
    assert!(is_state(kernel, waiter, ThreadState::Pending));
    assert_eq!(kernel.wait_queue_len(&queue), 1);
}

proptest! {
    #[test]
    fn timeout_and_unpend_resolve_exactly_once(
        timeout in 1u64..40,
        before in 0u64..50,
        after in 0u64..10,
        unpend_first in any::<bool>(),
    ) {
        let kernel = kernel(1, KernelConfig::new());
        let queue = kernel.wait_queue_create().unwrap();
        let waiter = spawn(kernel, "waiter", 3);
        prop_assert_eq!(kernel.pend_current(&queue, Timeout::ticks(timeout)), Ok(waiter));

        if before > 0 {
            tick(kernel, before);
        }
        let woken = if unpend_first {
            let woken = kernel.unpend_first(&queue);
            tick(kernel, after);
            woken
        } else {
            tick(kernel, after);
            kernel.unpend_first(&queue)
        };

        let elapsed = if unpend_first { before } else { before + after };
        let timed_out = elapsed >= timeout;
        prop_assert_eq!(woken.is_some(), !timed_out);
        let expected = if timed_out { WaitResult::TimedOut } else { WaitResult::Success(0) };
        prop_assert_eq!(kernel.take_wait_result(waiter), Some(expected));
        prop_assert_eq!(kernel.take_wait_result(waiter), None);
        prop_assert_eq!(kernel.wait_queue_len(&queue), 0);
        prop_assert_eq!(kernel.thread_state(waiter), ThreadState::Running);
    }
}

mod common;

use common::*;
use kestrel::prelude::*;
use kestrel::WaitQueueError;
use proptest::prelude::*;

/// Spawn a thread that immediately blocks on `queue`.
fn block_on(kernel: &SimKernel, queue: &WaitQueue, name: &'static str, priority: i16) -> ThreadHandle {
    let thread = spawn(kernel, name, priority);
    assert_eq!(kernel.pend_current(queue, Timeout::Forever), Ok(thread));
    thread
}

#[test]
fn more_urgent_waiter_is_woken_first() {
    let kernel = kernel(1, KernelConfig::new());
    let queue = kernel.wait_queue_create().unwrap();
    let a = block_on(kernel, &queue, "a", 2);
    let b = block_on(kernel, &queue, "b", 1);
    let c = block_on(kernel, &queue, "c", 1);
    assert_eq!(kernel.wait_queue_len(&queue), 3);
    assert_eq!(kernel.wait_queue_head(&queue), Some(b));

    assert_eq!(kernel.unpend_first(&queue), Some(b));
    assert_eq!(current(kernel), "b");
    assert_eq!(kernel.unpend_first(&queue), Some(c));
    assert_eq!(kernel.unpend_first(&queue), Some(a));
    assert_eq!(kernel.unpend_first(&queue), None);

    assert_eq!(kernel.take_wait_result(b), Some(WaitResult::Success(0)));
    assert_eq!(kernel.take_wait_result(b), None);
}

#[test]
fn unpend_delivers_value() {
    let kernel = kernel(1, KernelConfig::new());
    let queue = kernel.wait_queue_create().unwrap();
    let waiter = block_on(kernel, &queue, "waiter", 3);
    assert_eq!(kernel.unpend_first_with(&queue, 0xbeef), Some(waiter));
    assert_eq!(kernel.take_wait_result(waiter), Some(WaitResult::Success(0xbeef)));
}

#[test]
fn unpend_all_and_cancel_release_every_waiter() {
    let kernel = kernel(1, KernelConfig::new());
    let queue = kernel.wait_queue_create().unwrap();
    let first: Vec<_> = ["a", "b", "c"]
        .into_iter()
        .map(|name| block_on(kernel, &queue, name, 4))
        .collect();
    // Runs as "a" once everybody is woken
    assert_eq!(kernel.unpend_all(&queue), 3);
    assert_eq!(current(kernel), "a");
    for thread in &first {
        assert_eq!(kernel.take_wait_result(*thread), Some(WaitResult::Success(0)));
    }

    let d = block_on(kernel, &queue, "d", 1);
    assert_eq!(kernel.wait_queue_cancel(&queue), 1);
    assert_eq!(kernel.take_wait_result(d), Some(WaitResult::Cancelled));
    assert_eq!(kernel.wait_queue_cancel(&queue), 0);
}

#[test]
fn wait_queue_table_is_bounded() {
    let kernel = kernel(1, KernelConfig::new());
    let queues: Vec<_> = std::iter::from_fn(|| kernel.wait_queue_create().ok()).collect();
    assert_eq!(queues.len(), kestrel::config::MAX_WAIT_QUEUES);
    assert_eq!(kernel.wait_queue_create(), Err(WaitQueueError::NoFreeQueue));
    kernel.wait_queue_destroy(queues[0]);
    assert!(kernel.wait_queue_create().is_ok());
}

#[test]
fn semaphore_counts_and_wakes_waiters() {
    let kernel = kernel(1, KernelConfig::new());
    let semaphore = Semaphore::new(kernel, 1, 2).unwrap();
    assert_eq!(semaphore.try_take(kernel), Ok(()));
    assert_eq!(semaphore.try_take(kernel), Err(kestrel::sync::TakeError::Busy));

    semaphore.give(kernel);
    semaphore.give(kernel);
    semaphore.give(kernel);
    assert_eq!(semaphore.count(kernel), 2);
    semaphore.reset(kernel);
    assert_eq!(semaphore.count(kernel), 0);

    let waiter = spawn(kernel, "waiter", 2);
    assert_eq!(kernel.pend_current(&semaphore, Timeout::Forever), Ok(waiter));
    semaphore.give(kernel);
    assert_eq!(current(kernel), "waiter");
    assert_eq!(semaphore.count(kernel), 0);
    semaphore.destroy(kernel);
}

#[test]
fn blocked_take_completes_when_given() {
    let kernel = kernel(1, KernelConfig::new());
    let semaphore: &'static Semaphore = Box::leak(Box::new(Semaphore::new(kernel, 0, 1).unwrap()));
    spawn(kernel, "low", 9);
    spawn(kernel, "taker", 2);

    // "low" gives the semaphore while "taker" is switched out
    kernel.hal().set_switch_hook(move |switch| {
        assert_eq!(switch.to, "low");
        semaphore.give(kernel);
    });
    assert_eq!(semaphore.take(kernel, Timeout::Forever), Ok(()));
    assert_eq!(current(kernel), "taker");
    assert_eq!(kernel.hal().switched_in(), vec!["low", "taker", "low", "taker"]);
}

#[test]
fn reset_fails_blocked_take() {
    let kernel = kernel(1, KernelConfig::new());
    let semaphore: &'static Semaphore = Box::leak(Box::new(Semaphore::new(kernel, 0, 1).unwrap()));
    spawn(kernel, "taker", 2);
    kernel.hal().set_switch_hook(move |_| semaphore.reset(kernel));
    assert_eq!(
        semaphore.take(kernel, Timeout::Forever),
        Err(kestrel::sync::TakeError::Reset)
    );
}

#[test]
fn suspending_a_blocked_taker_cancels_its_take() {
    let kernel = kernel(1, KernelConfig::new());
    let semaphore: &'static Semaphore = Box::leak(Box::new(Semaphore::new(kernel, 0, 1).unwrap()));
    let taker = spawn(kernel, "taker", 2);
    kernel.hal().set_switch_hook(move |_| {
        kernel.thread_suspend(taker);
        kernel.thread_resume(taker);
    });
    assert_eq!(
        semaphore.take(kernel, Timeout::Forever),
        Err(kestrel::sync::TakeError::Cancelled)
    );
    assert_eq!(current(kernel), "taker");
    assert_eq!(kernel.wait_queue_len(semaphore), 0);
}

proptest! {
    #[test]
    fn equal_priority_waiters_wake_in_arrival_order(count in 1usize..16) {
        let kernel = kernel(1, KernelConfig::new());
        let queue = kernel.wait_queue_create().unwrap();
        let waiters: Vec<_> = (0..count).map(|_| block_on(kernel, &queue, "w", 7)).collect();
        let woken: Vec<_> = std::iter::from_fn(|| kernel.unpend_first(&queue)).collect();
        prop_assert_eq!(woken, waiters);
    }

    #[test]
    fn waiters_wake_by_priority_then_arrival(priorities in prop::collection::vec(-16i16..15, 1..16)) {
        let kernel = kernel(1, KernelConfig::new());
        let queue = kernel.wait_queue_create().unwrap();
        let waiters: Vec<_> = priorities
            .iter()
            .map(|&priority| (priority, block_on(kernel, &queue, "w", priority)))
            .collect();
        let mut expected = waiters.clone();
        expected.sort_by_key(|&(priority, _)| priority);
        let expected: Vec<_> = expected.into_iter().map(|(_, thread)| thread).collect();
        let woken: Vec<_> = std::iter::from_fn(|| kernel.unpend_first(&queue)).collect();
        prop_assert_eq!(woken, expected);
    }
}

mod common;

use common::*;
use kestrel::prelude::*;
use kestrel::ThreadState;
use kestrel::sync::SpinLock;

/// Minimal kernel object: a slot guarded by its own lock.
struct Mailbox {
    queue: WaitQueue,
    slot: SpinLock<Option<usize>>,
}

impl Blockable for Mailbox {
    fn wait_queue(&self) -> &WaitQueue {
        &self.queue
    }
}

fn mailbox(kernel: &SimKernel) -> &'static Mailbox {
    Box::leak(Box::new(Mailbox {
        queue: kernel.wait_queue_create().unwrap(),
        slot: SpinLock::new(None),
    }))
}

#[test]
fn pend_locked_releases_object_lock() {
    let kernel = kernel(1, KernelConfig::new());
    let mailbox = mailbox(kernel);
    spawn(kernel, "sender", 5);
    spawn(kernel, "receiver", 1);

    kernel.hal().set_switch_hook(move |switch| {
        assert_eq!(switch.to, "sender");
        let mut slot = mailbox.slot.try_lock(kernel.hal()).unwrap();
        *slot = Some(9);
        kernel.unpend_first_with(mailbox, 9);
        kernel.reschedule_locked(slot);
    });
    let slot = mailbox.slot.lock(kernel.hal());
    assert_eq!(*slot, None);
    assert_eq!(kernel.pend_locked(slot, mailbox, Timeout::Forever), WaitResult::Success(9));
    assert_eq!(*mailbox.slot.lock(kernel.hal()), Some(9));
    assert_eq!(current(kernel), "receiver");
    assert!(kernel.hal().interrupts_enabled(0));
}

#[test]
fn pend_locked_without_waiting_releases_lock() {
    let kernel = kernel(1, KernelConfig::new());
    let mailbox = mailbox(kernel);
    spawn(kernel, "receiver", 1);
    let slot = mailbox.slot.lock(kernel.hal());
    assert!(!kernel.hal().interrupts_enabled(0));
    assert_eq!(kernel.pend_locked(slot, mailbox, Timeout::NoWait), WaitResult::TimedOut);
    assert!(mailbox.slot.try_lock(kernel.hal()).is_ok());
    assert!(kernel.hal().interrupts_enabled(0));
}

#[test]
fn waiter_times_out_inside_switch_window() {
    let kernel = kernel(1, KernelConfig::new());
    let mailbox = mailbox(kernel);
    spawn(kernel, "other", 5);
    spawn(kernel, "receiver", 1);
    kernel.hal().set_switch_hook(move |_| tick(kernel, 3));
    assert_eq!(kernel.pend(mailbox, Timeout::ticks(3)), WaitResult::TimedOut);
    assert_eq!(kernel.wait_queue_len(mailbox), 0);
    assert_eq!(kernel.uptime(), 3);
}

#[test]
fn priority_change_reorders_waiters() {
    let kernel = kernel(1, KernelConfig::new());
    let mailbox = mailbox(kernel);
    let a = spawn(kernel, "a", 5);
    assert!(kernel.pend_current(mailbox, Timeout::Forever).is_ok());
    let b = spawn(kernel, "b", 5);
    assert!(kernel.pend_current(mailbox, Timeout::Forever).is_ok());
    assert_eq!(kernel.wait_queue_head(mailbox), Some(a));

    kernel.thread_priority_set(b, 2);
    assert_eq!(kernel.wait_queue_head(mailbox), Some(b));
    assert!(is_state(kernel, b, ThreadState::Pending));
    assert_eq!(kernel.unpend_first(mailbox), Some(b));
    assert_eq!(current(kernel), "b");
    assert_eq!(kernel.wait_queue_head(mailbox), Some(a));
}

#[test]
fn wakeup_from_nested_interrupt_waits_for_outermost_exit() {
    let kernel = kernel(1, KernelConfig::new());
    let mailbox = mailbox(kernel);
    spawn(kernel, "background", 8);
    let waiter = spawn(kernel, "waiter", 2);
    assert!(kernel.pend_current(mailbox, Timeout::Forever).is_ok());
    assert_eq!(current(kernel), "background");

    kernel.interrupt_enter();
    kernel.interrupt_enter();
    assert_eq!(kernel.unpend_first(mailbox), Some(waiter));
    kernel.interrupt_exit();
    assert_eq!(current(kernel), "background");
    kernel.interrupt_exit();
    assert_eq!(current(kernel), "waiter");
}

//! Wait queues: priority-ordered lists of threads pending on a kernel object.
//!
//! A blocked thread is a member of exactly one wait queue (or none while it
//! sleeps) and is removed from it when it is unpended, times out, is
//! suspended or aborted. Every thread slot owns a permanent join queue that
//! shares the slot index.
use crate::config::{MAX_THREADS, MAX_WAIT_QUEUES};
use crate::kernel::Kernel;
use crate::kernel::exception::{KernelError, RuntimeError};
use crate::kernel::list::LinkedList;
use crate::kernel::scheduler::RescheduleKind;
use crate::kernel::SchedulerGuard;
use crate::sync::spinlock::SpinLockGuard;
use crate::thread::raw_thread::{QueueTag, ThreadIndex, ThreadTable};
use crate::thread::{ThreadHandle, ThreadState};
use crate::time::Timeout;
use kestrel_khal::HardwareAbstractionLayer;
use thiserror::Error;

pub(crate) type WaitQueueIndex = u16;

const WAIT_QUEUE_SLOTS: usize = MAX_THREADS + MAX_WAIT_QUEUES;

/// Handle to a wait queue allocated with [`Kernel::wait_queue_create`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct WaitQueue {
    index: WaitQueueIndex,
    generation: u16,
}

/// Kernel object that threads can pend on.
pub trait Blockable {
    fn wait_queue(&self) -> &WaitQueue;
}

impl Blockable for WaitQueue {
    fn wait_queue(&self) -> &WaitQueue {
        self
    }
}

/// Outcome of a wait, delivered to the woken thread.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum WaitResult {
    /// Unpended, with the value given by the waker.
    Success(usize),
    TimedOut,
    /// The wait was cancelled, or the thread was suspended while pending.
    Cancelled,
}

impl WaitResult {
    pub const fn is_success(&self) -> bool {
        matches!(self, WaitResult::Success(_))
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum WaitQueueError {
    #[error("Wait queue table is full")]
    NoFreeQueue,
}

struct WaitQueueSlot {
    waiters: LinkedList<QueueTag>,
    generation: u16,
    in_use: bool,
}

pub(crate) struct WaitQueueTable {
    slots: [WaitQueueSlot; WAIT_QUEUE_SLOTS],
}

impl WaitQueueTable {
    pub fn new() -> WaitQueueTable {
        WaitQueueTable {
            slots: core::array::from_fn(|index| WaitQueueSlot {
                waiters: LinkedList::new(),
                generation: 0,
                in_use: index < MAX_THREADS,
            }),
        }
    }

    /// Queue of threads joining `thread`.
    pub const fn join_queue(thread: ThreadIndex) -> WaitQueueIndex {
        thread
    }

    pub fn allocate(&mut self) -> Option<WaitQueue> {
        let index = (MAX_THREADS..WAIT_QUEUE_SLOTS).find(|&index| !self.slots[index].in_use)?;
        let slot = &mut self.slots[index];
        slot.in_use = true;
        Some(WaitQueue {
            index: index as WaitQueueIndex,
            generation: slot.generation,
        })
    }

    pub fn release(&mut self, queue: WaitQueueIndex) {
        let slot = &mut self.slots[queue as usize];
        debug_assert!(slot.waiters.is_empty());
        slot.in_use = false;
        slot.generation = slot.generation.wrapping_add(1);
    }

    #[track_caller]
    pub fn resolve(&self, queue: &WaitQueue) -> WaitQueueIndex {
        match self.slots.get(queue.index as usize) {
            Some(slot) if slot.in_use && slot.generation == queue.generation => queue.index,
            _ => runtime_error!(RuntimeError::StaleWaitQueue),
        }
    }

    /// Insert behind every waiter of equal or more urgent priority.
    pub fn insert(&mut self, threads: &mut ThreadTable, queue: WaitQueueIndex, thread: ThreadIndex) {
        let priority = threads[thread].priority;
        self.slots[queue as usize]
            .waiters
            .insert_after(threads, thread, |threads, waiter| {
                !priority.is_more_urgent_than(threads[waiter].priority)
            });
    }

    pub fn remove(&mut self, threads: &mut ThreadTable, queue: WaitQueueIndex, thread: ThreadIndex) -> bool {
        self.slots[queue as usize].waiters.remove(threads, thread)
    }

    pub fn first(&self, queue: WaitQueueIndex) -> Option<ThreadIndex> {
        self.slots[queue as usize].waiters.head()
    }

    pub fn len(&self, queue: WaitQueueIndex) -> usize {
        self.slots[queue as usize].waiters.len()
    }

    pub fn waiters<'a>(
        &self,
        threads: &'a ThreadTable,
        queue: WaitQueueIndex,
    ) -> impl Iterator<Item = ThreadIndex> + 'a {
        self.slots[queue as usize].waiters.iter(threads)
    }
}

impl<H: HardwareAbstractionLayer> Kernel<H> {
    pub fn wait_queue_create(&self) -> Result<WaitQueue, WaitQueueError> {
        let mut sched = self.lock();
        sched.wait_queues.allocate().ok_or(WaitQueueError::NoFreeQueue)
    }

    /// Release a wait queue. Destroying a queue that still has waiters is a
    /// fatal error.
    #[track_caller]
    pub fn wait_queue_destroy(&self, queue: WaitQueue) {
        let mut sched = self.lock();
        let index = sched.wait_queues.resolve(&queue);
        let waiters = sched.wait_queues.len(index);
        if waiters > 0 {
            runtime_error!(RuntimeError::WaitQueueInUse { waiters });
        }
        sched.wait_queues.release(index);
    }

    pub fn wait_queue_len<B: Blockable + ?Sized>(&self, object: &B) -> usize {
        let sched = self.lock();
        let index = sched.wait_queues.resolve(object.wait_queue());
        sched.wait_queues.len(index)
    }

    /// Thread that the next unpend would wake.
    pub fn wait_queue_head<B: Blockable + ?Sized>(&self, object: &B) -> Option<ThreadHandle> {
        let sched = self.lock();
        let index = sched.wait_queues.resolve(object.wait_queue());
        sched.wait_queues.first(index).map(|thread| sched.threads.handle(thread))
    }

    /// Block the current thread on `object` until it is unpended, the
    /// timeout expires or the wait is cancelled.
    ///
    /// With [`Timeout::NoWait`] this returns [`WaitResult::TimedOut`]
    /// immediately, also from an interrupt handler. Any other timeout from an
    /// interrupt handler or the idle thread is fatal.
    #[track_caller]
    pub fn pend<B: Blockable + ?Sized>(&self, object: &B, timeout: Timeout) -> WaitResult {
        match self.pend_current(object, timeout) {
            Ok(thread) => self.wait_result_after_switch(thread.slot()),
            Err(result) => result,
        }
    }

    /// Like [`Kernel::pend`], releasing `guard` of an object lock atomically
    /// with blocking so that no wakeup can be lost between the two.
    #[track_caller]
    pub fn pend_locked<T, B: Blockable + ?Sized>(
        &self,
        guard: SpinLockGuard<'_, T>,
        object: &B,
        timeout: Timeout,
    ) -> WaitResult {
        match self.pend_current_locked(guard, object, timeout) {
            Ok(thread) => self.wait_result_after_switch(thread.slot()),
            Err(result) => result,
        }
    }

    /// First half of a wait: block the current thread and return its handle.
    ///
    /// The result is collected later with [`Kernel::take_wait_result`]. This
    /// suits HALs where the switch away happens on exception return rather
    /// than inside `context_switch`.
    #[track_caller]
    pub fn pend_current<B: Blockable + ?Sized>(
        &self,
        object: &B,
        timeout: Timeout,
    ) -> Result<ThreadHandle, WaitResult> {
        let sched = self.lock();
        let queue = sched.wait_queues.resolve(object.wait_queue());
        self.block_current(sched, Some(queue), timeout)
            .map(|thread| self.lock().threads.handle(thread))
    }

    #[track_caller]
    pub fn pend_current_locked<T, B: Blockable + ?Sized>(
        &self,
        guard: SpinLockGuard<'_, T>,
        object: &B,
        timeout: Timeout,
    ) -> Result<ThreadHandle, WaitResult> {
        let sched = self.handoff(guard);
        let queue = sched.wait_queues.resolve(object.wait_queue());
        self.block_current(sched, Some(queue), timeout)
            .map(|thread| self.lock().threads.handle(thread))
    }

    /// Result of the last wait of `thread`, once it has been resolved.
    #[track_caller]
    pub fn take_wait_result(&self, thread: ThreadHandle) -> Option<WaitResult> {
        let mut sched = self.lock();
        let index = sched.threads.resolve(thread);
        sched.threads[index].wait_result.take()
    }

    /// Wake the most urgent, longest waiting thread with `Success(0)`.
    pub fn unpend_first<B: Blockable + ?Sized>(&self, object: &B) -> Option<ThreadHandle> {
        self.unpend_first_with(object, 0)
    }

    pub fn unpend_first_with<B: Blockable + ?Sized>(
        &self,
        object: &B,
        value: usize,
    ) -> Option<ThreadHandle> {
        let mut sched = self.lock();
        let index = sched.wait_queues.resolve(object.wait_queue());
        let woken = sched
            .unpend_first(index, WaitResult::Success(value))
            .map(|thread| sched.threads.handle(thread));
        self.reschedule_point(sched, RescheduleKind::YieldToHigher);
        woken
    }

    /// Wake every waiter with `Success(0)`. Returns the number woken.
    pub fn unpend_all<B: Blockable + ?Sized>(&self, object: &B) -> usize {
        self.resolve_all(object, WaitResult::Success(0))
    }

    /// Wake every waiter with [`WaitResult::Cancelled`].
    pub fn wait_queue_cancel<B: Blockable + ?Sized>(&self, object: &B) -> usize {
        self.resolve_all(object, WaitResult::Cancelled)
    }

    fn resolve_all<B: Blockable + ?Sized>(&self, object: &B, result: WaitResult) -> usize {
        let mut sched = self.lock();
        let index = sched.wait_queues.resolve(object.wait_queue());
        let woken = sched.unpend_all(index, result);
        if woken > 0 {
            self.reschedule_point(sched, RescheduleKind::YieldToHigher);
        } else {
            self.unlock(sched, self.hal.current_cpu());
        }
        woken
    }

    /// Pend the current thread on `queue`, or sleep when `queue` is `None`,
    /// and switch away. Returns the blocked thread once it runs again.
    #[track_caller]
    pub(crate) fn block_current(
        &self,
        mut sched: SchedulerGuard<'_>,
        queue: Option<WaitQueueIndex>,
        timeout: Timeout,
    ) -> Result<ThreadIndex, WaitResult> {
        let cpu = self.hal.current_cpu();
        if timeout.is_no_wait() {
            self.unlock(sched, cpu);
            return Err(WaitResult::TimedOut);
        }
        if self.local(cpu).in_interrupt() {
            runtime_error!(RuntimeError::InterruptHandlerViolation);
        }
        if cfg!(debug_assertions) && !sched.irq_key().interrupts_enabled() {
            runtime_error!(RuntimeError::BlockingWhileLocked);
        }
        let current = sched.current(cpu);
        if sched.threads[current].idle {
            runtime_error!(RuntimeError::IdleThreadBlock);
        }
        let deadline = timeout.deadline(sched.now);
        sched.pend_thread(current, queue, deadline);
        self.dispatch(sched, cpu, RescheduleKind::YieldToHigher);
        Ok(current)
    }

    /// Wait result of `thread` after it has been switched back in.
    #[track_caller]
    pub(crate) fn wait_result_after_switch(&self, thread: ThreadIndex) -> WaitResult {
        let mut sched = self.lock();
        let raw = &mut sched.threads[thread];
        match (raw.state, raw.wait_result.take()) {
            (ThreadState::Running, Some(result)) => result,
            _ => kernel_error!(KernelError::ResumedWhileBlocked {
                thread_name: raw.name
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::cpu::CpuMask;
    use crate::kernel::priority::Priority;
    use crate::kernel::stack::Stack;

    fn add(threads: &mut ThreadTable, priority: i16) -> ThreadIndex {
        let index = threads.allocate().unwrap();
        let stack = Box::leak(Box::new(Stack::<512>::new())).init();
        threads[index].occupy("t", Priority::new(priority).unwrap(), CpuMask::all(), stack);
        index
    }

    #[test]
    fn waiters_are_ordered_by_priority_then_fifo() {
        let mut threads = ThreadTable::new();
        let mut table = WaitQueueTable::new();
        let queue = table.allocate().unwrap();
        let queue = table.resolve(&queue);

        let low = add(&mut threads, 5);
        let high = add(&mut threads, 1);
        let high2 = add(&mut threads, 1);
        let coop = add(&mut threads, -3);
        for thread in [low, high, high2, coop] {
            table.insert(&mut threads, queue, thread);
        }

        let order: Vec<_> = table.waiters(&threads, queue).collect();
        assert_eq!(order, vec![coop, high, high2, low]);
        assert_eq!(table.first(queue), Some(coop));
        assert!(table.remove(&mut threads, queue, high));
        assert_eq!(table.len(queue), 3);
    }

    #[test]
    fn released_queue_handle_goes_stale() {
        let mut table = WaitQueueTable::new();
        let queue = table.allocate().unwrap();
        let index = table.resolve(&queue);
        table.release(index);
        let again = table.allocate().unwrap();
        assert_ne!(queue, again);
        assert_eq!(table.resolve(&again), index);
    }

    #[test]
    #[should_panic(expected = "Stale wait queue handle")]
    fn stale_queue_handle_is_fatal() {
        let mut table = WaitQueueTable::new();
        let queue = table.allocate().unwrap();
        let index = table.resolve(&queue);
        table.release(index);
        table.resolve(&queue);
    }
}

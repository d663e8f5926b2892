//! Deadline-ordered timeout list and tick announcement.
use crate::kernel::Kernel;
use crate::kernel::list::LinkedList;
use crate::kernel::scheduler::Scheduler;
use crate::kernel::wait_queue::WaitResult;
use crate::thread::ThreadState;
use crate::thread::raw_thread::{ThreadIndex, ThreadTable, TimeoutTag};
use crate::time::Ticks;
use kestrel_khal::{CpuId, HardwareAbstractionLayer};

/// Threads with an armed timeout, earliest deadline first. Threads with the
/// same deadline expire in the order they were armed.
pub(crate) struct TimeoutList {
    list: LinkedList<TimeoutTag>,
}

impl TimeoutList {
    pub const fn new() -> TimeoutList {
        TimeoutList {
            list: LinkedList::new(),
        }
    }

    pub fn arm(&mut self, threads: &mut ThreadTable, thread: ThreadIndex, deadline: Ticks) {
        self.cancel(threads, thread);
        threads[thread].deadline = Some(deadline);
        self.list.insert_after(threads, thread, |threads, other| {
            threads[other].deadline.is_some_and(|d| d <= deadline)
        });
    }

    /// Returns `true` if a timeout was armed.
    pub fn cancel(&mut self, threads: &mut ThreadTable, thread: ThreadIndex) -> bool {
        threads[thread].deadline = None;
        self.list.remove(threads, thread)
    }

    pub fn next_deadline(&self, threads: &ThreadTable) -> Option<Ticks> {
        self.list.head().and_then(|head| threads[head].deadline)
    }

    pub fn pop_expired(&mut self, threads: &mut ThreadTable, now: Ticks) -> Option<ThreadIndex> {
        let head = self.list.head()?;
        if threads[head].deadline.is_some_and(|d| d > now) {
            return None;
        }
        self.cancel(threads, head);
        Some(head)
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }
}

impl Scheduler {
    /// Advance time, expire timeouts and mark expired time slices.
    pub fn announce(&mut self, ticks: Ticks, cpu: CpuId) {
        self.now = self.now.saturating_add(ticks);
        while let Some(thread) = self.timeouts.pop_expired(&mut self.threads, self.now) {
            if self.threads[thread].state == ThreadState::Pending {
                self.unpend_thread(thread, WaitResult::TimedOut);
            }
        }
        for other in 0..self.num_cpus {
            let block = &mut self.cpus[other];
            if !block.active || !block.slice_deadline.is_some_and(|d| d <= self.now) {
                continue;
            }
            block.slice_deadline = None;
            block.slice_expired = true;
            if other != cpu {
                self.pending_ipis.insert(other);
            }
        }
        self.alarm_dirty = true;
    }
}

impl<H: HardwareAbstractionLayer> Kernel<H> {
    /// Announce `ticks` elapsed ticks. Called from the timer interrupt.
    pub fn tick_announce(&self, ticks: Ticks) {
        let cpu = self.hal.current_cpu();
        let mut sched = self.lock();
        sched.announce(ticks, cpu);
        self.handle_time_slice(sched, cpu);
    }

    /// Ticks announced since the kernel was created.
    pub fn uptime(&self) -> Ticks {
        self.lock().now
    }
}

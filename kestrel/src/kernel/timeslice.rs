//! Round-robin time slicing among equal-priority preemptible threads.
use crate::kernel::priority::Priority;
use crate::kernel::scheduler::{RescheduleKind, Scheduler};
use crate::kernel::tracing;
use crate::kernel::{Kernel, SchedulerGuard};
use crate::thread::raw_thread::ThreadIndex;
use crate::thread::{SliceExpiredFn, ThreadHandle, ThreadState};
use kestrel_khal::{CpuId, HardwareAbstractionLayer};

#[derive(Clone, Copy, Debug)]
pub(crate) struct SliceConfig {
    /// Global slice length, zero disables global slicing.
    pub ticks: u32,
    /// Threads more urgent than this are not sliced by the global setting.
    pub max_priority: Priority,
}

/// Slice of a thread that ran out, taken under the scheduler lock.
pub(crate) struct SliceExpiry {
    pub thread: ThreadIndex,
    pub callback: Option<(SliceExpiredFn, usize)>,
}

impl Scheduler {
    pub fn sliceable(&self, thread: ThreadIndex) -> bool {
        let raw = &self.threads[thread];
        if raw.idle || raw.state != ThreadState::Running || !self.preemptible(thread) {
            return false;
        }
        if raw.slice_ticks != 0 {
            return true;
        }
        self.slice.ticks != 0 && !raw.priority.is_more_urgent_than(self.slice.max_priority)
    }

    fn slice_length(&self, thread: ThreadIndex) -> u32 {
        match self.threads[thread].slice_ticks {
            0 => self.slice.ticks,
            ticks => ticks,
        }
    }

    /// Start a fresh slice for the current thread of `cpu`.
    pub fn reset_time_slice(&mut self, cpu: CpuId) {
        let slice = self.cpus[cpu]
            .current
            .filter(|&thread| self.sliceable(thread))
            .map(|thread| (thread, self.now.saturating_add(self.slice_length(thread) as u64)));
        let block = &mut self.cpus[cpu];
        block.slice_expired = false;
        block.slice_owner = slice.map(|(thread, _)| thread);
        block.slice_deadline = slice.map(|(_, deadline)| deadline);
        self.alarm_dirty = true;
    }

    /// Take the expired slice of `cpu` if it still belongs to the current thread.
    pub fn take_slice_expiry(&mut self, cpu: CpuId) -> Option<SliceExpiry> {
        let block = &mut self.cpus[cpu];
        if !core::mem::take(&mut block.slice_expired) {
            return None;
        }
        let current = block.current?;
        let stale = block.slice_owner != Some(current)
            || block.switch_pending == block.slice_owner
            || !self.sliceable(current);
        if stale {
            self.reset_time_slice(cpu);
            return None;
        }
        let raw = &self.threads[current];
        tracing::slice_expired(cpu, raw.name);
        Some(SliceExpiry {
            thread: current,
            callback: raw.slice_expired_fn.map(|callback| (callback, raw.slice_data)),
        })
    }

    /// Send the thread whose slice expired behind its peers.
    pub fn requeue_expired(&mut self, cpu: CpuId, thread: ThreadIndex) {
        let block = &mut self.cpus[cpu];
        if block.current == Some(thread) && self.threads[thread].state == ThreadState::Running {
            block.yield_requested = true;
        }
    }
}

impl<H: HardwareAbstractionLayer> Kernel<H> {
    /// Set the global slice length and the most urgent sliced priority.
    /// A zero length disables global slicing.
    pub fn set_time_slice(&self, ticks: u32, max_priority: Priority) {
        let cpu = self.hal.current_cpu();
        let mut sched = self.lock();
        sched.slice.ticks = ticks;
        sched.slice.max_priority = max_priority;
        if sched.cpus[cpu].current.is_some() {
            sched.reset_time_slice(cpu);
        }
        self.unlock(sched, cpu);
    }

    /// Give `thread` its own slice length, overriding the global setting,
    /// and an optional callback run when the slice expires. A zero length
    /// falls back to the global setting.
    #[track_caller]
    pub fn thread_set_time_slice(
        &self,
        thread: ThreadHandle,
        ticks: u32,
        expired: Option<SliceExpiredFn>,
        data: usize,
    ) {
        let cpu = self.hal.current_cpu();
        let mut sched = self.lock();
        let index = sched.threads.resolve(thread);
        let raw = &mut sched.threads[index];
        raw.slice_ticks = ticks;
        raw.slice_expired_fn = expired;
        raw.slice_data = data;
        if let Some(running_on) = raw.cpu {
            if running_on == cpu {
                sched.reset_time_slice(cpu);
            }
        }
        self.unlock(sched, cpu);
    }

    /// Handle a slice expiry of `cpu` and reschedule. The expiry callback
    /// runs without the scheduler lock held.
    pub(crate) fn handle_time_slice<'a>(&'a self, mut sched: SchedulerGuard<'a>, cpu: CpuId) {
        if let Some(expiry) = sched.take_slice_expiry(cpu) {
            if let Some((callback, data)) = expiry.callback {
                let handle = sched.threads.handle(expiry.thread);
                self.unlock(sched, cpu);
                callback(handle, data);
                sched = self.lock();
            }
            sched.requeue_expired(cpu, expiry.thread);
        }
        self.reschedule_point(sched, RescheduleKind::YieldToHigher);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KernelConfig;
    use crate::kernel::cpu::CpuMask;
    use crate::kernel::stack::Stack;

    fn running(sched: &mut Scheduler, priority: i16) -> ThreadIndex {
        let index = sched.threads.allocate().unwrap();
        let stack = Box::leak(Box::new(Stack::<512>::new())).init();
        let raw = &mut sched.threads[index];
        raw.occupy("t", Priority::new(priority).unwrap(), CpuMask::all(), stack);
        raw.state = ThreadState::Running;
        raw.cpu = Some(0);
        index
    }

    #[test]
    fn global_slice_respects_priority_threshold() {
        let config = KernelConfig::new().with_time_slice(10, Priority::preempt(2));
        let mut sched = Scheduler::new(&config);
        let urgent = running(&mut sched, 1);
        let sliced = running(&mut sched, 2);
        let coop = running(&mut sched, -1);
        assert!(!sched.sliceable(urgent));
        assert!(sched.sliceable(sliced));
        assert!(!sched.sliceable(coop));

        sched.threads[sliced].sched_locked = 1;
        assert!(!sched.sliceable(sliced));
    }

    #[test]
    fn thread_slice_overrides_global_setting() {
        let config = KernelConfig::new().with_time_slice(10, Priority::preempt(5));
        let mut sched = Scheduler::new(&config);
        let thread = running(&mut sched, 1);
        assert!(!sched.sliceable(thread));
        sched.threads[thread].slice_ticks = 3;
        assert!(sched.sliceable(thread));
        assert_eq!(sched.slice_length(thread), 3);

        sched.cpus[0].current = Some(thread);
        sched.now = 100;
        sched.reset_time_slice(0);
        assert_eq!(sched.cpus[0].slice_deadline, Some(103));
        assert_eq!(sched.cpus[0].slice_owner, Some(thread));
    }

    #[test]
    fn expiry_of_a_previous_owner_is_dropped() {
        let config = KernelConfig::new().with_time_slice(4, Priority::preempt(0));
        let mut sched = Scheduler::new(&config);
        let first = running(&mut sched, 3);
        let second = running(&mut sched, 3);
        sched.cpus[0].current = Some(first);
        sched.reset_time_slice(0);
        sched.cpus[0].current = Some(second);
        sched.cpus[0].slice_expired = true;
        assert!(sched.take_slice_expiry(0).is_none());
        assert_eq!(sched.cpus[0].slice_owner, Some(second));
    }
}

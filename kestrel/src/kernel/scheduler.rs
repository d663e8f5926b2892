//! Scheduler state and the dispatcher.
//!
//! Everything in [`Scheduler`] is protected by the kernel's scheduler
//! spinlock. Switching threads is split in two. [`Scheduler::select_and_commit`]
//! decides and updates all bookkeeping under the lock, then the kernel
//! releases the lock and asks the HAL to perform the switch. Until the
//! switched-in context reports back through [`Scheduler::finish_switch`], the
//! outgoing thread is recorded in the core's pending-switch register and no
//! other core may switch into it.
use crate::config::{KernelConfig, MAX_CPUS};
use crate::kernel::cpu::{CpuMask, PerCpu};
use crate::kernel::exception::{KernelError, RuntimeError};
use crate::kernel::priority::Priority;
use crate::kernel::ready_queue::ReadyQueue;
use crate::kernel::timeout::TimeoutList;
use crate::kernel::timeslice::SliceConfig;
use crate::kernel::tracing;
use crate::kernel::wait_queue::{WaitQueueIndex, WaitQueueTable, WaitResult};
use crate::thread::ThreadState;
use crate::thread::raw_thread::{ThreadIndex, ThreadTable};
use crate::time::Ticks;
use kestrel_khal::CpuId;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum RescheduleKind {
    /// Switch only to a more urgent thread.
    YieldToHigher,
    /// Switch also to a thread of equal priority, sending the current thread
    /// behind its peers.
    YieldToEqual,
}

/// A switch committed by the dispatcher, to be performed by the HAL.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Switch {
    pub cpu: CpuId,
    pub from: ThreadIndex,
    pub to: ThreadIndex,
    pub from_name: &'static str,
    pub to_name: &'static str,
    pub to_idle: bool,
}

pub(crate) struct Scheduler {
    pub now: Ticks,
    pub threads: ThreadTable,
    pub ready: ReadyQueue,
    pub wait_queues: WaitQueueTable,
    pub timeouts: TimeoutList,
    pub cpus: [PerCpu; MAX_CPUS],
    pub num_cpus: usize,
    pub slice: SliceConfig,
    pub pending_ipis: CpuMask,
    /// The wakeup alarm must be reprogrammed before the lock is released.
    pub alarm_dirty: bool,
}

impl Scheduler {
    pub fn new(config: &KernelConfig) -> Scheduler {
        Scheduler {
            now: 0,
            threads: ThreadTable::new(),
            ready: ReadyQueue::new(),
            wait_queues: WaitQueueTable::new(),
            timeouts: TimeoutList::new(),
            cpus: core::array::from_fn(PerCpu::new),
            num_cpus: config.num_cpus,
            slice: SliceConfig {
                ticks: config.slice_ticks,
                max_priority: config.slice_max_priority,
            },
            pending_ipis: CpuMask::NONE,
            alarm_dirty: false,
        }
    }

    #[track_caller]
    pub fn current(&self, cpu: CpuId) -> ThreadIndex {
        match self.cpus.get(cpu).and_then(|block| block.current) {
            Some(thread) => thread,
            None => runtime_error!(RuntimeError::CpuNotStarted { cpu }),
        }
    }

    /// Coop threads and threads holding the scheduler lock are never preempted.
    pub fn preemptible(&self, thread: ThreadIndex) -> bool {
        let thread = &self.threads[thread];
        thread.priority.is_preemptible() && thread.sched_locked == 0
    }

    pub fn make_ready(&mut self, thread: ThreadIndex) {
        if self.threads[thread].cpu.is_some() {
            // Still current on its core, which has not switched away yet.
            self.threads[thread].state = ThreadState::Running;
            return;
        }
        self.threads[thread].state = ThreadState::Ready;
        tracing::thread_ready_begin(self.threads[thread].name);
        self.ready.push_back(&mut self.threads, thread);
        self.flag_ipi_for(thread);
    }

    /// Flag an IPI to every core where `thread` should preempt the current thread.
    pub fn flag_ipi_for(&mut self, thread: ThreadIndex) {
        let priority = self.threads[thread].priority;
        let affinity = self.threads[thread].affinity;
        for cpu in 0..self.num_cpus {
            let block = &self.cpus[cpu];
            if !block.active || !affinity.contains(cpu) {
                continue;
            }
            let Some(current) = block.current else {
                continue;
            };
            let running = &self.threads[current];
            if running.idle
                || running.state != ThreadState::Running
                || (self.preemptible(current) && priority.is_more_urgent_than(running.priority))
            {
                self.pending_ipis.insert(cpu);
            }
        }
    }

    /// IPIs to send to other cores when the lock is released.
    pub fn take_ipis(&mut self, cpu: CpuId) -> CpuMask {
        let mut ipis = core::mem::take(&mut self.pending_ipis);
        ipis.remove(cpu);
        ipis
    }

    /// Block `thread`, which is current on its core, until unpended or timed out.
    pub fn pend_thread(
        &mut self,
        thread: ThreadIndex,
        queue: Option<WaitQueueIndex>,
        deadline: Option<Ticks>,
    ) {
        if self.threads[thread].state == ThreadState::Ready {
            self.ready.remove(&mut self.threads, thread);
        }
        let raw = &mut self.threads[thread];
        raw.state = ThreadState::Pending;
        raw.wait_result = None;
        raw.wait_queue = queue;
        if let Some(queue) = queue {
            self.wait_queues.insert(&mut self.threads, queue, thread);
        }
        if let Some(deadline) = deadline {
            self.timeouts.arm(&mut self.threads, thread, deadline);
            self.alarm_dirty = true;
        }
    }

    /// Resolve the wait of a pending thread and make it ready.
    pub fn unpend_thread(&mut self, thread: ThreadIndex, result: WaitResult) {
        if let Some(queue) = self.threads[thread].wait_queue.take() {
            self.wait_queues.remove(&mut self.threads, queue, thread);
        }
        if self.timeouts.cancel(&mut self.threads, thread) {
            self.alarm_dirty = true;
        }
        self.threads[thread].wait_result = Some(result);
        self.make_ready(thread);
    }

    pub fn unpend_first(&mut self, queue: WaitQueueIndex, result: WaitResult) -> Option<ThreadIndex> {
        let thread = self.wait_queues.first(queue)?;
        self.unpend_thread(thread, result);
        Some(thread)
    }

    pub fn unpend_all(&mut self, queue: WaitQueueIndex, result: WaitResult) -> usize {
        let mut woken = 0;
        while self.unpend_first(queue, result).is_some() {
            woken += 1;
        }
        woken
    }

    /// Thread that should occupy `cpu` next.
    fn next_up(&self, cpu: CpuId, yield_to_equal: bool) -> ThreadIndex {
        let block = &self.cpus[cpu];
        let current = self.current(cpu);
        let idle = block.idle_thread.unwrap_or(current);
        if !block.active {
            return idle;
        }
        let candidate = self
            .ready
            .best(&self.threads, |t| t.affinity.contains(cpu) && !t.saving_context);
        let running = &self.threads[current];
        if running.state != ThreadState::Running {
            return candidate.unwrap_or(idle);
        }
        let Some(candidate) = candidate else {
            return current;
        };
        if running.idle {
            return candidate;
        }
        let candidate_priority = self.threads[candidate].priority;
        if candidate_priority.is_more_urgent_than(running.priority) {
            if yield_to_equal || self.preemptible(current) {
                candidate
            } else {
                current
            }
        } else if yield_to_equal && !running.priority.is_more_urgent_than(candidate_priority) {
            candidate
        } else {
            current
        }
    }

    /// Pick the next thread of `cpu` and commit the switch to it, if any.
    pub fn select_and_commit(&mut self, cpu: CpuId, kind: RescheduleKind) -> Option<Switch> {
        self.cpus[cpu].current?;
        if self.cpus[cpu].switch_pending.is_some() {
            // Inside the switch window; re-evaluated by `finish_switch`.
            return None;
        }
        let yield_to_equal = kind == RescheduleKind::YieldToEqual
            || core::mem::take(&mut self.cpus[cpu].yield_requested);
        let current = self.current(cpu);
        let next = self.next_up(cpu, yield_to_equal);
        if next == current {
            if yield_to_equal {
                self.reset_time_slice(cpu);
            }
            return None;
        }
        Some(self.commit_switch(cpu, next, yield_to_equal))
    }

    fn commit_switch(&mut self, cpu: CpuId, to: ThreadIndex, requeue_back: bool) -> Switch {
        let from = self.current(cpu);

        let outgoing = &mut self.threads[from];
        if let Some(stack) = &outgoing.stack {
            if !stack.is_alive() {
                kernel_error!(KernelError::StackOverflow {
                    thread_name: outgoing.name,
                    stack_size: stack.size(),
                });
            }
        }
        outgoing.cpu = None;
        outgoing.saving_context = true;
        if outgoing.state == ThreadState::Running {
            outgoing.state = ThreadState::Ready;
            if !outgoing.idle {
                // Other cores are told about it once its context is saved.
                if requeue_back {
                    self.ready.push_back(&mut self.threads, from);
                } else {
                    self.ready.push_front(&mut self.threads, from);
                }
            }
        }

        if !self.threads[to].idle {
            self.ready.remove(&mut self.threads, to);
            tracing::thread_ready_end(self.threads[to].name);
        }
        let incoming = &mut self.threads[to];
        incoming.state = ThreadState::Running;
        incoming.cpu = Some(cpu);

        let block = &mut self.cpus[cpu];
        block.current = Some(to);
        block.switch_pending = Some(from);
        block.yield_requested = false;
        self.reset_time_slice(cpu);

        Switch {
            cpu,
            from,
            to,
            from_name: self.threads[from].name,
            to_name: self.threads[to].name,
            to_idle: self.threads[to].idle,
        }
    }

    /// Clear the pending-switch register of `cpu` once the outgoing context
    /// has been saved, making the outgoing thread available to other cores.
    pub fn finish_switch(&mut self, cpu: CpuId) {
        let Some(from) = self.cpus[cpu].switch_pending.take() else {
            return;
        };
        self.threads[from].saving_context = false;
        match self.threads[from].state {
            ThreadState::Ready if !self.threads[from].idle => self.flag_ipi_for(from),
            ThreadState::Dead => {
                self.unpend_all(WaitQueueTable::join_queue(from), WaitResult::Success(0));
                self.try_release(from);
            }
            _ => {}
        }
    }

    /// Core that `thread` is current on or still saving its context on.
    pub fn occupied_by(&self, thread: ThreadIndex) -> Option<CpuId> {
        self.threads[thread].cpu.or_else(|| {
            (0..self.num_cpus).find(|&cpu| self.cpus[cpu].switch_pending == Some(thread))
        })
    }

    /// Terminate `thread`. Its joiners are woken here if it is off every
    /// core, otherwise by the `finish_switch` of the core it leaves.
    pub fn abort_thread(&mut self, thread: ThreadIndex, cpu: CpuId) {
        match self.threads[thread].state {
            ThreadState::Dead => return,
            ThreadState::Ready => {
                self.ready.remove(&mut self.threads, thread);
            }
            ThreadState::Pending => {
                if let Some(queue) = self.threads[thread].wait_queue.take() {
                    self.wait_queues.remove(&mut self.threads, queue, thread);
                }
            }
            ThreadState::New | ThreadState::Running | ThreadState::Suspended => {}
        }
        if let Some(running_on) = self.threads[thread].cpu {
            if running_on != cpu {
                self.pending_ipis.insert(running_on);
            }
        }
        if self.timeouts.cancel(&mut self.threads, thread) {
            self.alarm_dirty = true;
        }
        let raw = &mut self.threads[thread];
        raw.state = ThreadState::Dead;
        raw.wait_result = None;
        raw.sched_locked = 0;
        if self.occupied_by(thread).is_none() {
            self.unpend_all(WaitQueueTable::join_queue(thread), WaitResult::Success(0));
        }
    }

    #[track_caller]
    pub fn suspend_thread(&mut self, thread: ThreadIndex, cpu: CpuId) {
        match self.threads[thread].state {
            ThreadState::New => runtime_error!(RuntimeError::ThreadNotStarted {
                thread_name: self.threads[thread].name
            }),
            ThreadState::Suspended | ThreadState::Dead => return,
            ThreadState::Ready => {
                self.ready.remove(&mut self.threads, thread);
            }
            ThreadState::Pending => {
                if let Some(queue) = self.threads[thread].wait_queue.take() {
                    self.wait_queues.remove(&mut self.threads, queue, thread);
                }
                if self.timeouts.cancel(&mut self.threads, thread) {
                    self.alarm_dirty = true;
                }
                self.threads[thread].wait_result = Some(WaitResult::Cancelled);
            }
            ThreadState::Running => {
                if let Some(running_on) = self.threads[thread].cpu {
                    if running_on != cpu {
                        self.pending_ipis.insert(running_on);
                    }
                }
            }
        }
        self.threads[thread].state = ThreadState::Suspended;
    }

    pub fn resume_thread(&mut self, thread: ThreadIndex) -> bool {
        if self.threads[thread].state != ThreadState::Suspended {
            return false;
        }
        self.make_ready(thread);
        true
    }

    pub fn set_priority(&mut self, thread: ThreadIndex, priority: Priority, cpu: CpuId) {
        match self.threads[thread].state {
            ThreadState::Ready => {
                self.ready.remove(&mut self.threads, thread);
                self.threads[thread].priority = priority;
                self.ready.push_back(&mut self.threads, thread);
                self.flag_ipi_for(thread);
            }
            ThreadState::Pending => {
                self.threads[thread].priority = priority;
                if let Some(queue) = self.threads[thread].wait_queue {
                    self.wait_queues.remove(&mut self.threads, queue, thread);
                    self.wait_queues.insert(&mut self.threads, queue, thread);
                }
            }
            ThreadState::Running => {
                self.threads[thread].priority = priority;
                if let Some(running_on) = self.threads[thread].cpu {
                    if running_on != cpu {
                        self.pending_ipis.insert(running_on);
                    }
                }
            }
            ThreadState::New | ThreadState::Suspended | ThreadState::Dead => {
                self.threads[thread].priority = priority;
            }
        }
    }

    /// Free the slot of a joined thread once no core references it.
    pub fn try_release(&mut self, thread: ThreadIndex) {
        let raw = &self.threads[thread];
        if raw.in_use
            && raw.state == ThreadState::Dead
            && raw.joined
            && raw.cpu.is_none()
            && !raw.saving_context
            && self.wait_queues.len(WaitQueueTable::join_queue(thread)) == 0
        {
            log::debug!("thread {} released", raw.name);
            self.threads.release(thread);
        }
    }

    /// Earliest timeout or slice deadline.
    pub fn next_deadline(&self) -> Option<Ticks> {
        let slices = self.cpus[..self.num_cpus]
            .iter()
            .filter(|block| block.active)
            .filter_map(|block| block.slice_deadline);
        self.timeouts
            .next_deadline(&self.threads)
            .into_iter()
            .chain(slices)
            .min()
    }
}

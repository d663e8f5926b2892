//! Application Programming Interface
//!
//! Thread lifecycle, scheduling control and diagnostics of [`Kernel`].
use crate::config::MIN_STACK_SIZE;
use crate::kernel::{Kernel, SchedulerGuard, thread_start};
use crate::kernel::cpu::CpuMask;
use crate::kernel::exception::RuntimeError;
use crate::kernel::priority::Priority;
use crate::kernel::scheduler::{RescheduleKind, Scheduler};
use crate::kernel::tracing;
use crate::kernel::wait_queue::{WaitQueueTable, WaitResult};
use crate::thread::raw_thread::ThreadIndex;
use crate::thread::{
    AffinityError, CreateError, JoinError, ThreadHandle, ThreadInfo, ThreadSpec, ThreadState,
};
use crate::time::{Ticks, Timeout};
use kestrel_khal::{ContextInit, CpuId, HardwareAbstractionLayer};

impl<H: HardwareAbstractionLayer> Kernel<H> {
    /// Create a thread in the `New` state.
    ///
    /// A priority outside of the configured range or a stack smaller than
    /// `MIN_STACK_SIZE` is a fatal error.
    #[track_caller]
    pub fn thread_create(&self, spec: ThreadSpec) -> Result<ThreadHandle, CreateError> {
        let Some(priority) = Priority::new(spec.priority) else {
            runtime_error!(RuntimeError::PriorityOutOfRange {
                priority: spec.priority
            });
        };
        if spec.stack.size() < MIN_STACK_SIZE {
            runtime_error!(RuntimeError::StackTooSmall {
                stack_size: spec.stack.size(),
                min_size: MIN_STACK_SIZE,
            });
        }
        let mut sched = self.lock();
        let index = sched.threads.allocate().ok_or(CreateError::NoFreeSlot)?;
        let init = ContextInit {
            thread: index as usize,
            name: spec.name,
            entry: spec.entry,
            argument: spec.argument,
            start: Some(thread_start::<H>),
            kernel: self as *const Kernel<H> as *const (),
            stack_ptr: spec.stack.bottom_ptr(),
            stack_size: spec.stack.size(),
            idle: false,
        };
        let thread = &mut sched.threads[index];
        thread.occupy(spec.name, priority, spec.affinity, spec.stack);
        thread.essential = spec.essential;
        self.init_context(index, &init);
        tracing::thread_new(index as usize, spec.name);
        log::debug!("thread {} created at priority {}", spec.name, priority);
        Ok(sched.threads.handle(index))
    }

    /// Make a `New` thread ready. Starting a thread twice is a fatal error.
    #[track_caller]
    pub fn thread_start(&self, thread: ThreadHandle) {
        let mut sched = self.lock();
        let index = sched.threads.resolve(thread);
        if sched.threads[index].state != ThreadState::New {
            runtime_error!(RuntimeError::ThreadAlreadyStarted {
                thread_name: sched.threads[index].name
            });
        }
        sched.make_ready(index);
        self.reschedule_point(sched, RescheduleKind::YieldToHigher);
    }

    /// Create and start a thread.
    #[track_caller]
    pub fn spawn(&self, spec: ThreadSpec) -> Result<ThreadHandle, CreateError> {
        let thread = self.thread_create(spec)?;
        self.thread_start(thread);
        Ok(thread)
    }

    /// Terminate `thread` and wake its joiners.
    ///
    /// When this returns the thread runs on no core. A thread running on
    /// another core stops when that core handles the IPI sent here; the caller
    /// waits on the join queue of the target until then, or spins from
    /// interrupt handlers and idle threads. Aborting an idle or essential
    /// thread is fatal.
    #[track_caller]
    pub fn thread_abort(&self, thread: ThreadHandle) {
        let cpu = self.hal.current_cpu();
        let mut sched = self.lock();
        let index = sched.threads.resolve(thread);
        let raw = &sched.threads[index];
        if raw.idle {
            runtime_error!(RuntimeError::IdleThreadAbort);
        }
        if raw.essential && raw.state != ThreadState::Dead {
            runtime_error!(RuntimeError::EssentialThreadTerminated {
                thread_name: raw.name
            });
        }
        log::debug!("thread {} aborted", raw.name);
        sched.abort_thread(index, cpu);
        match sched.occupied_by(index) {
            Some(remote) if remote != cpu => self.await_stopped(sched, thread, cpu),
            _ => self.reschedule_point(sched, RescheduleKind::YieldToHigher),
        }
    }

    /// Wait until the aborted `thread` has been switched out by its core.
    #[track_caller]
    fn await_stopped<'a>(&'a self, mut sched: SchedulerGuard<'a>, thread: ThreadHandle, cpu: CpuId) {
        let current = sched.current(cpu);
        let can_block = !self.local(cpu).in_interrupt()
            && !sched.threads[current].idle
            && sched.irq_key().interrupts_enabled();
        if can_block {
            let joiners = WaitQueueTable::join_queue(thread.slot());
            if let Ok(waiter) = self.block_current(sched, Some(joiners), Timeout::Forever) {
                self.wait_result_after_switch(waiter);
            }
            return;
        }
        while sched
            .threads
            .lookup(thread)
            .is_some_and(|target| sched.occupied_by(target).is_some())
        {
            self.unlock(sched, cpu);
            core::hint::spin_loop();
            sched = self.lock();
        }
        self.reschedule_point(sched, RescheduleKind::YieldToHigher);
    }

    /// Terminate the calling thread.
    #[track_caller]
    pub fn thread_exit(&self) {
        let cpu = self.require_thread_context();
        let current = {
            let sched = self.lock();
            let current = sched.current(cpu);
            sched.threads.handle(current)
        };
        self.thread_abort(current);
    }

    /// Wait for `thread` to terminate.
    ///
    /// The slot of the thread is released once it is dead and every waiting
    /// joiner has been woken; the handle is stale after that.
    #[track_caller]
    pub fn thread_join(&self, thread: ThreadHandle, timeout: Timeout) -> Result<(), JoinError> {
        let cpu = self.hal.current_cpu();
        let mut sched = self.lock();
        let target = sched.threads.resolve(thread);
        if sched.threads[target].state == ThreadState::Dead && sched.occupied_by(target).is_none() {
            sched.threads[target].joined = true;
            sched.try_release(target);
            self.unlock(sched, cpu);
            return Ok(());
        }
        if timeout.is_no_wait() {
            self.unlock(sched, cpu);
            return Err(JoinError::Busy);
        }
        if self.local(cpu).in_interrupt() {
            runtime_error!(RuntimeError::InterruptHandlerViolation);
        }
        let current = sched.current(cpu);
        if current == target
            || sched.threads[target].is_pending_on(WaitQueueTable::join_queue(current))
        {
            self.unlock(sched, cpu);
            return Err(JoinError::Deadlock);
        }
        let waiter = match self.block_current(sched, Some(WaitQueueTable::join_queue(target)), timeout) {
            Ok(waiter) => waiter,
            Err(_) => return Err(JoinError::Busy),
        };
        match self.wait_result_after_switch(waiter) {
            WaitResult::Success(_) => {
                let mut sched = self.lock();
                if let Some(target) = sched.threads.lookup(thread) {
                    sched.threads[target].joined = true;
                    sched.try_release(target);
                }
                self.unlock(sched, cpu);
                Ok(())
            }
            WaitResult::TimedOut => Err(JoinError::TimedOut),
            WaitResult::Cancelled => Err(JoinError::Cancelled),
        }
    }

    /// Take `thread` out of scheduling until [`Kernel::thread_resume`].
    ///
    /// A pending thread leaves its wait queue and its wait resolves
    /// [`WaitResult::Cancelled`].
    #[track_caller]
    pub fn thread_suspend(&self, thread: ThreadHandle) {
        let cpu = self.hal.current_cpu();
        let mut sched = self.lock();
        let index = sched.threads.resolve(thread);
        if sched.threads[index].idle {
            runtime_error!(RuntimeError::IdleThreadSuspend);
        }
        sched.suspend_thread(index, cpu);
        self.reschedule_point(sched, RescheduleKind::YieldToHigher);
    }

    /// Resume a suspended thread. Does nothing for threads in other states.
    #[track_caller]
    pub fn thread_resume(&self, thread: ThreadHandle) {
        let cpu = self.hal.current_cpu();
        let mut sched = self.lock();
        let index = sched.threads.resolve(thread);
        if sched.resume_thread(index) {
            self.reschedule_point(sched, RescheduleKind::YieldToHigher);
        } else {
            self.unlock(sched, cpu);
        }
    }

    /// Change the priority of `thread`, repositioning it in the ready queue
    /// or its wait queue. Out-of-range priorities are fatal.
    #[track_caller]
    pub fn thread_priority_set(&self, thread: ThreadHandle, priority: i16) {
        let Some(new_priority) = Priority::new(priority) else {
            runtime_error!(RuntimeError::PriorityOutOfRange { priority });
        };
        let cpu = self.hal.current_cpu();
        let mut sched = self.lock();
        let index = sched.threads.resolve(thread);
        if sched.threads[index].idle {
            log::warn!("priority of an idle thread cannot be changed");
            self.unlock(sched, cpu);
            return;
        }
        sched.set_priority(index, new_priority, cpu);
        if sched.cpus[cpu].current == Some(index) {
            sched.reset_time_slice(cpu);
        }
        self.reschedule_point(sched, RescheduleKind::YieldToHigher);
    }

    #[track_caller]
    pub fn thread_priority(&self, thread: ThreadHandle) -> Priority {
        self.with_thread(thread, |info| info.priority)
    }

    #[track_caller]
    pub fn thread_state(&self, thread: ThreadHandle) -> ThreadState {
        self.with_thread(thread, |info| info.state)
    }

    #[track_caller]
    pub fn thread_name(&self, thread: ThreadHandle) -> &'static str {
        self.with_thread(thread, |info| info.name)
    }

    #[track_caller]
    pub fn thread_info(&self, thread: ThreadHandle) -> ThreadInfo {
        self.with_thread(thread, |info| info)
    }

    #[track_caller]
    fn with_thread<R>(&self, thread: ThreadHandle, f: impl FnOnce(ThreadInfo) -> R) -> R {
        let sched = self.lock();
        let index = sched.threads.resolve(thread);
        f(sched.threads.info(index))
    }

    /// Log every thread, then every configured core, with `log::info!`.
    pub fn print_threads(&self) {
        let sched = self.lock();
        for index in sched.threads.occupied() {
            let info = sched.threads.info(index);
            log::info!(
                "{:>2} {:<16} {:<9?} prio {:>3} cpu {:<4} {:?}",
                index,
                info.name,
                info.state,
                info.priority,
                match info.cpu {
                    Some(cpu) => cpu as isize,
                    None => -1,
                },
                info.affinity
            );
        }
        for block in &sched.cpus[..sched.num_cpus] {
            let current = block.current.map_or("-", |thread| sched.threads[thread].name);
            log::info!(
                "cpu{} {:<7} current {:<16} interrupt stack {} bytes",
                block.id,
                if block.active { "active" } else { "offline" },
                current,
                block.interrupt_stack.as_ref().map_or(0, |stack| stack.size())
            );
        }
    }

    /// Remove every core from the affinity of a thread that is not runnable.
    #[track_caller]
    pub fn cpu_mask_clear(&self, thread: ThreadHandle) -> Result<(), AffinityError> {
        self.modify_affinity(thread, |mask| *mask = CpuMask::NONE)
    }

    #[track_caller]
    pub fn cpu_mask_enable_all(&self, thread: ThreadHandle) -> Result<(), AffinityError> {
        self.modify_affinity(thread, |mask| *mask = CpuMask::all())
    }

    #[track_caller]
    pub fn cpu_mask_enable(&self, thread: ThreadHandle, cpu: CpuId) -> Result<(), AffinityError> {
        self.check_cpu(cpu);
        self.modify_affinity(thread, |mask| mask.insert(cpu))
    }

    #[track_caller]
    pub fn cpu_mask_disable(&self, thread: ThreadHandle, cpu: CpuId) -> Result<(), AffinityError> {
        self.check_cpu(cpu);
        self.modify_affinity(thread, |mask| mask.remove(cpu))
    }

    /// Restrict a thread to exactly one core.
    #[track_caller]
    pub fn cpu_pin(&self, thread: ThreadHandle, cpu: CpuId) -> Result<(), AffinityError> {
        self.check_cpu(cpu);
        self.modify_affinity(thread, |mask| *mask = CpuMask::single(cpu))
    }

    #[track_caller]
    fn check_cpu(&self, cpu: CpuId) {
        if cpu >= self.num_cpus() {
            runtime_error!(RuntimeError::InvalidCpu { cpu });
        }
    }

    #[track_caller]
    fn modify_affinity(
        &self,
        thread: ThreadHandle,
        f: impl FnOnce(&mut CpuMask),
    ) -> Result<(), AffinityError> {
        let mut sched = self.lock();
        let index = sched.threads.resolve(thread);
        let raw = &mut sched.threads[index];
        if matches!(raw.state, ThreadState::Ready | ThreadState::Running) || raw.idle {
            return Err(AffinityError::ThreadRunnable);
        }
        f(&mut raw.affinity);
        Ok(())
    }

    /// Let equal-priority threads run. Fatal in interrupt context.
    #[track_caller]
    pub fn yield_now(&self) {
        self.require_thread_context();
        let sched = self.lock();
        self.reschedule_point(sched, RescheduleKind::YieldToEqual);
    }

    /// Sleep for `timeout`. Returns the ticks that were left when woken
    /// early by [`Kernel::wakeup`], or 0 if the full timeout elapsed.
    /// An unbounded sleep woken early returns `Ticks::MAX`.
    #[track_caller]
    pub fn sleep(&self, timeout: Timeout) -> Ticks {
        let sched = self.lock();
        let deadline = timeout.deadline(sched.now);
        let sleeper = match self.block_current(sched, None, timeout) {
            Ok(sleeper) => sleeper,
            Err(_) => return 0,
        };
        match self.wait_result_after_switch(sleeper) {
            WaitResult::TimedOut => 0,
            _ => match deadline {
                Some(deadline) => deadline.saturating_sub(self.uptime()),
                None => Ticks::MAX,
            },
        }
    }

    /// End the sleep of `thread`. Threads that are not sleeping are not
    /// affected.
    #[track_caller]
    pub fn wakeup(&self, thread: ThreadHandle) {
        let cpu = self.hal.current_cpu();
        let mut sched = self.lock();
        let index = sched.threads.resolve(thread);
        if sched.threads[index].is_sleeping() {
            sched.unpend_thread(index, WaitResult::Success(0));
            self.reschedule_point(sched, RescheduleKind::YieldToHigher);
        } else {
            self.unlock(sched, cpu);
        }
    }

    /// Prevent the calling thread from being preempted or time-sliced until
    /// the matching [`Kernel::sched_unlock`]. Calls nest.
    #[track_caller]
    pub fn sched_lock(&self) {
        let cpu = self.require_thread_context();
        let mut sched = self.lock();
        let current = sched.current(cpu);
        sched.threads[current].sched_locked += 1;
        sched.reset_time_slice(cpu);
        self.unlock(sched, cpu);
    }

    #[track_caller]
    pub fn sched_unlock(&self) {
        let cpu = self.require_thread_context();
        let mut sched = self.lock();
        let current = sched.current(cpu);
        let raw = &mut sched.threads[current];
        if raw.sched_locked == 0 {
            runtime_error!(RuntimeError::UnbalancedSchedUnlock);
        }
        raw.sched_locked -= 1;
        if raw.sched_locked == 0 {
            sched.reset_time_slice(cpu);
            self.reschedule_point(sched, RescheduleKind::YieldToHigher);
        } else {
            self.unlock(sched, cpu);
        }
    }

    /// Thread running on the calling core, `None` if the core is offline.
    pub fn current_thread(&self) -> Option<ThreadHandle> {
        let cpu = self.hal.current_cpu();
        let sched = self.lock();
        sched.cpus.get(cpu)?.current.map(|thread| sched.threads.handle(thread))
    }

    /// Called from a thread that can be preempted right now.
    pub fn is_preempt_thread(&self) -> bool {
        self.with_current(|sched, current| !sched.threads[current].idle && sched.preemptible(current))
    }

    /// Called from a thread that may block or yield.
    pub fn can_yield(&self) -> bool {
        self.with_current(|sched, current| !sched.threads[current].idle)
    }

    /// `false` from interrupt context or an offline core.
    fn with_current(&self, f: impl FnOnce(&Scheduler, ThreadIndex) -> bool) -> bool {
        let cpu = self.hal.current_cpu();
        if self.local(cpu).in_interrupt() {
            return false;
        }
        let sched = self.lock();
        match sched.cpus.get(cpu).and_then(|block| block.current) {
            Some(current) => f(&sched, current),
            None => false,
        }
    }
}

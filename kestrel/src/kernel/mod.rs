#[macro_use]
pub mod exception;
pub mod cpu;
pub(crate) mod idle;
pub mod interrupt;
pub(crate) mod list;
pub mod priority;
pub(crate) mod ready_queue;
pub(crate) mod scheduler;
pub mod smp;
pub mod stack;
pub(crate) mod timeout;
pub(crate) mod timeslice;
pub(crate) mod tracing;
pub mod wait_queue;

use crate::config::{KernelConfig, MAX_CPUS, MAX_THREADS};
use crate::sync::spinlock::{SpinLock, SpinLockGuard};
use crate::thread::raw_thread::ThreadIndex;
use core::cell::UnsafeCell;
use core::sync::atomic::AtomicUsize;
use cpu::{CpuLocal, CpuStacks};
pub(crate) use exception::{KernelError, RuntimeError};
use kestrel_khal::{ContextInfo, ContextInit, CpuId, HardwareAbstractionLayer};
use scheduler::{RescheduleKind, Scheduler, Switch};

pub(crate) type SchedulerGuard<'a> = SpinLockGuard<'a, Scheduler>;

/// Execution context storage of one thread slot.
pub(crate) struct ContextCell<C>(UnsafeCell<Option<C>>);

// SAFETY: a context is only accessed by the core that committed a switch
// through it, serialized by the scheduler lock and the pending-switch register.
unsafe impl<C: Send> Sync for ContextCell<C> {}

impl<C> ContextCell<C> {
    const fn new() -> ContextCell<C> {
        ContextCell(UnsafeCell::new(None))
    }
}

/// The scheduler core of one system.
///
/// All kernel state lives in this value. Cores are started with
/// [`Kernel::start_core`] and every kernel operation acts on the core that
/// calls it, as reported by the HAL. Thread contexts refer back to the
/// kernel, so it must not move once threads have been created; keep it in a
/// static.
pub struct Kernel<H: HardwareAbstractionLayer> {
    pub(crate) hal: H,
    sched: SpinLock<Scheduler>,
    locals: [CpuLocal; MAX_CPUS],
    active_cpus: AtomicUsize,
    contexts: [ContextCell<H::Context>; MAX_THREADS],
}

impl<H: HardwareAbstractionLayer> Kernel<H> {
    /// Create the kernel and bring the calling core online on `boot` stacks.
    #[track_caller]
    pub fn new(hal: H, config: KernelConfig, boot: CpuStacks) -> Kernel<H> {
        let available = MAX_CPUS.min(hal.num_cpus());
        if config.num_cpus == 0 || config.num_cpus > available {
            runtime_error!(RuntimeError::InvalidCpu {
                cpu: config.num_cpus
            });
        }
        let cpu = hal.current_cpu();
        if cpu >= config.num_cpus {
            runtime_error!(RuntimeError::InvalidCpu { cpu });
        }
        let kernel = Kernel {
            hal,
            sched: SpinLock::new(Scheduler::new(&config)),
            locals: core::array::from_fn(|_| CpuLocal::new()),
            active_cpus: AtomicUsize::new(0),
            contexts: core::array::from_fn(|_| ContextCell::new()),
        };
        log::info!(
            "kestrel on {} HAL, {} of {} cores configured",
            H::NAME,
            config.num_cpus,
            available
        );
        kernel.online_core(cpu, boot);
        kernel
    }

    pub fn hal(&self) -> &H {
        &self.hal
    }

    pub(crate) fn lock(&self) -> SchedulerGuard<'_> {
        self.sched.lock(&self.hal)
    }

    pub(crate) fn local(&self, cpu: CpuId) -> &CpuLocal {
        &self.locals[cpu]
    }

    pub(crate) fn init_context(&self, thread: ThreadIndex, init: &ContextInit) {
        // SAFETY: the slot is either new or the idle thread of a core that is
        // coming online, so no core can be switching through it.
        unsafe { *self.contexts[thread as usize].0.get() = Some(H::Context::new(init)) }
    }

    #[track_caller]
    fn context_ptr(&self, thread: ThreadIndex) -> *mut H::Context {
        let slot = self.contexts[thread as usize].0.get();
        // SAFETY: only the core that committed the switch through this
        // context dereferences the returned pointer.
        match unsafe { (*slot).as_mut() } {
            Some(context) => context as *mut H::Context,
            None => kernel_error!(KernelError::MissingContext {
                thread: thread as usize
            }),
        }
    }

    /// Reschedule the calling core now, or defer it to interrupt exit or the
    /// release of the outermost spinlock when switching is not possible here.
    pub(crate) fn reschedule_point(&self, sched: SchedulerGuard<'_>, kind: RescheduleKind) {
        let cpu = self.hal.current_cpu();
        let local = self.local(cpu);
        if local.in_interrupt() || !sched.irq_key().interrupts_enabled() {
            local.request_reschedule();
            self.unlock(sched, cpu);
        } else {
            self.dispatch(sched, cpu, kind);
        }
    }

    /// Select, commit and perform the next switch of `cpu`.
    pub(crate) fn dispatch(&self, mut sched: SchedulerGuard<'_>, cpu: CpuId, kind: RescheduleKind) {
        let local = self.local(cpu);
        local.take_reschedule();
        let switch = sched.select_and_commit(cpu, kind);
        if let Some(switch) = &switch {
            local.set_current(switch.to);
        }
        self.unlock(sched, cpu);
        if let Some(switch) = switch {
            self.switch_context(switch);
        }
    }

    /// Release the scheduler lock, reprogramming the alarm and sending the
    /// IPIs flagged while it was held.
    pub(crate) fn unlock(&self, mut sched: SchedulerGuard<'_>, cpu: CpuId) {
        let ipis = sched.take_ipis(cpu);
        if core::mem::take(&mut sched.alarm_dirty) {
            match sched.next_deadline() {
                Some(at) => self.hal.set_wakeup(at),
                None => self.hal.disable_wakeup(),
            }
        }
        drop(sched);
        if !ipis.is_empty() {
            self.hal.send_ipi(ipis.bits());
        }
    }

    fn switch_context(&self, switch: Switch) {
        log::trace!(
            "cpu{}: switch {} -> {}",
            switch.cpu,
            switch.from_name,
            switch.to_name
        );
        tracing::thread_exec_end(switch.cpu, switch.from_name);
        if switch.to_idle {
            tracing::system_idle(switch.cpu);
        } else {
            tracing::thread_exec_begin(switch.cpu, switch.to_name);
        }
        let from = self.context_ptr(switch.from);
        let to = self.context_ptr(switch.to);
        // SAFETY: the switch is committed, `from` is marked as saving its
        // context and `to` is current on this core only.
        unsafe { self.hal.context_switch(switch.cpu, from, to) };
        self.finish_switch();
    }

    /// Complete the last switch of the calling core. The HAL calls this when
    /// a thread runs for the first time; resumed threads call it on return
    /// from `context_switch`.
    pub fn finish_switch(&self) {
        let cpu = self.hal.current_cpu();
        let mut sched = self.lock();
        sched.finish_switch(cpu);
        self.reschedule_point(sched, RescheduleKind::YieldToHigher);
    }

    /// Run a reschedule that was deferred on the calling core.
    pub fn reschedule(&self) {
        let sched = self.lock();
        self.reschedule_point(sched, RescheduleKind::YieldToHigher);
    }

    /// Release the object lock `guard` and reschedule as one step.
    pub fn reschedule_locked<T: ?Sized>(&self, guard: SpinLockGuard<'_, T>) {
        let sched = self.handoff(guard);
        self.reschedule_point(sched, RescheduleKind::YieldToHigher);
    }

    /// Take the scheduler lock and release `guard`, moving its interrupt
    /// state to the scheduler guard.
    pub(crate) fn handoff<T: ?Sized>(&self, guard: SpinLockGuard<'_, T>) -> SchedulerGuard<'_> {
        let mut sched = self.lock();
        let key = guard.unlock_keeping_irq();
        sched.replace_irq_key(key);
        sched
    }
}

/// First code of every new thread context.
///
/// # Safety
///
/// `kernel` must be the `Kernel<H>` that created the context.
pub(crate) unsafe fn thread_start<H: HardwareAbstractionLayer>(
    kernel: *const (),
    entry: fn(usize),
    argument: usize,
) {
    // SAFETY: the kernel stays in place while it has threads.
    let kernel = unsafe { &*(kernel as *const Kernel<H>) };
    kernel.finish_switch();
    entry(argument);
    kernel.thread_exit();
}

//! Interrupt entry and exit bookkeeping.
//!
//! The HAL brackets every interrupt handler that may call into the kernel
//! with [`Kernel::interrupt_enter`] and [`Kernel::interrupt_exit`].
//! Reschedules requested inside a handler are performed when the outermost
//! handler exits.
use crate::kernel::Kernel;
use crate::kernel::exception::RuntimeError;
use crate::kernel::scheduler::RescheduleKind;
use crate::kernel::tracing;
use crate::thread::ThreadHandle;
use kestrel_khal::{CpuId, HardwareAbstractionLayer};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutionContext {
    Thread {
        cpu: CpuId,
        /// `None` before the core has been brought online.
        thread: Option<ThreadHandle>,
    },
    Interrupt {
        cpu: CpuId,
        nesting: u32,
    },
}

impl<H: HardwareAbstractionLayer> Kernel<H> {
    pub fn interrupt_enter(&self) {
        let cpu = self.hal.current_cpu();
        self.local(cpu).enter();
        tracing::isr_enter(cpu);
    }

    #[track_caller]
    pub fn interrupt_exit(&self) {
        let cpu = self.hal.current_cpu();
        let local = self.local(cpu);
        match local.leave() {
            None => runtime_error!(RuntimeError::UnbalancedInterruptExit),
            Some(0) if local.take_reschedule() => {
                tracing::isr_exit_to_scheduler(cpu);
                let sched = self.lock();
                self.dispatch(sched, cpu, RescheduleKind::YieldToHigher);
            }
            Some(_) => tracing::isr_exit(cpu),
        }
    }

    pub fn is_in_isr(&self) -> bool {
        self.local(self.hal.current_cpu()).in_interrupt()
    }

    pub fn execution_context(&self) -> ExecutionContext {
        let cpu = self.hal.current_cpu();
        let local = self.local(cpu);
        if local.in_interrupt() {
            return ExecutionContext::Interrupt {
                cpu,
                nesting: local.nesting(),
            };
        }
        let thread = local
            .current()
            .map(|thread| self.lock().threads.handle(thread));
        ExecutionContext::Thread { cpu, thread }
    }

    /// Core of the caller, which must not be an interrupt handler.
    #[track_caller]
    pub(crate) fn require_thread_context(&self) -> CpuId {
        let cpu = self.hal.current_cpu();
        if self.local(cpu).in_interrupt() {
            runtime_error!(RuntimeError::InterruptHandlerViolation);
        }
        cpu
    }
}

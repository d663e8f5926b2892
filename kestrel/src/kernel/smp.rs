//! Bringing cores online and taking them offline.
use crate::kernel::Kernel;
use crate::kernel::cpu::CpuStacks;
use crate::kernel::exception::RuntimeError;
use crate::kernel::scheduler::RescheduleKind;
use core::cell::Cell;
use core::sync::atomic::Ordering;
use kestrel_khal::{CpuId, HardwareAbstractionLayer};

struct CoreStartup<H: HardwareAbstractionLayer> {
    kernel: *const Kernel<H>,
    cpu: CpuId,
    stacks: Cell<Option<CpuStacks>>,
}

/// First code the kernel runs on a freshly started core.
///
/// # Safety
///
/// `argument` must point to the `CoreStartup` of the `start_core` call that
/// released this core.
unsafe fn core_entry<H: HardwareAbstractionLayer>(argument: *const ()) {
    // SAFETY: `start_core` keeps the startup block alive until the core is
    // active, and the kernel is 'static.
    let (kernel, cpu, stacks) = unsafe {
        let startup = &*(argument as *const CoreStartup<H>);
        (&*startup.kernel, startup.cpu, startup.stacks.take())
    };
    if let Some(stacks) = stacks {
        kernel.online_core(cpu, stacks);
    }
}

impl<H: HardwareAbstractionLayer> Kernel<H> {
    /// Start core `cpu` with `stacks` and wait until it is online.
    ///
    /// Starting a core that is already online does nothing.
    #[track_caller]
    pub fn start_core(&'static self, cpu: CpuId, stacks: CpuStacks) {
        let configured = self.lock().num_cpus;
        if cpu >= configured {
            runtime_error!(RuntimeError::InvalidCpu { cpu });
        }
        if self.cpu_is_active(cpu) {
            return;
        }
        let startup = CoreStartup {
            kernel: self as *const Kernel<H>,
            cpu,
            stacks: Cell::new(Some(stacks)),
        };
        log::debug!("starting cpu{}", cpu);
        // SAFETY: `startup` lives until the core reports itself active, which
        // it does only after consuming the startup block.
        unsafe {
            self.hal.start_core(
                cpu,
                core_entry::<H>,
                &startup as *const CoreStartup<H> as *const (),
            )
        };
        while !self.cpu_is_active(cpu) {
            core::hint::spin_loop();
        }
    }

    pub(crate) fn online_core(&self, cpu: CpuId, stacks: CpuStacks) {
        let mut sched = self.lock();
        let init = sched.online_idle_thread(cpu, stacks);
        let idle = init.thread as u16;
        self.init_context(idle, &init);
        self.local(cpu).set_current(idle);
        self.active_cpus.fetch_add(1, Ordering::AcqRel);
        log::info!("cpu{} online", cpu);
        self.reschedule_point(sched, RescheduleKind::YieldToHigher);
    }

    /// Take the calling core out of scheduling. Its current thread is left
    /// to the other cores and the core switches to its idle thread.
    #[track_caller]
    pub fn halt_current_core(&self) {
        let cpu = self.require_thread_context();
        let mut sched = self.lock();
        if !sched.cpus[cpu].active {
            return;
        }
        sched.cpus[cpu].active = false;
        sched.cpus[cpu].slice_deadline = None;
        sched.alarm_dirty = true;
        if self.active_cpus.fetch_sub(1, Ordering::AcqRel) == 1 {
            log::warn!("cpu{} halted, no cores left active", cpu);
        } else {
            log::info!("cpu{} halted", cpu);
        }
        self.dispatch(sched, cpu, RescheduleKind::YieldToHigher);
    }

    /// Scheduler IPI handler. Processes slice expiry and reschedules the
    /// calling core.
    pub fn ipi_handler(&self) {
        let cpu = self.hal.current_cpu();
        let sched = self.lock();
        self.handle_time_slice(sched, cpu);
    }

    pub fn active_cpus(&self) -> usize {
        self.active_cpus.load(Ordering::Acquire)
    }

    pub fn cpu_is_active(&self, cpu: CpuId) -> bool {
        let sched = self.lock();
        sched.cpus.get(cpu).is_some_and(|block| block.active)
    }

    /// Number of cores the kernel was configured for.
    pub fn num_cpus(&self) -> usize {
        self.lock().num_cpus
    }
}

#![allow(dead_code)]
use kestrel::prelude::*;
use kestrel::{Stack, StackRefMut, ThreadState};
use kestrel_khal_sim::SimHal;

pub type SimKernel = Kernel<SimHal>;

pub fn stack() -> StackRefMut {
    Box::leak(Box::new(Stack::<1024>::new())).init()
}

pub fn cpu_stacks() -> CpuStacks {
    CpuStacks {
        idle: stack(),
        interrupt: stack(),
    }
}

/// Kernel on `num_cpus` simulated cores with only core 0 online.
pub fn kernel(num_cpus: usize, config: KernelConfig) -> &'static SimKernel {
    let hal = SimHal::new(num_cpus);
    let kernel = Kernel::new(hal, config.with_cpus(num_cpus), cpu_stacks());
    Box::leak(Box::new(kernel))
}

/// Kernel with every core online.
pub fn smp_kernel(num_cpus: usize, config: KernelConfig) -> &'static SimKernel {
    let kernel = kernel(num_cpus, config);
    for cpu in 1..num_cpus {
        kernel.start_core(cpu, cpu_stacks());
    }
    kernel
}

pub fn noop(_: usize) {}

pub fn spec(name: &'static str, priority: i16) -> ThreadSpec {
    ThreadSpec::new(name, noop, stack()).priority(priority)
}

pub fn spawn(kernel: &SimKernel, name: &'static str, priority: i16) -> ThreadHandle {
    kernel.spawn(spec(name, priority)).unwrap()
}

/// Announce `ticks` from the timer interrupt of the calling core.
pub fn tick(kernel: &SimKernel, ticks: u64) {
    kernel.interrupt_enter();
    kernel.tick_announce(ticks);
    kernel.interrupt_exit();
}

/// Run the IPI handler of every core an IPI was sent to, until none remain.
pub fn deliver_ipis(kernel: &SimKernel) {
    loop {
        let ipis = kernel.hal().take_pending_ipis();
        if ipis == 0 {
            break;
        }
        for cpu in (0..kernel.num_cpus()).filter(|cpu| ipis & (1 << cpu) != 0) {
            kernel.hal().run_on(cpu, || {
                kernel.interrupt_enter();
                kernel.ipi_handler();
                kernel.interrupt_exit();
            });
        }
    }
}

pub fn current(kernel: &SimKernel) -> &'static str {
    kernel.thread_name(kernel.current_thread().unwrap())
}

pub fn current_on(kernel: &SimKernel, cpu: usize) -> &'static str {
    kernel.hal().run_on(cpu, || current(kernel))
}

pub fn is_state(kernel: &SimKernel, thread: ThreadHandle, state: ThreadState) -> bool {
    kernel.thread_state(thread) == state
}

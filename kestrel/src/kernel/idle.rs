use crate::kernel::Kernel;
use crate::kernel::cpu::CpuStacks;
use crate::kernel::cpu::CpuMask;
use crate::kernel::priority::Priority;
use crate::kernel::scheduler::Scheduler;
use crate::thread::ThreadState;
use crate::thread::raw_thread::{IDLE_THREAD_NAME, ThreadTable};
use kestrel_khal::{ContextInit, CpuId, HardwareAbstractionLayer};

// Idle contexts never call their entry, the HAL runs `Kernel::idle_step`.
fn idle_entry(_cpu: usize) {}

impl Scheduler {
    /// Install the idle thread of `cpu` as its current thread and mark the
    /// core active.
    pub fn online_idle_thread(&mut self, cpu: CpuId, stacks: CpuStacks) -> ContextInit {
        let idle = ThreadTable::idle_slot(cpu);
        let thread = &mut self.threads[idle];
        if thread.in_use {
            // Restart of a halted core
            thread.stack = Some(stacks.idle);
        } else {
            thread.occupy(IDLE_THREAD_NAME, Priority::IDLE, CpuMask::single(cpu), stacks.idle);
            thread.idle = true;
        }
        thread.state = ThreadState::Running;
        thread.cpu = Some(cpu);
        thread.saving_context = false;

        let (stack_ptr, stack_size) = match &thread.stack {
            Some(stack) => (stack.bottom_ptr(), stack.size()),
            None => (core::ptr::null(), 0),
        };

        let block = &mut self.cpus[cpu];
        block.active = true;
        block.current = Some(idle);
        block.idle_thread = Some(idle);
        block.interrupt_stack = Some(stacks.interrupt);
        block.switch_pending = None;
        self.reset_time_slice(cpu);

        ContextInit {
            thread: idle as usize,
            name: IDLE_THREAD_NAME,
            entry: idle_entry,
            argument: cpu,
            start: None,
            kernel: core::ptr::null(),
            stack_ptr,
            stack_size,
            idle: true,
        }
    }
}

impl<H: HardwareAbstractionLayer> Kernel<H> {
    /// One iteration of the idle loop: switch to eligible work if there is
    /// any, otherwise wait for the next interrupt.
    pub fn idle_step(&self) {
        let cpu = self.hal.current_cpu();
        self.reschedule();
        let idle = {
            let sched = self.lock();
            sched.cpus[cpu]
                .current
                .is_some_and(|thread| sched.threads[thread].idle)
        };
        if idle {
            self.hal.idle(cpu);
        }
    }
}

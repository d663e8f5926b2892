//! Host simulator of a multi-core target.
//!
//! Every simulated core is driven from the calling OS thread: [`SimHal::run_on`]
//! selects the core that subsequent kernel calls execute on. Context switches
//! do not transfer control anywhere; they are recorded in an event trace that
//! tests inspect. A one-shot switch hook runs inside `context_switch`, which
//! is the window between the scheduler committing a switch and the switched-in
//! context resuming. With [`SimHal::run_thread_entries`], a context switched
//! into for the first time runs its entry through the kernel start routine,
//! nested inside the switch.

use bit_field::BitField;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use kestrel_khal::*;
use parking_lot::Mutex;

pub const MAX_SIM_CPUS: usize = 8;

pub struct SimContext {
    thread: usize,
    name: &'static str,
    idle: bool,
    stack_top: usize,
    start: Option<ThreadStart>,
    kernel: *const (),
    entry: fn(usize),
    argument: usize,
    started: bool,
}

// SAFETY: `kernel` points to the kernel that owns the context, which is
// shared between cores anyway.
unsafe impl Send for SimContext {}

impl SimContext {
    pub fn thread(&self) -> usize {
        self.thread
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl ContextInfo for SimContext {
    fn new(init: &ContextInit) -> SimContext {
        SimContext {
            thread: init.thread,
            name: init.name,
            idle: init.idle,
            stack_top: init.stack_ptr as usize,
            start: init.start,
            kernel: init.kernel,
            entry: init.entry,
            argument: init.argument,
            started: false,
        }
    }

    fn stack_top_ptr(&self) -> *const u8 {
        self.stack_top as *const u8
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SwitchEvent {
    pub cpu: CpuId,
    pub from: &'static str,
    pub to: &'static str,
    pub from_thread: usize,
    pub to_thread: usize,
    pub to_idle: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SimEvent {
    Switch(SwitchEvent),
    Ipi { from: CpuId, cpus: u32 },
    CoreStarted(CpuId),
    Idle(CpuId),
}

type SwitchHook = Box<dyn FnOnce(&SwitchEvent) + Send>;

#[derive(Default)]
struct SimState {
    events: Vec<SimEvent>,
    pending_ipis: u32,
    wakeup: Option<Ticks>,
    switch_hook: Option<SwitchHook>,
}

pub struct SimHal {
    num_cpus: usize,
    current_cpu: AtomicUsize,
    interrupts_enabled: [AtomicBool; MAX_SIM_CPUS],
    run_entries: AtomicBool,
    state: Mutex<SimState>,
}

impl SimHal {
    pub fn new(num_cpus: usize) -> SimHal {
        assert!(
            num_cpus > 0 && num_cpus <= MAX_SIM_CPUS,
            "simulator supports 1..={} cores",
            MAX_SIM_CPUS
        );
        SimHal {
            num_cpus,
            current_cpu: AtomicUsize::new(0),
            interrupts_enabled: core::array::from_fn(|_| AtomicBool::new(true)),
            run_entries: AtomicBool::new(false),
            state: Mutex::new(SimState::default()),
        }
    }

    /// Run `f` as core `cpu`, then switch back to the previous core.
    pub fn run_on<R>(&self, cpu: CpuId, f: impl FnOnce() -> R) -> R {
        assert!(cpu < self.num_cpus, "no simulated core {}", cpu);
        let previous = self.current_cpu.swap(cpu, Ordering::SeqCst);
        let result = f();
        self.current_cpu.store(previous, Ordering::SeqCst);
        result
    }

    /// Run the entry of each new thread when it is first switched in.
    pub fn run_thread_entries(&self, enabled: bool) {
        self.run_entries.store(enabled, Ordering::SeqCst);
    }

    /// Install a hook that runs once, inside the next context switch.
    pub fn set_switch_hook(&self, hook: impl FnOnce(&SwitchEvent) + Send + 'static) {
        self.state.lock().switch_hook = Some(Box::new(hook));
    }

    pub fn events(&self) -> Vec<SimEvent> {
        self.state.lock().events.clone()
    }

    pub fn clear_events(&self) {
        self.state.lock().events.clear();
    }

    pub fn switches(&self) -> Vec<SwitchEvent> {
        self.state
            .lock()
            .events
            .iter()
            .filter_map(|event| match event {
                SimEvent::Switch(switch) => Some(*switch),
                _ => None,
            })
            .collect()
    }

    /// Names of the threads switched in, in order.
    pub fn switched_in(&self) -> Vec<&'static str> {
        self.switches().iter().map(|switch| switch.to).collect()
    }

    /// IPIs raised since the last call, as a core bitset.
    pub fn take_pending_ipis(&self) -> u32 {
        core::mem::take(&mut self.state.lock().pending_ipis)
    }

    /// Tick at which the alarm is currently programmed to fire.
    pub fn wakeup(&self) -> Option<Ticks> {
        self.state.lock().wakeup
    }

    pub fn interrupts_enabled(&self, cpu: CpuId) -> bool {
        self.interrupts_enabled[cpu].load(Ordering::SeqCst)
    }

    fn record(&self, event: SimEvent) {
        log::trace!("sim: {:?}", event);
        self.state.lock().events.push(event);
    }
}

impl InterruptController for SimHal {
    fn current_cpu(&self) -> CpuId {
        self.current_cpu.load(Ordering::SeqCst)
    }

    fn interrupt_status(&self) -> bool {
        self.interrupts_enabled[self.current_cpu()].load(Ordering::SeqCst)
    }

    fn acquire(&self) -> bool {
        self.interrupts_enabled[self.current_cpu()].swap(false, Ordering::SeqCst)
    }

    fn restore(&self, restore_state: bool) {
        self.interrupts_enabled[self.current_cpu()].store(restore_state, Ordering::SeqCst)
    }
}

impl AlarmClockController for SimHal {
    const TICK_FREQ_HZ: Ticks = 1000;

    fn set_wakeup(&self, at: Ticks) {
        self.state.lock().wakeup = Some(at);
    }

    fn disable_wakeup(&self) {
        self.state.lock().wakeup = None;
    }
}

impl FlowController for SimHal {
    type Context = SimContext;

    unsafe fn context_switch(&self, cpu: CpuId, from: *mut SimContext, to: *mut SimContext) {
        // SAFETY: the kernel hands over initialized contexts that stay in place
        // for the duration of the switch. No reference outlives this block,
        // nested switches may go through the same contexts.
        let (event, first_start) = unsafe {
            let (from, to) = (&*from, &mut *to);
            let event = SwitchEvent {
                cpu,
                from: from.name,
                to: to.name,
                from_thread: from.thread,
                to_thread: to.thread,
                to_idle: to.idle,
            };
            let first_start = match to.start {
                Some(start) if !to.started && self.run_entries.load(Ordering::SeqCst) => {
                    to.started = true;
                    Some((start, to.kernel, to.entry, to.argument))
                }
                _ => None,
            };
            (event, first_start)
        };
        self.record(SimEvent::Switch(event));
        // The hook is taken out first so that it may cause nested switches.
        let hook = self.state.lock().switch_hook.take();
        if let Some(hook) = hook {
            hook(&event);
        }
        if let Some((start, kernel, entry, argument)) = first_start {
            // SAFETY: `start` and `kernel` come from the kernel that created
            // the context.
            unsafe { start(kernel, entry, argument) };
        }
    }

    fn idle(&self, cpu: CpuId) {
        self.record(SimEvent::Idle(cpu));
    }
}

impl MultiCoreController for SimHal {
    fn num_cpus(&self) -> usize {
        self.num_cpus
    }

    fn send_ipi(&self, cpus: u32) {
        let from = self.current_cpu();
        let mut targets = 0u32;
        for cpu in 0..self.num_cpus {
            if cpus.get_bit(cpu) {
                targets.set_bit(cpu, true);
            }
        }
        if targets == 0 {
            return;
        }
        self.state.lock().pending_ipis |= targets;
        self.record(SimEvent::Ipi {
            from,
            cpus: targets,
        });
    }

    unsafe fn start_core(&self, cpu: CpuId, entry: CoreEntry, argument: *const ()) {
        self.record(SimEvent::CoreStarted(cpu));
        // SAFETY: the caller keeps `argument` valid until `entry` returns, and
        // simulated cores run to completion synchronously.
        self.run_on(cpu, || unsafe { entry(argument) });
    }
}

impl HardwareAbstractionLayer for SimHal {
    const NAME: &'static str = "sim";
}

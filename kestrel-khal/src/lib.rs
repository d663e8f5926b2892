#![no_std]
//! Architecture collaborators of the kestrel scheduler core.
//!
//! A kernel HAL implements these traits for one architecture. The kernel
//! never touches interrupt controllers, timers or cores directly; every
//! hardware interaction goes through an implementation of
//! [`HardwareAbstractionLayer`].
pub use unrecoverable_error::*;

pub type Ticks = u64;

/// Index of a physical core.
pub type CpuId = usize;

/// Upper bound for core counts; affinity and IPI masks are 32-bit sets.
pub const MAX_HAL_CPUS: usize = 32;

/// Local interrupt masking of the calling core.
pub trait InterruptController {
    /// Core that is executing the caller.
    fn current_cpu(&self) -> CpuId;

    /// Returns `true` if local interrupts are enabled.
    fn interrupt_status(&self) -> bool;

    /// Disables local interrupts and returns the previous enable state.
    fn acquire(&self) -> bool;

    /// Restores the local interrupt enable state returned by [`acquire`].
    ///
    /// [`acquire`]: InterruptController::acquire
    fn restore(&self, restore_state: bool);
}

pub trait AlarmClockController {
    /// Timer frequency as Ticks per second
    const TICK_FREQ_HZ: Ticks;

    /// Program the next timer interrupt to fire at tick `at`.
    fn set_wakeup(&self, at: Ticks);

    fn disable_wakeup(&self);
}

/// Kernel routine a new thread context begins in, called by the port as
/// `start(kernel, entry, argument)` on the thread's own stack.
///
/// It completes the switch into the thread, runs `entry(argument)` and
/// terminates the thread when `entry` returns. It does not return on real
/// hardware.
pub type ThreadStart = unsafe fn(kernel: *const (), entry: fn(usize), argument: usize);

/// Initial register state of a new thread context.
pub struct ContextInit {
    /// Kernel thread table index of the owner.
    pub thread: usize,
    pub name: &'static str,
    pub entry: fn(usize),
    pub argument: usize,
    /// First code to run in the context. `None` for idle contexts, which are
    /// the boot context of their core and loop on `Kernel::idle_step`.
    pub start: Option<ThreadStart>,
    /// Kernel passed to `start`.
    pub kernel: *const (),
    /// Highest address of the stack region, exclusive.
    pub stack_ptr: *const u8,
    pub stack_size: usize,
    pub idle: bool,
}

pub trait ContextInfo: Sized + Send {
    fn new(init: &ContextInit) -> Self;

    fn stack_top_ptr(&self) -> *const u8;
}

pub trait FlowController {
    type Context: ContextInfo;

    /// Save the running context into `from` and resume `to` on `cpu`.
    ///
    /// The kernel has already committed the switch when this is called. A
    /// context that resumes from an earlier `context_switch` call returns
    /// from it, and the kernel completes the switch. A context that runs for
    /// the first time must be entered through its [`ContextInit::start`]
    /// routine, which completes the switch itself.
    ///
    /// # Safety
    ///
    /// `from` and `to` must point to initialized contexts owned by the kernel
    /// and no other core may be running either of them.
    unsafe fn context_switch(&self, cpu: CpuId, from: *mut Self::Context, to: *mut Self::Context);

    /// Low-power wait of an idle core. Returns on the next interrupt.
    fn idle(&self, cpu: CpuId);
}

/// Core entry point passed to [`MultiCoreController::start_core`].
pub type CoreEntry = unsafe fn(*const ());

pub trait MultiCoreController {
    /// Number of cores the hardware provides.
    fn num_cpus(&self) -> usize;

    /// Raise the scheduler IPI on every core in the `cpus` bitset.
    fn send_ipi(&self, cpus: u32);

    /// Release core `cpu` from reset into `entry(argument)`.
    ///
    /// # Safety
    ///
    /// `argument` must remain valid until `entry` has consumed it.
    unsafe fn start_core(&self, cpu: CpuId, entry: CoreEntry, argument: *const ());
}

pub trait HardwareAbstractionLayer:
    InterruptController + AlarmClockController + FlowController + MultiCoreController + Sync
{
    const NAME: &'static str;
}

use kestrel_khal::CpuId;
use thiserror::Error;
use unrecoverable_error::{UnrecoverableError, handle_unrecoverable_error};

#[macro_export]
macro_rules! runtime_error {
    ($kind:expr) => {{
        $crate::kernel::exception::handle_runtime_error(&$kind)
    }};
}

#[macro_export]
macro_rules! kernel_error {
    ($kind:expr) => {{
        $crate::kernel::exception::handle_kernel_error(&$kind)
    }};
}

#[derive(Debug, Error)]
pub enum RtosError<'a> {
    /// Internal kernel error
    #[error("Kernel error: {0}")]
    Kernel(&'a KernelError),

    /// Runtime error
    #[error("Runtime error: {0}")]
    RuntimeError(&'a RuntimeError),
}

impl UnrecoverableError for RtosError<'_> {}

#[derive(Debug, Error)]
pub enum KernelError {
    /// Stack overflow
    #[error("Stack overflow in thread {thread_name} with stack size {stack_size}")]
    StackOverflow {
        thread_name: &'static str,
        stack_size: usize,
    },

    #[error("Thread {thread_name} resumed while still blocked")]
    ResumedWhileBlocked { thread_name: &'static str },

    #[error("Thread slot {thread} has no execution context")]
    MissingContext { thread: usize },
}

/// Runtime errors are errors that can happen at runtime, and are not
/// related to the kernel or hardware. They are caused by incorrect usage
/// of the kernel API by the application.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("Idle thread may not block")]
    IdleThreadBlock,

    /// Idle thread may not suspend, because it has to be always ready to run.
    #[error("Idle thread may not be suspended")]
    IdleThreadSuspend,

    #[error("Idle thread may not be aborted")]
    IdleThreadAbort,

    #[error("Essential thread {thread_name} terminated")]
    EssentialThreadTerminated { thread_name: &'static str },

    /// Locks cannot be locked recursively
    #[error("Recursive spinlock acquisition")]
    RecursiveLock,

    #[error("Blocking call while holding a spinlock")]
    BlockingWhileLocked,

    /// Forbidden operation in interrupt handler
    #[error("Forbidden operation in interrupt handler")]
    InterruptHandlerViolation,

    #[error("Unbalanced interrupt exit")]
    UnbalancedInterruptExit,

    #[error("Priority {priority} is outside of the configured range")]
    PriorityOutOfRange { priority: i16 },

    #[error("Stack of {stack_size} bytes is smaller than the minimum of {min_size} bytes")]
    StackTooSmall { stack_size: usize, min_size: usize },

    #[error("Stale thread handle, the thread slot was already released")]
    StaleThreadHandle,

    #[error("Stale wait queue handle")]
    StaleWaitQueue,

    #[error("Thread {thread_name} cannot be started twice")]
    ThreadAlreadyStarted { thread_name: &'static str },

    #[error("Thread {thread_name} has not been started")]
    ThreadNotStarted { thread_name: &'static str },

    #[error("Scheduler unlocked more times than locked")]
    UnbalancedSchedUnlock,

    #[error("Wait queue destroyed with {waiters} waiting threads")]
    WaitQueueInUse { waiters: usize },

    #[error("CPU {cpu} is not available")]
    InvalidCpu { cpu: CpuId },

    #[error("CPU {cpu} has not been started")]
    CpuNotStarted { cpu: CpuId },
}

#[track_caller]
pub fn handle_runtime_error(error: &RuntimeError) -> ! {
    let error = RtosError::RuntimeError(error);
    handle_rtos_error(&error);
}

#[track_caller]
pub fn handle_kernel_error(error: &KernelError) -> ! {
    let error = RtosError::Kernel(error);
    handle_rtos_error(&error);
}

#[track_caller]
pub fn handle_rtos_error(error: &RtosError) -> ! {
    log::error!("{}", error);
    handle_unrecoverable_error(error)
}

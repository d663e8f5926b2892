//! Threads and their handles.
pub mod builder;
pub(crate) mod raw_thread;

pub use builder::ThreadSpec;

use crate::kernel::cpu::CpuMask;
use crate::kernel::priority::Priority;
use kestrel_khal::CpuId;
use thiserror::Error;

pub type ThreadEntry = fn(usize);

/// Called when the time slice of a thread expires, with the data given to
/// `Kernel::thread_set_time_slice`.
pub type SliceExpiredFn = fn(ThreadHandle, usize);

/// Generation-checked reference to a thread slot.
///
/// A handle stays valid until the thread has been joined. Using it after
/// that is a fatal error.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ThreadHandle {
    index: u16,
    generation: u16,
}

impl ThreadHandle {
    pub(crate) const fn new(index: u16, generation: u16) -> ThreadHandle {
        ThreadHandle { index, generation }
    }

    /// Slot of the thread in the kernel thread table.
    pub const fn index(self) -> usize {
        self.index as usize
    }

    pub(crate) const fn slot(self) -> u16 {
        self.index
    }

    pub(crate) const fn generation(self) -> u16 {
        self.generation
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum ThreadState {
    /// Created, not yet eligible to run.
    New,
    Ready,
    Running,
    /// Blocked on a wait queue or sleeping.
    Pending,
    Suspended,
    /// Terminated, resources reclaimed when joined.
    Dead,
}

#[derive(Clone, Copy, Debug)]
pub struct ThreadInfo {
    pub handle: ThreadHandle,
    pub name: &'static str,
    pub state: ThreadState,
    pub priority: Priority,
    pub affinity: CpuMask,
    /// Core the thread runs on while Running.
    pub cpu: Option<CpuId>,
    pub idle: bool,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CreateError {
    #[error("Thread table is full")]
    NoFreeSlot,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum JoinError {
    /// The thread is alive and the caller did not want to wait.
    #[error("Thread is still running")]
    Busy,
    #[error("Timed out waiting for the thread to terminate")]
    TimedOut,
    #[error("Join would deadlock")]
    Deadlock,
    /// The joining thread was suspended while waiting.
    #[error("Join was cancelled")]
    Cancelled,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AffinityError {
    #[error("CPU mask of a runnable thread cannot be changed")]
    ThreadRunnable,
}

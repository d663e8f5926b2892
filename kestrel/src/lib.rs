#![doc = include_str!("../../README.md")]
#![cfg_attr(not(test), no_std)]
#[macro_use]
pub mod kernel;
pub mod api;
pub mod config;
pub mod sync;
pub mod thread;
pub mod time;

pub use config::KernelConfig;
pub use kernel::Kernel;
pub use kernel::cpu::{CpuMask, CpuStacks};
pub use kernel::interrupt::ExecutionContext;
pub use kernel::priority::Priority;
pub use kernel::stack::{Stack, StackRefMut};
pub use kernel::wait_queue::{Blockable, WaitQueue, WaitQueueError, WaitResult};
pub use kestrel_khal as khal;
pub use static_cell;
pub use thread::{ThreadHandle, ThreadSpec, ThreadState};
pub use time::Timeout;

pub mod prelude {
    pub use crate::kernel::priority::Priority;
    pub use crate::make_stack;
    pub use crate::sync::Semaphore;
    pub use crate::thread::{ThreadHandle, ThreadSpec};
    pub use crate::time::Timeout;
    pub use crate::{Blockable, CpuMask, CpuStacks, Kernel, KernelConfig, WaitQueue, WaitResult};
}

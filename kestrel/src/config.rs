//! Kernel configuration.
//!
//! Table capacities and scheduling defaults are fixed at compile time and can
//! be overridden with environment variables when building, for example
//! `KESTREL_MAX_THREADS=64 cargo build`. The runtime [`KernelConfig`] selects
//! the number of cores in use and the initial time-slice policy.
use crate::kernel::priority::Priority;
use const_env::from_env;
use kestrel_khal::MAX_HAL_CPUS;

/// Number of per-CPU control blocks.
#[from_env("KESTREL_MAX_CPUS")]
pub const MAX_CPUS: usize = 4;

/// Thread table capacity, including one idle thread per CPU.
#[from_env("KESTREL_MAX_THREADS")]
pub const MAX_THREADS: usize = 32;

/// Wait queues available to synchronization objects. Join queues of
/// threads are allocated separately.
#[from_env("KESTREL_MAX_WAIT_QUEUES")]
pub const MAX_WAIT_QUEUES: usize = 32;

#[from_env("KESTREL_NUM_COOP_PRIORITIES")]
pub const NUM_COOP_PRIORITIES: i16 = 16;

#[from_env("KESTREL_NUM_PREEMPT_PRIORITIES")]
pub const NUM_PREEMPT_PRIORITIES: i16 = 15;

/// Default time-slice length in ticks. Zero disables slicing.
#[from_env("KESTREL_TIMESLICE_TICKS")]
pub const TIMESLICE_TICKS: u32 = 0;

/// Threads more urgent than this priority are not time-sliced.
#[from_env("KESTREL_TIMESLICE_PRIORITY")]
pub const TIMESLICE_PRIORITY: i16 = 0;

#[from_env("KESTREL_MIN_STACK_SIZE")]
pub const MIN_STACK_SIZE: usize = 256;

const _: () = assert!(MAX_CPUS >= 1 && MAX_CPUS <= MAX_HAL_CPUS);
const _: () = assert!(MAX_THREADS > MAX_CPUS);
const _: () = assert!(MAX_THREADS + MAX_WAIT_QUEUES < u16::MAX as usize);
const _: () = assert!(NUM_COOP_PRIORITIES >= 0 && NUM_PREEMPT_PRIORITIES >= 1);
const _: () = assert!(NUM_COOP_PRIORITIES + NUM_PREEMPT_PRIORITIES + 1 <= 64);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KernelConfig {
    /// Cores managed by the kernel, `1..=MAX_CPUS`.
    pub num_cpus: usize,
    pub slice_ticks: u32,
    pub slice_max_priority: Priority,
}

impl KernelConfig {
    pub const fn new() -> KernelConfig {
        KernelConfig {
            num_cpus: 1,
            slice_ticks: TIMESLICE_TICKS,
            slice_max_priority: Priority::from_raw(TIMESLICE_PRIORITY),
        }
    }

    pub const fn with_cpus(mut self, num_cpus: usize) -> KernelConfig {
        self.num_cpus = num_cpus;
        self
    }

    pub const fn with_time_slice(mut self, ticks: u32, max_priority: Priority) -> KernelConfig {
        self.slice_ticks = ticks;
        self.slice_max_priority = max_priority;
        self
    }
}

impl Default for KernelConfig {
    fn default() -> KernelConfig {
        KernelConfig::new()
    }
}

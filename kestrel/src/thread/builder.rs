use super::ThreadEntry;
use crate::kernel::cpu::CpuMask;
use crate::kernel::priority::Priority;
use crate::kernel::stack::StackRefMut;

/// Parameters of `Kernel::thread_create`.
///
/// The priority is validated when the thread is created, where a value
/// outside of the configured range is a fatal error.
pub struct ThreadSpec {
    pub(crate) name: &'static str,
    pub(crate) priority: i16,
    pub(crate) affinity: CpuMask,
    pub(crate) entry: ThreadEntry,
    pub(crate) argument: usize,
    pub(crate) stack: StackRefMut,
    pub(crate) essential: bool,
}

impl ThreadSpec {
    pub fn new(name: &'static str, entry: ThreadEntry, stack: StackRefMut) -> ThreadSpec {
        ThreadSpec {
            name,
            priority: Priority::LOWEST.value(),
            affinity: CpuMask::all(),
            entry,
            argument: 0,
            stack,
            essential: false,
        }
    }

    pub fn priority(mut self, priority: i16) -> ThreadSpec {
        self.priority = priority;
        self
    }

    pub fn affinity(mut self, affinity: CpuMask) -> ThreadSpec {
        self.affinity = affinity;
        self
    }

    pub fn argument(mut self, argument: usize) -> ThreadSpec {
        self.argument = argument;
        self
    }

    /// Terminating an essential thread is a fatal error.
    pub fn essential(mut self) -> ThreadSpec {
        self.essential = true;
        self
    }
}

//! Per-CPU control blocks and CPU masks.
use crate::config::MAX_CPUS;
use crate::kernel::stack::StackRefMut;
use crate::thread::raw_thread::ThreadIndex;
use crate::time::Ticks;
use bit_field::BitField;
use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use kestrel_khal::CpuId;

/// Set of cores, used for thread affinity and IPI targeting.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CpuMask(u32);

impl CpuMask {
    pub const NONE: CpuMask = CpuMask(0);

    /// Every core the kernel can manage.
    pub const fn all() -> CpuMask {
        if MAX_CPUS >= 32 {
            CpuMask(u32::MAX)
        } else {
            CpuMask((1u32 << MAX_CPUS) - 1)
        }
    }

    pub fn single(cpu: CpuId) -> CpuMask {
        let mut mask = CpuMask::NONE;
        mask.insert(cpu);
        mask
    }

    pub const fn from_bits(bits: u32) -> CpuMask {
        CpuMask(bits & CpuMask::all().0)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, cpu: CpuId) -> bool {
        cpu < MAX_CPUS && self.0.get_bit(cpu)
    }

    pub fn insert(&mut self, cpu: CpuId) {
        if cpu < MAX_CPUS {
            self.0.set_bit(cpu, true);
        }
    }

    pub fn remove(&mut self, cpu: CpuId) {
        if cpu < MAX_CPUS {
            self.0.set_bit(cpu, false);
        }
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = CpuId> {
        (0..MAX_CPUS).filter(move |&cpu| self.0.get_bit(cpu))
    }
}

impl fmt::Debug for CpuMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CpuMask({:#b})", self.0)
    }
}

/// Stacks that a core needs to come online.
pub struct CpuStacks {
    pub idle: StackRefMut,
    pub interrupt: StackRefMut,
}

/// Scheduler-owned part of a per-CPU control block. Accessed only under the
/// scheduler lock.
pub(crate) struct PerCpu {
    pub id: CpuId,
    pub active: bool,
    pub current: Option<ThreadIndex>,
    pub idle_thread: Option<ThreadIndex>,
    pub interrupt_stack: Option<StackRefMut>,
    /// Outgoing thread of the last committed switch until its context has
    /// been saved.
    pub switch_pending: Option<ThreadIndex>,
    pub slice_deadline: Option<Ticks>,
    /// Thread the slice deadline was armed for.
    pub slice_owner: Option<ThreadIndex>,
    pub slice_expired: bool,
    /// The current thread goes behind its equal-priority peers at the next
    /// reschedule of this core.
    pub yield_requested: bool,
}

impl PerCpu {
    pub const fn new(id: CpuId) -> PerCpu {
        PerCpu {
            id,
            active: false,
            current: None,
            idle_thread: None,
            interrupt_stack: None,
            switch_pending: None,
            slice_deadline: None,
            slice_owner: None,
            slice_expired: false,
            yield_requested: false,
        }
    }
}

const NO_THREAD: usize = usize::MAX;

/// Fast-path part of a per-CPU control block, written only by its own core.
pub(crate) struct CpuLocal {
    nesting: AtomicU32,
    reschedule_pending: AtomicBool,
    current: AtomicUsize,
}

impl CpuLocal {
    pub const fn new() -> CpuLocal {
        CpuLocal {
            nesting: AtomicU32::new(0),
            reschedule_pending: AtomicBool::new(false),
            current: AtomicUsize::new(NO_THREAD),
        }
    }

    pub fn in_interrupt(&self) -> bool {
        self.nesting.load(Ordering::Acquire) > 0
    }

    pub fn nesting(&self) -> u32 {
        self.nesting.load(Ordering::Acquire)
    }

    /// Returns the nesting level after entering.
    pub fn enter(&self) -> u32 {
        self.nesting.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Returns the nesting level after leaving, or `None` if not nested.
    pub fn leave(&self) -> Option<u32> {
        self.nesting
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .ok()
            .map(|n| n - 1)
    }

    pub fn request_reschedule(&self) {
        self.reschedule_pending.store(true, Ordering::Release);
    }

    pub fn take_reschedule(&self) -> bool {
        self.reschedule_pending.swap(false, Ordering::AcqRel)
    }

    pub fn current(&self) -> Option<ThreadIndex> {
        match self.current.load(Ordering::Acquire) {
            NO_THREAD => None,
            index => Some(index as ThreadIndex),
        }
    }

    pub fn set_current(&self, thread: ThreadIndex) {
        self.current.store(thread as usize, Ordering::Release);
    }
}

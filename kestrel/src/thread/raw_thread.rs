use super::{SliceExpiredFn, ThreadHandle, ThreadInfo, ThreadState};
use crate::config::{MAX_CPUS, MAX_THREADS};
use crate::kernel::cpu::CpuMask;
use crate::kernel::exception::RuntimeError;
use crate::kernel::list::{Link, Linked, LinkedListTag, NodeIndex};
use crate::kernel::priority::Priority;
use crate::kernel::stack::StackRefMut;
use crate::kernel::wait_queue::{WaitQueueIndex, WaitResult};
use crate::time::Ticks;
use core::ops::{Index, IndexMut};
use kestrel_khal::CpuId;

pub(crate) type ThreadIndex = NodeIndex;

/// Ready queue or wait queue membership. A thread is in at most one of them.
pub struct QueueTag;
impl LinkedListTag for QueueTag {}

pub struct TimeoutTag;
impl LinkedListTag for TimeoutTag {}

pub(crate) const IDLE_THREAD_NAME: &str = "[idle]";

pub(crate) struct RawThread {
    pub generation: u16,
    pub in_use: bool,

    // Thread name
    pub name: &'static str,

    pub priority: Priority,
    pub state: ThreadState,
    pub affinity: CpuMask,
    pub idle: bool,
    pub essential: bool,

    // Intrusive link into the ready queue or the wait queue the thread is in
    pub queue_link: Link,
    pub wait_queue: Option<WaitQueueIndex>,

    // Intrusive link into the timeout list, ordered by deadline
    pub timeout_link: Link,
    pub deadline: Option<Ticks>,

    pub wait_result: Option<WaitResult>,

    // Per-thread time slice; zero uses the global slice length.
    pub slice_ticks: u32,
    pub slice_expired_fn: Option<SliceExpiredFn>,
    pub slice_data: usize,

    pub sched_locked: u32,

    // Core the thread is current on, kept until the switch away is committed.
    pub cpu: Option<CpuId>,
    // Context save of a committed switch away from this thread is in flight.
    pub saving_context: bool,

    pub joined: bool,
    pub stack: Option<StackRefMut>,
}

impl RawThread {
    pub const fn new() -> RawThread {
        RawThread {
            generation: 0,
            in_use: false,
            name: "",
            priority: Priority::LOWEST,
            state: ThreadState::Dead,
            affinity: CpuMask::NONE,
            idle: false,
            essential: false,
            queue_link: Link::new(),
            wait_queue: None,
            timeout_link: Link::new(),
            deadline: None,
            wait_result: None,
            slice_ticks: 0,
            slice_expired_fn: None,
            slice_data: 0,
            sched_locked: 0,
            cpu: None,
            saving_context: false,
            joined: false,
            stack: None,
        }
    }

    /// Reinitialize a free slot for a new thread, keeping its generation.
    pub fn occupy(
        &mut self,
        name: &'static str,
        priority: Priority,
        affinity: CpuMask,
        stack: StackRefMut,
    ) {
        let generation = self.generation;
        *self = RawThread::new();
        self.generation = generation;
        self.in_use = true;
        self.name = name;
        self.priority = priority;
        self.affinity = affinity;
        self.state = ThreadState::New;
        self.stack = Some(stack);
    }

    pub const fn is_pending_on(&self, queue: WaitQueueIndex) -> bool {
        matches!(self.state, ThreadState::Pending) && matches!(self.wait_queue, Some(q) if q == queue)
    }

    pub const fn is_sleeping(&self) -> bool {
        matches!(self.state, ThreadState::Pending) && self.wait_queue.is_none()
    }
}

pub(crate) struct ThreadTable {
    slots: [RawThread; MAX_THREADS],
}

impl ThreadTable {
    pub fn new() -> ThreadTable {
        ThreadTable {
            slots: core::array::from_fn(|_| RawThread::new()),
        }
    }

    /// Slot reserved for the idle thread of `cpu`.
    pub const fn idle_slot(cpu: CpuId) -> ThreadIndex {
        cpu as ThreadIndex
    }

    /// Find a free slot for an application thread.
    pub fn allocate(&self) -> Option<ThreadIndex> {
        (MAX_CPUS..MAX_THREADS)
            .find(|&index| !self.slots[index].in_use)
            .map(|index| index as ThreadIndex)
    }

    /// Free the slot and invalidate every outstanding handle to it.
    pub fn release(&mut self, index: ThreadIndex) {
        let slot = &mut self.slots[index as usize];
        let generation = slot.generation.wrapping_add(1);
        *slot = RawThread::new();
        slot.generation = generation;
    }

    pub fn handle(&self, index: ThreadIndex) -> ThreadHandle {
        ThreadHandle::new(index, self.slots[index as usize].generation)
    }

    /// Slot of `handle` if it still refers to a live or unjoined thread.
    pub fn lookup(&self, handle: ThreadHandle) -> Option<ThreadIndex> {
        let slot = self.slots.get(handle.index())?;
        (slot.in_use && slot.generation == handle.generation()).then_some(handle.slot())
    }

    #[track_caller]
    pub fn resolve(&self, handle: ThreadHandle) -> ThreadIndex {
        match self.lookup(handle) {
            Some(index) => index,
            None => runtime_error!(RuntimeError::StaleThreadHandle),
        }
    }

    pub fn info(&self, index: ThreadIndex) -> ThreadInfo {
        let thread = &self[index];
        ThreadInfo {
            handle: self.handle(index),
            name: thread.name,
            state: thread.state,
            priority: thread.priority,
            affinity: thread.affinity,
            cpu: thread.cpu,
            idle: thread.idle,
        }
    }

    pub fn occupied(&self) -> impl Iterator<Item = ThreadIndex> + '_ {
        (0..MAX_THREADS)
            .filter(|&index| self.slots[index].in_use)
            .map(|index| index as ThreadIndex)
    }
}

impl Index<ThreadIndex> for ThreadTable {
    type Output = RawThread;

    fn index(&self, index: ThreadIndex) -> &RawThread {
        &self.slots[index as usize]
    }
}

impl IndexMut<ThreadIndex> for ThreadTable {
    fn index_mut(&mut self, index: ThreadIndex) -> &mut RawThread {
        &mut self.slots[index as usize]
    }
}

impl Linked<QueueTag> for ThreadTable {
    fn link(&self, index: NodeIndex) -> &Link {
        &self[index].queue_link
    }

    fn link_mut(&mut self, index: NodeIndex) -> &mut Link {
        &mut self[index].queue_link
    }
}

impl Linked<TimeoutTag> for ThreadTable {
    fn link(&self, index: NodeIndex) -> &Link {
        &self[index].timeout_link
    }

    fn link_mut(&mut self, index: NodeIndex) -> &mut Link {
        &mut self[index].timeout_link
    }
}

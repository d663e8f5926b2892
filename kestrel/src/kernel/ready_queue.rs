//! Priority-ordered run queue shared by all cores.
use crate::kernel::list::LinkedList;
use crate::kernel::priority::{Priority, PriorityBitmap};
use crate::thread::raw_thread::{QueueTag, RawThread, ThreadIndex, ThreadTable};

/// One FIFO per priority level and a bitmap of the non-empty levels.
///
/// Running threads are not kept in the queue. The scheduler puts the
/// outgoing thread back when it switches away from a thread that is still
/// runnable.
pub(crate) struct ReadyQueue {
    levels: [LinkedList<QueueTag>; Priority::LEVELS],
    bitmap: PriorityBitmap,
}

impl ReadyQueue {
    pub fn new() -> ReadyQueue {
        ReadyQueue {
            levels: core::array::from_fn(|_| LinkedList::new()),
            bitmap: PriorityBitmap::new(),
        }
    }

    pub fn push_back(&mut self, threads: &mut ThreadTable, thread: ThreadIndex) {
        let level = threads[thread].priority.level();
        self.levels[level].push_back(threads, thread);
        self.bitmap.set(level);
    }

    /// Put a preempted thread back without losing its place among equals.
    pub fn push_front(&mut self, threads: &mut ThreadTable, thread: ThreadIndex) {
        let level = threads[thread].priority.level();
        self.levels[level].push_front(threads, thread);
        self.bitmap.set(level);
    }

    /// Must be called before the priority of `thread` is changed.
    pub fn remove(&mut self, threads: &mut ThreadTable, thread: ThreadIndex) -> bool {
        let level = threads[thread].priority.level();
        let removed = self.levels[level].remove(threads, thread);
        if self.levels[level].is_empty() {
            self.bitmap.clear(level);
        }
        removed
    }

    /// Most urgent, longest-queued thread accepted by `eligible`.
    pub fn best<F>(&self, threads: &ThreadTable, eligible: F) -> Option<ThreadIndex>
    where
        F: Fn(&RawThread) -> bool,
    {
        self.bitmap.levels().find_map(|level| {
            self.levels[level]
                .iter(threads)
                .find(|&thread| eligible(&threads[thread]))
        })
    }

    pub fn is_empty(&self) -> bool {
        self.bitmap.is_empty()
    }

    pub fn len(&self) -> usize {
        self.levels.iter().map(|level| level.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::cpu::CpuMask;
    use crate::kernel::stack::Stack;

    fn table_with(priorities: &[(i16, CpuMask)]) -> (ThreadTable, Vec<ThreadIndex>) {
        let mut threads = ThreadTable::new();
        let mut slots = Vec::new();
        for &(priority, affinity) in priorities {
            let slot = threads.allocate().unwrap();
            let stack = Box::leak(Box::new(Stack::<512>::new())).init();
            threads[slot].occupy("t", Priority::new(priority).unwrap(), affinity, stack);
            slots.push(slot);
        }
        (threads, slots)
    }

    #[test]
    fn picks_most_urgent_level_first() {
        let all = CpuMask::all();
        let (mut threads, slots) = table_with(&[(3, all), (-2, all), (3, all), (0, all)]);
        let mut ready = ReadyQueue::new();
        for &slot in &slots {
            ready.push_back(&mut threads, slot);
        }
        assert_eq!(ready.len(), 4);
        assert_eq!(ready.best(&threads, |_| true), Some(slots[1]));
        ready.remove(&mut threads, slots[1]);
        assert_eq!(ready.best(&threads, |_| true), Some(slots[3]));
        ready.remove(&mut threads, slots[3]);
        assert_eq!(ready.best(&threads, |_| true), Some(slots[0]));
    }

    #[test]
    fn skips_threads_not_allowed_on_cpu() {
        let (mut threads, slots) = table_with(&[(1, CpuMask::single(1)), (2, CpuMask::single(0))]);
        let mut ready = ReadyQueue::new();
        ready.push_back(&mut threads, slots[0]);
        ready.push_back(&mut threads, slots[1]);
        assert_eq!(ready.best(&threads, |t| t.affinity.contains(0)), Some(slots[1]));
        assert_eq!(ready.best(&threads, |t| t.affinity.contains(1)), Some(slots[0]));
        assert_eq!(ready.best(&threads, |t| t.affinity.contains(2)), None);
    }

    #[test]
    fn push_front_keeps_preempted_thread_ahead_of_peers() {
        let all = CpuMask::all();
        let (mut threads, slots) = table_with(&[(5, all), (5, all)]);
        let mut ready = ReadyQueue::new();
        ready.push_back(&mut threads, slots[1]);
        ready.push_front(&mut threads, slots[0]);
        assert_eq!(ready.best(&threads, |_| true), Some(slots[0]));
        assert!(ready.remove(&mut threads, slots[0]));
        assert!(ready.remove(&mut threads, slots[1]));
        assert!(ready.is_empty());
    }
}

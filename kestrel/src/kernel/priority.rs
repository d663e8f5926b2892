use crate::config::{NUM_COOP_PRIORITIES, NUM_PREEMPT_PRIORITIES};
use bit_field::BitField;
use core::fmt;

/// Thread priority. Lower values are more urgent.
///
/// Priorities below [`Priority::COOPERATIVE_THRESHOLD`] are cooperative: a
/// thread running at such a priority is never preempted by another thread
/// and never time-sliced. It gives up its core only by blocking, yielding or
/// exiting. Priorities at or above the threshold are preemptible.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Priority(i16);

impl Priority {
    pub const COOPERATIVE_THRESHOLD: i16 = 0;

    /// Most urgent application priority.
    pub const HIGHEST: Priority = Priority(-NUM_COOP_PRIORITIES);

    /// Least urgent application priority.
    pub const LOWEST: Priority = Priority(NUM_PREEMPT_PRIORITIES - 1);

    /// Reserved for the per-CPU idle threads.
    pub const IDLE: Priority = Priority(NUM_PREEMPT_PRIORITIES);

    /// Number of distinct priority levels, idle included.
    pub(crate) const LEVELS: usize = (NUM_COOP_PRIORITIES + NUM_PREEMPT_PRIORITIES + 1) as usize;

    /// Cooperative priority `x`, where `coop(0)` is the most urgent.
    pub const fn coop(x: i16) -> Priority {
        Priority(x - NUM_COOP_PRIORITIES)
    }

    /// Preemptible priority `x`, where `preempt(0)` is the most urgent.
    pub const fn preempt(x: i16) -> Priority {
        Priority(x)
    }

    /// Application priority with `value`, or `None` if out of range.
    pub const fn new(value: i16) -> Option<Priority> {
        if value >= Priority::HIGHEST.0 && value <= Priority::LOWEST.0 {
            Some(Priority(value))
        } else {
            None
        }
    }

    pub(crate) const fn from_raw(value: i16) -> Priority {
        Priority(value)
    }

    pub const fn value(self) -> i16 {
        self.0
    }

    pub const fn is_cooperative(self) -> bool {
        self.0 < Priority::COOPERATIVE_THRESHOLD
    }

    pub const fn is_preemptible(self) -> bool {
        !self.is_cooperative()
    }

    pub const fn is_more_urgent_than(self, other: Priority) -> bool {
        self.0 < other.0
    }

    pub(crate) const fn level(self) -> usize {
        (self.0 + NUM_COOP_PRIORITIES) as usize
    }
}

impl From<Priority> for i16 {
    fn from(priority: Priority) -> i16 {
        priority.0
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One bit per priority level, set while the level has ready threads.
#[derive(Clone, Copy, Default, Debug)]
pub(crate) struct PriorityBitmap(u64);

impl PriorityBitmap {
    pub const fn new() -> PriorityBitmap {
        PriorityBitmap(0)
    }

    pub fn set(&mut self, level: usize) {
        self.0.set_bit(level, true);
    }

    pub fn clear(&mut self, level: usize) {
        self.0.set_bit(level, false);
    }

    pub fn is_set(&self, level: usize) -> bool {
        self.0.get_bit(level)
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Most urgent non-empty level.
    pub fn first(&self) -> Option<usize> {
        if self.0 == 0 {
            None
        } else {
            Some(self.0.trailing_zeros() as usize)
        }
    }

    /// Non-empty levels from the most to the least urgent.
    pub fn levels(&self) -> impl Iterator<Item = usize> {
        let mut remaining = self.0;
        core::iter::from_fn(move || {
            if remaining == 0 {
                return None;
            }
            let level = remaining.trailing_zeros() as usize;
            remaining.set_bit(level, false);
            Some(level)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coop_and_preempt_ranges_meet_at_threshold() {
        assert_eq!(Priority::coop(NUM_COOP_PRIORITIES - 1).value(), -1);
        assert!(Priority::coop(NUM_COOP_PRIORITIES - 1).is_cooperative());
        assert_eq!(Priority::preempt(0).value(), Priority::COOPERATIVE_THRESHOLD);
        assert!(Priority::preempt(0).is_preemptible());
        assert_eq!(Priority::coop(0), Priority::HIGHEST);
        assert_eq!(Priority::HIGHEST.level(), 0);
        assert_eq!(Priority::IDLE.level(), Priority::LEVELS - 1);
    }

    #[test]
    fn idle_priority_is_not_an_application_priority() {
        assert!(Priority::new(Priority::IDLE.value()).is_none());
        assert!(Priority::new(Priority::HIGHEST.value() - 1).is_none());
        assert_eq!(Priority::new(Priority::LOWEST.value()), Some(Priority::LOWEST));
        assert!(Priority::LOWEST.is_more_urgent_than(Priority::IDLE));
    }

    #[test]
    fn bitmap_iterates_most_urgent_first() {
        let mut bitmap = PriorityBitmap::new();
        bitmap.set(9);
        bitmap.set(2);
        bitmap.set(31);
        assert_eq!(bitmap.first(), Some(2));
        assert!(bitmap.levels().eq([2, 9, 31]));
        bitmap.clear(2);
        assert!(!bitmap.is_set(2));
        assert_eq!(bitmap.first(), Some(9));
    }
}

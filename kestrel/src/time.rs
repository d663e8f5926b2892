pub use kestrel_khal::Ticks;
use kestrel_khal::AlarmClockController;

/// How long a blocking operation may wait.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Timeout {
    /// Do not block; fail immediately if the operation cannot complete.
    NoWait,
    /// Block for at most this many ticks.
    Ticks(Ticks),
    Forever,
}

impl Timeout {
    pub const fn ticks(ticks: Ticks) -> Timeout {
        if ticks == 0 {
            Timeout::NoWait
        } else {
            Timeout::Ticks(ticks)
        }
    }

    /// Timeout of at least `millis` milliseconds on the clock of `H`.
    pub const fn from_millis<H: AlarmClockController>(millis: u64) -> Timeout {
        Timeout::ticks((millis * H::TICK_FREQ_HZ).div_ceil(1000))
    }

    pub const fn is_no_wait(&self) -> bool {
        matches!(self, Timeout::NoWait | Timeout::Ticks(0))
    }

    /// Absolute expiry tick, `None` when the wait is unbounded.
    pub(crate) const fn deadline(&self, now: Ticks) -> Option<Ticks> {
        match self {
            Timeout::NoWait => Some(now),
            Timeout::Ticks(ticks) => Some(now.saturating_add(*ticks)),
            Timeout::Forever => None,
        }
    }
}

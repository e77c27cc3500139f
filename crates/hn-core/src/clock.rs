//! Scheduler cycle ticks.
//!
//! Every controller sees the same `CycleTick` for one scheduling cycle. The
//! cycle number drives cycle-counting timers, the elapsed duration drives
//! elapsed-time timers.

use std::time::{Duration, Instant};

/// Snapshot of the scheduler clock for one cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CycleTick {
    pub cycle: u64,
    /// Time since the scheduler started.
    pub elapsed: Duration,
}

impl CycleTick {
    pub fn new(cycle: u64, elapsed: Duration) -> Self {
        Self { cycle, elapsed }
    }
}

#[derive(Clone, Copy, Debug)]
enum Source {
    /// Deterministic: cycle n happens at n * period.
    Simulated { period: Duration },
    Wall { start: Instant },
}

/// Produces one `CycleTick` per scheduling cycle.
#[derive(Clone, Debug)]
pub struct SchedulerClock {
    source: Source,
    next_cycle: u64,
}

impl SchedulerClock {
    pub fn simulated(period: Duration) -> Self {
        Self {
            source: Source::Simulated { period },
            next_cycle: 0,
        }
    }

    pub fn wall() -> Self {
        Self {
            source: Source::Wall {
                start: Instant::now(),
            },
            next_cycle: 0,
        }
    }

    /// Tick for the cycle about to run; advances the cycle counter.
    pub fn next_tick(&mut self) -> CycleTick {
        let cycle = self.next_cycle;
        let elapsed = match self.source {
            Source::Simulated { period } => {
                period.saturating_mul(u32::try_from(cycle).unwrap_or(u32::MAX))
            }
            Source::Wall { start } => start.elapsed(),
        };
        self.next_cycle = self.next_cycle.saturating_add(1);
        CycleTick { cycle, elapsed }
    }

    /// Number of ticks handed out so far.
    pub fn cycles_run(&self) -> u64 {
        self.next_cycle
    }
}

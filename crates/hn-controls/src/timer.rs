//! Cycle-driven timers.
//!
//! A [`CycleTimer`] either counts scheduler cycles or measures elapsed
//! scheduler time since its last reset. Controllers own their timers through
//! a [`TimerRegistry`], which hands out [`TimerKey`]s at setup so the per-cycle
//! path never does a fallible name lookup.

use std::str::FromStr;
use std::time::Duration;

use hn_core::CycleTick;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerMode {
    /// Duration is in seconds of scheduler time.
    ByElapsedTime,
    /// Duration is in scheduler cycles.
    ByCycleCount,
}

impl FromStr for TimerMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TimerByCycles" | "TimerByCounting" => Ok(TimerMode::ByCycleCount),
            "TimerByTime" => Ok(TimerMode::ByElapsedTime),
            other => Err(ConfigError::UnknownTimerMode {
                name: other.to_string(),
            }),
        }
    }
}

fn default_mode() -> String {
    "TimerByCycles".to_string()
}

/// Timer as written in configuration. The mode is kept as its configured
/// name and checked when the owning controller is set up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerSpec {
    #[serde(default = "default_mode")]
    pub mode: String,
    pub duration: u64,
}

impl TimerSpec {
    pub fn cycles(duration: u64) -> Self {
        Self {
            mode: default_mode(),
            duration,
        }
    }

    pub fn seconds(duration: u64) -> Self {
        Self {
            mode: "TimerByTime".to_string(),
            duration,
        }
    }

    pub fn parse_mode(&self) -> ConfigResult<TimerMode> {
        self.mode.parse()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Progress {
    Cycles { count: u64, last_tick: Option<u64> },
    Elapsed { since: Option<Duration> },
}

impl Progress {
    fn fresh(mode: TimerMode) -> Self {
        match mode {
            TimerMode::ByCycleCount => Progress::Cycles {
                count: 0,
                last_tick: None,
            },
            TimerMode::ByElapsedTime => Progress::Elapsed { since: None },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CycleTimer {
    name: String,
    mode: TimerMode,
    duration: u64,
    progress: Progress,
}

impl CycleTimer {
    pub fn new(name: impl Into<String>, mode: TimerMode, duration: u64) -> Self {
        Self {
            name: name.into(),
            mode,
            duration,
            progress: Progress::fresh(mode),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> TimerMode {
        self.mode
    }

    pub fn duration(&self) -> u64 {
        self.duration
    }

    /// Advance a cycle-counting timer once per distinct cycle number.
    pub fn tick(&mut self, now: CycleTick) {
        if let Progress::Cycles { count, last_tick } = &mut self.progress
            && *last_tick != Some(now.cycle)
        {
            *count = count.saturating_add(1);
            *last_tick = Some(now.cycle);
        }
    }

    /// Zero progress. A tick for the same cycle afterwards does not count.
    pub fn reset(&mut self, now: CycleTick) {
        self.progress = match self.mode {
            TimerMode::ByCycleCount => Progress::Cycles {
                count: 0,
                last_tick: Some(now.cycle),
            },
            TimerMode::ByElapsedTime => Progress::Elapsed {
                since: Some(now.elapsed),
            },
        };
    }

    /// An elapsed-time timer that was never reset arms itself here and
    /// reports `false`.
    pub fn is_expired(&mut self, now: CycleTick) -> bool {
        match &mut self.progress {
            Progress::Cycles { count, .. } => *count >= self.duration,
            Progress::Elapsed { since } => match since {
                Some(start) => {
                    now.elapsed.saturating_sub(*start) >= Duration::from_secs(self.duration)
                }
                None => {
                    *since = Some(now.elapsed);
                    false
                }
            },
        }
    }

    pub fn increase_cycle_counter(&mut self) {
        if let Progress::Cycles { count, .. } = &mut self.progress {
            *count = count.saturating_add(1);
        }
    }

    fn reconfigure(&mut self, mode: TimerMode, duration: u64) {
        if self.mode != mode {
            self.progress = Progress::fresh(mode);
        }
        self.mode = mode;
        self.duration = duration;
    }
}

/// Handle to a timer inside one [`TimerRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerKey(usize);

/// Named timers of one controller instance.
#[derive(Debug, Clone)]
pub struct TimerRegistry {
    owner: String,
    now: CycleTick,
    timers: Vec<CycleTimer>,
}

impl TimerRegistry {
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            now: CycleTick::default(),
            timers: Vec::new(),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn now(&self) -> CycleTick {
        self.now
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    /// Register a timer. Re-adding a name updates mode and duration in place
    /// and returns the existing key.
    pub fn add_identifier(&mut self, name: &str, mode: TimerMode, duration: u64) -> TimerKey {
        if let Some(pos) = self.timers.iter().position(|t| t.name == name) {
            self.timers[pos].reconfigure(mode, duration);
            return TimerKey(pos);
        }
        self.timers.push(CycleTimer::new(name, mode, duration));
        TimerKey(self.timers.len() - 1)
    }

    /// Register a timer from its configured form.
    ///
    /// # Errors
    /// `UnknownTimerMode` when the mode name is not recognised.
    pub fn add_spec(&mut self, name: &str, spec: &TimerSpec) -> ConfigResult<TimerKey> {
        let mode = spec.parse_mode()?;
        Ok(self.add_identifier(name, mode, spec.duration))
    }

    pub fn key(&self, name: &str) -> ConfigResult<TimerKey> {
        self.timers
            .iter()
            .position(|t| t.name == name)
            .map(TimerKey)
            .ok_or_else(|| ConfigError::UnknownTimer {
                name: name.to_string(),
            })
    }

    /// Called once per cycle by the owning controller.
    pub fn tick(&mut self, now: CycleTick) {
        self.now = now;
        for timer in &mut self.timers {
            timer.tick(now);
        }
    }

    pub fn reset(&mut self, key: TimerKey) {
        let now = self.now;
        if let Some(timer) = self.timers.get_mut(key.0) {
            timer.reset(now);
        }
    }

    /// Reset every timer at the current tick, e.g. right after setup.
    pub fn reset_all(&mut self) {
        let now = self.now;
        for timer in &mut self.timers {
            timer.reset(now);
        }
    }

    /// A key from before [`TimerRegistry::clear`] reads as expired, so
    /// anything still holding one decays instead of sticking.
    pub fn is_expired(&mut self, key: TimerKey) -> bool {
        let now = self.now;
        match self.timers.get_mut(key.0) {
            Some(timer) => timer.is_expired(now),
            None => true,
        }
    }

    pub fn increase_cycle_counter(&mut self, key: TimerKey) {
        if let Some(timer) = self.timers.get_mut(key.0) {
            timer.increase_cycle_counter();
        }
    }

    pub fn get(&self, key: TimerKey) -> Option<&CycleTimer> {
        self.timers.get(key.0)
    }

    pub fn clear(&mut self) {
        self.timers.clear();
    }
}

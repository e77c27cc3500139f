//! Keep-alive gates driven by one-shot mailbox signals.
//!
//! Both gates latch on an explicit `true` and stay latched while the signal
//! keeps arriving within the timeout. An absent signal is the same as an
//! explicit `false` for the [`DebounceGate`]; the [`OverrideGate`] treats an
//! explicit `false` as an immediate release.

use hn_core::Percent;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ConfigError, ConfigResult, ControlError, ControlResult};
use crate::timer::{TimerKey, TimerRegistry, TimerSpec};

/// Sticky enable signal handler.
#[derive(Debug, Clone, PartialEq)]
pub struct DebounceGate {
    timer: TimerKey,
    active: bool,
}

impl DebounceGate {
    /// Register the gate's timer under `name` in the owner's registry.
    pub fn new(timers: &mut TimerRegistry, name: &str, spec: &TimerSpec) -> ConfigResult<Self> {
        Ok(Self {
            timer: timers.add_spec(name, spec)?,
            active: false,
        })
    }

    /// One cycle of the gate. `run` is the value taken from the run mailbox.
    pub fn evaluate(&mut self, timers: &mut TimerRegistry, run: Option<bool>) -> bool {
        let was_active = self.active;
        if run == Some(true) {
            self.active = true;
            timers.reset(self.timer);
        } else {
            self.active = self.active && !timers.is_expired(self.timer);
        }
        if was_active != self.active {
            debug!(owner = timers.owner(), active = self.active, "enable gate changed");
        }
        self.active
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn reset_timer(&self, timers: &mut TimerRegistry) {
        timers.reset(self.timer);
    }

    pub fn increase_cycle_counter(&self, timers: &mut TimerRegistry) {
        timers.increase_cycle_counter(self.timer);
    }
}

fn default_override_value() -> Percent {
    Percent::FULL
}

/// Configured form of an [`OverrideGate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverrideSpec {
    pub timer: TimerSpec,
    /// Values at or below this switch the consumer off.
    #[serde(default)]
    pub min_value: Percent,
    #[serde(default = "default_override_value")]
    pub initial_value: Percent,
}

impl OverrideSpec {
    pub fn new(timer: TimerSpec) -> Self {
        Self {
            timer,
            min_value: Percent::ZERO,
            initial_value: Percent::FULL,
        }
    }
}

/// What an override demands this cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OverrideState {
    /// No override; normal control applies.
    Inactive,
    Off,
    On(Percent),
}

impl OverrideState {
    pub fn is_active(self) -> bool {
        !matches!(self, OverrideState::Inactive)
    }
}

/// Exceptional-state handler: an externally forced on/off with intensity.
#[derive(Debug, Clone, PartialEq)]
pub struct OverrideGate {
    timer: TimerKey,
    active: bool,
    value: Percent,
    min: Percent,
}

impl OverrideGate {
    pub fn new(timers: &mut TimerRegistry, name: &str, spec: &OverrideSpec) -> ConfigResult<Self> {
        if spec.min_value >= Percent::FULL {
            return Err(ConfigError::InvalidValue {
                field: "override.min_value",
                reason: "must be below 100".to_string(),
            });
        }
        Ok(Self {
            timer: timers.add_spec(name, &spec.timer)?,
            active: false,
            value: spec.initial_value,
            min: spec.min_value,
        })
    }

    /// Store a new intensity. The value is retained across cycles.
    ///
    /// # Errors
    /// `WriteRejected` when `raw` is outside `[0, 100]`.
    pub fn set_value(&mut self, raw: f64) -> ControlResult<()> {
        let value = Percent::new(raw).map_err(|e| ControlError::WriteRejected {
            id: "override value".to_string(),
            reason: e.to_string(),
        })?;
        self.value = value;
        Ok(())
    }

    pub fn value(&self) -> Percent {
        self.value
    }

    /// One cycle of the gate. `enable` is the value taken from the override
    /// enable mailbox.
    pub fn evaluate(&mut self, timers: &mut TimerRegistry, enable: Option<bool>) -> OverrideState {
        let was_active = self.active;
        match enable {
            Some(true) => {
                self.active = true;
                timers.reset(self.timer);
            }
            Some(false) => self.active = false,
            None => self.active = self.active && !timers.is_expired(self.timer),
        }
        if was_active != self.active {
            debug!(owner = timers.owner(), active = self.active, "override changed");
        }
        self.state()
    }

    pub fn state(&self) -> OverrideState {
        if !self.active {
            OverrideState::Inactive
        } else if self.value <= self.min {
            OverrideState::Off
        } else {
            OverrideState::On(self.value)
        }
    }
}

//! Threshold thermometer: a step-quantised, fluctuation-filtered view of a
//! reference thermometer, plus an exclusive setpoint claim.
//!
//! Consumers compare against the filtered value so that a sensor hovering
//! around a setpoint does not flip a valve every cycle.

use hn_core::DeciCelsius;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::component::Thermometer;
use crate::error::{ConfigError, ConfigResult};

fn default_step() -> i32 {
    10
}

fn default_max_interval() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdConfig {
    pub id: String,
    /// Thermometer the filtered value follows.
    pub reference_id: String,
    /// Quantisation step in deci-degrees.
    #[serde(default = "default_step")]
    pub step: i32,
    /// Cycles a changed value must persist before it is applied.
    #[serde(default = "default_max_interval")]
    pub max_interval: u32,
    /// Value reported until the reference delivers a reading.
    #[serde(default)]
    pub default_temperature: DeciCelsius,
    #[serde(default)]
    pub start_setpoint: DeciCelsius,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Trend {
    Rising,
    Falling,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdThermometer {
    config: ThresholdConfig,
    current: DeciCelsius,
    on_default: bool,
    /// Value waiting to replace `current` and how long it has held.
    candidate: Option<DeciCelsius>,
    pending: u32,
    trend: Trend,
    setpoint: DeciCelsius,
    claimed_by: Option<String>,
}

impl ThresholdThermometer {
    pub fn new(config: ThresholdConfig) -> ConfigResult<Self> {
        if config.step <= 0 {
            return Err(ConfigError::InvalidValue {
                field: "step",
                reason: format!("must be positive, got {}", config.step),
            });
        }
        let step = i64::from(config.step);
        let start = i64::from(config.default_temperature.tenths()) / step * step;
        Ok(Self {
            current: DeciCelsius(start as i32),
            on_default: true,
            candidate: None,
            pending: 0,
            trend: Trend::Rising,
            setpoint: config.start_setpoint,
            claimed_by: None,
            config,
        })
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn reference_id(&self) -> &str {
        &self.config.reference_id
    }

    pub fn temperature(&self) -> DeciCelsius {
        self.current
    }

    pub fn trend(&self) -> Trend {
        self.trend
    }

    /// Feed one reference reading. Missing readings change nothing.
    pub fn update(&mut self, reading: Option<DeciCelsius>) {
        let Some(reading) = reading else {
            return;
        };
        let incoming = self.quantise(reading);
        if incoming == self.current {
            self.candidate = None;
            self.pending = 0;
            return;
        }
        if self.candidate != Some(incoming) {
            self.candidate = Some(incoming);
            self.pending = 0;
        }
        if self.pending < self.config.max_interval && !self.on_default {
            self.pending += 1;
            return;
        }
        self.trend = if incoming < self.current {
            Trend::Falling
        } else {
            Trend::Rising
        };
        debug!(id = %self.config.id, from = ?self.current, to = ?incoming, trend = ?self.trend, "threshold moved");
        self.current = incoming;
        self.candidate = None;
        self.pending = 0;
        self.on_default = false;
    }

    /// Round towards the current value: up when the reading is below it,
    /// down otherwise.
    fn quantise(&self, reading: DeciCelsius) -> DeciCelsius {
        let step = i64::from(self.config.step);
        let r = i64::from(reading.tenths());
        let q = if reading < self.current {
            -(-r).div_euclid(step) * step
        } else {
            r.div_euclid(step) * step
        };
        DeciCelsius(q.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32)
    }

    /// While rising the setpoint itself counts as reached.
    pub fn is_above(&self, temperature: DeciCelsius) -> bool {
        match self.trend {
            Trend::Rising => self.current >= temperature,
            Trend::Falling => self.current > temperature,
        }
    }

    pub fn is_below(&self, temperature: DeciCelsius) -> bool {
        match self.trend {
            Trend::Falling => self.current <= temperature,
            Trend::Rising => self.current < temperature,
        }
    }

    pub fn setpoint(&self) -> DeciCelsius {
        self.setpoint
    }

    pub fn claimed_by(&self) -> Option<&str> {
        self.claimed_by.as_deref()
    }

    /// Take (or keep) the setpoint claim and write `setpoint`.
    ///
    /// Returns `false` and leaves everything unchanged when another owner
    /// holds the claim.
    pub fn claim(&mut self, owner: &str, setpoint: DeciCelsius) -> bool {
        match self.claimed_by.as_deref() {
            Some(holder) if holder != owner => {
                warn!(id = %self.config.id, holder, owner, "setpoint already claimed");
                false
            }
            _ => {
                self.claimed_by = Some(owner.to_string());
                self.setpoint = setpoint;
                true
            }
        }
    }

    /// Drop the claim if `owner` holds it.
    pub fn release(&mut self, owner: &str) {
        if self.claimed_by.as_deref() == Some(owner) {
            self.claimed_by = None;
        }
    }
}

impl Thermometer for ThresholdThermometer {
    fn reading(&self) -> Option<DeciCelsius> {
        Some(self.current)
    }
}

//! Two-threshold hysteresis and the latch it drives.
//!
//! Activation and deactivation are judged on separate sensors against
//! separate setpoints. Deactivation is always evaluated first, so a unit is
//! never switched on in a cycle where its deactivation condition holds.

use hn_core::DeciCelsius;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::component::{
    Capability, ComponentKind, ComponentRef, ComponentRegistry, reading, refresh, resolve_kind,
};
use crate::error::{ConfigError, ConfigResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Heating,
    Cooling,
}

impl Direction {
    pub fn required_capability(self) -> Capability {
        match self {
            Direction::Heating => Capability::HeatSource,
            Direction::Cooling => Capability::ColdSource,
        }
    }

    /// Reading has reached the point where the unit must stop.
    pub fn past_deactivation(self, reading: DeciCelsius, setpoint: DeciCelsius) -> bool {
        match self {
            Direction::Heating => reading >= setpoint,
            Direction::Cooling => reading <= setpoint,
        }
    }

    /// Reading has reached the point where the unit must start.
    pub fn past_activation(self, reading: DeciCelsius, setpoint: DeciCelsius) -> bool {
        match self {
            Direction::Heating => reading <= setpoint,
            Direction::Cooling => reading >= setpoint,
        }
    }
}

/// A setpoint is either a literal temperature or the live reading of another
/// thermometer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Setpoint {
    Fixed(DeciCelsius),
    Sensor(String),
}

impl From<i32> for Setpoint {
    fn from(tenths: i32) -> Self {
        Setpoint::Fixed(DeciCelsius(tenths))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoundSetpoint {
    Fixed(DeciCelsius),
    Sensor(ComponentRef),
}

impl BoundSetpoint {
    pub fn bind(registry: &dyn ComponentRegistry, setpoint: &Setpoint) -> ConfigResult<Self> {
        Ok(match setpoint {
            Setpoint::Fixed(t) => BoundSetpoint::Fixed(*t),
            Setpoint::Sensor(id) => {
                BoundSetpoint::Sensor(resolve_kind(registry, id, ComponentKind::Thermometer)?)
            }
        })
    }

    pub fn value(&self, registry: &dyn ComponentRegistry) -> Option<DeciCelsius> {
        match self {
            BoundSetpoint::Fixed(t) => Some(*t),
            BoundSetpoint::Sensor(r) => reading(registry, r),
        }
    }

    fn refresh(&mut self, registry: &dyn ComponentRegistry) -> bool {
        match self {
            BoundSetpoint::Fixed(_) => true,
            BoundSetpoint::Sensor(r) => refresh(registry, r),
        }
    }
}

/// Boolean latch. Starts inactive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActiveLatch {
    active: bool,
}

impl ActiveLatch {
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Returns whether the state changed.
    pub fn set(&mut self, active: bool) -> bool {
        let changed = self.active != active;
        self.active = active;
        changed
    }
}

/// Latch transition for one cycle. `None` means no evidence for that check.
///
/// Without evidence on deactivation the latch holds, even if activation
/// would fire.
pub fn next_state(active: bool, deactivate: Option<bool>, activate: Option<bool>) -> bool {
    match deactivate {
        Some(true) => false,
        None => active,
        Some(false) => active || activate == Some(true),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Evaluation {
    pub active: bool,
    pub changed: bool,
    /// A reading or dynamic setpoint needed this cycle was unavailable.
    pub missing_input: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThresholdHysteresis {
    direction: Direction,
    activation_sensor: ComponentRef,
    activation_setpoint: BoundSetpoint,
    deactivation_sensor: ComponentRef,
    deactivation_setpoint: BoundSetpoint,
}

impl ThresholdHysteresis {
    /// # Errors
    /// `SensorOverlap` when both roles use the same sensor.
    pub fn new(
        direction: Direction,
        activation_sensor: ComponentRef,
        activation_setpoint: BoundSetpoint,
        deactivation_sensor: ComponentRef,
        deactivation_setpoint: BoundSetpoint,
    ) -> ConfigResult<Self> {
        if activation_sensor.id == deactivation_sensor.id {
            return Err(ConfigError::SensorOverlap {
                id: activation_sensor.id,
            });
        }
        Ok(Self {
            direction,
            activation_sensor,
            activation_setpoint,
            deactivation_sensor,
            deactivation_setpoint,
        })
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn activation_sensor(&self) -> &ComponentRef {
        &self.activation_sensor
    }

    pub fn deactivation_sensor(&self) -> &ComponentRef {
        &self.deactivation_sensor
    }

    pub fn should_deactivate(&self, registry: &dyn ComponentRegistry) -> Option<bool> {
        let r = reading(registry, &self.deactivation_sensor)?;
        let sp = self.deactivation_setpoint.value(registry)?;
        Some(self.direction.past_deactivation(r, sp))
    }

    pub fn should_activate(&self, registry: &dyn ComponentRegistry) -> Option<bool> {
        let r = reading(registry, &self.activation_sensor)?;
        let sp = self.activation_setpoint.value(registry)?;
        Some(self.direction.past_activation(r, sp))
    }

    /// Swap stale sensor references in place. Returns whether all of them
    /// are usable.
    pub fn refresh(&mut self, registry: &dyn ComponentRegistry) -> bool {
        let a = refresh(registry, &mut self.activation_sensor);
        let d = refresh(registry, &mut self.deactivation_sensor);
        let asp = self.activation_setpoint.refresh(registry);
        let dsp = self.deactivation_setpoint.refresh(registry);
        a && d && asp && dsp
    }

    pub fn evaluate(&self, registry: &dyn ComponentRegistry, latch: &mut ActiveLatch) -> Evaluation {
        let deactivate = self.should_deactivate(registry);
        let activate = self.should_activate(registry);
        let next = next_state(latch.is_active(), deactivate, activate);
        let changed = latch.set(next);
        if changed {
            debug!(
                sensor = %self.activation_sensor.id,
                active = next,
                "hysteresis latch changed"
            );
        }
        Evaluation {
            active: next,
            changed,
            missing_input: deactivate.is_none() || activate.is_none(),
        }
    }
}

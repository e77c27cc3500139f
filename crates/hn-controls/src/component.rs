//! The seam between controllers and the components they drive.
//!
//! Controllers never hold components directly. They keep a [`ComponentRef`]
//! (configured id plus a generation-checked arena handle) and go through a
//! [`ComponentRegistry`] every cycle. When a component is replaced or
//! disabled its handle goes stale and [`refresh`] re-resolves it by id.

use std::fmt;

use hn_core::{DeciCelsius, Handle, Percent};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ConfigError, ConfigResult, ControlResult};
use crate::threshold::ThresholdThermometer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComponentKind {
    Thermometer,
    ThermalUnit,
    Actuator,
    ThresholdThermometer,
}

impl ComponentKind {
    /// Whether a component of this kind can stand in where a thermometer is
    /// expected.
    pub fn reads_temperature(self) -> bool {
        matches!(
            self,
            ComponentKind::Thermometer | ComponentKind::ThresholdThermometer
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            ComponentKind::Thermometer => "thermometer",
            ComponentKind::ThermalUnit => "thermal unit",
            ComponentKind::Actuator => "actuator",
            ComponentKind::ThresholdThermometer => "threshold thermometer",
        }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What a thermal unit can provide to the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Capability {
    HeatSource,
    ColdSource,
}

/// Resolved reference to a component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentRef {
    pub id: String,
    pub handle: Handle,
    pub kind: ComponentKind,
}

pub trait Thermometer {
    /// `None` when the sensor has no valid value this cycle.
    fn reading(&self) -> Option<DeciCelsius>;
}

pub trait ThermalUnit {
    fn capability(&self) -> Capability;

    /// Write the one-shot run request for this cycle.
    fn request_run(&mut self) -> ControlResult<()>;

    /// Blocked or in an error state.
    fn is_blocked(&self) -> bool;
}

pub trait Actuator {
    fn power_level(&self) -> Option<Percent>;

    fn set_power_level(&mut self, level: Percent) -> ControlResult<()>;

    fn force_open(&mut self) -> ControlResult<()>;

    fn force_close(&mut self) -> ControlResult<()>;

    /// False while the actuator is still moving or otherwise busy.
    fn ready_to_change(&self) -> bool;
}

/// Lookup service for components by id.
///
/// Typed accessors return `None` for stale handles, disabled components and
/// handles of a different kind.
pub trait ComponentRegistry {
    /// # Errors
    /// `NotFound` when no enabled component carries `id`.
    fn resolve(&self, id: &str) -> ControlResult<ComponentRef>;

    /// Handle generation matches and the component is enabled.
    fn is_live(&self, component: &ComponentRef) -> bool;

    fn thermometer(&self, component: &ComponentRef) -> Option<&dyn Thermometer>;

    fn thermal_unit(&self, component: &ComponentRef) -> Option<&dyn ThermalUnit>;

    fn thermal_unit_mut(&mut self, component: &ComponentRef) -> Option<&mut dyn ThermalUnit>;

    fn actuator(&self, component: &ComponentRef) -> Option<&dyn Actuator>;

    fn actuator_mut(&mut self, component: &ComponentRef) -> Option<&mut dyn Actuator>;

    fn threshold_mut(&mut self, component: &ComponentRef) -> Option<&mut ThresholdThermometer>;
}

/// Resolve `id` at configuration time and check its kind. A threshold
/// thermometer is accepted where a thermometer is expected.
pub fn resolve_kind(
    registry: &dyn ComponentRegistry,
    id: &str,
    expected: ComponentKind,
) -> ConfigResult<ComponentRef> {
    let component = registry.resolve(id).map_err(|_| ConfigError::NotFound {
        id: id.to_string(),
    })?;
    let kind_ok = if expected == ComponentKind::Thermometer {
        component.kind.reads_temperature()
    } else {
        component.kind == expected
    };
    if !kind_ok {
        return Err(ConfigError::WrongKind {
            id: id.to_string(),
            expected: expected.name(),
        });
    }
    Ok(component)
}

/// Re-resolve a reference whose component was disabled or replaced.
///
/// Idempotent: a live reference is left alone. Returns whether the reference
/// is usable afterwards.
pub fn refresh(registry: &dyn ComponentRegistry, component: &mut ComponentRef) -> bool {
    if registry.is_live(component) {
        return true;
    }
    match registry.resolve(&component.id) {
        Ok(fresh) if fresh.kind == component.kind => {
            debug!(id = %component.id, from = ?component.handle, to = ?fresh.handle, "re-resolved component");
            *component = fresh;
            true
        }
        Ok(fresh) => {
            warn!(id = %component.id, expected = %component.kind, found = %fresh.kind, "component changed kind");
            false
        }
        Err(err) => {
            warn!(id = %component.id, %err, "component unavailable");
            false
        }
    }
}

/// Current reading of a thermometer reference, `None` when unavailable.
pub fn reading(registry: &dyn ComponentRegistry, component: &ComponentRef) -> Option<DeciCelsius> {
    registry.thermometer(component).and_then(|t| t.reading())
}

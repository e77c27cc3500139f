//! Site file schema definitions.

use hn_controls::{
    Capability, DecentralizedConfig, HydraulicConfig, MultiUnitConfig, OverrideSpec,
    ThresholdConfig, TimerSpec,
};
use hn_core::{DeciCelsius, Percent};
use serde::{Deserialize, Serialize};

pub const LATEST_VERSION: u32 = 1;

fn default_cycle_period_ms() -> u64 {
    1000
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SiteDef {
    pub version: u32,
    pub name: String,
    #[serde(default = "default_cycle_period_ms")]
    pub cycle_period_ms: u64,
    #[serde(default)]
    pub components: Vec<ComponentDef>,
    #[serde(default)]
    pub orchestrators: Vec<MultiUnitConfig>,
    #[serde(default)]
    pub hydraulics: Vec<HydraulicConfig>,
    #[serde(default)]
    pub decentralized: Vec<DecentralizedConfig>,
    #[serde(default)]
    pub events: Vec<ScriptedEvent>,
}

impl SiteDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            version: LATEST_VERSION,
            name: name.into(),
            cycle_period_ms: default_cycle_period_ms(),
            components: Vec::new(),
            orchestrators: Vec::new(),
            hydraulics: Vec::new(),
            decentralized: Vec::new(),
            events: Vec::new(),
        }
    }

    /// Ids of every controller, in scheduling order.
    pub fn controller_ids(&self) -> impl Iterator<Item = &str> {
        self.orchestrators
            .iter()
            .map(|c| c.id.as_str())
            .chain(self.decentralized.iter().map(|c| c.id.as_str()))
            .chain(self.hydraulics.iter().map(|c| c.id.as_str()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind")]
pub enum ComponentDef {
    Thermometer {
        id: String,
        #[serde(default)]
        reading: Option<DeciCelsius>,
    },
    ThermalUnit(ThermalUnitDef),
    Actuator(ActuatorDef),
    ThresholdThermometer(ThresholdConfig),
}

impl ComponentDef {
    pub fn id(&self) -> &str {
        match self {
            ComponentDef::Thermometer { id, .. } => id,
            ComponentDef::ThermalUnit(u) => &u.id,
            ComponentDef::Actuator(a) => &a.id,
            ComponentDef::ThresholdThermometer(t) => &t.id,
        }
    }
}

/// A heater or chiller that runs while its enable signal keeps arriving.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ThermalUnitDef {
    pub id: String,
    pub capability: Capability,
    /// Keep-alive window of the enable signal.
    pub run_timeout: TimerSpec,
    #[serde(default)]
    pub override_gate: Option<OverrideSpec>,
    #[serde(default)]
    pub blocked: bool,
}

/// Valve or pump.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActuatorDef {
    pub id: String,
    #[serde(default)]
    pub position: Percent,
    /// Cycles a move takes; the actuator is not ready while moving.
    #[serde(default)]
    pub travel_cycles: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScriptedEvent {
    pub cycle: u64,
    pub action: EventAction,
}

/// Something that happens to the site at the start of a cycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum EventAction {
    SetReading {
        sensor: String,
        value: Option<DeciCelsius>,
    },
    Disable {
        component: String,
    },
    Enable {
        component: String,
    },
    /// Swap in a fresh instance under the same id.
    Replace {
        component: ComponentDef,
    },
    SetBlocked {
        unit: String,
        blocked: bool,
    },
    RejectWrites {
        component: String,
        reject: bool,
    },
    /// Enable signal of a hydraulic controller or decentralized unit.
    EnableController {
        controller: String,
        value: bool,
    },
    /// Network answer to a decentralized unit's request.
    GrantHeat {
        unit: String,
        value: bool,
    },
    AcknowledgeMoreHeat {
        unit: String,
        value: bool,
    },
    ForceOpen {
        controller: String,
    },
    ForceClose {
        controller: String,
    },
    RequestPosition {
        controller: String,
        position: Percent,
    },
    UpsertBreakpoint {
        controller: String,
        temperature: DeciCelsius,
        position: Percent,
    },
    /// Override enable of a thermal unit or decentralized unit.
    Override {
        target: String,
        enable: bool,
    },
    OverrideValue {
        target: String,
        value: f64,
    },
}

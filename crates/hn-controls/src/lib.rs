//! hn-controls: the reactive control core of a thermal network edge
//! controller.
//!
//! Everything here runs once per scheduling cycle and reaches field devices
//! only through the traits in [`component`].
//!
//! - [`timer`]: cycle-counting and elapsed-time timers
//! - [`gate`]: enable-signal debounce and exceptional-state override
//! - [`hysteresis`]: two-threshold latch
//! - [`orchestrator`]: N thermal units with their own hysteresis
//! - [`hydraulic`]: temperature-to-position mapping for valves and pumps
//! - [`handshake`]: decentralized need-heat request handshake
//! - [`threshold`]: filtered thermometer with an exclusive setpoint claim

pub mod component;
pub mod error;
pub mod gate;
pub mod handshake;
pub mod hydraulic;
pub mod hysteresis;
pub mod mailbox;
pub mod orchestrator;
pub mod threshold;
pub mod timer;

#[cfg(test)]
pub(crate) mod testkit;

pub use component::{
    Actuator, Capability, ComponentKind, ComponentRef, ComponentRegistry, ThermalUnit, Thermometer,
};
pub use error::{ConfigError, ConfigResult, ControlError, ControlResult};
pub use gate::{DebounceGate, OverrideGate, OverrideSpec, OverrideState};
pub use handshake::{
    DecentralizedConfig, DecentralizedKind, DecentralizedUnit, HandshakePhase, HeatRequestHandshake,
};
pub use hydraulic::{
    Breakpoint, BreakpointTable, ControlType, FallbackSpec, HydraulicConfig, HydraulicController,
    HydraulicPositionMapper,
};
pub use hysteresis::{ActiveLatch, Direction, Setpoint, ThresholdHysteresis};
pub use mailbox::Mailbox;
pub use orchestrator::{BoundUnitSet, MultiUnitConfig, MultiUnitOrchestrator};
pub use threshold::{ThresholdConfig, ThresholdThermometer, Trend};
pub use timer::{CycleTimer, TimerKey, TimerMode, TimerRegistry, TimerSpec};

//! Cycle-driven simulation of a heat network site.
//!
//! Provides:
//! - a generation-checked component store implementing the controllers'
//!   registry seam
//! - simulated thermometers, thermal units and valves
//! - a scheduler that runs every controller once per cycle and replays
//!   scripted events

pub mod devices;
pub mod error;
pub mod site;
pub mod store;

pub use devices::{SimThermalUnit, SimThermometer, SimValve};
pub use error::{SimError, SimResult};
pub use site::{
    CycleReport, DecentralizedStatus, HydraulicStatus, OrchestratorStatus, Site, UnitStatus,
    ValveStatus,
};
pub use store::{ComponentStore, Device};

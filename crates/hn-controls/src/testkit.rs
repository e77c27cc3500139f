//! In-memory registry for unit tests.

use std::collections::HashMap;

use hn_core::{DeciCelsius, Handle, Id, Percent};

use crate::component::{
    Actuator, Capability, ComponentKind, ComponentRef, ComponentRegistry, ThermalUnit, Thermometer,
};
use crate::error::{ControlError, ControlResult};
use crate::threshold::{ThresholdConfig, ThresholdThermometer};

pub struct FakeThermometer(pub Option<DeciCelsius>);

impl Thermometer for FakeThermometer {
    fn reading(&self) -> Option<DeciCelsius> {
        self.0
    }
}

pub struct FakeUnit {
    pub capability: Capability,
    pub blocked: bool,
    pub reject: bool,
    pub run_requests: u32,
}

impl ThermalUnit for FakeUnit {
    fn capability(&self) -> Capability {
        self.capability
    }

    fn request_run(&mut self) -> ControlResult<()> {
        if self.reject {
            return Err(ControlError::WriteRejected {
                id: "fake".to_string(),
                reason: "rejecting".to_string(),
            });
        }
        self.run_requests += 1;
        Ok(())
    }

    fn is_blocked(&self) -> bool {
        self.blocked
    }
}

pub struct FakeActuator {
    pub level: Option<Percent>,
    pub ready: bool,
    pub reject: bool,
    pub writes: Vec<Percent>,
}

impl FakeActuator {
    fn write(&mut self, level: Percent) -> ControlResult<()> {
        if self.reject {
            return Err(ControlError::WriteRejected {
                id: "fake".to_string(),
                reason: "rejecting".to_string(),
            });
        }
        self.level = Some(level);
        self.writes.push(level);
        Ok(())
    }
}

impl Actuator for FakeActuator {
    fn power_level(&self) -> Option<Percent> {
        self.level
    }

    fn set_power_level(&mut self, level: Percent) -> ControlResult<()> {
        self.write(level)
    }

    fn force_open(&mut self) -> ControlResult<()> {
        self.write(Percent::FULL)
    }

    fn force_close(&mut self) -> ControlResult<()> {
        self.write(Percent::ZERO)
    }

    fn ready_to_change(&self) -> bool {
        self.ready
    }
}

enum FakeComponent {
    Thermometer(FakeThermometer),
    Unit(FakeUnit),
    Actuator(FakeActuator),
    Threshold(ThresholdThermometer),
}

impl FakeComponent {
    fn kind(&self) -> ComponentKind {
        match self {
            FakeComponent::Thermometer(_) => ComponentKind::Thermometer,
            FakeComponent::Unit(_) => ComponentKind::ThermalUnit,
            FakeComponent::Actuator(_) => ComponentKind::Actuator,
            FakeComponent::Threshold(_) => ComponentKind::ThresholdThermometer,
        }
    }
}

struct Entry {
    handle: Handle,
    enabled: bool,
    component: FakeComponent,
}

#[derive(Default)]
pub struct FakeRegistry {
    entries: HashMap<String, Entry>,
}

impl FakeRegistry {
    fn insert(&mut self, id: &str, component: FakeComponent) {
        let slot = Id::from_index(self.entries.len() as u32);
        self.entries.insert(
            id.to_string(),
            Entry {
                handle: Handle::new(slot, 0),
                enabled: true,
                component,
            },
        );
    }

    pub fn add_thermometer(&mut self, id: &str, reading: Option<DeciCelsius>) {
        self.insert(id, FakeComponent::Thermometer(FakeThermometer(reading)));
    }

    fn add_unit(&mut self, id: &str, capability: Capability) {
        self.insert(
            id,
            FakeComponent::Unit(FakeUnit {
                capability,
                blocked: false,
                reject: false,
                run_requests: 0,
            }),
        );
    }

    pub fn add_heater(&mut self, id: &str) {
        self.add_unit(id, Capability::HeatSource);
    }

    pub fn add_chiller(&mut self, id: &str) {
        self.add_unit(id, Capability::ColdSource);
    }

    pub fn add_actuator(&mut self, id: &str) {
        self.insert(
            id,
            FakeComponent::Actuator(FakeActuator {
                level: None,
                ready: true,
                reject: false,
                writes: Vec::new(),
            }),
        );
    }

    pub fn add_threshold(&mut self, config: ThresholdConfig) {
        let id = config.id.clone();
        let tt = ThresholdThermometer::new(config).unwrap();
        self.insert(&id, FakeComponent::Threshold(tt));
    }

    pub fn set_reading(&mut self, id: &str, reading: Option<DeciCelsius>) {
        match self.entries.get_mut(id).map(|e| &mut e.component) {
            Some(FakeComponent::Thermometer(t)) => t.0 = reading,
            _ => panic!("{id} is not a thermometer"),
        }
    }

    /// New instance under the same id; old handles go stale.
    pub fn replace_thermometer(&mut self, id: &str, reading: Option<DeciCelsius>) {
        let entry = self.entries.get_mut(id).unwrap();
        entry.handle = entry.handle.next_generation();
        entry.component = FakeComponent::Thermometer(FakeThermometer(reading));
    }

    pub fn set_enabled(&mut self, id: &str, enabled: bool) {
        let entry = self.entries.get_mut(id).unwrap();
        if entry.enabled && !enabled {
            entry.handle = entry.handle.next_generation();
        }
        entry.enabled = enabled;
    }

    pub fn unit(&self, id: &str) -> &FakeUnit {
        match &self.entries[id].component {
            FakeComponent::Unit(u) => u,
            _ => panic!("{id} is not a unit"),
        }
    }

    pub fn unit_mut(&mut self, id: &str) -> &mut FakeUnit {
        match &mut self.entries.get_mut(id).unwrap().component {
            FakeComponent::Unit(u) => u,
            _ => panic!("{id} is not a unit"),
        }
    }

    pub fn actuator_state(&self, id: &str) -> &FakeActuator {
        match &self.entries[id].component {
            FakeComponent::Actuator(a) => a,
            _ => panic!("{id} is not an actuator"),
        }
    }

    pub fn actuator_state_mut(&mut self, id: &str) -> &mut FakeActuator {
        match &mut self.entries.get_mut(id).unwrap().component {
            FakeComponent::Actuator(a) => a,
            _ => panic!("{id} is not an actuator"),
        }
    }

    pub fn threshold(&self, id: &str) -> &ThresholdThermometer {
        match &self.entries[id].component {
            FakeComponent::Threshold(t) => t,
            _ => panic!("{id} is not a threshold thermometer"),
        }
    }

    pub fn threshold_by_id_mut(&mut self, id: &str) -> &mut ThresholdThermometer {
        match &mut self.entries.get_mut(id).unwrap().component {
            FakeComponent::Threshold(t) => t,
            _ => panic!("{id} is not a threshold thermometer"),
        }
    }

    fn live(&self, c: &ComponentRef) -> Option<&FakeComponent> {
        self.entries
            .get(&c.id)
            .filter(|e| e.enabled && e.handle == c.handle)
            .map(|e| &e.component)
    }

    fn live_mut(&mut self, c: &ComponentRef) -> Option<&mut FakeComponent> {
        self.entries
            .get_mut(&c.id)
            .filter(|e| e.enabled && e.handle == c.handle)
            .map(|e| &mut e.component)
    }
}

impl ComponentRegistry for FakeRegistry {
    fn resolve(&self, id: &str) -> ControlResult<ComponentRef> {
        match self.entries.get(id) {
            Some(e) if e.enabled => Ok(ComponentRef {
                id: id.to_string(),
                handle: e.handle,
                kind: e.component.kind(),
            }),
            _ => Err(ControlError::NotFound { id: id.to_string() }),
        }
    }

    fn is_live(&self, component: &ComponentRef) -> bool {
        self.live(component).is_some()
    }

    fn thermometer(&self, component: &ComponentRef) -> Option<&dyn Thermometer> {
        match self.live(component)? {
            FakeComponent::Thermometer(t) => Some(t as &dyn Thermometer),
            FakeComponent::Threshold(t) => Some(t as &dyn Thermometer),
            _ => None,
        }
    }

    fn thermal_unit(&self, component: &ComponentRef) -> Option<&dyn ThermalUnit> {
        match self.live(component)? {
            FakeComponent::Unit(u) => Some(u as &dyn ThermalUnit),
            _ => None,
        }
    }

    fn thermal_unit_mut(&mut self, component: &ComponentRef) -> Option<&mut dyn ThermalUnit> {
        match self.live_mut(component)? {
            FakeComponent::Unit(u) => Some(u as &mut dyn ThermalUnit),
            _ => None,
        }
    }

    fn actuator(&self, component: &ComponentRef) -> Option<&dyn Actuator> {
        match self.live(component)? {
            FakeComponent::Actuator(a) => Some(a as &dyn Actuator),
            _ => None,
        }
    }

    fn actuator_mut(&mut self, component: &ComponentRef) -> Option<&mut dyn Actuator> {
        match self.live_mut(component)? {
            FakeComponent::Actuator(a) => Some(a as &mut dyn Actuator),
            _ => None,
        }
    }

    fn threshold_mut(&mut self, component: &ComponentRef) -> Option<&mut ThresholdThermometer> {
        match self.live_mut(component)? {
            FakeComponent::Threshold(t) => Some(t),
            _ => None,
        }
    }
}

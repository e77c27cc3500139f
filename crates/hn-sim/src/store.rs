//! Generation-checked arena of simulated devices.
//!
//! Every id owns one slot for the lifetime of the store. Replacing the
//! device in a slot or disabling it bumps the slot's generation, which is
//! what makes controllers' cached references go stale and re-resolve.

use std::collections::HashMap;

use hn_controls::{
    Actuator, ComponentKind, ComponentRef, ComponentRegistry, ControlError, ControlResult,
    ThermalUnit, Thermometer, ThresholdThermometer,
};
use hn_core::{DeciCelsius, Handle, Id};
use hn_project::ComponentDef;
use tracing::{debug, info};

use crate::devices::{SimThermalUnit, SimThermometer, SimValve};
use crate::error::{SimError, SimResult};

#[derive(Debug, Clone)]
pub enum Device {
    Thermometer(SimThermometer),
    ThermalUnit(SimThermalUnit),
    Valve(SimValve),
    Threshold(ThresholdThermometer),
}

impl Device {
    /// # Errors
    /// Invalid timer or threshold settings in `def`.
    pub fn from_def(def: &ComponentDef) -> SimResult<Self> {
        Ok(match def {
            ComponentDef::Thermometer { reading, .. } => {
                Device::Thermometer(SimThermometer::new(*reading))
            }
            ComponentDef::ThermalUnit(u) => Device::ThermalUnit(SimThermalUnit::new(u)?),
            ComponentDef::Actuator(a) => Device::Valve(SimValve::new(a)),
            ComponentDef::ThresholdThermometer(t) => {
                Device::Threshold(ThresholdThermometer::new(t.clone())?)
            }
        })
    }

    pub fn kind(&self) -> ComponentKind {
        match self {
            Device::Thermometer(_) => ComponentKind::Thermometer,
            Device::ThermalUnit(_) => ComponentKind::ThermalUnit,
            Device::Valve(_) => ComponentKind::Actuator,
            Device::Threshold(_) => ComponentKind::ThresholdThermometer,
        }
    }
}

#[derive(Debug, Clone)]
struct Slot {
    id: String,
    generation: u32,
    enabled: bool,
    device: Device,
}

#[derive(Debug, Clone, Default)]
pub struct ComponentStore {
    slots: Vec<Slot>,
    by_id: HashMap<String, Id>,
}

impl ComponentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// # Errors
    /// `DuplicateComponent` when `id` already has a slot.
    pub fn insert(&mut self, id: &str, device: Device) -> SimResult<Handle> {
        if self.by_id.contains_key(id) {
            return Err(SimError::DuplicateComponent { id: id.to_string() });
        }
        let index = u32::try_from(self.slots.len()).map_err(|_| SimError::InvalidArg {
            what: "too many components",
        })?;
        let slot = Id::from_index(index);
        self.slots.push(Slot {
            id: id.to_string(),
            generation: 0,
            enabled: true,
            device,
        });
        self.by_id.insert(id.to_string(), slot);
        Ok(Handle::new(slot, 0))
    }

    /// Swap in a new device under an existing id.
    ///
    /// # Errors
    /// `UnknownComponent` when `id` has no slot.
    pub fn replace(&mut self, id: &str, device: Device) -> SimResult<Handle> {
        let slot_id = self.slot_id(id)?;
        let slot = self.slot_mut(slot_id);
        slot.generation = slot.generation.wrapping_add(1);
        slot.device = device;
        info!(id, generation = slot.generation, "component replaced");
        Ok(Handle::new(slot_id, slot.generation))
    }

    /// Disabling hides the component from resolution and invalidates every
    /// handle to it. Enabling makes it resolvable again under the new
    /// generation.
    ///
    /// # Errors
    /// `UnknownComponent` when `id` has no slot.
    pub fn set_enabled(&mut self, id: &str, enabled: bool) -> SimResult<()> {
        let slot_id = self.slot_id(id)?;
        let slot = self.slot_mut(slot_id);
        if slot.enabled && !enabled {
            slot.generation = slot.generation.wrapping_add(1);
        }
        if slot.enabled != enabled {
            info!(id, enabled, "component availability changed");
        }
        slot.enabled = enabled;
        Ok(())
    }

    pub fn handle(&self, id: &str) -> Option<Handle> {
        let slot_id = *self.by_id.get(id)?;
        let slot = self.slots.get(slot_id.index() as usize)?;
        Some(Handle::new(slot_id, slot.generation))
    }

    pub fn is_enabled(&self, id: &str) -> bool {
        self.device_slot(id).is_some_and(|s| s.enabled)
    }

    /// The device under `id`, enabled or not.
    pub fn device(&self, id: &str) -> Option<&Device> {
        self.device_slot(id).map(|s| &s.device)
    }

    pub fn device_mut(&mut self, id: &str) -> Option<&mut Device> {
        let slot_id = *self.by_id.get(id)?;
        self.slots
            .get_mut(slot_id.index() as usize)
            .map(|s| &mut s.device)
    }

    /// Ids in insertion order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.slots.iter().map(|s| s.id.as_str())
    }

    pub fn devices_mut(&mut self) -> impl Iterator<Item = (&str, &mut Device)> {
        self.slots
            .iter_mut()
            .map(|s| (s.id.as_str(), &mut s.device))
    }

    /// Reading of an enabled thermometer-like device.
    pub fn reading(&self, id: &str) -> Option<DeciCelsius> {
        let slot = self.device_slot(id).filter(|s| s.enabled)?;
        match &slot.device {
            Device::Thermometer(t) => t.reading(),
            Device::Threshold(t) => t.reading(),
            _ => None,
        }
    }

    /// # Errors
    /// `UnknownComponent` or `WrongKind`.
    pub fn thermometer_mut(&mut self, id: &str) -> SimResult<&mut SimThermometer> {
        match self.device_mut(id) {
            Some(Device::Thermometer(t)) => Ok(t),
            Some(_) => Err(wrong_kind(id, "thermometer")),
            None => Err(SimError::UnknownComponent { id: id.to_string() }),
        }
    }

    /// # Errors
    /// `UnknownComponent` or `WrongKind`.
    pub fn unit_mut(&mut self, id: &str) -> SimResult<&mut SimThermalUnit> {
        match self.device_mut(id) {
            Some(Device::ThermalUnit(u)) => Ok(u),
            Some(_) => Err(wrong_kind(id, "thermal unit")),
            None => Err(SimError::UnknownComponent { id: id.to_string() }),
        }
    }

    /// # Errors
    /// `UnknownComponent` or `WrongKind`.
    pub fn valve_mut(&mut self, id: &str) -> SimResult<&mut SimValve> {
        match self.device_mut(id) {
            Some(Device::Valve(v)) => Ok(v),
            Some(_) => Err(wrong_kind(id, "actuator")),
            None => Err(SimError::UnknownComponent { id: id.to_string() }),
        }
    }

    pub fn unit(&self, id: &str) -> Option<&SimThermalUnit> {
        match self.device(id)? {
            Device::ThermalUnit(u) => Some(u),
            _ => None,
        }
    }

    pub fn valve(&self, id: &str) -> Option<&SimValve> {
        match self.device(id)? {
            Device::Valve(v) => Some(v),
            _ => None,
        }
    }

    pub fn threshold(&self, id: &str) -> Option<&ThresholdThermometer> {
        match self.device(id)? {
            Device::Threshold(t) => Some(t),
            _ => None,
        }
    }

    fn slot_id(&self, id: &str) -> SimResult<Id> {
        self.by_id
            .get(id)
            .copied()
            .ok_or_else(|| SimError::UnknownComponent { id: id.to_string() })
    }

    fn slot_mut(&mut self, slot_id: Id) -> &mut Slot {
        &mut self.slots[slot_id.index() as usize]
    }

    fn device_slot(&self, id: &str) -> Option<&Slot> {
        let slot_id = *self.by_id.get(id)?;
        self.slots.get(slot_id.index() as usize)
    }

    fn live(&self, c: &ComponentRef) -> Option<&Device> {
        let slot = self.slots.get(c.handle.slot.index() as usize)?;
        (slot.enabled && slot.generation == c.handle.generation && slot.id == c.id)
            .then_some(&slot.device)
    }

    fn live_mut(&mut self, c: &ComponentRef) -> Option<&mut Device> {
        let slot = self.slots.get_mut(c.handle.slot.index() as usize)?;
        (slot.enabled && slot.generation == c.handle.generation && slot.id == c.id)
            .then_some(&mut slot.device)
    }
}

fn wrong_kind(id: &str, expected: &'static str) -> SimError {
    SimError::WrongKind {
        id: id.to_string(),
        expected,
    }
}

impl ComponentRegistry for ComponentStore {
    fn resolve(&self, id: &str) -> ControlResult<ComponentRef> {
        let not_found = || ControlError::NotFound { id: id.to_string() };
        let slot_id = *self.by_id.get(id).ok_or_else(not_found)?;
        let slot = self
            .slots
            .get(slot_id.index() as usize)
            .filter(|s| s.enabled)
            .ok_or_else(not_found)?;
        debug!(id, generation = slot.generation, "resolved component");
        Ok(ComponentRef {
            id: id.to_string(),
            handle: Handle::new(slot_id, slot.generation),
            kind: slot.device.kind(),
        })
    }

    fn is_live(&self, component: &ComponentRef) -> bool {
        self.live(component).is_some()
    }

    fn thermometer(&self, component: &ComponentRef) -> Option<&dyn Thermometer> {
        match self.live(component)? {
            Device::Thermometer(t) => Some(t as &dyn Thermometer),
            Device::Threshold(t) => Some(t as &dyn Thermometer),
            _ => None,
        }
    }

    fn thermal_unit(&self, component: &ComponentRef) -> Option<&dyn ThermalUnit> {
        match self.live(component)? {
            Device::ThermalUnit(u) => Some(u as &dyn ThermalUnit),
            _ => None,
        }
    }

    fn thermal_unit_mut(&mut self, component: &ComponentRef) -> Option<&mut dyn ThermalUnit> {
        match self.live_mut(component)? {
            Device::ThermalUnit(u) => Some(u as &mut dyn ThermalUnit),
            _ => None,
        }
    }

    fn actuator(&self, component: &ComponentRef) -> Option<&dyn Actuator> {
        match self.live(component)? {
            Device::Valve(v) => Some(v as &dyn Actuator),
            _ => None,
        }
    }

    fn actuator_mut(&mut self, component: &ComponentRef) -> Option<&mut dyn Actuator> {
        match self.live_mut(component)? {
            Device::Valve(v) => Some(v as &mut dyn Actuator),
            _ => None,
        }
    }

    fn threshold_mut(&mut self, component: &ComponentRef) -> Option<&mut ThresholdThermometer> {
        match self.live_mut(component)? {
            Device::Threshold(t) => Some(t),
            _ => None,
        }
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Debug, Clone, Copy)]
    enum Op {
        Replace,
        Disable,
        Enable,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![Just(Op::Replace), Just(Op::Disable), Just(Op::Enable)]
    }

    proptest! {
        #[test]
        fn stale_references_never_come_back(ops in proptest::collection::vec(op(), 1..30)) {
            let mut s = ComponentStore::new();
            s.insert("T1", Device::Thermometer(SimThermometer::default())).unwrap();
            let mut held = vec![s.resolve("T1").unwrap()];
            for op in ops {
                match op {
                    Op::Replace => {
                        s.replace("T1", Device::Thermometer(SimThermometer::default())).unwrap();
                    }
                    Op::Disable => s.set_enabled("T1", false).unwrap(),
                    Op::Enable => s.set_enabled("T1", true).unwrap(),
                }
                let live: Vec<_> = held.iter().filter(|r| s.is_live(r)).collect();
                // at most the newest reference is live
                prop_assert!(live.len() <= 1);
                if let Some(r) = live.first() {
                    prop_assert_eq!(*r, held.last().unwrap());
                }
                match s.resolve("T1") {
                    Ok(fresh) => {
                        prop_assert!(s.is_enabled("T1"));
                        prop_assert!(s.is_live(&fresh));
                        if held.last() != Some(&fresh) {
                            held.push(fresh);
                        }
                    }
                    Err(_) => prop_assert!(!s.is_enabled("T1")),
                }
            }
        }
    }
}

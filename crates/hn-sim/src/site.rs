//! Site scheduler.
//!
//! Owns the component store and one instance of every configured
//! controller, and drives them through scheduling cycles in a fixed order:
//!
//! 1. scripted events due this cycle, then held operator inputs
//! 2. threshold thermometers follow their reference
//! 3. orchestrators, decentralized units, hydraulic controllers
//! 4. thermal units and valves settle
//! 5. unread mailbox values expire
//!
//! Enable and override inputs from events are held: a `true` is rewritten
//! into the mailbox every cycle until an event turns it off, the way a
//! field signal stays asserted. A `false` is delivered once.

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use hn_controls::{
    DecentralizedConfig, DecentralizedUnit, HandshakePhase, HydraulicConfig,
    HydraulicController, Mailbox, MultiUnitConfig, MultiUnitOrchestrator,
};
use hn_core::{CycleTick, DeciCelsius, Percent, SchedulerClock};
use hn_project::{ComponentDef, EventAction, ScriptedEvent, SiteDef, validate_site};
use tracing::{debug, info, info_span, warn};

use crate::error::{SimError, SimResult};
use crate::store::{ComponentStore, Device};

#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorStatus {
    pub id: String,
    /// A run request went out this cycle.
    pub heating_or_cooling: bool,
    pub error: bool,
    /// `(unit id, latch)` for every bound unit.
    pub units: Vec<(String, bool)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HydraulicStatus {
    pub id: String,
    pub running: bool,
    pub error: bool,
    pub commanded: Option<Percent>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecentralizedStatus {
    pub id: String,
    pub phase: HandshakePhase,
    pub need_heat: bool,
    pub need_more_heat: bool,
    pub error: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnitStatus {
    pub id: String,
    pub running: bool,
    pub power: Percent,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValveStatus {
    pub id: String,
    pub position: Percent,
}

/// What the site looked like at the end of one cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub cycle: u64,
    pub elapsed: Duration,
    pub orchestrators: Vec<OrchestratorStatus>,
    pub hydraulics: Vec<HydraulicStatus>,
    pub decentralized: Vec<DecentralizedStatus>,
    pub units: Vec<UnitStatus>,
    pub valves: Vec<ValveStatus>,
    /// Events that could not be applied this cycle.
    pub rejected_events: usize,
}

impl CycleReport {
    pub fn unit(&self, id: &str) -> Option<&UnitStatus> {
        self.units.iter().find(|u| u.id == id)
    }

    pub fn valve(&self, id: &str) -> Option<&ValveStatus> {
        self.valves.iter().find(|v| v.id == id)
    }

    pub fn orchestrator(&self, id: &str) -> Option<&OrchestratorStatus> {
        self.orchestrators.iter().find(|o| o.id == id)
    }

    pub fn hydraulic(&self, id: &str) -> Option<&HydraulicStatus> {
        self.hydraulics.iter().find(|h| h.id == id)
    }

    pub fn decentralized(&self, id: &str) -> Option<&DecentralizedStatus> {
        self.decentralized.iter().find(|d| d.id == id)
    }
}

fn flag(on: bool, text: &str) -> &str {
    if on { text } else { "" }
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cycle {:>4}", self.cycle)?;
        for o in &self.orchestrators {
            let on: Vec<&str> = o
                .units
                .iter()
                .filter(|(_, active)| *active)
                .map(|(id, _)| id.as_str())
                .collect();
            write!(f, " | {} [{}]{}", o.id, on.join(","), flag(o.error, " ERR"))?;
        }
        for d in &self.decentralized {
            write!(f, " | {} {:?}{}", d.id, d.phase, flag(d.need_more_heat, " +heat"))?;
            write!(f, "{}", flag(d.error, " ERR"))?;
        }
        for h in &self.hydraulics {
            match h.commanded {
                Some(p) => write!(f, " | {} {}", h.id, p)?,
                None => write!(f, " | {} -", h.id)?,
            }
            write!(f, "{}", flag(h.error, " ERR"))?;
        }
        for u in self.units.iter().filter(|u| u.running) {
            write!(f, " | {} on {}", u.id, u.power)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
struct HeldInputs {
    enables: BTreeSet<String>,
    overrides: BTreeSet<String>,
}

#[derive(Debug, Clone)]
pub struct Site {
    name: String,
    clock: SchedulerClock,
    store: ComponentStore,
    orchestrators: Vec<MultiUnitOrchestrator>,
    decentralized: Vec<DecentralizedUnit>,
    hydraulics: Vec<HydraulicController>,
    events: Vec<ScriptedEvent>,
    next_event: usize,
    held: HeldInputs,
}

impl Site {
    pub fn new(name: impl Into<String>, clock: SchedulerClock) -> Self {
        Self {
            name: name.into(),
            clock,
            store: ComponentStore::new(),
            orchestrators: Vec::new(),
            decentralized: Vec::new(),
            hydraulics: Vec::new(),
            events: Vec::new(),
            next_event: 0,
            held: HeldInputs::default(),
        }
    }

    /// Build a site on a simulated clock ticking at the site's cycle period.
    ///
    /// # Errors
    /// Validation failures, or device/controller settings that don't build.
    pub fn from_def(def: &SiteDef) -> SimResult<Self> {
        let clock = SchedulerClock::simulated(Duration::from_millis(def.cycle_period_ms));
        Self::from_def_with_clock(def, clock)
    }

    /// # Errors
    /// As [`from_def`](Self::from_def).
    pub fn from_def_with_clock(def: &SiteDef, clock: SchedulerClock) -> SimResult<Self> {
        validate_site(def)?;
        let mut site = Site::new(def.name.clone(), clock);
        for c in &def.components {
            site.add_component(c)?;
        }
        for o in &def.orchestrators {
            site.add_orchestrator(o.clone())?;
        }
        for d in &def.decentralized {
            site.add_decentralized(d.clone())?;
        }
        for h in &def.hydraulics {
            site.add_hydraulic(h.clone())?;
        }
        for e in &def.events {
            site.schedule(e.clone());
        }
        info!(
            site = %site.name,
            components = site.store.len(),
            controllers = site.orchestrators.len() + site.decentralized.len() + site.hydraulics.len(),
            "site loaded"
        );
        Ok(site)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cycles_run(&self) -> u64 {
        self.clock.cycles_run()
    }

    pub fn store(&self) -> &ComponentStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut ComponentStore {
        &mut self.store
    }

    /// # Errors
    /// `DuplicateComponent`, or device settings that don't build.
    pub fn add_component(&mut self, def: &ComponentDef) -> SimResult<()> {
        let device = Device::from_def(def)?;
        self.store.insert(def.id(), device)?;
        Ok(())
    }

    /// # Errors
    /// `DuplicateController`.
    pub fn add_orchestrator(&mut self, config: MultiUnitConfig) -> SimResult<()> {
        self.ensure_new_controller(&config.id)?;
        self.orchestrators.push(MultiUnitOrchestrator::new(config));
        Ok(())
    }

    /// # Errors
    /// `DuplicateController`, or an invalid timer or override setting.
    pub fn add_decentralized(&mut self, config: DecentralizedConfig) -> SimResult<()> {
        self.ensure_new_controller(&config.id)?;
        self.decentralized.push(DecentralizedUnit::new(config)?);
        Ok(())
    }

    /// # Errors
    /// `DuplicateController`.
    pub fn add_hydraulic(&mut self, config: HydraulicConfig) -> SimResult<()> {
        self.ensure_new_controller(&config.id)?;
        self.hydraulics.push(HydraulicController::new(config));
        Ok(())
    }

    /// Queue an event. Events for a cycle that has already run are applied
    /// at the start of the next one.
    pub fn schedule(&mut self, event: ScriptedEvent) {
        let pending = &self.events[self.next_event..];
        let at = pending.partition_point(|e| e.cycle <= event.cycle);
        self.events.insert(self.next_event + at, event);
    }

    pub fn orchestrator(&self, id: &str) -> Option<&MultiUnitOrchestrator> {
        self.orchestrators.iter().find(|o| o.id() == id)
    }

    pub fn decentralized(&self, id: &str) -> Option<&DecentralizedUnit> {
        self.decentralized.iter().find(|d| d.id() == id)
    }

    pub fn hydraulic(&self, id: &str) -> Option<&HydraulicController> {
        self.hydraulics.iter().find(|h| h.id() == id)
    }

    /// # Errors
    /// `UnknownController`.
    pub fn decentralized_mut(&mut self, id: &str) -> SimResult<&mut DecentralizedUnit> {
        self.decentralized
            .iter_mut()
            .find(|d| d.id() == id)
            .ok_or_else(|| SimError::UnknownController { id: id.to_string() })
    }

    /// # Errors
    /// `UnknownController`.
    pub fn hydraulic_mut(&mut self, id: &str) -> SimResult<&mut HydraulicController> {
        self.hydraulics
            .iter_mut()
            .find(|h| h.id() == id)
            .ok_or_else(|| SimError::UnknownController { id: id.to_string() })
    }

    /// Apply one action immediately.
    ///
    /// # Errors
    /// Unknown targets, targets of the wrong kind, rejected values.
    pub fn apply(&mut self, action: &EventAction) -> SimResult<()> {
        match action {
            EventAction::SetReading { sensor, value } => {
                self.store.thermometer_mut(sensor)?.set_reading(*value);
            }
            EventAction::Disable { component } => self.store.set_enabled(component, false)?,
            EventAction::Enable { component } => self.store.set_enabled(component, true)?,
            EventAction::Replace { component } => {
                let device = Device::from_def(component)?;
                self.store.replace(component.id(), device)?;
            }
            EventAction::SetBlocked { unit, blocked } => {
                self.store.unit_mut(unit)?.set_blocked(*blocked);
            }
            EventAction::RejectWrites { component, reject } => {
                match self.store.device_mut(component) {
                    Some(Device::ThermalUnit(u)) => u.set_reject_writes(*reject),
                    Some(Device::Valve(v)) => v.set_reject_writes(*reject),
                    Some(_) => {
                        return Err(SimError::WrongKind {
                            id: component.clone(),
                            expected: "thermal unit or actuator",
                        });
                    }
                    None => {
                        return Err(SimError::UnknownComponent {
                            id: component.clone(),
                        });
                    }
                }
            }
            EventAction::EnableController { controller, value } => {
                self.enable_mailbox(controller)?.write(*value);
                if *value {
                    self.held.enables.insert(controller.clone());
                } else {
                    self.held.enables.remove(controller);
                }
            }
            EventAction::GrantHeat { unit, value } => {
                self.decentralized_mut(unit)?
                    .need_heat_enable_signal()
                    .write(*value);
            }
            EventAction::AcknowledgeMoreHeat { unit, value } => {
                self.decentralized_mut(unit)?
                    .need_more_heat_enable_signal()
                    .write(*value);
            }
            EventAction::ForceOpen { controller } => {
                self.hydraulic_mut(controller)?.force_open_signal().write(true);
            }
            EventAction::ForceClose { controller } => {
                self.hydraulic_mut(controller)?.force_close_signal().write(true);
            }
            EventAction::RequestPosition {
                controller,
                position,
            } => {
                self.hydraulic_mut(controller)?
                    .position_request_signal()
                    .write(*position);
            }
            EventAction::UpsertBreakpoint {
                controller,
                temperature,
                position,
            } => {
                self.hydraulic_mut(controller)?
                    .upsert_breakpoint(*temperature, *position);
            }
            EventAction::Override { target, enable } => {
                self.override_mailbox(target)?.write(*enable);
                if *enable {
                    self.held.overrides.insert(target.clone());
                } else {
                    self.held.overrides.remove(target);
                }
            }
            EventAction::OverrideValue { target, value } => {
                match self.decentralized.iter_mut().find(|d| d.id() == target) {
                    Some(d) => d.set_override_value(*value)?,
                    None => self.store.unit_mut(target)?.set_override_value(*value)?,
                }
            }
        }
        Ok(())
    }

    /// Run one scheduling cycle.
    pub fn run_cycle(&mut self) -> CycleReport {
        let now = self.clock.next_tick();
        let span = info_span!("cycle", cycle = now.cycle);
        let _enter = span.enter();

        let rejected_events = self.apply_due_events(now.cycle);
        self.write_held_inputs();
        self.update_thresholds();

        for o in &mut self.orchestrators {
            o.run_cycle(now, &mut self.store);
        }
        for d in &mut self.decentralized {
            d.run_cycle(now, &mut self.store);
        }
        for h in &mut self.hydraulics {
            h.run_cycle(now, &mut self.store);
        }

        for (_, device) in self.store.devices_mut() {
            match device {
                Device::ThermalUnit(u) => u.evaluate(now),
                Device::Valve(v) => v.advance(),
                Device::Thermometer(_) | Device::Threshold(_) => {}
            }
        }
        for d in &mut self.decentralized {
            d.expire_mailboxes();
        }
        for h in &mut self.hydraulics {
            h.expire_mailboxes();
        }

        self.report(now, rejected_events)
    }

    /// Run `cycles` cycles and collect their reports.
    pub fn run(&mut self, cycles: u64) -> Vec<CycleReport> {
        (0..cycles).map(|_| self.run_cycle()).collect()
    }

    fn ensure_new_controller(&self, id: &str) -> SimResult<()> {
        let taken = self.orchestrator(id).is_some()
            || self.decentralized(id).is_some()
            || self.hydraulic(id).is_some();
        if taken {
            Err(SimError::DuplicateController { id: id.to_string() })
        } else {
            Ok(())
        }
    }

    fn enable_mailbox(&mut self, id: &str) -> SimResult<&mut Mailbox<bool>> {
        if let Some(h) = self.hydraulics.iter_mut().find(|h| h.id() == id) {
            return Ok(h.enable_signal());
        }
        self.decentralized
            .iter_mut()
            .find(|d| d.id() == id)
            .map(DecentralizedUnit::enable_signal)
            .ok_or_else(|| SimError::UnknownController { id: id.to_string() })
    }

    fn override_mailbox(&mut self, id: &str) -> SimResult<&mut Mailbox<bool>> {
        if let Some(d) = self.decentralized.iter_mut().find(|d| d.id() == id) {
            return Ok(d.override_enable_signal());
        }
        Ok(self.store.unit_mut(id)?.override_enable_signal())
    }

    fn apply_due_events(&mut self, cycle: u64) -> usize {
        let mut rejected = 0;
        while let Some(event) = self.events.get(self.next_event)
            && event.cycle <= cycle
        {
            let action = event.action.clone();
            self.next_event += 1;
            match self.apply(&action) {
                Ok(()) => debug!(?action, "event applied"),
                Err(err) => {
                    warn!(?action, %err, "event rejected");
                    rejected += 1;
                }
            }
        }
        rejected
    }

    fn write_held_inputs(&mut self) {
        let enables: Vec<String> = self.held.enables.iter().cloned().collect();
        for id in enables {
            if let Ok(mailbox) = self.enable_mailbox(&id) {
                mailbox.write(true);
            }
        }
        let overrides: Vec<String> = self.held.overrides.iter().cloned().collect();
        for id in overrides {
            if let Ok(mailbox) = self.override_mailbox(&id) {
                mailbox.write(true);
            }
        }
    }

    fn update_thresholds(&mut self) {
        let updates: Vec<(String, Option<DeciCelsius>)> = self
            .store
            .ids()
            .filter_map(|id| {
                let tt = self.store.threshold(id)?;
                Some((id.to_string(), self.store.reading(tt.reference_id())))
            })
            .collect();
        for (id, reading) in updates {
            if let Some(Device::Threshold(tt)) = self.store.device_mut(&id) {
                tt.update(reading);
            }
        }
    }

    fn report(&self, now: CycleTick, rejected_events: usize) -> CycleReport {
        let orchestrators = self
            .orchestrators
            .iter()
            .map(|o| OrchestratorStatus {
                id: o.id().to_string(),
                heating_or_cooling: o.is_heating_or_cooling(),
                error: o.has_error(),
                units: o
                    .units()
                    .map(|set| {
                        set.bindings()
                            .iter()
                            .map(|b| (b.unit().id.clone(), b.is_active()))
                            .collect()
                    })
                    .unwrap_or_default(),
            })
            .collect();
        let hydraulics = self
            .hydraulics
            .iter()
            .map(|h| HydraulicStatus {
                id: h.id().to_string(),
                running: h.is_running(),
                error: h.has_error(),
                commanded: h.commanded_position(),
            })
            .collect();
        let decentralized = self
            .decentralized
            .iter()
            .map(|d| DecentralizedStatus {
                id: d.id().to_string(),
                phase: d.phase(),
                need_heat: d.need_heat(),
                need_more_heat: d.need_more_heat(),
                error: d.has_error(),
            })
            .collect();
        let mut units = Vec::new();
        let mut valves = Vec::new();
        for id in self.store.ids() {
            match self.store.device(id) {
                Some(Device::ThermalUnit(u)) => units.push(UnitStatus {
                    id: id.to_string(),
                    running: u.is_running(),
                    power: u.power(),
                }),
                Some(Device::Valve(v)) => valves.push(ValveStatus {
                    id: id.to_string(),
                    position: v.position(),
                }),
                _ => {}
            }
        }
        CycleReport {
            cycle: now.cycle,
            elapsed: now.elapsed,
            orchestrators,
            hydraulics,
            decentralized,
            units,
            valves,
            rejected_events,
        }
    }
}

//! Multi-unit orchestrator.
//!
//! Binds N thermal units to their own hysteresis and latch. Configuration
//! is atomic: either every unit binds or none does, and a failed
//! configuration is retried on the next cycle. Each cycle every latch is
//! evaluated and active units get their run request, optionally rate-limited
//! by one shared write-interval timer.

use std::collections::HashSet;

use hn_core::CycleTick;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::component::{
    Capability, ComponentKind, ComponentRef, ComponentRegistry, refresh, resolve_kind,
};
use crate::error::{ConfigError, ConfigResult};
use crate::hysteresis::{ActiveLatch, BoundSetpoint, Direction, Setpoint, ThresholdHysteresis};
use crate::timer::{TimerKey, TimerMode, TimerRegistry, TimerSpec};

const WRITE_INTERVAL_TIMER: &str = "write_interval";

fn default_direction() -> Direction {
    Direction::Heating
}

/// Parallel per-unit arrays, as they come from site configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiUnitConfig {
    pub id: String,
    #[serde(default = "default_direction")]
    pub direction: Direction,
    pub unit_ids: Vec<String>,
    pub activation_sensors: Vec<String>,
    pub activation_setpoints: Vec<Setpoint>,
    pub deactivation_sensors: Vec<String>,
    pub deactivation_setpoints: Vec<Setpoint>,
    /// Minimum spacing between run requests while units stay active.
    #[serde(default)]
    pub write_interval: Option<TimerSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitBinding {
    unit: ComponentRef,
    hysteresis: ThresholdHysteresis,
    latch: ActiveLatch,
}

impl UnitBinding {
    pub fn unit(&self) -> &ComponentRef {
        &self.unit
    }

    pub fn hysteresis(&self) -> &ThresholdHysteresis {
        &self.hysteresis
    }

    pub fn is_active(&self) -> bool {
        self.latch.is_active()
    }
}

/// Result of a successful configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundUnitSet {
    bindings: Vec<UnitBinding>,
    write_interval: Option<(TimerMode, u64)>,
}

impl BoundUnitSet {
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn bindings(&self) -> &[UnitBinding] {
        &self.bindings
    }
}

fn check_len(field: &'static str, expected: usize, found: usize) -> ConfigResult<()> {
    if expected != found {
        return Err(ConfigError::LengthMismatch {
            field,
            expected,
            found,
        });
    }
    Ok(())
}

/// Validate and bind every unit of `config`.
///
/// # Errors
/// The first violation found; nothing is bound in that case.
pub fn configure(
    config: &MultiUnitConfig,
    registry: &dyn ComponentRegistry,
) -> ConfigResult<BoundUnitSet> {
    let n = config.unit_ids.len();
    check_len("activation_sensors", n, config.activation_sensors.len())?;
    check_len("activation_setpoints", n, config.activation_setpoints.len())?;
    check_len("deactivation_sensors", n, config.deactivation_sensors.len())?;
    check_len(
        "deactivation_setpoints",
        n,
        config.deactivation_setpoints.len(),
    )?;

    let mut seen = HashSet::new();
    for id in &config.unit_ids {
        if !seen.insert(id.as_str()) {
            return Err(ConfigError::DuplicateId {
                id: id.clone(),
                context: "unit_ids",
            });
        }
    }

    let activation: HashSet<&str> = config.activation_sensors.iter().map(String::as_str).collect();
    if let Some(id) = config
        .deactivation_sensors
        .iter()
        .find(|id| activation.contains(id.as_str()))
    {
        return Err(ConfigError::SensorOverlap { id: id.clone() });
    }

    let write_interval = config
        .write_interval
        .as_ref()
        .map(|spec| spec.parse_mode().map(|mode| (mode, spec.duration)))
        .transpose()?;

    let required = config.direction.required_capability();
    let mut bindings = Vec::with_capacity(n);
    for i in 0..n {
        let unit = resolve_kind(registry, &config.unit_ids[i], ComponentKind::ThermalUnit)?;
        let capability = registry
            .thermal_unit(&unit)
            .map(|u| u.capability())
            .ok_or_else(|| ConfigError::NotFound {
                id: unit.id.clone(),
            })?;
        if capability != required {
            return Err(ConfigError::WrongCapability {
                id: unit.id,
                expected: match required {
                    Capability::HeatSource => "heat",
                    Capability::ColdSource => "cooling",
                },
            });
        }

        let hysteresis = ThresholdHysteresis::new(
            config.direction,
            resolve_kind(
                registry,
                &config.activation_sensors[i],
                ComponentKind::Thermometer,
            )?,
            BoundSetpoint::bind(registry, &config.activation_setpoints[i])?,
            resolve_kind(
                registry,
                &config.deactivation_sensors[i],
                ComponentKind::Thermometer,
            )?,
            BoundSetpoint::bind(registry, &config.deactivation_setpoints[i])?,
        )?;
        bindings.push(UnitBinding {
            unit,
            hysteresis,
            latch: ActiveLatch::default(),
        });
    }

    Ok(BoundUnitSet {
        bindings,
        write_interval,
    })
}

#[derive(Debug, Clone)]
pub struct MultiUnitOrchestrator {
    config: MultiUnitConfig,
    timers: TimerRegistry,
    write_timer: Option<TimerKey>,
    units: Option<BoundUnitSet>,
    heating_or_cooling: bool,
    error: bool,
    last_config_error: Option<ConfigError>,
}

impl MultiUnitOrchestrator {
    /// Configuration happens on the first cycle, not here, so a site may
    /// create controllers before all components exist.
    pub fn new(config: MultiUnitConfig) -> Self {
        Self {
            timers: TimerRegistry::new(config.id.clone()),
            config,
            write_timer: None,
            units: None,
            heating_or_cooling: false,
            error: false,
            last_config_error: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn config(&self) -> &MultiUnitConfig {
        &self.config
    }

    /// Replace the configuration. All bindings and timers are dropped and
    /// rebuilt on the next cycle.
    pub fn reconfigure(&mut self, config: MultiUnitConfig) {
        self.config = config;
        self.units = None;
        self.timers.clear();
        self.write_timer = None;
    }

    pub fn is_configured(&self) -> bool {
        self.units.is_some()
    }

    pub fn units(&self) -> Option<&BoundUnitSet> {
        self.units.as_ref()
    }

    pub fn last_config_error(&self) -> Option<&ConfigError> {
        self.last_config_error.as_ref()
    }

    /// A run request went out this cycle.
    pub fn is_heating_or_cooling(&self) -> bool {
        self.heating_or_cooling
    }

    pub fn has_error(&self) -> bool {
        self.error
    }

    pub fn is_unit_active(&self, unit_id: &str) -> Option<bool> {
        self.units
            .as_ref()?
            .bindings
            .iter()
            .find(|b| b.unit.id == unit_id)
            .map(|b| b.latch.is_active())
    }

    fn try_configure(&mut self, registry: &dyn ComponentRegistry) -> bool {
        match configure(&self.config, registry) {
            Ok(set) => {
                self.timers.clear();
                self.write_timer = set
                    .write_interval
                    .map(|(mode, duration)| {
                        self.timers
                            .add_identifier(WRITE_INTERVAL_TIMER, mode, duration)
                    });
                self.timers.reset_all();
                info!(id = %self.config.id, units = set.len(), "orchestrator configured");
                self.units = Some(set);
                self.last_config_error = None;
                true
            }
            Err(err) => {
                if self.last_config_error.as_ref() != Some(&err) {
                    warn!(id = %self.config.id, %err, "orchestrator configuration failed");
                }
                self.last_config_error = Some(err);
                false
            }
        }
    }

    /// One scheduling cycle. Never fails; problems surface through
    /// [`has_error`](Self::has_error) and the log.
    pub fn run_cycle(&mut self, now: CycleTick, registry: &mut dyn ComponentRegistry) {
        self.timers.tick(now);
        if self.units.is_none() && !self.try_configure(&*registry) {
            self.error = true;
            self.heating_or_cooling = false;
            return;
        }

        let write_window = match self.write_timer {
            None => true,
            Some(key) => self.timers.is_expired(key),
        };

        let mut error = false;
        let mut any_active = false;
        let mut wrote = false;
        let Some(set) = self.units.as_mut() else {
            return;
        };

        for binding in &mut set.bindings {
            if !binding.hysteresis.refresh(&*registry) {
                error = true;
            }
            let unit_live = refresh(&*registry, &mut binding.unit);
            match registry.thermal_unit(&binding.unit) {
                Some(unit) if unit.is_blocked() => error = true,
                Some(_) => {}
                None => error = true,
            }

            let evaluation = binding.hysteresis.evaluate(&*registry, &mut binding.latch);
            if evaluation.missing_input {
                error = true;
            }
            if !evaluation.active {
                continue;
            }
            any_active = true;
            if !write_window || !unit_live {
                continue;
            }
            match registry.thermal_unit_mut(&binding.unit) {
                Some(unit) => match unit.request_run() {
                    Ok(()) => wrote = true,
                    Err(err) => {
                        warn!(id = %self.config.id, unit = %binding.unit.id, %err, "couldn't request run");
                        error = true;
                    }
                },
                None => error = true,
            }
        }

        // the interval only starts counting once some unit wants to run
        if let Some(key) = self.write_timer
            && (wrote || !any_active)
        {
            self.timers.reset(key);
        }

        if wrote != self.heating_or_cooling {
            debug!(id = %self.config.id, writing = wrote, "orchestrator output changed");
        }
        self.heating_or_cooling = wrote;
        self.error = error;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::FakeRegistry;
    use hn_core::DeciCelsius;
    use std::time::Duration;

    fn at(cycle: u64) -> CycleTick {
        CycleTick::new(cycle, Duration::from_secs(cycle))
    }

    fn two_heaters() -> (FakeRegistry, MultiUnitConfig) {
        let mut reg = FakeRegistry::default();
        for id in ["H1", "H2"] {
            reg.add_heater(id);
        }
        for id in ["A1", "A2", "D1", "D2"] {
            reg.add_thermometer(id, Some(DeciCelsius(700)));
        }
        let config = MultiUnitConfig {
            id: "multi0".to_string(),
            direction: Direction::Heating,
            unit_ids: vec!["H1".into(), "H2".into()],
            activation_sensors: vec!["A1".into(), "A2".into()],
            activation_setpoints: vec![600.into(), 600.into()],
            deactivation_sensors: vec!["D1".into(), "D2".into()],
            deactivation_setpoints: vec![800.into(), 800.into()],
            write_interval: None,
        };
        (reg, config)
    }

    #[test]
    fn length_mismatch_binds_nothing() {
        let (reg, mut config) = two_heaters();
        config.deactivation_setpoints.pop();
        assert_eq!(
            configure(&config, &reg),
            Err(ConfigError::LengthMismatch {
                field: "deactivation_setpoints",
                expected: 2,
                found: 1
            })
        );
    }

    #[test]
    fn duplicate_unit_is_rejected() {
        let (reg, mut config) = two_heaters();
        config.unit_ids[1] = "H1".to_string();
        assert!(matches!(
            configure(&config, &reg),
            Err(ConfigError::DuplicateId { .. })
        ));
    }

    #[test]
    fn overlap_is_a_real_set_intersection() {
        let (mut reg, mut config) = two_heaters();
        // "A1" is a prefix of "A10" but not the same sensor
        reg.add_thermometer("A10", Some(DeciCelsius(700)));
        config.deactivation_sensors[0] = "A10".to_string();
        assert!(configure(&config, &reg).is_ok());

        config.deactivation_sensors[0] = "A2".to_string();
        assert_eq!(
            configure(&config, &reg),
            Err(ConfigError::SensorOverlap {
                id: "A2".to_string()
            })
        );
    }

    #[test]
    fn wrong_capability_and_kind_are_rejected() {
        let (mut reg, mut config) = two_heaters();
        reg.add_chiller("C1");
        config.unit_ids[1] = "C1".to_string();
        assert!(matches!(
            configure(&config, &reg),
            Err(ConfigError::WrongCapability { .. })
        ));
        config.unit_ids[1] = "A1".to_string();
        assert!(matches!(
            configure(&config, &reg),
            Err(ConfigError::WrongKind { .. })
        ));
    }

    #[test]
    fn unknown_timer_mode_is_rejected() {
        let (reg, mut config) = two_heaters();
        config.write_interval = Some(TimerSpec {
            mode: "TimerBySundial".to_string(),
            duration: 3,
        });
        assert!(matches!(
            configure(&config, &reg),
            Err(ConfigError::UnknownTimerMode { .. })
        ));
    }

    #[test]
    fn failed_configuration_is_retried_next_cycle() {
        let (mut reg, mut config) = two_heaters();
        config.unit_ids[1] = "H3".to_string();
        let mut orch = MultiUnitOrchestrator::new(config);
        orch.run_cycle(at(0), &mut reg);
        assert!(!orch.is_configured());
        assert!(orch.has_error());
        assert_eq!(
            orch.last_config_error(),
            Some(&ConfigError::NotFound {
                id: "H3".to_string()
            })
        );

        reg.add_heater("H3");
        orch.run_cycle(at(1), &mut reg);
        assert!(orch.is_configured());
        assert_eq!(orch.units().map(BoundUnitSet::len), Some(2));
        assert!(!orch.has_error());
    }

    #[test]
    fn heater_switches_on_and_off_with_deactivation_priority() {
        let (mut reg, config) = two_heaters();
        let mut orch = MultiUnitOrchestrator::new(config);
        reg.set_reading("A1", Some(DeciCelsius(400)));
        orch.run_cycle(at(0), &mut reg);
        assert_eq!(orch.is_unit_active("H1"), Some(true));
        assert_eq!(orch.is_unit_active("H2"), Some(false));
        assert!(orch.is_heating_or_cooling());
        assert_eq!(reg.unit("H1").run_requests, 1);

        reg.set_reading("D1", Some(DeciCelsius(850)));
        orch.run_cycle(at(1), &mut reg);
        assert_eq!(orch.is_unit_active("H1"), Some(false));
        assert!(!orch.is_heating_or_cooling());
        assert_eq!(reg.unit("H1").run_requests, 1);
    }

    #[test]
    fn active_unit_is_requested_every_cycle_without_interval() {
        let (mut reg, config) = two_heaters();
        let mut orch = MultiUnitOrchestrator::new(config);
        reg.set_reading("A2", Some(DeciCelsius(500)));
        for c in 0..4 {
            orch.run_cycle(at(c), &mut reg);
        }
        assert_eq!(reg.unit("H2").run_requests, 4);
    }

    #[test]
    fn write_interval_spaces_requests() {
        let (mut reg, mut config) = two_heaters();
        config.write_interval = Some(TimerSpec::cycles(3));
        let mut orch = MultiUnitOrchestrator::new(config);
        reg.set_reading("A1", Some(DeciCelsius(500)));
        reg.set_reading("A2", Some(DeciCelsius(500)));
        for c in 0..7 {
            orch.run_cycle(at(c), &mut reg);
        }
        // the interval counts from configuration: writes at cycles 3 and 6,
        // both units share the window
        assert_eq!(reg.unit("H1").run_requests, 2);
        assert_eq!(reg.unit("H2").run_requests, 2);
    }

    #[test]
    fn first_activation_after_idle_waits_for_the_interval() {
        let mut reg = FakeRegistry::default();
        reg.add_heater("H1");
        reg.add_thermometer("A1", Some(DeciCelsius(700)));
        reg.add_thermometer("D1", Some(DeciCelsius(700)));
        let config = MultiUnitConfig {
            id: "single".to_string(),
            direction: Direction::Heating,
            unit_ids: vec!["H1".into()],
            activation_sensors: vec!["A1".into()],
            activation_setpoints: vec![600.into()],
            deactivation_sensors: vec!["D1".into()],
            deactivation_setpoints: vec![800.into()],
            write_interval: Some(TimerSpec::cycles(3)),
        };
        let mut orch = MultiUnitOrchestrator::new(config);
        for c in 0..5 {
            orch.run_cycle(at(c), &mut reg);
        }
        assert_eq!(reg.unit("H1").run_requests, 0);

        reg.set_reading("A1", Some(DeciCelsius(500)));
        for c in 5..7 {
            orch.run_cycle(at(c), &mut reg);
            assert_eq!(orch.is_unit_active("H1"), Some(true));
            assert!(!orch.is_heating_or_cooling(), "cycle {c}");
            assert_eq!(reg.unit("H1").run_requests, 0, "cycle {c}");
        }
        orch.run_cycle(at(7), &mut reg);
        assert!(orch.is_heating_or_cooling());
        assert_eq!(reg.unit("H1").run_requests, 1);

        // window closes again after the write
        orch.run_cycle(at(8), &mut reg);
        assert!(!orch.is_heating_or_cooling());
        assert_eq!(reg.unit("H1").run_requests, 1);
    }

    #[test]
    fn latched_but_rejected_unit_is_not_heating() {
        let mut reg = FakeRegistry::default();
        reg.add_heater("H1");
        reg.add_thermometer("A1", Some(DeciCelsius(500)));
        reg.add_thermometer("D1", Some(DeciCelsius(700)));
        reg.unit_mut("H1").reject = true;
        let config = MultiUnitConfig {
            id: "single".to_string(),
            direction: Direction::Heating,
            unit_ids: vec!["H1".into()],
            activation_sensors: vec!["A1".into()],
            activation_setpoints: vec![600.into()],
            deactivation_sensors: vec!["D1".into()],
            deactivation_setpoints: vec![800.into()],
            write_interval: None,
        };
        let mut orch = MultiUnitOrchestrator::new(config);
        orch.run_cycle(at(0), &mut reg);
        assert_eq!(orch.is_unit_active("H1"), Some(true));
        assert!(!orch.is_heating_or_cooling());
        assert!(orch.has_error());
    }

    #[test]
    fn write_failure_sets_error_flag_only() {
        let (mut reg, config) = two_heaters();
        reg.unit_mut("H1").reject = true;
        reg.set_reading("A1", Some(DeciCelsius(500)));
        reg.set_reading("A2", Some(DeciCelsius(500)));
        let mut orch = MultiUnitOrchestrator::new(config);
        orch.run_cycle(at(0), &mut reg);
        assert!(orch.has_error());
        assert_eq!(orch.is_unit_active("H1"), Some(true));
        assert_eq!(reg.unit("H2").run_requests, 1);
    }

    #[test]
    fn blocked_unit_raises_error() {
        let (mut reg, config) = two_heaters();
        reg.unit_mut("H2").blocked = true;
        let mut orch = MultiUnitOrchestrator::new(config);
        orch.run_cycle(at(0), &mut reg);
        assert!(orch.has_error());
        reg.unit_mut("H2").blocked = false;
        orch.run_cycle(at(1), &mut reg);
        assert!(!orch.has_error());
    }

    #[test]
    fn replaced_sensor_is_rebound_and_latch_kept() {
        let (mut reg, config) = two_heaters();
        let mut orch = MultiUnitOrchestrator::new(config);
        reg.set_reading("A1", Some(DeciCelsius(500)));
        orch.run_cycle(at(0), &mut reg);
        assert_eq!(orch.is_unit_active("H1"), Some(true));

        reg.replace_thermometer("A1", Some(DeciCelsius(700)));
        orch.run_cycle(at(1), &mut reg);
        assert_eq!(orch.is_unit_active("H1"), Some(true));
        assert!(!orch.has_error());
        let bound = &orch.units().unwrap().bindings()[0];
        assert_eq!(bound.hysteresis().activation_sensor().handle.generation, 1);
    }

    #[test]
    fn disabled_unit_is_reported_until_it_returns() {
        let (mut reg, config) = two_heaters();
        let mut orch = MultiUnitOrchestrator::new(config);
        reg.set_reading("A1", Some(DeciCelsius(500)));
        orch.run_cycle(at(0), &mut reg);

        reg.set_enabled("H1", false);
        orch.run_cycle(at(1), &mut reg);
        assert!(orch.has_error());
        assert_eq!(reg.unit("H1").run_requests, 1);

        reg.set_enabled("H1", true);
        orch.run_cycle(at(2), &mut reg);
        assert!(!orch.has_error());
        assert_eq!(reg.unit("H1").run_requests, 2);
    }

    #[test]
    fn reconfigure_drops_bindings() {
        let (mut reg, config) = two_heaters();
        let mut orch = MultiUnitOrchestrator::new(config.clone());
        orch.run_cycle(at(0), &mut reg);
        assert!(orch.is_configured());
        orch.reconfigure(config);
        assert!(!orch.is_configured());
        orch.run_cycle(at(1), &mut reg);
        assert!(orch.is_configured());
    }

    #[test]
    fn cooling_orchestrator_drives_chillers() {
        let mut reg = FakeRegistry::default();
        reg.add_chiller("C1");
        reg.add_thermometer("A", Some(DeciCelsius(260)));
        reg.add_thermometer("D", Some(DeciCelsius(220)));
        let config = MultiUnitConfig {
            id: "cool".to_string(),
            direction: Direction::Cooling,
            unit_ids: vec!["C1".into()],
            activation_sensors: vec!["A".into()],
            activation_setpoints: vec![250.into()],
            deactivation_sensors: vec!["D".into()],
            deactivation_setpoints: vec![180.into()],
            write_interval: None,
        };
        let mut orch = MultiUnitOrchestrator::new(config);
        orch.run_cycle(at(0), &mut reg);
        assert_eq!(orch.is_unit_active("C1"), Some(true));
        reg.set_reading("D", Some(DeciCelsius(175)));
        orch.run_cycle(at(1), &mut reg);
        assert_eq!(orch.is_unit_active("C1"), Some(false));
    }
}

//! Hydraulic actuator control: reference temperature to valve/pump position.
//!
//! The [`HydraulicPositionMapper`] turns a reading into a position through a
//! breakpoint table and applies it only when it moved past the deadband.
//! The [`HydraulicController`] wraps it with run gating (autorun, enable
//! signal with timeout, periodic fallback runs) and force open/close.

use std::str::FromStr;

use hn_core::{CycleTick, DeciCelsius, Percent, exceeds_deadband};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::component::{ComponentKind, ComponentRef, ComponentRegistry, reading, refresh, resolve_kind};
use crate::error::{ConfigError, ConfigResult};
use crate::hysteresis::Direction;
use crate::mailbox::Mailbox;
use crate::timer::{TimerKey, TimerRegistry, TimerSpec};

/// One `(temperature, position)` row of the mapping table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Breakpoint {
    pub temperature: DeciCelsius,
    pub position: Percent,
}

impl FromStr for Breakpoint {
    type Err = ConfigError;

    /// Parses `"temperature:position"`, e.g. `"550:40"`.
    fn from_str(token: &str) -> Result<Self, Self::Err> {
        let invalid = |reason| ConfigError::InvalidBreakpoint {
            token: token.to_string(),
            reason,
        };
        let mut fields = token.split(':');
        let (Some(t), Some(p), None) = (fields.next(), fields.next(), fields.next()) else {
            return Err(invalid("expected exactly 'temperature:position'"));
        };
        let temperature = t
            .trim()
            .parse::<i32>()
            .map_err(|_| invalid("temperature is not an integer"))?;
        let position = p
            .trim()
            .parse::<f64>()
            .map_err(|_| invalid("position is not a number"))
            .and_then(|v| Percent::new(v).map_err(|_| invalid("position outside 0..=100")))?;
        Ok(Breakpoint {
            temperature: DeciCelsius(temperature),
            position,
        })
    }
}

/// Unordered breakpoint rows plus a catch-all that always matches.
#[derive(Debug, Clone, PartialEq)]
pub struct BreakpointTable {
    direction: Direction,
    points: Vec<Breakpoint>,
    catch_all: Breakpoint,
}

impl BreakpointTable {
    pub fn new(direction: Direction, default_position: Percent) -> Self {
        let temperature = match direction {
            Direction::Heating => DeciCelsius::MAX,
            Direction::Cooling => DeciCelsius::MIN,
        };
        Self {
            direction,
            points: Vec::new(),
            catch_all: Breakpoint {
                temperature,
                position: default_position,
            },
        }
    }

    /// # Errors
    /// `InvalidBreakpoint` for a malformed token, `DuplicateBreakpoint` when
    /// two rows share a temperature.
    pub fn parse<S: AsRef<str>>(
        direction: Direction,
        tokens: &[S],
        default_position: Percent,
    ) -> ConfigResult<Self> {
        let mut table = Self::new(direction, default_position);
        for token in tokens {
            let bp: Breakpoint = token.as_ref().parse()?;
            if table.points.iter().any(|p| p.temperature == bp.temperature) {
                return Err(ConfigError::DuplicateBreakpoint {
                    temperature: bp.temperature.tenths(),
                });
            }
            table.points.push(bp);
        }
        Ok(table)
    }

    pub fn points(&self) -> &[Breakpoint] {
        &self.points
    }

    pub fn default_position(&self) -> Percent {
        self.catch_all.position
    }

    /// Replace the row at `temperature` or add a new one.
    pub fn upsert(&mut self, temperature: DeciCelsius, position: Percent) {
        match self.points.iter_mut().find(|p| p.temperature == temperature) {
            Some(p) => p.position = position,
            None => self.points.push(Breakpoint {
                temperature,
                position,
            }),
        }
    }

    /// Heating: the row with the smallest temperature at or above the
    /// reference. Cooling: the largest at or below it. The first of equal
    /// candidates wins.
    pub fn select(&self, reference: DeciCelsius) -> Breakpoint {
        let mut best: Option<Breakpoint> = None;
        for bp in self.points.iter().chain(std::iter::once(&self.catch_all)) {
            let (qualifies, closer) = match self.direction {
                Direction::Heating => (
                    bp.temperature >= reference,
                    best.is_none_or(|b| bp.temperature < b.temperature),
                ),
                Direction::Cooling => (
                    bp.temperature <= reference,
                    best.is_none_or(|b| bp.temperature > b.temperature),
                ),
            };
            if qualifies && closer {
                best = Some(*bp);
            }
        }
        best.unwrap_or(self.catch_all)
    }
}

/// Breakpoint lookup with a deadband against the last commanded position.
#[derive(Debug, Clone, PartialEq)]
pub struct HydraulicPositionMapper {
    table: BreakpointTable,
    tolerance: f64,
    last_commanded: Option<Percent>,
}

impl HydraulicPositionMapper {
    pub fn new(table: BreakpointTable, tolerance: f64) -> ConfigResult<Self> {
        if !tolerance.is_finite() || tolerance < 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "tolerance",
                reason: format!("must be a non-negative number, got {tolerance}"),
            });
        }
        Ok(Self {
            table,
            tolerance,
            last_commanded: None,
        })
    }

    pub fn table(&self) -> &BreakpointTable {
        &self.table
    }

    pub fn table_mut(&mut self) -> &mut BreakpointTable {
        &mut self.table
    }

    pub fn last_commanded(&self) -> Option<Percent> {
        self.last_commanded
    }

    /// `candidate` if it is worth writing, `None` when it is inside the
    /// deadband around the last commanded position.
    pub fn filter(&self, candidate: Percent) -> Option<Percent> {
        match self.last_commanded {
            Some(last) if !exceeds_deadband(last.value(), candidate.value(), self.tolerance) => None,
            _ => Some(candidate),
        }
    }

    /// Position to write for `reference`, if any.
    pub fn target(&self, reference: DeciCelsius) -> Option<Percent> {
        self.filter(self.table.select(reference).position)
    }

    pub fn commit(&mut self, position: Percent) {
        self.last_commanded = Some(position);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlType {
    /// Position follows the reference thermometer.
    Temperature,
    /// Position is requested directly.
    Position,
}

/// Periodic run when no enable signal has arrived for a while.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackSpec {
    pub wait: TimerSpec,
    pub run: TimerSpec,
}

fn default_control_type() -> ControlType {
    ControlType::Temperature
}

fn default_direction() -> Direction {
    Direction::Heating
}

fn default_run_timer() -> TimerSpec {
    TimerSpec::cycles(10)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HydraulicConfig {
    pub id: String,
    pub actuator_id: String,
    /// Required for `ControlType::Temperature`.
    #[serde(default)]
    pub reference_sensor_id: Option<String>,
    #[serde(default = "default_control_type")]
    pub control_type: ControlType,
    #[serde(default = "default_direction")]
    pub direction: Direction,
    /// `"temperature:position"` tokens.
    #[serde(default)]
    pub breakpoints: Vec<String>,
    #[serde(default)]
    pub default_position: Percent,
    /// Deadband in percent.
    #[serde(default)]
    pub tolerance: f64,
    #[serde(default)]
    pub autorun: bool,
    #[serde(default)]
    pub allow_forcing: bool,
    #[serde(default)]
    pub close_when_idle: bool,
    /// How long one enable signal keeps the controller running.
    #[serde(default = "default_run_timer")]
    pub run_timer: TimerSpec,
    #[serde(default)]
    pub fallback: Option<FallbackSpec>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FallbackPhase {
    Waiting,
    Running,
}

#[derive(Debug, Clone, PartialEq)]
struct Bound {
    actuator: ComponentRef,
    sensor: Option<ComponentRef>,
    mapper: HydraulicPositionMapper,
    run_timer: TimerKey,
    fallback: Option<(TimerKey, TimerKey)>,
}

#[derive(Debug, Clone)]
pub struct HydraulicController {
    config: HydraulicConfig,
    timers: TimerRegistry,
    bound: Option<Bound>,
    running: bool,
    running_by_signal: bool,
    fallback_phase: FallbackPhase,
    position_request: Option<Percent>,
    error: bool,
    last_config_error: Option<ConfigError>,
    enable: Mailbox<bool>,
    force_open: Mailbox<bool>,
    force_close: Mailbox<bool>,
    requested_position: Mailbox<Percent>,
}

impl HydraulicController {
    pub fn new(config: HydraulicConfig) -> Self {
        Self {
            timers: TimerRegistry::new(config.id.clone()),
            config,
            bound: None,
            running: false,
            running_by_signal: false,
            fallback_phase: FallbackPhase::Waiting,
            position_request: None,
            error: false,
            last_config_error: None,
            enable: Mailbox::new(),
            force_open: Mailbox::new(),
            force_close: Mailbox::new(),
            requested_position: Mailbox::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn config(&self) -> &HydraulicConfig {
        &self.config
    }

    pub fn is_configured(&self) -> bool {
        self.bound.is_some()
    }

    pub fn last_config_error(&self) -> Option<&ConfigError> {
        self.last_config_error.as_ref()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn has_error(&self) -> bool {
        self.error
    }

    pub fn commanded_position(&self) -> Option<Percent> {
        self.bound.as_ref().and_then(|b| b.mapper.last_commanded())
    }

    pub fn mapper(&self) -> Option<&HydraulicPositionMapper> {
        self.bound.as_ref().map(|b| &b.mapper)
    }

    pub fn enable_signal(&mut self) -> &mut Mailbox<bool> {
        &mut self.enable
    }

    pub fn force_open_signal(&mut self) -> &mut Mailbox<bool> {
        &mut self.force_open
    }

    pub fn force_close_signal(&mut self) -> &mut Mailbox<bool> {
        &mut self.force_close
    }

    pub fn position_request_signal(&mut self) -> &mut Mailbox<Percent> {
        &mut self.requested_position
    }

    /// Drop unread inputs at the cycle boundary.
    pub fn expire_mailboxes(&mut self) {
        self.enable.expire();
        self.force_open.expire();
        self.force_close.expire();
        self.requested_position.expire();
    }

    /// Add or replace a breakpoint, both in the configuration and in the
    /// live table.
    pub fn upsert_breakpoint(&mut self, temperature: DeciCelsius, position: Percent) {
        let token = format!("{}:{}", temperature.tenths(), position.value());
        let existing = self.config.breakpoints.iter().position(|t| {
            t.parse::<Breakpoint>()
                .is_ok_and(|bp| bp.temperature == temperature)
        });
        match existing {
            Some(i) => self.config.breakpoints[i] = token,
            None => self.config.breakpoints.push(token),
        }
        if let Some(bound) = self.bound.as_mut() {
            bound.mapper.table_mut().upsert(temperature, position);
        }
    }

    fn configure(&mut self, registry: &dyn ComponentRegistry) -> ConfigResult<Bound> {
        let c = &self.config;
        let actuator = resolve_kind(registry, &c.actuator_id, ComponentKind::Actuator)?;
        let sensor = match (&c.reference_sensor_id, c.control_type) {
            (Some(id), _) => Some(resolve_kind(registry, id, ComponentKind::Thermometer)?),
            (None, ControlType::Temperature) => {
                return Err(ConfigError::InvalidValue {
                    field: "reference_sensor_id",
                    reason: "required for temperature control".to_string(),
                });
            }
            (None, ControlType::Position) => None,
        };
        let table = BreakpointTable::parse(c.direction, &c.breakpoints, c.default_position)?;
        let mapper = HydraulicPositionMapper::new(table, c.tolerance)?;

        let mut timers = TimerRegistry::new(c.id.clone());
        let run_timer = timers.add_spec("run", &c.run_timer)?;
        let fallback = match &c.fallback {
            Some(spec) => Some((
                timers.add_spec("fallback_wait", &spec.wait)?,
                timers.add_spec("fallback_run", &spec.run)?,
            )),
            None => None,
        };
        self.timers = timers;
        Ok(Bound {
            actuator,
            sensor,
            mapper,
            run_timer,
            fallback,
        })
    }

    fn decide_running(&mut self, run_timer: TimerKey, fallback: Option<(TimerKey, TimerKey)>) -> bool {
        if self.config.autorun {
            return true;
        }
        if let Some(enabled) = self.enable.take() {
            self.timers.reset(run_timer);
            if let Some((wait, _)) = fallback {
                self.timers.reset(wait);
            }
            self.fallback_phase = FallbackPhase::Waiting;
            self.running_by_signal = enabled;
            return enabled;
        }
        if self.running_by_signal && !self.timers.is_expired(run_timer) {
            return true;
        }
        self.running_by_signal = false;

        let Some((wait, run)) = fallback else {
            return false;
        };
        match self.fallback_phase {
            FallbackPhase::Waiting if self.timers.is_expired(wait) => {
                info!(id = %self.config.id, "no enable signal, starting fallback run");
                self.fallback_phase = FallbackPhase::Running;
                self.timers.reset(run);
                true
            }
            FallbackPhase::Waiting => false,
            FallbackPhase::Running if self.timers.is_expired(run) => {
                self.fallback_phase = FallbackPhase::Waiting;
                self.timers.reset(wait);
                false
            }
            FallbackPhase::Running => true,
        }
    }

    /// One scheduling cycle.
    pub fn run_cycle(&mut self, now: CycleTick, registry: &mut dyn ComponentRegistry) {
        self.timers.tick(now);
        if self.bound.is_none() {
            match self.configure(&*registry) {
                Ok(bound) => {
                    self.timers.tick(now);
                    self.timers.reset_all();
                    info!(id = %self.config.id, "hydraulic controller configured");
                    self.bound = Some(bound);
                    self.last_config_error = None;
                }
                Err(err) => {
                    if self.last_config_error.as_ref() != Some(&err) {
                        warn!(id = %self.config.id, %err, "hydraulic configuration failed");
                    }
                    self.last_config_error = Some(err);
                    self.error = true;
                    self.running = false;
                    return;
                }
            }
        }
        let Some((run_timer, fallback)) = self.bound.as_ref().map(|b| (b.run_timer, b.fallback)) else {
            return;
        };

        let running = self.decide_running(run_timer, fallback);
        if running != self.running {
            debug!(id = %self.config.id, running, "hydraulic run state changed");
        }
        self.running = running;

        let force_open = self.force_open.take() == Some(true);
        let force_close = self.force_close.take() == Some(true);
        if let Some(p) = self.requested_position.take() {
            self.position_request = Some(p);
        }

        let id = self.config.id.as_str();
        let control_type = self.config.control_type;
        let allow_forcing = self.config.allow_forcing;
        let close_when_idle = self.config.close_when_idle;
        let position_request = self.position_request;
        let Some(bound) = self.bound.as_mut() else {
            return;
        };

        let mut error = !refresh(&*registry, &mut bound.actuator);
        if let Some(sensor) = bound.sensor.as_mut()
            && !refresh(&*registry, sensor)
        {
            error = true;
        }

        let candidate = if !running {
            if close_when_idle {
                let already_closed = registry
                    .actuator(&bound.actuator)
                    .and_then(|a| a.power_level())
                    .is_some_and(Percent::is_zero);
                (!already_closed).then_some(Write::Set(Percent::ZERO))
            } else {
                None
            }
        } else if allow_forcing && force_close {
            Some(Write::ForceClose)
        } else if allow_forcing && force_open {
            Some(Write::ForceOpen)
        } else {
            let wanted = match control_type {
                ControlType::Temperature => bound
                    .sensor
                    .as_ref()
                    .and_then(|s| reading(&*registry, s))
                    .map(|r| bound.mapper.table().select(r).position),
                ControlType::Position => position_request,
            };
            wanted.and_then(|p| bound.mapper.filter(p)).map(Write::Set)
        };

        if let Some(write) = candidate {
            match registry.actuator_mut(&bound.actuator) {
                Some(actuator) if actuator.ready_to_change() => {
                    let (result, position) = match write {
                        Write::Set(p) => (actuator.set_power_level(p), p),
                        Write::ForceOpen => (actuator.force_open(), Percent::FULL),
                        Write::ForceClose => (actuator.force_close(), Percent::ZERO),
                    };
                    match result {
                        Ok(()) => {
                            debug!(id, position = %position, "actuator commanded");
                            bound.mapper.commit(position);
                        }
                        Err(err) => {
                            warn!(id, %err, "couldn't write actuator");
                            error = true;
                        }
                    }
                }
                Some(_) => {}
                None => error = true,
            }
        }
        self.error = error;
    }
}

#[derive(Debug, Clone, Copy)]
enum Write {
    Set(Percent),
    ForceOpen,
    ForceClose,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::FakeRegistry;
    use std::time::Duration;

    fn at(cycle: u64) -> CycleTick {
        CycleTick::new(cycle, Duration::from_secs(cycle))
    }

    fn pct(v: f64) -> Percent {
        Percent::new(v).unwrap()
    }

    fn heating_table() -> BreakpointTable {
        BreakpointTable::parse(Direction::Heating, &["400:100", "600:60", "500:80"], pct(10.0))
            .unwrap()
    }

    #[test]
    fn parse_rejects_bad_tokens() {
        for bad in ["400", "400:50:1", "abc:50", "400:xyz", "400:101", "400:-1"] {
            let err = BreakpointTable::parse(Direction::Heating, &[bad], Percent::ZERO).unwrap_err();
            assert!(
                matches!(err, ConfigError::InvalidBreakpoint { .. }),
                "{bad}: {err:?}"
            );
        }
        assert_eq!(
            BreakpointTable::parse(Direction::Heating, &["400:1", "400:2"], Percent::ZERO),
            Err(ConfigError::DuplicateBreakpoint { temperature: 400 })
        );
    }

    #[test]
    fn heating_selects_smallest_at_or_above() {
        let t = heating_table();
        assert_eq!(t.select(DeciCelsius(350)).position, pct(100.0));
        assert_eq!(t.select(DeciCelsius(400)).position, pct(100.0));
        assert_eq!(t.select(DeciCelsius(450)).position, pct(80.0));
        assert_eq!(t.select(DeciCelsius(600)).position, pct(60.0));
        // above every row: catch-all
        assert_eq!(t.select(DeciCelsius(601)).position, pct(10.0));
    }

    #[test]
    fn cooling_selects_largest_at_or_below() {
        let t = BreakpointTable::parse(Direction::Cooling, &["200:30", "250:70", "300:100"], pct(0.0))
            .unwrap();
        assert_eq!(t.select(DeciCelsius(320)).position, pct(100.0));
        assert_eq!(t.select(DeciCelsius(260)).position, pct(70.0));
        assert_eq!(t.select(DeciCelsius(200)).position, pct(30.0));
        assert_eq!(t.select(DeciCelsius(150)).position, pct(0.0));
    }

    #[test]
    fn upsert_replaces_or_adds() {
        let mut t = heating_table();
        t.upsert(DeciCelsius(500), pct(75.0));
        t.upsert(DeciCelsius(700), pct(20.0));
        assert_eq!(t.points().len(), 4);
        assert_eq!(t.select(DeciCelsius(450)).position, pct(75.0));
        assert_eq!(t.select(DeciCelsius(650)).position, pct(20.0));
    }

    #[test]
    fn deadband_suppresses_small_moves() {
        let mut m = HydraulicPositionMapper::new(heating_table(), 25.0).unwrap();
        assert_eq!(m.target(DeciCelsius(450)), Some(pct(80.0)));
        m.commit(pct(80.0));
        assert_eq!(m.target(DeciCelsius(550)), None);
        assert_eq!(m.target(DeciCelsius(300)), None);
        assert_eq!(m.target(DeciCelsius(900)), Some(pct(10.0)));
        assert!(HydraulicPositionMapper::new(heating_table(), -1.0).is_err());
    }

    fn fixture(config: impl FnOnce(&mut HydraulicConfig)) -> (FakeRegistry, HydraulicController) {
        let mut reg = FakeRegistry::default();
        reg.add_actuator("V1");
        reg.add_thermometer("TR", Some(DeciCelsius(450)));
        let mut c = HydraulicConfig {
            id: "hyd0".to_string(),
            actuator_id: "V1".to_string(),
            reference_sensor_id: Some("TR".to_string()),
            control_type: ControlType::Temperature,
            direction: Direction::Heating,
            breakpoints: vec!["400:100".into(), "500:80".into(), "600:60".into()],
            default_position: pct(10.0),
            tolerance: 0.0,
            autorun: true,
            allow_forcing: false,
            close_when_idle: false,
            run_timer: TimerSpec::cycles(3),
            fallback: None,
        };
        config(&mut c);
        (reg, HydraulicController::new(c))
    }

    #[test]
    fn autorun_maps_reference_temperature() {
        let (mut reg, mut hc) = fixture(|_| {});
        hc.run_cycle(at(0), &mut reg);
        assert!(hc.is_running());
        assert_eq!(reg.actuator_state("V1").level, Some(pct(80.0)));

        // same target again: no second write
        hc.run_cycle(at(1), &mut reg);
        assert_eq!(reg.actuator_state("V1").writes.len(), 1);

        reg.set_reading("TR", Some(DeciCelsius(550)));
        hc.run_cycle(at(2), &mut reg);
        assert_eq!(hc.commanded_position(), Some(pct(60.0)));
    }

    #[test]
    fn missing_reading_changes_nothing() {
        let (mut reg, mut hc) = fixture(|_| {});
        hc.run_cycle(at(0), &mut reg);
        reg.set_reading("TR", None);
        hc.run_cycle(at(1), &mut reg);
        assert_eq!(reg.actuator_state("V1").writes, vec![pct(80.0)]);
    }

    #[test]
    fn busy_actuator_is_left_alone() {
        let (mut reg, mut hc) = fixture(|_| {});
        reg.actuator_state_mut("V1").ready = false;
        hc.run_cycle(at(0), &mut reg);
        assert!(reg.actuator_state("V1").writes.is_empty());
        assert_eq!(hc.commanded_position(), None);
        reg.actuator_state_mut("V1").ready = true;
        hc.run_cycle(at(1), &mut reg);
        assert_eq!(hc.commanded_position(), Some(pct(80.0)));
    }

    #[test]
    fn enable_signal_runs_until_timeout() {
        let (mut reg, mut hc) = fixture(|c| {
            c.autorun = false;
            c.close_when_idle = true;
        });
        hc.enable_signal().write(true);
        hc.run_cycle(at(0), &mut reg);
        assert!(hc.is_running());
        for c in 1..3 {
            hc.run_cycle(at(c), &mut reg);
            assert!(hc.is_running(), "cycle {c}");
        }
        hc.run_cycle(at(3), &mut reg);
        assert!(!hc.is_running());
        assert_eq!(reg.actuator_state("V1").level, Some(Percent::ZERO));

        // closed already: no further writes while idle
        let writes = reg.actuator_state("V1").writes.len();
        hc.run_cycle(at(4), &mut reg);
        assert_eq!(reg.actuator_state("V1").writes.len(), writes);
    }

    #[test]
    fn explicit_disable_stops_immediately() {
        let (mut reg, mut hc) = fixture(|c| c.autorun = false);
        hc.enable_signal().write(true);
        hc.run_cycle(at(0), &mut reg);
        hc.enable_signal().write(false);
        hc.run_cycle(at(1), &mut reg);
        assert!(!hc.is_running());
        // not closing when idle: position held
        assert_eq!(reg.actuator_state("V1").level, Some(pct(80.0)));
    }

    #[test]
    fn forcing_needs_permission() {
        let (mut reg, mut hc) = fixture(|_| {});
        hc.force_close_signal().write(true);
        hc.run_cycle(at(0), &mut reg);
        assert_eq!(reg.actuator_state("V1").level, Some(pct(80.0)));

        let (mut reg, mut hc) = fixture(|c| c.allow_forcing = true);
        hc.force_open_signal().write(true);
        hc.run_cycle(at(0), &mut reg);
        assert_eq!(reg.actuator_state("V1").level, Some(Percent::FULL));
        hc.force_open_signal().write(true);
        hc.force_close_signal().write(true);
        hc.run_cycle(at(1), &mut reg);
        assert_eq!(reg.actuator_state("V1").level, Some(Percent::ZERO));
        // force is one-shot; mapping resumes
        hc.run_cycle(at(2), &mut reg);
        assert_eq!(reg.actuator_state("V1").level, Some(pct(80.0)));
    }

    #[test]
    fn position_mode_applies_requests() {
        let (mut reg, mut hc) = fixture(|c| {
            c.control_type = ControlType::Position;
            c.reference_sensor_id = None;
            c.tolerance = 5.0;
        });
        hc.run_cycle(at(0), &mut reg);
        assert!(reg.actuator_state("V1").writes.is_empty());
        hc.position_request_signal().write(pct(30.0));
        hc.run_cycle(at(1), &mut reg);
        hc.position_request_signal().write(pct(33.0));
        hc.run_cycle(at(2), &mut reg);
        assert_eq!(reg.actuator_state("V1").writes, vec![pct(30.0)]);
    }

    #[test]
    fn temperature_mode_without_sensor_is_a_config_error() {
        let (mut reg, mut hc) = fixture(|c| c.reference_sensor_id = None);
        hc.run_cycle(at(0), &mut reg);
        assert!(!hc.is_configured());
        assert!(hc.has_error());
        assert!(matches!(
            hc.last_config_error(),
            Some(ConfigError::InvalidValue { field: "reference_sensor_id", .. })
        ));
    }

    #[test]
    fn bad_breakpoint_is_a_config_error() {
        let (mut reg, mut hc) = fixture(|c| c.breakpoints.push("oops".into()));
        hc.run_cycle(at(0), &mut reg);
        assert!(matches!(
            hc.last_config_error(),
            Some(ConfigError::InvalidBreakpoint { .. })
        ));
    }

    #[test]
    fn fallback_runs_periodically_without_signal() {
        let (mut reg, mut hc) = fixture(|c| {
            c.autorun = false;
            c.fallback = Some(FallbackSpec {
                wait: TimerSpec::cycles(4),
                run: TimerSpec::cycles(2),
            });
        });
        let mut states = Vec::new();
        for c in 0..12 {
            hc.run_cycle(at(c), &mut reg);
            states.push(hc.is_running());
        }
        assert_eq!(
            states,
            vec![
                false, false, false, false, true, true, false, false, false, false, true, true
            ]
        );
    }

    #[test]
    fn enable_signal_postpones_fallback() {
        let (mut reg, mut hc) = fixture(|c| {
            c.autorun = false;
            c.run_timer = TimerSpec::cycles(1);
            c.fallback = Some(FallbackSpec {
                wait: TimerSpec::cycles(4),
                run: TimerSpec::cycles(2),
            });
        });
        for c in 0..3 {
            hc.run_cycle(at(c), &mut reg);
        }
        hc.enable_signal().write(false);
        hc.run_cycle(at(3), &mut reg);
        hc.run_cycle(at(4), &mut reg);
        assert!(!hc.is_running());
        for c in 5..7 {
            hc.run_cycle(at(c), &mut reg);
            assert!(!hc.is_running(), "cycle {c}");
        }
        hc.run_cycle(at(7), &mut reg);
        assert!(hc.is_running());
    }

    #[test]
    fn upsert_updates_live_table_and_config() {
        let (mut reg, mut hc) = fixture(|_| {});
        hc.run_cycle(at(0), &mut reg);
        hc.upsert_breakpoint(DeciCelsius(500), pct(70.0));
        hc.run_cycle(at(1), &mut reg);
        assert_eq!(hc.commanded_position(), Some(pct(70.0)));
        assert!(hc.config().breakpoints.contains(&"500:70".to_string()));
        assert_eq!(hc.config().breakpoints.len(), 3);
    }

    #[test]
    fn replaced_actuator_is_rebound() {
        let (mut reg, mut hc) = fixture(|_| {});
        hc.run_cycle(at(0), &mut reg);
        reg.set_enabled("V1", false);
        reg.set_reading("TR", Some(DeciCelsius(550)));
        hc.run_cycle(at(1), &mut reg);
        assert!(hc.has_error());
        reg.set_enabled("V1", true);
        hc.run_cycle(at(2), &mut reg);
        assert!(!hc.has_error());
        assert_eq!(reg.actuator_state("V1").level, Some(pct(60.0)));
    }
}

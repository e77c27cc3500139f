//! Simulated field devices.
//!
//! Thermal units behave like the real thing: a run request only keeps the
//! unit going for its keep-alive window, and an override replaces whatever
//! the controllers asked for. A valve stays busy for `travel_cycles` cycles
//! after the cycle it was moved in and refuses new positions until then.

use hn_controls::{
    Actuator, Capability, ConfigResult, ControlError, ControlResult, DebounceGate, Mailbox,
    OverrideGate, OverrideState, ThermalUnit, Thermometer, TimerRegistry,
};
use hn_core::{CycleTick, DeciCelsius, Percent};
use hn_project::{ActuatorDef, ThermalUnitDef};
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimThermometer {
    reading: Option<DeciCelsius>,
}

impl SimThermometer {
    pub fn new(reading: Option<DeciCelsius>) -> Self {
        Self { reading }
    }

    pub fn set_reading(&mut self, reading: Option<DeciCelsius>) {
        self.reading = reading;
    }
}

impl Thermometer for SimThermometer {
    fn reading(&self) -> Option<DeciCelsius> {
        self.reading
    }
}

#[derive(Debug, Clone)]
pub struct SimThermalUnit {
    id: String,
    capability: Capability,
    timers: TimerRegistry,
    gate: DebounceGate,
    override_gate: Option<OverrideGate>,
    run: Mailbox<bool>,
    override_enable: Mailbox<bool>,
    blocked: bool,
    reject_writes: bool,
    running: bool,
    power: Percent,
    run_requests: u64,
}

impl SimThermalUnit {
    /// # Errors
    /// Unknown timer modes or an invalid override specification.
    pub fn new(def: &ThermalUnitDef) -> ConfigResult<Self> {
        let mut timers = TimerRegistry::new(def.id.clone());
        let gate = DebounceGate::new(&mut timers, "run", &def.run_timeout)?;
        let override_gate = def
            .override_gate
            .as_ref()
            .map(|spec| OverrideGate::new(&mut timers, "override", spec))
            .transpose()?;
        Ok(Self {
            id: def.id.clone(),
            capability: def.capability,
            timers,
            gate,
            override_gate,
            run: Mailbox::new(),
            override_enable: Mailbox::new(),
            blocked: def.blocked,
            reject_writes: false,
            running: false,
            power: Percent::ZERO,
            run_requests: 0,
        })
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn power(&self) -> Percent {
        self.power
    }

    pub fn run_requests(&self) -> u64 {
        self.run_requests
    }

    pub fn set_blocked(&mut self, blocked: bool) {
        self.blocked = blocked;
    }

    pub fn set_reject_writes(&mut self, reject: bool) {
        self.reject_writes = reject;
    }

    pub fn override_enable_signal(&mut self) -> &mut Mailbox<bool> {
        &mut self.override_enable
    }

    /// # Errors
    /// `InvalidArg` without a configured override, `WriteRejected` for a
    /// value outside `[0, 100]`.
    pub fn set_override_value(&mut self, raw: f64) -> ControlResult<()> {
        match self.override_gate.as_mut() {
            Some(gate) => gate.set_value(raw),
            None => Err(ControlError::InvalidArg {
                what: "unit has no override configured",
            }),
        }
    }

    /// Settle the unit after every controller has had its turn.
    pub fn evaluate(&mut self, now: CycleTick) {
        self.timers.tick(now);
        let requested = self.gate.evaluate(&mut self.timers, self.run.take());
        let forced = self
            .override_gate
            .as_mut()
            .map_or(OverrideState::Inactive, |g| {
                g.evaluate(&mut self.timers, self.override_enable.take())
            });
        let (running, power) = match forced {
            _ if self.blocked => (false, Percent::ZERO),
            OverrideState::On(p) => (true, p),
            OverrideState::Off => (false, Percent::ZERO),
            OverrideState::Inactive if requested => (true, Percent::FULL),
            OverrideState::Inactive => (false, Percent::ZERO),
        };
        if running != self.running {
            debug!(id = %self.id, running, power = %power, "unit switched");
        }
        self.running = running;
        self.power = power;
        self.run.expire();
        self.override_enable.expire();
    }
}

impl ThermalUnit for SimThermalUnit {
    fn capability(&self) -> Capability {
        self.capability
    }

    fn request_run(&mut self) -> ControlResult<()> {
        if self.reject_writes {
            return Err(ControlError::WriteRejected {
                id: self.id.clone(),
                reason: "unit rejects writes".to_string(),
            });
        }
        self.run.write(true);
        self.run_requests += 1;
        Ok(())
    }

    fn is_blocked(&self) -> bool {
        self.blocked
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimValve {
    id: String,
    position: Percent,
    travel_cycles: u32,
    moving: u32,
    reject_writes: bool,
    writes: u64,
}

impl SimValve {
    pub fn new(def: &ActuatorDef) -> Self {
        Self {
            id: def.id.clone(),
            position: def.position,
            travel_cycles: def.travel_cycles,
            moving: 0,
            reject_writes: false,
            writes: 0,
        }
    }

    pub fn position(&self) -> Percent {
        self.position
    }

    pub fn writes(&self) -> u64 {
        self.writes
    }

    pub fn set_reject_writes(&mut self, reject: bool) {
        self.reject_writes = reject;
    }

    /// End of cycle: one cycle of travel done.
    pub fn advance(&mut self) {
        self.moving = self.moving.saturating_sub(1);
    }

    fn command(&mut self, level: Percent) -> ControlResult<()> {
        if self.reject_writes {
            return Err(ControlError::WriteRejected {
                id: self.id.clone(),
                reason: "actuator rejects writes".to_string(),
            });
        }
        if level != self.position {
            // the cycle of the write is consumed by the next `advance`
            self.moving = self.travel_cycles.saturating_add(1);
        }
        self.position = level;
        self.writes += 1;
        Ok(())
    }
}

impl Actuator for SimValve {
    fn power_level(&self) -> Option<Percent> {
        Some(self.position)
    }

    fn set_power_level(&mut self, level: Percent) -> ControlResult<()> {
        self.command(level)
    }

    fn force_open(&mut self) -> ControlResult<()> {
        self.command(Percent::FULL)
    }

    fn force_close(&mut self) -> ControlResult<()> {
        self.command(Percent::ZERO)
    }

    fn ready_to_change(&self) -> bool {
        self.moving == 0
    }
}

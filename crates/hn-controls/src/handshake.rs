//! Decentralized heat request handshake.
//!
//! A local consumer raises `need_heat` and waits for the network controller
//! to grant it through the need-heat enable mailbox. If the network stays
//! silent for the response timeout the unit grants itself, so a missing
//! network controller can never starve a consumer. While granted the unit
//! claims the setpoint on its threshold thermometer and opens its actuator
//! once the supply is warm (or cold) enough.

use hn_core::{CycleTick, DeciCelsius, Percent};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::component::{ComponentKind, ComponentRef, ComponentRegistry, refresh, resolve_kind};
use crate::error::{ConfigError, ConfigResult, ControlError, ControlResult};
use crate::gate::{OverrideGate, OverrideSpec, OverrideState};
use crate::mailbox::Mailbox;
use crate::timer::{TimerKey, TimerRegistry, TimerSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HandshakePhase {
    Idle,
    Requesting,
    Granted,
}

/// Grant tracking with a liveness timeout.
#[derive(Debug, Clone, PartialEq)]
pub struct HeatRequestHandshake {
    timer: TimerKey,
    was_granted: bool,
    phase: HandshakePhase,
}

impl HeatRequestHandshake {
    pub fn new(timers: &mut TimerRegistry, spec: &TimerSpec) -> ConfigResult<Self> {
        Ok(Self {
            timer: timers.add_spec("need_heat_response", spec)?,
            was_granted: false,
            phase: HandshakePhase::Idle,
        })
    }

    pub fn phase(&self) -> HandshakePhase {
        self.phase
    }

    pub fn was_granted_last_cycle(&self) -> bool {
        self.was_granted
    }

    /// Not requesting this cycle.
    pub fn idle(&mut self, timers: &mut TimerRegistry) {
        timers.reset(self.timer);
        self.was_granted = false;
        self.phase = HandshakePhase::Idle;
    }

    /// Requesting this cycle. `grant` is the value taken from the grant
    /// mailbox; `forced` grants regardless of the network. Returns whether
    /// the unit may proceed.
    pub fn step(&mut self, timers: &mut TimerRegistry, grant: Option<bool>, forced: bool) -> bool {
        if self.phase == HandshakePhase::Idle {
            timers.reset(self.timer);
        }
        let by_network = match grant {
            Some(granted) => {
                timers.reset(self.timer);
                granted
            }
            None => self.was_granted || timers.is_expired(self.timer),
        };
        // a forced grant lasts only while forced
        self.was_granted = by_network;
        let granted = by_network || forced;
        let phase = if granted {
            HandshakePhase::Granted
        } else {
            HandshakePhase::Requesting
        };
        if phase != self.phase {
            debug!(owner = timers.owner(), ?phase, "handshake phase changed");
        }
        self.phase = phase;
        granted
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecentralizedKind {
    /// Opens once the supply is at or above the setpoint.
    Heater,
    /// Opens once the supply is at or below the setpoint.
    Cooler,
}

fn default_kind() -> DecentralizedKind {
    DecentralizedKind::Heater
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecentralizedConfig {
    pub id: String,
    #[serde(default = "default_kind")]
    pub kind: DecentralizedKind,
    pub actuator_id: String,
    pub threshold_id: String,
    pub setpoint: DeciCelsius,
    /// How long to wait for the network before granting locally.
    pub response_timer: TimerSpec,
    #[serde(default)]
    pub override_gate: Option<OverrideSpec>,
    /// Grant without waiting for the network.
    #[serde(default)]
    pub force_demand: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Bound {
    actuator: ComponentRef,
    threshold: ComponentRef,
}

#[derive(Debug, Clone)]
pub struct DecentralizedUnit {
    config: DecentralizedConfig,
    timers: TimerRegistry,
    handshake: HeatRequestHandshake,
    override_gate: Option<OverrideGate>,
    bound: Option<Bound>,
    need_heat: bool,
    need_more_heat: bool,
    more_heat_acknowledged: bool,
    error: bool,
    last_config_error: Option<ConfigError>,
    enable: Mailbox<bool>,
    grant: Mailbox<bool>,
    more_heat_ack: Mailbox<bool>,
    override_enable: Mailbox<bool>,
}

impl DecentralizedUnit {
    /// # Errors
    /// Unknown timer modes or an invalid override specification.
    pub fn new(config: DecentralizedConfig) -> ConfigResult<Self> {
        let mut timers = TimerRegistry::new(config.id.clone());
        let handshake = HeatRequestHandshake::new(&mut timers, &config.response_timer)?;
        let override_gate = config
            .override_gate
            .as_ref()
            .map(|spec| OverrideGate::new(&mut timers, "override", spec))
            .transpose()?;
        Ok(Self {
            config,
            timers,
            handshake,
            override_gate,
            bound: None,
            need_heat: false,
            need_more_heat: false,
            more_heat_acknowledged: false,
            error: false,
            last_config_error: None,
            enable: Mailbox::new(),
            grant: Mailbox::new(),
            more_heat_ack: Mailbox::new(),
            override_enable: Mailbox::new(),
        })
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn config(&self) -> &DecentralizedConfig {
        &self.config
    }

    /// For a cooler this is the need-cool flag.
    pub fn need_heat(&self) -> bool {
        self.need_heat
    }

    pub fn need_more_heat(&self) -> bool {
        self.need_more_heat
    }

    pub fn more_heat_acknowledged(&self) -> bool {
        self.more_heat_acknowledged
    }

    pub fn phase(&self) -> HandshakePhase {
        self.handshake.phase()
    }

    pub fn has_error(&self) -> bool {
        self.error
    }

    pub fn last_config_error(&self) -> Option<&ConfigError> {
        self.last_config_error.as_ref()
    }

    pub fn override_state(&self) -> OverrideState {
        self.override_gate
            .as_ref()
            .map_or(OverrideState::Inactive, OverrideGate::state)
    }

    pub fn enable_signal(&mut self) -> &mut Mailbox<bool> {
        &mut self.enable
    }

    /// Written by the network controller to grant or deny the request.
    pub fn need_heat_enable_signal(&mut self) -> &mut Mailbox<bool> {
        &mut self.grant
    }

    /// Written by the network controller to acknowledge `need_more_heat`.
    pub fn need_more_heat_enable_signal(&mut self) -> &mut Mailbox<bool> {
        &mut self.more_heat_ack
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

    pub fn expire_mailboxes(&mut self) {
        self.enable.expire();
        self.grant.expire();
        self.more_heat_ack.expire();
        self.override_enable.expire();
    }

    fn bind(&mut self, registry: &dyn ComponentRegistry) -> bool {
        let result = resolve_kind(registry, &self.config.actuator_id, ComponentKind::Actuator)
            .and_then(|actuator| {
                let threshold = resolve_kind(
                    registry,
                    &self.config.threshold_id,
                    ComponentKind::ThresholdThermometer,
                )?;
                Ok(Bound {
                    actuator,
                    threshold,
                })
            });
        match result {
            Ok(bound) => {
                info!(id = %self.config.id, "decentralized unit configured");
                self.bound = Some(bound);
                self.last_config_error = None;
                true
            }
            Err(err) => {
                if self.last_config_error.as_ref() != Some(&err) {
                    warn!(id = %self.config.id, %err, "decentralized unit configuration failed");
                }
                self.last_config_error = Some(err);
                false
            }
        }
    }

    /// One scheduling cycle.
    pub fn run_cycle(&mut self, now: CycleTick, registry: &mut dyn ComponentRegistry) {
        self.timers.tick(now);
        if self.bound.is_none() && !self.bind(&*registry) {
            self.error = true;
            return;
        }
        let Some(mut bound) = self.bound.take() else {
            return;
        };
        let mut error = !refresh(&*registry, &mut bound.actuator);
        if !refresh(&*registry, &mut bound.threshold) {
            error = true;
        }

        let mut requested = self.enable.take().unwrap_or(false);
        let mut override_on = false;
        let override_request = self.override_enable.take();
        if let Some(gate) = self.override_gate.as_mut() {
            match gate.evaluate(&mut self.timers, override_request) {
                OverrideState::Inactive => {}
                OverrideState::Off => requested = false,
                OverrideState::On(_) => {
                    requested = true;
                    override_on = true;
                }
            }
        }
        if let Some(ack) = self.more_heat_ack.take() {
            self.more_heat_acknowledged = ack;
        }

        if !requested {
            if let Some(tt) = registry.threshold_mut(&bound.threshold) {
                tt.release(&self.config.id);
            }
            error |= !self.drive(registry, &bound.actuator, Percent::ZERO);
            self.grant.expire();
            self.more_heat_ack.expire();
            self.need_heat = false;
            self.need_more_heat = false;
            self.more_heat_acknowledged = false;
            self.handshake.idle(&mut self.timers);
            self.error = error;
            self.bound = Some(bound);
            return;
        }

        self.need_heat = true;
        let forced = self.config.force_demand || override_on;
        let granted = self
            .handshake
            .step(&mut self.timers, self.grant.take(), forced);

        let temperature_ok = if granted {
            match registry.threshold_mut(&bound.threshold) {
                Some(tt) => {
                    tt.claim(&self.config.id, self.config.setpoint);
                    match self.config.kind {
                        DecentralizedKind::Heater => tt.is_above(self.config.setpoint),
                        DecentralizedKind::Cooler => tt.is_below(self.config.setpoint),
                    }
                }
                None => {
                    error = true;
                    false
                }
            }
        } else {
            false
        };

        self.need_more_heat = granted && !temperature_ok;
        let target = if temperature_ok {
            Percent::FULL
        } else {
            Percent::ZERO
        };
        error |= !self.drive(registry, &bound.actuator, target);
        self.error = error;
        self.bound = Some(bound);
    }

    /// Move the actuator to `target` unless it is there already or busy.
    /// Returns `false` on an unusable actuator or a rejected write.
    fn drive(
        &self,
        registry: &mut dyn ComponentRegistry,
        actuator: &ComponentRef,
        target: Percent,
    ) -> bool {
        let Some(a) = registry.actuator_mut(actuator) else {
            return false;
        };
        if a.power_level() == Some(target) || !a.ready_to_change() {
            return true;
        }
        match a.set_power_level(target) {
            Ok(()) => true,
            Err(err) => {
                warn!(id = %self.config.id, %err, "couldn't write actuator");
                false
            }
        }
    }
}

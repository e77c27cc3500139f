//! Site validation logic.
//!
//! Structural checks only: unique ids, references that point somewhere,
//! values that parse. Whether a referenced component has the right kind or
//! capability is decided by each controller's own configuration step.

use std::collections::HashSet;

use hn_controls::{BreakpointTable, Setpoint, TimerSpec};

use crate::schema::{ComponentDef, EventAction, SiteDef, LATEST_VERSION};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Duplicate ID: {id} in {context}")]
    DuplicateId { id: String, context: String },

    #[error("Missing reference: {id} in {context}")]
    MissingReference { id: String, context: String },

    #[error("Invalid value: {field} = {value} ({reason})")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Unsupported version: {version}")]
    UnsupportedVersion { version: u32 },
}

struct Ids<'a> {
    components: HashSet<&'a str>,
    controllers: HashSet<&'a str>,
}

impl Ids<'_> {
    fn component(&self, id: &str, context: &str) -> Result<(), ValidationError> {
        if self.components.contains(id) {
            Ok(())
        } else {
            Err(ValidationError::MissingReference {
                id: id.to_string(),
                context: context.to_string(),
            })
        }
    }

    fn controller(&self, id: &str, context: &str) -> Result<(), ValidationError> {
        if self.controllers.contains(id) {
            Ok(())
        } else {
            Err(ValidationError::MissingReference {
                id: id.to_string(),
                context: context.to_string(),
            })
        }
    }

    fn either(&self, id: &str, context: &str) -> Result<(), ValidationError> {
        self.component(id, context)
            .or_else(|_| self.controller(id, context))
    }
}

fn timer(spec: &TimerSpec, field: &str) -> Result<(), ValidationError> {
    spec.parse_mode()
        .map(|_| ())
        .map_err(|e| ValidationError::InvalidValue {
            field: field.to_string(),
            value: spec.mode.clone(),
            reason: e.to_string(),
        })
}

fn setpoint(ids: &Ids<'_>, sp: &Setpoint, context: &str) -> Result<(), ValidationError> {
    match sp {
        Setpoint::Fixed(_) => Ok(()),
        Setpoint::Sensor(id) => ids.component(id, context),
    }
}

pub fn validate_site(site: &SiteDef) -> Result<(), ValidationError> {
    if site.version > LATEST_VERSION || site.version == 0 {
        return Err(ValidationError::UnsupportedVersion {
            version: site.version,
        });
    }
    if site.cycle_period_ms == 0 {
        return Err(ValidationError::InvalidValue {
            field: "cycle_period_ms".to_string(),
            value: "0".to_string(),
            reason: "must be positive".to_string(),
        });
    }

    let mut components = HashSet::new();
    for c in &site.components {
        if !components.insert(c.id()) {
            return Err(ValidationError::DuplicateId {
                id: c.id().to_string(),
                context: "components".to_string(),
            });
        }
    }
    let mut controllers = HashSet::new();
    for id in site.controller_ids() {
        if components.contains(id) || !controllers.insert(id) {
            return Err(ValidationError::DuplicateId {
                id: id.to_string(),
                context: "controllers".to_string(),
            });
        }
    }
    let ids = Ids {
        components,
        controllers,
    };

    for c in &site.components {
        validate_component(&ids, c)?;
    }

    for o in &site.orchestrators {
        for id in &o.unit_ids {
            ids.component(id, &format!("orchestrator {} unit_ids", o.id))?;
        }
        for id in o.activation_sensors.iter().chain(&o.deactivation_sensors) {
            ids.component(id, &format!("orchestrator {} sensors", o.id))?;
        }
        for sp in o.activation_setpoints.iter().chain(&o.deactivation_setpoints) {
            setpoint(&ids, sp, &format!("orchestrator {} setpoints", o.id))?;
        }
        if let Some(spec) = &o.write_interval {
            timer(spec, &format!("{}.write_interval", o.id))?;
        }
    }

    for h in &site.hydraulics {
        ids.component(&h.actuator_id, &format!("hydraulic {} actuator_id", h.id))?;
        if let Some(sensor) = &h.reference_sensor_id {
            ids.component(sensor, &format!("hydraulic {} reference_sensor_id", h.id))?;
        }
        BreakpointTable::parse(h.direction, &h.breakpoints, h.default_position).map_err(|e| {
            ValidationError::InvalidValue {
                field: format!("{}.breakpoints", h.id),
                value: h.breakpoints.join(","),
                reason: e.to_string(),
            }
        })?;
        timer(&h.run_timer, &format!("{}.run_timer", h.id))?;
        if let Some(fallback) = &h.fallback {
            timer(&fallback.wait, &format!("{}.fallback.wait", h.id))?;
            timer(&fallback.run, &format!("{}.fallback.run", h.id))?;
        }
    }

    for d in &site.decentralized {
        ids.component(&d.actuator_id, &format!("decentralized {} actuator_id", d.id))?;
        ids.component(&d.threshold_id, &format!("decentralized {} threshold_id", d.id))?;
        timer(&d.response_timer, &format!("{}.response_timer", d.id))?;
        if let Some(o) = &d.override_gate {
            timer(&o.timer, &format!("{}.override_gate.timer", d.id))?;
        }
    }

    for (i, event) in site.events.iter().enumerate() {
        validate_event(&ids, &event.action, &format!("events[{i}]"))?;
    }

    Ok(())
}

fn validate_component(ids: &Ids<'_>, c: &ComponentDef) -> Result<(), ValidationError> {
    match c {
        ComponentDef::Thermometer { .. } | ComponentDef::Actuator(_) => Ok(()),
        ComponentDef::ThermalUnit(u) => {
            timer(&u.run_timeout, &format!("{}.run_timeout", u.id))?;
            if let Some(o) = &u.override_gate {
                timer(&o.timer, &format!("{}.override_gate.timer", u.id))?;
            }
            Ok(())
        }
        ComponentDef::ThresholdThermometer(t) => {
            if t.step <= 0 {
                return Err(ValidationError::InvalidValue {
                    field: format!("{}.step", t.id),
                    value: t.step.to_string(),
                    reason: "must be positive".to_string(),
                });
            }
            ids.component(&t.reference_id, &format!("{} reference_id", t.id))
        }
    }
}

fn validate_event(ids: &Ids<'_>, action: &EventAction, context: &str) -> Result<(), ValidationError> {
    match action {
        EventAction::SetReading { sensor: id, .. }
        | EventAction::Disable { component: id }
        | EventAction::Enable { component: id }
        | EventAction::SetBlocked { unit: id, .. }
        | EventAction::RejectWrites { component: id, .. } => ids.component(id, context),
        EventAction::Replace { component } => {
            ids.component(component.id(), context)?;
            validate_component(ids, component)
        }
        EventAction::EnableController { controller: id, .. }
        | EventAction::GrantHeat { unit: id, .. }
        | EventAction::AcknowledgeMoreHeat { unit: id, .. }
        | EventAction::ForceOpen { controller: id }
        | EventAction::ForceClose { controller: id }
        | EventAction::RequestPosition { controller: id, .. }
        | EventAction::UpsertBreakpoint { controller: id, .. } => ids.controller(id, context),
        EventAction::Override { target, .. } | EventAction::OverrideValue { target, .. } => {
            ids.either(target, context)
        }
    }
}

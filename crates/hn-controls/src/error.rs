//! Error types for the control layer.

use thiserror::Error;

/// Raised by the atomic configuration step of a controller. Any of these
/// discards the whole bound set for that controller instance.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Length mismatch: {field} has {found} entries, expected {expected}")]
    LengthMismatch {
        field: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("Component not found: {id}")]
    NotFound { id: String },

    #[error("Component {id} is not a {expected}")]
    WrongKind { id: String, expected: &'static str },

    #[error("Unit {id} does not provide {expected}")]
    WrongCapability { id: String, expected: &'static str },

    #[error("Duplicate id: {id} in {context}")]
    DuplicateId { id: String, context: &'static str },

    #[error("Sensor {id} is used for both activation and deactivation")]
    SensorOverlap { id: String },

    #[error("Invalid breakpoint '{token}': {reason}")]
    InvalidBreakpoint { token: String, reason: &'static str },

    #[error("Duplicate breakpoint temperature: {temperature}")]
    DuplicateBreakpoint { temperature: i32 },

    #[error("Unknown timer mode: {name}")]
    UnknownTimerMode { name: String },

    #[error("Unknown timer: {name}")]
    UnknownTimer { name: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue {
        field: &'static str,
        reason: String,
    },
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ControlError {
    #[error("Invalid argument: {what}")]
    InvalidArg { what: &'static str },

    #[error("Component not found: {id}")]
    NotFound { id: String },

    #[error("Write rejected by {id}: {reason}")]
    WriteRejected { id: String, reason: String },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type ControlResult<T> = Result<T, ControlError>;
pub type ConfigResult<T> = Result<T, ConfigError>;

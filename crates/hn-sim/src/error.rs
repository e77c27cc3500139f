//! Error types for site simulation.

use hn_controls::{ConfigError, ControlError};
use hn_project::ValidationError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SimError {
    #[error("Invalid argument: {what}")]
    InvalidArg { what: &'static str },

    #[error("Unknown component: {id}")]
    UnknownComponent { id: String },

    #[error("Unknown controller: {id}")]
    UnknownController { id: String },

    #[error("Duplicate controller: {id}")]
    DuplicateController { id: String },

    #[error("Duplicate component: {id}")]
    DuplicateComponent { id: String },

    #[error("{id} is not a {expected}")]
    WrongKind { id: String, expected: &'static str },

    #[error("Invalid site: {0}")]
    Validation(#[from] ValidationError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Control error: {0}")]
    Control(#[from] ControlError),
}

pub type SimResult<T> = Result<T, SimError>;

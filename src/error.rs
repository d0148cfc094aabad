//! Error types for the contact wizard
//!
//! Validation failures are never errors: they come back as
//! [`NavOutcome::Blocked`](crate::engine::NavOutcome) or
//! [`SubmitOutcome::Invalid`](crate::engine::SubmitOutcome). Errors here are
//! for misconfiguration, misuse of the sequencer, and failing collaborators.

use thiserror::Error;

use crate::definition::ValidationError;
use crate::draft::DraftStoreError;
use crate::services::ServiceError;
use crate::types::{ContactRef, SlotId};

/// Main error type for form sessions
#[derive(Error, Debug)]
pub enum FormError {
    #[error("Unknown form: {0}")]
    UnknownForm(String),

    #[error("Unknown slot: {0}")]
    UnknownSlot(SlotId),

    #[error("Slot {slot} has no field '{field}'")]
    UnknownField { slot: SlotId, field: String },

    #[error("Field '{field}' on slot {slot} is not editable")]
    FieldNotEditable { slot: SlotId, field: String },

    #[error("Slot {0} does not allow creating a new contact")]
    CreateNotAllowed(SlotId),

    #[error("Slot {0} does not let the user choose a contact")]
    NotSelectable(SlotId),

    #[error("Contact {0} not found")]
    ContactNotFound(ContactRef),

    #[error("Invalid navigation: {0}")]
    InvalidNavigation(String),

    #[error("Session already submitted")]
    AlreadySubmitted,

    #[error("Invalid form definition: {0}")]
    Definition(#[from] DefinitionError),

    #[error("Contact service error: {0}")]
    Service(#[from] ServiceError),

    #[error("Draft store error: {0}")]
    Draft(#[from] DraftStoreError),
}

/// A form definition failed structural validation
#[derive(Error, Debug)]
pub enum DefinitionError {
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{} validation error(s): {}", .0.len(), join_errors(.0))]
    Invalid(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Engine configuration could not be loaded
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

pub type Result<T, E = FormError> = std::result::Result<T, E>;

//! Engine error types

use readout_core::{EventId, NameError, PredicateId};
use readout_predicate::{CheckError, ParseError};
use thiserror::Error;

/// Errors surfaced by engine registration, lookup, and lifecycle
/// operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Name(#[from] NameError),

    #[error("name '{0}' is already registered")]
    DuplicateName(String),

    #[error("readout '{0}' is not registered")]
    ReadoutNotFound(String),

    #[error("readout '{0}' has never been updated")]
    NeverUpdated(String),

    #[error("state machine '{0}' is not registered")]
    MachineNotFound(String),

    #[error("event '{0}' is not registered")]
    EventNotFound(String),

    #[error("no event registered under id {0}")]
    EventIdNotFound(EventId),

    #[error("no predicate registered under id {0}")]
    PredicateNotFound(PredicateId),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Check(#[from] CheckError),

    #[error("expected a state transition condition: '{0}'")]
    NotATransition(String),

    #[error("at least one condition is required")]
    NoConditions,

    #[error("engine has already run and cannot be started again")]
    AlreadyFinished,
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

//! Core types for the readout automation engine
//!
//! This crate provides the fundamental types shared by the predicate
//! language and the engine: the `Value` literal/reading type, ULID-backed
//! id newtypes, the `StateMachine` record, and name validation.

mod ids;
mod machine;
mod name;
mod value;

pub use ids::{AgentId, EventId, PredicateId, ReadoutId};
pub use machine::{StateMachine, INIT_STATE};
pub use name::{validate_name, NameError};
pub use value::Value;

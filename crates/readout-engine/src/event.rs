//! Events and their handlers

use crate::engine::Engine;
use async_trait::async_trait;
use readout_core::{EventId, PredicateId};

/// A named event, fired whenever its predicate becomes satisfied.
#[derive(Debug, Clone)]
pub struct Event {
    pub id: EventId,
    pub name: String,
    pub predicate: PredicateId,
}

impl Event {
    pub fn new(name: impl Into<String>, predicate: PredicateId) -> Self {
        Self {
            id: EventId::new(),
            name: name.into(),
            predicate,
        }
    }
}

/// A reaction to an event.
///
/// Handlers run concurrently within a dispatch batch and receive a shared
/// engine reference, so they may read values, fire further transitions via
/// [`Engine::set_machine_state`], or inspect machines. A handler error is
/// logged and does not affect other handlers.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, event: &Event, engine: &Engine) -> anyhow::Result<()>;
}

//! Named state machine record

/// The reserved state every machine starts in.
pub const INIT_STATE: &str = "init";

/// A named state machine with a current state and, transiently, the state
/// it is transitioning out of.
///
/// `from_state` is `Some` only while transition-triggered predicate
/// evaluation is in flight; the engine clears it as soon as that
/// evaluation finishes, even when evaluation fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateMachine {
    pub name: String,
    pub state: String,
    pub from_state: Option<String>,
}

impl StateMachine {
    /// Create a machine in the reserved `"init"` state.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: INIT_STATE.to_string(),
            from_state: None,
        }
    }

    /// Whether the machine is currently in the given state.
    pub fn is_in(&self, state: &str) -> bool {
        self.state == state
    }

    /// Whether a transition is currently in flight.
    pub fn in_transition(&self) -> bool {
        self.from_state.is_some()
    }
}

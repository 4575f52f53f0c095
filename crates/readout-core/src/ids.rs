//! ULID-backed id newtypes for engine registries

use std::fmt;
use ulid::Ulid;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(Ulid);

        impl $name {
            /// Generate a fresh unique id.
            pub fn new() -> Self {
                Self(Ulid::new())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_id!(
    /// Unique id of a registered readout.
    ReadoutId
);
define_id!(
    /// Unique id of a registered predicate.
    PredicateId
);
define_id!(
    /// Unique id of a registered event.
    EventId
);
define_id!(
    /// Unique id of a registered agent.
    AgentId
);

//! A framework for detecting changes and reacting to them
//!
//! The engine periodically polls named value sources ("readouts"),
//! evaluates registered predicates against their values and against named
//! state machines, and dispatches events to registered handlers when
//! predicates become true. Agents are periodic side-effecting units that
//! run on their own schedule, independent of predicate matching.
//!
//! All registration happens before [`Engine::run`]; the engine then owns
//! every registry and drives a single scheduling loop in which each batch
//! of readout updates, predicate checks, and handler invocations runs
//! concurrently and joins before the loop proceeds.
//!
//! ```rust,no_run
//! use readout_engine::{Engine, Event, Handler};
//! use async_trait::async_trait;
//! use std::time::Duration;
//!
//! struct Announce;
//!
//! #[async_trait]
//! impl Handler for Announce {
//!     async fn handle(&self, event: &Event, _engine: &Engine) -> anyhow::Result<()> {
//!         println!("fired: {}", event.name);
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut engine = Engine::new("demo");
//!     engine.add_gauge("cpu_temp", Duration::from_secs(10), || async { Ok(42) })?;
//!     engine.when(&["cpu_temp > 80"], "cpu_hot", Announce)?;
//!     engine.run().await?;
//!     Ok(())
//! }
//! ```

mod agent;
mod engine;
mod error;
mod event;
mod readout;
mod schedule;
mod sh;

pub use agent::{Agent, AgentTask};
pub use engine::{Deadline, Engine, RunState, ShutdownHandle};
pub use error::{EngineError, EngineResult};
pub use event::{Event, Handler};
pub use readout::{Fetch, FnSource, Readout, DEFAULT_SOURCE_TIMEOUT};
pub use schedule::Scheduled;
pub use sh::{sh, sh_with_stderr};

pub use readout_core::{StateMachine, Value, INIT_STATE};
pub use readout_predicate::Predicate;

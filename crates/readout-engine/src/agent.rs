//! Periodic agents

use crate::engine::Engine;
use crate::schedule::Scheduled;
use async_trait::async_trait;
use readout_core::AgentId;
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

/// A periodic unit of work with access to the engine.
///
/// Unlike handlers, agents are not tied to any predicate; the engine runs
/// each agent on its own period. Agents may read values and drive state
/// machines through the engine reference they are given.
#[async_trait]
pub trait AgentTask: Send + Sync {
    async fn run(&mut self, engine: &Engine) -> anyhow::Result<()>;
}

/// A registered agent: a task with a schedule.
pub struct Agent {
    id: AgentId,
    label: String,
    period: Duration,
    last_update: Option<Instant>,
    task: Box<dyn AgentTask>,
}

impl Agent {
    pub fn new(label: impl Into<String>, period: Duration, task: impl AgentTask + 'static) -> Self {
        Self {
            id: AgentId::new(),
            label: label.into(),
            period,
            last_update: None,
            task: Box::new(task),
        }
    }

    pub fn id(&self) -> AgentId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Run the agent's task. A failure is logged; the schedule advances
    /// either way.
    pub(crate) async fn update(&mut self, engine: &Engine) {
        self.last_update = Some(Instant::now());
        if let Err(err) = self.task.run(engine).await {
            warn!(agent = %self.label, error = %err, "agent failed");
        }
    }
}

impl Scheduled for Agent {
    fn period(&self) -> Duration {
        self.period
    }

    fn last_update(&self) -> Option<Instant> {
        self.last_update
    }
}

//! Demo automation loop: watches the local process count, drives a
//! "load" state machine across a threshold, and announces transitions.
//!
//! Run with `RUST_LOG=debug` to watch readout updates and predicate
//! evaluation; Ctrl-C shuts the loop down.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use readout_engine::{sh, AgentTask, Engine, Event, Handler};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

const TASK_COUNT_THRESHOLD: i64 = 500;

/// Moves the load machine into a fixed state.
struct SetLoad(&'static str);

#[async_trait]
impl Handler for SetLoad {
    async fn handle(&self, _event: &Event, engine: &Engine) -> Result<()> {
        engine.set_machine_state("load", self.0).await?;
        Ok(())
    }
}

/// Announces a transition along with the value that caused it.
struct AnnounceLoad;

#[async_trait]
impl Handler for AnnounceLoad {
    async fn handle(&self, _event: &Event, engine: &Engine) -> Result<()> {
        let tasks = engine.read("task_count")?;
        let load = engine.machine_state("load")?;
        info!(%tasks, %load, "load changed");
        Ok(())
    }
}

/// Logs a periodic snapshot of the system.
struct Heartbeat;

#[async_trait]
impl AgentTask for Heartbeat {
    async fn run(&mut self, engine: &Engine) -> Result<()> {
        let tasks = engine.read("task_count")?;
        let minute = engine.read("utc_minute")?;
        info!(%tasks, %minute, "heartbeat");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut engine = Engine::new("demo");

    engine.add_gauge("task_count", Duration::from_secs(2), || async {
        let out = sh("ps ax | wc -l", Duration::from_secs(5)).await?;
        Ok(out.trim().parse()?)
    })?;

    engine.add_sensor("utc_minute", Duration::from_secs(10), || async {
        Ok(Utc::now().format("%M").to_string())
    })?;

    engine.add_state_machine("load")?;
    let high = format!("task_count > {TASK_COUNT_THRESHOLD}");
    let normal = format!("task_count <= {TASK_COUNT_THRESHOLD}");
    engine.when(&[high.as_str()], "high_task_count", SetLoad("busy"))?;
    engine.when(&[normal.as_str()], "normal_task_count", SetLoad("calm"))?;
    engine.on_transition("load@calm -> busy", AnnounceLoad)?;
    engine.on_transition("load@busy -> calm", AnnounceLoad)?;

    engine.add_agent("heartbeat", Duration::from_secs(30), Heartbeat);

    engine.run().await?;
    Ok(())
}

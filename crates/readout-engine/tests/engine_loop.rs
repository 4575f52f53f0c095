//! Scheduling-loop behavior, driven on virtual time.

use async_trait::async_trait;
use readout_core::Value;
use readout_engine::{AgentTask, Engine, EngineError, Event, Handler};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct Count(Arc<AtomicUsize>);

#[async_trait]
impl Handler for Count {
    async fn handle(&self, _event: &Event, _engine: &Engine) -> anyhow::Result<()> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Gauge source that walks a fixed sequence, then fails when exhausted.
fn sequence(values: Vec<i64>) -> impl FnMut() -> futures::future::Ready<anyhow::Result<i64>> + Send + Sync
{
    let mut iter = values.into_iter();
    move || {
        futures::future::ready(
            iter.next()
                .ok_or_else(|| anyhow::anyhow!("sequence exhausted")),
        )
    }
}

/// Gauge source that counts how often it is polled and returns the count.
fn polled(counter: Arc<AtomicUsize>) -> impl FnMut() -> futures::future::Ready<anyhow::Result<i64>> + Send + Sync
{
    move || {
        let n = counter.fetch_add(1, Ordering::SeqCst) as i64;
        futures::future::ready(Ok(n))
    }
}

#[tokio::test(start_paused = true)]
async fn test_threshold_fires_once_per_becoming_true() {
    let mut engine = Engine::new("seq");
    let fired = Arc::new(AtomicUsize::new(0));
    engine
        .add_gauge("temp", Duration::from_secs(1), sequence(vec![10, 95, 95, 10]))
        .unwrap();
    engine
        .when(&["temp > 90"], "hot", Count(fired.clone()))
        .unwrap();

    for _ in 0..4 {
        engine.step().await;
        tokio::time::advance(Duration::from_secs(1)).await;
    }

    // Fires on 10 -> 95; the repeated 95 is not a change, and 95 -> 10
    // changes the value but leaves the predicate unsatisfied.
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert_eq!(engine.read("temp").unwrap(), Value::Int(10));
}

#[tokio::test(start_paused = true)]
async fn test_shared_predicate_fires_all_its_events() {
    let mut engine = Engine::new("dedup");
    let first = Arc::new(AtomicUsize::new(0));
    let second = Arc::new(AtomicUsize::new(0));
    engine
        .add_gauge("x", Duration::from_secs(1), sequence(vec![10]))
        .unwrap();
    engine.when(&["x > 5"], "first", Count(first.clone())).unwrap();
    engine
        .when(&["  x  >  5 "], "second", Count(second.clone()))
        .unwrap();
    assert_eq!(engine.predicate_count(), 1);

    engine.step().await;

    assert_eq!(first.load(Ordering::SeqCst), 1);
    assert_eq!(second.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_readouts_poll_at_their_own_periods() {
    let mut engine = Engine::new("fairness");
    let fast_polls = Arc::new(AtomicUsize::new(0));
    let slow_polls = Arc::new(AtomicUsize::new(0));
    engine
        .add_gauge("fast", Duration::from_secs(1), polled(fast_polls.clone()))
        .unwrap();
    engine
        .add_gauge("slow", Duration::from_secs(3), polled(slow_polls.clone()))
        .unwrap();

    let handle = engine.shutdown_handle();
    let task = tokio::spawn(async move {
        engine.run().await.unwrap();
        engine
    });

    tokio::time::sleep(Duration::from_millis(5200)).await;
    handle.request();
    let engine = task.await.unwrap();

    // Fast polls at t = 0..=5, slow at t = 0 and t = 3.
    assert_eq!(fast_polls.load(Ordering::SeqCst), 6);
    assert_eq!(slow_polls.load(Ordering::SeqCst), 2);
    assert!(engine.read("fast").is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_failing_source_does_not_stall_the_loop() {
    let mut engine = Engine::new("faults");
    let fired = Arc::new(AtomicUsize::new(0));
    engine
        .add_gauge("broken", Duration::from_secs(1), || {
            futures::future::ready(Err(anyhow::anyhow!("boom")))
        })
        .unwrap();
    engine
        .add_gauge("good", Duration::from_secs(1), sequence(vec![1, 2, 3]))
        .unwrap();
    engine
        .when(&["good > 0"], "alive", Count(fired.clone()))
        .unwrap();

    for _ in 0..3 {
        engine.step().await;
        tokio::time::advance(Duration::from_secs(1)).await;
    }

    // 1 -> 2 -> 3 are all changes satisfying the predicate.
    assert_eq!(fired.load(Ordering::SeqCst), 3);
    assert!(matches!(
        engine.read("broken"),
        Err(EngineError::NeverUpdated(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_check_error_counts_as_unsatisfied_for_the_cycle() {
    let mut engine = Engine::new("partial");
    let fired = Arc::new(AtomicUsize::new(0));
    engine
        .add_gauge("good", Duration::from_secs(1), sequence(vec![1, 2, 3]))
        .unwrap();
    engine
        .add_gauge("broken", Duration::from_secs(1), || {
            futures::future::ready(Err(anyhow::anyhow!("boom")))
        })
        .unwrap();
    engine
        .when(&["good > 0", "broken > 0"], "both_up", Count(fired.clone()))
        .unwrap();

    for _ in 0..3 {
        engine.step().await;
        tokio::time::advance(Duration::from_secs(1)).await;
    }

    // "broken" never produced a value, so every compound check errors;
    // the event stays silent while the loop keeps stepping.
    assert_eq!(fired.load(Ordering::SeqCst), 0);
    assert_eq!(engine.read("good").unwrap(), Value::Int(3));
}

#[tokio::test(start_paused = true)]
async fn test_failing_agent_keeps_its_schedule() {
    struct Flaky(Arc<AtomicUsize>);

    #[async_trait]
    impl AgentTask for Flaky {
        async fn run(&mut self, _engine: &Engine) -> anyhow::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("agent broke")
        }
    }

    let mut engine = Engine::new("flaky");
    let attempts = Arc::new(AtomicUsize::new(0));
    engine.add_agent("flaky", Duration::from_secs(1), Flaky(attempts.clone()));

    for _ in 0..3 {
        engine.step().await;
        tokio::time::advance(Duration::from_secs(1)).await;
    }

    // Each failure is logged and the agent is retried on its period,
    // not in a tight loop and not dropped.
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_agents_run_on_their_period() {
    struct Beat(Arc<AtomicUsize>);

    #[async_trait]
    impl AgentTask for Beat {
        async fn run(&mut self, _engine: &Engine) -> anyhow::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    let mut engine = Engine::new("agents");
    let beats = Arc::new(AtomicUsize::new(0));
    engine.add_agent("heartbeat", Duration::from_secs(2), Beat(beats.clone()));

    let handle = engine.shutdown_handle();
    let task = tokio::spawn(async move {
        engine.run().await.unwrap();
    });

    tokio::time::sleep(Duration::from_millis(5200)).await;
    handle.request();
    task.await.unwrap();

    // Runs at t = 0, 2, 4.
    assert_eq!(beats.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_handler_drives_a_state_machine() {
    struct SetBusy;

    #[async_trait]
    impl Handler for SetBusy {
        async fn handle(&self, _event: &Event, engine: &Engine) -> anyhow::Result<()> {
            engine.set_machine_state("status", "busy").await?;
            Ok(())
        }
    }

    let mut engine = Engine::new("cascade");
    let went_busy = Arc::new(AtomicUsize::new(0));
    engine
        .add_gauge("load", Duration::from_secs(1), sequence(vec![10, 95]))
        .unwrap();
    engine.when(&["load > 90"], "overload", SetBusy).unwrap();
    engine
        .on_transition("status@init -> busy", Count(went_busy.clone()))
        .unwrap();

    engine.step().await;
    assert_eq!(engine.machine_state("status").unwrap(), "init");

    tokio::time::advance(Duration::from_secs(1)).await;
    engine.step().await;

    assert_eq!(went_busy.load(Ordering::SeqCst), 1);
    assert_eq!(engine.machine_state("status").unwrap(), "busy");
    assert_eq!(engine.machine("status").unwrap().from_state, None);
}

#[tokio::test(start_paused = true)]
async fn test_empty_engine_shuts_down_and_cannot_restart() {
    let mut engine = Engine::new("idle");
    engine.run().await.unwrap();
    assert!(matches!(
        engine.run().await,
        Err(EngineError::AlreadyFinished)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_handle_stops_a_running_engine() {
    let mut engine = Engine::new("stoppable");
    engine
        .add_gauge("tick", Duration::from_secs(1), polled(Arc::default()))
        .unwrap();

    let handle = engine.shutdown_handle();
    let task = tokio::spawn(async move { engine.run().await });

    tokio::time::sleep(Duration::from_millis(100)).await;
    handle.request();
    task.await.unwrap().unwrap();
}

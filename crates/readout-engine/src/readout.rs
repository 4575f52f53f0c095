//! Polled value sources

use crate::error::{EngineError, EngineResult};
use crate::schedule::Scheduled;
use async_trait::async_trait;
use readout_core::{ReadoutId, Value};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// How long a source fetch may take before the update is abandoned.
pub const DEFAULT_SOURCE_TIMEOUT: Duration = Duration::from_secs(10);

/// A source of values for a readout.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&mut self) -> anyhow::Result<Value>;
}

/// Adapts a plain async closure into a [`Fetch`] source.
pub struct FnSource<F>(pub F);

#[async_trait]
impl<F, Fut> Fetch for FnSource<F>
where
    F: FnMut() -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    async fn fetch(&mut self) -> anyhow::Result<Value> {
        (self.0)().await
    }
}

/// A named, periodically polled value.
///
/// A readout remembers the last value its source produced. A fetch that
/// fails or times out is logged and leaves the previous value in place;
/// the schedule still advances, so a flaky source is retried on its next
/// period rather than in a tight loop.
pub struct Readout {
    id: ReadoutId,
    name: String,
    period: Duration,
    timeout: Duration,
    last_update: Option<Instant>,
    value: Option<Value>,
    source: Box<dyn Fetch>,
}

impl Readout {
    pub fn new(name: impl Into<String>, period: Duration, source: impl Fetch + 'static) -> Self {
        Self {
            id: ReadoutId::new(),
            name: name.into(),
            period,
            timeout: DEFAULT_SOURCE_TIMEOUT,
            last_update: None,
            value: None,
            source: Box::new(source),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn id(&self) -> ReadoutId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The most recent value, if the readout has ever produced one.
    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    /// The most recent value, or an error if the readout has never been
    /// successfully updated.
    pub fn read(&self) -> EngineResult<&Value> {
        self.value
            .as_ref()
            .ok_or_else(|| EngineError::NeverUpdated(self.name.clone()))
    }

    /// Fetch a fresh value from the source. Returns whether the stored
    /// value changed.
    pub async fn update(&mut self) -> bool {
        self.last_update = Some(Instant::now());
        match tokio::time::timeout(self.timeout, self.source.fetch()).await {
            Ok(Ok(new)) => {
                let changed = self.value.as_ref() != Some(&new);
                if changed {
                    debug!(readout = %self.name, value = %new, "readout changed");
                }
                self.value = Some(new);
                changed
            }
            Ok(Err(err)) => {
                warn!(readout = %self.name, error = %err, "readout source failed");
                false
            }
            Err(_) => {
                warn!(readout = %self.name, timeout = ?self.timeout, "readout source timed out");
                false
            }
        }
    }
}

impl Scheduled for Readout {
    fn period(&self) -> Duration {
        self.period
    }

    fn last_update(&self) -> Option<Instant> {
        self.last_update
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counting_source(values: Vec<i64>) -> impl Fetch {
        let mut iter = values.into_iter();
        FnSource(move || {
            let next = iter.next();
            async move {
                next.map(Value::Int)
                    .ok_or_else(|| anyhow::anyhow!("source exhausted"))
            }
        })
    }

    #[tokio::test]
    async fn test_update_reports_changes() {
        let mut readout = Readout::new("load", Duration::from_secs(1), counting_source(vec![1, 1, 2]));
        assert!(readout.update().await);
        assert!(!readout.update().await);
        assert!(readout.update().await);
        assert_eq!(readout.value(), Some(&Value::Int(2)));
    }

    #[tokio::test]
    async fn test_failing_source_keeps_old_value() {
        let mut readout = Readout::new("load", Duration::from_secs(1), counting_source(vec![7]));
        assert!(readout.update().await);
        assert!(!readout.update().await);
        assert_eq!(readout.value(), Some(&Value::Int(7)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_source_times_out() {
        let source = FnSource(|| async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Value::Int(1))
        });
        let mut readout = Readout::new("slow", Duration::from_secs(1), source)
            .with_timeout(Duration::from_millis(50));
        assert!(!readout.update().await);
        assert_eq!(readout.value(), None);
    }

    #[tokio::test]
    async fn test_read_before_update_fails() {
        let readout = Readout::new("load", Duration::from_secs(1), counting_source(vec![]));
        assert!(matches!(readout.read(), Err(EngineError::NeverUpdated(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_advances_schedule_even_on_failure() {
        let mut readout = Readout::new("load", Duration::from_secs(5), counting_source(vec![]));
        assert!(readout.is_due(Instant::now()));
        readout.update().await;
        assert!(!readout.is_due(Instant::now()));
    }
}

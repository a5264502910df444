//! Metric sinks.
//!
//! This module provides:
//! - `InfluxSink`: line protocol over the InfluxDB v2 write API
//! - `PrometheusSink`: text exposition pushed to a Pushgateway
//! - `EmailSink`: one alert digest per cycle over SMTP
//! - `Dispatcher`: runs every sink on the same batch, isolating failures

pub mod email;
pub mod influx;
pub mod prometheus;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{info, warn};

use crate::error::SinkDispatchError;
use crate::models::{Alert, MetricRecord, SinkResult};

pub use email::{EmailSink, Notifier, SmtpNotifier};
pub use influx::InfluxSink;
pub use prometheus::PrometheusSink;

/// Attempts per write, including the first
const MAX_WRITE_ATTEMPTS: u32 = 3;

const INITIAL_BACKOFF_MS: u64 = 1000;

/// What a cycle hands to the sinks
#[derive(Debug, Clone, Default)]
pub struct DispatchBatch {
    pub records: Vec<MetricRecord>,
    pub alerts: Vec<Alert>,
}

impl DispatchBatch {
    pub fn new(records: Vec<MetricRecord>, alerts: Vec<Alert>) -> Self {
        Self { records, alerts }
    }
}

#[async_trait]
pub trait Sink: Send + Sync {
    fn name(&self) -> &'static str;

    /// Deliver the batch; returns how many records or messages went out
    async fn send(&self, batch: &DispatchBatch) -> Result<usize, SinkDispatchError>;

    /// Human-readable rendering of what `send` would deliver, for dry runs
    fn preview(&self, batch: &DispatchBatch) -> String;
}

/// Fans a batch out to every registered sink
#[derive(Default)]
pub struct Dispatcher {
    sinks: Vec<Box<dyn Sink>>,
}

impl Dispatcher {
    pub fn new(sinks: Vec<Box<dyn Sink>>) -> Self {
        Self { sinks }
    }

    pub fn sink_names(&self) -> Vec<&'static str> {
        self.sinks.iter().map(|s| s.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// Send `batch` to every sink concurrently. Results follow registration
    /// order; one sink failing never stops the others.
    pub async fn dispatch(&self, batch: &DispatchBatch) -> Vec<SinkResult> {
        let sends = self.sinks.iter().map(|sink| async move {
            match sink.send(batch).await {
                Ok(count) => {
                    info!(sink = sink.name(), count, "Dispatched");
                    SinkResult::delivered(sink.name(), count)
                }
                Err(e) => {
                    warn!(sink = sink.name(), error = %e, "Dispatch failed");
                    SinkResult::failed(sink.name(), e)
                }
            }
        });
        join_all(sends).await
    }

    /// Render what each sink would receive
    pub fn preview(&self, batch: &DispatchBatch) -> Vec<(&'static str, String)> {
        self.sinks
            .iter()
            .map(|sink| (sink.name(), sink.preview(batch)))
            .collect()
    }
}

/// Run `op` until it succeeds, fails permanently, or runs out of attempts,
/// doubling the wait after each transient failure
pub(crate) async fn with_retry<F, Fut>(sink: &'static str, mut op: F) -> Result<(), SinkDispatchError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), SinkDispatchError>>,
{
    let mut attempt = 1;
    let mut backoff_ms = INITIAL_BACKOFF_MS;

    loop {
        match op().await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_transient() && attempt < MAX_WRITE_ATTEMPTS => {
                warn!(sink, attempt, backoff_ms, error = %e, "Write failed, retrying");
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                attempt += 1;
                backoff_ms *= 2;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Map a non-2xx response to `Rejected`, keeping a truncated body
pub(crate) async fn check_status(response: reqwest::Response) -> Result<(), SinkDispatchError> {
    let status = response.status();
    if status.is_success() {
        Ok(())
    } else {
        let body = response.text().await.unwrap_or_default();
        Err(SinkDispatchError::from_status(status, &body))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use chrono::Utc;

    use super::*;
    use crate::models::{SinkOutcome, SourceKind};

    /// Sink that counts calls and optionally fails
    pub(crate) struct RecordingSink {
        pub name: &'static str,
        pub fail: bool,
        pub calls: Arc<AtomicUsize>,
        pub alerts_seen: Arc<AtomicUsize>,
    }

    impl RecordingSink {
        pub(crate) fn new(name: &'static str, fail: bool) -> Self {
            Self {
                name,
                fail,
                calls: Arc::new(AtomicUsize::new(0)),
                alerts_seen: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl Sink for RecordingSink {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn send(&self, batch: &DispatchBatch) -> Result<usize, SinkDispatchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.alerts_seen.fetch_add(batch.alerts.len(), Ordering::SeqCst);
            if self.fail {
                Err(SinkDispatchError::Rejected {
                    status: 503,
                    body: "unavailable".to_string(),
                })
            } else {
                Ok(batch.records.len())
            }
        }

        fn preview(&self, batch: &DispatchBatch) -> String {
            format!("{} records", batch.records.len())
        }
    }

    fn batch() -> DispatchBatch {
        let now = Utc::now();
        DispatchBatch::new(
            vec![
                MetricRecord::count(SourceKind::Github, "octo/a", "stars", 1, now),
                MetricRecord::count(SourceKind::Github, "octo/b", "stars", 2, now),
            ],
            Vec::new(),
        )
    }

    #[tokio::test]
    async fn test_failure_isolated_per_sink() {
        let ok = RecordingSink::new("a", false);
        let failing = RecordingSink::new("b", true);
        let (ok_calls, failing_calls) = (ok.calls.clone(), failing.calls.clone());
        let dispatcher = Dispatcher::new(vec![Box::new(ok), Box::new(failing)]);

        let results = dispatcher.dispatch(&batch()).await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].sink, "a");
        assert!(matches!(results[0].outcome, SinkOutcome::Delivered(2)));
        assert_eq!(results[1].sink, "b");
        assert!(!results[1].is_success());
        assert!(results[1].error().is_some());
        assert_eq!(ok_calls.load(Ordering::SeqCst), 1);
        assert_eq!(failing_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failing_first_sink_still_runs_rest() {
        let failing = RecordingSink::new("first", true);
        let ok = RecordingSink::new("second", false);
        let ok_calls = ok.calls.clone();
        let dispatcher = Dispatcher::new(vec![Box::new(failing), Box::new(ok)]);

        let results = dispatcher.dispatch(&batch()).await;
        assert!(!results[0].is_success());
        assert!(results[1].is_success());
        assert_eq!(ok_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_stops_on_permanent_error() {
        let attempts = AtomicUsize::new(0);
        let counter = &attempts;
        let result = with_retry("test", || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(SinkDispatchError::Rejected {
                status: 400,
                body: "bad line".to_string(),
            })
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_transient_until_success() {
        let attempts = AtomicUsize::new(0);
        let counter = &attempts;
        let result = with_retry("test", || async move {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(SinkDispatchError::Rejected {
                    status: 503,
                    body: String::new(),
                })
            } else {
                Ok(())
            }
        })
        .await;
        assert!(result.is_ok());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_gives_up_after_three_attempts() {
        let attempts = AtomicUsize::new(0);
        let counter = &attempts;
        let result = with_retry("test", || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(SinkDispatchError::Rejected {
                status: 500,
                body: String::new(),
            })
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), MAX_WRITE_ATTEMPTS as usize);
    }

    #[tokio::test]
    async fn test_empty_dispatcher() {
        let dispatcher = Dispatcher::default();
        assert!(dispatcher.is_empty());
        assert!(dispatcher.dispatch(&batch()).await.is_empty());
    }
}

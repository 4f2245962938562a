//! # Periodic Harvest
//!
//! Drives the consumer side of the collector: on every tick the queue is
//! harvested and handed to an [`ErrorSink`]. A batch the sink fails to
//! deliver is kept and passed back into the next harvest, so a failed
//! delivery never loses errors.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{error, info, warn};
use crate::collector::ErrorCollector;
use crate::config::CollectorConfig;
use crate::monitoring;
use crate::record::ErrorRecord;
use crate::types::Result;

/// Shortest interval the loop will tick at
pub const MIN_HARVEST_INTERVAL: Duration = Duration::from_secs(1);

/// Destination for harvested errors
#[async_trait]
pub trait ErrorSink: Send + Sync {
    /// Delivers one harvested batch; an error means the whole batch is
    /// retried on the next harvest.
    async fn deliver(&self, errors: &[ErrorRecord]) -> Result<()>;
}

#[async_trait]
impl<S> ErrorSink for Arc<S>
where
    S: ErrorSink + ?Sized,
{
    async fn deliver(&self, errors: &[ErrorRecord]) -> Result<()> {
        self.as_ref().deliver(errors).await
    }
}

/// Sink that writes every harvested error to the tracing subscriber
#[derive(Debug, Clone, Default)]
pub struct LogSink {
    include_payload: bool,
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also logs the full JSON form of each record
    pub fn with_payload(mut self) -> Self {
        self.include_payload = true;
        self
    }
}

#[async_trait]
impl ErrorSink for LogSink {
    async fn deliver(&self, errors: &[ErrorRecord]) -> Result<()> {
        for record in errors {
            let payload = if self.include_payload {
                Some(serde_json::to_string(record)?)
            } else {
                None
            };

            error!(
                error_id = %record.id,
                exception_class = %record.exception_class,
                path = %record.path,
                request_uri = ?record.params.request_uri,
                message = %record.message,
                timestamp = %record.timestamp,
                payload = ?payload,
                "Harvested error"
            );
        }
        Ok(())
    }
}

/// Sink that keeps every delivered record in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    delivered: Mutex<Vec<ErrorRecord>>,
    batches: Mutex<usize>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All records delivered so far, in delivery order
    pub fn delivered(&self) -> Vec<ErrorRecord> {
        self.delivered.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Number of batches delivered so far
    pub fn batches(&self) -> usize {
        *self.batches.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ErrorSink for MemorySink {
    async fn deliver(&self, errors: &[ErrorRecord]) -> Result<()> {
        self.delivered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(errors);
        *self.batches.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        Ok(())
    }
}

/// Periodically harvests a collector into a sink, carrying failed batches
/// over to the next cycle
pub struct HarvestLoop<S> {
    collector: Arc<ErrorCollector>,
    sink: S,
    interval: Duration,
    carry_over: Vec<ErrorRecord>,
    carry_over_limit: usize,
}

impl<S: ErrorSink> HarvestLoop<S> {
    /// Creates a loop that harvests every `interval`; a zero interval is
    /// raised to `MIN_HARVEST_INTERVAL`.
    pub fn new(collector: Arc<ErrorCollector>, sink: S, interval: Duration) -> Self {
        let carry_over_limit = CollectorConfig::default().carry_over_factor * collector.max_queue_length();
        Self {
            collector,
            sink,
            interval: interval.max(MIN_HARVEST_INTERVAL),
            carry_over: Vec::new(),
            carry_over_limit,
        }
    }

    /// Creates a loop using the interval and carry-over bound from `config`
    ///
    /// Fails if `config` does not pass [`CollectorConfig::validate`].
    pub fn from_config(collector: Arc<ErrorCollector>, sink: S, config: &CollectorConfig) -> Result<Self> {
        config.validate()?;

        let mut harvest = Self::new(collector, sink, Duration::from_secs(config.harvest_interval_secs));
        harvest.carry_over_limit = config.carry_over_limit();
        Ok(harvest)
    }

    /// Time between harvests
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Records waiting to be redelivered
    pub fn pending(&self) -> &[ErrorRecord] {
        &self.carry_over
    }

    /// Harvests once and delivers the batch
    ///
    /// Returns how many records were delivered. On failure the batch is
    /// kept for the next call and the delivery error is returned.
    pub async fn harvest_once(&mut self) -> Result<usize> {
        let carried = std::mem::take(&mut self.carry_over);
        let errors = self.collector.harvest_errors(Some(carried));
        if errors.is_empty() {
            return Ok(0);
        }

        match self.sink.deliver(&errors).await {
            Ok(()) => {
                info!(delivered = errors.len(), "Delivered harvested errors");
                Ok(errors.len())
            }
            Err(e) => {
                warn!(error = %e, pending = errors.len(), "Failed to deliver harvested errors, will retry");
                monitoring::record_delivery_failure(errors.len());
                self.retain(errors);
                Err(e)
            }
        }
    }

    fn retain(&mut self, mut errors: Vec<ErrorRecord>) {
        if errors.len() > self.carry_over_limit {
            let dropped = errors.len() - self.carry_over_limit;
            errors.drain(..dropped);
            warn!(dropped, limit = self.carry_over_limit, "Carry-over limit reached, dropped oldest errors");
        }
        self.carry_over = errors;
    }

    /// Runs until `shutdown` turns true or its sender is dropped, then does
    /// a final harvest. Returns whatever could not be delivered.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Vec<ErrorRecord> {
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        info!(interval_secs = self.interval.as_secs(), "Error harvest loop started");

        while !*shutdown.borrow() {
            tokio::select! {
                _ = ticker.tick() => {
                    // Failures are logged and carried over inside harvest_once.
                    let _ = self.harvest_once().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        let _ = self.harvest_once().await;
        info!(undelivered = self.carry_over.len(), "Error harvest loop stopped");
        self.carry_over
    }
}

impl<S: ErrorSink + 'static> HarvestLoop<S> {
    /// Spawns the loop onto the current tokio runtime
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<Vec<ErrorRecord>> {
        tokio::spawn(self.run(shutdown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use serde_json::Map;
    use crate::record::CapturedError;
    use crate::types::CollectorError;

    struct FailingSink;

    #[async_trait]
    impl ErrorSink for FailingSink {
        async fn deliver(&self, errors: &[ErrorRecord]) -> Result<()> {
            Err(CollectorError::delivery(errors.len(), anyhow::anyhow!("collector unavailable")))
        }
    }

    /// Fails the first delivery, then records like `MemorySink`
    #[derive(Default)]
    struct FlakySink {
        failed: AtomicBool,
        inner: MemorySink,
    }

    #[async_trait]
    impl ErrorSink for FlakySink {
        async fn deliver(&self, errors: &[ErrorRecord]) -> Result<()> {
            if !self.failed.swap(true, Ordering::SeqCst) {
                return Err(CollectorError::delivery(errors.len(), anyhow::anyhow!("timeout")));
            }
            self.inner.deliver(errors).await
        }
    }

    fn notice(collector: &ErrorCollector, path: &str) {
        collector.notice_error(path, None, Map::new(), &CapturedError::new("Exception", "message"));
    }

    #[test_log::test(tokio::test)]
    async fn test_harvest_once_delivers() {
        let collector = Arc::new(ErrorCollector::default());
        let sink = Arc::new(MemorySink::new());
        let mut harvest = HarvestLoop::new(Arc::clone(&collector), Arc::clone(&sink), Duration::from_secs(60));

        notice(&collector, "a");
        notice(&collector, "b");

        assert_eq!(harvest.harvest_once().await.unwrap(), 2);
        assert_eq!(sink.batches(), 1);
        assert!(harvest.pending().is_empty());

        // Nothing new: no empty batch is sent.
        assert_eq!(harvest.harvest_once().await.unwrap(), 0);
        assert_eq!(sink.batches(), 1);
    }

    #[test_log::test(tokio::test)]
    async fn test_failed_delivery_is_carried_over() {
        let collector = Arc::new(ErrorCollector::default());
        let sink = Arc::new(FlakySink::default());
        let mut harvest = HarvestLoop::new(Arc::clone(&collector), Arc::clone(&sink), Duration::from_secs(60));

        notice(&collector, "first");
        let err = harvest.harvest_once().await.unwrap_err();
        assert!(err.is_delivery());
        assert_eq!(harvest.pending().len(), 1);

        notice(&collector, "path");
        notice(&collector, "path");
        notice(&collector, "path");
        assert_eq!(harvest.harvest_once().await.unwrap(), 4);

        let delivered = sink.inner.delivered();
        assert_eq!(delivered.len(), 4);
        assert_eq!(delivered[0].path, "first");
        assert!(harvest.pending().is_empty());
    }

    #[tokio::test]
    async fn test_carry_over_is_bounded() {
        let collector = Arc::new(ErrorCollector::new(2));
        let config = CollectorConfig {
            max_queue_length: 2,
            carry_over_factor: 2,
            ..Default::default()
        };
        let mut harvest = HarvestLoop::from_config(Arc::clone(&collector), FailingSink, &config).unwrap();

        for round in 0..4 {
            notice(&collector, &format!("round-{}-a", round));
            notice(&collector, &format!("round-{}-b", round));
            assert!(harvest.harvest_once().await.is_err());
        }

        let paths: Vec<&str> = harvest.pending().iter().map(|err| err.path.as_str()).collect();
        assert_eq!(paths, vec!["round-2-a", "round-2-b", "round-3-a", "round-3-b"]);
    }

    #[test_log::test(tokio::test)]
    async fn test_run_final_harvest_on_shutdown() {
        let collector = Arc::new(ErrorCollector::default());
        let sink = Arc::new(MemorySink::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = HarvestLoop::new(Arc::clone(&collector), Arc::clone(&sink), Duration::from_secs(3600))
            .spawn(shutdown_rx);

        notice(&collector, "path");
        shutdown_tx.send(true).unwrap();

        let undelivered = handle.await.unwrap();
        assert!(undelivered.is_empty());
        assert_eq!(sink.delivered().len(), 1);
        assert!(collector.is_empty());
    }

    #[tokio::test]
    async fn test_run_returns_undelivered() {
        let collector = Arc::new(ErrorCollector::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        notice(&collector, "path");

        let handle = HarvestLoop::new(Arc::clone(&collector), FailingSink, Duration::from_secs(3600))
            .spawn(shutdown_rx);
        drop(shutdown_tx);

        let undelivered = handle.await.unwrap();
        assert_eq!(undelivered.len(), 1);
        assert_eq!(undelivered[0].path, "path");
    }

    #[test]
    fn test_zero_interval_config_rejected() {
        let cfg = ::config::Config::builder()
            .set_override("error_collector.harvest_interval_secs", 0)
            .unwrap()
            .build()
            .unwrap();
        let config = CollectorConfig::try_from(cfg).unwrap();
        let collector = Arc::new(ErrorCollector::default());

        let result = HarvestLoop::from_config(collector, MemorySink::new(), &config);

        assert!(matches!(result, Err(CollectorError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_zero_interval_is_clamped() {
        let collector = Arc::new(ErrorCollector::default());
        let sink = Arc::new(MemorySink::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let harvest = HarvestLoop::new(Arc::clone(&collector), Arc::clone(&sink), Duration::ZERO);
        assert_eq!(harvest.interval(), MIN_HARVEST_INTERVAL);

        notice(&collector, "path");
        let handle = harvest.spawn(shutdown_rx);
        shutdown_tx.send(true).unwrap();

        let undelivered = handle.await.unwrap();
        assert!(undelivered.is_empty());
        assert_eq!(sink.delivered().len(), 1);
    }

    #[test]
    fn test_log_sink_delivers() {
        let sink = LogSink::new().with_payload();
        let record = ErrorRecord::new("Exception", "message", "path", Default::default());

        tokio_test::block_on(sink.deliver(&[record])).unwrap();
    }
}

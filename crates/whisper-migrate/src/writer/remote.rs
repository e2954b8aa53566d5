//! Remote-write strategy: bounded batches flushed on background tasks.

use std::sync::Arc;

use tokio::task::{JoinError, JoinSet};
use tracing::{debug, info, warn};

use crate::error::{MigrateError, Result};
use crate::mapper::PointBatch;
use crate::remote::{RemoteEngine, RemoteError, Row, WriteBatch};
use crate::writer::{ErrorPolicy, FailureLog};

/// Points accumulated before a batch is dispatched.
pub const DEFAULT_BATCH_THRESHOLD: usize = 5000;

/// Flush tasks allowed in flight before dispatch waits for one to finish.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 8;

type FlushOutcome = (u64, usize, std::result::Result<(), RemoteError>);

/// Outcome of a remote write phase.
#[derive(Debug, Default)]
pub struct RemoteWriteReport {
    /// Points in batches the engine accepted.
    pub points_written: u64,
    /// Batches the engine accepted.
    pub batches_written: u64,
    /// Batches that failed.
    pub failures: FailureLog,
}

/// Accumulates rows across legacy files and flushes every full batch on
/// its own task. [`RemoteWriteStrategy::finish`] writes the remainder and
/// joins every outstanding flush.
pub struct RemoteWriteStrategy {
    engine: Arc<dyn RemoteEngine>,
    database: String,
    retention_policy: Option<String>,
    threshold: usize,
    max_in_flight: usize,
    policy: ErrorPolicy,
    pending: WriteBatch,
    tasks: JoinSet<FlushOutcome>,
    next_batch: u64,
    report: RemoteWriteReport,
}

impl RemoteWriteStrategy {
    /// Creates a strategy writing into `database`.
    pub fn new(engine: Arc<dyn RemoteEngine>, database: impl Into<String>) -> Self {
        Self {
            engine,
            database: database.into(),
            retention_policy: None,
            threshold: DEFAULT_BATCH_THRESHOLD,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            policy: ErrorPolicy::default(),
            pending: WriteBatch::with_capacity(DEFAULT_BATCH_THRESHOLD),
            tasks: JoinSet::new(),
            next_batch: 0,
            report: RemoteWriteReport::default(),
        }
    }

    /// Writes into a specific retention policy.
    pub fn with_retention_policy(mut self, retention_policy: Option<String>) -> Self {
        self.retention_policy = retention_policy;
        self
    }

    /// Sets the batch threshold (at least 1).
    pub fn with_threshold(mut self, threshold: usize) -> Self {
        self.threshold = threshold.max(1);
        self.pending = WriteBatch::with_capacity(self.threshold);
        self
    }

    /// Sets the number of concurrent flush tasks (at least 1).
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }

    /// Sets what a failed flush does.
    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Rows waiting for the next flush.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Flush tasks not yet joined.
    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// Appends the rows of `batch`, dispatching a flush each time the
    /// pending batch reaches the threshold.
    ///
    /// # Errors
    ///
    /// Under [`ErrorPolicy::Abort`], the first failed flush. Outstanding
    /// flushes are joined before the error is returned.
    pub async fn push(&mut self, batch: &PointBatch) -> Result<()> {
        for &(timestamp, value) in &batch.points {
            self.pending.push(Row {
                identity: Arc::clone(&batch.identity),
                timestamp,
                value,
            });
            if self.pending.len() >= self.threshold {
                if let Err(e) = self.dispatch().await {
                    self.drain().await;
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Joins every outstanding flush without dispatching pending rows.
    ///
    /// Used when a run stops early; failures are logged, not returned.
    pub async fn drain(&mut self) {
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(e) = self.settle(joined) {
                warn!(error = %e, "Flush failed while draining");
            }
        }
    }

    async fn dispatch(&mut self) -> Result<()> {
        while self.tasks.len() >= self.max_in_flight {
            match self.tasks.join_next().await {
                Some(joined) => self.settle(joined)?,
                None => break,
            }
        }

        let batch = std::mem::replace(&mut self.pending, WriteBatch::with_capacity(self.threshold));
        let id = self.next_batch;
        self.next_batch += 1;

        let engine = Arc::clone(&self.engine);
        let database = self.database.clone();
        let retention_policy = self.retention_policy.clone();
        debug!(batch = id, rows = batch.len(), "Dispatching flush");
        self.tasks.spawn(async move {
            let result = engine
                .write(&database, retention_policy.as_deref(), &batch)
                .await;
            (id, batch.len(), result)
        });
        Ok(())
    }

    fn settle(&mut self, joined: std::result::Result<FlushOutcome, JoinError>) -> Result<()> {
        match joined {
            Ok((_, rows, Ok(()))) => {
                self.report.points_written += rows as u64;
                self.report.batches_written += 1;
                Ok(())
            }
            Ok((id, rows, Err(e))) => self.report.failures.record(
                self.policy,
                format!("write batch {} ({} points)", id, rows),
                MigrateError::Remote(e),
            ),
            Err(e) => self.report.failures.record(
                self.policy,
                "write batch",
                MigrateError::FlushTask(e.to_string()),
            ),
        }
    }

    /// Writes the remaining rows and joins every dispatched flush.
    ///
    /// # Errors
    ///
    /// Under [`ErrorPolicy::Abort`], the first failed flush. Outstanding
    /// flushes are still joined before the error is returned.
    pub async fn finish(mut self) -> Result<RemoteWriteReport> {
        let mut outcome = Ok(());

        if !self.pending.is_empty() {
            let batch = std::mem::take(&mut self.pending);
            let id = self.next_batch;
            self.next_batch += 1;
            let result = self
                .engine
                .write(&self.database, self.retention_policy.as_deref(), &batch)
                .await;
            outcome = self.settle(Ok((id, batch.len(), result)));
        }

        while let Some(joined) = self.tasks.join_next().await {
            let settled = self.settle(joined);
            if outcome.is_ok() {
                outcome = settled;
            }
        }
        outcome?;

        info!(
            points = self.report.points_written,
            batches = self.report.batches_written,
            failures = self.report.failures.len(),
            "Remote write finished"
        );
        Ok(self.report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::SeriesIdentity;
    use crate::remote::QueryResponse;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingEngine {
        batches: Mutex<Vec<usize>>,
        fail: bool,
    }

    #[async_trait]
    impl RemoteEngine for RecordingEngine {
        async fn create_database(&self, _name: &str) -> std::result::Result<(), RemoteError> {
            Ok(())
        }

        async fn query(
            &self,
            _database: Option<&str>,
            _statement: &str,
        ) -> std::result::Result<QueryResponse, RemoteError> {
            Ok(QueryResponse::default())
        }

        async fn write(
            &self,
            database: &str,
            _retention_policy: Option<&str>,
            batch: &WriteBatch,
        ) -> std::result::Result<(), RemoteError> {
            assert_eq!(database, "graphite");
            if self.fail {
                return Err(RemoteError::Query("write refused".into()));
            }
            self.batches.lock().unwrap().push(batch.len());
            Ok(())
        }
    }

    // First write fails at once, later writes land after a delay.
    #[derive(Default)]
    struct FailFirstEngine {
        calls: AtomicUsize,
        landed: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl RemoteEngine for FailFirstEngine {
        async fn create_database(&self, _name: &str) -> std::result::Result<(), RemoteError> {
            Ok(())
        }

        async fn query(
            &self,
            _database: Option<&str>,
            _statement: &str,
        ) -> std::result::Result<QueryResponse, RemoteError> {
            Ok(QueryResponse::default())
        }

        async fn write(
            &self,
            _database: &str,
            _retention_policy: Option<&str>,
            batch: &WriteBatch,
        ) -> std::result::Result<(), RemoteError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(RemoteError::Query("write refused".into()));
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.landed.lock().unwrap().push(batch.len());
            Ok(())
        }
    }

    fn batch(points: usize) -> PointBatch {
        let identity = SeriesIdentity::new("load", vec![("host".into(), "host1".into())], "value");
        PointBatch::new(identity, (0..points as i64).map(|i| (i * 60, i as f64)).collect())
    }

    #[tokio::test]
    async fn test_threshold_boundary() {
        let engine = Arc::new(RecordingEngine::default());
        let mut strategy = RemoteWriteStrategy::new(engine.clone(), "graphite");

        strategy.push(&batch(DEFAULT_BATCH_THRESHOLD - 1)).await.unwrap();
        assert_eq!(strategy.pending_len(), DEFAULT_BATCH_THRESHOLD - 1);
        assert_eq!(strategy.in_flight(), 0);

        strategy.push(&batch(1)).await.unwrap();
        assert_eq!(strategy.pending_len(), 0);
        assert_eq!(strategy.in_flight(), 1);

        strategy.push(&batch(1)).await.unwrap();
        assert_eq!(strategy.pending_len(), 1);

        let report = strategy.finish().await.unwrap();
        assert_eq!(report.points_written, DEFAULT_BATCH_THRESHOLD as u64 + 1);
        assert_eq!(report.batches_written, 2);

        let mut sizes = engine.batches.lock().unwrap().clone();
        sizes.sort_unstable();
        assert_eq!(sizes, vec![1, DEFAULT_BATCH_THRESHOLD]);
    }

    #[tokio::test]
    async fn test_batches_span_files() {
        let engine = Arc::new(RecordingEngine::default());
        let mut strategy = RemoteWriteStrategy::new(engine.clone(), "graphite").with_threshold(4);

        for _ in 0..3 {
            strategy.push(&batch(3)).await.unwrap();
            assert!(strategy.pending_len() < 4);
        }
        let report = strategy.finish().await.unwrap();

        assert_eq!(report.points_written, 9);
        let mut sizes = engine.batches.lock().unwrap().clone();
        sizes.sort_unstable();
        assert_eq!(sizes, vec![1, 4, 4]);
    }

    #[tokio::test]
    async fn test_in_flight_is_bounded() {
        let engine = Arc::new(RecordingEngine::default());
        let mut strategy = RemoteWriteStrategy::new(engine.clone(), "graphite")
            .with_threshold(1)
            .with_max_in_flight(2);

        strategy.push(&batch(10)).await.unwrap();
        assert!(strategy.in_flight() <= 2);
        let report = strategy.finish().await.unwrap();
        assert_eq!(report.batches_written, 10);
    }

    #[tokio::test]
    async fn test_failed_flush_is_recorded() {
        let engine = Arc::new(RecordingEngine {
            fail: true,
            ..Default::default()
        });
        let mut strategy = RemoteWriteStrategy::new(engine, "graphite").with_threshold(2);

        strategy.push(&batch(3)).await.unwrap();
        let report = strategy.finish().await.unwrap();

        assert_eq!(report.points_written, 0);
        assert_eq!(report.failures.len(), 2);
    }

    #[tokio::test]
    async fn test_failed_flush_aborts() {
        let engine = Arc::new(RecordingEngine {
            fail: true,
            ..Default::default()
        });
        let mut strategy = RemoteWriteStrategy::new(engine, "graphite")
            .with_threshold(2)
            .with_error_policy(ErrorPolicy::Abort);

        strategy.push(&batch(2)).await.unwrap();
        assert!(matches!(
            strategy.finish().await,
            Err(MigrateError::Remote(RemoteError::Query(_)))
        ));
    }

    #[tokio::test]
    async fn test_abort_joins_in_flight_flushes() {
        let engine = Arc::new(FailFirstEngine::default());
        let mut strategy = RemoteWriteStrategy::new(engine.clone(), "graphite")
            .with_threshold(1)
            .with_max_in_flight(2)
            .with_error_policy(ErrorPolicy::Abort);

        let result = strategy.push(&batch(3)).await;

        assert!(matches!(result, Err(MigrateError::Remote(RemoteError::Query(_)))));
        assert_eq!(strategy.in_flight(), 0);
        assert_eq!(*engine.landed.lock().unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn test_empty_run_writes_nothing() {
        let engine = Arc::new(RecordingEngine::default());
        let strategy = RemoteWriteStrategy::new(engine.clone(), "graphite");
        let report = strategy.finish().await.unwrap();
        assert_eq!(report.batches_written, 0);
        assert!(engine.batches.lock().unwrap().is_empty());
    }
}

//! Crawl result pipeline
//!
//! Producers push `CrawlResult`s through a [`ResultSender`]. The accumulator
//! groups successful records into batches, a pool of uploaders writes each
//! batch to the backing store, and the dedup reporter marks stored
//! identifiers as processed. Errors from every stage go to a shared sink.
//!
//! An identifier is never marked processed before its record is stored;
//! a crash in between replays the record on the next run, which the backing
//! store absorbs as an overwrite.

mod accumulator;
mod errors;
mod lifecycle;
mod reporter;
mod stats;
mod uploader;

pub use accumulator::{Batch, FlushReason};
pub use errors::{Component, ErrorEvent, ErrorSink};
pub use lifecycle::{Lifecycle, PipelinePhase};
pub use stats::{Counter, PipelineReport, PipelineStats};

use crate::config::PipelineConfig;
use crate::record::CrawlResult;
use crate::storage::{BackingStore, DedupStore};
use accumulator::Accumulator;
use reporter::Reporter;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uploader::Uploader;

/// Errors surfaced by the pipeline to producers and hosts
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Pipeline is no longer accepting results")]
    Closed,

    #[error("Pipeline task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Producer handle; clone one per crawler worker
#[derive(Debug, Clone)]
pub struct ResultSender {
    tx: mpsc::Sender<CrawlResult>,
    token: CancellationToken,
}

impl ResultSender {
    /// Submits one result, waiting while the input queue is full
    ///
    /// Fails with [`PipelineError::Closed`] once a stop was requested, so a
    /// blocked producer is released instead of waiting forever.
    pub async fn send(&self, result: CrawlResult) -> Result<(), PipelineError> {
        if self.token.is_cancelled() {
            return Err(PipelineError::Closed);
        }

        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(PipelineError::Closed),
            sent = self.tx.send(result) => sent.map_err(|_| PipelineError::Closed),
        }
    }

    /// Completes once the pipeline stops accepting results
    pub async fn stopped(&self) {
        self.token.cancelled().await
    }

    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled() || self.tx.is_closed()
    }
}

/// A configured pipeline, not yet running
///
/// The config is expected to have passed [`validate_pipeline_config`];
/// zero queue capacities are rejected by tokio with a panic.
///
/// [`validate_pipeline_config`]: crate::config::validate_pipeline_config
pub struct Pipeline {
    config: PipelineConfig,
    store: Arc<dyn BackingStore>,
    dedup: Arc<dyn DedupStore>,
    lifecycle: Lifecycle,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        store: Arc<dyn BackingStore>,
        dedup: Arc<dyn DedupStore>,
    ) -> Self {
        Self {
            config,
            store,
            dedup,
            lifecycle: Lifecycle::new(),
        }
    }

    /// Uses an existing lifecycle, e.g. one already wired to a signal handler
    pub fn with_lifecycle(mut self, lifecycle: Lifecycle) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    /// Spawns every component and returns the producer and host handles
    pub fn start(self) -> (ResultSender, PipelineHandle) {
        let Pipeline {
            config,
            store,
            dedup,
            lifecycle,
        } = self;

        let stats = Arc::new(PipelineStats::new());
        let (input_tx, input_rx) = mpsc::channel(config.input_queue_capacity);
        let (batch_tx, batch_rx) = mpsc::channel(config.batch_queue_capacity);
        let (dedup_tx, dedup_rx) = mpsc::channel(config.dedup_queue_capacity);
        let (sink, sink_rx) = ErrorSink::channel(config.error_queue_capacity, stats.clone());
        let (operator_tx, operator_rx) = mpsc::channel(config.error_queue_capacity);

        tracing::info!(
            max_batch_size = config.max_batch_size,
            flush_interval_ms = config.flush_interval_ms,
            uploaders = config.uploader_count,
            "Starting result pipeline"
        );

        let mut tasks = Vec::with_capacity(config.uploader_count + 3);

        // The sink outlives everything that reports into it
        tasks.push((
            "error-sink",
            errors::spawn_error_sink(sink_rx, operator_tx, stats.clone()),
        ));

        let accumulator = Accumulator::new(
            input_rx,
            batch_tx,
            dedup_tx.clone(),
            sink.clone(),
            lifecycle.clone(),
            stats.clone(),
            config.max_batch_size,
            config.flush_interval(),
        );
        tasks.push(("accumulator", tokio::spawn(accumulator.run())));

        let shared: uploader::SharedBatches = Arc::new(Mutex::new(batch_rx));
        for id in 0..config.uploader_count {
            let uploader = Uploader::new(
                id,
                shared.clone(),
                store.clone(),
                dedup_tx.clone(),
                sink.clone(),
                stats.clone(),
            );
            tasks.push(("uploader", tokio::spawn(uploader.run())));
        }

        let reporter = Reporter::new(
            dedup_rx,
            dedup,
            sink.clone(),
            lifecycle.clone(),
            stats.clone(),
            config.drain_grace_period(),
        );
        tasks.push(("reporter", tokio::spawn(reporter.run())));

        // Channels close only when the components holding them return
        drop(dedup_tx);
        drop(sink);

        let sender = ResultSender {
            tx: input_tx,
            token: lifecycle.cancellation_token(),
        };
        let handle = PipelineHandle {
            lifecycle,
            stats,
            tasks,
            errors: Some(operator_rx),
        };
        (sender, handle)
    }
}

/// Host-side handle to a running pipeline
pub struct PipelineHandle {
    lifecycle: Lifecycle,
    stats: Arc<PipelineStats>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
    errors: Option<mpsc::Receiver<ErrorEvent>>,
}

impl PipelineHandle {
    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle.clone()
    }

    pub fn phase(&self) -> PipelinePhase {
        self.lifecycle.phase()
    }

    /// Requests a graceful stop; see [`Lifecycle::request_stop`]
    pub fn request_stop(&self) {
        self.lifecycle.request_stop();
    }

    /// Takes the operator error stream. Only the first call returns it;
    /// events are dropped (and counted) while nobody drains it.
    pub fn take_errors(&mut self) -> Option<mpsc::Receiver<ErrorEvent>> {
        self.errors.take()
    }

    /// Current counters
    pub fn report(&self) -> PipelineReport {
        self.stats.snapshot()
    }

    /// Waits for every component to return and produces the final report
    ///
    /// Completes after producers drop their senders (full drain) or after a
    /// stop request (drain bounded by the grace period).
    pub async fn join(self) -> Result<PipelineReport, PipelineError> {
        let mut first_failure = None;
        for (name, task) in self.tasks {
            if let Err(e) = task.await {
                tracing::error!("Pipeline task {} failed: {}", name, e);
                first_failure.get_or_insert(e);
            }
        }

        self.lifecycle.mark_stopped();
        let report = self.stats.snapshot();
        tracing::info!(
            records_stored = report.records_stored,
            identifiers_marked = report.identifiers_marked,
            errors = report.errors_reported,
            "Result pipeline stopped"
        );

        match first_failure {
            Some(e) => Err(PipelineError::Task(e)),
            None => Ok(report),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Identifier, Record, StoredRecord, Video};
    use crate::storage::StorageResult;
    use async_trait::async_trait;
    use std::time::Duration;

    struct NullStore;

    #[async_trait]
    impl BackingStore for NullStore {
        async fn submit_batch(&self, _records: &[StoredRecord]) -> StorageResult<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl DedupStore for NullStore {
        async fn mark_processed(&self, _identifier: &Identifier) -> StorageResult<()> {
            Ok(())
        }

        async fn is_processed(&self, _identifier: &Identifier) -> StorageResult<bool> {
            Ok(false)
        }
    }

    /// Takes a minute per batch so producers back up
    struct SlowStore;

    #[async_trait]
    impl BackingStore for SlowStore {
        async fn submit_batch(&self, _records: &[StoredRecord]) -> StorageResult<()> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
    }

    fn pipeline(config: PipelineConfig) -> Pipeline {
        Pipeline::new(config, Arc::new(NullStore), Arc::new(NullStore))
    }

    fn ok(id: &str) -> CrawlResult {
        CrawlResult::success(Identifier::new(id).unwrap(), Record::Video(Video::new(id)))
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_run_stops_cleanly() {
        let (sender, handle) = pipeline(PipelineConfig::default()).start();
        let lifecycle = handle.lifecycle();
        drop(sender);

        let report = handle.join().await.unwrap();
        assert_eq!(report.batches_flushed, 0);
        assert_eq!(lifecycle.phase(), PipelinePhase::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_after_stop_is_closed() {
        let (sender, handle) = pipeline(PipelineConfig::default()).start();
        handle.request_stop();

        assert!(sender.is_closed());
        assert!(matches!(sender.send(ok("A")).await, Err(PipelineError::Closed)));
        handle.join().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_releases_blocked_producer() {
        let config = PipelineConfig {
            input_queue_capacity: 1,
            batch_queue_capacity: 1,
            max_batch_size: 1,
            ..PipelineConfig::default()
        };
        let (sender, handle) =
            Pipeline::new(config, Arc::new(SlowStore), Arc::new(NullStore)).start();

        let producer = tokio::spawn({
            let sender = sender.clone();
            async move {
                let mut i = 0u64;
                loop {
                    if sender.send(ok(&format!("id-{}", i))).await.is_err() {
                        return i;
                    }
                    i += 1;
                }
            }
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!producer.is_finished());
        handle.request_stop();
        let sent = producer.await.unwrap();
        assert!(sent > 0);

        drop(sender);
        let report = handle.join().await.unwrap();
        assert_eq!(report.results_received, report.records_batched);
        assert_eq!(report.records_stored, report.records_batched);
    }

    #[tokio::test(start_paused = true)]
    async fn test_take_errors_only_once() {
        let (sender, mut handle) = pipeline(PipelineConfig::default()).start();
        assert!(handle.take_errors().is_some());
        assert!(handle.take_errors().is_none());
        drop(sender);
        handle.join().await.unwrap();
    }
}

//! Batch uploader
//!
//! Uploaders share one batch queue. Each takes a batch, writes it to the
//! backing store and only then forwards its identifiers for dedup marking.
//! A failed write marks nothing; the crawler will revisit those identifiers.

use crate::pipeline::accumulator::Batch;
use crate::pipeline::errors::{Component, ErrorEvent, ErrorSink};
use crate::pipeline::stats::PipelineStats;
use crate::record::Identifier;
use crate::storage::BackingStore;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// Batch queue shared by every uploader in the pool
pub(crate) type SharedBatches = Arc<Mutex<mpsc::Receiver<Batch>>>;

pub(crate) struct Uploader {
    id: usize,
    batches: SharedBatches,
    store: Arc<dyn BackingStore>,
    dedup: mpsc::Sender<Identifier>,
    errors: ErrorSink,
    stats: Arc<PipelineStats>,
}

impl Uploader {
    pub(crate) fn new(
        id: usize,
        batches: SharedBatches,
        store: Arc<dyn BackingStore>,
        dedup: mpsc::Sender<Identifier>,
        errors: ErrorSink,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            id,
            batches,
            store,
            dedup,
            errors,
            stats,
        }
    }

    /// Runs until the batch queue is closed and empty. An in-flight upload is
    /// always finished, so a stop request never loses a flushed batch.
    pub(crate) async fn run(self) {
        tracing::debug!(uploader = self.id, "Uploader started");

        loop {
            // Hold the lock only while waiting for the next batch
            let next = { self.batches.lock().await.recv().await };
            match next {
                Some(batch) => self.upload(batch).await,
                None => break,
            }
        }

        tracing::debug!(uploader = self.id, "Uploader finished");
    }

    async fn upload(&self, batch: Batch) {
        let size = batch.len();

        match self.store.submit_batch(batch.records()).await {
            Ok(()) => {
                self.stats.batches_uploaded.inc();
                self.stats.records_stored.add(size as u64);
                tracing::debug!(uploader = self.id, size, "Batch stored");

                for identifier in batch.into_identifiers() {
                    let sent = self.dedup.send(identifier).await;
                    if let Err(mpsc::error::SendError(identifier)) = sent {
                        self.stats.identifiers_abandoned.inc();
                        self.errors.report(ErrorEvent::new(
                            Component::Uploader,
                            Some(identifier),
                            "dedup reporter stopped before identifier could be marked",
                        ));
                    }
                }
            }
            Err(e) => {
                self.stats.batches_failed.inc();
                self.errors.report(ErrorEvent::new(
                    Component::Uploader,
                    None,
                    format!("failed to upload batch of {} records: {}", size, e),
                ));
            }
        }
    }
}

//! Batch accumulator
//!
//! Turns the stream of crawl results into flushed batches:
//! - failures go to the error sink; permanent ones are also sent for dedup marking
//! - successful records are appended in arrival order
//! - a batch flushes when it is full, when its flush interval elapses, or on drain

use crate::pipeline::errors::{Component, ErrorEvent, ErrorSink};
use crate::pipeline::lifecycle::Lifecycle;
use crate::pipeline::stats::PipelineStats;
use crate::record::{CrawlResult, Identifier, StoredRecord};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// An ordered group of successful records, immutable once flushed
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    records: Vec<StoredRecord>,
}

impl Batch {
    pub(crate) fn new(records: Vec<StoredRecord>) -> Self {
        Self { records }
    }

    pub fn records(&self) -> &[StoredRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn into_identifiers(self) -> Vec<Identifier> {
        self.records.into_iter().map(|r| r.identifier).collect()
    }
}

/// Why a batch left the accumulator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    Full,
    Interval,
    Drain,
}

impl fmt::Display for FlushReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Full => "full",
            Self::Interval => "interval",
            Self::Drain => "drain",
        })
    }
}

pub(crate) struct Accumulator {
    input: mpsc::Receiver<CrawlResult>,
    batches: mpsc::Sender<Batch>,
    dedup: mpsc::Sender<Identifier>,
    errors: ErrorSink,
    lifecycle: Lifecycle,
    stats: Arc<PipelineStats>,
    max_batch_size: usize,
    flush_interval: Duration,
    pending: Vec<StoredRecord>,
    /// Armed only while `pending` holds records
    deadline: Option<Instant>,
}

impl Accumulator {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        input: mpsc::Receiver<CrawlResult>,
        batches: mpsc::Sender<Batch>,
        dedup: mpsc::Sender<Identifier>,
        errors: ErrorSink,
        lifecycle: Lifecycle,
        stats: Arc<PipelineStats>,
        max_batch_size: usize,
        flush_interval: Duration,
    ) -> Self {
        Self {
            input,
            batches,
            dedup,
            errors,
            lifecycle,
            stats,
            max_batch_size,
            flush_interval,
            pending: Vec::with_capacity(max_batch_size),
            deadline: None,
        }
    }

    pub(crate) async fn run(mut self) {
        let token = self.lifecycle.cancellation_token();

        loop {
            let deadline = self.deadline;
            tokio::select! {
                biased;

                _ = token.cancelled() => {
                    tracing::debug!("Accumulator observed stop request");
                    break;
                }

                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)),
                    if deadline.is_some() =>
                {
                    self.flush(FlushReason::Interval).await;
                }

                next = self.input.recv() => match next {
                    Some(result) => self.accept(result).await,
                    None => {
                        self.lifecycle.begin_drain();
                        break;
                    }
                },
            }
        }

        // Refuse new input, but keep results producers already queued
        self.input.close();
        while let Ok(result) = self.input.try_recv() {
            self.accept(result).await;
        }
        self.flush(FlushReason::Drain).await;

        tracing::debug!("Accumulator finished");
    }

    async fn accept(&mut self, result: CrawlResult) {
        self.stats.results_received.inc();
        let CrawlResult {
            identifier,
            outcome,
        } = result;

        match outcome {
            Ok(record) => {
                if self.pending.is_empty() {
                    self.deadline = Some(Instant::now() + self.flush_interval);
                }
                self.pending.push(StoredRecord { identifier, record });
                self.stats.records_batched.inc();

                if self.pending.len() >= self.max_batch_size {
                    self.flush(FlushReason::Full).await;
                }
            }
            Err(failure) => {
                if failure.is_permanent() {
                    self.stats.permanent_failures.inc();
                } else {
                    self.stats.transient_failures.inc();
                }
                self.errors.report(ErrorEvent::new(
                    Component::Accumulator,
                    Some(identifier.clone()),
                    failure.to_string(),
                ));

                if failure.is_permanent() {
                    self.forward_permanent(identifier).await;
                }
            }
        }
    }

    /// Queues a permanent failure for marking. A stop request releases a
    /// wait on a full dedup queue and leaves the identifier unmarked.
    async fn forward_permanent(&self, identifier: Identifier) {
        let token = self.lifecycle.cancellation_token();
        let pending = identifier.clone();

        let sent = tokio::select! {
            biased;
            sent = self.dedup.send(identifier) => sent.is_ok(),
            _ = token.cancelled() => false,
        };
        if !sent {
            self.stats.identifiers_abandoned.inc();
            tracing::warn!("Dedup reporter unavailable; {} stays unmarked", pending);
        }
    }

    async fn flush(&mut self, reason: FlushReason) {
        self.deadline = None;
        if self.pending.is_empty() {
            return;
        }

        let records =
            std::mem::replace(&mut self.pending, Vec::with_capacity(self.max_batch_size));
        let batch = Batch::new(records);
        tracing::debug!(size = batch.len(), %reason, "Flushing batch");
        self.stats.batches_flushed.inc();
        self.hand_off(batch).await;
    }

    /// Waits for an uploader to take the batch. Never drops it while any
    /// uploader is alive; a full queue is backpressure.
    async fn hand_off(&self, batch: Batch) {
        let size = batch.len();
        let send = self.batches.send(batch);
        tokio::pin!(send);

        let started = Instant::now();
        let result = loop {
            tokio::select! {
                result = &mut send => break result,
                _ = tokio::time::sleep(self.flush_interval) => {
                    tracing::warn!(
                        size,
                        waited_ms = started.elapsed().as_millis() as u64,
                        "Uploaders are backed up, batch handoff still waiting"
                    );
                }
            }
        };

        if result.is_err() {
            self.stats.identifiers_abandoned.add(size as u64);
            self.errors.report(ErrorEvent::new(
                Component::Accumulator,
                None,
                format!("no uploader left to take batch of {} records", size),
            ));
        }
    }
}

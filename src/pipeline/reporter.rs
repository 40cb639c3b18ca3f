//! Dedup reporter
//!
//! Marks identifiers processed one at a time, in the order received. On a
//! stop request it keeps marking what is queued for at most the drain grace
//! period; identifiers left after that are counted and dropped, to be
//! revisited by the next run.

use crate::pipeline::errors::{Component, ErrorEvent, ErrorSink};
use crate::pipeline::lifecycle::Lifecycle;
use crate::pipeline::stats::PipelineStats;
use crate::record::Identifier;
use crate::storage::DedupStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub(crate) struct Reporter {
    queue: mpsc::Receiver<Identifier>,
    dedup: Arc<dyn DedupStore>,
    errors: ErrorSink,
    lifecycle: Lifecycle,
    stats: Arc<PipelineStats>,
    grace: Duration,
}

impl Reporter {
    pub(crate) fn new(
        queue: mpsc::Receiver<Identifier>,
        dedup: Arc<dyn DedupStore>,
        errors: ErrorSink,
        lifecycle: Lifecycle,
        stats: Arc<PipelineStats>,
        grace: Duration,
    ) -> Self {
        Self {
            queue,
            dedup,
            errors,
            lifecycle,
            stats,
            grace,
        }
    }

    pub(crate) async fn run(mut self) {
        let token = self.lifecycle.cancellation_token();

        loop {
            tokio::select! {
                biased;

                _ = token.cancelled() => break,

                next = self.queue.recv() => match next {
                    Some(identifier) => {
                        if let Some(deadline) = self.mark_until_stop(identifier, &token).await {
                            self.drain(deadline).await;
                            return;
                        }
                    }
                    // Every producer is gone and the queue is empty
                    None => {
                        tracing::debug!("Reporter finished");
                        return;
                    }
                },
            }
        }

        let deadline = Instant::now() + self.grace;
        self.drain(deadline).await;
    }

    /// Marks one identifier while running. A stop arriving mid-mark starts
    /// the grace period and the mark gets only that long to finish; the
    /// returned deadline then bounds the rest of the drain.
    async fn mark_until_stop(
        &self,
        identifier: Identifier,
        token: &CancellationToken,
    ) -> Option<Instant> {
        let pending = identifier.clone();
        let mark = self.mark(identifier);
        tokio::pin!(mark);

        tokio::select! {
            biased;

            _ = &mut mark => None,

            _ = token.cancelled() => {
                let deadline = Instant::now() + self.grace;
                if tokio::time::timeout_at(deadline, mark).await.is_err() {
                    tracing::warn!("Grace period ended while marking {}", pending);
                    self.stats.identifiers_abandoned.inc();
                }
                Some(deadline)
            }
        }
    }

    /// Keeps marking until the queue closes or the deadline passes
    async fn drain(&mut self, deadline: Instant) {
        tracing::debug!(grace_ms = self.grace.as_millis() as u64, "Reporter draining");

        loop {
            match tokio::time::timeout_at(deadline, self.queue.recv()).await {
                Ok(Some(identifier)) => {
                    let pending = identifier.clone();
                    if tokio::time::timeout_at(deadline, self.mark(identifier)).await.is_err() {
                        tracing::warn!("Grace period ended while marking {}", pending);
                        self.stats.identifiers_abandoned.inc();
                        break;
                    }
                }
                Ok(None) => {
                    tracing::debug!("Reporter drained");
                    return;
                }
                Err(_) => break,
            }
        }

        self.queue.close();
        let mut abandoned = 0u64;
        while self.queue.try_recv().is_ok() {
            abandoned += 1;
        }
        if abandoned > 0 {
            self.stats.identifiers_abandoned.add(abandoned);
            tracing::warn!(
                abandoned,
                "Drain grace period elapsed; unmarked identifiers will be revisited"
            );
        }
    }

    async fn mark(&self, identifier: Identifier) {
        match self.dedup.mark_processed(&identifier).await {
            Ok(()) => self.stats.identifiers_marked.inc(),
            Err(e) => {
                self.stats.mark_failures.inc();
                self.errors.report(ErrorEvent::new(
                    Component::Reporter,
                    Some(identifier),
                    format!("failed to mark processed: {}", e),
                ));
            }
        }
    }
}

//! JSON-lines producer
//!
//! Reads one wire-form crawl result per line and feeds it to the pipeline.
//! The sender is consumed, so reaching the end of the input is also the
//! pipeline's signal that upstream is exhausted.

use crate::pipeline::ResultSender;
use crate::record::parse_line;
use crate::storage::DedupStore;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// What one ingest pass did with its input
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub lines_read: u64,
    pub submitted: u64,
    pub malformed: u64,
    pub skipped_processed: u64,
    /// The pipeline refused input before the reader was exhausted
    pub interrupted: bool,
}

/// Feeds every result in `reader` into the pipeline
///
/// When `dedup` is given, identifiers already marked processed are skipped.
pub async fn ingest<R>(
    reader: R,
    sender: ResultSender,
    dedup: Option<Arc<dyn DedupStore>>,
) -> std::io::Result<IngestSummary>
where
    R: AsyncBufRead + Unpin,
{
    let mut summary = IngestSummary::default();
    let mut lines = reader.lines();

    loop {
        let line = tokio::select! {
            biased;
            _ = sender.stopped() => {
                summary.interrupted = true;
                break;
            }
            line = lines.next_line() => match line? {
                Some(line) => line,
                None => break,
            },
        };
        summary.lines_read += 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let result = match parse_line(line) {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!("Skipping line {}: {}", summary.lines_read, e);
                summary.malformed += 1;
                continue;
            }
        };

        if let Some(dedup) = &dedup {
            match dedup.is_processed(&result.identifier).await {
                Ok(true) => {
                    tracing::debug!("Already processed: {}", result.identifier);
                    summary.skipped_processed += 1;
                    continue;
                }
                Ok(false) => {}
                // Resubmitting is safe; the store overwrites
                Err(e) => tracing::warn!("Dedup lookup failed for {}: {}", result.identifier, e),
            }
        }

        if sender.send(result).await.is_err() {
            summary.interrupted = true;
            break;
        }
        summary.submitted += 1;
    }

    if summary.interrupted {
        tracing::info!("Pipeline stopped accepting results, ending ingest");
    }
    tracing::info!(
        lines = summary.lines_read,
        submitted = summary.submitted,
        malformed = summary.malformed,
        skipped = summary.skipped_processed,
        "Ingest finished"
    );
    Ok(summary)
}

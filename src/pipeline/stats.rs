//! Pipeline counters
//!
//! Every component bumps its counters with relaxed atomics; a `PipelineReport`
//! is a point-in-time copy used for logging and for the run record.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// A monotonically increasing counter
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn inc(&self) {
        self.add(1);
    }

    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Live counters shared by all pipeline tasks
#[derive(Debug)]
pub struct PipelineStats {
    started: Instant,

    pub results_received: Counter,
    pub records_batched: Counter,
    pub transient_failures: Counter,
    pub permanent_failures: Counter,

    pub batches_flushed: Counter,
    pub batches_uploaded: Counter,
    pub batches_failed: Counter,
    pub records_stored: Counter,

    pub identifiers_marked: Counter,
    pub mark_failures: Counter,

    /// Identifiers that were eligible for marking but never reached the dedup store
    pub identifiers_abandoned: Counter,

    pub errors_reported: Counter,
    pub errors_dropped: Counter,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            results_received: Counter::default(),
            records_batched: Counter::default(),
            transient_failures: Counter::default(),
            permanent_failures: Counter::default(),
            batches_flushed: Counter::default(),
            batches_uploaded: Counter::default(),
            batches_failed: Counter::default(),
            records_stored: Counter::default(),
            identifiers_marked: Counter::default(),
            mark_failures: Counter::default(),
            identifiers_abandoned: Counter::default(),
            errors_reported: Counter::default(),
            errors_dropped: Counter::default(),
        }
    }

    pub fn snapshot(&self) -> PipelineReport {
        PipelineReport {
            elapsed_ms: self.started.elapsed().as_millis() as u64,
            results_received: self.results_received.get(),
            records_batched: self.records_batched.get(),
            transient_failures: self.transient_failures.get(),
            permanent_failures: self.permanent_failures.get(),
            batches_flushed: self.batches_flushed.get(),
            batches_uploaded: self.batches_uploaded.get(),
            batches_failed: self.batches_failed.get(),
            records_stored: self.records_stored.get(),
            identifiers_marked: self.identifiers_marked.get(),
            mark_failures: self.mark_failures.get(),
            identifiers_abandoned: self.identifiers_abandoned.get(),
            errors_reported: self.errors_reported.get(),
            errors_dropped: self.errors_dropped.get(),
        }
    }
}

impl Default for PipelineStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of the pipeline counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineReport {
    pub elapsed_ms: u64,
    pub results_received: u64,
    pub records_batched: u64,
    pub transient_failures: u64,
    pub permanent_failures: u64,
    pub batches_flushed: u64,
    pub batches_uploaded: u64,
    pub batches_failed: u64,
    pub records_stored: u64,
    pub identifiers_marked: u64,
    pub mark_failures: u64,
    pub identifiers_abandoned: u64,
    pub errors_reported: u64,
    pub errors_dropped: u64,
}

impl PipelineReport {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl fmt::Display for PipelineReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Results received:      {}", self.results_received)?;
        writeln!(
            f,
            "  failures:            {} transient, {} permanent",
            self.transient_failures, self.permanent_failures
        )?;
        writeln!(
            f,
            "Batches:               {} flushed, {} uploaded, {} failed",
            self.batches_flushed, self.batches_uploaded, self.batches_failed
        )?;
        writeln!(f, "Records stored:        {}", self.records_stored)?;
        writeln!(
            f,
            "Identifiers marked:    {} ({} failed, {} abandoned)",
            self.identifiers_marked, self.mark_failures, self.identifiers_abandoned
        )?;
        writeln!(
            f,
            "Errors reported:       {} ({} dropped)",
            self.errors_reported, self.errors_dropped
        )?;
        write!(f, "Elapsed:               {:.1}s", self.elapsed_ms as f64 / 1000.0)
    }
}

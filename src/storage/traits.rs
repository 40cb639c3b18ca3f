//! Storage traits and error types
//!
//! This module defines the two stores the pipeline writes to, plus the
//! bookkeeping interface the binary uses for runs and statistics.

use crate::pipeline::ErrorEvent;
use crate::record::{Identifier, RecordKind, StoredRecord};
use crate::storage::{ErrorRow, RunRecord, RunStatus};
use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Run not found: {0}")]
    RunNotFound(i64),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Storage lock poisoned")]
    LockPoisoned,

    #[error("Blocking storage task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// The durable destination of crawled records
///
/// `submit_batch` may be called again with records that were already stored
/// (a crash between storing and dedup marking replays them on the next run),
/// so implementations must treat a repeated record as an overwrite.
#[async_trait]
pub trait BackingStore: Send + Sync {
    /// Stores the whole batch, in order, or nothing
    async fn submit_batch(&self, records: &[StoredRecord]) -> StorageResult<()>;
}

/// Set of identifiers that need no further crawling
#[async_trait]
pub trait DedupStore: Send + Sync {
    /// Marks an identifier as processed; marking twice is harmless
    async fn mark_processed(&self, identifier: &Identifier) -> StorageResult<()>;

    /// Checks whether an identifier was already processed
    async fn is_processed(&self, identifier: &Identifier) -> StorageResult<bool>;
}

/// Run bookkeeping and statistics queries
///
/// This is synchronous, like the underlying SQLite connection; the async
/// pipeline never calls it directly.
pub trait Storage {
    // ===== Run Management =====

    /// Creates a new crawl run
    ///
    /// # Arguments
    ///
    /// * `config_hash` - Hash of the configuration file
    ///
    /// # Returns
    ///
    /// The ID of the newly created run
    fn create_run(&self, config_hash: &str) -> StorageResult<i64>;

    /// Gets a run by ID
    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord>;

    /// Gets the most recent run
    fn get_latest_run(&self) -> StorageResult<Option<RunRecord>>;

    /// Closes a run with its final status and the pipeline report as JSON
    fn finish_run(&self, run_id: i64, status: RunStatus, report: &str) -> StorageResult<()>;

    // ===== Error Log =====

    /// Persists an operator-facing error event
    fn record_error(&self, run_id: i64, event: &ErrorEvent) -> StorageResult<()>;

    /// Gets the most recent error events, newest first
    fn recent_errors(&self, limit: u32) -> StorageResult<Vec<ErrorRow>>;

    // ===== Statistics =====

    /// Counts stored records of one kind
    fn count_records(&self, kind: RecordKind) -> StorageResult<u64>;

    /// Counts identifiers marked processed
    fn count_processed(&self) -> StorageResult<u64>;

    /// Counts stored records whose identifier is not marked processed
    fn count_unmarked(&self) -> StorageResult<u64>;

    /// Counts logged error events
    fn count_errors(&self) -> StorageResult<u64>;

    /// Gets error counts keyed by reporting component
    fn error_summary(&self) -> StorageResult<HashMap<String, u64>>;
}

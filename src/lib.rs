//! Mango-Ripple: the result pipeline of a video-platform crawler
//!
//! This crate takes parsed crawl results (video and channel records, or typed
//! failures) from many concurrent producers, groups them into bounded batches,
//! persists each batch to a backing store and marks the identifiers of stored
//! records as processed in a deduplication store.

pub mod config;
pub mod ingest;
pub mod output;
pub mod pipeline;
pub mod record;
pub mod storage;

use thiserror::Error;

/// Main error type for Mango-Ripple operations
#[derive(Debug, Error)]
pub enum MangoError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Record error: {0}")]
    Record(#[from] RecordError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] pipeline::PipelineError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Errors raised while building or decoding crawl results
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("Crawl result identifier cannot be empty")]
    EmptyIdentifier,

    #[error("Crawl result for {0} carries both a record and a failure")]
    Ambiguous(String),

    #[error("Crawl result for {0} carries neither a record nor a failure")]
    Missing(String),

    #[error("Malformed crawl result: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for Mango-Ripple operations
pub type Result<T> = std::result::Result<T, MangoError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use pipeline::{Pipeline, PipelineHandle, PipelinePhase, PipelineReport, ResultSender};
pub use record::{CrawlResult, Failure, FailureKind, Identifier, Record};

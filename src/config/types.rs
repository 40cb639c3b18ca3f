use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for Mango-Ripple
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub pipeline: PipelineConfig,
    pub output: OutputConfig,
}

/// Result pipeline tuning
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct PipelineConfig {
    /// Records per batch before a flush is forced
    pub max_batch_size: usize,

    /// Longest time a non-empty batch stays open (milliseconds)
    pub flush_interval_ms: u64,

    /// How long the dedup reporter keeps marking after a stop request (milliseconds)
    pub drain_grace_period_ms: u64,

    /// Number of concurrent batch uploaders
    pub uploader_count: usize,

    /// Crawl results buffered ahead of the accumulator
    pub input_queue_capacity: usize,

    /// Flushed batches buffered ahead of the uploaders
    pub batch_queue_capacity: usize,

    /// Identifiers buffered ahead of the dedup reporter
    pub dedup_queue_capacity: usize,

    /// Error events buffered before new ones are dropped
    pub error_queue_capacity: usize,
}

impl PipelineConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn drain_grace_period(&self) -> Duration {
        Duration::from_millis(self.drain_grace_period_ms)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 100,
            flush_interval_ms: 5_000,
            drain_grace_period_ms: 1_000,
            uploader_count: 2,
            input_queue_capacity: 256,
            batch_queue_capacity: 4,
            dedup_queue_capacity: 1_024,
            error_queue_capacity: 256,
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,
}

//! Statistics generation from the result database
//!
//! This module provides functionality for extracting and displaying
//! pipeline statistics from the storage layer.

use crate::pipeline::PipelineReport;
use crate::record::RecordKind;
use crate::storage::{ErrorRow, RunRecord, Storage};
use crate::MangoError;
use std::collections::HashMap;

/// How many recent errors `--stats` shows
const RECENT_ERROR_LIMIT: u32 = 10;

/// Database statistics summary
#[derive(Debug, Clone)]
pub struct CrawlStatistics {
    /// Video records stored
    pub videos: u64,

    /// Channel records stored
    pub channels: u64,

    /// Identifiers marked processed, including permanent failures
    pub processed: u64,

    /// Records stored but not (yet) marked processed; non-zero after an
    /// interrupted run, and shrinks once the crawler revisits them
    pub unmarked: u64,

    /// Logged error events
    pub errors: u64,

    /// Error counts keyed by reporting component
    pub errors_by_component: HashMap<String, u64>,

    pub recent_errors: Vec<ErrorRow>,

    pub latest_run: Option<RunRecord>,
}

/// Loads statistics from storage
///
/// # Arguments
///
/// * `storage` - The storage backend to query
///
/// # Returns
///
/// * `Ok(CrawlStatistics)` - Successfully loaded statistics
/// * `Err(MangoError)` - Failed to query statistics
pub fn load_statistics(storage: &dyn Storage) -> Result<CrawlStatistics, MangoError> {
    Ok(CrawlStatistics {
        videos: storage.count_records(RecordKind::Video)?,
        channels: storage.count_records(RecordKind::Channel)?,
        processed: storage.count_processed()?,
        unmarked: storage.count_unmarked()?,
        errors: storage.count_errors()?,
        errors_by_component: storage.error_summary()?,
        recent_errors: storage.recent_errors(RECENT_ERROR_LIMIT)?,
        latest_run: storage.get_latest_run()?,
    })
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &CrawlStatistics) {
    println!("=== Result Statistics ===\n");

    println!("Overview:");
    println!("  Videos stored: {}", stats.videos);
    println!("  Channels stored: {}", stats.channels);
    println!("  Identifiers processed: {}", stats.processed);
    if stats.unmarked > 0 {
        println!("  Stored but unmarked: {}", stats.unmarked);
    }
    println!();

    if let Some(run) = &stats.latest_run {
        println!("Latest Run:");
        println!("  #{} ({})", run.id, run.status.to_db_string());
        println!("  Started: {}", run.started_at);
        if let Some(finished) = &run.finished_at {
            println!("  Finished: {}", finished);
        }
        let report = run
            .report
            .as_deref()
            .and_then(|json| serde_json::from_str::<PipelineReport>(json).ok());
        if let Some(report) = report {
            for line in report.to_string().lines() {
                println!("  {}", line);
            }
        }
        println!();
    }

    if !stats.errors_by_component.is_empty() {
        println!("Error Summary ({} total):", stats.errors);
        let mut error_counts: Vec<_> = stats.errors_by_component.iter().collect();
        error_counts.sort_by(|a, b| b.1.cmp(a.1));

        for (component, count) in error_counts {
            println!("  {}: {}", component, count);
        }
        println!();
    }

    if !stats.recent_errors.is_empty() {
        println!("Recent Errors:");
        for row in &stats.recent_errors {
            println!(
                "  [{}] {} {}: {}",
                row.reported_at,
                row.component,
                row.identifier.as_deref().unwrap_or("-"),
                row.cause
            );
        }
    }
}

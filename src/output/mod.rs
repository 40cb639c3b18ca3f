//! Output module for operator-facing summaries
//!
//! This module handles:
//! - Loading statistics from the result database
//! - Printing them for `--stats`

pub mod stats;

pub use stats::{load_statistics, print_statistics, CrawlStatistics};

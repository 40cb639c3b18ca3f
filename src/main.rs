//! Mango-Ripple main entry point
//!
//! This is the command-line interface for the Mango-Ripple result pipeline.

use clap::Parser;
use mango_ripple::config::{load_config_with_hash, Config};
use mango_ripple::ingest::ingest;
use mango_ripple::output::{load_statistics, print_statistics};
use mango_ripple::pipeline::{ErrorEvent, Lifecycle, Pipeline};
use mango_ripple::storage::{open_storage, DedupStore, RunStatus, SqliteStorage, Storage};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

/// Mango-Ripple: crawl result pipeline
///
/// Reads crawl results as JSON lines, stores successful records in batches
/// and marks their identifiers as processed once they are safely stored.
#[derive(Parser, Debug)]
#[command(name = "mango-ripple")]
#[command(version = "1.0.0")]
#[command(about = "Batches crawl results into a backing store", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// JSON-lines file of crawl results (defaults to stdin)
    #[arg(short, long, value_name = "FILE")]
    input: Option<PathBuf>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and print the effective pipeline settings
    #[arg(long, conflicts_with = "stats")]
    dry_run: bool,

    /// Show statistics from the database and exit
    #[arg(long, conflicts_with = "dry_run")]
    stats: bool,

    /// Submit results even when their identifier is already processed
    #[arg(long)]
    no_skip_processed: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = match load_config_with_hash(&cli.config) {
        Ok((cfg, hash)) => {
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            (cfg, hash)
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    // Handle different modes
    if cli.dry_run {
        handle_dry_run(&config);
    } else if cli.stats {
        handle_stats(&config)?;
    } else {
        handle_run(config, &config_hash, cli.input, !cli.no_skip_processed).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("mango_ripple=info,warn"),
            1 => EnvFilter::new("mango_ripple=debug,info"),
            2 => EnvFilter::new("mango_ripple=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    // Logs go to stderr; stdout carries the run summary
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: prints the effective configuration
fn handle_dry_run(config: &Config) {
    let pipeline = &config.pipeline;
    println!("=== Mango-Ripple Dry Run ===\n");

    println!("Pipeline Configuration:");
    println!("  Max batch size: {}", pipeline.max_batch_size);
    println!("  Flush interval: {}ms", pipeline.flush_interval_ms);
    println!("  Drain grace period: {}ms", pipeline.drain_grace_period_ms);
    println!("  Uploaders: {}", pipeline.uploader_count);

    println!("\nQueue Capacities:");
    println!("  Input: {}", pipeline.input_queue_capacity);
    println!("  Batches: {}", pipeline.batch_queue_capacity);
    println!("  Dedup: {}", pipeline.dedup_queue_capacity);
    println!("  Errors: {}", pipeline.error_queue_capacity);

    println!("\nOutput:");
    println!("  Database: {}", config.output.database_path);

    println!("\n✓ Configuration is valid");
}

/// Handles the --stats mode: shows statistics from the database
fn handle_stats(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    println!("Database: {}\n", config.output.database_path);

    let storage = open_storage(Path::new(&config.output.database_path))?;
    let stats = load_statistics(&storage)?;
    print_statistics(&stats);

    Ok(())
}

/// Runs the pipeline over one input stream and records the run
async fn handle_run(
    config: Config,
    config_hash: &str,
    input: Option<PathBuf>,
    skip_processed: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let reader: Box<dyn AsyncBufRead + Unpin + Send> = match &input {
        Some(path) => {
            tracing::info!("Reading results from {}", path.display());
            Box::new(BufReader::new(tokio::fs::File::open(path).await?))
        }
        None => {
            tracing::info!("Reading results from stdin");
            Box::new(BufReader::new(tokio::io::stdin()))
        }
    };

    let storage = Arc::new(open_storage(Path::new(&config.output.database_path))?);
    let run_id = storage.create_run(config_hash)?;
    tracing::info!("Starting run {}", run_id);

    let lifecycle = Lifecycle::new();
    spawn_signal_handler(lifecycle.clone());

    let (sender, mut handle) = Pipeline::new(config.pipeline, storage.clone(), storage.clone())
        .with_lifecycle(lifecycle.clone())
        .start();
    let error_log = handle
        .take_errors()
        .map(|events| spawn_error_log(events, storage.clone(), run_id));

    let dedup: Option<Arc<dyn DedupStore>> = if skip_processed {
        Some(storage.clone())
    } else {
        None
    };

    // `ingest` consumes the sender; reaching the end of input drains the pipeline
    let summary = ingest(reader, sender, dedup).await;

    let report = handle.join().await;
    if let Some(task) = error_log {
        if let Err(e) = task.await {
            tracing::error!("Error log task failed: {}", e);
        }
    }

    let report = match report {
        Ok(report) => report,
        Err(e) => {
            storage.finish_run(run_id, RunStatus::Failed, "{}")?;
            return Err(e.into());
        }
    };
    let summary = match summary {
        Ok(summary) => summary,
        Err(e) => {
            tracing::error!("Reading input failed: {}", e);
            storage.finish_run(run_id, RunStatus::Failed, &report.to_json()?)?;
            return Err(e.into());
        }
    };

    let status = if lifecycle.is_stop_requested() {
        RunStatus::Interrupted
    } else {
        RunStatus::Completed
    };
    storage.finish_run(run_id, status, &report.to_json()?)?;
    tracing::info!("Run {} {}", run_id, status.to_db_string());

    println!("=== Run {} ({}) ===\n", run_id, status.to_db_string());
    println!(
        "Input: {} lines, {} submitted, {} malformed, {} already processed",
        summary.lines_read, summary.submitted, summary.malformed, summary.skipped_processed
    );
    println!("{}", report);

    Ok(())
}

/// Requests a graceful stop on Ctrl-C
fn spawn_signal_handler(lifecycle: Lifecycle) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => lifecycle.request_stop(),
            Err(e) => tracing::warn!("Could not listen for Ctrl-C: {}", e),
        }
    });
}

/// Persists operator error events until the pipeline's error stream closes
fn spawn_error_log(
    mut events: mpsc::Receiver<ErrorEvent>,
    storage: Arc<SqliteStorage>,
    run_id: i64,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let storage = storage.clone();
            let written =
                tokio::task::spawn_blocking(move || storage.record_error(run_id, &event)).await;
            match written {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!("Failed to log error event: {}", e),
                Err(e) => tracing::warn!("Error log write panicked: {}", e),
            }
        }
    })
}

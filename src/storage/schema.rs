//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the Mango-Ripple database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Track crawl runs
CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    config_hash TEXT NOT NULL,
    status TEXT NOT NULL,
    report TEXT
);

-- Stored records, keyed by crawl identifier so resubmission overwrites
CREATE TABLE IF NOT EXISTS records (
    identifier TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    body TEXT NOT NULL,
    first_stored_at TEXT NOT NULL,
    last_stored_at TEXT NOT NULL,
    store_count INTEGER NOT NULL DEFAULT 1
);

CREATE INDEX IF NOT EXISTS idx_records_kind ON records(kind);

-- Identifiers that need no further crawling
CREATE TABLE IF NOT EXISTS processed (
    identifier TEXT PRIMARY KEY,
    marked_at TEXT NOT NULL
);

-- Operator-facing error log
CREATE TABLE IF NOT EXISTS crawl_errors (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id INTEGER NOT NULL REFERENCES runs(id),
    component TEXT NOT NULL,
    identifier TEXT,
    cause TEXT NOT NULL,
    reported_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_crawl_errors_run ON crawl_errors(run_id);
CREATE INDEX IF NOT EXISTS idx_crawl_errors_identifier ON crawl_errors(identifier);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

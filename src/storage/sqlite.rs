//! SQLite storage implementation
//!
//! This module provides one SQLite database that serves as backing store,
//! dedup store and run log at the same time.

use crate::pipeline::ErrorEvent;
use crate::record::{Identifier, RecordKind, StoredRecord};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{BackingStore, DedupStore, Storage, StorageError, StorageResult};
use crate::storage::{ErrorRow, RunRecord, RunStatus};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// SQLite storage backend
///
/// Cloning is cheap; all clones share one connection.
#[derive(Clone)]
pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Creates an in-memory database
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> StorageResult<T>,
    ) -> StorageResult<T> {
        let mut conn = self.conn.lock().map_err(|_| StorageError::LockPoisoned)?;
        f(&mut conn)
    }

    /// Runs a closure against the connection on the blocking thread pool
    async fn blocking<T, F>(&self, f: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> StorageResult<T> + Send + 'static,
    {
        let storage = self.clone();
        tokio::task::spawn_blocking(move || storage.with_conn(f)).await?
    }
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
    Ok(RunRecord {
        id: row.get(0)?,
        started_at: row.get(1)?,
        finished_at: row.get(2)?,
        config_hash: row.get(3)?,
        status: RunStatus::from_db_string(&row.get::<_, String>(4)?).unwrap_or(RunStatus::Running),
        report: row.get(5)?,
    })
}

#[async_trait]
impl BackingStore for SqliteStorage {
    async fn submit_batch(&self, records: &[StoredRecord]) -> StorageResult<()> {
        let rows = records
            .iter()
            .map(|r| -> StorageResult<(String, &'static str, String)> {
                Ok((
                    r.identifier.to_string(),
                    r.record.kind().to_db_string(),
                    serde_json::to_string(&r.record)?,
                ))
            })
            .collect::<StorageResult<Vec<_>>>()?;

        self.blocking(move |conn| {
            let now = Utc::now().to_rfc3339();
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO records (identifier, kind, body, first_stored_at, last_stored_at)
                     VALUES (?1, ?2, ?3, ?4, ?4)
                     ON CONFLICT(identifier) DO UPDATE SET
                        kind = excluded.kind,
                        body = excluded.body,
                        last_stored_at = excluded.last_stored_at,
                        store_count = store_count + 1",
                )?;
                for (identifier, kind, body) in &rows {
                    stmt.execute(params![identifier, kind, body, now])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl DedupStore for SqliteStorage {
    async fn mark_processed(&self, identifier: &Identifier) -> StorageResult<()> {
        let identifier = identifier.to_string();
        self.blocking(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO processed (identifier, marked_at) VALUES (?1, ?2)",
                params![identifier, Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })
        .await
    }

    async fn is_processed(&self, identifier: &Identifier) -> StorageResult<bool> {
        let identifier = identifier.to_string();
        self.blocking(move |conn| {
            let found = conn
                .query_row(
                    "SELECT 1 FROM processed WHERE identifier = ?1",
                    params![identifier],
                    |_| Ok(()),
                )
                .optional()?;
            Ok(found.is_some())
        })
        .await
    }
}

impl Storage for SqliteStorage {
    // ===== Run Management =====

    fn create_run(&self, config_hash: &str) -> StorageResult<i64> {
        self.with_conn(|conn| {
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO runs (started_at, config_hash, status) VALUES (?1, ?2, ?3)",
                params![now, config_hash, RunStatus::Running.to_db_string()],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, started_at, finished_at, config_hash, status, report
                 FROM runs WHERE id = ?1",
                params![run_id],
                run_from_row,
            )
            .optional()?
            .ok_or(StorageError::RunNotFound(run_id))
        })
    }

    fn get_latest_run(&self) -> StorageResult<Option<RunRecord>> {
        self.with_conn(|conn| {
            let run = conn
                .query_row(
                    "SELECT id, started_at, finished_at, config_hash, status, report
                     FROM runs ORDER BY id DESC LIMIT 1",
                    [],
                    run_from_row,
                )
                .optional()?;
            Ok(run)
        })
    }

    fn finish_run(&self, run_id: i64, status: RunStatus, report: &str) -> StorageResult<()> {
        self.with_conn(|conn| {
            let now = Utc::now().to_rfc3339();
            let updated = conn.execute(
                "UPDATE runs SET status = ?1, finished_at = ?2, report = ?3 WHERE id = ?4",
                params![status.to_db_string(), now, report, run_id],
            )?;
            if updated == 0 {
                return Err(StorageError::RunNotFound(run_id));
            }
            Ok(())
        })
    }

    // ===== Error Log =====

    fn record_error(&self, run_id: i64, event: &ErrorEvent) -> StorageResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO crawl_errors (run_id, component, identifier, cause, reported_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    run_id,
                    event.component.as_str(),
                    event.identifier.as_ref().map(|id| id.as_str()),
                    event.cause,
                    event.at.to_rfc3339()
                ],
            )?;
            Ok(())
        })
    }

    fn recent_errors(&self, limit: u32) -> StorageResult<Vec<ErrorRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT run_id, component, identifier, cause, reported_at
                 FROM crawl_errors ORDER BY id DESC LIMIT ?1",
            )?;
            let rows = stmt
                .query_map(params![limit], |row| {
                    Ok(ErrorRow {
                        run_id: row.get(0)?,
                        component: row.get(1)?,
                        identifier: row.get(2)?,
                        cause: row.get(3)?,
                        reported_at: row.get(4)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // ===== Statistics =====

    fn count_records(&self, kind: RecordKind) -> StorageResult<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM records WHERE kind = ?1",
                params![kind.to_db_string()],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
    }

    fn count_processed(&self) -> StorageResult<u64> {
        self.with_conn(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM processed", [], |row| row.get(0))?;
            Ok(count as u64)
        })
    }

    fn count_unmarked(&self) -> StorageResult<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM records r
                 LEFT JOIN processed p ON p.identifier = r.identifier
                 WHERE p.identifier IS NULL",
                [],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
    }

    fn count_errors(&self) -> StorageResult<u64> {
        self.with_conn(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM crawl_errors", [], |row| row.get(0))?;
            Ok(count as u64)
        })
    }

    fn error_summary(&self) -> StorageResult<HashMap<String, u64>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT component, COUNT(*) FROM crawl_errors GROUP BY component")?;

            let mut summary = HashMap::new();
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;
            for row in rows {
                let (component, count) = row?;
                summary.insert(component, count as u64);
            }
            Ok(summary)
        })
    }
}

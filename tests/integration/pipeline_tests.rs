//! Integration tests for the result pipeline
//!
//! These tests drive the full pipeline through its public API with
//! in-memory stores, plus one run against a SQLite file.

use async_trait::async_trait;
use mango_ripple::config::PipelineConfig;
use mango_ripple::pipeline::{Component, ErrorEvent, Pipeline, PipelinePhase, PipelineReport};
use mango_ripple::record::{
    CrawlResult, Failure, Identifier, Record, RecordKind, StoredRecord, Video,
};
use mango_ripple::storage::{
    BackingStore, DedupStore, SqliteStorage, Storage, StorageError, StorageResult,
};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Backing store that records every submitted batch
#[derive(Default)]
struct RecordingStore {
    /// Submit calls to reject, by zero-based call index
    fail_calls: HashSet<usize>,
    delay: Duration,
    calls: Mutex<usize>,
    batches: Mutex<Vec<Vec<String>>>,
}

impl RecordingStore {
    fn batches(&self) -> Vec<Vec<String>> {
        self.batches.lock().unwrap().clone()
    }
}

#[async_trait]
impl BackingStore for RecordingStore {
    async fn submit_batch(&self, records: &[StoredRecord]) -> StorageResult<()> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            *calls - 1
        };
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail_calls.contains(&call) {
            return Err(StorageError::Database("write rejected".to_string()));
        }
        let ids = records.iter().map(|r| r.identifier.to_string()).collect();
        self.batches.lock().unwrap().push(ids);
        Ok(())
    }
}

/// Dedup store that records every marked identifier
#[derive(Default)]
struct RecordingDedup {
    delay: Duration,
    marked: Mutex<Vec<String>>,
}

impl RecordingDedup {
    fn marked(&self) -> HashSet<String> {
        self.marked.lock().unwrap().iter().cloned().collect()
    }
}

#[async_trait]
impl DedupStore for RecordingDedup {
    async fn mark_processed(&self, identifier: &Identifier) -> StorageResult<()> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.marked.lock().unwrap().push(identifier.to_string());
        Ok(())
    }

    async fn is_processed(&self, identifier: &Identifier) -> StorageResult<bool> {
        Ok(self.marked().contains(identifier.as_str()))
    }
}

fn config(max_batch_size: usize, flush_interval_ms: u64) -> PipelineConfig {
    PipelineConfig {
        max_batch_size,
        flush_interval_ms,
        ..PipelineConfig::default()
    }
}

fn ok(id: &str) -> CrawlResult {
    CrawlResult::success(Identifier::new(id).unwrap(), Record::Video(Video::new(id)))
}

fn failed(id: &str, failure: Failure) -> CrawlResult {
    CrawlResult::failure(Identifier::new(id).unwrap(), failure)
}

fn set(ids: &[&str]) -> HashSet<String> {
    ids.iter().map(|s| s.to_string()).collect()
}

async fn drain_errors(mut rx: mpsc::Receiver<ErrorEvent>) -> Vec<ErrorEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

#[tokio::test(start_paused = true)]
async fn test_success_permanent_and_transient_results() {
    let store = Arc::new(RecordingStore::default());
    let dedup = Arc::new(RecordingDedup::default());
    let (sender, mut handle) =
        Pipeline::new(config(3, 5_000), store.clone(), dedup.clone()).start();
    let errors = handle.take_errors().unwrap();

    for id in ["A", "B", "C"] {
        sender.send(ok(id)).await.unwrap();
    }
    sender
        .send(failed("D", Failure::permanent("video removed")))
        .await
        .unwrap();
    sender
        .send(failed("E", Failure::transient("connection reset")))
        .await
        .unwrap();
    drop(sender);

    let report = handle.join().await.unwrap();
    let events = drain_errors(errors).await;

    assert_eq!(store.batches(), vec![vec!["A", "B", "C"]]);
    assert_eq!(dedup.marked(), set(&["A", "B", "C", "D"]));
    assert!(events.iter().any(|e| {
        e.component == Component::Accumulator
            && e.identifier.as_ref().map(|id| id.as_str()) == Some("E")
    }));
    assert_eq!(report.transient_failures, 1);
    assert_eq!(report.permanent_failures, 1);
    assert_eq!(report.identifiers_marked, 4);
}

#[tokio::test(start_paused = true)]
async fn test_batches_fill_to_max_size() {
    let store = Arc::new(RecordingStore::default());
    let dedup = Arc::new(RecordingDedup::default());
    let (sender, handle) = Pipeline::new(config(4, 60_000), store.clone(), dedup).start();

    for i in 0..10 {
        sender.send(ok(&format!("v{:02}", i))).await.unwrap();
    }
    drop(sender);
    handle.join().await.unwrap();

    let mut sizes: Vec<usize> = store.batches().iter().map(Vec::len).collect();
    sizes.sort_unstable();
    // Two full batches, then the drain flush carries the remainder
    assert_eq!(sizes, vec![2, 4, 4]);
}

#[tokio::test(start_paused = true)]
async fn test_partial_batch_flushes_on_interval() {
    let store = Arc::new(RecordingStore::default());
    let dedup = Arc::new(RecordingDedup::default());
    let (sender, handle) = Pipeline::new(config(100, 1_000), store.clone(), dedup.clone()).start();

    sender.send(ok("A")).await.unwrap();
    sender.send(ok("B")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1_500)).await;

    // Flushed by the timer while the producer is still connected
    assert_eq!(store.batches(), vec![vec!["A", "B"]]);

    // Idle windows never reach the store
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(store.batches().len(), 1);

    drop(sender);
    let report = handle.join().await.unwrap();
    assert_eq!(report.batches_flushed, 1);
    assert_eq!(dedup.marked(), set(&["A", "B"]));
}

#[tokio::test(start_paused = true)]
async fn test_batch_preserves_arrival_order() {
    let store = Arc::new(RecordingStore::default());
    let dedup = Arc::new(RecordingDedup::default());
    let (sender, handle) = Pipeline::new(config(5, 60_000), store.clone(), dedup).start();

    let ids = ["q", "w", "e", "r", "t"];
    for id in ids {
        sender.send(ok(id)).await.unwrap();
    }
    drop(sender);
    handle.join().await.unwrap();

    assert_eq!(store.batches(), vec![ids.to_vec()]);
}

#[tokio::test(start_paused = true)]
async fn test_store_failure_marks_nothing_from_that_batch() {
    let store = Arc::new(RecordingStore {
        fail_calls: [0].into_iter().collect(),
        ..RecordingStore::default()
    });
    let dedup = Arc::new(RecordingDedup::default());
    let pipeline_config = PipelineConfig {
        uploader_count: 1,
        ..config(2, 60_000)
    };
    let (sender, mut handle) = Pipeline::new(pipeline_config, store.clone(), dedup.clone()).start();
    let errors = handle.take_errors().unwrap();

    for id in ["A", "B", "C", "D"] {
        sender.send(ok(id)).await.unwrap();
    }
    drop(sender);
    let report = handle.join().await.unwrap();
    let events = drain_errors(errors).await;

    assert_eq!(store.batches(), vec![vec!["C", "D"]]);
    assert_eq!(dedup.marked(), set(&["C", "D"]));
    assert_eq!(report.batches_failed, 1);
    assert!(events
        .iter()
        .any(|e| e.component == Component::Uploader && e.cause.contains("batch of 2 records")));
}

#[tokio::test(start_paused = true)]
async fn test_stop_drains_handed_off_batches() {
    let store = Arc::new(RecordingStore {
        delay: Duration::from_secs(2),
        ..RecordingStore::default()
    });
    let dedup = Arc::new(RecordingDedup::default());
    let pipeline_config = PipelineConfig {
        uploader_count: 2,
        drain_grace_period_ms: 30_000,
        ..config(2, 60_000)
    };
    let (sender, handle) = Pipeline::new(pipeline_config, store.clone(), dedup.clone()).start();
    let lifecycle = handle.lifecycle();

    for id in ["A", "B", "C", "D", "E"] {
        sender.send(ok(id)).await.unwrap();
    }
    tokio::task::yield_now().await;
    handle.request_stop();
    assert_eq!(lifecycle.phase(), PipelinePhase::Draining);

    let report: PipelineReport = handle.join().await.unwrap();
    assert_eq!(lifecycle.phase(), PipelinePhase::Stopped);

    // Everything accepted before the stop was stored and marked
    let stored: HashSet<String> = store.batches().into_iter().flatten().collect();
    assert_eq!(stored, set(&["A", "B", "C", "D", "E"]));
    assert_eq!(dedup.marked(), stored);
    assert_eq!(report.identifiers_abandoned, 0);
    assert!(sender.send(ok("F")).await.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_grace_period_bounds_dedup_drain() {
    let store = Arc::new(RecordingStore::default());
    let dedup = Arc::new(RecordingDedup {
        delay: Duration::from_secs(1),
        ..RecordingDedup::default()
    });
    let pipeline_config = PipelineConfig {
        drain_grace_period_ms: 2_500,
        ..config(20, 60_000)
    };
    let (sender, handle) = Pipeline::new(pipeline_config, store.clone(), dedup.clone()).start();

    for i in 0..20 {
        sender.send(ok(&format!("v{:02}", i))).await.unwrap();
    }
    // Let the full batch upload and start marking
    tokio::time::sleep(Duration::from_millis(10)).await;
    handle.request_stop();

    // The grace period starts at the stop and covers the in-flight mark
    let started = tokio::time::Instant::now();
    let report = handle.join().await.unwrap();
    assert!(started.elapsed() <= Duration::from_millis(2_600));

    assert_eq!(report.records_stored, 20);
    assert!(report.identifiers_marked < 20);
    assert_eq!(report.identifiers_marked + report.identifiers_abandoned, 20);
    // Unmarked identifiers are stored; a later run will just store them again
    assert!(dedup.marked().len() < 20);
}

/// Dedup store whose first mark never returns
#[derive(Default)]
struct StuckDedup {
    calls: Mutex<usize>,
}

#[async_trait]
impl DedupStore for StuckDedup {
    async fn mark_processed(&self, _identifier: &Identifier) -> StorageResult<()> {
        let first = {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            *calls == 1
        };
        if first {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn is_processed(&self, _identifier: &Identifier) -> StorageResult<bool> {
        Ok(false)
    }
}

#[tokio::test(start_paused = true)]
async fn test_stop_completes_when_dedup_store_hangs() {
    let store = Arc::new(RecordingStore::default());
    let pipeline_config = PipelineConfig {
        drain_grace_period_ms: 1_000,
        ..config(1, 60_000)
    };
    let (sender, handle) =
        Pipeline::new(pipeline_config, store.clone(), Arc::new(StuckDedup::default())).start();
    let lifecycle = handle.lifecycle();

    sender.send(ok("A")).await.unwrap();
    // A is stored and its mark is now stuck
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(store.batches(), vec![vec!["A"]]);

    let started = tokio::time::Instant::now();
    handle.request_stop();
    let joined = tokio::time::timeout(Duration::from_secs(60), handle.join()).await;

    let report = joined.expect("join outlived the grace period").unwrap();
    assert!(started.elapsed() <= Duration::from_millis(1_100));
    assert_eq!(lifecycle.phase(), PipelinePhase::Stopped);
    assert_eq!(report.records_stored, 1);
    assert_eq!(report.identifiers_marked, 0);
    assert_eq!(report.identifiers_abandoned, 1);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_producers() {
    let store = Arc::new(RecordingStore::default());
    let dedup = Arc::new(RecordingDedup::default());
    let (sender, handle) = Pipeline::new(config(7, 100), store.clone(), dedup.clone()).start();

    let producers: Vec<_> = (0..4)
        .map(|p| {
            let sender = sender.clone();
            tokio::spawn(async move {
                for i in 0..25 {
                    sender.send(ok(&format!("p{}-{}", p, i))).await.unwrap();
                }
            })
        })
        .collect();
    drop(sender);
    for producer in producers {
        producer.await.unwrap();
    }

    let report = handle.join().await.unwrap();
    assert_eq!(report.records_stored, 100);
    assert_eq!(dedup.marked().len(), 100);
    assert!(store.batches().iter().all(|b| !b.is_empty() && b.len() <= 7));
}

#[tokio::test]
async fn test_sqlite_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("results.db");
    let storage = Arc::new(SqliteStorage::new(&db_path).unwrap());

    let (sender, handle) =
        Pipeline::new(config(2, 50), storage.clone(), storage.clone()).start();
    for id in ["A", "B", "C"] {
        sender.send(ok(id)).await.unwrap();
    }
    sender
        .send(failed("D", Failure::permanent("private video")))
        .await
        .unwrap();
    drop(sender);
    handle.join().await.unwrap();

    assert_eq!(storage.count_records(RecordKind::Video).unwrap(), 3);
    assert_eq!(storage.count_processed().unwrap(), 4);
    for id in ["A", "B", "C", "D"] {
        let id = Identifier::new(id).unwrap();
        assert!(storage.is_processed(&id).await.unwrap());
    }

    // Replaying stored records is an overwrite, not a duplicate
    let (sender, handle) =
        Pipeline::new(config(2, 50), storage.clone(), storage.clone()).start();
    sender.send(ok("A")).await.unwrap();
    drop(sender);
    handle.join().await.unwrap();
    assert_eq!(storage.count_records(RecordKind::Video).unwrap(), 3);
}

//! Upsert pipeline integration tests
//!
//! Runs batches through a full engine over an in-memory SQLite store
//! and inspects the stored shard rows.

use kuba_rollup::error::UpsertError;
use kuba_rollup::storage::{ReportingStore, SqliteStore};
use kuba_rollup::upsert::merge::decode_interval;
use kuba_rollup::{Operation, Record, RollupEngine, RollupEngineBuilder, Row};
use serde_json::{json, Map, Value};
use std::sync::Arc;

const TABLE: &str = "Daily_2024_03_07";

fn record(ts: &str, duration: f64, cost: f64) -> Record {
    json!({
        "client": "x",
        "carrier": "y",
        "destination": "z",
        "start_date": ts,
        "duration": duration,
        "cost": cost,
    })
    .as_object()
    .cloned()
    .unwrap()
}

async fn engine() -> (RollupEngine, Arc<dyn ReportingStore>) {
    let store: Arc<dyn ReportingStore> = Arc::new(SqliteStore::in_memory().unwrap());
    let engine = RollupEngineBuilder::new()
        .with_store_arc(Arc::clone(&store))
        .without_cache()
        .build()
        .await
        .unwrap();
    (engine, store)
}

async fn stored_rows(store: &Arc<dyn ReportingStore>, table: &str) -> Vec<Row> {
    store
        .select(&format!("SELECT * FROM \"{}\"", table), &[])
        .await
        .unwrap()
}

fn interval(row: &Row, column: &str) -> Option<Map<String, Value>> {
    decode_interval(row.get(column)).unwrap()
}

fn number(map: &Map<String, Value>, key: &str) -> f64 {
    map.get(key).and_then(Value::as_f64).unwrap_or(f64::NAN)
}

// ============================================================================
// Inserts
// ============================================================================

#[tokio::test]
async fn test_same_bucket_inserts_accumulate() {
    let (engine, store) = engine().await;

    let first = engine.insert(&[record("2024-03-07 10:05:00", 10.0, 2.5)]).await.unwrap();
    assert_eq!(first.inserted, 1);

    let second = engine.insert(&[record("2024-03-07 10:40:00", 5.0, 1.5)]).await.unwrap();
    assert_eq!(second.updated, 1);
    assert_eq!(second.inserted, 0);

    let rows = stored_rows(&store, TABLE).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["client"], json!("x"));

    let bucket = interval(&rows[0], "interval_10_11").unwrap();
    assert_eq!(number(&bucket, "total_duration"), 15.0);
    assert_eq!(number(&bucket, "total_cost"), 4.0);
    assert_eq!(number(&bucket, "total_records"), 2.0);
    assert_eq!(bucket["distinct_records"], json!("z"));

    assert!(interval(&rows[0], "interval_9_10").is_none());
}

#[tokio::test]
async fn test_batch_folds_before_writing() {
    let (engine, store) = engine().await;

    let report = engine
        .insert(&[
            record("2024-03-07 10:05:00", 10.0, 2.5),
            record("2024-03-07 10:40:00", 5.0, 1.5),
            record("2024-03-07 11:10:00", 1.0, 0.25),
        ])
        .await
        .unwrap();
    assert_eq!(report.records, 3);
    assert_eq!(report.inserted, 1);

    let rows = stored_rows(&store, TABLE).await;
    assert_eq!(rows.len(), 1);
    let ten = interval(&rows[0], "interval_10_11").unwrap();
    let eleven = interval(&rows[0], "interval_11_12").unwrap();
    assert_eq!(number(&ten, "total_records"), 2.0);
    assert_eq!(number(&eleven, "total_cost"), 0.25);
}

#[tokio::test]
async fn test_distinct_pivots_get_separate_rows() {
    let (engine, store) = engine().await;

    let mut other = record("2024-03-07 10:05:00", 1.0, 1.0);
    other.insert("client".to_string(), json!("w"));

    let report = engine
        .insert(&[record("2024-03-07 10:05:00", 1.0, 1.0), other])
        .await
        .unwrap();
    assert_eq!(report.inserted, 2);
    assert_eq!(stored_rows(&store, TABLE).await.len(), 2);
}

#[tokio::test]
async fn test_concurrent_writers_same_row() {
    let (engine, store) = engine().await;
    let engine = Arc::new(engine);

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                let ts = format!("2024-03-07 10:{:02}:00", i * 5);
                engine.insert(&[record(&ts, 1.0, 0.5)]).await
            })
        })
        .collect();

    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let rows = stored_rows(&store, TABLE).await;
    assert_eq!(rows.len(), 1);
    let bucket = interval(&rows[0], "interval_10_11").unwrap();
    assert_eq!(number(&bucket, "total_records"), 8.0);
    assert_eq!(number(&bucket, "total_duration"), 8.0);
}

// ============================================================================
// Retractions
// ============================================================================

#[tokio::test]
async fn test_delete_to_empty_removes_row() {
    let (engine, store) = engine().await;
    let a = record("2024-03-07 10:05:00", 10.0, 2.5);
    let b = record("2024-03-07 10:40:00", 5.0, 1.5);

    engine.insert(&[a.clone(), b.clone()]).await.unwrap();

    let partial = engine.delete(&[a]).await.unwrap();
    assert_eq!(partial.updated, 1);
    let rows = stored_rows(&store, TABLE).await;
    let bucket = interval(&rows[0], "interval_10_11").unwrap();
    assert_eq!(number(&bucket, "total_duration"), 5.0);
    assert_eq!(number(&bucket, "total_records"), 1.0);

    let last = engine.delete(&[b]).await.unwrap();
    assert_eq!(last.deleted, 1);
    assert!(stored_rows(&store, TABLE).await.is_empty());
}

#[tokio::test]
async fn test_delete_one_bucket_keeps_row() {
    let (engine, store) = engine().await;
    let early = record("2024-03-07 08:00:00", 3.0, 1.0);
    let late = record("2024-03-07 20:00:00", 4.0, 1.0);

    engine.insert(&[early.clone(), late]).await.unwrap();
    let report = engine.modify(Operation::Delete, &[early]).await.unwrap();
    assert_eq!(report.updated, 1);

    let rows = stored_rows(&store, TABLE).await;
    assert_eq!(rows.len(), 1);
    assert!(interval(&rows[0], "interval_8_9").is_none());
    assert_eq!(number(&interval(&rows[0], "interval_20_21").unwrap(), "total_duration"), 4.0);
}

#[tokio::test]
async fn test_delete_missing_table() {
    let (engine, _) = engine().await;

    let err = engine
        .delete(&[record("2024-03-07 10:05:00", 1.0, 1.0)])
        .await
        .unwrap_err();
    assert!(matches!(err, UpsertError::RowNotFound { .. }));
}

#[tokio::test]
async fn test_delete_missing_row() {
    let (engine, _) = engine().await;
    engine.insert(&[record("2024-03-07 10:05:00", 1.0, 1.0)]).await.unwrap();

    let mut stranger = record("2024-03-07 10:05:00", 1.0, 1.0);
    stranger.insert("carrier".to_string(), json!("nobody"));

    let err = engine.delete(&[stranger]).await.unwrap_err();
    match err {
        UpsertError::RowNotFound { table, .. } => assert_eq!(table, TABLE),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_delete_from_empty_bucket_rejected() {
    let (engine, store) = engine().await;
    engine.insert(&[record("2024-03-07 10:05:00", 10.0, 2.5)]).await.unwrap();
    let before = stored_rows(&store, TABLE).await;

    let err = engine
        .delete(&[record("2024-03-07 15:00:00", 10.0, 2.5)])
        .await
        .unwrap_err();
    match err {
        UpsertError::RetractionUnderflow { table, column, stored, retracted, .. } => {
            assert_eq!(table, TABLE);
            assert_eq!(column, "interval_15_16");
            assert_eq!((stored, retracted), (0, 1));
        }
        other => panic!("unexpected error: {other}"),
    }

    // Neither bucket moved
    assert_eq!(stored_rows(&store, TABLE).await, before);
}

#[tokio::test]
async fn test_delete_more_than_stored_rejected() {
    let (engine, store) = engine().await;
    let a = record("2024-03-07 10:05:00", 10.0, 2.5);
    engine.insert(&[a.clone()]).await.unwrap();

    let err = engine.delete(&[a.clone(), a]).await.unwrap_err();
    assert!(matches!(
        err,
        UpsertError::RetractionUnderflow { stored: 1, retracted: 2, .. }
    ));

    let rows = stored_rows(&store, TABLE).await;
    assert_eq!(number(&interval(&rows[0], "interval_10_11").unwrap(), "total_records"), 1.0);
}

// ============================================================================
// Validation
// ============================================================================

#[tokio::test]
async fn test_incomplete_record_writes_nothing() {
    let (engine, store) = engine().await;

    let mut broken = record("2024-03-07 10:05:00", 1.0, 1.0);
    broken.remove("carrier");

    let err = engine
        .insert(&[record("2024-03-07 10:05:00", 1.0, 1.0), broken])
        .await
        .unwrap_err();
    assert!(matches!(err, UpsertError::IncompleteRecord { index: 1, .. }));
    assert!(!store.table_exists(TABLE).await.unwrap());
}

#[tokio::test]
async fn test_bad_timestamp_rejected() {
    let (engine, _) = engine().await;
    let err = engine
        .insert(&[record("yesterday at noon", 1.0, 1.0)])
        .await
        .unwrap_err();
    assert!(matches!(err, UpsertError::InvalidTimestamp { index: 0, .. }));
}

#[tokio::test]
async fn test_empty_batch_rejected() {
    let (engine, _) = engine().await;
    assert!(matches!(engine.insert(&[]).await, Err(UpsertError::EmptyBatch)));
}

#[test]
fn test_unknown_operation() {
    let err = "merge".parse::<Operation>().unwrap_err();
    assert!(matches!(err, UpsertError::UnknownOperation(op) if op == "merge"));
}

//! Insert/modify pipeline
//!
//! Raw record batches are validated, grouped into one delta per
//! (shard table, pivot hash), and merged into the stored rows with a
//! read-merge-write cycle:
//!
//! 1. no stored row: insert (a retraction of a missing row is an error)
//! 2. retraction of more records than an interval holds: error, row untouched
//! 3. retraction that empties every interval: delete the row
//! 4. otherwise: update the touched interval columns
//!
//! Batches are not transactional. Rows are written in first-seen order
//! and a failure leaves the rows before it committed. Writers to the
//! same row within this process are serialized by [`StripedLocks`].

pub mod locks;
pub mod merge;
pub mod transform;

pub use locks::StripedLocks;
pub use transform::{group_batch, pivot_hash, PendingRow};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use crate::aggregation::RECORD_COUNT_KEY;
use crate::error::UpsertError;
use crate::metrics;
use crate::schema::ConfigModel;
use crate::shard::ShardTable;
use crate::storage::{ReportingStore, TableCatalog};
use crate::types::{Operation, Record, Row};
use merge::{decode_interval, encode_interval, merge_interval};

/// Outcome of one batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertReport {
    /// Records in the batch
    pub records: usize,
    /// Rows inserted
    pub inserted: usize,
    /// Rows updated
    pub updated: usize,
    /// Rows physically deleted
    pub deleted: usize,
}

enum RowOutcome {
    Inserted,
    Updated,
    Deleted,
}

/// Read-merge-write pipeline over a reporting store
pub struct UpsertPipeline {
    model: Arc<ConfigModel>,
    store: Arc<dyn ReportingStore>,
    catalog: Arc<TableCatalog>,
    locks: Arc<StripedLocks>,
}

impl UpsertPipeline {
    /// Create a pipeline
    pub fn new(
        model: Arc<ConfigModel>,
        store: Arc<dyn ReportingStore>,
        catalog: Arc<TableCatalog>,
        locks: Arc<StripedLocks>,
    ) -> Self {
        Self {
            model,
            store,
            catalog,
            locks,
        }
    }

    /// Apply a batch
    pub async fn apply(&self, op: Operation, records: &[Record]) -> Result<UpsertReport, UpsertError> {
        let started = Instant::now();
        let rows = group_batch(&self.model, op, records)?;
        debug!(operation = %op, records = records.len(), rows = rows.len(), "Grouped batch");

        let mut report = UpsertReport {
            records: records.len(),
            ..UpsertReport::default()
        };

        for row in &rows {
            let outcome = self.apply_row(op, row).await;
            let label = match &outcome {
                Ok(RowOutcome::Inserted) => "inserted",
                Ok(RowOutcome::Updated) => "updated",
                Ok(RowOutcome::Deleted) => "deleted",
                Err(_) => "error",
            };
            metrics::record_upsert_row(op.as_str(), label);

            match outcome? {
                RowOutcome::Inserted => report.inserted += 1,
                RowOutcome::Updated => report.updated += 1,
                RowOutcome::Deleted => report.deleted += 1,
            }
        }

        metrics::record_upsert_batch(op.as_str(), started.elapsed().as_secs_f64());
        info!(
            operation = %op,
            records = report.records,
            inserted = report.inserted,
            updated = report.updated,
            deleted = report.deleted,
            "Applied batch"
        );
        Ok(report)
    }

    /// Apply a batch given the operation as text
    pub async fn apply_named(&self, operation: &str, records: &[Record]) -> Result<UpsertReport, UpsertError> {
        let op: Operation = operation.parse()?;
        self.apply(op, records).await
    }

    async fn apply_row(&self, op: Operation, row: &PendingRow) -> Result<RowOutcome, UpsertError> {
        let table = ShardTable::for_instant(&self.model, &row.anchor)?;
        let primary = self.model.primary().name.as_str();

        if op == Operation::Insert {
            self.catalog.ensure(&table).await?;
        } else if !self.catalog.exists(&table.name).await? {
            return Err(UpsertError::RowNotFound {
                table: table.name.clone(),
                hash: row.hash.clone(),
            });
        }

        let _guard = self.locks.lock(&format!("{}:{}", table.name, row.hash)).await;
        let stored = self.store.find_row(&table.name, primary, &row.hash).await?;

        let Some(stored) = stored else {
            if op == Operation::Delete {
                return Err(UpsertError::RowNotFound {
                    table: table.name.clone(),
                    hash: row.hash.clone(),
                });
            }

            let mut insert = Row::new();
            insert.insert(primary.to_string(), row.hash.clone().into());
            for (name, value) in &row.pivots {
                insert.insert(name.clone(), value.clone());
            }
            for (column, delta) in &row.deltas {
                insert.insert(column.clone(), encode_interval(merge_interval(&self.model, delta, None)));
            }
            self.store.insert_row(&table.name, &insert).await?;
            return Ok(RowOutcome::Inserted);
        };

        let mut updates = Row::new();
        for (column, delta) in &row.deltas {
            let existing = decode_interval(stored.get(column)).map_err(|reason| UpsertError::CorruptRow {
                table: table.name.clone(),
                column: column.clone(),
                reason,
            })?;
            if op == Operation::Delete {
                let stored_records = existing
                    .as_ref()
                    .and_then(|m| m.get(RECORD_COUNT_KEY))
                    .and_then(Value::as_i64)
                    .unwrap_or(0);
                let retracted = delta.get(RECORD_COUNT_KEY).and_then(Value::as_i64).map_or(0, i64::abs);
                if retracted > stored_records {
                    return Err(UpsertError::RetractionUnderflow {
                        table: table.name.clone(),
                        hash: row.hash.clone(),
                        column: column.clone(),
                        stored: stored_records,
                        retracted,
                    });
                }
            }
            let merged = merge_interval(&self.model, delta, existing.as_ref());
            updates.insert(column.clone(), encode_interval(merged));
        }

        if op == Operation::Delete {
            let all_empty = table.interval_columns().iter().all(|column| {
                match updates.get(&column.name) {
                    Some(value) => value.is_null(),
                    None => stored.get(&column.name).map_or(true, |v| v.is_null()),
                }
            });
            if all_empty {
                self.store.delete_row(&table.name, primary, &row.hash).await?;
                debug!(table = %table.name, hash = %row.hash, "Deleted emptied row");
                return Ok(RowOutcome::Deleted);
            }
        }

        self.store.update_row(&table.name, primary, &row.hash, &updates).await?;
        Ok(RowOutcome::Updated)
    }
}

//! Multi-shard fetch dispatch
//!
//! Fills a fetch's temp table with one partial row per (shard, group),
//! either in the caller with one `INSERT ... UNION ALL` statement
//! (serial) or by fanning one task per shard out to a [`WorkerPool`]
//! (parallel). The dispatcher returns only after every shard statement
//! has finished: temp table DDL must never overlap worker writes.
//! Tasks are not cancelled when a sibling fails.

pub mod handler;
pub mod pool;

pub use handler::{ShardFetchHandler, ShardTask, TaskReply, SHARD_FETCH_TASK};
pub use pool::{TaskHandler, TaskResult, TaskTicket, WorkerPool, WorkerPoolBuilder};

use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::{DispatchConfig, DispatchStrategy};
use crate::error::FetchDataError;
use crate::metrics;
use crate::query::{insert_into, ShardQuery, TempTableSpec};
use crate::storage::{Dialect, ReportingStore};

/// Strategy-specific shard fan-out
pub enum Dispatcher {
    /// Single statement in the caller
    Serial {
        /// Store the statement runs against
        store: Arc<dyn ReportingStore>,
    },
    /// One pool task per shard
    Parallel {
        /// Store used to render statements
        store: Arc<dyn ReportingStore>,
        /// Started worker pool with [`ShardFetchHandler`] registered
        pool: Arc<WorkerPool>,
    },
}

impl Dispatcher {
    /// Build the dispatcher for a configured strategy
    ///
    /// The parallel strategy starts its own worker pool.
    pub fn from_config(config: &DispatchConfig, store: Arc<dyn ReportingStore>) -> Self {
        match config.strategy {
            DispatchStrategy::Serial => Dispatcher::Serial { store },
            DispatchStrategy::Parallel => {
                let pool = WorkerPool::builder()
                    .workers(config.workers)
                    .queue_capacity(config.queue_capacity)
                    .register(SHARD_FETCH_TASK, Arc::new(ShardFetchHandler::new(Arc::clone(&store))))
                    .build();
                pool.start();
                Dispatcher::Parallel {
                    store,
                    pool: Arc::new(pool),
                }
            }
        }
    }

    /// Strategy label
    pub fn strategy(&self) -> DispatchStrategy {
        match self {
            Dispatcher::Serial { .. } => DispatchStrategy::Serial,
            Dispatcher::Parallel { .. } => DispatchStrategy::Parallel,
        }
    }

    /// Write every shard's partials into `temp`
    pub async fn dispatch(&self, temp: &TempTableSpec, shards: &[ShardQuery]) -> Result<(), FetchDataError> {
        match self {
            Dispatcher::Serial { store } => dispatch_serial(store.as_ref(), temp, shards).await,
            Dispatcher::Parallel { store, pool } => dispatch_parallel(store.as_ref(), pool, temp, shards).await,
        }
    }

    /// Stop the worker pool, if any
    pub async fn shutdown(&self) {
        if let Dispatcher::Parallel { pool, .. } = self {
            pool.shutdown().await;
        }
    }
}

async fn dispatch_serial(
    store: &dyn ReportingStore,
    temp: &TempTableSpec,
    shards: &[ShardQuery],
) -> Result<(), FetchDataError> {
    if shards.is_empty() {
        return Ok(());
    }
    let dialect = store.dialect();
    let union = shards
        .iter()
        .map(|q| q.sql.as_str())
        .collect::<Vec<_>>()
        .join(" UNION ALL ");
    let params: Vec<_> = shards.iter().flat_map(|q| q.params.iter().cloned()).collect();
    let sql = format!(
        "INSERT INTO {} ({}) {}",
        dialect.quote_ident(&temp.name),
        temp.column_list(dialect),
        union
    );

    match store.execute(&sql, &params).await {
        Ok(rows) => {
            metrics::record_shard_tasks("serial", shards.len(), 0);
            debug!(temp = %temp.name, shards = shards.len(), rows, "Serial dispatch complete");
            Ok(())
        }
        Err(e) => {
            // One statement: no shard's partials were written
            metrics::record_shard_tasks("serial", shards.len(), shards.len());
            warn!(temp = %temp.name, shards = shards.len(), error = %e, "Serial dispatch failed");
            Err(FetchDataError::ShardTasksFailed {
                failed: shards.len(),
                total: shards.len(),
            })
        }
    }
}

/// Encode one task payload per shard
///
/// Every payload is built before anything is submitted, so an encoding
/// failure never leaves tasks running against the temp table.
fn encode_tasks(
    temp: &TempTableSpec,
    dialect: &Dialect,
    shards: &[ShardQuery],
) -> Result<Vec<Vec<u8>>, FetchDataError> {
    shards
        .iter()
        .map(|shard| {
            let task = ShardTask {
                temp_table: temp.name.clone(),
                query: insert_into(temp, dialect, shard),
            };
            serde_json::to_vec(&task).map_err(|e| FetchDataError::Dispatch(e.to_string()))
        })
        .collect()
}

async fn dispatch_parallel(
    store: &dyn ReportingStore,
    pool: &WorkerPool,
    temp: &TempTableSpec,
    shards: &[ShardQuery],
) -> Result<(), FetchDataError> {
    let payloads = encode_tasks(temp, store.dialect(), shards)?;
    let mut tickets = Vec::with_capacity(payloads.len());
    for payload in payloads {
        tickets.push(pool.submit(SHARD_FETCH_TASK, payload).await);
    }

    // Barrier: every task reports before anything else touches the temp table
    let replies = join_all(tickets).await;

    let mut failed = 0;
    for (shard, reply) in shards.iter().zip(replies) {
        let outcome = reply.and_then(|bytes| {
            serde_json::from_slice::<TaskReply>(&bytes).map_err(|e| format!("undecodable reply: {}", e))
        });
        match outcome {
            Ok(TaskReply { success: true, .. }) => {}
            Ok(TaskReply { error, .. }) => {
                failed += 1;
                warn!(table = %shard.table, error = error.as_deref().unwrap_or("unknown"), "Shard task failed");
            }
            Err(e) => {
                failed += 1;
                warn!(table = %shard.table, error = %e, "Shard task failed");
            }
        }
    }

    metrics::record_shard_tasks("parallel", shards.len(), failed);
    if failed > 0 {
        return Err(FetchDataError::ShardTasksFailed {
            failed,
            total: shards.len(),
        });
    }
    debug!(temp = %temp.name, shards = shards.len(), "Parallel dispatch complete");
    Ok(())
}

//! Shard fetch task: run one shard's insert-into-temp statement

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use super::pool::{TaskHandler, TaskResult};
use crate::query::ShardQuery;
use crate::storage::ReportingStore;

/// Handler name shard tasks are registered under
pub const SHARD_FETCH_TASK: &str = "fetch_shard";

/// Payload of one shard task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardTask {
    /// Temp table the query writes into
    pub temp_table: String,
    /// Insert statement for the shard
    pub query: ShardQuery,
}

/// Reply of one shard task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskReply {
    /// Whether the statement ran
    pub success: bool,
    /// Failure description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskReply {
    fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Executes [`ShardTask`]s against a store
///
/// Statement failures are reported in the reply rather than as a task
/// error.
pub struct ShardFetchHandler {
    store: Arc<dyn ReportingStore>,
}

impl ShardFetchHandler {
    /// Create a handler over `store`
    pub fn new(store: Arc<dyn ReportingStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl TaskHandler for ShardFetchHandler {
    async fn handle(&self, payload: Vec<u8>) -> TaskResult {
        let reply = match serde_json::from_slice::<ShardTask>(&payload) {
            Err(e) => TaskReply::failed(format!("invalid shard task: {}", e)),
            Ok(task) => match self.store.execute(&task.query.sql, &task.query.params).await {
                Ok(rows) => {
                    debug!(table = %task.query.table, temp = %task.temp_table, rows, "Shard partials written");
                    TaskReply::ok()
                }
                Err(e) => TaskReply::failed(e.to_string()),
            },
        };
        serde_json::to_vec(&reply).map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteStore;
    use serde_json::json;

    #[tokio::test]
    async fn test_handler_reports_failure_in_reply() {
        let store: Arc<dyn ReportingStore> = Arc::new(SqliteStore::in_memory().unwrap());
        let handler = ShardFetchHandler::new(Arc::clone(&store));

        let task = ShardTask {
            temp_table: "tmp".to_string(),
            query: ShardQuery {
                table: "missing".to_string(),
                sql: "INSERT INTO \"missing\" VALUES (?)".to_string(),
                params: vec![json!(1)],
            },
        };
        let reply = handler.handle(serde_json::to_vec(&task).unwrap()).await.unwrap();
        let reply: TaskReply = serde_json::from_slice(&reply).unwrap();
        assert!(!reply.success);
        assert!(reply.error.is_some());

        let reply = handler.handle(b"not json".to_vec()).await.unwrap();
        let reply: TaskReply = serde_json::from_slice(&reply).unwrap();
        assert!(!reply.success);
    }

    #[tokio::test]
    async fn test_handler_runs_statement() {
        let store: Arc<dyn ReportingStore> = Arc::new(SqliteStore::in_memory().unwrap());
        store.execute("CREATE TABLE \"tmp\" (\"v\" INTEGER)", &[]).await.unwrap();
        let handler = ShardFetchHandler::new(Arc::clone(&store));

        let task = ShardTask {
            temp_table: "tmp".to_string(),
            query: ShardQuery {
                table: "tmp".to_string(),
                sql: "INSERT INTO \"tmp\" (\"v\") VALUES (?)".to_string(),
                params: vec![json!(7)],
            },
        };
        let reply = handler.handle(serde_json::to_vec(&task).unwrap()).await.unwrap();
        assert_eq!(serde_json::from_slice::<TaskReply>(&reply).unwrap(), TaskReply::ok());

        let rows = store.select("SELECT \"v\" FROM \"tmp\"", &[]).await.unwrap();
        assert_eq!(rows[0]["v"], json!(7));
    }
}

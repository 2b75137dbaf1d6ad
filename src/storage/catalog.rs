//! Shard table lifecycle on top of a [`ReportingStore`]

use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

use super::ReportingStore;
use crate::error::{StorageError, TableCreationError};
use crate::shard::ShardTable;

/// Creates shard tables and remembers which ones exist
///
/// Only positive answers are remembered: a table seen once is assumed
/// to stay. Shard tables are never dropped by the engine.
pub struct TableCatalog {
    store: Arc<dyn ReportingStore>,
    known: RwLock<HashSet<String>>,
}

impl TableCatalog {
    /// Create a catalog over `store`
    pub fn new(store: Arc<dyn ReportingStore>) -> Self {
        Self {
            store,
            known: RwLock::new(HashSet::new()),
        }
    }

    /// Check whether a table exists
    pub async fn exists(&self, table: &str) -> Result<bool, StorageError> {
        if self.known.read().contains(table) {
            return Ok(true);
        }
        let exists = self.store.table_exists(table).await?;
        if exists {
            self.known.write().insert(table.to_string());
        }
        Ok(exists)
    }

    /// Create a shard table, failing if it already exists
    pub async fn create(&self, table: &ShardTable) -> Result<(), TableCreationError> {
        let exists = self.exists(&table.name).await.map_err(|source| TableCreationError::Ddl {
            table: table.name.clone(),
            source,
        })?;
        if exists {
            return Err(TableCreationError::AlreadyExists(table.name.clone()));
        }

        self.store
            .create_table(&table.name, &table.columns)
            .await
            .map_err(|source| TableCreationError::Ddl {
                table: table.name.clone(),
                source,
            })?;
        self.known.write().insert(table.name.clone());
        info!(table = %table.name, columns = table.columns.len(), "Created shard table");
        Ok(())
    }

    /// Create a shard table unless it exists
    ///
    /// Returns `true` if this call created it. A concurrent creator
    /// winning the race is not an error.
    pub async fn ensure(&self, table: &ShardTable) -> Result<bool, TableCreationError> {
        match self.create(table).await {
            Ok(()) => Ok(true),
            Err(TableCreationError::AlreadyExists(_)) => Ok(false),
            Err(err) => {
                let exists = self
                    .store
                    .table_exists(&table.name)
                    .await
                    .map_err(|source| TableCreationError::Ddl {
                        table: table.name.clone(),
                        source,
                    })?;
                if exists {
                    debug!(table = %table.name, "Shard table created concurrently");
                    self.known.write().insert(table.name.clone());
                    Ok(false)
                } else {
                    Err(err)
                }
            }
        }
    }
}

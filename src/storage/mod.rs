//! Storage backend interface
//!
//! The rollup engine talks to its relational store only through
//! [`ReportingStore`]: table DDL, keyed row access for the upsert
//! pipeline, and parameterized statements for the fetch pipeline.
//! [`SqliteStore`] is the bundled implementation.

mod catalog;
mod dialect;
mod sqlite;

pub use catalog::TableCatalog;
pub use dialect::Dialect;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::StorageError;
use crate::schema::ColumnDef;
use crate::types::Row;

// =============================================================================
// Reporting Store Trait
// =============================================================================

/// DDL/DML interface over the relational store holding shard tables
///
/// Statement parameters and row values are JSON scalars. Implementations
/// bind objects and arrays as JSON text.
#[async_trait]
pub trait ReportingStore: Send + Sync + 'static {
    /// Dialect used to render statements for this store
    fn dialect(&self) -> &Dialect;

    /// Check whether a table exists
    async fn table_exists(&self, table: &str) -> Result<bool, StorageError>;

    /// Create a table with typed, indexed columns
    ///
    /// Fails if the table already exists.
    async fn create_table(&self, table: &str, columns: &[ColumnDef]) -> Result<(), StorageError>;

    /// Drop a table if it exists
    async fn drop_table(&self, table: &str) -> Result<(), StorageError>;

    /// Read the row whose `key_column` equals `key`
    async fn find_row(
        &self,
        table: &str,
        key_column: &str,
        key: &str,
    ) -> Result<Option<Row>, StorageError>;

    /// Insert one row
    async fn insert_row(&self, table: &str, row: &Row) -> Result<(), StorageError>;

    /// Update the given columns of the row whose `key_column` equals `key`
    ///
    /// Returns the number of rows changed.
    async fn update_row(
        &self,
        table: &str,
        key_column: &str,
        key: &str,
        values: &Row,
    ) -> Result<u64, StorageError>;

    /// Delete the row whose `key_column` equals `key`
    ///
    /// Returns the number of rows removed.
    async fn delete_row(&self, table: &str, key_column: &str, key: &str) -> Result<u64, StorageError>;

    /// Run a query and return every row
    async fn select(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, StorageError>;

    /// Run a statement and return the number of rows changed
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64, StorageError>;
}

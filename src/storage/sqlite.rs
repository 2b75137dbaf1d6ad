//! SQLite implementation of [`ReportingStore`]
//!
//! A single connection guarded by a mutex. Every call runs on the
//! blocking pool so the async callers never stall a runtime worker.

use async_trait::async_trait;
use base64::Engine as _;
use parking_lot::Mutex;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde_json::{Number, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

use super::{Dialect, ReportingStore};
use crate::error::StorageError;
use crate::schema::{ColumnDef, IndexKind};
use crate::types::Row;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        StorageError::Backend(err.to_string())
    }
}

/// SQLite-backed reporting store
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    dialect: Dialect,
}

impl SqliteStore {
    /// Open or create a database file
    #[instrument(name = "store::sqlite::open", level = "info", skip(path), fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let conn = Connection::open(path.as_ref())?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Ok(Self::from_connection(conn))
    }

    /// Create a private in-memory database
    pub fn in_memory() -> Result<Self, StorageError> {
        Ok(Self::from_connection(Connection::open_in_memory()?))
    }

    /// Open `:memory:` as an in-memory database, anything else as a file
    pub fn from_path(path: &str) -> Result<Self, StorageError> {
        if path == ":memory:" {
            Self::in_memory()
        } else {
            Self::open(path)
        }
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            dialect: Dialect::SQLITE,
        }
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StorageError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            f(&mut guard)
        })
        .await
        .map_err(|e| StorageError::Join(e.to_string()))?
    }

    fn create_table_sql(&self, table: &str, columns: &[ColumnDef]) -> Vec<String> {
        let d = &self.dialect;
        let definitions = columns
            .iter()
            .map(|column| {
                let mut def = format!("{} {}", d.quote_ident(&column.name), d.column_type(column));
                def.push_str(if column.nullable { " NULL" } else { " NOT NULL" });
                if column.index == IndexKind::Primary {
                    def.push_str(" PRIMARY KEY");
                }
                def
            })
            .collect::<Vec<_>>()
            .join(", ");

        let mut statements = vec![format!("CREATE TABLE {} ({})", d.quote_ident(table), definitions)];
        for column in columns {
            let unique = match column.index {
                IndexKind::Simple => "",
                IndexKind::Unique => "UNIQUE ",
                IndexKind::None | IndexKind::Primary => continue,
            };
            statements.push(format!(
                "CREATE {}INDEX {} ON {} ({})",
                unique,
                d.quote_ident(&format!("{}_{}_idx", table, column.name)),
                d.quote_ident(table),
                d.quote_ident(&column.name)
            ));
        }
        statements
    }
}

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or(0.0)),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        Value::Array(_) | Value::Object(_) => SqlValue::Text(value.to_string()),
    }
}

fn from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(x) => Number::from_f64(x).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => {
            Value::String(base64::engine::general_purpose::STANDARD.encode(bytes))
        }
    }
}

fn statement_error(sql: &str) -> impl Fn(rusqlite::Error) -> StorageError + '_ {
    move |err| StorageError::Statement {
        sql: sql.to_string(),
        message: err.to_string(),
    }
}

fn query_rows(conn: &Connection, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>, StorageError> {
    let mut stmt = conn.prepare(sql).map_err(statement_error(sql))?;
    let names: Vec<String> = stmt.column_names().into_iter().map(str::to_string).collect();
    let mut rows = stmt
        .query(params_from_iter(params.iter()))
        .map_err(statement_error(sql))?;

    let mut out = Vec::new();
    while let Some(row) = rows.next().map_err(statement_error(sql))? {
        let mut record = Row::new();
        for (i, name) in names.iter().enumerate() {
            let value = row.get_ref(i).map_err(statement_error(sql))?;
            record.insert(name.clone(), from_sql(value));
        }
        out.push(record);
    }
    Ok(out)
}

#[async_trait]
impl ReportingStore for SqliteStore {
    fn dialect(&self) -> &Dialect {
        &self.dialect
    }

    async fn table_exists(&self, table: &str) -> Result<bool, StorageError> {
        let table = table.to_string();
        self.with_conn(move |conn| {
            let found = conn
                .query_row(
                    "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
                    [&table],
                    |_| Ok(()),
                )
                .optional()?;
            Ok(found.is_some())
        })
        .await
    }

    #[instrument(name = "store::sqlite::create_table", level = "debug", skip(self, columns), fields(columns = columns.len()))]
    async fn create_table(&self, table: &str, columns: &[ColumnDef]) -> Result<(), StorageError> {
        let statements = self.create_table_sql(table, columns);
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            for sql in &statements {
                tx.execute(sql, []).map_err(statement_error(sql))?;
            }
            tx.commit()?;
            Ok(())
        })
        .await?;
        debug!(table, "Created table");
        Ok(())
    }

    #[instrument(name = "store::sqlite::drop_table", level = "debug", skip(self))]
    async fn drop_table(&self, table: &str) -> Result<(), StorageError> {
        let sql = format!("DROP TABLE IF EXISTS {}", self.dialect.quote_ident(table));
        self.with_conn(move |conn| {
            conn.execute(&sql, []).map_err(statement_error(&sql))?;
            Ok(())
        })
        .await
    }

    async fn find_row(
        &self,
        table: &str,
        key_column: &str,
        key: &str,
    ) -> Result<Option<Row>, StorageError> {
        let sql = format!(
            "SELECT * FROM {} WHERE {} = ?1 LIMIT 1",
            self.dialect.quote_ident(table),
            self.dialect.quote_ident(key_column)
        );
        let params = vec![SqlValue::Text(key.to_string())];
        self.with_conn(move |conn| Ok(query_rows(conn, &sql, &params)?.into_iter().next()))
            .await
    }

    async fn insert_row(&self, table: &str, row: &Row) -> Result<(), StorageError> {
        if row.is_empty() {
            return Err(StorageError::InvalidValue("cannot insert an empty row".to_string()));
        }
        let columns = row
            .keys()
            .map(|c| self.dialect.quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = (1..=row.len())
            .map(|i| format!("?{}", i))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.dialect.quote_ident(table),
            columns,
            placeholders
        );
        let params: Vec<SqlValue> = row.values().map(to_sql).collect();
        self.with_conn(move |conn| {
            conn.execute(&sql, params_from_iter(params.iter()))
                .map_err(statement_error(&sql))?;
            Ok(())
        })
        .await
    }

    async fn update_row(
        &self,
        table: &str,
        key_column: &str,
        key: &str,
        values: &Row,
    ) -> Result<u64, StorageError> {
        if values.is_empty() {
            return Ok(0);
        }
        let assignments = values
            .keys()
            .enumerate()
            .map(|(i, c)| format!("{} = ?{}", self.dialect.quote_ident(c), i + 1))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = ?{}",
            self.dialect.quote_ident(table),
            assignments,
            self.dialect.quote_ident(key_column),
            values.len() + 1
        );
        let mut params: Vec<SqlValue> = values.values().map(to_sql).collect();
        params.push(SqlValue::Text(key.to_string()));
        self.with_conn(move |conn| {
            let changed = conn
                .execute(&sql, params_from_iter(params.iter()))
                .map_err(statement_error(&sql))?;
            Ok(changed as u64)
        })
        .await
    }

    async fn delete_row(&self, table: &str, key_column: &str, key: &str) -> Result<u64, StorageError> {
        let sql = format!(
            "DELETE FROM {} WHERE {} = ?1",
            self.dialect.quote_ident(table),
            self.dialect.quote_ident(key_column)
        );
        let key = key.to_string();
        self.with_conn(move |conn| {
            let changed = conn.execute(&sql, [&key]).map_err(statement_error(&sql))?;
            Ok(changed as u64)
        })
        .await
    }

    async fn select(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, StorageError> {
        let sql = sql.to_string();
        let params: Vec<SqlValue> = params.iter().map(to_sql).collect();
        self.with_conn(move |conn| query_rows(conn, &sql, &params)).await
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64, StorageError> {
        let sql = sql.to_string();
        let params: Vec<SqlValue> = params.iter().map(to_sql).collect();
        self.with_conn(move |conn| {
            let changed = conn
                .execute(&sql, params_from_iter(params.iter()))
                .map_err(statement_error(&sql))?;
            Ok(changed as u64)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::DataType;
    use serde_json::json;

    fn columns() -> Vec<ColumnDef> {
        vec![
            ColumnDef::new("hash_id", DataType::String).with_index(IndexKind::Primary),
            ColumnDef::new("client", DataType::String).with_index(IndexKind::Simple),
            ColumnDef::new("interval_0_1", DataType::Json).nullable(),
        ]
    }

    fn row(entries: Value) -> Row {
        serde_json::from_value(entries).unwrap()
    }

    #[tokio::test]
    async fn test_create_and_exists() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(!store.table_exists("Daily_2024_01_01").await.unwrap());

        store.create_table("Daily_2024_01_01", &columns()).await.unwrap();
        assert!(store.table_exists("Daily_2024_01_01").await.unwrap());

        // Second create must fail
        assert!(store.create_table("Daily_2024_01_01", &columns()).await.is_err());

        store.drop_table("Daily_2024_01_01").await.unwrap();
        assert!(!store.table_exists("Daily_2024_01_01").await.unwrap());
    }

    #[tokio::test]
    async fn test_row_round_trip() {
        let store = SqliteStore::in_memory().unwrap();
        store.create_table("t", &columns()).await.unwrap();

        store
            .insert_row("t", &row(json!({"hash_id": "h1", "client": "acme", "interval_0_1": "{\"a\":1}"})))
            .await
            .unwrap();

        let found = store.find_row("t", "hash_id", "h1").await.unwrap().unwrap();
        assert_eq!(found["client"], json!("acme"));
        assert_eq!(found["interval_0_1"], json!("{\"a\":1}"));
        assert!(store.find_row("t", "hash_id", "nope").await.unwrap().is_none());

        let changed = store
            .update_row("t", "hash_id", "h1", &row(json!({"interval_0_1": null})))
            .await
            .unwrap();
        assert_eq!(changed, 1);
        let found = store.find_row("t", "hash_id", "h1").await.unwrap().unwrap();
        assert_eq!(found["interval_0_1"], Value::Null);

        assert_eq!(store.delete_row("t", "hash_id", "h1").await.unwrap(), 1);
        assert!(store.find_row("t", "hash_id", "h1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_json_functions_available() {
        let store = SqliteStore::in_memory().unwrap();
        let rows = store
            .select(
                "SELECT json_extract(?1, '$.total') AS total, MAX(1, 3, 2) AS top",
                &[json!("{\"total\": 4.5}")],
            )
            .await
            .unwrap();
        assert_eq!(rows[0]["total"], json!(4.5));
        assert_eq!(rows[0]["top"], json!(3));
    }

    #[tokio::test]
    async fn test_file_backed_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rollup.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store.create_table("t", &columns()).await.unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        assert!(store.table_exists("t").await.unwrap());
    }
}

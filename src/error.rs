//! Error types for the rollup engine

use thiserror::Error;

/// Main error type for the rollup engine
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Shard table could not be created
    #[error("Table creation error: {0}")]
    TableCreation(#[from] TableCreationError),

    /// Fetch request failed
    #[error("Fetch error: {0}")]
    FetchData(#[from] FetchDataError),

    /// Insert or modify batch failed
    #[error("Upsert error: {0}")]
    Upsert(#[from] UpsertError),

    /// Shard resolution error
    #[error("Shard error: {0}")]
    Shard(#[from] ShardError),

    /// Storage backend error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Cache store error
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),
}

/// Static configuration errors
///
/// Raised while loading or validating column, aggregate and
/// granularity definitions. Never raised once a `ConfigModel` exists.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file could not be read or parsed
    #[error("Failed to load configuration: {0}")]
    Load(String),

    /// A setting has an invalid value
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    /// A required definition is missing
    #[error("Missing definition: {0}")]
    Missing(String),

    /// Aggregate function name is not known
    #[error("Unknown aggregate function: {0}")]
    UnknownFunction(String),

    /// Extra (post-merge transform) is not known or not applicable
    #[error("Unknown extra '{extra}' on aggregate '{aggregate}'")]
    UnknownExtra {
        /// Aggregate key
        aggregate: String,
        /// Extra name
        extra: String,
    },

    /// Column or aggregate name appears twice
    #[error("Duplicate column name: {0}")]
    DuplicateColumn(String),

    /// Name cannot be used as a SQL identifier or JSON key
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// Granularity or interval rejected by the shard resolver
    #[error(transparent)]
    Shard(#[from] ShardError),
}

/// Shard resolution errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShardError {
    /// Granularity name is not recognized
    #[error("Unsupported granularity: {0}")]
    UnsupportedGranularity(String),

    /// Granularity is reserved for future use and cannot be selected
    #[error("Granularity '{0}' is reserved and not supported")]
    ReservedGranularity(String),

    /// Data interval is not one of the allowed bucket widths
    #[error("Invalid data interval {0} minutes (allowed: 15, 30, 60, 120)")]
    InvalidDataInterval(u32),

    /// Instant lies before the Unix epoch
    #[error("Instant {0} precedes the shard epoch")]
    BeforeEpoch(String),

    /// Instant lies before the base of the shard it was resolved against
    #[error("Instant {instant} precedes shard base {base}")]
    BeforeShardBase {
        /// Offending instant
        instant: String,
        /// Shard base instant
        base: String,
    },

    /// Interval index outside `1..=count`
    #[error("Interval index {index} out of range 1..={count}")]
    IndexOutOfRange {
        /// Requested index
        index: u32,
        /// Interval columns in the shard
        count: u32,
    },
}

/// Shard table creation errors
#[derive(Error, Debug)]
pub enum TableCreationError {
    /// Explicit create requested for a table that already exists
    #[error("Table already exists: {0}")]
    AlreadyExists(String),

    /// DDL statement failed
    #[error("Failed to create table {table}: {source}")]
    Ddl {
        /// Table name
        table: String,
        /// Backend failure
        #[source]
        source: StorageError,
    },

    /// Reference instant could not be resolved to a shard
    #[error(transparent)]
    Shard(#[from] ShardError),
}

/// Fetch pipeline errors
///
/// Validation variants are raised before any I/O. The remaining
/// variants are raised after best-effort temp table cleanup.
#[derive(Error, Debug)]
pub enum FetchDataError {
    /// Range start is not strictly before range end
    #[error("Invalid range: start {start} must be before end {end}")]
    InvalidRange {
        /// Range start
        start: String,
        /// Range end
        end: String,
    },

    /// Date could not be parsed
    #[error("Invalid date: {0}")]
    InvalidDate(String),

    /// No aggregate columns were requested
    #[error("No columns requested")]
    EmptyColumns,

    /// Requested aggregate key is not configured
    #[error("Unknown aggregate column: {0}")]
    UnknownColumn(String),

    /// Output function is not recognized
    #[error("Unknown output function: {0}")]
    UnknownFunction(String),

    /// Output function is not enabled for the aggregate
    #[error("Function '{function}' is not allowed for column '{column}'")]
    FunctionNotAllowed {
        /// Aggregate key
        column: String,
        /// Output function
        function: String,
    },

    /// Group-by or where column is not a pivot
    #[error("Unknown pivot: {0}")]
    UnknownPivot(String),

    /// Order-by column is neither a requested aggregate nor a grouped pivot
    #[error("Invalid order column: {0}")]
    InvalidOrderColumn(String),

    /// Order direction is not asc/desc
    #[error("Invalid order direction: {0}")]
    InvalidOrderDirection(String),

    /// Where operator is not recognized or has the wrong operand shape
    #[error("Invalid where predicate: {0}")]
    InvalidPredicate(String),

    /// Range could not be resolved to shards
    #[error(transparent)]
    Shard(#[from] ShardError),

    /// Shard query failed
    #[error("Shard query failed: {0}")]
    Query(#[from] StorageError),

    /// Temp table DDL failed
    #[error("Temp table {table} failed: {source}")]
    TempTable {
        /// Temp table name
        table: String,
        /// Backend failure
        #[source]
        source: StorageError,
    },

    /// One or more parallel shard tasks reported failure
    #[error("{failed} of {total} shard tasks failed")]
    ShardTasksFailed {
        /// Failed task count
        failed: usize,
        /// Submitted task count
        total: usize,
    },

    /// Worker pool could not accept or answer a task
    #[error("Dispatch error: {0}")]
    Dispatch(String),
}

/// Upsert pipeline errors
#[derive(Error, Debug)]
pub enum UpsertError {
    /// Batch contained no records
    #[error("Empty batch")]
    EmptyBatch,

    /// Operation is neither insert nor delete
    #[error("Unknown operation: {0}")]
    UnknownOperation(String),

    /// Record lacks a pivot or the timestamp
    #[error("Record {index} is missing required column '{column}'")]
    IncompleteRecord {
        /// Position of the record in the batch
        index: usize,
        /// Missing column
        column: String,
    },

    /// Record timestamp could not be parsed
    #[error("Record {index} has invalid timestamp '{value}'")]
    InvalidTimestamp {
        /// Position of the record in the batch
        index: usize,
        /// Raw timestamp value
        value: String,
    },

    /// Pivot value is not a scalar
    #[error("Record {index} has non-scalar value for pivot '{column}'")]
    InvalidPivotValue {
        /// Position of the record in the batch
        index: usize,
        /// Pivot column
        column: String,
    },

    /// Delete targeted a row that does not exist
    #[error("No row {hash} in {table} to delete from")]
    RowNotFound {
        /// Shard table
        table: String,
        /// Pivot hash
        hash: String,
    },

    /// Delete retracts more records than an interval holds
    #[error("Cannot retract {retracted} records from {column} of row {hash} in {table}: {stored} stored")]
    RetractionUnderflow {
        /// Shard table
        table: String,
        /// Pivot hash
        hash: String,
        /// Interval column
        column: String,
        /// Records stored in the interval
        stored: i64,
        /// Records the batch retracts
        retracted: i64,
    },

    /// Stored interval JSON could not be decoded
    #[error("Corrupt interval {column} in {table}: {reason}")]
    CorruptRow {
        /// Shard table
        table: String,
        /// Interval column
        column: String,
        /// Decode failure
        reason: String,
    },

    /// Shard resolution failed
    #[error(transparent)]
    Shard(#[from] ShardError),

    /// Lazy table creation failed
    #[error(transparent)]
    TableCreation(#[from] TableCreationError),

    /// Storage read or write failed
    #[error("Storage failure: {0}")]
    Storage(#[from] StorageError),
}

/// Storage backend errors
#[derive(Error, Debug, Clone)]
pub enum StorageError {
    /// Backend-level failure (connection, lock, IO)
    #[error("Backend failure: {0}")]
    Backend(String),

    /// Statement failed
    #[error("Statement failed: {message} [{sql}]")]
    Statement {
        /// Statement text
        sql: String,
        /// Backend message
        message: String,
    },

    /// Value cannot be bound or read
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// Blocking task was cancelled or panicked
    #[error("Blocking task failed: {0}")]
    Join(String),
}

/// Cache store errors
#[derive(Error, Debug)]
pub enum CacheError {
    /// Connection could not be established
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Command failed
    #[error("Command failed: {0}")]
    Command(String),

    /// Operation timed out
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Cache store configuration is invalid
    #[error("Invalid cache configuration: {0}")]
    Config(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion_chain() {
        let shard = ShardError::InvalidDataInterval(45);
        let fetch: FetchDataError = shard.clone().into();
        let err: Error = fetch.into();
        assert!(err.to_string().contains("45"));

        let upsert: UpsertError = shard.into();
        assert!(matches!(upsert, UpsertError::Shard(_)));
    }

    #[test]
    fn test_task_failure_message() {
        let err = FetchDataError::ShardTasksFailed { failed: 2, total: 5 };
        assert_eq!(err.to_string(), "2 of 5 shard tasks failed");
    }
}

//! Core data types shared by the upsert and fetch pipelines
//!
//! # Key Types
//!
//! - **`Record`**: one raw metric record (pivot values, timestamp, metric fields)
//! - **`Row`**: one row read from, or written to, the storage backend
//! - **`Operation`**: whether a batch adds to or retracts from the rollups
//! - **`TimeRange`**: half-open `[start, end)` window for fetches
//!
//! # Example
//!
//! ```rust
//! use kuba_rollup::types::{parse_instant, Operation, TimeRange};
//! use serde_json::json;
//!
//! let op: Operation = "delete".parse().unwrap();
//! assert_eq!(op.sign(), -1);
//!
//! let start = parse_instant(&json!("2024-03-01 10:00:00")).unwrap();
//! let end = parse_instant(&json!("2024-03-01T12:00:00Z")).unwrap();
//! let range = TimeRange::new(start, end).unwrap();
//! assert_eq!(range.duration_minutes(), 120);
//! ```

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::error::{FetchDataError, UpsertError};

/// A raw metric record as submitted to the upsert pipeline
pub type Record = serde_json::Map<String, Value>;

/// A row exchanged with the storage backend, keyed by column name
pub type Row = serde_json::Map<String, Value>;

/// Timestamp layout used by record producers
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Batch operation applied by the upsert pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Add the batch to the stored rollups
    Insert,
    /// Retract the batch from the stored rollups
    Delete,
}

impl Operation {
    /// Multiplier applied to invertible contributions
    pub fn sign(self) -> i64 {
        match self {
            Operation::Insert => 1,
            Operation::Delete => -1,
        }
    }

    /// Lowercase name
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Insert => "insert",
            Operation::Delete => "delete",
        }
    }
}

impl FromStr for Operation {
    type Err = UpsertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "insert" => Ok(Operation::Insert),
            "delete" => Ok(Operation::Delete),
            _ => Err(UpsertError::UnknownOperation(s.to_string())),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Half-open time window `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    /// Inclusive start
    pub start: DateTime<Utc>,
    /// Exclusive end
    pub end: DateTime<Utc>,
}

impl TimeRange {
    /// Create a range, rejecting empty or inverted windows
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, FetchDataError> {
        if start >= end {
            return Err(FetchDataError::InvalidRange {
                start: format_instant(&start),
                end: format_instant(&end),
            });
        }
        Ok(Self { start, end })
    }

    /// Check if an instant falls inside the window
    pub fn contains(&self, instant: &DateTime<Utc>) -> bool {
        *instant >= self.start && *instant < self.end
    }

    /// Whole minutes covered by the window
    pub fn duration_minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }
}

/// Parse a record timestamp
///
/// Accepts `YYYY-MM-DD HH:MM:SS` (interpreted as UTC), RFC 3339 strings
/// and integer Unix seconds.
pub fn parse_instant(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => parse_instant_str(s),
        Value::Number(n) => n.as_i64().and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
        _ => None,
    }
}

/// Parse a timestamp string, see [`parse_instant`]
pub fn parse_instant_str(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT) {
        return Some(Utc.from_utc_datetime(&naive));
    }
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Render an instant in the record timestamp layout
pub fn format_instant(instant: &DateTime<Utc>) -> String {
    instant.format(TIMESTAMP_FORMAT).to_string()
}

/// Render a scalar JSON value as plain text
///
/// Returns `None` for arrays, objects and null, which cannot serve as
/// pivot values.
pub fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

//! Kuba Rollup - pre-aggregating time-series rollup engine
//!
//! Incoming metric records are folded into sharded reporting tables keyed
//! by time period and pivot combination, and range queries are answered
//! by recombining those partials:
//!
//! - Shard resolution: instant → table and interval column
//! - Associative aggregate functions with insert/retract support
//! - Read-merge-write upsert pipeline
//! - Fetch planning across one or many shards via a temp table
//! - Serial or worker-pool dispatch, with a result cache in front

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod types;

/// Configuration management with TOML support
pub mod config;

/// Tracing subscriber setup
pub mod logging;

/// Prometheus metrics and telemetry
pub mod metrics;

/// Validated column model shared by every pipeline
pub mod schema;

/// Time-based sharding of the reporting tables
pub mod shard;

/// Aggregate functions, merge rules and post-merge extras
pub mod aggregation;

/// Reporting store interface and the SQLite backend
pub mod storage;

/// Insert/modify read-merge-write pipeline
pub mod upsert;

/// Fetch requests, planning and execution
pub mod query;

/// Multi-shard dispatch: serial statement or worker pool
pub mod dispatch;

/// Fetch result caching (memory and Redis)
pub mod cache;

/// Engine facade and builder
pub mod engine;

// Re-export main types
pub use config::Config;
pub use engine::{FetchOptions, RollupEngine, RollupEngineBuilder};
pub use error::{Error, Result};
pub use query::FetchRequest;
pub use schema::ConfigModel;
pub use types::{Operation, Record, Row, TimeRange};
pub use upsert::UpsertReport;

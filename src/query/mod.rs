//! Fetch pipeline
//!
//! [`FetchRequest`] → validation → covered shards → [`FetchPlan`] →
//! execution through the [`Dispatcher`](crate::dispatch::Dispatcher) →
//! flattened, projected and sorted rows.

pub mod executor;
pub mod postprocess;
pub mod request;
pub mod transformer;

pub use executor::FetchExecutor;
pub use postprocess::{compare_values, flatten, shape_rows};
pub use request::{
    output_field, Comparison, FetchColumn, FetchRequest, FetchRequestBuilder, OrderBy, SortDirection,
    WherePredicate,
};
pub use transformer::{insert_into, FetchPlan, QueryTransformer, ShardQuery, TempTableSpec};

/// JSON column of the temp table holding per-shard partials
pub const TEMP_AGGREGATE_COLUMN: &str = "aggregates";

/// Prefix of temp table names
pub const TEMP_TABLE_PREFIX: &str = "tmp_rollup_";

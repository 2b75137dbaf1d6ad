//! Aggregate function framework
//!
//! Raw record values are turned into per-record contributions, folded
//! into interval partials, and merged with stored partials. All merge
//! rules are associative and commutative so the same partials can be
//! combined per batch, per stored row and across shards.
//!
//! Every interval object also carries a hidden record counter stored
//! under [`RECORD_COUNT_KEY`]. When it drops to zero the interval is
//! empty and is stored as `NULL`.

pub mod extras;
pub mod functions;
pub mod value;

pub use extras::Extras;
pub use functions::{AggregateFunction, Input, OutputFunction};

/// Hidden meta aggregate: number of live records in an interval
pub const RECORD_COUNT_KEY: &str = "__records";

/// Prefix reserved for meta keys inside interval JSON
pub const RESERVED_PREFIX: &str = "__";

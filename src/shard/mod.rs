//! Shard resolution
//!
//! Maps an instant to the physical table holding its shard and to the
//! interval column holding its bucket:
//!
//! | granularity | table                         | columns       |
//! |-------------|-------------------------------|---------------|
//! | daily       | `Daily_YYYY_MM_DD`            | 1440 / width  |
//! | half_day    | `HalfDay_YYYY_MM_DD_HH_MM`    | 720 / width   |
//! | quarter_day | `QuarterDay_<q>_YYYY_MM_DD`   | 360 / width   |
//!
//! Interval column `i` is named from the coordinates of its lower and
//! upper boundaries, `interval_<coord(i-1)>_<coord(i)>` by default.

mod granularity;
mod resolver;
mod table;

pub use granularity::{DataInterval, Granularity};
pub use resolver::{ShardLocation, ShardResolver, ShardSlice, DEFAULT_INTERVAL_TEMPLATE};
pub use table::ShardTable;

//! Instant to shard table / interval column resolution

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{DataInterval, Granularity};
use crate::error::ShardError;
use crate::types::TimeRange;

/// Default interval column template
pub const DEFAULT_INTERVAL_TEMPLATE: &str = "interval_{start}_{end}";

/// Where a single instant lands
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardLocation {
    /// Shard table name
    pub table: String,
    /// Shard base instant
    pub base: NaiveDateTime,
    /// 1-based interval index
    pub index: u32,
    /// Interval column name
    pub column: String,
}

/// Interval columns of one shard covered by a time range
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardSlice {
    /// Shard table name
    pub table: String,
    /// Shard base instant
    pub base: NaiveDateTime,
    /// Covered interval columns, in time order
    pub columns: Vec<String>,
}

/// Resolves instants to shard tables and interval columns
///
/// Built once from the validated configuration and shared by the upsert
/// and fetch pipelines.
#[derive(Debug, Clone)]
pub struct ShardResolver {
    granularity: Granularity,
    interval: DataInterval,
    template: String,
}

impl ShardResolver {
    /// Create a resolver with the default column template
    pub fn new(granularity: Granularity, interval: DataInterval) -> Self {
        Self {
            granularity,
            interval,
            template: DEFAULT_INTERVAL_TEMPLATE.to_string(),
        }
    }

    /// Use a custom interval column template (`{start}`, `{end}` placeholders)
    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = template.into();
        self
    }

    /// Shard granularity
    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    /// Bucket width
    pub fn data_interval(&self) -> DataInterval {
        self.interval
    }

    /// Interval columns per shard
    pub fn interval_column_count(&self) -> u32 {
        self.granularity.interval_column_count(self.interval)
    }

    /// Start of the shard containing `instant`
    pub fn shard_base(&self, instant: &DateTime<Utc>) -> Result<NaiveDateTime, ShardError> {
        if instant.timestamp() < 0 {
            return Err(ShardError::BeforeEpoch(instant.to_rfc3339()));
        }
        Ok(self.granularity.shard_base(&instant.naive_utc()))
    }

    /// Table name of the shard containing `instant`
    pub fn table_name(&self, instant: &DateTime<Utc>) -> Result<String, ShardError> {
        let base = self.shard_base(instant)?;
        Ok(self.granularity.table_name(&base))
    }

    /// Coordinate of bucket boundary `index` (0..=count) in the shard of `instant`
    pub fn value_for_coordinate(
        &self,
        instant: &DateTime<Utc>,
        index: u32,
    ) -> Result<String, ShardError> {
        let count = self.interval_column_count();
        if index > count {
            return Err(ShardError::IndexOutOfRange { index, count });
        }
        let base = self.shard_base(instant)?;
        Ok(self.granularity.value_for_coordinate(self.interval, &base, index))
    }

    /// Name of interval column `index` (1..=count) in the shard of `instant`
    pub fn interval_column_name(
        &self,
        instant: &DateTime<Utc>,
        index: u32,
    ) -> Result<String, ShardError> {
        let base = self.shard_base(instant)?;
        self.column_name_at(&base, index)
    }

    /// All interval column names of the shard containing `instant`
    pub fn interval_column_names(&self, instant: &DateTime<Utc>) -> Result<Vec<String>, ShardError> {
        let base = self.shard_base(instant)?;
        (1..=self.interval_column_count())
            .map(|index| self.column_name_at(&base, index))
            .collect()
    }

    /// 1-based index of the bucket containing `instant`
    pub fn interval_index_for_instant(&self, instant: &DateTime<Utc>) -> Result<u32, ShardError> {
        let base = self.shard_base(instant)?;
        self.index_from_base(&base, &instant.naive_utc())
    }

    /// Name of the interval column containing `instant`
    pub fn interval_column_for_instant(&self, instant: &DateTime<Utc>) -> Result<String, ShardError> {
        Ok(self.locate(instant)?.column)
    }

    /// Resolve table, bucket index and column for `instant` in one pass
    pub fn locate(&self, instant: &DateTime<Utc>) -> Result<ShardLocation, ShardError> {
        let base = self.shard_base(instant)?;
        let index = self.index_from_base(&base, &instant.naive_utc())?;
        Ok(ShardLocation {
            table: self.granularity.table_name(&base),
            column: self.column_name_at(&base, index)?,
            base,
            index,
        })
    }

    /// Shards and interval columns covered by `[start, end)`
    ///
    /// Walks the range in bucket-width steps. Slices come back in time
    /// order with no repeated columns.
    pub fn slices(&self, range: &TimeRange) -> Result<Vec<ShardSlice>, ShardError> {
        let mut slices: Vec<ShardSlice> = Vec::new();
        let step = self.interval.duration();
        let mut cursor = range.start;

        while cursor < range.end {
            let location = self.locate(&cursor)?;
            match slices.last_mut() {
                Some(slice) if slice.table == location.table => {
                    if !slice.columns.contains(&location.column) {
                        slice.columns.push(location.column);
                    }
                }
                _ => slices.push(ShardSlice {
                    table: location.table,
                    base: location.base,
                    columns: vec![location.column],
                }),
            }
            cursor += step;
        }

        Ok(slices)
    }

    fn index_from_base(&self, base: &NaiveDateTime, at: &NaiveDateTime) -> Result<u32, ShardError> {
        if at < base {
            return Err(ShardError::BeforeShardBase {
                instant: at.to_string(),
                base: base.to_string(),
            });
        }
        let elapsed = (*at - *base).num_seconds();
        let index = elapsed / self.interval.seconds() + 1;
        let count = self.interval_column_count();
        u32::try_from(index)
            .ok()
            .filter(|i| *i <= count)
            .ok_or(ShardError::IndexOutOfRange {
                index: u32::try_from(index).unwrap_or(u32::MAX),
                count,
            })
    }

    fn column_name_at(&self, base: &NaiveDateTime, index: u32) -> Result<String, ShardError> {
        let count = self.interval_column_count();
        if index == 0 || index > count {
            return Err(ShardError::IndexOutOfRange { index, count });
        }
        let start = self.granularity.value_for_coordinate(self.interval, base, index - 1);
        let end = self.granularity.value_for_coordinate(self.interval, base, index);
        Ok(self.template.replace("{start}", &start).replace("{end}", &end))
    }
}

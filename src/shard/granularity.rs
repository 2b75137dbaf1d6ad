//! Shard spans and bucket widths
//!
//! Each granularity is backed by a row in a static strategy table that
//! knows how to find the shard base for an instant, how to name the
//! shard table, and how to render interval coordinates.

use chrono::{Duration, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ShardError;

/// Time span covered by one shard table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    /// Six hour shards, four per day
    QuarterDay,
    /// Twelve hour shards starting at 00:00 and 12:00
    HalfDay,
    /// One shard per calendar day
    Daily,
}

/// Per-granularity behavior
struct ShardStrategy {
    name: &'static str,
    span_minutes: u32,
    base: fn(&NaiveDateTime) -> NaiveDateTime,
    table_name: fn(&NaiveDateTime) -> String,
    coordinate: fn(&NaiveDateTime, u32, u32) -> String,
}

static STRATEGIES: [ShardStrategy; 3] = [
    ShardStrategy {
        name: "quarter_day",
        span_minutes: 360,
        base: |at| floor_to_hours(at, 6),
        table_name: |base| format!("QuarterDay_{}_{}", base.hour() / 6, base.format("%Y_%m_%d")),
        coordinate: |_, interval, index| (index * interval).to_string(),
    },
    ShardStrategy {
        name: "half_day",
        span_minutes: 720,
        base: |at| floor_to_hours(at, 12),
        table_name: |base| format!("HalfDay_{}", base.format("%Y_%m_%d_%H_%M")),
        coordinate: |base, interval, index| {
            let at = *base + Duration::minutes(i64::from(index * interval));
            at.format("%H_%M").to_string()
        },
    },
    ShardStrategy {
        name: "daily",
        span_minutes: 1440,
        base: |at| floor_to_hours(at, 24),
        table_name: |base| format!("Daily_{}", base.format("%Y_%m_%d")),
        // Bucket index: equals the hour of day at 60 minute buckets and
        // stays distinct for the finer widths
        coordinate: |_, _, index| index.to_string(),
    },
];

fn floor_to_hours(at: &NaiveDateTime, hours: u32) -> NaiveDateTime {
    let midnight = at.date().and_time(NaiveTime::MIN);
    midnight + Duration::hours(i64::from(at.hour() / hours * hours))
}

impl Granularity {
    /// All supported granularities
    pub const ALL: [Granularity; 3] = [
        Granularity::QuarterDay,
        Granularity::HalfDay,
        Granularity::Daily,
    ];

    fn strategy(self) -> &'static ShardStrategy {
        match self {
            Granularity::QuarterDay => &STRATEGIES[0],
            Granularity::HalfDay => &STRATEGIES[1],
            Granularity::Daily => &STRATEGIES[2],
        }
    }

    /// Configuration name
    pub fn as_str(self) -> &'static str {
        self.strategy().name
    }

    /// Minutes covered by one shard
    pub fn span_minutes(self) -> u32 {
        self.strategy().span_minutes
    }

    /// Interval columns per shard for a bucket width
    pub fn interval_column_count(self, interval: DataInterval) -> u32 {
        self.span_minutes() / interval.minutes()
    }

    /// Start of the shard containing `at`
    pub fn shard_base(self, at: &NaiveDateTime) -> NaiveDateTime {
        (self.strategy().base)(at)
    }

    /// Table name of the shard containing `at`
    pub fn table_name(self, at: &NaiveDateTime) -> String {
        (self.strategy().table_name)(&self.shard_base(at))
    }

    /// Coordinate string for bucket boundary `index` (0..=count)
    pub fn value_for_coordinate(self, interval: DataInterval, at: &NaiveDateTime, index: u32) -> String {
        (self.strategy().coordinate)(&self.shard_base(at), interval.minutes(), index)
    }
}

impl FromStr for Granularity {
    type Err = ShardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "quarter_day" | "quarterday" => Ok(Granularity::QuarterDay),
            "half_day" | "halfday" => Ok(Granularity::HalfDay),
            "daily" | "day" => Ok(Granularity::Daily),
            "weekly" | "monthly" => Err(ShardError::ReservedGranularity(s.to_string())),
            _ => Err(ShardError::UnsupportedGranularity(s.to_string())),
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Width of one time bucket in minutes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct DataInterval(u32);

impl DataInterval {
    /// Allowed bucket widths
    pub const ALLOWED: [u32; 4] = [15, 30, 60, 120];

    /// Create a bucket width, rejecting widths outside [`Self::ALLOWED`]
    pub fn new(minutes: u32) -> Result<Self, ShardError> {
        if Self::ALLOWED.contains(&minutes) {
            Ok(Self(minutes))
        } else {
            Err(ShardError::InvalidDataInterval(minutes))
        }
    }

    /// Width in minutes
    pub fn minutes(self) -> u32 {
        self.0
    }

    /// Width in seconds
    pub fn seconds(self) -> i64 {
        i64::from(self.0) * 60
    }

    /// Width as a chrono duration
    pub fn duration(self) -> Duration {
        Duration::minutes(i64::from(self.0))
    }
}

impl TryFrom<u32> for DataInterval {
    type Error = ShardError;

    fn try_from(minutes: u32) -> Result<Self, Self::Error> {
        Self::new(minutes)
    }
}

impl From<DataInterval> for u32 {
    fn from(interval: DataInterval) -> Self {
        interval.0
    }
}

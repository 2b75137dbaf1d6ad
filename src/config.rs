//! Configuration management for the rollup engine
//!
//! This module provides configuration file support with TOML format,
//! environment variable overrides, and defaults matching the reference
//! call-detail deployment (client/carrier/destination pivots).
//!
//! The structures here are the raw, serde-facing layer. They are turned
//! into a validated, immutable [`ConfigModel`](crate::schema::ConfigModel)
//! once at startup via [`Config::model`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::ConfigError;
use crate::schema::ConfigModel;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Sharding settings
    #[serde(default)]
    pub common: CommonConfig,

    /// Column, pivot and aggregate definitions
    #[serde(default)]
    pub columns: ColumnsConfig,

    /// Multi-shard fetch execution
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Fetch result cache
    #[serde(default)]
    pub cache: CacheConfig,

    /// Storage backend
    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging output
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Sharding settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CommonConfig {
    /// Shard span: `quarter_day`, `half_day` or `daily`
    #[serde(default = "default_granularity")]
    pub granularity: String,

    /// Bucket width in minutes (15, 30, 60 or 120)
    #[serde(default = "default_data_interval")]
    pub data_interval: u32,
}

/// Column definitions
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ColumnsConfig {
    /// Record field holding the event timestamp
    #[serde(default = "default_timestamp")]
    pub timestamp: String,

    /// Primary hash column
    #[serde(default)]
    pub primary: PrimaryColumnConfig,

    /// Interval column name template, `{start}` and `{end}` are replaced
    /// by the bucket's coordinates
    #[serde(default = "default_interval_template")]
    pub interval_template: String,

    /// Group-by dimensions
    #[serde(default = "default_pivots")]
    pub pivots: Vec<PivotConfig>,

    /// Aggregates keyed by the JSON key they are stored under
    #[serde(default = "default_aggregates")]
    pub aggregates: BTreeMap<String, AggregateConfig>,
}

/// Primary hash column
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PrimaryColumnConfig {
    /// Column name
    #[serde(default = "default_primary_name")]
    pub name: String,

    /// Declared length
    #[serde(default = "default_string_length")]
    pub length: u32,
}

/// One pivot (group-by) column
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PivotConfig {
    /// Column name, also the record field it is read from
    pub name: String,

    /// `string`, `int`, `json` or `datetime`
    #[serde(default = "default_pivot_type")]
    pub data_type: String,

    /// Declared length for string columns
    #[serde(default)]
    pub length: Option<u32>,

    /// `none`, `simple`, `unique` or `primary`
    #[serde(default = "default_pivot_index")]
    pub index: String,

    /// Whether NULL is accepted
    #[serde(default)]
    pub nullable: bool,
}

/// One aggregate definition
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AggregateConfig {
    /// Record field the input is read from (optional for `count`)
    #[serde(default)]
    pub input: Option<String>,

    /// Input function: `sum`, `count`, `min`, `max` or `distinct`
    pub function: String,

    /// Output functions enabled for fetches: `sum`, `max`, `min`
    #[serde(default)]
    pub output: Vec<String>,

    /// Post-merge transforms, e.g. `{ round = 2 }` or `{ counter = true }`
    #[serde(default)]
    pub extras: BTreeMap<String, Value>,
}

/// Multi-shard fetch strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchStrategy {
    /// One UNION ALL statement issued by the caller
    Serial,
    /// One task per shard on the worker pool
    Parallel,
}

/// Multi-shard fetch execution
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DispatchConfig {
    /// Execution strategy
    #[serde(default = "default_strategy")]
    pub strategy: DispatchStrategy,

    /// Worker tasks in the pool
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Pending task capacity of the shared queue
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

/// Cache backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    /// In-process TTL map
    Memory,
    /// External Redis server
    Redis,
}

/// Fetch result cache
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Whether fetch results are cached
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Backend
    #[serde(default = "default_cache_backend")]
    pub backend: CacheBackend,

    /// Redis URL (redis backend only)
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Entry time-to-live in seconds
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    /// Prefix prepended to every cache key
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Maximum entries (memory backend only)
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

/// Storage backend
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// SQLite database file, `:memory:` for a private in-memory database
    #[serde(default = "default_storage_path")]
    pub path: String,
}

/// Logging output
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

// Default value functions
fn default_granularity() -> String { "daily".to_string() }
fn default_data_interval() -> u32 { 60 }
fn default_timestamp() -> String { "start_date".to_string() }
fn default_interval_template() -> String { "interval_{start}_{end}".to_string() }
fn default_primary_name() -> String { "hash_id".to_string() }
fn default_string_length() -> u32 { 255 }
fn default_pivot_type() -> String { "string".to_string() }
fn default_pivot_index() -> String { "simple".to_string() }
fn default_strategy() -> DispatchStrategy { DispatchStrategy::Serial }
fn default_workers() -> usize { num_cpus::get() }
fn default_queue_capacity() -> usize { 1024 }
fn default_cache_backend() -> CacheBackend { CacheBackend::Memory }
fn default_redis_url() -> String { "redis://127.0.0.1:6379".to_string() }
fn default_ttl_secs() -> u64 { 300 }
fn default_key_prefix() -> String { "rollup:fetch:".to_string() }
fn default_max_entries() -> usize { 10_000 }
fn default_storage_path() -> String { ":memory:".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_true() -> bool { true }

fn default_pivots() -> Vec<PivotConfig> {
    ["client", "carrier", "destination"]
        .into_iter()
        .map(|name| PivotConfig {
            name: name.to_string(),
            data_type: default_pivot_type(),
            length: Some(default_string_length()),
            index: default_pivot_index(),
            nullable: false,
        })
        .collect()
}

fn default_aggregates() -> BTreeMap<String, AggregateConfig> {
    let mut aggregates = BTreeMap::new();
    aggregates.insert(
        "total_duration".to_string(),
        AggregateConfig {
            input: Some("duration".to_string()),
            function: "sum".to_string(),
            output: vec!["sum".to_string(), "max".to_string(), "min".to_string()],
            extras: BTreeMap::from([("round".to_string(), Value::from(2))]),
        },
    );
    aggregates.insert(
        "total_cost".to_string(),
        AggregateConfig {
            input: Some("cost".to_string()),
            function: "sum".to_string(),
            output: vec!["sum".to_string(), "max".to_string(), "min".to_string()],
            extras: BTreeMap::from([("round".to_string(), Value::from(2))]),
        },
    );
    aggregates.insert(
        "total_records".to_string(),
        AggregateConfig {
            input: None,
            function: "count".to_string(),
            output: vec!["sum".to_string()],
            extras: BTreeMap::new(),
        },
    );
    aggregates.insert(
        "distinct_records".to_string(),
        AggregateConfig {
            input: Some("destination".to_string()),
            function: "distinct".to_string(),
            output: Vec::new(),
            extras: BTreeMap::from([("counter".to_string(), Value::Bool(true))]),
        },
    );
    aggregates
}

impl Default for CommonConfig {
    fn default() -> Self {
        Self {
            granularity: default_granularity(),
            data_interval: default_data_interval(),
        }
    }
}

impl Default for ColumnsConfig {
    fn default() -> Self {
        Self {
            timestamp: default_timestamp(),
            primary: PrimaryColumnConfig::default(),
            interval_template: default_interval_template(),
            pivots: default_pivots(),
            aggregates: default_aggregates(),
        }
    }
}

impl Default for PrimaryColumnConfig {
    fn default() -> Self {
        Self {
            name: default_primary_name(),
            length: default_string_length(),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: default_cache_backend(),
            redis_url: default_redis_url(),
            ttl_secs: default_ttl_secs(),
            key_prefix: default_key_prefix(),
            max_entries: default_max_entries(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::Load(format!("failed to read {}: {}", path.display(), e))
        })?;

        Self::from_toml(&contents)
            .map_err(|e| ConfigError::Load(format!("failed to parse {}: {}", path.display(), e)))
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::Load(e.to_string()))
    }

    /// Load configuration with environment variable overrides
    pub fn from_file_with_env(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from environment variables only
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        // Sharding
        if let Ok(granularity) = std::env::var("ROLLUP_GRANULARITY") {
            self.common.granularity = granularity;
        }
        if let Ok(interval) = std::env::var("ROLLUP_DATA_INTERVAL") {
            if let Ok(minutes) = interval.parse() {
                self.common.data_interval = minutes;
            }
        }

        // Dispatch
        if let Ok(strategy) = std::env::var("ROLLUP_DISPATCH_STRATEGY") {
            match strategy.to_ascii_lowercase().as_str() {
                "serial" => self.dispatch.strategy = DispatchStrategy::Serial,
                "parallel" => self.dispatch.strategy = DispatchStrategy::Parallel,
                _ => {}
            }
        }
        if let Ok(workers) = std::env::var("ROLLUP_WORKERS") {
            if let Ok(n) = workers.parse() {
                self.dispatch.workers = n;
            }
        }

        // Backends
        if let Ok(url) = std::env::var("ROLLUP_REDIS_URL") {
            self.cache.redis_url = url;
        }
        if let Ok(path) = std::env::var("ROLLUP_STORAGE_PATH") {
            self.storage.path = path;
        }

        // Logging
        if let Ok(log_level) = std::env::var("RUST_LOG") {
            self.logging.level = log_level;
        }
    }

    /// Validate the operational sections
    ///
    /// Column and aggregate definitions are validated by [`Config::model`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dispatch.workers == 0 {
            return Err(ConfigError::Invalid("dispatch.workers must be > 0".to_string()));
        }
        if self.dispatch.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "dispatch.queue_capacity must be > 0".to_string(),
            ));
        }

        if self.cache.enabled {
            if self.cache.ttl_secs == 0 {
                return Err(ConfigError::Invalid("cache.ttl_secs must be > 0".to_string()));
            }
            if self.cache.backend == CacheBackend::Memory && self.cache.max_entries == 0 {
                return Err(ConfigError::Invalid(
                    "cache.max_entries must be > 0".to_string(),
                ));
            }
            if self.cache.backend == CacheBackend::Redis && self.cache.redis_url.is_empty() {
                return Err(ConfigError::Invalid("cache.redis_url cannot be empty".to_string()));
            }
        }

        if self.storage.path.is_empty() {
            return Err(ConfigError::Invalid("storage.path cannot be empty".to_string()));
        }

        Ok(())
    }

    /// Validate everything and build the immutable column model
    pub fn model(&self) -> Result<ConfigModel, ConfigError> {
        self.validate()?;
        ConfigModel::from_config(&self.common, &self.columns)
    }

    /// Save configuration to TOML file
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let contents = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::Invalid(format!("failed to serialize config: {}", e)))?;

        std::fs::write(path, contents).map_err(|e| {
            ConfigError::Load(format!("failed to write {}: {}", path.display(), e))
        })
    }
}

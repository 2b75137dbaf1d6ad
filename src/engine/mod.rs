//! Rollup engine facade
//!
//! [`RollupEngine`] wires the column model, the reporting store, the
//! upsert pipeline, the fetch executor and the optional result cache
//! together. Build one with [`RollupEngineBuilder`].
//!
//! ```rust,ignore
//! let engine = RollupEngineBuilder::new()
//!     .with_config(Config::from_file_with_env("rollup.toml")?)
//!     .build()
//!     .await?;
//!
//! engine.insert(&records).await?;
//! let rows = engine.fetch(&request).await?;
//! ```

pub mod builder;

pub use builder::RollupEngineBuilder;

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::info;

use crate::cache::FetchCache;
use crate::error::{FetchDataError, TableCreationError, UpsertError};
use crate::query::{shape_rows, FetchExecutor, FetchRequest};
use crate::schema::ConfigModel;
use crate::shard::ShardTable;
use crate::storage::{ReportingStore, TableCatalog};
use crate::types::{Operation, Record, Row};
use crate::upsert::{UpsertPipeline, UpsertReport};

/// Per-fetch options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchOptions {
    /// Skip the cache lookup and recompute (the result is still cached)
    pub bypass_cache: bool,
}

/// Time-series rollup engine
pub struct RollupEngine {
    model: Arc<ConfigModel>,
    store: Arc<dyn ReportingStore>,
    catalog: Arc<TableCatalog>,
    upsert: UpsertPipeline,
    fetcher: FetchExecutor,
    cache: Option<FetchCache>,
}

impl RollupEngine {
    /// Start building an engine
    pub fn builder() -> RollupEngineBuilder {
        RollupEngineBuilder::new()
    }

    /// Validated column model
    pub fn model(&self) -> &Arc<ConfigModel> {
        &self.model
    }

    /// Reporting store
    pub fn store(&self) -> &Arc<dyn ReportingStore> {
        &self.store
    }

    /// Whether fetch results are cached
    pub fn cache_enabled(&self) -> bool {
        self.cache.is_some()
    }

    // =========================================================================
    // Tables
    // =========================================================================

    /// Create the shard table containing `instant`
    ///
    /// Fails with [`TableCreationError::AlreadyExists`] if it exists.
    pub async fn create_table(&self, instant: &DateTime<Utc>) -> Result<ShardTable, TableCreationError> {
        let table = ShardTable::for_instant(&self.model, instant)?;
        self.catalog.create(&table).await?;
        Ok(table)
    }

    /// Create the shard table containing `instant` unless it exists
    ///
    /// Returns `true` if this call created it.
    pub async fn ensure_table(&self, instant: &DateTime<Utc>) -> Result<bool, TableCreationError> {
        let table = ShardTable::for_instant(&self.model, instant)?;
        self.catalog.ensure(&table).await
    }

    // =========================================================================
    // Upserts
    // =========================================================================

    /// Fold a batch of records into the shard tables
    pub async fn insert(&self, records: &[Record]) -> Result<UpsertReport, UpsertError> {
        self.upsert.apply(Operation::Insert, records).await
    }

    /// Retract a batch of previously inserted records
    pub async fn delete(&self, records: &[Record]) -> Result<UpsertReport, UpsertError> {
        self.upsert.apply(Operation::Delete, records).await
    }

    /// Apply a batch under an explicit operation
    pub async fn modify(&self, op: Operation, records: &[Record]) -> Result<UpsertReport, UpsertError> {
        self.upsert.apply(op, records).await
    }

    // =========================================================================
    // Fetches
    // =========================================================================

    /// Run a fetch, served from the cache when possible
    pub async fn fetch(&self, request: &FetchRequest) -> Result<Vec<Row>, FetchDataError> {
        self.fetch_with(request, FetchOptions::default()).await
    }

    /// Run a fetch with options
    pub async fn fetch_with(&self, request: &FetchRequest, options: FetchOptions) -> Result<Vec<Row>, FetchDataError> {
        request.validate(&self.model)?;

        if let Some(cache) = &self.cache {
            if !options.bypass_cache {
                if let Some(rows) = cache.get(request).await {
                    // Ordering is not part of the key
                    return Ok(shape_rows(request, rows));
                }
            }
        }

        let rows = self.fetcher.execute(request).await?;
        if let Some(cache) = &self.cache {
            cache.put(request, &rows).await;
        }
        Ok(rows)
    }

    /// Drop the cached result of `request`
    pub async fn invalidate(&self, request: &FetchRequest) {
        if let Some(cache) = &self.cache {
            cache.invalidate(request).await;
        }
    }

    /// Stop background workers
    pub async fn shutdown(&self) {
        self.fetcher.dispatcher().shutdown().await;
        info!("Rollup engine stopped");
    }
}

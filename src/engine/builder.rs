//! Engine builder with pluggable store and cache backends

use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use super::RollupEngine;
use crate::cache::{store_from_config, CacheStore, FetchCache};
use crate::config::{Config, DispatchConfig, DispatchStrategy};
use crate::dispatch::Dispatcher;
use crate::error::{Error, Result, StorageError};
use crate::metrics;
use crate::query::FetchExecutor;
use crate::schema::ConfigModel;
use crate::storage::{ReportingStore, SqliteStore, TableCatalog};
use crate::upsert::{StripedLocks, UpsertPipeline};

/// Builder for [`RollupEngine`]
///
/// Without an explicit store, the SQLite database named by
/// `storage.path` is opened. Without an explicit cache store, the
/// configured backend is used when caching is enabled.
pub struct RollupEngineBuilder {
    config: Config,
    model: Option<ConfigModel>,
    store: Option<Arc<dyn ReportingStore>>,
    cache_store: Option<Arc<dyn CacheStore>>,
    lock_stripes: Option<usize>,
}

impl RollupEngineBuilder {
    /// Create a builder with the default configuration
    pub fn new() -> Self {
        Self {
            config: Config::default(),
            model: None,
            store: None,
            cache_store: None,
            lock_stripes: None,
        }
    }

    /// Use a full configuration
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Use an already validated column model instead of `config.columns`
    pub fn with_model(mut self, model: ConfigModel) -> Self {
        self.model = Some(model);
        self
    }

    /// Override the dispatch settings
    pub fn with_dispatch(mut self, dispatch: DispatchConfig) -> Self {
        self.config.dispatch = dispatch;
        self
    }

    /// Set the reporting store
    pub fn with_store<S>(mut self, store: S) -> Self
    where
        S: ReportingStore,
    {
        self.store = Some(Arc::new(store));
        self
    }

    /// Set the reporting store from an existing Arc
    ///
    /// Use this to keep direct access to the store, e.g. to inspect
    /// shard rows in tests.
    pub fn with_store_arc(mut self, store: Arc<dyn ReportingStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the cache store (enables caching)
    pub fn with_cache_store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.config.cache.enabled = true;
        self.cache_store = Some(store);
        self
    }

    /// Disable fetch result caching
    pub fn without_cache(mut self) -> Self {
        self.config.cache.enabled = false;
        self.cache_store = None;
        self
    }

    /// Number of row lock stripes
    pub fn with_lock_stripes(mut self, stripes: usize) -> Self {
        self.lock_stripes = Some(stripes);
        self
    }

    /// Validate the configuration and assemble the engine
    ///
    /// Starts the worker pool for the parallel strategy, so it must run
    /// inside a tokio runtime.
    pub async fn build(self) -> Result<RollupEngine> {
        self.config.validate()?;
        let model = match self.model {
            Some(model) => model,
            None => self.config.model()?,
        };
        let model = Arc::new(model);

        let store = match self.store {
            Some(store) => store,
            None => {
                let path = self.config.storage.path.clone();
                let opened = tokio::task::spawn_blocking(move || SqliteStore::from_path(&path))
                    .await
                    .map_err(|e| Error::Storage(StorageError::Join(e.to_string())))??;
                Arc::new(opened) as Arc<dyn ReportingStore>
            }
        };

        let catalog = Arc::new(TableCatalog::new(Arc::clone(&store)));
        let locks = Arc::new(
            self.lock_stripes
                .map(StripedLocks::new)
                .unwrap_or_default(),
        );

        let dispatcher = Dispatcher::from_config(&self.config.dispatch, Arc::clone(&store));
        metrics::set_dispatch_workers(match self.config.dispatch.strategy {
            DispatchStrategy::Serial => 0,
            DispatchStrategy::Parallel => self.config.dispatch.workers,
        });

        let cache = if self.config.cache.enabled {
            let cache_store = match self.cache_store {
                Some(store) => store,
                None => store_from_config(&self.config.cache)?,
            };
            Some(FetchCache::new(
                cache_store,
                self.config.cache.key_prefix.clone(),
                Duration::from_secs(self.config.cache.ttl_secs),
            ))
        } else {
            None
        };

        info!(
            granularity = %model.granularity(),
            data_interval = model.data_interval_minutes(),
            dialect = store.dialect().name,
            dispatch = ?self.config.dispatch.strategy,
            cache = cache.as_ref().map(|c| c.store().name()).unwrap_or("disabled"),
            "Rollup engine ready"
        );

        Ok(RollupEngine {
            upsert: UpsertPipeline::new(Arc::clone(&model), Arc::clone(&store), Arc::clone(&catalog), locks),
            fetcher: FetchExecutor::new(Arc::clone(&model), Arc::clone(&store), Arc::clone(&catalog), dispatcher),
            model,
            store,
            catalog,
            cache,
        })
    }
}

impl Default for RollupEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

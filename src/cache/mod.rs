//! Fetch result caching
//!
//! Results are cached under a canonical key derived from the request
//! (see [`compute_key`]), in a pluggable [`CacheStore`]:
//!
//! - [`MemoryCacheStore`]: in-process TTL map
//! - [`RedisCacheStore`]: external Redis server

pub mod key;
pub mod local;
pub mod redis;
pub mod service;

pub use key::compute_key;
pub use local::MemoryCacheStore;
pub use redis::{sanitize_url, RedisCacheConfig, RedisCacheStore, RetryPolicy};
pub use service::FetchCache;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{CacheBackend, CacheConfig};
use crate::error::CacheError;

// =============================================================================
// Cache Store Trait
// =============================================================================

/// Key-value store with per-entry TTL
#[async_trait]
pub trait CacheStore: Send + Sync + 'static {
    /// Backend name for logs
    fn name(&self) -> &'static str;

    /// Value stored under `key`, if present and not expired
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Store `value` under `key` for `ttl`
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError>;

    /// Remove `key`
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
}

/// Build the configured cache store
pub fn store_from_config(config: &CacheConfig) -> Result<Arc<dyn CacheStore>, CacheError> {
    Ok(match config.backend {
        CacheBackend::Memory => Arc::new(MemoryCacheStore::new(config.max_entries)),
        CacheBackend::Redis => Arc::new(RedisCacheStore::new(RedisCacheConfig::with_url(
            config.redis_url.clone(),
        ))?),
    })
}

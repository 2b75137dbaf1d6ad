//! Fetch result cache on top of a [`CacheStore`]
//!
//! Store failures never fail a fetch: they are logged and treated as a
//! miss. Values that no longer decode are misses too and get overwritten
//! by the next store.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::{compute_key, CacheStore};
use crate::metrics;
use crate::query::FetchRequest;
use crate::types::Row;

/// Caches final fetch rows by canonical request key
pub struct FetchCache {
    store: Arc<dyn CacheStore>,
    prefix: String,
    ttl: Duration,
}

impl FetchCache {
    /// Create a cache
    pub fn new(store: Arc<dyn CacheStore>, prefix: impl Into<String>, ttl: Duration) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            ttl,
        }
    }

    /// Key for `request`
    pub fn key(&self, request: &FetchRequest) -> String {
        compute_key(&self.prefix, request)
    }

    /// Underlying store
    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    /// Cached rows for `request`
    pub async fn get(&self, request: &FetchRequest) -> Option<Vec<Row>> {
        let key = self.key(request);
        let raw = match self.store.get(&key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                metrics::record_cache_lookup("miss");
                return None;
            }
            Err(e) => {
                warn!(backend = self.store.name(), error = %e, "Cache lookup failed");
                metrics::record_cache_lookup("error");
                return None;
            }
        };

        match serde_json::from_slice::<Vec<Row>>(&raw) {
            Ok(rows) => {
                metrics::record_cache_lookup("hit");
                debug!(rows = rows.len(), "Cache hit");
                Some(rows)
            }
            Err(e) => {
                warn!(error = %e, "Discarding undecodable cache entry");
                metrics::record_cache_lookup("miss");
                None
            }
        }
    }

    /// Store rows for `request`
    pub async fn put(&self, request: &FetchRequest, rows: &[Row]) {
        let encoded = match serde_json::to_vec(rows) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!(error = %e, "Failed to encode fetch result for caching");
                return;
            }
        };
        if let Err(e) = self.store.set(&self.key(request), encoded, self.ttl).await {
            warn!(backend = self.store.name(), error = %e, "Cache store failed");
        }
    }

    /// Remove the entry for `request`
    pub async fn invalidate(&self, request: &FetchRequest) {
        if let Err(e) = self.store.delete(&self.key(request)).await {
            warn!(backend = self.store.name(), error = %e, "Cache invalidation failed");
        }
    }
}

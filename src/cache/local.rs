//! In-process fetch cache store
//!
//! TTL map with bounded size. When full, expired entries are evicted
//! first, then the oldest entry.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;

use super::CacheStore;
use crate::error::CacheError;

/// Longest accepted TTL
const MAX_TTL_MS: i64 = 365 * 24 * 60 * 60 * 1000;

/// Upper bound on eviction rounds per insert
const MAX_EVICTION_ATTEMPTS: usize = 100;

/// Cached value with TTL tracking
#[derive(Clone, Debug)]
struct CachedEntry {
    data: Vec<u8>,
    /// Milliseconds since epoch
    cached_at: i64,
    ttl_ms: i64,
}

impl CachedEntry {
    fn new(data: Vec<u8>, ttl_ms: i64) -> Self {
        Self {
            data,
            cached_at: Utc::now().timestamp_millis(),
            ttl_ms,
        }
    }

    fn is_expired(&self) -> bool {
        Utc::now().timestamp_millis() - self.cached_at > self.ttl_ms
    }
}

/// Memory-backed [`CacheStore`]
pub struct MemoryCacheStore {
    entries: RwLock<HashMap<String, CachedEntry>>,
    max_entries: usize,
}

impl MemoryCacheStore {
    /// Create a store holding at most `max_entries` values
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_entries: max_entries.max(1),
        }
    }

    /// Entries held, including expired ones
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether no entries are held
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Drop expired entries, returning how many were removed
    pub async fn cleanup_expired(&self) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, v| !v.is_expired());
        before - entries.len()
    }

    /// Remove everything
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|cached| !cached.is_expired())
            .map(|cached| cached.data.clone()))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(MAX_TTL_MS).clamp(0, MAX_TTL_MS);
        let mut entries = self.entries.write().await;

        let mut attempts = 0;
        while !entries.contains_key(key) && entries.len() >= self.max_entries && attempts < MAX_EVICTION_ATTEMPTS {
            let expired: Vec<String> = entries
                .iter()
                .filter(|(_, v)| v.is_expired())
                .map(|(k, _)| k.clone())
                .take(10)
                .collect();
            for k in expired {
                entries.remove(&k);
            }

            if entries.len() >= self.max_entries {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, v)| v.cached_at)
                    .map(|(k, _)| k.clone());
                if let Some(k) = oldest {
                    entries.remove(&k);
                }
            }
            attempts += 1;
        }

        entries.insert(key.to_string(), CachedEntry::new(value, ttl_ms));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: Duration = Duration::from_secs(60);

    #[test]
    fn test_entry_expiry() {
        let mut cached = CachedEntry::new(b"rows".to_vec(), 1);
        assert!(!CachedEntry::new(b"rows".to_vec(), 60_000).is_expired());
        cached.cached_at = Utc::now().timestamp_millis() - 1000;
        assert!(cached.is_expired());
    }

    #[tokio::test]
    async fn test_set_get_delete() {
        let store = MemoryCacheStore::new(10);
        store.set("a", b"1".to_vec(), MINUTE).await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some(b"1".to_vec()));
        assert_eq!(store.get("b").await.unwrap(), None);

        store.delete("a").await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), None);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_capacity_eviction() {
        let store = MemoryCacheStore::new(2);
        store.set("a", vec![1], MINUTE).await.unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
        store.set("b", vec![2], MINUTE).await.unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
        store.set("c", vec![3], MINUTE).await.unwrap();

        assert_eq!(store.len().await, 2);
        assert!(store.get("a").await.unwrap().is_none());
        assert!(store.get("c").await.unwrap().is_some());

        // Overwriting an existing key never evicts
        store.set("c", vec![4], MINUTE).await.unwrap();
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_expired_entries_miss() {
        let store = MemoryCacheStore::new(10);
        store.set("a", vec![1], Duration::from_millis(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(store.get("a").await.unwrap().is_none());
        assert_eq!(store.cleanup_expired().await, 1);
    }
}

//! Striped async locks serializing read-merge-write per stored row

use tokio::sync::{Mutex, MutexGuard};
use xxhash_rust::xxh3::xxh3_64;

/// Default stripe count
pub const DEFAULT_STRIPES: usize = 64;

/// Fixed set of async mutexes selected by key hash
///
/// Two writers for the same row always contend on the same stripe.
/// Unrelated rows may share a stripe; memory stays bounded regardless
/// of how many rows are touched.
pub struct StripedLocks {
    stripes: Vec<Mutex<()>>,
}

impl StripedLocks {
    /// Create `count` stripes (at least one)
    pub fn new(count: usize) -> Self {
        Self {
            stripes: (0..count.max(1)).map(|_| Mutex::new(())).collect(),
        }
    }

    /// Lock the stripe owning `key`
    pub async fn lock(&self, key: &str) -> MutexGuard<'_, ()> {
        let slot = (xxh3_64(key.as_bytes()) % self.stripes.len() as u64) as usize;
        self.stripes[slot].lock().await
    }

    /// Number of stripes
    pub fn len(&self) -> usize {
        self.stripes.len()
    }

    /// Always false, there is at least one stripe
    pub fn is_empty(&self) -> bool {
        self.stripes.is_empty()
    }
}

impl Default for StripedLocks {
    fn default() -> Self {
        Self::new(DEFAULT_STRIPES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_key_serializes() {
        let locks = Arc::new(StripedLocks::new(8));
        let guard = locks.lock("Daily_2024_01_01:abc").await;

        let contender = Arc::clone(&locks);
        let waiter = tokio::spawn(async move {
            let _guard = contender.lock("Daily_2024_01_01:abc").await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        drop(guard);
        waiter.await.unwrap();
    }

    #[test]
    fn test_minimum_one_stripe() {
        assert_eq!(StripedLocks::new(0).len(), 1);
    }
}

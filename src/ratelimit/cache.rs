//! Short-lived lookup cache shared by the identity resolver and the override
//! store.

use moka::future::Cache;
use std::hash::Hash;
use std::time::Duration;

/// A fixed-capacity cache whose entries expire a fixed time after insertion.
///
/// Entries are never invalidated on write, so readers may see values up to
/// one TTL old. Concurrent misses for the same key each run their own fill.
#[derive(Clone)]
pub struct TtlCache<K, V> {
    inner: Cache<K, V>,
}

impl<K, V> TtlCache<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(capacity: u64, ttl: Duration) -> Self {
        let inner = Cache::builder()
            .max_capacity(capacity)
            .time_to_live(ttl)
            .build();
        Self { inner }
    }

    pub async fn get(&self, key: &K) -> Option<V> {
        self.inner.get(key).await
    }

    pub async fn insert(&self, key: K, value: V) {
        self.inner.insert(key, value).await;
    }

    pub fn entry_count(&self) -> u64 {
        self.inner.entry_count()
    }
}

impl<K, V> std::fmt::Debug for TtlCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlCache").finish_non_exhaustive()
    }
}

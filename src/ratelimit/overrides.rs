//! Per-key quota overrides.

use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::cache::TtlCache;
use super::quota::Quota;
use super::registry::KeyRegistry;

/// Read-through cache over the registry's per-key, per-path quotas.
pub struct KeyOverrideStore {
    registry: Arc<dyn KeyRegistry>,
    cache: TtlCache<(Uuid, String), Arc<Vec<Quota>>>,
}

impl KeyOverrideStore {
    pub fn new(
        registry: Arc<dyn KeyRegistry>,
        cache: TtlCache<(Uuid, String), Arc<Vec<Quota>>>,
    ) -> Self {
        Self { registry, cache }
    }

    /// Quotas overriding the default authenticated tier for `key` on `scope`.
    ///
    /// An empty list means the default tier applies. Lookup failures are
    /// logged and also yield an empty list; they are not cached.
    pub async fn lookup(&self, key: &Uuid, scope: &str) -> Arc<Vec<Quota>> {
        let cache_key = (*key, scope.to_string());
        if let Some(quotas) = self.cache.get(&cache_key).await {
            return quotas;
        }

        match self.registry.find_overrides(key, scope).await {
            Ok(quotas) => {
                debug!(key = %key, scope = %scope, overrides = quotas.len(), "Loaded key overrides");
                let quotas = Arc::new(quotas);
                self.cache.insert(cache_key, quotas.clone()).await;
                quotas
            }
            Err(e) => {
                warn!(key = %key, scope = %scope, error = %e, "Override lookup failed, using default tier");
                Arc::new(Vec::new())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::registry::InMemoryKeyRegistry;
    use std::time::Duration;

    #[tokio::test]
    async fn test_lookup_returns_overrides_for_path() {
        let registry = Arc::new(InMemoryKeyRegistry::new());
        let key = Uuid::new_v4();
        registry.insert_override(key, "/v1/builds", Quota::per_secs(500, 1).unwrap());

        let store = KeyOverrideStore::new(registry, TtlCache::new(64, Duration::from_secs(60)));
        assert_eq!(store.lookup(&key, "/v1/builds").await.len(), 1);
        assert!(store.lookup(&key, "/v1/active-matches").await.is_empty());
    }

    #[tokio::test]
    async fn test_cached_overrides_are_stale_until_ttl() {
        let registry = Arc::new(InMemoryKeyRegistry::new());
        let key = Uuid::new_v4();
        let store = KeyOverrideStore::new(
            registry.clone(),
            TtlCache::new(64, Duration::from_secs(60)),
        );

        assert!(store.lookup(&key, "/v1/builds").await.is_empty());

        // Writes are not pushed into the cache.
        registry.insert_override(key, "/v1/builds", Quota::per_secs(500, 1).unwrap());
        assert!(store.lookup(&key, "/v1/builds").await.is_empty());
    }
}

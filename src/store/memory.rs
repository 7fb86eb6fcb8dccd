//! In-process counter store.
//!
//! Only shares state between tasks of one process. Useful for single-instance
//! deployments and tests.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use super::{CounterKey, CounterStore, StoreConfig};
use crate::error::StoreError;

#[derive(Debug, Default)]
struct EventLog {
    /// Event timestamps in insertion order.
    events: Vec<f64>,
    /// The log is dropped on the first access at or after this time.
    expires_at: f64,
}

/// Counter store backed by a concurrent map.
///
/// Cold logs are swept from `record` at most once per retention interval, so
/// the map stays bounded by the callers seen in the last interval or two.
#[derive(Debug, Default)]
pub struct InMemoryCounterStore {
    logs: DashMap<String, EventLog>,
    config: StoreConfig,
    /// Time of the last sweep, as `f64` bits
    last_purge: AtomicU64,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: StoreConfig) -> Self {
        Self {
            logs: DashMap::new(),
            config,
            last_purge: AtomicU64::new(0),
        }
    }

    /// Number of live event logs.
    pub fn len(&self) -> usize {
        self.logs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.logs.is_empty()
    }

    /// Drop every log that expired before `now`.
    pub fn purge_expired(&self, now: f64) {
        let before = self.logs.len();
        self.logs.retain(|_, log| log.expires_at > now);
        debug!(removed = before.saturating_sub(self.logs.len()), "Purged expired event logs");
    }

    pub fn clear(&self) {
        self.logs.clear();
    }

    /// Sweep expired logs if a full retention interval has passed since the
    /// last sweep. Only one concurrent writer wins the sweep.
    fn purge_if_due(&self, now: f64) {
        let last_bits = self.last_purge.load(Ordering::Acquire);
        if now - f64::from_bits(last_bits) < self.config.retention.as_secs_f64() {
            return;
        }
        if self
            .last_purge
            .compare_exchange(last_bits, now.to_bits(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.purge_expired(now);
        }
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn record(&self, key: &CounterKey, at: f64) -> Result<(), StoreError> {
        let retention = self.config.retention.as_secs_f64();
        let store_key = key.to_store_key(&self.config.key_prefix);

        // Must run before taking the entry guard; the sweep locks every shard.
        self.purge_if_due(at);

        // The entry guard holds the shard lock, which makes trim, insert and
        // expiry refresh one unit.
        let mut log = self.logs.entry(store_key).or_default();
        if log.expires_at <= at {
            log.events.clear();
        }
        let cutoff = at - retention;
        log.events.retain(|&t| t > cutoff);
        log.events.push(at);
        log.expires_at = at + retention;
        Ok(())
    }

    async fn range(&self, key: &CounterKey, from: f64, to: f64) -> Result<Vec<f64>, StoreError> {
        let store_key = key.to_store_key(&self.config.key_prefix);
        let Some(log) = self.logs.get(&store_key) else {
            return Ok(Vec::new());
        };
        if log.expires_at <= to {
            return Ok(Vec::new());
        }

        let mut events: Vec<f64> = log
            .events
            .iter()
            .copied()
            .filter(|&t| t >= from && t <= to)
            .collect();
        events.sort_by(f64::total_cmp);
        Ok(events)
    }
}

//! Shared counter storage.
//!
//! Every counter key owns one time-ordered event log. Stateless gateway
//! processes share the log through the store, so the store is the only place
//! where concurrent requests meet.

mod memory;
mod redis_store;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::StoreError;

pub use self::memory::InMemoryCounterStore;
pub use self::redis_store::RedisCounterStore;

/// Subject used for tiers that are shared by every caller of a scope.
pub const GLOBAL_SUBJECT: &str = "global";

/// Key identifying one sliding-window event log.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CounterKey {
    /// The identity being counted, or [`GLOBAL_SUBJECT`].
    pub subject: String,
    /// The route scope.
    pub scope: String,
}

impl CounterKey {
    pub fn new(subject: impl Into<String>, scope: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            scope: scope.into(),
        }
    }

    /// A key shared by every caller of `scope`.
    pub fn global(scope: impl Into<String>) -> Self {
        Self::new(GLOBAL_SUBJECT, scope)
    }

    pub fn is_global(&self) -> bool {
        self.subject == GLOBAL_SUBJECT
    }

    /// Convert to the key used in the shared store.
    /// Format: "{prefix}{subject}:{scope}"
    pub fn to_store_key(&self, prefix: &str) -> String {
        format!("{}{}:{}", prefix, self.subject, self.scope)
    }
}

impl fmt::Display for CounterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.subject, self.scope)
    }
}

/// Settings shared by all counter stores.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Events older than this are trimmed on write, and idle logs expire
    /// after it.
    pub retention: Duration,
    /// Prefix for every store key.
    pub key_prefix: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(3600),
            key_prefix: "ratelimit:".to_string(),
        }
    }
}

/// A shared store of per-key event logs.
///
/// Timestamps are seconds since the Unix epoch.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Append one event at `at` to the log for `key`.
    ///
    /// Trimming events past the retention ceiling, inserting the event and
    /// refreshing the key's expiry happen as one atomic unit.
    async fn record(&self, key: &CounterKey, at: f64) -> Result<(), StoreError>;

    /// Timestamps of all events in `[from, to]`, oldest first.
    ///
    /// Must observe every event this process recorded before the call.
    async fn range(&self, key: &CounterKey, from: f64, to: f64) -> Result<Vec<f64>, StoreError>;
}

/// A member name that is unique per event, so that two events sharing a
/// timestamp are both kept.
pub(crate) fn event_member(at: f64) -> String {
    format!("{:.6}-{:016x}", at, rand::random::<u64>())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_key() {
        let key = CounterKey::new("203.0.113.7", "/v1/builds");
        assert_eq!(key.to_store_key("ratelimit:"), "ratelimit:203.0.113.7:/v1/builds");
        assert_eq!(key.to_string(), "203.0.113.7:/v1/builds");
        assert!(!key.is_global());
    }

    #[test]
    fn test_global_counter_key() {
        let key = CounterKey::global("/v1/builds");
        assert!(key.is_global());
        assert_eq!(key.to_store_key(""), "global:/v1/builds");
    }

    #[test]
    fn test_event_members_are_unique() {
        let a = event_member(1000.5);
        let b = event_member(1000.5);
        assert_ne!(a, b);
        assert!(a.starts_with("1000.500000-"));
    }
}

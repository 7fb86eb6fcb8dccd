//! Sliding-window counting over the shared event logs.

use futures::future::try_join_all;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

use super::clock::{epoch_seconds, Clock};
use super::tiers::{Tier, TierKind};
use crate::error::StoreError;
use crate::store::{CounterKey, CounterStore};

/// The state of one tier's window at decision time.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowStatus {
    pub key: CounterKey,
    pub kind: TierKind,
    /// Events in `[now - window, now]`, including this request's own
    pub observed: u64,
    pub limit: u32,
    pub window: Duration,
    /// Timestamp of the oldest counted event
    pub oldest_event: Option<f64>,
    /// Decision time, seconds since the Unix epoch
    pub now: f64,
}

impl WindowStatus {
    pub fn remaining(&self) -> u64 {
        u64::from(self.limit).saturating_sub(self.observed)
    }

    pub fn is_limited(&self) -> bool {
        self.observed > u64::from(self.limit)
    }

    /// Time until the oldest counted event leaves the window; zero unless
    /// limited.
    pub fn retry_after(&self) -> Duration {
        if !self.is_limited() {
            return Duration::ZERO;
        }
        let Some(oldest) = self.oldest_event else {
            return Duration::ZERO;
        };
        let age = (self.now - oldest).max(0.0);
        let wait = self.window.as_secs_f64() - age;
        if wait > 0.0 {
            Duration::from_secs_f64(wait)
        } else {
            Duration::ZERO
        }
    }
}

/// Counts events per tier against the shared store.
pub struct SlidingWindowCounter {
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
}

impl SlidingWindowCounter {
    pub fn new(store: Arc<dyn CounterStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Record this request and measure every tier's window.
    ///
    /// All tiers share one timestamp. Each distinct counter key receives
    /// exactly one event, then every tier is range-queried. Statuses come
    /// back in tier order.
    pub async fn evaluate(&self, tiers: &[Tier]) -> Result<Vec<WindowStatus>, StoreError> {
        let now = epoch_seconds(self.clock.now());

        let mut recorded: HashSet<&CounterKey> = HashSet::with_capacity(tiers.len());
        for tier in tiers {
            if recorded.insert(&tier.key) {
                self.store.record(&tier.key, now).await?;
            }
        }

        try_join_all(tiers.iter().map(|tier| self.measure(tier, now))).await
    }

    async fn measure(&self, tier: &Tier, now: f64) -> Result<WindowStatus, StoreError> {
        let window = tier.quota.window();
        let events = self
            .store
            .range(&tier.key, now - window.as_secs_f64(), now)
            .await?;

        trace!(
            key = %tier.key,
            tier = %tier.kind,
            observed = events.len(),
            limit = tier.quota.count(),
            window_secs = window.as_secs_f64(),
            "Measured window"
        );

        Ok(WindowStatus {
            key: tier.key.clone(),
            kind: tier.kind,
            observed: events.len() as u64,
            limit: tier.quota.count(),
            window,
            oldest_event: events.iter().copied().reduce(f64::min),
            now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::ManualClock;
    use crate::ratelimit::quota::Quota;
    use crate::store::InMemoryCounterStore;

    fn tier(subject: &str, count: u32, secs: u64) -> Tier {
        Tier {
            kind: TierKind::Anonymous,
            key: CounterKey::new(subject, "/v1/test"),
            quota: Quota::per_secs(count, secs).unwrap(),
        }
    }

    fn counter() -> (SlidingWindowCounter, ManualClock) {
        let clock = ManualClock::default();
        let counter = SlidingWindowCounter::new(
            Arc::new(InMemoryCounterStore::new()),
            Arc::new(clock.clone()),
        );
        (counter, clock)
    }

    fn status(observed: u64, limit: u32, oldest: Option<f64>, now: f64) -> WindowStatus {
        WindowStatus {
            key: CounterKey::new("a", "/"),
            kind: TierKind::Anonymous,
            observed,
            limit,
            window: Duration::from_secs(10),
            oldest_event: oldest,
            now,
        }
    }

    #[test]
    fn test_window_status_math() {
        let s = status(3, 5, Some(100.0), 104.0);
        assert_eq!(s.remaining(), 2);
        assert!(!s.is_limited());
        assert_eq!(s.retry_after(), Duration::ZERO);

        // At the limit is not over it.
        let s = status(5, 5, Some(100.0), 104.0);
        assert_eq!(s.remaining(), 0);
        assert!(!s.is_limited());

        let s = status(6, 5, Some(100.0), 104.0);
        assert_eq!(s.remaining(), 0);
        assert!(s.is_limited());
        assert_eq!(s.retry_after(), Duration::from_secs(6));
    }

    #[test]
    fn test_retry_after_never_negative() {
        let s = status(6, 5, Some(80.0), 104.0);
        assert_eq!(s.retry_after(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_limit_plus_one_is_limited() {
        let (counter, _clock) = counter();
        let tiers = [tier("a", 5, 10)];

        for expected_remaining in (0..5).rev() {
            let statuses = counter.evaluate(&tiers).await.unwrap();
            assert!(!statuses[0].is_limited());
            assert_eq!(statuses[0].remaining(), expected_remaining);
        }

        let statuses = counter.evaluate(&tiers).await.unwrap();
        assert!(statuses[0].is_limited());
        assert_eq!(statuses[0].observed, 6);
        assert!(statuses[0].retry_after() > Duration::ZERO);
    }

    #[tokio::test]
    async fn test_window_slides() {
        let (counter, clock) = counter();
        let tiers = [tier("a", 5, 10)];

        for _ in 0..3 {
            counter.evaluate(&tiers).await.unwrap();
        }
        clock.advance(Duration::from_secs(11));

        let statuses = counter.evaluate(&tiers).await.unwrap();
        assert_eq!(statuses[0].observed, 1);
    }

    #[tokio::test]
    async fn test_shared_key_records_once() {
        let (counter, _clock) = counter();
        let tiers = [tier("a", 10, 60), tier("a", 100, 3600)];

        let statuses = counter.evaluate(&tiers).await.unwrap();
        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses[0].observed, 1);
        assert_eq!(statuses[1].observed, 1);
    }

    #[tokio::test]
    async fn test_windows_of_different_length_share_events() {
        let (counter, clock) = counter();
        let tiers = [tier("a", 10, 60), tier("a", 100, 3600)];

        counter.evaluate(&tiers).await.unwrap();
        clock.advance(Duration::from_secs(120));
        let statuses = counter.evaluate(&tiers).await.unwrap();

        assert_eq!(statuses[0].observed, 1);
        assert_eq!(statuses[1].observed, 2);
    }

    #[tokio::test]
    async fn test_identities_are_independent() {
        let (counter, _clock) = counter();

        for _ in 0..4 {
            counter.evaluate(&[tier("a", 5, 10)]).await.unwrap();
        }
        let statuses = counter.evaluate(&[tier("b", 5, 10)]).await.unwrap();
        assert_eq!(statuses[0].observed, 1);
    }
}

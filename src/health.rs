//! Freshness of the data served behind the gateway.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Shared up/down flag.
///
/// Transitions are reported exactly once, so a caller can notify on the edge
/// instead of on every check.
#[derive(Debug, Clone)]
pub struct ServiceHealth {
    up: Arc<AtomicBool>,
}

impl Default for ServiceHealth {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceHealth {
    /// A handle that starts out up.
    pub fn new() -> Self {
        Self {
            up: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn is_up(&self) -> bool {
        self.up.load(Ordering::Acquire)
    }

    /// Mark upstream data as stale. Returns `true` only on the up to down edge.
    pub fn mark_stale(&self) -> bool {
        let changed = self.up.swap(false, Ordering::AcqRel);
        if changed {
            warn!("Upstream data is stale, service marked down");
        }
        changed
    }

    /// Mark upstream data as fresh. Returns `true` only on the down to up edge.
    pub fn mark_fresh(&self) -> bool {
        let changed = !self.up.swap(true, Ordering::AcqRel);
        if changed {
            info!("Upstream data is fresh again, service marked up");
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_up() {
        assert!(ServiceHealth::new().is_up());
    }

    #[test]
    fn test_transitions_fire_once() {
        let health = ServiceHealth::new();

        assert!(!health.mark_fresh());
        assert!(health.mark_stale());
        assert!(!health.mark_stale());
        assert!(!health.is_up());

        assert!(health.mark_fresh());
        assert!(!health.mark_fresh());
        assert!(health.is_up());
    }

    #[test]
    fn test_clones_share_state() {
        let health = ServiceHealth::new();
        let other = health.clone();

        assert!(other.mark_stale());
        assert!(!health.is_up());
        assert!(!health.mark_stale());
    }
}

//! Turning window statuses into an admission decision.

use std::cmp::Ordering;
use tracing::warn;

use super::counter::WindowStatus;
use crate::error::AdmissionError;

pub const HEADER_LIMIT: &str = "RateLimit-Limit";
pub const HEADER_PERIOD: &str = "RateLimit-Period";
pub const HEADER_REMAINING: &str = "RateLimit-Remaining";
pub const HEADER_RESET: &str = "RateLimit-Reset";
pub const HEADER_RETRY_AFTER: &str = "Retry-After";

/// Rate-limit headers describing one window. Durations are whole seconds,
/// rounded up.
pub fn rate_limit_headers(status: &WindowStatus) -> [(&'static str, String); 5] {
    let retry_after = ceil_secs(status.retry_after().as_secs_f64());
    [
        (HEADER_LIMIT, status.limit.to_string()),
        (HEADER_PERIOD, ceil_secs(status.window.as_secs_f64()).to_string()),
        (HEADER_REMAINING, status.remaining().to_string()),
        (HEADER_RESET, retry_after.to_string()),
        (HEADER_RETRY_AFTER, retry_after.to_string()),
    ]
}

fn ceil_secs(secs: f64) -> u64 {
    secs.ceil() as u64
}

/// Whether the request may proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Admit,
    Reject,
}

/// The outcome of evaluating every tier for one request.
#[derive(Debug, Clone)]
pub struct Decision {
    pub statuses: Vec<WindowStatus>,
    pub verdict: Verdict,
}

impl Decision {
    /// The most constraining status: smallest `remaining`, preferring limited
    /// windows and then the longest wait. Ties keep tier order.
    pub fn tightest(&self) -> Option<&WindowStatus> {
        self.statuses.iter().reduce(|best, candidate| {
            match tightness(candidate, best) {
                Ordering::Less => candidate,
                _ => best,
            }
        })
    }

    pub fn violations(&self) -> impl Iterator<Item = &WindowStatus> {
        self.statuses.iter().filter(|s| s.is_limited())
    }

    /// Headers to attach to the response, admitted or not.
    pub fn headers(&self) -> Option<[(&'static str, String); 5]> {
        self.tightest().map(rate_limit_headers)
    }
}

fn tightness(a: &WindowStatus, b: &WindowStatus) -> Ordering {
    a.remaining()
        .cmp(&b.remaining())
        .then_with(|| b.is_limited().cmp(&a.is_limited()))
        .then_with(|| b.retry_after().cmp(&a.retry_after()))
}

/// Applies the enforcement switch to window statuses.
#[derive(Debug, Clone, Copy)]
pub struct Enforcer {
    enforce: bool,
}

impl Enforcer {
    pub fn new(enforce: bool) -> Self {
        Self { enforce }
    }

    pub fn is_enforcing(&self) -> bool {
        self.enforce
    }

    /// Decide on a request. Every violation is logged; it only rejects the
    /// request while enforcing.
    pub fn decide(&self, statuses: Vec<WindowStatus>) -> Decision {
        let mut verdict = Verdict::Admit;
        for status in statuses.iter().filter(|s| s.is_limited()) {
            warn!(
                key = %status.key,
                tier = %status.kind,
                observed = status.observed,
                limit = status.limit,
                window_secs = status.window.as_secs_f64(),
                enforced = self.enforce,
                "Rate limit exceeded"
            );
            if self.enforce {
                verdict = Verdict::Reject;
            }
        }
        Decision { statuses, verdict }
    }

    /// Like [`Enforcer::decide`], converting a rejection into an error that
    /// carries the tightest window.
    pub fn enforce(&self, statuses: Vec<WindowStatus>) -> Result<Decision, AdmissionError> {
        let decision = self.decide(statuses);
        if decision.verdict == Verdict::Reject {
            if let Some(status) = decision.tightest() {
                return Err(AdmissionError::RateLimited(Box::new(status.clone())));
            }
        }
        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::tiers::TierKind;
    use crate::store::CounterKey;
    use std::time::Duration;

    fn status(subject: &str, observed: u64, limit: u32, window: u64) -> WindowStatus {
        WindowStatus {
            key: CounterKey::new(subject, "/v1/test"),
            kind: TierKind::Anonymous,
            observed,
            limit,
            window: Duration::from_secs(window),
            oldest_event: Some(1000.0),
            now: 1002.5,
        }
    }

    #[test]
    fn test_tightest_is_smallest_remaining() {
        let decision = Enforcer::new(true).decide(vec![
            status("a", 3, 10, 60),
            status("b", 1, 2, 1),
            status("c", 50, 100, 3600),
        ]);
        assert_eq!(decision.tightest().unwrap().key.subject, "b");
    }

    #[test]
    fn test_tightest_prefers_limited_window_on_tie() {
        let decision = Enforcer::new(false).decide(vec![
            status("at_limit", 10, 10, 60),
            status("over", 11, 10, 60),
        ]);
        assert_eq!(decision.tightest().unwrap().key.subject, "over");
    }

    #[test]
    fn test_headers_round_up() {
        let headers = rate_limit_headers(&status("a", 11, 10, 10));
        assert_eq!(headers[0], (HEADER_LIMIT, "10".to_string()));
        assert_eq!(headers[1], (HEADER_PERIOD, "10".to_string()));
        assert_eq!(headers[2], (HEADER_REMAINING, "0".to_string()));
        // 10s window, oldest event 2.5s old
        assert_eq!(headers[3], (HEADER_RESET, "8".to_string()));
        assert_eq!(headers[4], (HEADER_RETRY_AFTER, "8".to_string()));
    }

    #[test]
    fn test_observe_only_admits_violations() {
        let enforcer = Enforcer::new(false);
        let decision = enforcer.enforce(vec![status("a", 11, 10, 10)]).unwrap();
        assert_eq!(decision.verdict, Verdict::Admit);
        assert_eq!(decision.violations().count(), 1);
    }

    #[test]
    fn test_enforcing_rejects_violations() {
        let enforcer = Enforcer::new(true);
        let err = enforcer
            .enforce(vec![status("a", 1, 10, 10), status("b", 11, 10, 10)])
            .unwrap_err();
        match err {
            AdmissionError::RateLimited(status) => assert_eq!(status.key.subject, "b"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_no_statuses_no_headers() {
        let decision = Enforcer::new(true).decide(Vec::new());
        assert!(decision.headers().is_none());
        assert_eq!(decision.verdict, Verdict::Admit);
    }
}

//! Quota declarations.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// At most `count` admitted events per `window` for one identity and scope.
///
/// Quotas are immutable once constructed; both fields are guaranteed to be
/// non-zero.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "QuotaDecl", into = "QuotaDecl")]
pub struct Quota {
    count: u32,
    window: Duration,
    scope: Option<String>,
}

/// Wire form of a quota: window in whole seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct QuotaDecl {
    count: u32,
    window: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    scope: Option<String>,
}

impl TryFrom<QuotaDecl> for Quota {
    type Error = String;

    fn try_from(decl: QuotaDecl) -> Result<Self, Self::Error> {
        let quota = Quota::new(decl.count, Duration::from_secs(decl.window))?;
        Ok(match decl.scope {
            Some(scope) => quota.with_scope(scope),
            None => quota,
        })
    }
}

impl From<Quota> for QuotaDecl {
    fn from(quota: Quota) -> Self {
        Self {
            count: quota.count,
            window: quota.window.as_secs(),
            scope: quota.scope,
        }
    }
}

impl Quota {
    /// Create a quota, rejecting a zero count or an empty window.
    pub fn new(count: u32, window: Duration) -> Result<Self, String> {
        if count == 0 {
            return Err("quota count must be positive".to_string());
        }
        if window.is_zero() {
            return Err("quota window must be positive".to_string());
        }
        Ok(Self {
            count,
            window,
            scope: None,
        })
    }

    /// Shorthand for a quota of `count` events per `secs` seconds.
    pub fn per_secs(count: u32, secs: u64) -> Result<Self, String> {
        Self::new(count, Duration::from_secs(secs))
    }

    /// Count this quota under `scope` instead of the route's own scope.
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }
}

impl fmt::Display for Quota {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}s", self.count, self.window.as_secs_f64())?;
        if let Some(scope) = &self.scope {
            write!(f, "@{}", scope)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_rejects_zero_values() {
        assert!(Quota::per_secs(0, 10).is_err());
        assert!(Quota::per_secs(10, 0).is_err());
        assert!(Quota::per_secs(10, 1).is_ok());
    }

    #[test]
    fn test_quota_parses_from_yaml() {
        let quota: Quota = serde_yaml::from_str("{count: 20, window: 10}").unwrap();
        assert_eq!(quota.count(), 20);
        assert_eq!(quota.window(), Duration::from_secs(10));
        assert_eq!(quota.scope(), None);

        let scoped: Quota =
            serde_yaml::from_str("{count: 1, window: 60, scope: /v1/matches/metadata}").unwrap();
        assert_eq!(scoped.scope(), Some("/v1/matches/metadata"));
    }

    #[test]
    fn test_quota_yaml_validation() {
        let result: std::result::Result<Quota, _> = serde_yaml::from_str("{count: 0, window: 10}");
        assert!(result.is_err());
    }

    #[test]
    fn test_quota_display() {
        let quota = Quota::per_secs(100, 3600).unwrap().with_scope("shared");
        assert_eq!(quota.to_string(), "100/3600s@shared");
    }
}

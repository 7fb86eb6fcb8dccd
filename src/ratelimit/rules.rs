//! Per-route quota declarations.
//!
//! Every route the gateway serves declares its tiers in one YAML table that is
//! loaded and validated once at startup:
//!
//! ```yaml
//! exempt: ["/", "/health"]
//! routes:
//!   /v1/players/{account_id}/match-history:
//!     anonymous:
//!       - { count: 60, window: 60 }
//!     authenticated:
//!       - { count: 20, window: 1 }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use super::quota::Quota;
use crate::error::{Result, TurnstileError};

/// The complete quota table for all routes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteTable {
    /// Paths that bypass admission entirely
    #[serde(default = "default_exempt")]
    pub exempt: HashSet<String>,

    /// Declared routes, keyed by route template
    #[serde(default)]
    pub routes: HashMap<String, RouteQuotas>,

    /// Tiers for routes that were not declared; such routes are not limited
    /// when this is unset
    #[serde(default)]
    pub fallback: Option<RouteQuotas>,
}

impl Default for RouteTable {
    fn default() -> Self {
        Self {
            exempt: default_exempt(),
            routes: HashMap::new(),
            fallback: None,
        }
    }
}

fn default_exempt() -> HashSet<String> {
    ["/", "/docs", "/openapi.json", "/health", "/robots.txt", "/metrics"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Tiers declared for one route.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouteQuotas {
    /// Counter scope; defaults to the route template. Routes that name the
    /// same scope share their windows.
    #[serde(default)]
    pub scope: Option<String>,

    /// Whether API keys must hold data access to count as authenticated here
    #[serde(default)]
    pub data_access: bool,

    /// Tier for callers identified by client address
    pub anonymous: Vec<Quota>,

    /// Default tier for callers with a valid API key
    #[serde(default)]
    pub authenticated: Vec<Quota>,

    /// Fleet-wide tier shared by every caller of the route
    #[serde(default)]
    pub global: Vec<Quota>,
}

impl RouteQuotas {
    /// Declare a route with only an anonymous tier.
    pub fn anonymous(quotas: Vec<Quota>) -> Self {
        Self {
            anonymous: quotas,
            ..Default::default()
        }
    }

    pub fn with_authenticated(mut self, quotas: Vec<Quota>) -> Self {
        self.authenticated = quotas;
        self
    }

    pub fn with_global(mut self, quotas: Vec<Quota>) -> Self {
        self.global = quotas;
        self
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    pub fn requiring_data_access(mut self) -> Self {
        self.data_access = true;
        self
    }
}

/// The resolved declaration for one request path.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteMatch<'a> {
    /// Counter scope for this route
    pub scope: &'a str,
    /// Declared tiers
    pub quotas: &'a RouteQuotas,
}

impl RouteTable {
    /// Create an empty table with the default exempt paths.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the table from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading route quota table");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load the table from a YAML string and validate it.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let table: RouteTable = serde_yaml::from_str(yaml)
            .map_err(|e| TurnstileError::Config(format!("Failed to parse route table: {}", e)))?;
        table.validate()?;
        Ok(table)
    }

    /// Add or replace a route declaration.
    pub fn with_route(mut self, route: impl Into<String>, quotas: RouteQuotas) -> Self {
        self.routes.insert(route.into(), quotas);
        self
    }

    pub fn with_fallback(mut self, quotas: RouteQuotas) -> Self {
        self.fallback = Some(quotas);
        self
    }

    /// Check every declaration once, so bad values fail startup instead of
    /// requests.
    pub fn validate(&self) -> Result<()> {
        for (route, quotas) in &self.routes {
            Self::validate_route(route, quotas)?;
        }
        if let Some(fallback) = &self.fallback {
            Self::validate_route("<fallback>", fallback)?;
        }
        Ok(())
    }

    fn validate_route(route: &str, quotas: &RouteQuotas) -> Result<()> {
        if quotas.anonymous.is_empty() {
            return Err(TurnstileError::Quota(format!(
                "route {} declares no anonymous tier",
                route
            )));
        }
        if quotas.scope.as_deref() == Some("") {
            return Err(TurnstileError::Quota(format!(
                "route {} declares an empty scope",
                route
            )));
        }
        Ok(())
    }

    /// The longest window declared on any tier of any route.
    pub fn longest_window(&self) -> Option<Duration> {
        self.routes
            .values()
            .chain(self.fallback.iter())
            .flat_map(|q| q.anonymous.iter().chain(&q.authenticated).chain(&q.global))
            .map(Quota::window)
            .max()
    }

    /// Whether `path` bypasses admission.
    pub fn is_exempt(&self, path: &str) -> bool {
        self.exempt.contains(path)
    }

    /// Find the declaration for a route template, falling back to the
    /// undeclared-route tiers.
    pub fn find(&self, route: &str) -> Option<RouteMatch<'_>> {
        if let Some((template, quotas)) = self.routes.get_key_value(route) {
            return Some(RouteMatch {
                scope: quotas.scope.as_deref().unwrap_or(template),
                quotas,
            });
        }

        self.fallback.as_ref().map(|quotas| RouteMatch {
            scope: quotas.scope.as_deref().unwrap_or("default"),
            quotas,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_parse_route_table() {
        let yaml = r#"
routes:
  /v1/builds:
    anonymous:
      - { count: 100, window: 1 }
  /v1/matches/{match_id}/metadata:
    scope: metadata
    data_access: true
    anonymous:
      - { count: 10, window: 60 }
      - { count: 100, window: 3600 }
    authenticated:
      - { count: 20, window: 1 }
    global:
      - { count: 3000, window: 3600 }
"#;
        let table = RouteTable::from_yaml(yaml).unwrap();
        assert_eq!(table.routes.len(), 2);
        assert!(table.is_exempt("/health"));

        let metadata = table.find("/v1/matches/{match_id}/metadata").unwrap();
        assert_eq!(metadata.scope, "metadata");
        assert!(metadata.quotas.data_access);
        assert_eq!(metadata.quotas.anonymous.len(), 2);
        assert_eq!(metadata.quotas.global[0].window(), Duration::from_secs(3600));
    }

    #[test]
    fn test_scope_defaults_to_route_template() {
        let table = RouteTable::new().with_route(
            "/v1/builds",
            RouteQuotas::anonymous(vec![Quota::per_secs(100, 1).unwrap()]),
        );
        assert_eq!(table.find("/v1/builds").unwrap().scope, "/v1/builds");
    }

    #[test]
    fn test_undeclared_route_uses_fallback() {
        let table = RouteTable::new();
        assert!(table.find("/v1/unknown").is_none());

        let table = table.with_fallback(RouteQuotas::anonymous(vec![
            Quota::per_secs(20, 10).unwrap()
        ]));
        let found = table.find("/v1/unknown").unwrap();
        assert_eq!(found.scope, "default");
        assert_eq!(found.quotas.anonymous[0].count(), 20);
    }

    #[test]
    fn test_route_without_anonymous_tier_rejected() {
        let yaml = r#"
routes:
  /v1/builds:
    anonymous: []
    authenticated:
      - { count: 100, window: 1 }
"#;
        let err = RouteTable::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, TurnstileError::Quota(_)));
    }

    #[test]
    fn test_zero_quota_rejected_at_parse() {
        let yaml = r#"
routes:
  /v1/builds:
    anonymous:
      - { count: 0, window: 1 }
"#;
        let err = RouteTable::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, TurnstileError::Config(_)));
    }

    #[test]
    fn test_explicit_exempt_list_replaces_default() {
        let yaml = r#"
exempt: ["/status"]
routes: {}
"#;
        let table = RouteTable::from_yaml(yaml).unwrap();
        assert!(table.is_exempt("/status"));
        assert!(!table.is_exempt("/health"));
    }
}

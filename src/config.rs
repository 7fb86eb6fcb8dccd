//! Configuration management for Turnstile.
//!
//! Configuration is read once at process start: an optional YAML file layered
//! under `TURNSTILE__*` environment variables, e.g.
//! `TURNSTILE__RATE_LIMITING__ENFORCE=true`.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};

use crate::error::{Result, TurnstileError};
use crate::ratelimit::RouteTable;

/// Main configuration for the Turnstile service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnstileConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,

    /// Shared counter store
    #[serde(default)]
    pub redis: RedisConfig,

    /// Durable key registry
    #[serde(default)]
    pub postgres: PostgresConfig,

    /// Log output
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Path to the per-route quota table (YAML)
    pub routes_path: Option<String>,

    /// Reject requests that exceed a quota; when false violations are only logged
    #[serde(default)]
    pub enforce: bool,

    /// Refuse anonymous callers fleet-wide
    #[serde(default)]
    pub emergency_mode: bool,

    /// Retention ceiling for every event log, in seconds
    #[serde(default = "default_retention")]
    pub retention_secs: u64,

    /// TTL of the local key-validation and override caches, in seconds
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,

    /// Capacity of each local cache
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: u64,

    /// Prefix prepended to every counter key in the shared store
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Prefix stripped from candidate API keys before parsing
    #[serde(default = "default_api_key_prefix")]
    pub api_key_prefix: String,

    /// Account groups callers may request explicitly
    #[serde(default)]
    pub account_groups: Vec<String>,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            routes_path: None,
            enforce: false,
            emergency_mode: false,
            retention_secs: default_retention(),
            cache_ttl_secs: default_cache_ttl(),
            cache_capacity: default_cache_capacity(),
            key_prefix: default_key_prefix(),
            api_key_prefix: default_api_key_prefix(),
            account_groups: Vec::new(),
        }
    }
}

impl RateLimitingConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Check that event logs outlive every window declared in `routes`.
    ///
    /// Logs are trimmed to the retention, so a shorter retention would
    /// undercount the longer windows.
    pub fn validate_retention(&self, routes: &RouteTable) -> Result<()> {
        if self.retention_secs == 0 {
            return Err(TurnstileError::Config(
                "rate_limiting.retention_secs must be positive".to_string(),
            ));
        }
        match routes.longest_window() {
            Some(window) if window > self.retention() => Err(TurnstileError::Config(format!(
                "rate_limiting.retention_secs ({}) is shorter than the longest quota window ({}s)",
                self.retention_secs,
                window.as_secs()
            ))),
            _ => Ok(()),
        }
    }
}

fn default_retention() -> u64 {
    3600
}

fn default_cache_ttl() -> u64 {
    60
}

fn default_cache_capacity() -> u64 {
    10_000
}

fn default_key_prefix() -> String {
    "ratelimit:".to_string()
}

fn default_api_key_prefix() -> String {
    "HEXE-".to_string()
}

/// Shared counter store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Connection URL; when unset an in-process store is used
    pub url: Option<String>,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: Some("redis://redis:6379/0".to_string()),
        }
    }
}

/// Durable key registry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    /// Connection URL; when unset every API key is treated as unknown
    pub url: Option<String>,

    /// Pool size
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
        }
    }
}

fn default_max_connections() -> u32 {
    10
}

/// Log output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    #[serde(default = "default_log_filter")]
    pub filter: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            json: false,
        }
    }
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl TurnstileConfig {
    /// Load configuration from an optional YAML file and the environment.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::new(path, FileFormat::Yaml));
        }
        let config = builder
            .add_source(
                Environment::with_prefix("TURNSTILE")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("rate_limiting.account_groups")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Load configuration from a YAML string, without environment overrides.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()?
            .try_deserialize()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::{Quota, RouteQuotas};

    #[test]
    fn test_defaults() {
        let config = TurnstileConfig::default();
        assert_eq!(config.server.http_addr.port(), 8080);
        assert!(!config.rate_limiting.enforce);
        assert!(!config.rate_limiting.emergency_mode);
        assert_eq!(config.rate_limiting.retention(), Duration::from_secs(3600));
        assert_eq!(config.rate_limiting.cache_ttl(), Duration::from_secs(60));
        assert_eq!(config.rate_limiting.api_key_prefix, "HEXE-");
    }

    #[test]
    fn test_from_yaml_overrides_defaults() {
        let yaml = r#"
server:
  http_addr: "127.0.0.1:9000"
rate_limiting:
  enforce: true
  emergency_mode: true
  routes_path: config/routes.yaml
  account_groups: [GetMatchHistory]
redis:
  url: "redis://127.0.0.1/"
"#;
        let config = TurnstileConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.server.http_addr.port(), 9000);
        assert!(config.rate_limiting.enforce);
        assert!(config.rate_limiting.emergency_mode);
        assert_eq!(
            config.rate_limiting.routes_path.as_deref(),
            Some("config/routes.yaml")
        );
        assert_eq!(config.rate_limiting.account_groups, vec!["GetMatchHistory"]);
        assert_eq!(config.rate_limiting.retention_secs, 3600);
        assert_eq!(config.postgres.max_connections, 10);
    }

    fn routes_with_window(secs: u64) -> RouteTable {
        RouteTable::new().with_route(
            "/v1/builds",
            RouteQuotas::anonymous(vec![Quota::per_secs(10, 60).unwrap()])
                .with_global(vec![Quota::per_secs(1000, secs).unwrap()]),
        )
    }

    #[test]
    fn test_zero_retention_rejected() {
        let config = RateLimitingConfig {
            retention_secs: 0,
            ..Default::default()
        };
        let err = config.validate_retention(&RouteTable::new()).unwrap_err();
        assert!(matches!(err, TurnstileError::Config(_)));
    }

    #[test]
    fn test_retention_must_cover_longest_window() {
        let config = RateLimitingConfig::default();
        assert!(config.validate_retention(&routes_with_window(3600)).is_ok());

        let err = config.validate_retention(&routes_with_window(7200)).unwrap_err();
        assert!(matches!(err, TurnstileError::Config(_)));

        let config = RateLimitingConfig {
            retention_secs: 7200,
            ..Default::default()
        };
        assert!(config.validate_retention(&routes_with_window(7200)).is_ok());
    }
}

//! Caller identification.

use serde::Serialize;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::cache::TtlCache;
use super::registry::KeyRegistry;
use crate::error::AdmissionError;

/// The unit quotas are tracked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Identity {
    /// A validated, enabled API key
    ApiKey(Uuid),
    /// A caller without a usable key, identified by client address
    AnonymousIp(IpAddr),
}

impl Identity {
    pub fn is_api_key(&self) -> bool {
        matches!(self, Identity::ApiKey(_))
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::ApiKey(key) => write!(f, "{}", key.hyphenated()),
            Identity::AnonymousIp(ip) => write!(f, "{}", ip),
        }
    }
}

/// Resolves a request's identity from its candidate API key and client address.
pub struct IdentityResolver {
    registry: Arc<dyn KeyRegistry>,
    /// (key, data access required) -> usable
    cache: TtlCache<(Uuid, bool), bool>,
    key_prefix: String,
    emergency_mode: bool,
    account_groups: Vec<String>,
}

impl IdentityResolver {
    pub fn new(registry: Arc<dyn KeyRegistry>, cache: TtlCache<(Uuid, bool), bool>) -> Self {
        Self {
            registry,
            cache,
            key_prefix: "HEXE-".to_string(),
            emergency_mode: false,
            account_groups: Vec::new(),
        }
    }

    /// Prefix stripped from candidate keys before parsing.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Refuse callers without a usable key instead of treating them as anonymous.
    pub fn with_emergency_mode(mut self, enabled: bool) -> Self {
        self.emergency_mode = enabled;
        self
    }

    /// Account groups keyed callers may request.
    pub fn with_account_groups(mut self, groups: Vec<String>) -> Self {
        self.account_groups = groups;
        self
    }

    /// Parse a candidate key into the expected token shape.
    pub fn parse_api_key(&self, raw: &str) -> Option<Uuid> {
        let raw = raw.trim();
        let token = raw.strip_prefix(self.key_prefix.as_str()).unwrap_or(raw);
        Uuid::parse_str(token).ok()
    }

    /// Whether `key` exists, is enabled and, if required, has data access.
    ///
    /// Answers are cached; registry failures count as "not usable" and are
    /// not cached.
    pub async fn is_usable_key(&self, key: Uuid, require_data_access: bool) -> bool {
        let cache_key = (key, require_data_access);
        if let Some(usable) = self.cache.get(&cache_key).await {
            return usable;
        }

        match self.registry.find_key(&key).await {
            Ok(record) => {
                let usable = record.is_some_and(|r| r.is_usable(require_data_access));
                self.cache.insert(cache_key, usable).await;
                usable
            }
            Err(e) => {
                warn!(error = %e, "Key registry lookup failed, treating key as unusable");
                false
            }
        }
    }

    /// Resolve the identity for one request.
    ///
    /// # Errors
    /// Returns [`AdmissionError::EmergencyMode`] when emergency mode is on and
    /// no usable key was supplied.
    pub async fn resolve(
        &self,
        candidate: Option<&str>,
        client_ip: IpAddr,
        require_data_access: bool,
    ) -> Result<Identity, AdmissionError> {
        if let Some(raw) = candidate {
            match self.parse_api_key(raw) {
                Some(key) if self.is_usable_key(key, require_data_access).await => {
                    return Ok(Identity::ApiKey(key));
                }
                Some(key) => {
                    debug!(key = %key, "API key unknown or disabled, falling back to client address");
                }
                None => {
                    debug!("Malformed API key, falling back to client address");
                }
            }
        }

        if self.emergency_mode {
            return Err(AdmissionError::EmergencyMode);
        }
        Ok(Identity::AnonymousIp(client_ip))
    }

    /// Check the account groups a caller asked for.
    ///
    /// Only keyed callers may name groups, and only groups from the
    /// configured list.
    pub fn authorize_account_groups(
        &self,
        identity: &Identity,
        requested: Option<&str>,
    ) -> Result<Vec<String>, AdmissionError> {
        let Some(requested) = requested.filter(|r| !r.trim().is_empty()) else {
            return Ok(Vec::new());
        };
        if !identity.is_api_key() {
            return Err(AdmissionError::Forbidden(
                "account groups require a valid API key".to_string(),
            ));
        }

        requested
            .split(',')
            .map(str::trim)
            .map(|group| {
                if self.account_groups.iter().any(|g| g == group) {
                    Ok(group.to_string())
                } else {
                    Err(AdmissionError::Forbidden(format!(
                        "unknown account group {}",
                        group
                    )))
                }
            })
            .collect()
    }
}

//! Durable API key registry.
//!
//! The registry is owned by an administrative system; the gateway only reads
//! it. Two tables are consulted:
//!
//! - `api_keys (key uuid, disabled bool, data_access bool)`
//! - `api_key_limits (key uuid, path text, rate_limit int, rate_period interval)`

use async_trait::async_trait;
use parking_lot::RwLock;
use sqlx::postgres::types::PgInterval;
use sqlx::PgPool;
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

use super::quota::Quota;
use crate::error::RegistryError;

/// Registry state of one API key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyRecord {
    pub disabled: bool,
    pub data_access: bool,
}

impl KeyRecord {
    pub fn enabled() -> Self {
        Self {
            disabled: false,
            data_access: false,
        }
    }

    pub fn with_data_access(mut self) -> Self {
        self.data_access = true;
        self
    }

    pub fn disabled() -> Self {
        Self {
            disabled: true,
            data_access: false,
        }
    }

    /// Whether the key may be used, optionally for data-scope routes.
    pub fn is_usable(&self, require_data_access: bool) -> bool {
        !self.disabled && (self.data_access || !require_data_access)
    }
}

/// Read access to the key registry.
///
/// This trait lets the resolver and the override store run against Postgres
/// in production and an in-memory registry in tests.
#[async_trait]
pub trait KeyRegistry: Send + Sync {
    /// Look up a key; `None` when it is unknown.
    async fn find_key(&self, key: &Uuid) -> Result<Option<KeyRecord>, RegistryError>;

    /// Quotas configured for `key` on `path`.
    async fn find_overrides(&self, key: &Uuid, path: &str) -> Result<Vec<Quota>, RegistryError>;
}

/// Key registry backed by Postgres.
pub struct PgKeyRegistry {
    pool: PgPool,
}

impl PgKeyRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl KeyRegistry for PgKeyRegistry {
    async fn find_key(&self, key: &Uuid) -> Result<Option<KeyRecord>, RegistryError> {
        let row: Option<(bool, bool)> = sqlx::query_as(
            "SELECT disabled IS TRUE, data_access IS TRUE FROM api_keys WHERE key = $1",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(disabled, data_access)| KeyRecord {
            disabled,
            data_access,
        }))
    }

    async fn find_overrides(&self, key: &Uuid, path: &str) -> Result<Vec<Quota>, RegistryError> {
        let rows: Vec<(i32, PgInterval)> = sqlx::query_as(
            "SELECT rate_limit, rate_period FROM api_key_limits WHERE key = $1 AND path = $2",
        )
        .bind(key)
        .bind(path)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(limit, period)| override_quota(key, limit, &period))
            .collect()
    }
}

fn override_quota(key: &Uuid, limit: i32, period: &PgInterval) -> Result<Quota, RegistryError> {
    let invalid = |reason: String| RegistryError::InvalidRow {
        key: key.to_string(),
        reason,
    };

    if period.months != 0 {
        return Err(invalid("month-based periods are not supported".to_string()));
    }
    let micros = i64::from(period.days) * 86_400_000_000 + period.microseconds;
    let micros = u64::try_from(micros).map_err(|_| invalid("negative period".to_string()))?;
    let count = u32::try_from(limit).map_err(|_| invalid(format!("limit {}", limit)))?;

    Quota::new(count, Duration::from_micros(micros)).map_err(invalid)
}

/// In-memory key registry for single-process deployments and tests.
#[derive(Debug, Default)]
pub struct InMemoryKeyRegistry {
    keys: RwLock<HashMap<Uuid, KeyRecord>>,
    overrides: RwLock<HashMap<(Uuid, String), Vec<Quota>>>,
}

impl InMemoryKeyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_key(&self, key: Uuid, record: KeyRecord) {
        self.keys.write().insert(key, record);
    }

    pub fn insert_override(&self, key: Uuid, path: impl Into<String>, quota: Quota) {
        self.overrides
            .write()
            .entry((key, path.into()))
            .or_default()
            .push(quota);
    }
}

#[async_trait]
impl KeyRegistry for InMemoryKeyRegistry {
    async fn find_key(&self, key: &Uuid) -> Result<Option<KeyRecord>, RegistryError> {
        Ok(self.keys.read().get(key).copied())
    }

    async fn find_overrides(&self, key: &Uuid, path: &str) -> Result<Vec<Quota>, RegistryError> {
        Ok(self
            .overrides
            .read()
            .get(&(*key, path.to_string()))
            .cloned()
            .unwrap_or_default())
    }
}

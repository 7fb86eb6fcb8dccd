//! Redis-backed counter store.
//!
//! Each counter key maps to one sorted set whose scores are event timestamps.
//! Writes run as a `MULTI`/`EXEC` pipeline so that trimming, inserting and
//! refreshing the expiry are atomic per key across all gateway processes.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, RedisError};
use std::fmt;
use tracing::{debug, trace};

use super::{event_member, CounterKey, CounterStore, StoreConfig};
use crate::error::StoreError;

/// Counter store shared through Redis.
#[derive(Clone)]
pub struct RedisCounterStore {
    connection: ConnectionManager,
    config: StoreConfig,
}

impl fmt::Debug for RedisCounterStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisCounterStore")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RedisCounterStore {
    /// Connect to Redis.
    ///
    /// # Errors
    /// Returns an error if the URL is invalid or the server does not answer
    /// `PING`.
    pub async fn connect(url: &str, config: StoreConfig) -> Result<Self, RedisError> {
        let client = Client::open(url)?;
        let mut connection = ConnectionManager::new(client).await?;

        redis::cmd("PING")
            .query_async::<String>(&mut connection)
            .await?;
        debug!("Connected to Redis counter store");

        Ok(Self { connection, config })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn record(&self, key: &CounterKey, at: f64) -> Result<(), StoreError> {
        let store_key = key.to_store_key(&self.config.key_prefix);
        let retention = self.config.retention.as_secs();
        let cutoff = at - retention as f64;
        let mut conn = self.connection.clone();

        redis::pipe()
            .atomic()
            .cmd("ZREMRANGEBYSCORE")
            .arg(&store_key)
            .arg("-inf")
            .arg(cutoff)
            .ignore()
            .cmd("ZADD")
            .arg(&store_key)
            .arg(at)
            .arg(event_member(at))
            .ignore()
            .cmd("EXPIRE")
            .arg(&store_key)
            .arg(retention)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;

        trace!(key = %store_key, at = at, "Recorded event");
        Ok(())
    }

    async fn range(&self, key: &CounterKey, from: f64, to: f64) -> Result<Vec<f64>, StoreError> {
        let store_key = key.to_store_key(&self.config.key_prefix);
        let mut conn = self.connection.clone();

        let members: Vec<(String, f64)> = redis::cmd("ZRANGEBYSCORE")
            .arg(&store_key)
            .arg(from)
            .arg(to)
            .arg("WITHSCORES")
            .query_async(&mut conn)
            .await?;

        Ok(members.into_iter().map(|(_, score)| score).collect())
    }
}

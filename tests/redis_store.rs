//! Counter store tests against a live Redis.
//!
//! Run with `REDIS_URL=redis://127.0.0.1:6379/0 cargo test -- --ignored`.
//! Each test skips itself when no server answers.

use std::time::Duration;
use uuid::Uuid;

use turnstile::store::{CounterKey, CounterStore, RedisCounterStore, StoreConfig};

async fn connect(retention: Duration) -> Option<RedisCounterStore> {
    let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379/0".to_string());
    let config = StoreConfig {
        retention,
        key_prefix: format!("turnstile-test:{}:", Uuid::new_v4()),
    };
    match RedisCounterStore::connect(&url, config).await {
        Ok(store) => Some(store),
        Err(e) => {
            eprintln!("skipping, Redis unavailable at {}: {}", url, e);
            None
        }
    }
}

#[tokio::test]
#[ignore]
async fn test_redis_record_and_range() {
    let Some(store) = connect(Duration::from_secs(3600)).await else {
        return;
    };
    let key = CounterKey::new("192.0.2.1", "/v1/builds");

    for at in [1000.0, 1001.5, 1005.0] {
        store.record(&key, at).await.unwrap();
    }

    let events = store.range(&key, 1001.0, 1005.0).await.unwrap();
    assert_eq!(events, vec![1001.5, 1005.0]);
}

#[tokio::test]
#[ignore]
async fn test_redis_same_timestamp_counts_twice() {
    let Some(store) = connect(Duration::from_secs(3600)).await else {
        return;
    };
    let key = CounterKey::new("192.0.2.2", "/v1/builds");

    store.record(&key, 2000.0).await.unwrap();
    store.record(&key, 2000.0).await.unwrap();

    assert_eq!(store.range(&key, 1990.0, 2000.0).await.unwrap().len(), 2);
}

#[tokio::test]
#[ignore]
async fn test_redis_trims_past_retention() {
    let Some(store) = connect(Duration::from_secs(60)).await else {
        return;
    };
    let key = CounterKey::global("/v1/matches/{match_id}/metadata");

    store.record(&key, 3000.0).await.unwrap();
    store.record(&key, 3100.0).await.unwrap();

    let events = store.range(&key, 0.0, 3100.0).await.unwrap();
    assert_eq!(events, vec![3100.0]);
}

//! Integration tests for the cache backends
//!
//! The in-memory tests always run. The Redis tests need a live server:
//! ```bash
//! docker run --name redis-test -p 6379:6379 -d redis:7
//! export REDIS_URL="redis://127.0.0.1:6379"
//! cargo test --package counter-cache --test cache_backends_test -- --ignored --nocapture
//! ```

use counter_cache::{CounterKey, InMemoryCache, KeyValueCache, RedisCache};
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

fn get_redis_url() -> String {
    env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

async fn concurrent_views(cache: Arc<dyn KeyValueCache>, key: String, tasks: usize) -> i64 {
    let mut set = JoinSet::new();
    for _ in 0..tasks {
        let cache = cache.clone();
        let key = key.clone();
        set.spawn(async move { cache.incr_by(&key, 1).await.expect("increment") });
    }
    while let Some(joined) = set.join_next().await {
        joined.expect("task panicked");
    }

    cache
        .get(&key)
        .await
        .expect("get")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

/// Test: N concurrent increments on one key sum to exactly N
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_in_memory_concurrent_increments_are_not_lost() {
    let cache: Arc<dyn KeyValueCache> = Arc::new(InMemoryCache::new());
    let key = CounterKey::video_views(42).to_string();

    let total = concurrent_views(cache, key, 500).await;
    assert_eq!(total, 500);
}

/// Test: delete then scan sees nothing under the prefix
#[tokio::test]
async fn test_in_memory_delete_clears_prefix() {
    let cache = InMemoryCache::new();
    for id in 1..=3 {
        cache
            .incr_by(&CounterKey::video_likes(id).to_string(), 1)
            .await
            .unwrap();
    }

    let keys = cache.scan_prefix("video:likes:").await.unwrap();
    assert_eq!(keys.len(), 3);

    cache.delete(&keys).await.unwrap();
    assert!(cache.scan_prefix("video:likes:").await.unwrap().is_empty());
    assert!(cache.is_empty());
}

#[ignore = "Requires Redis"]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_redis_concurrent_increments_are_not_lost() {
    let redis = RedisCache::connect(&get_redis_url())
        .await
        .expect("Failed to connect to Redis");
    let key = CounterKey::video_views(9_000_001).to_string();
    redis.delete(&[key.clone()]).await.unwrap();

    let cache: Arc<dyn KeyValueCache> = Arc::new(redis.clone());
    let total = concurrent_views(cache, key.clone(), 200).await;
    assert_eq!(total, 200);

    redis.delete(&[key]).await.unwrap();
}

#[ignore = "Requires Redis"]
#[tokio::test]
async fn test_redis_scan_mget_and_ttl() {
    let redis = RedisCache::connect(&get_redis_url())
        .await
        .expect("Failed to connect to Redis");
    redis.ping().await.expect("PING");

    let keys: Vec<String> = (9_100_001..9_100_004)
        .map(|id| CounterKey::video_likes(id).to_string())
        .collect();
    redis.delete(&keys).await.unwrap();

    for key in &keys {
        redis.incr_by(key, -1).await.unwrap();
    }

    let scanned = redis.scan_prefix("video:likes:91000").await.unwrap();
    for key in &keys {
        assert!(scanned.contains(key));
    }

    let single = redis.mget(&keys[..1]).await.unwrap();
    assert_eq!(single, vec![Some("-1".to_string())]);

    // NX leaves a pending delta alone
    let seeded = redis
        .set_if_absent(&keys[0], "1", Duration::from_secs(60))
        .await
        .unwrap();
    assert!(!seeded);
    assert_eq!(redis.get(&keys[0]).await.unwrap().as_deref(), Some("-1"));

    redis
        .set("presigned_url:test:ttl.jpg", "https://example", Duration::from_millis(200))
        .await
        .unwrap();
    assert!(redis.exists("presigned_url:test:ttl.jpg").await.unwrap());
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(!redis.exists("presigned_url:test:ttl.jpg").await.unwrap());

    redis.delete(&keys).await.unwrap();
}

//! Pending-delta cache for video counters
//!
//! Request handlers write view/like deltas and like-state flags here instead of
//! touching PostgreSQL; the aggregation scheduler in video-service drains them.
//! The same store also caches presigned object-storage URLs.
//!
//! - Typed key schema with a parser the scheduler relies on
//! - Atomic increments only, no read-modify-write
//! - SCAN-based prefix enumeration (no blocking KEYS)
//! - Redis backend plus an in-process backend for tests and local runs

mod error;
mod keys;
mod memory;
mod metrics;
mod redis_cache;

pub use error::{CacheError, CacheResult};
pub use keys::{presigned_url_key, CounterKey, CounterNamespace, KeyParseError};
pub use memory::InMemoryCache;
pub use metrics::CacheMetrics;
pub use redis_cache::RedisCache;

use std::time::Duration;

/// Default TTL values
pub mod ttl {
    use std::time::Duration;

    /// Like-state flags, refreshed on every toggle and every flush
    pub const LIKE_STATE: Duration = Duration::from_secs(24 * 3600);
    /// Seed TTL used when an atomic increment fails and the key is set explicitly
    pub const COUNTER_SEED: Duration = Duration::from_secs(24 * 3600);
}

/// Key-value operations the counter engine needs from its cache backend.
///
/// Every mutation a request handler performs on a counter goes through
/// [`KeyValueCache::incr_by`]; only the aggregation scheduler deletes counter keys.
#[async_trait::async_trait]
pub trait KeyValueCache: Send + Sync {
    /// Atomically add `delta`, creating the key at `delta` if absent.
    /// Returns the new value.
    async fn incr_by(&self, key: &str, delta: i64) -> CacheResult<i64>;

    /// Set a string value with a TTL
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()>;

    /// Set a value with a TTL only if the key does not exist.
    /// Returns false and leaves the key untouched when it is already present.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<bool>;

    /// Reset the TTL of an existing key without touching its value.
    /// Returns false when the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool>;

    /// Get a raw string value
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    /// Delete keys; missing keys are ignored
    async fn delete(&self, keys: &[String]) -> CacheResult<()>;

    /// Check if key exists
    async fn exists(&self, key: &str) -> CacheResult<bool>;

    /// All keys starting with `prefix`
    async fn scan_prefix(&self, prefix: &str) -> CacheResult<Vec<String>>;

    /// Values for `keys` in one round trip, positionally aligned
    async fn mget(&self, keys: &[String]) -> CacheResult<Vec<Option<String>>>;

    /// Connectivity probe
    async fn ping(&self) -> CacheResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ttls() {
        assert_eq!(ttl::LIKE_STATE, Duration::from_secs(86_400));
        assert_eq!(ttl::COUNTER_SEED, Duration::from_secs(86_400));
    }
}

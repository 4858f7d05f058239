//! Redis backend

use crate::{CacheError, CacheMetrics, CacheResult, KeyValueCache};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Pipeline};
use std::time::Duration;
use tracing::{debug, warn};

/// Keys requested per SCAN round trip
const SCAN_COUNT: usize = 100;

/// Redis-backed cache. `ConnectionManager` is multiplexed and reconnects on
/// its own, so clones share one connection process-wide.
#[derive(Clone)]
pub struct RedisCache {
    redis: ConnectionManager,
    metrics: CacheMetrics,
}

impl RedisCache {
    pub fn new(redis: ConnectionManager) -> Self {
        Self {
            redis,
            metrics: CacheMetrics::new(),
        }
    }

    /// Open a client for `redis_url` and establish the managed connection.
    pub async fn connect(redis_url: &str) -> CacheResult<Self> {
        let client = Client::open(redis_url)?;
        let manager = ConnectionManager::new(client).await?;
        Ok(Self::new(manager))
    }

    fn conn(&self) -> ConnectionManager {
        self.redis.clone()
    }
}

#[async_trait::async_trait]
impl KeyValueCache for RedisCache {
    async fn incr_by(&self, key: &str, delta: i64) -> CacheResult<i64> {
        match self.conn().incr::<_, _, i64>(key, delta).await {
            Ok(value) => {
                self.metrics.record_increment(key);
                Ok(value)
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Redis INCRBY error");
                self.metrics.record_error(key, "incr");
                Err(CacheError::Redis(e))
            }
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        let millis = ttl.as_millis() as u64;
        if millis == 0 {
            return Err(CacheError::InvalidData(format!(
                "zero TTL for key {}",
                key
            )));
        }

        self.conn()
            .pset_ex::<_, _, ()>(key, value, millis)
            .await
            .map_err(|e| {
                self.metrics.record_error(key, "set");
                CacheError::Redis(e)
            })?;

        debug!(key = %key, ttl_ms = millis, "Cache set");
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<bool> {
        let millis = ttl.as_millis() as u64;
        if millis == 0 {
            return Err(CacheError::InvalidData(format!(
                "zero TTL for key {}",
                key
            )));
        }

        // SET NX replies nil when the key already exists
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(millis)
            .arg("NX")
            .query_async(&mut self.conn())
            .await
            .map_err(|e| {
                self.metrics.record_error(key, "set_nx");
                CacheError::Redis(e)
            })?;

        let stored = reply.is_some();
        debug!(key = %key, ttl_ms = millis, stored, "Cache set if absent");
        Ok(stored)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool> {
        let millis = ttl.as_millis() as u64;
        if millis == 0 {
            return Err(CacheError::InvalidData(format!(
                "zero TTL for key {}",
                key
            )));
        }

        let updated: i64 = redis::cmd("PEXPIRE")
            .arg(key)
            .arg(millis)
            .query_async(&mut self.conn())
            .await
            .map_err(|e| {
                self.metrics.record_error(key, "expire");
                CacheError::Redis(e)
            })?;

        Ok(updated == 1)
    }

    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        match self.conn().get::<_, Option<String>>(key).await {
            Ok(Some(value)) => {
                debug!(key = %key, "Cache hit");
                self.metrics.record_hit(key);
                Ok(Some(value))
            }
            Ok(None) => {
                debug!(key = %key, "Cache miss");
                self.metrics.record_miss(key);
                Ok(None)
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Redis get error");
                self.metrics.record_error(key, "get");
                Err(CacheError::Redis(e))
            }
        }
    }

    async fn delete(&self, keys: &[String]) -> CacheResult<()> {
        if keys.is_empty() {
            return Ok(());
        }

        let mut pipe = Pipeline::new();
        for key in keys {
            pipe.del(key).ignore();
        }

        pipe.query_async::<_, ()>(&mut self.conn())
            .await
            .map_err(CacheError::Redis)?;

        debug!(count = keys.len(), "Cache pipeline delete");
        Ok(())
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        let exists: bool = self.conn().exists(key).await?;
        Ok(exists)
    }

    async fn scan_prefix(&self, prefix: &str) -> CacheResult<Vec<String>> {
        let pattern = format!("{}*", prefix);
        let mut conn = self.conn();
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();

        loop {
            // SCAN instead of KEYS to avoid blocking the server
            let (next_cursor, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await?;

            keys.extend(batch);

            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }

        // SCAN may return a key more than once across iterations
        keys.sort_unstable();
        keys.dedup();

        debug!(pattern = %pattern, count = keys.len(), "Cache scan");
        Ok(keys)
    }

    async fn mget(&self, keys: &[String]) -> CacheResult<Vec<Option<String>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        // Explicit MGET: a one-element `get` would be sent as GET and decode differently
        let values: Vec<Option<String>> = redis::cmd("MGET")
            .arg(keys)
            .query_async(&mut self.conn())
            .await?;

        if values.len() != keys.len() {
            return Err(CacheError::InvalidData(format!(
                "MGET returned {} values for {} keys",
                values.len(),
                keys.len()
            )));
        }

        Ok(values)
    }

    async fn ping(&self) -> CacheResult<()> {
        let _: String = redis::cmd("PING").query_async(&mut self.conn()).await?;
        Ok(())
    }
}

//! Shared fixtures: in-memory cache and store wired into the real services
#![allow(dead_code)]

use async_trait::async_trait;
use counter_cache::{CacheError, CacheResult, InMemoryCache, KeyValueCache};
use s3_utils::{ObjectPresigner, StorageError, StorageResult};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use video_service::repository::{CounterStore, InMemoryCounterStore};
use video_service::services::video::ThumbnailSettings;
use video_service::services::{CounterService, PresignedUrlCache, VideoService};
use video_service::workers::{AggregationConfig, AggregationScheduler};

pub const THUMBNAIL_BUCKET: &str = "video-thumbnails";

/// Presigner that fabricates URLs locally and counts calls
#[derive(Default)]
pub struct FakePresigner {
    calls: AtomicUsize,
    failing: AtomicBool,
    empty: AtomicBool,
}

impl FakePresigner {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_empty(&self, empty: bool) {
        self.empty.store(empty, Ordering::SeqCst);
    }
}

#[async_trait]
impl ObjectPresigner for FakePresigner {
    async fn presign_get(
        &self,
        bucket: &str,
        object_name: &str,
        expires_in: Duration,
    ) -> StorageResult<String> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.failing.load(Ordering::SeqCst) {
            return Err(StorageError::Presign {
                bucket: bucket.to_string(),
                object: object_name.to_string(),
                message: "storage offline".to_string(),
            });
        }
        if self.empty.load(Ordering::SeqCst) {
            return Ok(String::new());
        }
        Ok(format!(
            "https://{}.s3.test/{}?X-Amz-Expires={}&sig={}",
            bucket,
            object_name,
            expires_in.as_secs(),
            n
        ))
    }
}

pub struct Harness {
    pub cache: InMemoryCache,
    pub store: InMemoryCounterStore,
    pub presigner: Arc<FakePresigner>,
    pub counters: CounterService,
    pub urls: PresignedUrlCache,
    pub videos: VideoService,
    pub scheduler: Arc<AggregationScheduler>,
}

/// In-memory cache whose next `incr_by` calls fail as if the connection
/// dropped; every other operation passes through.
#[derive(Clone, Default)]
pub struct FlakyIncrCache {
    pub inner: InMemoryCache,
    failing_incrs: Arc<AtomicUsize>,
}

impl FlakyIncrCache {
    pub fn fail_next_incrs(&self, count: usize) {
        self.failing_incrs.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl KeyValueCache for FlakyIncrCache {
    async fn incr_by(&self, key: &str, delta: i64) -> CacheResult<i64> {
        let failing = self
            .failing_incrs
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(CacheError::Unavailable("INCRBY timed out".to_string()));
        }
        self.inner.incr_by(key, delta).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        self.inner.set(key, value, ttl).await
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<bool> {
        self.inner.set_if_absent(key, value, ttl).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool> {
        self.inner.expire(key, ttl).await
    }

    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        self.inner.get(key).await
    }

    async fn delete(&self, keys: &[String]) -> CacheResult<()> {
        self.inner.delete(keys).await
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        self.inner.exists(key).await
    }

    async fn scan_prefix(&self, prefix: &str) -> CacheResult<Vec<String>> {
        self.inner.scan_prefix(prefix).await
    }

    async fn mget(&self, keys: &[String]) -> CacheResult<Vec<Option<String>>> {
        self.inner.mget(keys).await
    }

    async fn ping(&self) -> CacheResult<()> {
        self.inner.ping().await
    }
}

impl Harness {
    pub fn new() -> Self {
        Self::with_batch_size(100)
    }

    pub fn with_batch_size(batch_size: usize) -> Self {
        let cache = InMemoryCache::new();
        let store = InMemoryCounterStore::new();
        let presigner = Arc::new(FakePresigner::default());

        let cache_dyn: Arc<dyn KeyValueCache> = Arc::new(cache.clone());
        let store_dyn: Arc<dyn CounterStore> = Arc::new(store.clone());
        let presigner_dyn: Arc<dyn ObjectPresigner> = presigner.clone();

        let counters = CounterService::new(cache_dyn.clone(), store_dyn.clone());
        let urls = PresignedUrlCache::new(cache_dyn.clone(), presigner_dyn);
        let videos = VideoService::new(
            store_dyn.clone(),
            counters.clone(),
            urls.clone(),
            ThumbnailSettings {
                bucket: THUMBNAIL_BUCKET.to_string(),
                url_ttl: Duration::from_secs(86_400),
            },
        );
        let scheduler = Arc::new(AggregationScheduler::new(
            cache_dyn,
            store_dyn,
            AggregationConfig {
                interval: Duration::from_secs(60),
                batch_size,
            },
        ));

        Self {
            cache,
            store,
            presigner,
            counters,
            urls,
            videos,
            scheduler,
        }
    }

    /// Raw cached value of a key
    pub async fn cached(&self, key: &str) -> Option<String> {
        self.cache.get(key).await.expect("in-memory get")
    }
}

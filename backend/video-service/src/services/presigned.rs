//! Cache-aside for presigned object URLs
//!
//! Entries live for 90% of the URL's real expiry, so a cached URL is always
//! still valid when served. Failures anywhere on this path degrade to "no URL".

use counter_cache::{presigned_url_key, KeyValueCache};
use s3_utils::ObjectPresigner;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::metrics;

/// A cache entry may live for CACHE_TTL_NUMERATOR/CACHE_TTL_DENOMINATOR of the URL expiry
const CACHE_TTL_NUMERATOR: u128 = 9;
const CACHE_TTL_DENOMINATOR: u128 = 10;

/// Cache TTL for a URL that expires after `expiry`, at millisecond precision.
pub fn cache_ttl_for(expiry: Duration) -> Duration {
    let millis = expiry.as_millis() * CACHE_TTL_NUMERATOR / CACHE_TTL_DENOMINATOR;
    Duration::from_millis(u64::try_from(millis).unwrap_or(u64::MAX))
}

#[derive(Clone)]
pub struct PresignedUrlCache {
    cache: Arc<dyn KeyValueCache>,
    presigner: Arc<dyn ObjectPresigner>,
}

impl PresignedUrlCache {
    pub fn new(cache: Arc<dyn KeyValueCache>, presigner: Arc<dyn ObjectPresigner>) -> Self {
        Self { cache, presigner }
    }

    /// Cached URL for `bucket/object_name`, or a freshly minted one valid for
    /// `expiry`. `None` when the URL could not be produced.
    pub async fn get_or_generate(
        &self,
        bucket: &str,
        object_name: &str,
        expiry: Duration,
    ) -> Option<String> {
        let key = presigned_url_key(bucket, object_name);

        match self.cache.get(&key).await {
            Ok(Some(url)) if !url.is_empty() => {
                debug!(key = %key, "Presigned URL cache hit");
                metrics::record_presigned_lookup("hit");
                return Some(url);
            }
            Ok(_) => {}
            Err(e) => {
                warn!(key = %key, error = %e, "Presigned URL cache read failed");
            }
        }
        metrics::record_presigned_lookup("miss");

        let url = match self
            .presigner
            .presign_get(bucket, object_name, expiry)
            .await
        {
            Ok(url) if !url.is_empty() => url,
            Ok(_) => {
                warn!(bucket = %bucket, object = %object_name, "Storage returned an empty URL");
                metrics::record_presigned_lookup("error");
                return None;
            }
            Err(e) => {
                warn!(bucket = %bucket, object = %object_name, error = %e, "Failed to presign URL");
                metrics::record_presigned_lookup("error");
                return None;
            }
        };

        let cache_ttl = cache_ttl_for(expiry);
        if cache_ttl.is_zero() {
            debug!(key = %key, "Expiry too short to cache presigned URL");
        } else if let Err(e) = self.cache.set(&key, &url, cache_ttl).await {
            warn!(key = %key, error = %e, "Failed to cache presigned URL");
        }

        Some(url)
    }

    /// Drop a cached URL, e.g. after the object was replaced.
    pub async fn invalidate(&self, bucket: &str, object_name: &str) {
        let key = presigned_url_key(bucket, object_name);
        if let Err(e) = self.cache.delete(&[key.clone()]).await {
            warn!(key = %key, error = %e, "Failed to invalidate presigned URL");
        }
    }
}

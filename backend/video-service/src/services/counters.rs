use counter_cache::{ttl, CounterKey, KeyValueCache};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::error::{AppError, Result};
use crate::models::{LikeToggle, VideoCounts, VideoRecord};
use crate::repository::CounterStore;

/// Request-time counter layer
///
/// Writes (views, like toggles) land in the cache only, through atomic
/// increments. Reads return durable value + pending delta; a cache failure on
/// a read degrades to "no pending delta" instead of failing the request.
///
/// Keys: video:views:{id}, video:likes:{id}, user:category:likes:{user}:{category},
/// user:like:{user}:{video}
#[derive(Clone)]
pub struct CounterService {
    cache: Arc<dyn KeyValueCache>,
    store: Arc<dyn CounterStore>,
}

impl CounterService {
    pub fn new(cache: Arc<dyn KeyValueCache>, store: Arc<dyn CounterStore>) -> Self {
        Self { cache, store }
    }

    // ========== Write Path ==========

    /// Record one view of a video.
    pub async fn record_view(&self, video_id: i64) {
        self.apply_delta(CounterKey::video_views(video_id), 1).await;
    }

    /// Flip the viewer's like state and fan the signed delta out to the video
    /// like counter and the user's category affinity.
    ///
    /// The flag write and the two increments are independent cache operations;
    /// a crash in between leaves the counters transiently off by one while the
    /// flag stays authoritative.
    pub async fn toggle_like(&self, user_id: i64, video_id: i64) -> Result<LikeToggle> {
        let video = self
            .store
            .video(video_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("video {}", video_id)))?;

        let liked = !self.has_liked(user_id, video_id).await?;

        let flag_key = CounterKey::user_video_like(user_id, video_id).to_string();
        let flag = if liked { "1" } else { "0" };
        if let Err(e) = self.cache.set(&flag_key, flag, ttl::LIKE_STATE).await {
            // Nothing else has changed yet, so the toggle simply did not happen.
            error!(user_id, video_id, error = %e, "Failed to write like state");
            return Err(AppError::CacheUnavailable(e.to_string()));
        }

        let delta = if liked { 1 } else { -1 };
        self.apply_delta(CounterKey::video_likes(video_id), delta)
            .await;
        if let Some(category_id) = video.category_id {
            self.apply_delta(CounterKey::user_category_likes(user_id, category_id), delta)
                .await;
        }

        let likes = video.likes + self.pending_delta(&CounterKey::video_likes(video_id)).await;

        debug!(user_id, video_id, liked, likes, "Like toggled");
        Ok(LikeToggle {
            video_id,
            liked,
            likes,
        })
    }

    /// Atomic increment with a seed fallback for absent keys. Never surfaces an
    /// error: a lost view or like signal is preferable to a failed request.
    async fn apply_delta(&self, key: CounterKey, delta: i64) -> Option<i64> {
        let key = key.to_string();
        let incr_err = match self.cache.incr_by(&key, delta).await {
            Ok(value) => return Some(value),
            Err(e) => e,
        };

        // Only an absent key may be seeded; a present one holds a pending delta
        // that an overwrite would lose.
        match self
            .cache
            .set_if_absent(&key, &delta.to_string(), ttl::COUNTER_SEED)
            .await
        {
            Ok(true) => {
                warn!(key = %key, delta, error = %incr_err, "Increment failed, seeded key");
                Some(delta)
            }
            Ok(false) => {
                error!(
                    key = %key,
                    delta,
                    error = %incr_err,
                    "Increment failed on existing key, dropping counter delta"
                );
                None
            }
            Err(e) => {
                error!(key = %key, delta, error = %e, "Dropping counter delta");
                None
            }
        }
    }

    // ========== Read Path ==========

    /// Whether the user currently likes the video: cached flag first, then the
    /// durable row; no row means not liked.
    pub async fn has_liked(&self, user_id: i64, video_id: i64) -> Result<bool> {
        let key = CounterKey::user_video_like(user_id, video_id).to_string();

        match self.cache.get(&key).await {
            Ok(Some(value)) if value == "1" => return Ok(true),
            Ok(Some(value)) if value == "0" => return Ok(false),
            Ok(Some(value)) => {
                warn!(
                    key = %key,
                    value = %value,
                    "Unexpected like state value, using durable row"
                );
            }
            Ok(None) => {}
            Err(e) => {
                warn!(key = %key, error = %e, "Like state lookup failed, using durable row");
            }
        }

        Ok(self
            .store
            .user_video_like(user_id, video_id)
            .await?
            .unwrap_or(false))
    }

    /// Effective counters of one video.
    pub async fn effective_counts(&self, video_id: i64) -> Result<VideoCounts> {
        let video = self
            .store
            .video(video_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("video {}", video_id)))?;

        Ok(self.counts_with_pending(&video).await)
    }

    /// Merge a durable row with its pending deltas (one MGET).
    pub async fn counts_with_pending(&self, video: &VideoRecord) -> VideoCounts {
        let keys = [
            CounterKey::video_views(video.id).to_string(),
            CounterKey::video_likes(video.id).to_string(),
        ];
        let deltas = self.pending_deltas(&keys).await;

        VideoCounts {
            views: video.views + deltas[0],
            likes: video.likes + deltas[1],
        }
    }

    /// Effective counters for a page of videos. Ids without a durable row are
    /// omitted.
    pub async fn effective_counts_many(
        &self,
        video_ids: &[i64],
    ) -> Result<HashMap<i64, VideoCounts>> {
        let videos = self.store.videos(video_ids).await?;
        if videos.is_empty() {
            return Ok(HashMap::new());
        }

        // [views1, likes1, views2, likes2, ...]
        let mut keys = Vec::with_capacity(videos.len() * 2);
        for video in &videos {
            keys.push(CounterKey::video_views(video.id).to_string());
            keys.push(CounterKey::video_likes(video.id).to_string());
        }
        let deltas = self.pending_deltas(&keys).await;

        Ok(videos
            .iter()
            .enumerate()
            .map(|(i, video)| {
                (
                    video.id,
                    VideoCounts {
                        views: video.views + deltas[i * 2],
                        likes: video.likes + deltas[i * 2 + 1],
                    },
                )
            })
            .collect())
    }

    /// Durable affinity score plus pending delta.
    pub async fn effective_category_affinity(
        &self,
        user_id: i64,
        category_id: i64,
    ) -> Result<i64> {
        let durable = self.store.user_category_score(user_id, category_id).await?;
        let pending = self
            .pending_delta(&CounterKey::user_category_likes(user_id, category_id))
            .await;
        Ok(durable + pending)
    }

    async fn pending_delta(&self, key: &CounterKey) -> i64 {
        self.pending_deltas(&[key.to_string()]).await[0]
    }

    /// Pending deltas for `keys`, positionally aligned. Misses, unparseable
    /// values and cache errors all read as 0.
    async fn pending_deltas(&self, keys: &[String]) -> Vec<i64> {
        match self.cache.mget(keys).await {
            Ok(values) if values.len() == keys.len() => keys
                .iter()
                .zip(values)
                .map(|(key, value)| parse_delta(key, value.as_deref()))
                .collect(),
            Ok(values) => {
                warn!(
                    expected = keys.len(),
                    got = values.len(),
                    "Pending delta lookup returned misaligned values"
                );
                vec![0; keys.len()]
            }
            Err(e) => {
                warn!(
                    error = %e,
                    key_count = keys.len(),
                    "Pending delta lookup failed, assuming none"
                );
                vec![0; keys.len()]
            }
        }
    }
}

fn parse_delta(key: &str, value: Option<&str>) -> i64 {
    match value {
        None => 0,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(key = %key, value = %raw, "Ignoring non-integer pending delta");
            0
        }),
    }
}

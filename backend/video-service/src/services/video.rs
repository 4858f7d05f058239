use std::sync::Arc;
use std::time::Duration;

use crate::error::{AppError, Result};
use crate::models::VideoResponse;
use crate::repository::CounterStore;
use crate::services::{CounterService, PresignedUrlCache};

/// Where thumbnails live and how long their URLs stay valid
#[derive(Debug, Clone)]
pub struct ThumbnailSettings {
    pub bucket: String,
    pub url_ttl: Duration,
}

impl From<&s3_utils::S3Config> for ThumbnailSettings {
    fn from(config: &s3_utils::S3Config) -> Self {
        Self {
            bucket: config.bucket.clone(),
            url_ttl: Duration::from_secs(config.thumbnail_url_ttl_secs),
        }
    }
}

/// Assembles the video read model from the durable row, pending counter
/// deltas, and a presigned thumbnail URL.
#[derive(Clone)]
pub struct VideoService {
    store: Arc<dyn CounterStore>,
    counters: CounterService,
    urls: PresignedUrlCache,
    thumbnails: ThumbnailSettings,
}

impl VideoService {
    pub fn new(
        store: Arc<dyn CounterStore>,
        counters: CounterService,
        urls: PresignedUrlCache,
        thumbnails: ThumbnailSettings,
    ) -> Self {
        Self {
            store,
            counters,
            urls,
            thumbnails,
        }
    }

    /// `NotFound` unless the video has a durable row.
    pub async fn ensure_exists(&self, video_id: i64) -> Result<()> {
        match self.store.video(video_id).await? {
            Some(_) => Ok(()),
            None => Err(AppError::NotFound(format!("video {}", video_id))),
        }
    }

    pub async fn get_video(&self, video_id: i64, viewer: Option<i64>) -> Result<VideoResponse> {
        let video = self
            .store
            .video(video_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("video {}", video_id)))?;

        let counts = self.counters.counts_with_pending(&video).await;

        let thumbnail_url = match video.thumbnail_object.as_deref() {
            Some(object) if !object.is_empty() => {
                self.urls
                    .get_or_generate(&self.thumbnails.bucket, object, self.thumbnails.url_ttl)
                    .await
            }
            _ => None,
        };

        let liked_by_viewer = match viewer {
            Some(user_id) => Some(self.counters.has_liked(user_id, video_id).await?),
            None => None,
        };

        Ok(VideoResponse {
            id: video.id,
            title: video.title,
            category_id: video.category_id,
            views: counts.views,
            likes: counts.likes,
            thumbnail_url,
            liked_by_viewer,
            created_at: video.created_at,
        })
    }
}

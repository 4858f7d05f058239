//! Presigned URL cache and the video read model

mod common;

use common::{Harness, THUMBNAIL_BUCKET};
use counter_cache::{presigned_url_key, KeyValueCache};
use std::time::Duration;
use video_service::models::VideoRecord;
use video_service::AppError;

const DAY: Duration = Duration::from_secs(86_400);

/// Test: a generated URL is cached for strictly less than its own expiry
#[tokio::test(start_paused = true)]
async fn test_cached_url_expires_before_the_url() {
    let h = Harness::new();

    let url = h
        .urls
        .get_or_generate(THUMBNAIL_BUCKET, "thumbs/42.jpg", DAY)
        .await
        .expect("url generated");
    assert!(url.contains("thumbs/42.jpg"));

    let key = presigned_url_key(THUMBNAIL_BUCKET, "thumbs/42.jpg");
    let ttl = h.cache.ttl(&key).expect("cached with a TTL");
    assert_eq!(ttl, Duration::from_secs(77_760));
    assert!(ttl < DAY);
}

/// Test: hits are served from the cache until the entry expires
#[tokio::test(start_paused = true)]
async fn test_cache_hit_then_regenerate_after_expiry() {
    let h = Harness::new();
    let expiry = Duration::from_secs(600);

    let first = h
        .urls
        .get_or_generate(THUMBNAIL_BUCKET, "a.jpg", expiry)
        .await
        .unwrap();
    let second = h
        .urls
        .get_or_generate(THUMBNAIL_BUCKET, "a.jpg", expiry)
        .await
        .unwrap();
    assert_eq!(first, second);
    assert_eq!(h.presigner.calls(), 1);

    // 540s cache TTL has passed; the URL itself would still be valid
    tokio::time::advance(Duration::from_secs(541)).await;
    let third = h
        .urls
        .get_or_generate(THUMBNAIL_BUCKET, "a.jpg", expiry)
        .await
        .unwrap();
    assert_ne!(first, third);
    assert_eq!(h.presigner.calls(), 2);
}

#[tokio::test]
async fn test_storage_failure_yields_none_and_caches_nothing() {
    let h = Harness::new();
    h.presigner.set_failing(true);

    assert_eq!(
        h.urls.get_or_generate(THUMBNAIL_BUCKET, "a.jpg", DAY).await,
        None
    );
    assert!(h.cache.is_empty());

    h.presigner.set_failing(false);
    h.presigner.set_empty(true);
    assert_eq!(
        h.urls.get_or_generate(THUMBNAIL_BUCKET, "a.jpg", DAY).await,
        None
    );
    assert!(h.cache.is_empty());
}

/// Test: with the cache down, URLs are still minted, just not cached
#[tokio::test]
async fn test_cache_failure_falls_through_to_storage() {
    let h = Harness::new();
    h.cache.set_unavailable(true);

    let url = h
        .urls
        .get_or_generate(THUMBNAIL_BUCKET, "a.jpg", DAY)
        .await;
    assert!(url.is_some());
    assert_eq!(h.presigner.calls(), 1);
}

#[tokio::test]
async fn test_invalidate_forces_regeneration() {
    let h = Harness::new();
    h.urls
        .get_or_generate(THUMBNAIL_BUCKET, "a.jpg", DAY)
        .await
        .unwrap();

    h.urls.invalidate(THUMBNAIL_BUCKET, "a.jpg").await;
    assert!(!h
        .cache
        .exists(&presigned_url_key(THUMBNAIL_BUCKET, "a.jpg"))
        .await
        .unwrap());

    h.urls
        .get_or_generate(THUMBNAIL_BUCKET, "a.jpg", DAY)
        .await
        .unwrap();
    assert_eq!(h.presigner.calls(), 2);
}

fn record(id: i64, thumbnail: Option<&str>) -> VideoRecord {
    VideoRecord {
        id,
        title: format!("Lesson {}", id),
        category_id: Some(3),
        thumbnail_object: thumbnail.map(str::to_string),
        views: 100,
        likes: 10,
        created_at: chrono::Utc::now(),
    }
}

#[tokio::test]
async fn test_get_video_assembles_read_model() {
    let h = Harness::new();
    h.store.insert_record(record(42, Some("thumbs/42.jpg")));
    h.counters.record_view(42).await;
    h.counters.toggle_like(7, 42).await.unwrap();

    let anonymous = h.videos.get_video(42, None).await.unwrap();
    assert_eq!(anonymous.views, 101);
    assert_eq!(anonymous.likes, 11);
    assert_eq!(anonymous.liked_by_viewer, None);
    assert!(anonymous.thumbnail_url.unwrap().contains("thumbs/42.jpg"));

    let viewer = h.videos.get_video(42, Some(7)).await.unwrap();
    assert_eq!(viewer.liked_by_viewer, Some(true));
    let other = h.videos.get_video(42, Some(8)).await.unwrap();
    assert_eq!(other.liked_by_viewer, Some(false));

    // One presign, then cache hits
    assert_eq!(h.presigner.calls(), 1);
}

#[tokio::test]
async fn test_get_video_without_thumbnail_or_storage() {
    let h = Harness::new();
    h.store.insert_record(record(1, None));
    h.store.insert_record(record(2, Some("thumbs/2.jpg")));
    h.presigner.set_failing(true);

    assert_eq!(h.videos.get_video(1, None).await.unwrap().thumbnail_url, None);
    assert_eq!(h.videos.get_video(2, None).await.unwrap().thumbnail_url, None);
    assert_eq!(h.presigner.calls(), 1);

    assert!(matches!(
        h.videos.get_video(404, None).await,
        Err(AppError::NotFound(_))
    ));
}

//! Video counter data models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Durable video row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct VideoRecord {
    pub id: i64,
    pub title: String,
    pub category_id: Option<i64>,
    /// Object name of the thumbnail in the thumbnail bucket
    pub thumbnail_object: Option<String>,
    pub views: i64,
    pub likes: i64,
    pub created_at: DateTime<Utc>,
}

/// Counter values as shown to readers: durable + pending delta.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoCounts {
    pub views: i64,
    pub likes: i64,
}

/// Video read model returned by `GET /api/v1/videos/{id}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoResponse {
    pub id: i64,
    pub title: String,
    pub category_id: Option<i64>,
    pub views: i64,
    pub likes: i64,
    /// Presigned thumbnail URL; absent when there is none or signing failed
    pub thumbnail_url: Option<String>,
    /// Present only when the request carried a viewer identity
    #[serde(skip_serializing_if = "Option::is_none")]
    pub liked_by_viewer: Option<bool>,
    pub created_at: DateTime<Utc>,
}

/// Result of a like toggle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LikeToggle {
    pub video_id: i64,
    pub liked: bool,
    /// Effective like count after the toggle
    pub likes: i64,
}

impl LikeToggle {
    /// Signed delta this toggle contributes to the like counters.
    pub fn delta(&self) -> i64 {
        if self.liked {
            1
        } else {
            -1
        }
    }
}

//! Counter key schema
//!
//! The aggregation scheduler parses these keys back into identifiers, so the
//! rendered form is a wire contract:
//!
//! | Key                                         | Segments | Value                  |
//! |---------------------------------------------|----------|------------------------|
//! | `video:views:<video_id>`                    | 3        | pending view delta     |
//! | `video:likes:<video_id>`                    | 3        | pending like delta     |
//! | `user:category:likes:<user_id>:<category>`  | 5        | pending affinity delta |
//! | `user:like:<user_id>:<video_id>`            | 4        | `"1"` / `"0"`          |
//! | `presigned_url:<bucket>:<object>`           | -        | URL string             |

use std::fmt;
use thiserror::Error;

const VIDEO_VIEWS_PREFIX: &str = "video:views:";
const VIDEO_LIKES_PREFIX: &str = "video:likes:";
const USER_CATEGORY_LIKES_PREFIX: &str = "user:category:likes:";
const USER_LIKE_PREFIX: &str = "user:like:";
pub(crate) const PRESIGNED_URL_PREFIX: &str = "presigned_url:";

/// A key holding either a pending delta or a like-state flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CounterKey {
    VideoViews { video_id: i64 },
    VideoLikes { video_id: i64 },
    UserCategoryLikes { user_id: i64, category_id: i64 },
    UserVideoLike { user_id: i64, video_id: i64 },
}

/// Key families swept by the aggregation scheduler, in flush order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CounterNamespace {
    VideoViews,
    VideoLikes,
    UserCategoryLikes,
    UserVideoLike,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyParseError {
    #[error("unknown key prefix: {0}")]
    UnknownPrefix(String),

    #[error("key {key} has {found} segments, expected {expected}")]
    SegmentCount {
        key: String,
        expected: usize,
        found: usize,
    },

    #[error("key {key} has a non-integer identifier: {segment}")]
    InvalidId { key: String, segment: String },
}

impl CounterNamespace {
    pub const ALL: [CounterNamespace; 4] = [
        CounterNamespace::VideoViews,
        CounterNamespace::VideoLikes,
        CounterNamespace::UserCategoryLikes,
        CounterNamespace::UserVideoLike,
    ];

    /// Literal key prefix, scanned as `<prefix>*`.
    pub fn prefix(&self) -> &'static str {
        match self {
            CounterNamespace::VideoViews => VIDEO_VIEWS_PREFIX,
            CounterNamespace::VideoLikes => VIDEO_LIKES_PREFIX,
            CounterNamespace::UserCategoryLikes => USER_CATEGORY_LIKES_PREFIX,
            CounterNamespace::UserVideoLike => USER_LIKE_PREFIX,
        }
    }

    /// Number of `:`-separated segments a well-formed key in this namespace has.
    pub fn segments(&self) -> usize {
        match self {
            CounterNamespace::VideoViews | CounterNamespace::VideoLikes => 3,
            CounterNamespace::UserCategoryLikes => 5,
            CounterNamespace::UserVideoLike => 4,
        }
    }

    /// Short label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            CounterNamespace::VideoViews => "video_views",
            CounterNamespace::VideoLikes => "video_likes",
            CounterNamespace::UserCategoryLikes => "user_category_likes",
            CounterNamespace::UserVideoLike => "user_video_like",
        }
    }

    /// Whether values in this namespace are additive deltas (deleted after
    /// flush) rather than a state flag (refreshed after flush).
    pub fn is_delta(&self) -> bool {
        !matches!(self, CounterNamespace::UserVideoLike)
    }

    /// Resolve the namespace from a raw key by prefix.
    ///
    /// `user:category:likes:` is checked before `user:like:`; the two do not
    /// overlap but the order keeps the longest prefix first.
    pub fn of_key(key: &str) -> Option<CounterNamespace> {
        [
            CounterNamespace::UserCategoryLikes,
            CounterNamespace::UserVideoLike,
            CounterNamespace::VideoViews,
            CounterNamespace::VideoLikes,
        ]
        .into_iter()
        .find(|ns| key.starts_with(ns.prefix()))
    }
}

impl fmt::Display for CounterNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl CounterKey {
    pub fn video_views(video_id: i64) -> Self {
        CounterKey::VideoViews { video_id }
    }

    pub fn video_likes(video_id: i64) -> Self {
        CounterKey::VideoLikes { video_id }
    }

    pub fn user_category_likes(user_id: i64, category_id: i64) -> Self {
        CounterKey::UserCategoryLikes {
            user_id,
            category_id,
        }
    }

    pub fn user_video_like(user_id: i64, video_id: i64) -> Self {
        CounterKey::UserVideoLike { user_id, video_id }
    }

    pub fn namespace(&self) -> CounterNamespace {
        match self {
            CounterKey::VideoViews { .. } => CounterNamespace::VideoViews,
            CounterKey::VideoLikes { .. } => CounterNamespace::VideoLikes,
            CounterKey::UserCategoryLikes { .. } => CounterNamespace::UserCategoryLikes,
            CounterKey::UserVideoLike { .. } => CounterNamespace::UserVideoLike,
        }
    }

    /// Parse a raw cache key. Wrong segment counts and non-numeric ids are
    /// reported, never panicked on.
    pub fn parse(key: &str) -> Result<Self, KeyParseError> {
        let namespace = CounterNamespace::of_key(key)
            .ok_or_else(|| KeyParseError::UnknownPrefix(key.to_string()))?;

        let parts: Vec<&str> = key.split(':').collect();
        if parts.len() != namespace.segments() {
            return Err(KeyParseError::SegmentCount {
                key: key.to_string(),
                expected: namespace.segments(),
                found: parts.len(),
            });
        }

        let id = |segment: &str| -> Result<i64, KeyParseError> {
            segment.parse::<i64>().map_err(|_| KeyParseError::InvalidId {
                key: key.to_string(),
                segment: segment.to_string(),
            })
        };

        let parsed = match namespace {
            CounterNamespace::VideoViews => CounterKey::video_views(id(parts[2])?),
            CounterNamespace::VideoLikes => CounterKey::video_likes(id(parts[2])?),
            CounterNamespace::UserCategoryLikes => {
                CounterKey::user_category_likes(id(parts[3])?, id(parts[4])?)
            }
            CounterNamespace::UserVideoLike => {
                CounterKey::user_video_like(id(parts[2])?, id(parts[3])?)
            }
        };

        Ok(parsed)
    }
}

impl fmt::Display for CounterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CounterKey::VideoViews { video_id } => write!(f, "{}{}", VIDEO_VIEWS_PREFIX, video_id),
            CounterKey::VideoLikes { video_id } => write!(f, "{}{}", VIDEO_LIKES_PREFIX, video_id),
            CounterKey::UserCategoryLikes {
                user_id,
                category_id,
            } => write!(
                f,
                "{}{}:{}",
                USER_CATEGORY_LIKES_PREFIX, user_id, category_id
            ),
            CounterKey::UserVideoLike { user_id, video_id } => {
                write!(f, "{}{}:{}", USER_LIKE_PREFIX, user_id, video_id)
            }
        }
    }
}

/// Presigned URL cache entry
/// Format: presigned_url:{bucket}:{object_name}
pub fn presigned_url_key(bucket: &str, object_name: &str) -> String {
    format!("{}{}:{}", PRESIGNED_URL_PREFIX, bucket, object_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_keys() {
        assert_eq!(CounterKey::video_views(42).to_string(), "video:views:42");
        assert_eq!(CounterKey::video_likes(7).to_string(), "video:likes:7");
        assert_eq!(
            CounterKey::user_category_likes(3, 9).to_string(),
            "user:category:likes:3:9"
        );
        assert_eq!(CounterKey::user_video_like(3, 42).to_string(), "user:like:3:42");
    }

    #[test]
    fn test_parse_each_namespace() {
        for key in [
            CounterKey::video_views(42),
            CounterKey::video_likes(1),
            CounterKey::user_category_likes(5, 6),
            CounterKey::user_video_like(5, 42),
        ] {
            assert_eq!(CounterKey::parse(&key.to_string()), Ok(key));
        }
    }

    #[test]
    fn test_parse_negative_id_is_accepted() {
        // ids are opaque integers; the parser does not judge their range
        assert_eq!(
            CounterKey::parse("video:views:-1"),
            Ok(CounterKey::video_views(-1))
        );
    }

    #[test]
    fn test_parse_wrong_segment_count() {
        let err = CounterKey::parse("video:views:1:2").unwrap_err();
        assert_eq!(
            err,
            KeyParseError::SegmentCount {
                key: "video:views:1:2".to_string(),
                expected: 3,
                found: 4,
            }
        );

        assert!(matches!(
            CounterKey::parse("user:category:likes:1"),
            Err(KeyParseError::SegmentCount { expected: 5, found: 4, .. })
        ));
        assert!(matches!(
            CounterKey::parse("user:like:1:2:3"),
            Err(KeyParseError::SegmentCount { expected: 4, found: 5, .. })
        ));
    }

    #[test]
    fn test_parse_invalid_id() {
        assert!(matches!(
            CounterKey::parse("video:likes:abc"),
            Err(KeyParseError::InvalidId { .. })
        ));
        assert!(matches!(
            CounterKey::parse("user:like:1:"),
            Err(KeyParseError::InvalidId { .. })
        ));
    }

    #[test]
    fn test_parse_unknown_prefix() {
        assert!(matches!(
            CounterKey::parse("presigned_url:bucket:a.jpg"),
            Err(KeyParseError::UnknownPrefix(_))
        ));
    }

    #[test]
    fn test_namespace_of_key() {
        assert_eq!(
            CounterNamespace::of_key("user:category:likes:1:2"),
            Some(CounterNamespace::UserCategoryLikes)
        );
        assert_eq!(
            CounterNamespace::of_key("user:like:1:2"),
            Some(CounterNamespace::UserVideoLike)
        );
        assert_eq!(CounterNamespace::of_key("video:comments:1"), None);
    }

    #[test]
    fn test_presigned_url_key_keeps_object_path() {
        assert_eq!(
            presigned_url_key("thumbs", "videos/42/cover.jpg"),
            "presigned_url:thumbs:videos/42/cover.jpg"
        );
    }
}

/// S3 configuration for presigned thumbnail access
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    /// Bucket holding video thumbnails
    pub bucket: String,
    /// AWS region
    pub region: String,
    /// Custom endpoint (MinIO, localstack); `None` uses AWS
    pub endpoint: Option<String>,
    /// Whether to use path-style URLs (false = virtual-hosted-style)
    pub path_style: bool,
    /// Target expiry of generated thumbnail URLs in seconds
    pub thumbnail_url_ttl_secs: u64,
}

fn default_thumbnail_url_ttl_secs() -> u64 {
    86_400 // 24 hours
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: "video-thumbnails".to_string(),
            region: "us-east-1".to_string(),
            endpoint: None,
            path_style: false,
            thumbnail_url_ttl_secs: default_thumbnail_url_ttl_secs(),
        }
    }
}

impl S3Config {
    /// Load S3 configuration from environment variables
    pub fn from_env() -> Self {
        Self {
            bucket: std::env::var("S3_BUCKET").unwrap_or_else(|_| "video-thumbnails".to_string()),
            region: std::env::var("AWS_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
            endpoint: std::env::var("S3_ENDPOINT")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            path_style: std::env::var("S3_PATH_STYLE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(false),
            thumbnail_url_ttl_secs: std::env::var("THUMBNAIL_URL_TTL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|secs| *secs > 0)
                .unwrap_or_else(default_thumbnail_url_ttl_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        for var in [
            "S3_BUCKET",
            "AWS_REGION",
            "S3_ENDPOINT",
            "S3_PATH_STYLE",
            "THUMBNAIL_URL_TTL_SECS",
        ] {
            std::env::remove_var(var);
        }

        let config = S3Config::from_env();
        assert_eq!(config.bucket, "video-thumbnails");
        assert_eq!(config.region, "us-east-1");
        assert!(config.endpoint.is_none());
        assert!(!config.path_style);
        assert_eq!(config.thumbnail_url_ttl_secs, 86_400);
    }

    #[test]
    #[serial]
    fn test_from_env_overrides_and_invalid_values() {
        std::env::set_var("S3_ENDPOINT", "http://minio:9000");
        std::env::set_var("S3_PATH_STYLE", "true");
        std::env::set_var("THUMBNAIL_URL_TTL_SECS", "not-a-number");

        let config = S3Config::from_env();
        assert_eq!(config.endpoint.as_deref(), Some("http://minio:9000"));
        assert!(config.path_style);
        assert_eq!(config.thumbnail_url_ttl_secs, 86_400);

        std::env::remove_var("S3_ENDPOINT");
        std::env::remove_var("S3_PATH_STYLE");
        std::env::remove_var("THUMBNAIL_URL_TTL_SECS");
    }
}

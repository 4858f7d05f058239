/// Object storage presigning for video-service
///
/// Only the read side of storage lives here: minting time-limited GET URLs for
/// objects that already exist. Uploads, copies and deletes are owned by
/// media-service.
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub mod config;
mod error;

pub use config::S3Config;
pub use error::{StorageError, StorageResult};

/// Longest expiry SigV4 accepts for a presigned request
pub const MAX_PRESIGN_EXPIRY: Duration = Duration::from_secs(7 * 24 * 3600);

/// Mints time-limited access URLs for stored objects.
#[async_trait]
pub trait ObjectPresigner: Send + Sync {
    /// Generate a presigned GET URL for `bucket/object_name`, valid for `expires_in`.
    async fn presign_get(
        &self,
        bucket: &str,
        object_name: &str,
        expires_in: Duration,
    ) -> StorageResult<String>;
}

/// Shared S3 client wrapper
#[derive(Clone)]
pub struct S3Presigner {
    client: Arc<Client>,
    config: S3Config,
}

impl S3Presigner {
    /// Create new S3 client with configuration from environment
    pub async fn from_env() -> Self {
        Self::with_config(S3Config::from_env()).await
    }

    /// Create new S3 client with custom configuration
    pub async fn with_config(config: S3Config) -> Self {
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .load()
            .await;

        let mut builder =
            aws_sdk_s3::config::Builder::from(&sdk_config).force_path_style(config.path_style);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        Self {
            client: Arc::new(Client::from_conf(builder.build())),
            config,
        }
    }

    /// Get S3 configuration
    pub fn config(&self) -> &S3Config {
        &self.config
    }

    /// Health check for S3 connectivity
    pub async fn health_check(&self) -> StorageResult<()> {
        self.client
            .head_bucket()
            .bucket(&self.config.bucket)
            .send()
            .await
            .map_err(|e| StorageError::Health(e.to_string()))?;

        Ok(())
    }
}

/// Validate an expiry against what a presigned request can carry.
pub fn validate_expiry(expires_in: Duration) -> StorageResult<Duration> {
    if expires_in.is_zero() {
        return Err(StorageError::InvalidExpiry("expiry must be positive".into()));
    }
    if expires_in > MAX_PRESIGN_EXPIRY {
        return Err(StorageError::InvalidExpiry(format!(
            "{}s exceeds the 7 day maximum",
            expires_in.as_secs()
        )));
    }
    Ok(expires_in)
}

#[async_trait]
impl ObjectPresigner for S3Presigner {
    async fn presign_get(
        &self,
        bucket: &str,
        object_name: &str,
        expires_in: Duration,
    ) -> StorageResult<String> {
        let presigning_config = PresigningConfig::expires_in(validate_expiry(expires_in)?)
            .map_err(|e| StorageError::InvalidExpiry(e.to_string()))?;

        let request = self
            .client
            .get_object()
            .bucket(bucket)
            .key(object_name)
            .presigned(presigning_config)
            .await
            .map_err(|e| StorageError::Presign {
                bucket: bucket.to_string(),
                object: object_name.to_string(),
                message: e.to_string(),
            })?;

        debug!(
            bucket = %bucket,
            object = %object_name,
            expires_in_secs = expires_in.as_secs(),
            "Generated presigned GET URL"
        );

        Ok(request.uri().to_string())
    }
}

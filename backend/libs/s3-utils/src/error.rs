use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Invalid presign expiry: {0}")]
    InvalidExpiry(String),

    #[error("Failed to presign {bucket}/{object}: {message}")]
    Presign {
        bucket: String,
        object: String,
        message: String,
    },

    #[error("S3 health check failed: {0}")]
    Health(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

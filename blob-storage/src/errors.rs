use std::error::Error;
use thiserror::Error;

pub type BoxedError = Box<dyn Error + Send + Sync>;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("bucket {0} does not exist")]
    BucketNotFound(String),

    #[error("object {key} not found in bucket {bucket}")]
    KeyNotFound { bucket: String, key: String },

    #[error("offset {offset} is past the end of object {key} ({len} bytes)")]
    InvalidRange { key: String, offset: u64, len: u64 },

    #[error("declared content length {declared} does not match payload of {actual} bytes")]
    LengthMismatch { declared: u64, actual: u64 },

    #[error("object {key} changed size from {expected} to {actual} bytes while being read")]
    ObjectChanged { key: String, expected: u64, actual: u64 },

    #[error("transport error: {0}")]
    Transport(#[source] BoxedError),

    #[error("store rejected the request: {0}")]
    Service(#[source] BoxedError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to (de)serialize object metadata")]
    Metadata(#[from] serde_json::Error),
}

impl StoreError {
    pub fn transport<E>(err: E) -> Self
    where
        E: Into<BoxedError>,
    {
        StoreError::Transport(err.into())
    }

    /// Whether reopening the object and trying again can succeed.
    pub fn is_retriable(&self) -> bool {
        match self {
            StoreError::Transport(_) => true,
            StoreError::Io(e) => !matches!(
                e.kind(),
                std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied
            ),
            StoreError::BucketNotFound(_)
            | StoreError::KeyNotFound { .. }
            | StoreError::InvalidRange { .. }
            | StoreError::LengthMismatch { .. }
            | StoreError::ObjectChanged { .. }
            | StoreError::Service(_)
            | StoreError::Metadata(_) => false,
        }
    }
}

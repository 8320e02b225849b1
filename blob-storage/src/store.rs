use std::fmt::Debug;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;

use crate::errors::StoreResult;

pub const OCTET_STREAM: &str = "application/octet-stream";

/// Streaming body of an object, positioned at the offset it was opened at.
pub type ObjectBody = Pin<Box<dyn AsyncRead + Send>>;

/// Metadata attached to an object on upload.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ObjectMetadata {
    pub content_length: u64,
    pub content_encoding: String,
}

impl ObjectMetadata {
    /// Metadata for an opaque byte payload of `len` bytes.
    pub fn octet_stream(len: u64) -> Self {
        Self {
            content_length: len,
            content_encoding: OCTET_STREAM.to_string(),
        }
    }
}

/// An open read of an object from some offset to its end.
pub struct ObjectStream {
    pub body: ObjectBody,
    /// Offset the body starts at.
    pub offset: u64,
    /// Total size of the object, independent of `offset`.
    pub total_len: u64,
}

impl ObjectStream {
    pub fn remaining(&self) -> u64 {
        self.total_len.saturating_sub(self.offset)
    }
}

impl Debug for ObjectStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStream")
            .field("offset", &self.offset)
            .field("total_len", &self.total_len)
            .finish_non_exhaustive()
    }
}

/// A bucket of objects addressed by key.
#[async_trait]
pub trait ObjectStore: Debug + Send + Sync {
    /// The bucket every operation is addressed to.
    fn bucket(&self) -> &str;

    async fn bucket_exists(&self) -> StoreResult<bool>;

    /// Stores `data` under `key`, replacing any existing object.
    ///
    /// Fails with `LengthMismatch` if `metadata.content_length` does not describe `data`.
    async fn put_object(&self, key: &str, data: Bytes, metadata: &ObjectMetadata) -> StoreResult<()>;

    /// Opens a streaming read of `key` starting at `offset`.
    async fn open_object(&self, key: &str, offset: u64) -> StoreResult<ObjectStream>;

    async fn object_exists(&self, key: &str) -> StoreResult<bool>;

    /// Deletes `key`. Deleting a key that does not exist succeeds.
    async fn delete_object(&self, key: &str) -> StoreResult<()>;
}

pub(crate) fn check_length(data: &[u8], metadata: &ObjectMetadata) -> StoreResult<()> {
    let actual = data.len() as u64;
    if actual != metadata.content_length {
        return Err(crate::errors::StoreError::LengthMismatch {
            declared: metadata.content_length,
            actual,
        });
    }
    Ok(())
}

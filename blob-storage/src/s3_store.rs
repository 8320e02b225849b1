use std::error::Error;
use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use aws_config::timeout::TimeoutConfig;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::config::Builder;
use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use bytes::Bytes;

use crate::errors::{StoreError, StoreResult};
use crate::store::{check_length, ObjectMetadata, ObjectStore, ObjectStream};

pub const DEFAULT_REGION: &str = "us-east-1";

/// Connection settings for an S3 (or S3-compatible) bucket.
#[derive(Clone, Debug)]
pub struct S3Settings {
    pub bucket: String,
    pub region: String,
    /// Custom endpoint, e.g. a MinIO server. Implies path-style addressing.
    pub endpoint_url: Option<String>,
    pub force_path_style: bool,
    pub connect_timeout: Duration,
    /// Upper bound on waiting for data from the server.
    pub read_timeout: Duration,
}

impl S3Settings {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            region: DEFAULT_REGION.to_string(),
            endpoint_url: None,
            force_path_style: false,
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(10),
        }
    }

    fn timeouts(&self) -> TimeoutConfig {
        TimeoutConfig::builder()
            .connect_timeout(self.connect_timeout)
            .read_timeout(self.read_timeout)
            .build()
    }
}

/// An `ObjectStore` over the S3 API.
#[derive(Clone, Debug)]
pub struct S3ObjectStore {
    client: S3Client,
    bucket: String,
}

/// Creates an S3 client for `settings`, resolving credentials from the default provider chain.
pub async fn create_s3_client(settings: &S3Settings) -> S3Client {
    let base_config = aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(settings.region.clone()))
        .timeout_config(settings.timeouts())
        .load()
        .await;

    let mut builder = Builder::from(&base_config);
    if let Some(endpoint) = &settings.endpoint_url {
        // S3-compatible servers generally only speak path-style
        builder = builder.endpoint_url(endpoint).force_path_style(true);
    } else if settings.force_path_style {
        builder = builder.force_path_style(true);
    }

    S3Client::from_conf(builder.build())
}

impl S3ObjectStore {
    pub fn new(client: S3Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    pub async fn connect(settings: &S3Settings) -> Self {
        Self::new(create_s3_client(settings).await, settings.bucket.clone())
    }

    /// A copy of this store whose client gives up on a silent connection after `read_timeout`.
    pub fn with_read_timeout(&self, read_timeout: Duration) -> Self {
        let current = self.client.config().timeout_config().cloned().unwrap_or_else(TimeoutConfig::disabled);
        let timeouts = current.to_builder().read_timeout(read_timeout).build();
        let config = self.client.config().to_builder().timeout_config(timeouts).build();
        Self::new(S3Client::from_conf(config), self.bucket.clone())
    }

    fn not_found(&self, key: &str) -> StoreError {
        StoreError::KeyNotFound {
            bucket: self.bucket.clone(),
            key: key.to_string(),
        }
    }

    async fn object_len(&self, key: &str) -> StoreResult<u64> {
        let head = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| match e.as_service_error() {
                Some(service_err) if service_err.is_not_found() => self.not_found(key),
                _ => sdk_error(e),
            })?;
        Ok(head.content_length().unwrap_or(0).max(0) as u64)
    }
}

/// Sorts SDK failures into ones a retry may fix and ones it will not.
fn sdk_error<E, R>(err: SdkError<E, R>) -> StoreError
where
    E: Error + Send + Sync + 'static,
    R: Debug + Send + Sync + 'static,
{
    match err {
        SdkError::ServiceError(_) | SdkError::ConstructionFailure(_) => StoreError::Service(Box::new(err)),
        _ => StoreError::Transport(Box::new(err)),
    }
}

/// Total object size from a `Content-Range: bytes a-b/total` header.
fn total_from_content_range(content_range: &str) -> Option<u64> {
    content_range.rsplit_once('/')?.1.trim().parse().ok()
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn bucket_exists(&self) -> StoreResult<bool> {
        match self.client.head_bucket().bucket(&self.bucket).send().await {
            Ok(_) => Ok(true),
            Err(SdkError::ServiceError(service_err)) if service_err.err().is_not_found() => Ok(false),
            Err(e) => Err(sdk_error(e)),
        }
    }

    async fn put_object(&self, key: &str, data: Bytes, metadata: &ObjectMetadata) -> StoreResult<()> {
        check_length(&data, metadata)?;
        tracing::debug!(bucket = %self.bucket, key, len = data.len(), "put_object");
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_length(metadata.content_length as i64)
            .content_encoding(&metadata.content_encoding)
            .content_type(&metadata.content_encoding)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| match e.as_service_error() {
                Some(service_err) if service_err.code() == Some("NoSuchBucket") => {
                    StoreError::BucketNotFound(self.bucket.clone())
                }
                _ => sdk_error(e),
            })?;
        Ok(())
    }

    async fn open_object(&self, key: &str, offset: u64) -> StoreResult<ObjectStream> {
        tracing::debug!(bucket = %self.bucket, key, offset, "get_object");
        let mut request = self.client.get_object().bucket(&self.bucket).key(key);
        if offset > 0 {
            request = request.range(format!("bytes={offset}-"));
        }

        let resp = match request.send().await {
            Ok(resp) => resp,
            Err(e) => {
                if let Some(service_err) = e.as_service_error() {
                    if service_err.is_no_such_key() {
                        return Err(self.not_found(key));
                    }
                }
                let unsatisfiable = e.raw_response().map(|r| r.status().as_u16()) == Some(416);
                if !unsatisfiable {
                    return Err(sdk_error(e));
                }
                // a range starting exactly at the end is an empty read, not an error
                let len = self.object_len(key).await?;
                if offset == len {
                    return Ok(ObjectStream {
                        body: Box::pin(tokio::io::empty()),
                        offset,
                        total_len: len,
                    });
                }
                return Err(StoreError::InvalidRange {
                    key: key.to_string(),
                    offset,
                    len,
                });
            }
        };

        let total_len = match resp.content_range().and_then(total_from_content_range) {
            Some(total) => total,
            None => offset + resp.content_length().unwrap_or(0).max(0) as u64,
        };
        Ok(ObjectStream {
            body: Box::pin(resp.body.into_async_read()),
            offset,
            total_len,
        })
    }

    async fn object_exists(&self, key: &str) -> StoreResult<bool> {
        match self.object_len(key).await {
            Ok(_) => Ok(true),
            Err(StoreError::KeyNotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn delete_object(&self, key: &str) -> StoreResult<()> {
        tracing::debug!(bucket = %self.bucket, key, "delete_object");
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(sdk_error)?;
        Ok(())
    }
}

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use blob_store::{LocalObjectStore, ObjectMetadata, ObjectStore, ResumableReader, S3ObjectStore, S3Settings};
use uuid::Uuid;

use crate::config::{Backend, VerifierConfig};
use crate::errors::VerifyErr;
use crate::payload::{ChunkLayout, Payload};
use crate::verifier::verify_chunks;

/// The block a download of `actual` bytes first disagrees with, given `expected` bytes were
/// uploaded. Extra trailing bytes are attributed to the last block.
fn first_affected_chunk(layout: &ChunkLayout, expected: u64, actual: u64) -> usize {
    let index = actual.min(expected) / layout.chunk_size() as u64;
    (index as usize).min(layout.chunk_count().saturating_sub(1))
}

/// Where a run currently is. `Passed`, `Failed` and `Skipped` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Init,
    RegionResolved,
    BucketVerified,
    Uploaded,
    Downloading { chunk: usize },
    Cleaned,
    Passed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub bucket: String,
    pub key: String,
    pub bytes_verified: u64,
    pub chunks: usize,
    pub reconnects: u32,
    pub seed: Option<u64>,
    pub elapsed: Duration,
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "verified {} bytes in {} blocks of {}/{} ({} reconnects, {:?})",
            self.bytes_verified, self.chunks, self.bucket, self.key, self.reconnects, self.elapsed
        )
    }
}

#[derive(Debug, Clone)]
pub enum RunOutcome {
    Passed(RunReport),
    /// A precondition was not met, e.g. no bucket is configured or it does not exist.
    Skipped(String),
}

/// The store handles a run talks to. Downloads may use a client with a shorter read timeout.
#[derive(Debug, Clone)]
pub struct Stores {
    pub upload: Arc<dyn ObjectStore>,
    pub download: Arc<dyn ObjectStore>,
}

impl Stores {
    pub fn single(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            upload: store.clone(),
            download: store,
        }
    }

    pub async fn connect(config: &VerifierConfig, bucket: &str) -> Self {
        match &config.backend {
            Backend::S3 => {
                let settings = S3Settings {
                    region: config.region.clone(),
                    endpoint_url: config.endpoint_url.clone(),
                    force_path_style: config.force_path_style,
                    read_timeout: config.upload_timeout,
                    ..S3Settings::new(bucket)
                };
                let upload = S3ObjectStore::connect(&settings).await;
                let download = upload.with_read_timeout(config.download_read_timeout);
                Self {
                    upload: Arc::new(upload),
                    download: Arc::new(download),
                }
            }
            Backend::Local { root } => Self::single(Arc::new(LocalObjectStore::new(root, bucket))),
        }
    }
}

/// Everything one verification run owns: its configuration, the key it uploaded under and the
/// state it has reached.
pub struct RunContext {
    config: VerifierConfig,
    payload: Option<Payload>,
    object_key: Option<String>,
    state: RunState,
    history: Vec<RunState>,
}

impl RunContext {
    pub fn new(config: VerifierConfig) -> Self {
        Self {
            config,
            payload: None,
            object_key: None,
            state: RunState::Init,
            history: vec![RunState::Init],
        }
    }

    /// Uploads `payload` instead of generating one.
    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn config(&self) -> &VerifierConfig {
        &self.config
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Every state the run has passed through, in order.
    pub fn history(&self) -> &[RunState] {
        &self.history
    }

    pub fn object_key(&self) -> Option<&str> {
        self.object_key.as_deref()
    }

    /// Connects to the configured backend and runs. Skips without connecting when no bucket is set.
    pub async fn run(&mut self) -> Result<RunOutcome, VerifyErr> {
        self.transition(RunState::RegionResolved);
        let bucket = match self.config.bucket.clone() {
            Some(bucket) => bucket,
            None => {
                tracing::warn!("You need to specify which bucket to use (S3_BUCKET or -D s3Bucket=...)");
                self.transition(RunState::Skipped);
                return Ok(RunOutcome::Skipped("no bucket configured".to_string()));
            }
        };
        let stores = Stores::connect(&self.config, &bucket).await;
        self.run_with(stores).await
    }

    /// Runs against already connected stores: setup, verify, then clean up whatever was uploaded.
    pub async fn run_with(&mut self, stores: Stores) -> Result<RunOutcome, VerifyErr> {
        if self.state == RunState::Init {
            self.transition(RunState::RegionResolved);
        }
        tracing::info!(region = %self.config.region, bucket = %stores.upload.bucket(), "starting verification run");

        let started = Instant::now();
        let result = self.execute(&stores).await;
        self.teardown(&stores).await;

        match result {
            Ok(Some(mut report)) => {
                report.elapsed = started.elapsed();
                tracing::info!("{}", report);
                self.transition(RunState::Passed);
                Ok(RunOutcome::Passed(report))
            }
            Ok(None) => {
                self.transition(RunState::Skipped);
                Ok(RunOutcome::Skipped(format!("bucket {} does not exist", stores.upload.bucket())))
            }
            Err(e) => {
                tracing::error!(error = %e, "verification failed");
                self.transition(RunState::Failed);
                Err(e)
            }
        }
    }

    async fn execute(&mut self, stores: &Stores) -> Result<Option<RunReport>, VerifyErr> {
        let bucket = stores.upload.bucket().to_string();
        tracing::info!("Verifying that bucket {} exists", bucket);
        if !stores.upload.bucket_exists().await? {
            tracing::warn!("The bucket {} must exist", bucket);
            return Ok(None);
        }
        tracing::info!("Bucket {} does exist", bucket);
        self.transition(RunState::BucketVerified);

        let layout = self.config.layout;
        let payload = match self.payload.take() {
            Some(payload) => payload,
            None => Payload::generate(&layout, self.config.seed),
        };
        payload.check_layout(&layout)?;
        if let Some(seed) = payload.seed() {
            tracing::info!(seed, "generated {} byte payload", payload.len());
        }

        let key = format!("{}{}", self.config.key_prefix, Uuid::new_v4());
        self.object_key = Some(key.clone());

        tracing::info!("Uploading object {} to bucket {}", key, bucket);
        let metadata = ObjectMetadata::octet_stream(payload.len() as u64);
        stores
            .upload
            .put_object(&key, payload.bytes().clone(), &metadata)
            .await
            .map_err(|source| VerifyErr::Upload { key: key.clone(), source })?;
        tracing::info!("Object {} uploaded to bucket {}", key, bucket);
        self.transition(RunState::Uploaded);

        // the stream is dropped at the end of this block, before any cleanup runs
        let (bytes_verified, reconnects) = {
            let mut reader = ResumableReader::open(stores.download.clone(), &key, self.config.reconnect.clone())
                .await
                .map_err(|source| VerifyErr::Open { key: key.clone(), source })?;
            let expected = payload.len() as u64;
            let actual = reader.total_len();
            if actual != expected {
                let chunk = first_affected_chunk(&layout, expected, actual);
                return Err(VerifyErr::SizeMismatch {
                    key,
                    chunk,
                    expected,
                    actual,
                });
            }

            let disconnect = self.config.disconnect_between_chunks;
            let verified = verify_chunks(&mut reader, &payload, &layout, disconnect, |chunk| {
                self.transition(RunState::Downloading { chunk })
            })
            .await?;
            (verified, reader.reconnects())
        };

        Ok(Some(RunReport {
            bucket,
            key,
            bytes_verified,
            chunks: layout.chunk_count(),
            reconnects,
            seed: payload.seed(),
            elapsed: Duration::ZERO,
        }))
    }

    /// Deletes the uploaded object, if any. Failures are logged and never replace the run's result.
    async fn teardown(&mut self, stores: &Stores) {
        let Some(key) = self.object_key.clone() else {
            return;
        };
        let bucket = stores.upload.bucket();
        tracing::info!("Deleting object {} from {}", key, bucket);
        match stores.upload.delete_object(&key).await {
            Ok(()) => tracing::info!("Object {} deleted from {}", key, bucket),
            Err(e) => tracing::warn!(error = %e, "failed to delete object {} from {}", key, bucket),
        }
        self.transition(RunState::Cleaned);
    }

    fn transition(&mut self, next: RunState) {
        tracing::debug!(from = ?self.state, to = ?next, "run state");
        self.state = next;
        self.history.push(next);
    }
}

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use blob_store::ReconnectPolicy;

use crate::errors::VerifyErr;
use crate::params::{Args, BackendKind};
use crate::payload::{ChunkLayout, DEFAULT_CHUNK_COUNT, DEFAULT_CHUNK_SIZE};

pub const DEFAULT_REGION: &str = blob_store::s3_store::DEFAULT_REGION;

/// A setting read from an environment variable, falling back to a `-D` property.
#[derive(Debug, Clone, Copy)]
pub struct Setting {
    pub env: &'static str,
    pub property: &'static str,
}

pub const REGION: Setting = Setting { env: "AWS_REGION", property: "aws.region" };
pub const BUCKET: Setting = Setting { env: "S3_BUCKET", property: "s3Bucket" };
pub const ENDPOINT: Setting = Setting { env: "S3_ENDPOINT_URL", property: "s3.endpoint" };
pub const CHUNK_SIZE: Setting = Setting { env: "VERIFY_CHUNK_SIZE", property: "verify.chunkSize" };
pub const CHUNK_COUNT: Setting = Setting { env: "VERIFY_CHUNK_COUNT", property: "verify.chunkCount" };
pub const SEED: Setting = Setting { env: "VERIFY_SEED", property: "verify.seed" };

/// Environment variables and properties that settings are resolved against.
#[derive(Debug, Clone, Default)]
pub struct ConfigSource {
    env: HashMap<String, String>,
    properties: HashMap<String, String>,
}

impl ConfigSource {
    pub fn new(
        env: impl IntoIterator<Item = (String, String)>,
        properties: impl IntoIterator<Item = (String, String)>,
    ) -> Self {
        Self {
            env: env.into_iter().collect(),
            properties: properties.into_iter().collect(),
        }
    }

    /// The current process environment plus the given properties.
    pub fn from_process(properties: impl IntoIterator<Item = (String, String)>) -> Self {
        Self::new(std::env::vars(), properties)
    }

    /// The environment wins; empty values count as unset.
    pub fn lookup(&self, setting: Setting) -> Option<&str> {
        let non_empty = |v: &&String| !v.trim().is_empty();
        self.env
            .get(setting.env)
            .filter(non_empty)
            .or_else(|| self.properties.get(setting.property).filter(non_empty))
            .map(|v| v.trim())
    }

    fn parse<T: FromStr>(&self, setting: Setting) -> Result<Option<T>, VerifyErr> {
        match self.lookup(setting) {
            None => Ok(None),
            Some(raw) => raw.parse().map(Some).map_err(|_| {
                VerifyErr::InvalidConfig(format!(
                    "{} / {} has unparseable value {raw:?}",
                    setting.env, setting.property
                ))
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    S3,
    Local { root: PathBuf },
}

#[derive(Debug, Clone)]
pub struct VerifierConfig {
    pub region: String,
    /// Without a bucket the run is skipped.
    pub bucket: Option<String>,
    pub endpoint_url: Option<String>,
    /// Path-style bucket addressing. Always on with a custom endpoint.
    pub force_path_style: bool,
    pub backend: Backend,
    pub layout: ChunkLayout,
    pub seed: Option<u64>,
    pub key_prefix: String,
    pub disconnect_between_chunks: bool,
    pub reconnect: ReconnectPolicy,
    pub upload_timeout: Duration,
    pub download_read_timeout: Duration,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            region: DEFAULT_REGION.to_string(),
            bucket: None,
            endpoint_url: None,
            force_path_style: false,
            backend: Backend::S3,
            layout: ChunkLayout::default(),
            seed: None,
            key_prefix: String::new(),
            disconnect_between_chunks: true,
            reconnect: ReconnectPolicy::default(),
            upload_timeout: Duration::from_secs(10),
            download_read_timeout: Duration::from_secs(1),
        }
    }
}

impl VerifierConfig {
    pub fn for_bucket(bucket: impl Into<String>) -> Self {
        Self {
            bucket: Some(bucket.into()),
            ..Self::default()
        }
    }

    pub fn resolve(args: &Args, source: &ConfigSource) -> Result<Self, VerifyErr> {
        let region = source.lookup(REGION).unwrap_or(DEFAULT_REGION).to_string();
        let bucket = source.lookup(BUCKET).map(str::to_string);
        let endpoint_url = source.lookup(ENDPOINT).map(str::to_string);

        let chunk_size = source.parse(CHUNK_SIZE)?.unwrap_or(DEFAULT_CHUNK_SIZE);
        let chunk_count = source.parse(CHUNK_COUNT)?.unwrap_or(DEFAULT_CHUNK_COUNT);
        let layout = ChunkLayout::new(chunk_size, chunk_count)?;
        let seed = source.parse(SEED)?.or(args.seed);

        let backend = match args.backend {
            BackendKind::S3 => Backend::S3,
            BackendKind::Local => match &args.local_root {
                Some(root) => Backend::Local { root: root.clone() },
                None => {
                    return Err(VerifyErr::InvalidConfig(
                        "the local backend needs --local-root".to_string(),
                    ))
                }
            },
        };

        Ok(Self {
            region,
            bucket,
            endpoint_url,
            force_path_style: args.path_style,
            backend,
            layout,
            seed,
            key_prefix: args.key_prefix.clone(),
            disconnect_between_chunks: !args.no_disconnect,
            reconnect: ReconnectPolicy {
                max_attempts: args.max_reconnects,
                ..ReconnectPolicy::default()
            },
            upload_timeout: Duration::from_millis(args.upload_timeout_ms),
            download_read_timeout: Duration::from_millis(args.read_timeout_ms),
        })
    }
}

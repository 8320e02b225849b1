use std::path::PathBuf;

use clap::{Parser, ValueEnum};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    /// AWS S3 or an S3-compatible server
    S3,
    /// A directory per bucket on the local filesystem
    Local,
}

/// Uploads a random object, reads it back block by block over a deliberately interrupted
/// stream and checks every block against what was uploaded.
#[derive(Parser, Debug, Clone)]
#[command(name = "verify-blob", version)]
pub struct Args {
    #[arg(long, value_enum, env = "VERIFY_BACKEND", default_value_t = BackendKind::S3)]
    pub backend: BackendKind,

    /// Root directory holding bucket directories, for the local backend
    #[arg(long, env = "VERIFY_LOCAL_ROOT")]
    pub local_root: Option<PathBuf>,

    /// Keep the stream connected between blocks
    #[arg(long)]
    pub no_disconnect: bool,

    /// Prepended to the generated object key
    #[arg(long, env = "VERIFY_KEY_PREFIX", default_value = "")]
    pub key_prefix: String,

    /// Seed for the payload generator, used when VERIFY_SEED and -D verify.seed are unset
    #[arg(long)]
    pub seed: Option<u64>,

    /// Address buckets as https://host/bucket rather than https://bucket.host
    #[arg(long)]
    pub path_style: bool,

    /// Consecutive reconnect attempts allowed per read
    #[arg(long, default_value_t = 3)]
    pub max_reconnects: u32,

    /// Read timeout of the download client
    #[arg(long, default_value_t = 1000)]
    pub read_timeout_ms: u64,

    /// Read timeout of the upload client
    #[arg(long, default_value_t = 10_000)]
    pub upload_timeout_ms: u64,

    /// Property fallback for settings missing from the environment, e.g. -D s3Bucket=my-bucket
    #[arg(short = 'D', value_name = "KEY=VALUE", value_parser = parse_property)]
    pub properties: Vec<(String, String)>,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            backend: BackendKind::S3,
            local_root: None,
            no_disconnect: false,
            key_prefix: String::new(),
            seed: None,
            path_style: false,
            max_reconnects: 3,
            read_timeout_ms: 1000,
            upload_timeout_ms: 10_000,
            properties: Vec::new(),
        }
    }
}

fn parse_property(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => Ok((key.trim().to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got {raw:?}")),
    }
}

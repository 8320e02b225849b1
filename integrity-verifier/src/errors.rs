use blob_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VerifyErr {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid chunk layout: {0}")]
    InvalidLayout(String),

    #[error("failed to upload object {key}")]
    Upload {
        key: String,
        #[source]
        source: StoreError,
    },

    #[error("failed to open object {key} for reading")]
    Open {
        key: String,
        #[source]
        source: StoreError,
    },

    #[error("object {key} is {actual} bytes, expected {expected}; block {chunk} is the first one affected")]
    SizeMismatch {
        key: String,
        chunk: usize,
        expected: u64,
        actual: u64,
    },

    #[error("failed to read block {chunk} of object {key}")]
    Read {
        chunk: usize,
        key: String,
        #[source]
        source: StoreError,
    },

    #[error("data is not equal for block {chunk}: {}", describe_mismatch(.first_difference, .expected_len, .actual_len))]
    ChunkMismatch {
        chunk: usize,
        /// Offset within the block of the first differing byte, if the common prefix differs.
        first_difference: Option<usize>,
        expected_len: usize,
        actual_len: usize,
    },

    #[error("object store error")]
    Store(#[from] StoreError),
}

fn describe_mismatch(first_difference: &Option<usize>, expected_len: &usize, actual_len: &usize) -> String {
    match first_difference {
        Some(offset) => format!("first difference at byte {offset}"),
        None => format!("read {actual_len} bytes, expected {expected_len}"),
    }
}

impl VerifyErr {
    /// The block a data-integrity failure was detected in.
    pub fn failed_chunk(&self) -> Option<usize> {
        match self {
            VerifyErr::ChunkMismatch { chunk, .. }
            | VerifyErr::Read { chunk, .. }
            | VerifyErr::SizeMismatch { chunk, .. } => Some(*chunk),
            _ => None,
        }
    }
}

//! Minimal object-store abstraction with S3, local-filesystem and in-memory backends, plus a
//! reader that resumes broken object streams.

pub mod errors;
pub mod local_store;
pub mod memory_store;
pub mod reader;
pub mod s3_store;
pub mod store;

pub use errors::{StoreError, StoreResult};
pub use local_store::LocalObjectStore;
pub use memory_store::InMemoryObjectStore;
pub use reader::{ReconnectPolicy, ResumableReader};
pub use s3_store::{S3ObjectStore, S3Settings};
pub use store::{ObjectMetadata, ObjectStore, ObjectStream, OCTET_STREAM};

use std::io::{ErrorKind, SeekFrom};
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;
use tokio::io::AsyncSeekExt;

use crate::errors::{StoreError, StoreResult};
use crate::store::{check_length, ObjectMetadata, ObjectStore, ObjectStream};

const METADATA_SUFFIX: &str = ".meta.json";

/// An `ObjectStore` backed by a directory per bucket on the local filesystem.
///
/// Object metadata is written next to each object as a JSON sidecar.
#[derive(Clone, Debug)]
pub struct LocalObjectStore {
    bucket: String,
    bucket_dir: PathBuf,
}

impl LocalObjectStore {
    /// Objects of `bucket` live in `root/bucket`. The directory is not created.
    pub fn new(root: impl AsRef<Path>, bucket: impl Into<String>) -> Self {
        let bucket = bucket.into();
        let bucket_dir = root.as_ref().join(&bucket);
        Self { bucket, bucket_dir }
    }

    fn object_path(&self, key: &str) -> StoreResult<PathBuf> {
        let relative = Path::new(key);
        let well_formed = !key.is_empty()
            && !key.ends_with(METADATA_SUFFIX)
            && relative.components().all(|c| matches!(c, Component::Normal(_)));
        if !well_formed {
            return Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                format!("invalid object key {key:?}"),
            )
            .into());
        }
        Ok(self.bucket_dir.join(relative))
    }

    fn metadata_path(object_path: &Path) -> PathBuf {
        let mut name = object_path.as_os_str().to_owned();
        name.push(METADATA_SUFFIX);
        PathBuf::from(name)
    }

    async fn ensure_bucket(&self) -> StoreResult<()> {
        if self.bucket_exists().await? {
            Ok(())
        } else {
            Err(StoreError::BucketNotFound(self.bucket.clone()))
        }
    }

    fn not_found(&self, key: &str) -> StoreError {
        StoreError::KeyNotFound {
            bucket: self.bucket.clone(),
            key: key.to_string(),
        }
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn bucket_exists(&self) -> StoreResult<bool> {
        match fs::metadata(&self.bucket_dir).await {
            Ok(meta) => Ok(meta.is_dir()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn put_object(&self, key: &str, data: Bytes, metadata: &ObjectMetadata) -> StoreResult<()> {
        check_length(&data, metadata)?;
        self.ensure_bucket().await?;
        let path = self.object_path(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // write to a scratch file first so a reader never sees a partial object
        let mut scratch = path.as_os_str().to_owned();
        scratch.push(".partial");
        let scratch = PathBuf::from(scratch);
        fs::write(&scratch, &data).await?;
        fs::write(Self::metadata_path(&path), serde_json::to_vec(metadata)?).await?;
        fs::rename(&scratch, &path).await?;
        Ok(())
    }

    async fn open_object(&self, key: &str, offset: u64) -> StoreResult<ObjectStream> {
        let path = self.object_path(key)?;
        let mut file = match fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(self.not_found(key)),
            Err(e) => return Err(e.into()),
        };
        let total_len = file.metadata().await?.len();
        if offset > total_len {
            return Err(StoreError::InvalidRange {
                key: key.to_string(),
                offset,
                len: total_len,
            });
        }
        file.seek(SeekFrom::Start(offset)).await?;
        Ok(ObjectStream {
            body: Box::pin(file),
            offset,
            total_len,
        })
    }

    async fn object_exists(&self, key: &str) -> StoreResult<bool> {
        let path = self.object_path(key)?;
        match fs::metadata(&path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_object(&self, key: &str) -> StoreResult<()> {
        let path = self.object_path(key)?;
        for target in [Self::metadata_path(&path), path] {
            match fs::remove_file(&target).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
impl LocalObjectStore {
    /// Reads back the metadata sidecar written by `put_object`.
    async fn object_metadata(&self, key: &str) -> StoreResult<ObjectMetadata> {
        let path = Self::metadata_path(&self.object_path(key)?);
        match fs::read(&path).await {
            Ok(raw) => Ok(serde_json::from_slice(&raw)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(self.not_found(key)),
            Err(e) => Err(e.into()),
        }
    }
}

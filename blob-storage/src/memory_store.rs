use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use futures::{stream, StreamExt};
use tokio_util::io::StreamReader;

use crate::errors::{StoreError, StoreResult};
use crate::store::{check_length, ObjectMetadata, ObjectStore, ObjectStream};

const DEFAULT_DELIVERY_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    metadata: ObjectMetadata,
}

/// An `ObjectStore` kept in memory, with hooks for injecting transport faults.
///
/// Bodies are delivered in pieces of at most `delivery_size` bytes, so a single read call never
/// returns more than that.
#[derive(Debug)]
pub struct InMemoryObjectStore {
    bucket: String,
    bucket_present: bool,
    objects: DashMap<String, StoredObject>,
    delivery_size: usize,
    corrupt_offsets: Vec<u64>,
    fail_puts: bool,
    fail_deletes: bool,
    /// Pending transport failures: absolute object offset to number of times it fails.
    read_faults: Arc<DashMap<u64, u32>>,
    opens: AtomicUsize,
}

impl InMemoryObjectStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            bucket_present: true,
            objects: DashMap::new(),
            delivery_size: DEFAULT_DELIVERY_SIZE,
            corrupt_offsets: Vec::new(),
            fail_puts: false,
            fail_deletes: false,
            read_faults: Arc::new(DashMap::new()),
            opens: AtomicUsize::new(0),
        }
    }

    /// A store whose bucket does not exist.
    pub fn without_bucket(bucket: impl Into<String>) -> Self {
        Self {
            bucket_present: false,
            ..Self::new(bucket)
        }
    }

    pub fn with_delivery_size(mut self, delivery_size: usize) -> Self {
        self.delivery_size = delivery_size.max(1);
        self
    }

    /// Every read of the byte at `offset` returns it with its bits flipped.
    pub fn with_corruption_at(mut self, offset: u64) -> Self {
        self.corrupt_offsets.push(offset);
        self
    }

    pub fn with_failing_puts(mut self) -> Self {
        self.fail_puts = true;
        self
    }

    pub fn with_failing_deletes(mut self) -> Self {
        self.fail_deletes = true;
        self
    }

    /// The next body that reaches `offset` fails there with a connection reset. Injecting the
    /// same offset again makes it fail that many more times.
    pub fn inject_read_fault_at(&self, offset: u64) {
        *self.read_faults.entry(offset).or_insert(0) += 1;
    }

    /// How many times an object body has been opened.
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn metadata(&self, key: &str) -> Option<ObjectMetadata> {
        self.objects.get(key).map(|o| o.metadata.clone())
    }

    fn ensure_bucket(&self) -> StoreResult<()> {
        if self.bucket_present {
            Ok(())
        } else {
            Err(StoreError::BucketNotFound(self.bucket.clone()))
        }
    }

    fn corrupted(&self, data: &Bytes, offset: u64) -> Bytes {
        let end = offset + data.len() as u64;
        let hits: Vec<u64> = self
            .corrupt_offsets
            .iter()
            .copied()
            .filter(|o| (offset..end).contains(o))
            .collect();
        if hits.is_empty() {
            return data.clone();
        }
        let mut raw = data.to_vec();
        for hit in hits {
            raw[(hit - offset) as usize] ^= 0xFF;
        }
        Bytes::from(raw)
    }
}

fn take_fault(faults: &DashMap<u64, u32>, at: u64) -> Option<io::Error> {
    let mut remaining = faults.get_mut(&at)?;
    *remaining -= 1;
    let exhausted = *remaining == 0;
    drop(remaining);
    if exhausted {
        faults.remove(&at);
    }
    Some(io::Error::new(
        io::ErrorKind::ConnectionReset,
        format!("injected transport fault at byte {at}"),
    ))
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn bucket_exists(&self) -> StoreResult<bool> {
        Ok(self.bucket_present)
    }

    async fn put_object(&self, key: &str, data: Bytes, metadata: &ObjectMetadata) -> StoreResult<()> {
        check_length(&data, metadata)?;
        self.ensure_bucket()?;
        if self.fail_puts {
            return Err(StoreError::transport(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                "injected upload failure",
            )));
        }
        self.objects.insert(
            key.to_string(),
            StoredObject {
                data,
                metadata: metadata.clone(),
            },
        );
        Ok(())
    }

    async fn open_object(&self, key: &str, offset: u64) -> StoreResult<ObjectStream> {
        self.ensure_bucket()?;
        let data = match self.objects.get(key) {
            Some(object) => object.data.clone(),
            None => {
                return Err(StoreError::KeyNotFound {
                    bucket: self.bucket.clone(),
                    key: key.to_string(),
                })
            }
        };
        let total_len = data.len() as u64;
        if offset > total_len {
            return Err(StoreError::InvalidRange {
                key: key.to_string(),
                offset,
                len: total_len,
            });
        }
        self.opens.fetch_add(1, Ordering::SeqCst);

        let body = self.corrupted(&data.slice(offset as usize..), offset);
        let faults: Vec<u64> = self
            .read_faults
            .iter()
            .map(|entry| *entry.key())
            .filter(|at| (offset..total_len).contains(at))
            .collect();

        // pieces never straddle a fault, so a fault always lands at the start of one
        let mut pieces: Vec<(u64, Bytes)> = Vec::new();
        let mut start = 0;
        while start < body.len() {
            let at = offset + start as u64;
            let mut end = (start + self.delivery_size).min(body.len());
            if let Some(cut) = faults.iter().copied().filter(|f| *f > at).min() {
                end = end.min((cut - offset) as usize);
            }
            pieces.push((at, body.slice(start..end)));
            start = end;
        }

        let pending = self.read_faults.clone();
        let key = key.to_string();
        let stream = stream::iter(pieces).map(move |(at, piece)| match take_fault(&pending, at) {
            Some(err) => {
                tracing::debug!(key = %key, at, "injecting read fault");
                Err(err)
            }
            None => Ok(piece),
        });

        Ok(ObjectStream {
            body: Box::pin(StreamReader::new(stream)),
            offset,
            total_len,
        })
    }

    async fn object_exists(&self, key: &str) -> StoreResult<bool> {
        self.ensure_bucket()?;
        Ok(self.objects.contains_key(key))
    }

    async fn delete_object(&self, key: &str) -> StoreResult<()> {
        self.ensure_bucket()?;
        if self.fail_deletes {
            return Err(StoreError::transport(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                "injected delete failure",
            )));
        }
        self.objects.remove(key);
        Ok(())
    }
}

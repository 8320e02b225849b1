use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;

use crate::errors::{StoreError, StoreResult};
use crate::store::{ObjectBody, ObjectStore};

/// How a `ResumableReader` recovers from a broken object stream.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Consecutive failed attempts tolerated for a single read before giving up.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the `attempt`th (1-based) reconnect.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff.saturating_mul(factor).min(self.max_backoff)
    }
}

/// Sequential reader over an object that survives broken connections.
///
/// When the underlying body fails or ends early, the object is reopened at the current position
/// and the read carries on from there. [`ResumableReader::disconnect`] drops the live body on
/// purpose so that the next read has to go through the same path.
pub struct ResumableReader {
    store: Arc<dyn ObjectStore>,
    key: String,
    position: u64,
    total_len: u64,
    body: Option<ObjectBody>,
    policy: ReconnectPolicy,
    reconnects: u32,
}

impl ResumableReader {
    /// Opens `key` from the start. Failing to open is not retried.
    pub async fn open(store: Arc<dyn ObjectStore>, key: &str, policy: ReconnectPolicy) -> StoreResult<Self> {
        let stream = store.open_object(key, 0).await?;
        tracing::debug!(key, remaining = stream.remaining(), "opened object stream");
        Ok(Self {
            store,
            key: key.to_string(),
            position: 0,
            total_len: stream.total_len,
            body: Some(stream.body),
            policy,
            reconnects: 0,
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn total_len(&self) -> u64 {
        self.total_len
    }

    /// Number of times the object had to be reopened.
    pub fn reconnects(&self) -> u32 {
        self.reconnects
    }

    pub fn is_connected(&self) -> bool {
        self.body.is_some()
    }

    /// Drops the live connection, as if the transport had broken under us.
    pub fn disconnect(&mut self) {
        if self.body.take().is_some() {
            tracing::debug!(key = %self.key, position = self.position, "object stream disconnected");
        }
    }

    /// Reads up to `buf.len()` bytes; may return fewer. Returns 0 only at the end of the object.
    pub async fn read(&mut self, buf: &mut [u8]) -> StoreResult<usize> {
        if buf.is_empty() || self.position >= self.total_len {
            return Ok(0);
        }

        let mut failures = 0;
        loop {
            match self.try_read(buf).await {
                Ok(n) => {
                    self.position += n as u64;
                    return Ok(n);
                }
                Err(e) if e.is_retriable() && failures < self.policy.max_attempts => {
                    failures += 1;
                    let delay = self.policy.backoff(failures);
                    tracing::warn!(
                        key = %self.key,
                        position = self.position,
                        attempt = failures,
                        error = %e,
                        "object stream broken, reconnecting in {:?}",
                        delay
                    );
                    self.body = None;
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    self.body = None;
                    return Err(e);
                }
            }
        }
    }

    /// Fills `buf` unless the object ends first. Returns the number of bytes placed in `buf`.
    pub async fn read_full(&mut self, buf: &mut [u8]) -> StoreResult<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }

    async fn try_read(&mut self, buf: &mut [u8]) -> StoreResult<usize> {
        let mut body = match self.body.take() {
            Some(body) => body,
            None => self.reopen().await?,
        };
        let n = body.read(buf).await?;
        if n == 0 {
            return Err(StoreError::transport(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("stream ended at byte {} of {}", self.position, self.total_len),
            )));
        }
        self.body = Some(body);
        Ok(n)
    }

    async fn reopen(&mut self) -> StoreResult<ObjectBody> {
        let stream = self.store.open_object(&self.key, self.position).await?;
        if stream.total_len != self.total_len {
            return Err(StoreError::ObjectChanged {
                key: self.key.clone(),
                expected: self.total_len,
                actual: stream.total_len,
            });
        }
        self.reconnects += 1;
        tracing::debug!(
            key = %self.key,
            position = self.position,
            remaining = stream.remaining(),
            reconnects = self.reconnects,
            "reopened object stream"
        );
        Ok(stream.body)
    }
}

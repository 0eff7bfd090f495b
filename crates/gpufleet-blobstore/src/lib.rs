//! BlobStore Adapter: wraps any `BlobStore` backend with
//! exponential-backoff retry on transient errors (HTTP 429, 5xx, network
//! reset — modeled here as [`CoreError::is_retryable`]). Non-transient
//! errors surface immediately.
//!
//! Grounded on `tower-resilience-retry`'s retry-predicate-plus-backoff shape,
//! generalized from a generic `tower::Layer<S>` to a direct wrapper around
//! the one trait (`BlobStore`) this crate cares about.

mod backoff;

pub use backoff::ExponentialBackoff;

use async_trait::async_trait;
use gpufleet_core::ports::BlobStore;
use gpufleet_core::{CoreError, CoreResult};
use std::time::Duration;

const MAX_ATTEMPTS: usize = 3;
const BASE_INTERVAL: Duration = Duration::from_secs(1);
const MAX_INTERVAL: Duration = Duration::from_secs(30);

/// §4.3 classifies HTTP 429/5xx/network reset as transient. `is_retryable`
/// covers 5xx/network reset (`ServiceUnavailable`/`StorageFailure`) but a
/// throttled backend maps to `RateLimited`, not one of those — widen the
/// predicate here rather than in `CoreError::is_retryable`, since a 429 from
/// the marketplace provider (not the blob backend) is deliberately *not*
/// retried by the Race Provisioner's own issue loop.
fn is_transient(err: &CoreError) -> bool {
    err.is_retryable() || matches!(err, CoreError::RateLimited { .. })
}

/// Decorates an inner [`BlobStore`] with retry. `delete` is idempotent at
/// the inner layer already; this wrapper only adds resilience
/// around transient failures, it does not change operation semantics.
pub struct RetryingBlobStore<S> {
    inner: S,
    backoff: ExponentialBackoff,
    max_attempts: usize,
}

impl<S> RetryingBlobStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            backoff: ExponentialBackoff::new(BASE_INTERVAL, MAX_INTERVAL),
            max_attempts: MAX_ATTEMPTS,
        }
    }

    async fn with_retry<T, F, Fut>(&self, op: &str, mut attempt_fn: F) -> CoreResult<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = CoreResult<T>>,
    {
        let mut attempt = 0;
        loop {
            match attempt_fn().await {
                Ok(value) => return Ok(value),
                Err(err) if is_transient(&err) && attempt + 1 < self.max_attempts => {
                    let delay = self.backoff.next_interval(attempt);
                    #[cfg(feature = "tracing")]
                    tracing::warn!(op, attempt, delay_ms = delay.as_millis() as u64, error = %err, "retrying blob operation");
                    #[cfg(feature = "metrics")]
                    metrics::counter!("gpufleet_blobstore_retries_total", "op" => op.to_string()).increment(1);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[async_trait]
impl<S: BlobStore + Send + Sync> BlobStore for RetryingBlobStore<S> {
    async fn put(&self, key: &str, bytes: &[u8], content_type: Option<&str>) -> CoreResult<()> {
        self.with_retry("put", || self.inner.put(key, bytes, content_type))
            .await
    }

    async fn get(&self, key: &str) -> CoreResult<Vec<u8>> {
        self.with_retry("get", || self.inner.get(key)).await
    }

    async fn delete(&self, key: &str) -> CoreResult<bool> {
        self.with_retry("delete", || self.inner.delete(key)).await
    }

    async fn list(&self, prefix: &str) -> CoreResult<Vec<String>> {
        self.with_retry("list", || self.inner.list(prefix)).await
    }

    async fn exists(&self, key: &str) -> CoreResult<bool> {
        self.with_retry("exists", || self.inner.exists(key)).await
    }
}

//! Bounded exponential-backoff retry around any [`RecordStore`].
//!
//! Only errors reported as retryable by [`StoreError::is_retryable`] are retried.
//! Condition failures and validation problems describe the request, not the store,
//! and are returned on the first attempt.

use std::future::Future;
use std::time::Duration;

use launchpad_core::config::StoreRetryConfig;
use tracing::warn;

use crate::store::{
    Collection, Item, Page, QueryRequest, RecordKey, RecordStore, ScanRequest, StoreError,
    UpdateRequest,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial one).
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl From<&StoreRetryConfig> for RetryPolicy {
    fn from(config: &StoreRetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }
}

impl RetryPolicy {
    pub fn no_delay(max_attempts: u32) -> Self {
        Self { max_attempts, base_delay: Duration::ZERO, max_delay: Duration::ZERO }
    }

    /// Delay before retry number `retry` (0 for the first retry).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.checked_pow(retry).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    pub async fn run<T, F, Fut>(
        &self,
        operation: &'static str,
        collection: &str,
        mut call: F,
    ) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(error) if error.is_retryable() && attempt < max_attempts => {
                    let delay = self.delay_for(attempt - 1);
                    warn!(
                        event_name = "store.retry",
                        operation,
                        collection,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "transient store failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

pub struct RetryingStore<S> {
    inner: S,
    policy: RetryPolicy,
}

impl<S: RecordStore> RetryingStore<S> {
    pub fn new(inner: S, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

#[async_trait::async_trait]
impl<S: RecordStore> RecordStore for RetryingStore<S> {
    async fn put(&self, collection: &Collection, item: Item) -> Result<(), StoreError> {
        self.policy.run("put", collection.name, move || self.inner.put(collection, item.clone())).await
    }

    async fn get(&self, collection: &Collection, key: &RecordKey) -> Result<Option<Item>, StoreError> {
        self.policy.run("get", collection.name, move || self.inner.get(collection, key)).await
    }

    async fn query(&self, request: &QueryRequest) -> Result<Page, StoreError> {
        self.policy.run("query", request.collection.name, move || self.inner.query(request)).await
    }

    async fn scan(&self, request: &ScanRequest) -> Result<Page, StoreError> {
        self.policy.run("scan", request.collection.name, move || self.inner.scan(request)).await
    }

    async fn update(
        &self,
        collection: &Collection,
        key: &RecordKey,
        request: &UpdateRequest,
    ) -> Result<Item, StoreError> {
        self.policy
            .run("update", collection.name, move || self.inner.update(collection, key, request))
            .await
    }

    async fn delete(&self, collection: &Collection, key: &RecordKey) -> Result<(), StoreError> {
        self.policy.run("delete", collection.name, move || self.inner.delete(collection, key)).await
    }
}

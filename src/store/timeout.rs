//! Bounded store calls for networked backends.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use super::{StateRecord, Store};
use crate::error::StoreError;

/// Default bound on a single store call.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(2);

/// Wraps a store so that no call waits longer than `timeout`.
///
/// An elapsed call fails with [`StoreError::Timeout`]; it is never reported
/// as a missing key.
#[derive(Debug, Clone)]
pub struct TimeoutStore<S> {
    inner: S,
    timeout: Duration,
}

impl<S: Store> TimeoutStore<S> {
    /// Panics if `timeout` is zero.
    pub fn new(inner: S, timeout: Duration) -> Self {
        assert!(!timeout.is_zero(), "store timeout must be non-zero");
        Self { inner, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        key: &str,
        call: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                warn!(key = %key, operation, timeout = ?self.timeout, "Store call timed out");
                Err(StoreError::Timeout {
                    operation,
                    timeout: self.timeout,
                })
            }
        }
    }
}

#[async_trait]
impl<S: Store> Store for TimeoutStore<S> {
    async fn get(&self, key: &str) -> Result<StateRecord, StoreError> {
        self.bounded("get", key, self.inner.get(key)).await
    }

    async fn set(&self, key: &str, record: StateRecord, ttl: Duration) -> Result<(), StoreError> {
        self.bounded("set", key, self.inner.set(key, record, ttl))
            .await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.bounded("delete", key, self.inner.delete(key)).await
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        self.bounded("exists", key, self.inner.exists(key)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::FixedWindowState;
    use crate::store::MemoryStore;

    /// A store that answers only after `delay`.
    struct SlowStore {
        delay: Duration,
        inner: MemoryStore,
    }

    #[async_trait]
    impl Store for SlowStore {
        async fn get(&self, key: &str) -> Result<StateRecord, StoreError> {
            tokio::time::sleep(self.delay).await;
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, record: StateRecord, ttl: Duration) -> Result<(), StoreError> {
            tokio::time::sleep(self.delay).await;
            self.inner.set(key, record, ttl).await
        }

        async fn delete(&self, key: &str) -> Result<(), StoreError> {
            tokio::time::sleep(self.delay).await;
            self.inner.delete(key).await
        }

        async fn exists(&self, key: &str) -> Result<bool, StoreError> {
            tokio::time::sleep(self.delay).await;
            self.inner.exists(key).await
        }
    }

    fn slow(delay_ms: u64) -> SlowStore {
        SlowStore {
            delay: Duration::from_millis(delay_ms),
            inner: MemoryStore::new(),
        }
    }

    #[tokio::test]
    async fn test_fast_calls_pass_through() {
        let store = TimeoutStore::new(slow(1), Duration::from_secs(1));
        let record = StateRecord::FixedWindow(FixedWindowState { count: 1, window: 1 });

        store.set("k", record.clone(), Duration::from_secs(5)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), record);
        assert!(store.get("other").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_slow_call_times_out() {
        let store = TimeoutStore::new(slow(200), Duration::from_millis(20));

        let err = store.get("k").await.unwrap_err();
        match err {
            StoreError::Timeout { operation, timeout } => {
                assert_eq!(operation, "get");
                assert_eq!(timeout, Duration::from_millis(20));
            }
            e => panic!("Expected Timeout, got {:?}", e),
        }
        assert!(matches!(
            store.exists("k").await,
            Err(StoreError::Timeout { operation: "exists", .. })
        ));
    }

    #[test]
    #[should_panic(expected = "store timeout must be non-zero")]
    fn test_zero_timeout_rejected() {
        let _ = TimeoutStore::new(MemoryStore::new(), Duration::ZERO);
    }
}

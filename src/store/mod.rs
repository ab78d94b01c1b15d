//! TTL-aware key-value storage for per-key limiter state.
//!
//! Limiters only depend on the narrow [`Store`] contract. Backends decide
//! how expiration is enforced, but `get` and `exists` must never surface a
//! record whose TTL has elapsed.

mod encoded;
mod memory;
mod record;
mod timeout;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreError;

pub use encoded::{EncodedStore, RawStore};
pub use memory::{MemoryStore, SweeperHandle, DEFAULT_SWEEP_INTERVAL};
pub use record::{AlgorithmState, StateRecord};
pub use timeout::{TimeoutStore, DEFAULT_OPERATION_TIMEOUT};

/// Storage contract consumed by every limiter.
#[async_trait]
pub trait Store: Send + Sync {
    /// Fetch the live record for `key`.
    ///
    /// Returns [`StoreError::NotFound`] when the key is absent or expired.
    async fn get(&self, key: &str) -> Result<StateRecord, StoreError>;

    /// Insert or overwrite the record for `key`, expiring it after `ttl`.
    async fn set(&self, key: &str, record: StateRecord, ttl: Duration) -> Result<(), StoreError>;

    /// Remove the record for `key`.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Whether a live record exists for `key`.
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;
}

#[async_trait]
impl<S: Store + ?Sized> Store for Arc<S> {
    async fn get(&self, key: &str) -> Result<StateRecord, StoreError> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, record: StateRecord, ttl: Duration) -> Result<(), StoreError> {
        (**self).set(key, record, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        (**self).delete(key).await
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        (**self).exists(key).await
    }
}

/// Reject the inputs every backend refuses before reaching storage.
pub(crate) fn validate_set(key: &str, ttl: Duration) -> Result<(), StoreError> {
    validate_key(key)?;
    if ttl.is_zero() {
        return Err(StoreError::InvalidInput(
            "TTL must be greater than 0".to_string(),
        ));
    }
    Ok(())
}

pub(crate) fn validate_key(key: &str) -> Result<(), StoreError> {
    if key.is_empty() {
        return Err(StoreError::InvalidInput("key cannot be empty".to_string()));
    }
    Ok(())
}

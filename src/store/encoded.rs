//! Adapter for backends that persist records as text.
//!
//! Distributed caches and relational tables store an opaque string per key
//! with a native expiration. [`EncodedStore`] turns such a backend into a
//! [`Store`] by JSON-encoding every [`StateRecord`].

use std::time::Duration;

use async_trait::async_trait;
use tracing::trace;

use super::{validate_key, validate_set, StateRecord, Store};
use crate::error::StoreError;

/// A TTL-aware string key-value backend.
///
/// Implementations own connection handling and must never return a value
/// whose TTL has elapsed.
#[async_trait]
pub trait RawStore: Send + Sync {
    async fn get_raw(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set_raw(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError>;

    /// Remove `key`, reporting whether anything was removed.
    async fn delete_raw(&self, key: &str) -> Result<bool, StoreError>;

    async fn exists_raw(&self, key: &str) -> Result<bool, StoreError>;
}

/// A [`Store`] over a text backend using the JSON record encoding.
#[derive(Debug, Clone)]
pub struct EncodedStore<R> {
    raw: R,
}

impl<R: RawStore> EncodedStore<R> {
    pub fn new(raw: R) -> Self {
        Self { raw }
    }

    /// Access the wrapped backend.
    pub fn inner(&self) -> &R {
        &self.raw
    }
}

#[async_trait]
impl<R: RawStore> Store for EncodedStore<R> {
    async fn get(&self, key: &str) -> Result<StateRecord, StoreError> {
        validate_key(key)?;
        let text = self
            .raw
            .get_raw(key)
            .await?
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        StateRecord::decode(&text)
    }

    async fn set(&self, key: &str, record: StateRecord, ttl: Duration) -> Result<(), StoreError> {
        validate_set(key, ttl)?;
        let text = record.encode()?;
        trace!(key = %key, bytes = text.len(), "Writing encoded record");
        self.raw.set_raw(key, text, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        validate_key(key)?;
        if self.raw.delete_raw(key).await? {
            Ok(())
        } else {
            Err(StoreError::NotFound(key.to_string()))
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        validate_key(key)?;
        self.raw.exists_raw(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::TokenBucketState;
    use chrono::{DateTime, Utc};
    use parking_lot::Mutex;
    use std::collections::HashMap;

    /// String map standing in for a cache server; ignores TTLs.
    #[derive(Default)]
    struct StringMap {
        values: Mutex<HashMap<String, String>>,
        fail: bool,
    }

    #[async_trait]
    impl RawStore for StringMap {
        async fn get_raw(&self, key: &str) -> Result<Option<String>, StoreError> {
            if self.fail {
                return Err(StoreError::Backend("connection reset".to_string()));
            }
            Ok(self.values.lock().get(key).cloned())
        }

        async fn set_raw(&self, key: &str, value: String, _ttl: Duration) -> Result<(), StoreError> {
            self.values.lock().insert(key.to_string(), value);
            Ok(())
        }

        async fn delete_raw(&self, key: &str) -> Result<bool, StoreError> {
            Ok(self.values.lock().remove(key).is_some())
        }

        async fn exists_raw(&self, key: &str) -> Result<bool, StoreError> {
            Ok(self.values.lock().contains_key(key))
        }
    }

    fn bucket() -> StateRecord {
        StateRecord::TokenBucket(TokenBucketState {
            tokens: 4,
            last_refill: DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap(),
        })
    }

    #[tokio::test]
    async fn test_records_survive_text_encoding() {
        let store = EncodedStore::new(StringMap::default());
        store.set("k", bucket(), Duration::from_secs(60)).await.unwrap();

        let text = store.inner().values.lock().get("k").cloned().unwrap();
        assert!(text.contains(r#""algorithm":"token_bucket""#));
        assert_eq!(store.get("k").await.unwrap(), bucket());
    }

    #[tokio::test]
    async fn test_missing_key_is_not_found() {
        let store = EncodedStore::new(StringMap::default());
        assert!(store.get("k").await.unwrap_err().is_not_found());
        assert!(store.delete("k").await.unwrap_err().is_not_found());
        assert!(!store.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_undecodable_value_is_an_error() {
        let store = EncodedStore::new(StringMap::default());
        store
            .inner()
            .values
            .lock()
            .insert("k".to_string(), "{\"algorithm\":\"mystery\"}".to_string());

        let err = store.get("k").await.unwrap_err();
        assert!(matches!(err, StoreError::Serialization(_)));
    }

    #[tokio::test]
    async fn test_backend_failure_propagates() {
        let store = EncodedStore::new(StringMap {
            fail: true,
            ..Default::default()
        });
        let err = store.get("k").await.unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));
    }
}

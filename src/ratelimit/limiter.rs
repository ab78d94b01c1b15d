//! The limiter contract and the state plumbing shared by every algorithm.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, trace};

use super::decision::Decision;
use super::key::StateKey;
use crate::clock::{Clock, SystemClock};
use crate::error::{RateKeepError, Result, StoreError};
use crate::store::{AlgorithmState, Store};

/// The rate limiting strategies this crate implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    TokenBucket,
    FixedWindow,
    SlidingWindow,
    SlidingWindowCounter,
    LeakyBucket,
}

impl Algorithm {
    /// Stable name, also the default store namespace.
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::TokenBucket => "token_bucket",
            Algorithm::FixedWindow => "fixed_window",
            Algorithm::SlidingWindow => "sliding_window",
            Algorithm::SlidingWindowCounter => "sliding_window_counter",
            Algorithm::LeakyBucket => "leaky_bucket",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trait for rate limiter implementations.
///
/// Every engine serializes its own `allow`/`reset` calls. Against a store
/// shared between processes the load-modify-store cycle is not atomic across
/// processes.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Decide whether the next request for `key` is admitted.
    ///
    /// A store failure is returned as an error; callers must check it before
    /// looking at any decision.
    async fn allow(&self, key: &str) -> Result<Decision>;

    /// Forget all state for `key`.
    ///
    /// Fails with [`RateKeepError::NotFound`] when no state exists.
    async fn reset(&self, key: &str) -> Result<()>;

    /// The algorithm this limiter runs.
    fn algorithm(&self) -> Algorithm;
}

/// Store access for one engine: namespacing, clock, and the engine-wide lock.
///
/// The lock guards the whole load-compute-persist cycle for every key the
/// engine handles. Sharding it per key would raise throughput.
pub(crate) struct Keyspace<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    namespace: String,
    lock: Mutex<()>,
}

impl<S: Store> Keyspace<S> {
    pub(crate) fn new(store: Arc<S>, algorithm: Algorithm) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            namespace: algorithm.as_str().to_string(),
            lock: Mutex::new(()),
        }
    }

    pub(crate) fn set_clock(&mut self, clock: Arc<dyn Clock>) {
        self.clock = clock;
    }

    pub(crate) fn set_namespace(&mut self, namespace: impl Into<String>) {
        self.namespace = namespace.into();
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().await
    }

    pub(crate) fn state_key(&self, key: &str) -> Result<StateKey> {
        StateKey::new(&self.namespace, key)
    }

    /// Load the typed state for `key`; `None` means start fresh.
    pub(crate) async fn load<T: AlgorithmState>(&self, key: &StateKey) -> Result<Option<T>> {
        let store_key = key.to_store_key();
        match self.store.get(&store_key).await {
            Ok(record) => {
                let found = record.algorithm();
                T::from_record(record).map(Some).map_err(|_| {
                    StoreError::Corrupt {
                        key: store_key,
                        reason: format!("expected {} state, found {}", T::ALGORITHM, found),
                    }
                    .into()
                })
            }
            Err(StoreError::NotFound(_)) => {
                debug!(key = %key, "Initializing rate limit state");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub(crate) async fn save<T: AlgorithmState>(
        &self,
        key: &StateKey,
        state: T,
        ttl: Duration,
    ) -> Result<()> {
        trace!(key = %key, ttl = ?ttl, "Persisting rate limit state");
        self.store
            .set(&key.to_store_key(), state.into_record(), ttl)
            .await?;
        Ok(())
    }

    /// Delete the state for `key`. Callers hold the engine lock.
    pub(crate) async fn remove(&self, key: &str) -> Result<()> {
        let key = self.state_key(key)?;
        let store_key = key.to_store_key();
        if !self.store.exists(&store_key).await? {
            return Err(RateKeepError::NotFound(key.key));
        }
        match self.store.delete(&store_key).await {
            Ok(()) => {
                debug!(key = %key, "Reset rate limit state");
                Ok(())
            }
            // Expired between the existence check and the delete.
            Err(StoreError::NotFound(_)) => Err(RateKeepError::NotFound(key.key)),
            Err(e) => Err(e.into()),
        }
    }
}

/// Reject a zero value for a required positive parameter.
pub(crate) fn require_positive(name: &str, value: u64) -> Result<()> {
    if value == 0 {
        return Err(RateKeepError::Config(format!(
            "{} must be greater than 0",
            name
        )));
    }
    Ok(())
}

/// Window length in nanoseconds; zero and oversized windows are rejected.
pub(crate) fn window_nanos(window: Duration) -> Result<i64> {
    if window.is_zero() {
        return Err(RateKeepError::Config(
            "window size must be greater than 0".to_string(),
        ));
    }
    i64::try_from(window.as_nanos())
        .map_err(|_| RateKeepError::Config(format!("window size {:?} is too large", window)))
}

/// Convert a non-negative nanosecond count to a duration.
pub(crate) fn nanos_to_duration(nanos: i64) -> Duration {
    Duration::from_nanos(u64::try_from(nanos).unwrap_or(0))
}

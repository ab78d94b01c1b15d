//! Sliding window log limiter.
//!
//! Keeps the timestamp of every admitted request still inside the trailing
//! window. Exact, with no boundary burst, at the cost of one entry per
//! admitted request.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::decision::Decision;
use super::limiter::{
    nanos_to_duration, require_positive, window_nanos, Algorithm, Keyspace, RateLimiter,
};
use crate::clock::{unix_nanos, Clock};
use crate::error::Result;
use crate::store::Store;

/// Persisted request log of one key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlidingWindowState {
    /// Admission instants in Unix nanoseconds, oldest first
    pub timestamps: VecDeque<i64>,
}

impl SlidingWindowState {
    /// Drop every timestamp at or before `window_start`.
    fn evict(&mut self, window_start: i64) {
        while self
            .timestamps
            .front()
            .is_some_and(|&oldest| oldest <= window_start)
        {
            self.timestamps.pop_front();
        }
    }
}

/// A sliding window log rate limiter.
pub struct SlidingWindow<S> {
    limit: u64,
    window_size: Duration,
    window_nanos: i64,
    keyspace: Keyspace<S>,
}

impl<S: Store> SlidingWindow<S> {
    /// Allow `limit` requests in any trailing `window_size` interval.
    pub fn new(limit: u64, window_size: Duration, store: Arc<S>) -> Result<Self> {
        require_positive("limit", limit)?;
        let window_nanos = window_nanos(window_size)?;
        Ok(Self {
            limit,
            window_size,
            window_nanos,
            keyspace: Keyspace::new(store, Algorithm::SlidingWindow),
        })
    }

    /// Use `clock` instead of the system clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.keyspace.set_clock(clock);
        self
    }

    /// Store state under `namespace` instead of `sliding_window`.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.keyspace.set_namespace(namespace);
        self
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn window_size(&self) -> Duration {
        self.window_size
    }
}

#[async_trait]
impl<S: Store> RateLimiter for SlidingWindow<S> {
    async fn allow(&self, key: &str) -> Result<Decision> {
        let key = self.keyspace.state_key(key)?;
        let _guard = self.keyspace.lock().await;
        let now = unix_nanos(self.keyspace.now());

        let mut log = self
            .keyspace
            .load::<SlidingWindowState>(&key)
            .await?
            .unwrap_or_default();
        log.evict(now.saturating_sub(self.window_nanos));

        let recorded = log.timestamps.len() as u64;
        trace!(key = %key, recorded, "Checking sliding window");

        let decision = if recorded < self.limit {
            log.timestamps.push_back(now);
            Decision::allowed(self.limit, self.limit - (recorded + 1))
        } else {
            // The oldest entry is the first to leave the window.
            let oldest = log.timestamps.front().copied().unwrap_or(now);
            let frees_at = oldest.saturating_add(self.window_nanos);
            debug!(key = %key, recorded, limit = self.limit, "Sliding window limit exceeded");
            Decision::denied(self.limit, nanos_to_duration(frees_at - now))
        };

        self.keyspace.save(&key, log, self.window_size).await?;
        Ok(decision)
    }

    async fn reset(&self, key: &str) -> Result<()> {
        let _guard = self.keyspace.lock().await;
        self.keyspace.remove(key).await
    }

    fn algorithm(&self) -> Algorithm {
        Algorithm::SlidingWindow
    }
}

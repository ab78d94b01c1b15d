//! Sliding window counter limiter.
//!
//! Approximates a sliding log with two counters: the current fixed window and
//! the one before it. The previous count is weighted by how much of the
//! previous window still overlaps the trailing interval ending now.

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

/// Persisted counters of one key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlidingWindowCounterState {
    /// Admissions in the window before `current_window`
    pub previous_count: u64,
    /// Admissions in `current_window`
    pub current_count: u64,
    /// Index of the current fixed window
    pub current_window: i64,
}

impl SlidingWindowCounterState {
    fn empty(window: i64) -> Self {
        Self {
            previous_count: 0,
            current_count: 0,
            current_window: window,
        }
    }

    /// Move to `window`. The old current count only carries over as the
    /// previous count when `window` directly follows it.
    fn roll_to(&mut self, window: i64) {
        if window == self.current_window {
            return;
        }
        self.previous_count = if window == self.current_window.saturating_add(1) {
            self.current_count
        } else {
            0
        };
        self.current_count = 0;
        self.current_window = window;
    }

    /// Weighted request count over the trailing interval ending at `now`.
    fn estimate(&self, now: i64, window_nanos: i64) -> f64 {
        let into_window = now.rem_euclid(window_nanos);
        let overlap = (window_nanos - into_window) as f64 / window_nanos as f64;
        self.previous_count as f64 * overlap + self.current_count as f64
    }
}

/// A sliding window counter rate limiter.
///
/// Admission requires the estimate to be strictly below the limit, and the
/// reported `remaining` is derived from the estimate taken before the
/// request is counted.
pub struct SlidingWindowCounter<S> {
    limit: u64,
    window_size: Duration,
    window_nanos: i64,
    keyspace: Keyspace<S>,
}

impl<S: Store> SlidingWindowCounter<S> {
    /// Allow roughly `limit` requests in any trailing `window_size` interval.
    pub fn new(limit: u64, window_size: Duration, store: Arc<S>) -> Result<Self> {
        require_positive("limit", limit)?;
        let window_nanos = window_nanos(window_size)?;
        Ok(Self {
            limit,
            window_size,
            window_nanos,
            keyspace: Keyspace::new(store, Algorithm::SlidingWindowCounter),
        })
    }

    /// Use `clock` instead of the system clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.keyspace.set_clock(clock);
        self
    }

    /// Store state under `namespace` instead of `sliding_window_counter`.
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

    /// State must stay readable for one extra window so the previous count
    /// is still there when the next window starts.
    fn state_ttl(&self) -> Duration {
        self.window_size.saturating_mul(2)
    }
}

#[async_trait]
impl<S: Store> RateLimiter for SlidingWindowCounter<S> {
    async fn allow(&self, key: &str) -> Result<Decision> {
        let key = self.keyspace.state_key(key)?;
        let _guard = self.keyspace.lock().await;
        let now = unix_nanos(self.keyspace.now());
        let current_window = now.div_euclid(self.window_nanos);

        let mut state = self
            .keyspace
            .load::<SlidingWindowCounterState>(&key)
            .await?
            .unwrap_or_else(|| SlidingWindowCounterState::empty(current_window));
        state.roll_to(current_window);

        let estimate = state.estimate(now, self.window_nanos);
        trace!(
            key = %key,
            previous = state.previous_count,
            current = state.current_count,
            estimate,
            "Checking sliding window counter"
        );

        let decision = if estimate < self.limit as f64 {
            state.current_count = state.current_count.saturating_add(1);
            let counted = estimate.floor() as u64;
            Decision::allowed(self.limit, self.limit.saturating_sub(counted))
        } else {
            let next_window_start = current_window
                .saturating_add(1)
                .saturating_mul(self.window_nanos);
            debug!(key = %key, estimate, limit = self.limit, "Sliding window counter limit exceeded");
            Decision::denied(self.limit, nanos_to_duration(next_window_start - now))
        };

        self.keyspace.save(&key, state, self.state_ttl()).await?;
        Ok(decision)
    }

    async fn reset(&self, key: &str) -> Result<()> {
        let _guard = self.keyspace.lock().await;
        self.keyspace.remove(key).await
    }

    fn algorithm(&self) -> Algorithm {
        Algorithm::SlidingWindowCounter
    }
}

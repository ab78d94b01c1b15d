//! Fixed window counter limiter.
//!
//! Time is cut into windows of `window_size` aligned to the Unix epoch. Each
//! key may make `limit` requests per window. A client can spend its whole
//! quota at the end of one window and again at the start of the next, so
//! bursts of up to twice the limit are possible around a boundary.

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

/// Persisted state of one fixed window counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedWindowState {
    /// Requests counted in `window`, including denied ones
    pub count: u64,
    /// Index of the window the count belongs to
    pub window: i64,
}

/// A fixed window rate limiter.
pub struct FixedWindow<S> {
    limit: u64,
    window_size: Duration,
    window_nanos: i64,
    keyspace: Keyspace<S>,
}

impl<S: Store> FixedWindow<S> {
    /// Allow `limit` requests per `window_size`.
    pub fn new(limit: u64, window_size: Duration, store: Arc<S>) -> Result<Self> {
        require_positive("limit", limit)?;
        let window_nanos = window_nanos(window_size)?;
        Ok(Self {
            limit,
            window_size,
            window_nanos,
            keyspace: Keyspace::new(store, Algorithm::FixedWindow),
        })
    }

    /// Use `clock` instead of the system clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.keyspace.set_clock(clock);
        self
    }

    /// Store state under `namespace` instead of `fixed_window`.
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
impl<S: Store> RateLimiter for FixedWindow<S> {
    async fn allow(&self, key: &str) -> Result<Decision> {
        let key = self.keyspace.state_key(key)?;
        let _guard = self.keyspace.lock().await;
        let now = unix_nanos(self.keyspace.now());
        let current_window = now.div_euclid(self.window_nanos);

        let mut state = match self.keyspace.load::<FixedWindowState>(&key).await? {
            Some(state) if state.window == current_window => state,
            _ => FixedWindowState {
                count: 0,
                window: current_window,
            },
        };
        state.count = state.count.saturating_add(1);

        trace!(key = %key, window = current_window, count = state.count, "Checking fixed window");

        let decision = if state.count <= self.limit {
            Decision::allowed(self.limit, self.limit - state.count)
        } else {
            let next_window_start = current_window
                .saturating_add(1)
                .saturating_mul(self.window_nanos);
            debug!(key = %key, count = state.count, limit = self.limit, "Fixed window limit exceeded");
            Decision::denied(self.limit, nanos_to_duration(next_window_start - now))
        };

        self.keyspace.save(&key, state, self.window_size).await?;
        Ok(decision)
    }

    async fn reset(&self, key: &str) -> Result<()> {
        let _guard = self.keyspace.lock().await;
        self.keyspace.remove(key).await
    }

    fn algorithm(&self) -> Algorithm {
        Algorithm::FixedWindow
    }
}

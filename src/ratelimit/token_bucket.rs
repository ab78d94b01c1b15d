//! Token bucket limiter.
//!
//! Each key owns a bucket of `capacity` tokens. Every whole second that
//! passes adds `refill_rate` tokens (never beyond capacity) and each admitted
//! request takes one.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::decision::Decision;
use super::limiter::{require_positive, Algorithm, Keyspace, RateLimiter};
use crate::clock::Clock;
use crate::error::Result;
use crate::store::Store;

/// Minimum lifetime of a persisted bucket.
const MIN_STATE_TTL: Duration = Duration::from_secs(3600);

/// Persisted state of one token bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBucketState {
    /// Tokens currently available
    pub tokens: u64,
    /// Instant up to which refills have been credited
    pub last_refill: DateTime<Utc>,
}

impl TokenBucketState {
    fn full(capacity: u64, now: DateTime<Utc>) -> Self {
        Self {
            tokens: capacity,
            last_refill: now,
        }
    }

    /// Credit the whole seconds elapsed since `last_refill`.
    ///
    /// The fractional remainder stays on the clock, so frequent calls do not
    /// discard partial progress towards the next refill.
    fn refill(&mut self, now: DateTime<Utc>, capacity: u64, refill_rate: u64) {
        let elapsed_secs = now.signed_duration_since(self.last_refill).num_seconds();
        if elapsed_secs > 0 {
            let added = (elapsed_secs as u64).saturating_mul(refill_rate);
            self.tokens = self
                .tokens
                .saturating_add(added.min(capacity.saturating_sub(self.tokens)));
            self.last_refill = self
                .last_refill
                .checked_add_signed(TimeDelta::seconds(elapsed_secs))
                .unwrap_or(now);
        }
        if self.tokens >= capacity {
            self.tokens = capacity;
            self.last_refill = now;
        }
    }
}

/// A token bucket rate limiter.
///
/// A `refill_rate` of zero makes a drained bucket stay drained until it is
/// reset (or its record expires after an hour of inactivity).
pub struct TokenBucket<S> {
    capacity: u64,
    refill_rate: u64,
    keyspace: Keyspace<S>,
}

impl<S: Store> TokenBucket<S> {
    /// Create a token bucket holding at most `capacity` tokens and gaining
    /// `refill_rate` tokens per second.
    pub fn new(capacity: u64, refill_rate: u64, store: Arc<S>) -> Result<Self> {
        require_positive("capacity", capacity)?;
        Ok(Self {
            capacity,
            refill_rate,
            keyspace: Keyspace::new(store, Algorithm::TokenBucket),
        })
    }

    /// Use `clock` instead of the system clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.keyspace.set_clock(clock);
        self
    }

    /// Store state under `namespace` instead of `token_bucket`.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.keyspace.set_namespace(namespace);
        self
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn refill_rate(&self) -> u64 {
        self.refill_rate
    }

    /// Long enough to outlive a full refill, and never under an hour.
    fn state_ttl(&self) -> Duration {
        match self.refill_rate {
            0 => MIN_STATE_TTL,
            rate => MIN_STATE_TTL.max(Duration::from_secs(self.capacity.div_ceil(rate))),
        }
    }

    fn retry_after(&self) -> Duration {
        match self.refill_rate {
            0 => Duration::MAX,
            rate => Duration::from_secs(1) / u32::try_from(rate).unwrap_or(u32::MAX),
        }
    }
}

#[async_trait]
impl<S: Store> RateLimiter for TokenBucket<S> {
    async fn allow(&self, key: &str) -> Result<Decision> {
        let key = self.keyspace.state_key(key)?;
        let _guard = self.keyspace.lock().await;
        let now = self.keyspace.now();

        let mut bucket = self
            .keyspace
            .load::<TokenBucketState>(&key)
            .await?
            .unwrap_or_else(|| TokenBucketState::full(self.capacity, now));
        bucket.refill(now, self.capacity, self.refill_rate);

        trace!(key = %key, tokens = bucket.tokens, "Checking token bucket");

        let decision = if bucket.tokens > 0 {
            bucket.tokens -= 1;
            Decision::allowed(self.capacity, bucket.tokens)
        } else {
            debug!(key = %key, capacity = self.capacity, "Token bucket empty");
            Decision::denied(self.capacity, self.retry_after())
        };

        self.keyspace.save(&key, bucket, self.state_ttl()).await?;
        Ok(decision)
    }

    async fn reset(&self, key: &str) -> Result<()> {
        let _guard = self.keyspace.lock().await;
        self.keyspace.remove(key).await
    }

    fn algorithm(&self) -> Algorithm {
        Algorithm::TokenBucket
    }
}

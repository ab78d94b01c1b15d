//! Leaky bucket limiter.
//!
//! Admitted requests join a queue of at most `capacity` entries that drains
//! at `rate` entries per second. A request arriving at a full queue is
//! rejected.

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

/// Minimum lifetime of a persisted queue.
const MIN_STATE_TTL: Duration = Duration::from_secs(3600);

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Persisted state of one leaky bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeakyBucketState {
    /// Requests still queued
    pub queue: u64,
    /// Instant up to which leakage has been applied
    pub last_leak: DateTime<Utc>,
}

impl LeakyBucketState {
    fn empty(now: DateTime<Utc>) -> Self {
        Self {
            queue: 0,
            last_leak: now,
        }
    }

    /// Drain the whole units leaked since `last_leak`.
    ///
    /// `last_leak` only advances by the time those units account for, so the
    /// partial progress towards the next unit is kept.
    fn leak(&mut self, now: DateTime<Utc>, rate: u64) {
        let elapsed = now
            .signed_duration_since(self.last_leak)
            .num_nanoseconds()
            .unwrap_or(i64::MAX);
        if elapsed > 0 {
            let leaked = (elapsed as u128 * rate as u128 / NANOS_PER_SEC).min(u64::MAX as u128) as u64;
            if leaked >= self.queue {
                self.queue = 0;
            } else {
                self.queue -= leaked;
                let drained_nanos = (leaked as u128 * NANOS_PER_SEC / rate as u128) as i64;
                self.last_leak = self
                    .last_leak
                    .checked_add_signed(TimeDelta::nanoseconds(drained_nanos))
                    .unwrap_or(now);
            }
        }
        if self.queue == 0 {
            self.last_leak = now;
        }
    }
}

/// A leaky bucket rate limiter.
pub struct LeakyBucket<S> {
    capacity: u64,
    rate: u64,
    keyspace: Keyspace<S>,
}

impl<S: Store> LeakyBucket<S> {
    /// Create a bucket queueing at most `capacity` requests and draining
    /// `rate` of them per second.
    pub fn new(capacity: u64, rate: u64, store: Arc<S>) -> Result<Self> {
        require_positive("capacity", capacity)?;
        require_positive("leak rate", rate)?;
        Ok(Self {
            capacity,
            rate,
            keyspace: Keyspace::new(store, Algorithm::LeakyBucket),
        })
    }

    /// Use `clock` instead of the system clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.keyspace.set_clock(clock);
        self
    }

    /// Store state under `namespace` instead of `leaky_bucket`.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.keyspace.set_namespace(namespace);
        self
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn rate(&self) -> u64 {
        self.rate
    }

    /// Long enough to drain a full queue, and never under an hour.
    fn state_ttl(&self) -> Duration {
        MIN_STATE_TTL.max(Duration::from_secs(self.capacity.div_ceil(self.rate)))
    }

    fn retry_after(&self) -> Duration {
        Duration::from_secs(1) / u32::try_from(self.rate).unwrap_or(u32::MAX)
    }
}

#[async_trait]
impl<S: Store> RateLimiter for LeakyBucket<S> {
    async fn allow(&self, key: &str) -> Result<Decision> {
        let key = self.keyspace.state_key(key)?;
        let _guard = self.keyspace.lock().await;
        let now = self.keyspace.now();

        let mut bucket = self
            .keyspace
            .load::<LeakyBucketState>(&key)
            .await?
            .unwrap_or_else(|| LeakyBucketState::empty(now));
        bucket.leak(now, self.rate);

        trace!(key = %key, queue = bucket.queue, "Checking leaky bucket");

        let decision = if bucket.queue < self.capacity {
            bucket.queue += 1;
            Decision::allowed(self.capacity, self.capacity - bucket.queue)
        } else {
            debug!(key = %key, capacity = self.capacity, "Leaky bucket full");
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
        Algorithm::LeakyBucket
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::RateKeepError;
    use crate::store::{MemoryStore, StateRecord};

    fn create_bucket(
        capacity: u64,
        rate: u64,
    ) -> (Arc<ManualClock>, Arc<MemoryStore>, LeakyBucket<MemoryStore>) {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        let bucket = LeakyBucket::new(capacity, rate, store.clone())
            .unwrap()
            .with_clock(clock.clone());
        (clock, store, bucket)
    }

    async fn queue_length(store: &MemoryStore, key: &str) -> u64 {
        match store.get(&format!("leaky_bucket:{}", key)).await.unwrap() {
            StateRecord::LeakyBucket(state) => state.queue,
            other => panic!("unexpected record {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fills_to_capacity() {
        let (_, _, bucket) = create_bucket(3, 1);

        for expected in [2, 1, 0] {
            let decision = bucket.allow("user1").await.unwrap();
            assert!(decision.allowed);
            assert_eq!(decision.remaining, expected);
        }

        let decision = bucket.allow("user1").await.unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.limit, 3);
        assert_eq!(decision.remaining, 0);
        assert_eq!(decision.retry_after, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_drains_fully_after_one_second() {
        let (clock, store, bucket) = create_bucket(5, 5);
        for _ in 0..5 {
            assert!(bucket.allow("user1").await.unwrap().allowed);
        }
        assert!(!bucket.allow("user1").await.unwrap().allowed);

        clock.advance(Duration::from_secs(1));
        let decision = bucket.allow("user1").await.unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 4);
        assert_eq!(queue_length(&store, "user1").await, 1);
    }

    #[tokio::test]
    async fn test_partial_leak() {
        let (clock, store, bucket) = create_bucket(4, 2);
        for _ in 0..4 {
            bucket.allow("user1").await.unwrap();
        }

        // 2/s for 1.25s drains two whole requests.
        clock.advance(Duration::from_millis(1250));
        let decision = bucket.allow("user1").await.unwrap();
        assert!(decision.allowed);
        assert_eq!(queue_length(&store, "user1").await, 3);
        assert_eq!(decision.remaining, 1);
    }

    #[tokio::test]
    async fn test_frequent_calls_do_not_stall_leak() {
        let (clock, _, bucket) = create_bucket(1, 1);
        assert!(bucket.allow("user1").await.unwrap().allowed);

        clock.advance(Duration::from_millis(600));
        assert!(!bucket.allow("user1").await.unwrap().allowed);

        clock.advance(Duration::from_millis(600));
        assert!(bucket.allow("user1").await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_retry_after_scales_with_rate() {
        let (_, _, bucket) = create_bucket(1, 10);
        bucket.allow("user1").await.unwrap();

        let decision = bucket.allow("user1").await.unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.retry_after, Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_keys_are_isolated() {
        let (_, _, bucket) = create_bucket(1, 1);
        assert!(bucket.allow("user1").await.unwrap().allowed);
        assert!(!bucket.allow("user1").await.unwrap().allowed);
        assert!(bucket.allow("user2").await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_reset() {
        let (_, _, bucket) = create_bucket(1, 1);
        assert!(matches!(
            bucket.reset("user1").await,
            Err(RateKeepError::NotFound(_))
        ));

        bucket.allow("user1").await.unwrap();
        bucket.reset("user1").await.unwrap();
        let decision = bucket.allow("user1").await.unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 0);
    }

    #[test]
    fn test_rejects_invalid_configuration() {
        let store = Arc::new(MemoryStore::new());
        assert!(matches!(
            LeakyBucket::new(0, 1, store.clone()),
            Err(RateKeepError::Config(_))
        ));
        assert!(matches!(
            LeakyBucket::new(5, 0, store),
            Err(RateKeepError::Config(_))
        ));
    }
}

//! Declarative limiter rules.
//!
//! A rule names an algorithm and its parameters; it can be read from YAML
//! and turned into a ready limiter over any store.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::fixed_window::FixedWindow;
use super::leaky_bucket::LeakyBucket;
use super::limiter::{Algorithm, RateLimiter};
use super::sliding_window::SlidingWindow;
use super::sliding_window_counter::SlidingWindowCounter;
use super::token_bucket::TokenBucket;
use crate::clock::Clock;
use crate::error::{RateKeepError, Result};
use crate::store::Store;

/// Algorithm and parameters of one limiter. Windows are in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "snake_case")]
pub enum LimitRule {
    TokenBucket { capacity: u64, refill_rate: u64 },
    FixedWindow { limit: u64, window_ms: u64 },
    SlidingWindow { limit: u64, window_ms: u64 },
    SlidingWindowCounter { limit: u64, window_ms: u64 },
    LeakyBucket { capacity: u64, rate: u64 },
}

impl Default for LimitRule {
    fn default() -> Self {
        LimitRule::FixedWindow {
            limit: 100,
            window_ms: 1000,
        }
    }
}

impl LimitRule {
    /// Parse a rule from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| RateKeepError::Config(format!("Failed to parse limit rule: {}", e)))
    }

    pub fn algorithm(&self) -> Algorithm {
        match self {
            LimitRule::TokenBucket { .. } => Algorithm::TokenBucket,
            LimitRule::FixedWindow { .. } => Algorithm::FixedWindow,
            LimitRule::SlidingWindow { .. } => Algorithm::SlidingWindow,
            LimitRule::SlidingWindowCounter { .. } => Algorithm::SlidingWindowCounter,
            LimitRule::LeakyBucket { .. } => Algorithm::LeakyBucket,
        }
    }

    /// The admission limit a decision from this rule reports.
    pub fn limit(&self) -> u64 {
        match *self {
            LimitRule::TokenBucket { capacity, .. } | LimitRule::LeakyBucket { capacity, .. } => {
                capacity
            }
            LimitRule::FixedWindow { limit, .. }
            | LimitRule::SlidingWindow { limit, .. }
            | LimitRule::SlidingWindowCounter { limit, .. } => limit,
        }
    }

    /// Build the limiter this rule describes.
    ///
    /// State is namespaced by `namespace`, or by the algorithm name when
    /// `None`. Invalid parameters fail here, never at call time.
    pub fn build<S: Store + 'static>(
        &self,
        store: Arc<S>,
        clock: Arc<dyn Clock>,
        namespace: Option<&str>,
    ) -> Result<Box<dyn RateLimiter>> {
        let namespace = namespace.unwrap_or(self.algorithm().as_str()).to_string();
        info!(rule = ?self, namespace = %namespace, "Building rate limiter");

        let limiter: Box<dyn RateLimiter> = match *self {
            LimitRule::TokenBucket {
                capacity,
                refill_rate,
            } => Box::new(
                TokenBucket::new(capacity, refill_rate, store)?
                    .with_clock(clock)
                    .with_namespace(namespace),
            ),
            LimitRule::FixedWindow { limit, window_ms } => Box::new(
                FixedWindow::new(limit, Duration::from_millis(window_ms), store)?
                    .with_clock(clock)
                    .with_namespace(namespace),
            ),
            LimitRule::SlidingWindow { limit, window_ms } => Box::new(
                SlidingWindow::new(limit, Duration::from_millis(window_ms), store)?
                    .with_clock(clock)
                    .with_namespace(namespace),
            ),
            LimitRule::SlidingWindowCounter { limit, window_ms } => Box::new(
                SlidingWindowCounter::new(limit, Duration::from_millis(window_ms), store)?
                    .with_clock(clock)
                    .with_namespace(namespace),
            ),
            LimitRule::LeakyBucket { capacity, rate } => Box::new(
                LeakyBucket::new(capacity, rate, store)?
                    .with_clock(clock)
                    .with_namespace(namespace),
            ),
        };
        Ok(limiter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, SystemClock};
    use crate::store::MemoryStore;

    #[test]
    fn test_parse_token_bucket_rule() {
        let yaml = r#"
algorithm: token_bucket
capacity: 10
refill_rate: 2
"#;
        let rule = LimitRule::from_yaml(yaml).unwrap();
        assert_eq!(
            rule,
            LimitRule::TokenBucket {
                capacity: 10,
                refill_rate: 2
            }
        );
        assert_eq!(rule.algorithm(), Algorithm::TokenBucket);
        assert_eq!(rule.limit(), 10);
    }

    #[test]
    fn test_parse_window_rule() {
        let yaml = r#"
algorithm: sliding_window_counter
limit: 50
window_ms: 60000
"#;
        let rule = LimitRule::from_yaml(yaml).unwrap();
        assert_eq!(rule.algorithm(), Algorithm::SlidingWindowCounter);
        assert_eq!(rule.limit(), 50);
    }

    #[test]
    fn test_parse_rejects_unknown_algorithm() {
        let yaml = r#"
algorithm: generic_cell_rate
limit: 5
"#;
        assert!(matches!(
            LimitRule::from_yaml(yaml),
            Err(RateKeepError::Config(_))
        ));
    }

    #[test]
    fn test_parse_rejects_missing_parameter() {
        let yaml = r#"
algorithm: leaky_bucket
capacity: 5
"#;
        assert!(LimitRule::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_build_rejects_invalid_parameters() {
        let store = Arc::new(MemoryStore::new());
        let rule = LimitRule::FixedWindow {
            limit: 5,
            window_ms: 0,
        };
        assert!(matches!(
            rule.build(store, Arc::new(SystemClock), None),
            Err(RateKeepError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_build_applies_namespace() {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        let rule = LimitRule::LeakyBucket {
            capacity: 2,
            rate: 1,
        };

        let limiter = rule
            .build(store.clone(), clock.clone(), Some("api"))
            .unwrap();
        assert_eq!(limiter.algorithm(), Algorithm::LeakyBucket);

        limiter.allow("user1").await.unwrap();
        assert!(store.exists("api:user1").await.unwrap());
        assert!(!store.exists("leaky_bucket:user1").await.unwrap());
    }

    #[tokio::test]
    async fn test_every_rule_builds_a_working_limiter() {
        let rules = [
            LimitRule::TokenBucket {
                capacity: 1,
                refill_rate: 1,
            },
            LimitRule::FixedWindow {
                limit: 1,
                window_ms: 1000,
            },
            LimitRule::SlidingWindow {
                limit: 1,
                window_ms: 1000,
            },
            LimitRule::SlidingWindowCounter {
                limit: 1,
                window_ms: 1000,
            },
            LimitRule::LeakyBucket {
                capacity: 1,
                rate: 1,
            },
        ];

        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        for rule in rules {
            let limiter = rule.build(store.clone(), clock.clone(), None).unwrap();
            assert_eq!(limiter.algorithm(), rule.algorithm());
            assert!(limiter.allow("user1").await.unwrap().allowed);
            assert!(!limiter.allow("user1").await.unwrap().allowed);
        }
    }
}

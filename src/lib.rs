//! Ratekeep - Store-backed request rate limiting
//!
//! This crate decides whether the next request for a caller key is allowed,
//! using one of five algorithms: token bucket, fixed window, sliding window
//! log, sliding window counter and leaky bucket. Per-key state lives in a
//! pluggable TTL-aware store so decisions can be shared between processes.

pub mod clock;
pub mod config;
pub mod error;
pub mod ratelimit;
pub mod store;

pub use error::{RateKeepError, Result, StoreError};
pub use ratelimit::{Algorithm, Decision, RateLimiter};

//! Rate limiting algorithms and their shared contract.

mod decision;
mod fixed_window;
mod key;
mod leaky_bucket;
mod limiter;
mod rules;
mod sliding_window;
mod sliding_window_counter;
mod token_bucket;

pub use decision::Decision;
pub use fixed_window::{FixedWindow, FixedWindowState};
pub use key::StateKey;
pub use leaky_bucket::{LeakyBucket, LeakyBucketState};
pub use limiter::{Algorithm, RateLimiter};
pub use rules::LimitRule;
pub use sliding_window::{SlidingWindow, SlidingWindowState};
pub use sliding_window_counter::{SlidingWindowCounter, SlidingWindowCounterState};
pub use token_bucket::{TokenBucket, TokenBucketState};

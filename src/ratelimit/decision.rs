//! The outcome of a single admission check.

use std::time::Duration;

/// Result of one admission check.
///
/// `retry_after` is zero exactly when the request was allowed, and a denied
/// decision always reports `remaining == 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Decision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// The configured limit (capacity or requests per window)
    pub limit: u64,
    /// Quota still available after this request
    pub remaining: u64,
    /// Suggested wait before retrying a denied request
    pub retry_after: Duration,
}

impl Decision {
    /// An admitted request.
    pub fn allowed(limit: u64, remaining: u64) -> Self {
        Self {
            allowed: true,
            limit,
            remaining,
            retry_after: Duration::ZERO,
        }
    }

    /// A rejected request. A zero `retry_after` is bumped to one nanosecond.
    pub fn denied(limit: u64, retry_after: Duration) -> Self {
        Self {
            allowed: false,
            limit,
            remaining: 0,
            retry_after: retry_after.max(Duration::from_nanos(1)),
        }
    }

    /// `retry_after` in whole seconds, rounded up, for `Retry-After` style headers.
    pub fn retry_after_secs(&self) -> u64 {
        let secs = self.retry_after.as_secs();
        if self.retry_after.subsec_nanos() > 0 {
            secs.saturating_add(1)
        } else {
            secs
        }
    }
}

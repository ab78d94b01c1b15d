//! The serializable state representation shared by every store backend.

use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::ratelimit::{
    Algorithm, FixedWindowState, LeakyBucketState, SlidingWindowCounterState, SlidingWindowState,
    TokenBucketState,
};

/// Per-key limiter state as persisted by a [`Store`](super::Store).
///
/// In-process stores keep the typed value; text backends persist the JSON
/// produced by [`StateRecord::encode`]. Either way the limiter sees the same
/// record, so no backend-specific inspection happens at call time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "snake_case")]
pub enum StateRecord {
    TokenBucket(TokenBucketState),
    FixedWindow(FixedWindowState),
    SlidingWindow(SlidingWindowState),
    SlidingWindowCounter(SlidingWindowCounterState),
    LeakyBucket(LeakyBucketState),
}

impl StateRecord {
    /// The algorithm that owns this record.
    pub fn algorithm(&self) -> Algorithm {
        match self {
            StateRecord::TokenBucket(_) => Algorithm::TokenBucket,
            StateRecord::FixedWindow(_) => Algorithm::FixedWindow,
            StateRecord::SlidingWindow(_) => Algorithm::SlidingWindow,
            StateRecord::SlidingWindowCounter(_) => Algorithm::SlidingWindowCounter,
            StateRecord::LeakyBucket(_) => Algorithm::LeakyBucket,
        }
    }

    /// Encode as JSON text for string-valued backends.
    pub fn encode(&self) -> Result<String, StoreError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode JSON text written by [`StateRecord::encode`].
    pub fn decode(text: &str) -> Result<Self, StoreError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Typed state owned by one limiter algorithm.
pub trait AlgorithmState: Sized {
    const ALGORITHM: Algorithm;

    fn into_record(self) -> StateRecord;

    /// Extract the typed state, handing the record back on a variant mismatch.
    fn from_record(record: StateRecord) -> std::result::Result<Self, StateRecord>;
}

macro_rules! algorithm_state {
    ($state:ty, $variant:ident) => {
        impl AlgorithmState for $state {
            const ALGORITHM: Algorithm = Algorithm::$variant;

            fn into_record(self) -> StateRecord {
                StateRecord::$variant(self)
            }

            fn from_record(record: StateRecord) -> std::result::Result<Self, StateRecord> {
                match record {
                    StateRecord::$variant(state) => Ok(state),
                    other => Err(other),
                }
            }
        }
    };
}

algorithm_state!(TokenBucketState, TokenBucket);
algorithm_state!(FixedWindowState, FixedWindow);
algorithm_state!(SlidingWindowState, SlidingWindow);
algorithm_state!(SlidingWindowCounterState, SlidingWindowCounter);
algorithm_state!(LeakyBucketState, LeakyBucket);

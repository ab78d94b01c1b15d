//! Store key generation for limiter state.

use crate::error::{RateKeepError, Result};

/// The store key under which one caller key's state lives.
///
/// Keys are namespaced (by default with the algorithm name) so engines
/// sharing a store never read each other's records.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StateKey {
    /// Namespace of the owning limiter
    pub namespace: String,
    /// Caller-supplied key
    pub key: String,
}

impl StateKey {
    /// Build a state key, rejecting an empty caller key.
    pub fn new(namespace: &str, key: &str) -> Result<Self> {
        if key.is_empty() {
            return Err(RateKeepError::InvalidInput(
                "rate limit key cannot be empty".to_string(),
            ));
        }
        Ok(Self {
            namespace: namespace.to_string(),
            key: key.to_string(),
        })
    }

    /// The string handed to the store.
    pub fn to_store_key(&self) -> String {
        format!("{}:{}", self.namespace, self.key)
    }
}

impl std::fmt::Display for StateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_store_key())
    }
}

//! Configuration management for Ratekeep.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::clock::Clock;
use crate::error::{RateKeepError, Result};
use crate::ratelimit::{LimitRule, RateLimiter};
use crate::store::{Store, TimeoutStore};

/// Main configuration for a limiter and its store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateKeepConfig {
    /// The limiting rule
    #[serde(default)]
    pub limit: LimitRule,

    /// Store configuration
    #[serde(default)]
    pub store: StoreConfig,
}

/// Store configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Upper bound on one store call, in milliseconds
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout_ms: u64,

    /// Interval of the in-memory expiration sweep, in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Key namespace; defaults to the algorithm name
    #[serde(default)]
    pub namespace: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            operation_timeout_ms: default_operation_timeout(),
            sweep_interval_secs: default_sweep_interval(),
            namespace: None,
        }
    }
}

fn default_operation_timeout() -> u64 {
    2000
}

fn default_sweep_interval() -> u64 {
    300
}

impl StoreConfig {
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl RateKeepConfig {
    /// Load configuration from a file path.
    pub fn from_file(path: &str) -> Result<Self> {
        info!(path = %path, "Loading rate limit configuration");
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: RateKeepConfig =
            serde_yaml::from_str(yaml).map_err(|e| RateKeepError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the settings that cannot be caught by deserialization.
    pub fn validate(&self) -> Result<()> {
        if self.store.operation_timeout_ms == 0 {
            return Err(RateKeepError::Config(
                "store.operation_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.store.sweep_interval_secs == 0 {
            return Err(RateKeepError::Config(
                "store.sweep_interval_secs must be greater than 0".to_string(),
            ));
        }
        if matches!(self.store.namespace.as_deref(), Some("")) {
            return Err(RateKeepError::Config(
                "store.namespace cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Build the configured limiter over `store`, bounding every store call
    /// by the configured operation timeout.
    pub fn build_limiter<S: Store + 'static>(
        &self,
        store: Arc<S>,
        clock: Arc<dyn Clock>,
    ) -> Result<Box<dyn RateLimiter>> {
        self.validate()?;
        let store = Arc::new(TimeoutStore::new(store, self.store.operation_timeout()));
        self.limit
            .build(store, clock, self.store.namespace.as_deref())
    }
}

//! Walks a fixed window limiter through a burst of requests.
//!
//! Set `RATEKEEP_CONFIG` to a YAML file to try another rule.

use std::sync::Arc;

use ratekeep::clock::SystemClock;
use ratekeep::config::RateKeepConfig;
use ratekeep::ratelimit::LimitRule;
use ratekeep::store::MemoryStore;
use tracing::{info, warn, Level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(false)
        .init();

    let config = match std::env::var("RATEKEEP_CONFIG") {
        Ok(path) => RateKeepConfig::from_file(&path)?,
        Err(_) => RateKeepConfig {
            limit: LimitRule::FixedWindow {
                limit: 5,
                window_ms: 1000,
            },
            ..Default::default()
        },
    };

    let store = Arc::new(MemoryStore::new());
    let _sweeper = store.spawn_sweeper(config.store.sweep_interval());
    let limiter = config.build_limiter(store, Arc::new(SystemClock))?;

    for request in 1..=10 {
        let decision = limiter.allow("user1").await?;
        if decision.allowed {
            info!(request, remaining = decision.remaining, "Request allowed");
        } else {
            warn!(request, retry_after = ?decision.retry_after, "Request denied");
        }
    }

    limiter.reset("user1").await?;
    info!("Quota for user1 reset");
    Ok(())
}

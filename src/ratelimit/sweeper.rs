//! Background eviction of idle rate limit state.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::limiter::RateLimitEngine;

/// Spawn a task that calls [`RateLimitEngine::sweep`] every `interval`.
///
/// The task runs until the returned handle is aborted.
pub fn spawn_sweeper(engine: Arc<RateLimitEngine>, interval: Duration) -> JoinHandle<()> {
    info!(interval_secs = interval.as_secs(), "Starting rate limit sweeper");

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let stats = engine.sweep();
            if stats.total() > 0 {
                debug!(
                    counters = stats.counters,
                    blocks = stats.blocks,
                    violations = stats.violations,
                    "Evicted idle rate limit state"
                );
            }
        }
    })
}

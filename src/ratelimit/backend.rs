//! Rate limit gate trait for abstracting the decision source.

use async_trait::async_trait;

use super::decision::Decision;
use super::key::ClientKey;
use super::limiter::RateLimitEngine;

/// Trait for anything that can hand out rate limit verdicts.
///
/// The HTTP middleware talks to this rather than to [`RateLimitEngine`]
/// directly, so a gate backed by an external store can be dropped in. The
/// middleware bounds every call with a timeout and applies the configured
/// [`FailurePolicy`](super::FailurePolicy) when it expires.
#[async_trait]
pub trait RateLimitGate: Send + Sync {
    /// Decide whether `client` may make a request to `route`.
    async fn check(&self, client: &ClientKey, route: &str) -> Decision;
}

#[async_trait]
impl RateLimitGate for RateLimitEngine {
    async fn check(&self, client: &ClientKey, route: &str) -> Decision {
        self.decide(client, route)
    }
}

//! Axum middleware that puts every request through the rate limit gate.

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use super::response::insert_headers;
use crate::config::RateLimitingConfig;
use crate::ratelimit::{ClientIdentifier, Decision, FailurePolicy, RateLimitGate};

/// Shared state for [`rate_limit_middleware`].
#[derive(Clone)]
pub struct GateState {
    gate: Arc<dyn RateLimitGate>,
    identifier: ClientIdentifier,
    failure_policy: FailurePolicy,
    decision_timeout: Duration,
}

impl GateState {
    /// Create gate state with proxy headers trusted, fail-open, and a 50ms timeout.
    pub fn new(gate: Arc<dyn RateLimitGate>) -> Self {
        Self {
            gate,
            identifier: ClientIdentifier::default(),
            failure_policy: FailurePolicy::default(),
            decision_timeout: Duration::from_millis(50),
        }
    }

    pub fn from_config(gate: Arc<dyn RateLimitGate>, config: &RateLimitingConfig) -> Self {
        Self {
            gate,
            identifier: ClientIdentifier::new(config.trust_proxy_headers),
            failure_policy: config.failure_policy,
            decision_timeout: Duration::from_millis(config.decision_timeout_ms),
        }
    }

    pub fn with_identifier(mut self, identifier: ClientIdentifier) -> Self {
        self.identifier = identifier;
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn with_decision_timeout(mut self, timeout: Duration) -> Self {
        self.decision_timeout = timeout;
        self
    }
}

/// Wrap `router` so every request is rate limited.
pub fn rate_limited<S>(router: Router<S>, state: GateState) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router.layer(middleware::from_fn_with_state(state, rate_limit_middleware))
}

/// Rate limit one request.
///
/// Denials are answered here with a 429. Admitted requests continue down the
/// stack and the quota headers are added to whatever comes back.
#[instrument(
    skip_all,
    fields(
        method = %request.method(),
        path = %request.uri().path()
    )
)]
pub async fn rate_limit_middleware(
    State(state): State<GateState>,
    request: Request,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let client = state.identifier.identify(request.headers(), peer);
    let route = request.uri().path().to_owned();

    let decision = match tokio::time::timeout(state.decision_timeout, state.gate.check(&client, &route)).await {
        Ok(decision) => decision,
        Err(_) => {
            warn!(
                client = %client,
                timeout_ms = state.decision_timeout.as_millis() as u64,
                policy = ?state.failure_policy,
                "Rate limit decision timed out, applying failure policy"
            );
            state.failure_policy.fallback()
        }
    };

    match decision {
        Decision::Admit { quota } => {
            let mut response = next.run(request).await;
            if let Some(quota) = quota {
                insert_headers(response.headers_mut(), quota.headers());
            }
            response
        }
        Decision::Deny(denial) => {
            debug!(
                client = %client,
                reason = ?denial.reason,
                retry_after = denial.retry_after,
                "Request denied"
            );
            denial.into_response()
        }
    }
}

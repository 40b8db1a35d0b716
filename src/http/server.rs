//! HTTP server implementation.

use axum::{
    extract::State,
    http::{StatusCode, Uri},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::middleware::{rate_limited, GateState};
use crate::config::GatekeeperConfig;
use crate::error::{GatekeeperError, Result};
use crate::ratelimit::RateLimitEngine;

#[derive(Clone)]
struct AppState {
    engine: Arc<RateLimitEngine>,
}

/// HTTP server fronted by the rate limiter.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// The rate limit engine instance
    engine: Arc<RateLimitEngine>,
    gate: GateState,
}

impl HttpServer {
    /// Create a new server with default gate settings.
    pub fn new(addr: SocketAddr, engine: Arc<RateLimitEngine>) -> Self {
        let gate = GateState::new(engine.clone());
        Self { addr, engine, gate }
    }

    /// Create a server using the listen address and gate settings from `config`.
    pub fn from_config(config: &GatekeeperConfig, engine: Arc<RateLimitEngine>) -> Self {
        let gate = GateState::from_config(engine.clone(), &config.rate_limiting);
        Self {
            addr: config.server.listen_addr,
            engine,
            gate,
        }
    }

    /// Build the rate limited router.
    pub fn router(&self) -> Router {
        let app = Router::new()
            .route("/health", get(health_handler))
            .route("/ratelimit/status", get(status_handler))
            .fallback(fallback_handler)
            .with_state(AppState {
                engine: self.engine.clone(),
            });

        rate_limited(app, self.gate.clone())
    }

    /// Start the server.
    ///
    /// This method will block until the server is shut down.
    pub async fn serve(self) -> Result<()> {
        self.serve_with_shutdown(std::future::pending()).await
    }

    /// Start the server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let app = self.router();
        let listener = TcpListener::bind(self.addr).await.map_err(|e| {
            error!(addr = %self.addr, error = %e, "Failed to bind HTTP listener");
            GatekeeperError::Server(format!("failed to bind {}: {}", self.addr, e))
        })?;

        info!(addr = %self.addr, "Starting rate limited HTTP server with graceful shutdown");

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            GatekeeperError::Io(e)
        })
    }
}

/// `GET /health`: liveness probe.
async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "ok", "service": "gatekeeper" }))
}

/// `GET /ratelimit/status`: sizes of the limiter's stores.
async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    let engine = &state.engine;
    Json(json!({
        "enabled": engine.settings().enabled,
        "default_limit": engine.policy().default_quota().to_string(),
        "counters": engine.counter_count(),
        "blocked_clients": engine.blocked_count(),
        "violating_clients": engine.violations().len(),
    }))
}

async fn fallback_handler(uri: Uri) -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "Not Found", "path": uri.path() })),
    )
}

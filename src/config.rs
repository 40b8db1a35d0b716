//! Configuration management for Gatekeeper.
//!
//! Configuration is read from an optional YAML file and then overridden by
//! environment variables prefixed with `GATEKEEPER__`, using `__` between
//! nested keys (for example `GATEKEEPER__RATE_LIMITING__ENABLED=false`).

use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use tracing::info;

use crate::error::{GatekeeperError, Result};
use crate::ratelimit::{FailurePolicy, DEFAULT_BLOCK_DURATION, DEFAULT_VIOLATION_THRESHOLD};

/// Prefix for environment variable overrides.
pub const ENV_PREFIX: &str = "GATEKEEPER";

/// Upper bound for configured durations (365 days).
pub const MAX_DURATION_SECS: u64 = 365 * 24 * 60 * 60;

/// Main configuration for the Gatekeeper service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatekeeperConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, 8080))
}

/// A quota override for one exact request path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointLimit {
    pub path: String,
    /// Limit string such as `"5/minute"`
    pub limit: String,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Master switch
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Limit applied to routes without an override
    #[serde(default = "default_limit")]
    pub default_limit: String,

    /// Per-path overrides
    #[serde(default)]
    pub endpoint_limits: Vec<EndpointLimit>,

    /// Violations before a client is blocked
    #[serde(default = "default_violation_threshold")]
    pub violation_threshold: u32,

    /// Block length in seconds
    #[serde(default = "default_block_duration")]
    pub block_duration_secs: u64,

    /// Use `X-Forwarded-For` / `X-Real-IP` to identify clients
    #[serde(default = "default_trust_proxy_headers")]
    pub trust_proxy_headers: bool,

    /// Behaviour when a decision times out
    #[serde(default)]
    pub failure_policy: FailurePolicy,

    /// Upper bound on a single decision in milliseconds
    #[serde(default = "default_decision_timeout")]
    pub decision_timeout_ms: u64,

    /// How often idle state is swept, in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Forget violation counts idle this long. Unset keeps them forever.
    #[serde(default)]
    pub violation_idle_ttl_secs: Option<u64>,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            default_limit: default_limit(),
            endpoint_limits: Vec::new(),
            violation_threshold: default_violation_threshold(),
            block_duration_secs: default_block_duration(),
            trust_proxy_headers: default_trust_proxy_headers(),
            failure_policy: FailurePolicy::default(),
            decision_timeout_ms: default_decision_timeout(),
            sweep_interval_secs: default_sweep_interval(),
            violation_idle_ttl_secs: None,
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_limit() -> String {
    "60/minute".to_string()
}

fn default_violation_threshold() -> u32 {
    DEFAULT_VIOLATION_THRESHOLD
}

fn default_block_duration() -> u64 {
    DEFAULT_BLOCK_DURATION.as_secs()
}

fn default_trust_proxy_headers() -> bool {
    true
}

fn default_decision_timeout() -> u64 {
    50
}

fn default_sweep_interval() -> u64 {
    60
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `info` or `gatekeeper=debug`
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl GatekeeperConfig {
    /// Load configuration from an optional YAML file plus environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();

        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(::config::File::from(path).format(::config::FileFormat::Yaml));
        }

        let config: GatekeeperConfig = builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: GatekeeperConfig = serde_yaml::from_str(yaml)
            .map_err(|e| GatekeeperError::Config(format!("Failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot work with.
    ///
    /// Limit strings are checked separately when the policy is built.
    pub fn validate(&self) -> Result<()> {
        let rl = &self.rate_limiting;
        if rl.violation_threshold == 0 {
            return Err(GatekeeperError::Config(
                "rate_limiting.violation_threshold must be at least 1".to_string(),
            ));
        }
        if rl.block_duration_secs == 0 {
            return Err(GatekeeperError::Config(
                "rate_limiting.block_duration_secs must be at least 1".to_string(),
            ));
        }
        if rl.block_duration_secs > MAX_DURATION_SECS {
            return Err(GatekeeperError::Config(format!(
                "rate_limiting.block_duration_secs must be at most {}",
                MAX_DURATION_SECS
            )));
        }
        if rl.violation_idle_ttl_secs == Some(0) {
            return Err(GatekeeperError::Config(
                "rate_limiting.violation_idle_ttl_secs must be at least 1".to_string(),
            ));
        }
        if rl.violation_idle_ttl_secs.is_some_and(|ttl| ttl > MAX_DURATION_SECS) {
            return Err(GatekeeperError::Config(format!(
                "rate_limiting.violation_idle_ttl_secs must be at most {}",
                MAX_DURATION_SECS
            )));
        }
        if rl.decision_timeout_ms == 0 {
            return Err(GatekeeperError::Config(
                "rate_limiting.decision_timeout_ms must be at least 1".to_string(),
            ));
        }
        if rl.sweep_interval_secs == 0 {
            return Err(GatekeeperError::Config(
                "rate_limiting.sweep_interval_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

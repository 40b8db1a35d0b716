//! Rate limit rules: limit-string parsing and per-route policy resolution.
//!
//! Limits are written as `"<count>/<period>"`, for example `"5/minute"`.
//! Every configured string is parsed once when the policy is built, so a typo
//! stops the service at startup instead of surfacing on some later request.

use chrono::TimeDelta;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, trace};

use crate::config::RateLimitingConfig;
use crate::error::Result;

/// Errors produced while parsing a limit string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LimitFormatError {
    #[error("invalid rate limit format `{0}`: expected `<count>/<period>`")]
    Malformed(String),

    #[error("invalid request count `{0}`")]
    InvalidCount(String),

    #[error("request count must be positive in `{0}`")]
    ZeroCount(String),

    #[error("invalid period `{0}`: expected second, minute, hour or day")]
    UnknownPeriod(String),
}

/// Time period a quota is expressed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Period {
    Second,
    Minute,
    Hour,
    Day,
}

impl Period {
    /// Length of the period in seconds.
    pub fn seconds(&self) -> u64 {
        match self {
            Period::Second => 1,
            Period::Minute => 60,
            Period::Hour => 3600,
            Period::Day => 86400,
        }
    }
}

impl FromStr for Period {
    type Err = LimitFormatError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "second" => Ok(Period::Second),
            "minute" => Ok(Period::Minute),
            "hour" => Ok(Period::Hour),
            "day" => Ok(Period::Day),
            other => Err(LimitFormatError::UnknownPeriod(other.to_string())),
        }
    }
}

/// A quota: at most `max_requests` within any trailing `window_secs` seconds.
///
/// Both fields are always positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QuotaWindow {
    max_requests: u64,
    window_secs: u64,
}

impl QuotaWindow {
    /// Build a quota, returning `None` if either field is zero.
    pub fn new(max_requests: u64, window_secs: u64) -> Option<Self> {
        (max_requests > 0 && window_secs > 0).then_some(Self {
            max_requests,
            window_secs,
        })
    }

    pub fn per(max_requests: u64, period: Period) -> Option<Self> {
        Self::new(max_requests, period.seconds())
    }

    pub fn max_requests(&self) -> u64 {
        self.max_requests
    }

    pub fn window_secs(&self) -> u64 {
        self.window_secs
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    /// The window as a signed delta for timestamp arithmetic.
    pub fn window_delta(&self) -> TimeDelta {
        TimeDelta::seconds(self.window_secs as i64)
    }
}

impl fmt::Display for QuotaWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} per {}s", self.max_requests, self.window_secs)
    }
}

impl FromStr for QuotaWindow {
    type Err = LimitFormatError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        parse_limit(s)
    }
}

/// Parse a limit string such as `"5/minute"` or `"100/HOUR"`.
pub fn parse_limit(spec: &str) -> std::result::Result<QuotaWindow, LimitFormatError> {
    let parts: Vec<&str> = spec.split('/').collect();
    let [count, period] = parts.as_slice() else {
        return Err(LimitFormatError::Malformed(spec.to_string()));
    };

    let count = count.trim();
    let max_requests: u64 = count
        .parse()
        .map_err(|_| LimitFormatError::InvalidCount(count.to_string()))?;
    let period: Period = period.parse()?;

    QuotaWindow::per(max_requests, period).ok_or_else(|| LimitFormatError::ZeroCount(spec.to_string()))
}

/// Resolves the quota that applies to a route.
///
/// Overrides match on the exact request path; anything else gets the default.
#[derive(Debug, Clone)]
pub struct LimitPolicy {
    default: QuotaWindow,
    overrides: HashMap<String, QuotaWindow>,
}

impl LimitPolicy {
    /// Create a policy with only a default quota.
    pub fn new(default: QuotaWindow) -> Self {
        Self {
            default,
            overrides: HashMap::new(),
        }
    }

    /// Add or replace the quota for an exact path.
    pub fn with_override(mut self, route: impl Into<String>, quota: QuotaWindow) -> Self {
        self.overrides.insert(route.into(), quota);
        self
    }

    /// Build a policy from configuration, failing on the first bad limit string.
    pub fn from_config(config: &RateLimitingConfig) -> Result<Self> {
        let default = parse_limit(&config.default_limit)?;
        let mut policy = Self::new(default);

        for endpoint in &config.endpoint_limits {
            let quota = parse_limit(&endpoint.limit)?;
            info!(route = %endpoint.path, quota = %quota, "Registered endpoint rate limit");
            policy.overrides.insert(endpoint.path.clone(), quota);
        }

        info!(
            default = %default,
            overrides = policy.overrides.len(),
            "Rate limit policy loaded"
        );
        Ok(policy)
    }

    /// Quota for `route`. Never fails.
    pub fn resolve(&self, route: &str) -> QuotaWindow {
        match self.overrides.get(route) {
            Some(quota) => *quota,
            None => {
                trace!(route = %route, quota = %self.default, "No endpoint override, using default limit");
                self.default
            }
        }
    }

    pub fn default_quota(&self) -> QuotaWindow {
        self.default
    }

    /// The longest window any route can be limited over.
    pub fn max_window(&self) -> Duration {
        self.overrides
            .values()
            .chain(std::iter::once(&self.default))
            .map(QuotaWindow::window)
            .max()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EndpointLimit;

    #[test]
    fn test_parse_limit_examples() {
        assert_eq!(parse_limit("5/minute").unwrap(), QuotaWindow::new(5, 60).unwrap());
        assert_eq!(parse_limit("100/hour").unwrap(), QuotaWindow::new(100, 3600).unwrap());
        assert_eq!(parse_limit("1/second").unwrap(), QuotaWindow::new(1, 1).unwrap());
        assert_eq!(parse_limit("1000/day").unwrap(), QuotaWindow::new(1000, 86400).unwrap());
    }

    #[test]
    fn test_parse_limit_case_insensitive() {
        assert_eq!(parse_limit("10/MINUTE").unwrap(), QuotaWindow::new(10, 60).unwrap());
        assert_eq!(parse_limit(" 10 / Hour ").unwrap(), QuotaWindow::new(10, 3600).unwrap());
    }

    #[test]
    fn test_parse_limit_rejects_missing_separator() {
        assert_eq!(
            parse_limit("bad"),
            Err(LimitFormatError::Malformed("bad".to_string()))
        );
        assert!(matches!(parse_limit("5/minute/x"), Err(LimitFormatError::Malformed(_))));
    }

    #[test]
    fn test_parse_limit_rejects_unknown_period() {
        assert_eq!(
            parse_limit("5/fortnight"),
            Err(LimitFormatError::UnknownPeriod("fortnight".to_string()))
        );
    }

    #[test]
    fn test_parse_limit_rejects_bad_count() {
        assert!(matches!(parse_limit("five/minute"), Err(LimitFormatError::InvalidCount(_))));
        assert!(matches!(parse_limit("-1/minute"), Err(LimitFormatError::InvalidCount(_))));
        assert!(matches!(parse_limit("0/minute"), Err(LimitFormatError::ZeroCount(_))));
    }

    #[test]
    fn test_quota_window_rejects_zero() {
        assert!(QuotaWindow::new(0, 60).is_none());
        assert!(QuotaWindow::new(5, 0).is_none());
    }

    #[test]
    fn test_resolve_override_and_default() {
        let policy = LimitPolicy::new(QuotaWindow::new(60, 60).unwrap())
            .with_override("/auth/login", QuotaWindow::new(5, 60).unwrap());

        assert_eq!(policy.resolve("/auth/login").max_requests(), 5);
        assert_eq!(policy.resolve("/auth/login/").max_requests(), 60);
        assert_eq!(policy.resolve("/users").max_requests(), 60);
    }

    #[test]
    fn test_from_config() {
        let config = RateLimitingConfig {
            default_limit: "100/minute".to_string(),
            endpoint_limits: vec![EndpointLimit {
                path: "/auth/register".to_string(),
                limit: "3/hour".to_string(),
            }],
            ..Default::default()
        };

        let policy = LimitPolicy::from_config(&config).unwrap();
        assert_eq!(policy.resolve("/auth/register"), QuotaWindow::new(3, 3600).unwrap());
        assert_eq!(policy.resolve("/other"), QuotaWindow::new(100, 60).unwrap());
        assert_eq!(policy.max_window(), Duration::from_secs(3600));
    }

    #[test]
    fn test_from_config_fails_fast() {
        let config = RateLimitingConfig {
            endpoint_limits: vec![EndpointLimit {
                path: "/auth/login".to_string(),
                limit: "5/fortnight".to_string(),
            }],
            ..Default::default()
        };

        assert!(LimitPolicy::from_config(&config).is_err());
    }
}

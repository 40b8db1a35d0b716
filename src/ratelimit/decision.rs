//! Rate limit verdicts.
//!
//! Denials are ordinary values, not errors. [`Decision`] is `#[must_use]` so
//! a caller cannot drop a verdict on the floor.

use serde::{Deserialize, Serialize};

pub const HEADER_LIMIT: &str = "x-ratelimit-limit";
pub const HEADER_REMAINING: &str = "x-ratelimit-remaining";
pub const HEADER_RESET: &str = "x-ratelimit-reset";
pub const HEADER_BLOCKED: &str = "x-ratelimit-blocked";
pub const HEADER_RETRY_AFTER: &str = "retry-after";

/// Quota figures reported back to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaStatus {
    /// Requests allowed per window
    pub limit: u64,
    /// Requests left in the current window
    pub remaining: u64,
    /// Unix timestamp (seconds) at which the window frees up
    pub reset: i64,
}

impl QuotaStatus {
    pub fn headers(&self) -> [(&'static str, String); 3] {
        [
            (HEADER_LIMIT, self.limit.to_string()),
            (HEADER_REMAINING, self.remaining.to_string()),
            (HEADER_RESET, self.reset.to_string()),
        ]
    }
}

/// Why a request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// The client is serving an earlier block.
    Blocked,
    /// The route quota is used up.
    QuotaExceeded { max_requests: u64, window_secs: u64 },
    /// This violation pushed the client over the escalation threshold.
    Escalated,
    /// The limiter did not answer in time and the failure policy is closed.
    Unavailable,
}

/// A refused request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Denial {
    pub reason: DenyReason,
    /// Seconds the client should wait before retrying
    pub retry_after: u64,
    /// Present only for quota denials
    pub quota: Option<QuotaStatus>,
}

/// JSON body sent with a 429.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DenialBody {
    pub error: String,
    pub detail: String,
    pub retry_after: u64,
}

impl Denial {
    pub fn blocked(retry_after: u64) -> Self {
        Self {
            reason: DenyReason::Blocked,
            retry_after,
            quota: None,
        }
    }

    pub fn escalated(block_secs: u64) -> Self {
        Self {
            reason: DenyReason::Escalated,
            retry_after: block_secs,
            quota: None,
        }
    }

    pub fn quota_exceeded(max_requests: u64, window_secs: u64, retry_after: u64, reset: i64) -> Self {
        Self {
            reason: DenyReason::QuotaExceeded {
                max_requests,
                window_secs,
            },
            retry_after,
            quota: Some(QuotaStatus {
                limit: max_requests,
                remaining: 0,
                reset,
            }),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            reason: DenyReason::Unavailable,
            retry_after: 1,
            quota: None,
        }
    }

    /// Human-readable explanation for the response body.
    pub fn detail(&self) -> String {
        match self.reason {
            DenyReason::Blocked => format!(
                "IP temporarily blocked. Try again in {} seconds.",
                self.retry_after
            ),
            DenyReason::Escalated => format!(
                "IP blocked for {} seconds due to repeated violations.",
                self.retry_after
            ),
            DenyReason::QuotaExceeded {
                max_requests,
                window_secs,
            } => format!(
                "Rate limit exceeded. Maximum {} requests per {} seconds.",
                max_requests, window_secs
            ),
            DenyReason::Unavailable => format!(
                "Rate limiter unavailable. Try again in {} seconds.",
                self.retry_after
            ),
        }
    }

    pub fn body(&self) -> DenialBody {
        DenialBody {
            error: "Too Many Requests".to_string(),
            detail: self.detail(),
            retry_after: self.retry_after,
        }
    }

    /// Headers to send with the 429.
    ///
    /// Block denials carry `X-RateLimit-Blocked` in place of the quota headers.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![(HEADER_RETRY_AFTER, self.retry_after.to_string())];
        match self.reason {
            DenyReason::Blocked | DenyReason::Escalated => {
                headers.push((HEADER_BLOCKED, "true".to_string()));
            }
            DenyReason::QuotaExceeded { .. } | DenyReason::Unavailable => {}
        }
        if let Some(quota) = &self.quota {
            headers.extend(quota.headers());
        }
        headers
    }
}

/// Verdict for one request.
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Let the request through. `quota` is `None` when limiting is off.
    Admit { quota: Option<QuotaStatus> },
    /// Answer with 429.
    Deny(Denial),
}

impl Decision {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Decision::Admit { .. })
    }

    pub fn denial(&self) -> Option<&Denial> {
        match self {
            Decision::Deny(denial) => Some(denial),
            Decision::Admit { .. } => None,
        }
    }
}

/// What to do when the limiter cannot produce a verdict in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Let the request through without quota headers.
    #[default]
    Open,
    /// Refuse the request with a short retry hint.
    Closed,
}

impl FailurePolicy {
    pub fn fallback(&self) -> Decision {
        match self {
            FailurePolicy::Open => Decision::Admit { quota: None },
            FailurePolicy::Closed => Decision::Deny(Denial::unavailable()),
        }
    }
}

//! Core rate limit decision engine.

use chrono::{DateTime, TimeDelta, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

use super::block::BlockStore;
use super::clock::{Clock, SystemClock};
use super::counter::{WindowCheck, WindowCounterStore};
use super::decision::{Decision, Denial, QuotaStatus};
use super::key::{ClientKey, CounterKey};
use super::rules::{LimitPolicy, QuotaWindow};
use super::violations::ViolationTracker;
use crate::config::RateLimitingConfig;
use crate::error::Result;

/// Violations before a client is blocked.
pub const DEFAULT_VIOLATION_THRESHOLD: u32 = 10;
/// How long an escalated block lasts.
pub const DEFAULT_BLOCK_DURATION: Duration = Duration::from_secs(300);

/// Engine behaviour that is not part of the per-route policy.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// When false every request is admitted and no state is touched
    pub enabled: bool,
    pub violation_threshold: u32,
    pub block_duration: Duration,
    /// Forget violation counts idle for this long. `None` keeps them forever.
    pub violation_idle_ttl: Option<Duration>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            violation_threshold: DEFAULT_VIOLATION_THRESHOLD,
            block_duration: DEFAULT_BLOCK_DURATION,
            violation_idle_ttl: None,
        }
    }
}

impl EngineSettings {
    pub fn from_config(config: &RateLimitingConfig) -> Self {
        Self {
            enabled: config.enabled,
            violation_threshold: config.violation_threshold,
            block_duration: Duration::from_secs(config.block_duration_secs),
            violation_idle_ttl: config.violation_idle_ttl_secs.map(Duration::from_secs),
        }
    }
}

/// What one sweep removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub counters: usize,
    pub blocks: usize,
    pub violations: usize,
}

impl SweepStats {
    pub fn total(&self) -> usize {
        self.counters + self.blocks + self.violations
    }
}

/// Decides, per request, whether a client may proceed.
///
/// Owns its stores; share the engine itself behind an `Arc`. Every check is
/// synchronous and never waits on I/O.
pub struct RateLimitEngine {
    settings: EngineSettings,
    policy: LimitPolicy,
    windows: WindowCounterStore,
    blocks: BlockStore,
    violations: ViolationTracker,
    clock: Arc<dyn Clock>,
}

impl RateLimitEngine {
    /// Create an engine on the system clock.
    pub fn new(settings: EngineSettings, policy: LimitPolicy) -> Self {
        Self::with_clock(settings, policy, Arc::new(SystemClock))
    }

    pub fn with_clock(settings: EngineSettings, policy: LimitPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            settings,
            policy,
            windows: WindowCounterStore::new(),
            blocks: BlockStore::new(),
            violations: ViolationTracker::new(),
            clock,
        }
    }

    /// Build an engine from configuration. Fails if any limit string is invalid.
    pub fn from_config(config: &RateLimitingConfig) -> Result<Self> {
        let policy = LimitPolicy::from_config(config)?;
        Ok(Self::new(EngineSettings::from_config(config), policy))
    }

    /// Decide whether `client` may make a request to `route` now.
    ///
    /// Checks run in order: disabled, blocked, quota. An admitted request is
    /// recorded against the window; a denied one is not, but counts as a
    /// violation.
    pub fn decide(&self, client: &ClientKey, route: &str) -> Decision {
        if !self.settings.enabled {
            trace!(client = %client, route = %route, "Rate limiting disabled, admitting");
            return Decision::Admit { quota: None };
        }

        let now = self.clock.now();

        if self.blocks.is_blocked(client, now) {
            let remaining = self.blocks.remaining_seconds(client, now);
            debug!(client = %client, route = %route, remaining, "Client is blocked");
            return Decision::Deny(Denial::blocked(remaining));
        }

        let quota = self.policy.resolve(route);
        let key = CounterKey::new(client.clone(), route);

        match self.windows.check_and_record(&key, now, quota) {
            WindowCheck::Admitted { prior_count } => {
                let remaining = quota.max_requests().saturating_sub(prior_count + 1);
                trace!(key = %key, count = prior_count + 1, remaining, "Request admitted");
                Decision::Admit {
                    quota: Some(QuotaStatus {
                        limit: quota.max_requests(),
                        remaining,
                        reset: (now + quota.window_delta()).timestamp(),
                    }),
                }
            }
            WindowCheck::Exceeded { count, oldest } => {
                debug!(key = %key, count, limit = quota.max_requests(), "Rate limit exceeded");
                self.on_violation(client, quota, now, oldest)
            }
        }
    }

    fn on_violation(
        &self,
        client: &ClientKey,
        quota: QuotaWindow,
        now: DateTime<Utc>,
        oldest: DateTime<Utc>,
    ) -> Decision {
        let violations = self.violations.record_violation(client, now);

        if violations >= self.settings.violation_threshold {
            let block_secs = self.settings.block_duration.as_secs();
            let until = self
                .blocks
                .block(client, now, delta_from(self.settings.block_duration));
            self.violations.reset_violations(client);
            warn!(
                client = %client,
                violations,
                block_secs,
                until = %until,
                "Client blocked after repeated rate limit violations"
            );
            return Decision::Deny(Denial::escalated(block_secs));
        }

        let reset_at = oldest + quota.window_delta();
        Decision::Deny(Denial::quota_exceeded(
            quota.max_requests(),
            quota.window_secs(),
            retry_after_secs(reset_at, now),
            reset_at.timestamp(),
        ))
    }

    /// Drop state that can no longer influence a decision.
    ///
    /// Counter logs idle for longer than the longest configured window,
    /// expired blocks, and (only when a TTL is configured) idle violation
    /// counts.
    pub fn sweep(&self) -> SweepStats {
        let now = self.clock.now();
        let max_window = delta_from(self.policy.max_window());

        let violations = match self.settings.violation_idle_ttl {
            Some(ttl) => self.violations.evict_idle(cutoff(now, delta_from(ttl))),
            None => 0,
        };

        SweepStats {
            counters: self.windows.evict_idle(cutoff(now, max_window)),
            blocks: self.blocks.evict_expired(now),
            violations,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn policy(&self) -> &LimitPolicy {
        &self.policy
    }

    pub fn windows(&self) -> &WindowCounterStore {
        &self.windows
    }

    pub fn blocks(&self) -> &BlockStore {
        &self.blocks
    }

    pub fn violations(&self) -> &ViolationTracker {
        &self.violations
    }

    /// Number of (client, route) logs held.
    pub fn counter_count(&self) -> usize {
        self.windows.len()
    }

    /// Number of block records held, including expired ones not yet swept.
    pub fn blocked_count(&self) -> usize {
        self.blocks.len()
    }

    /// Clear all state.
    ///
    /// This is primarily useful for testing.
    pub fn clear(&self) {
        self.windows.clear();
        self.blocks.clear();
        self.violations.clear();
    }
}

/// Seconds until `reset_at`, truncated, never negative, plus one second so a
/// client retrying on the dot does not land just before the slot frees up.
fn retry_after_secs(reset_at: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    (reset_at - now).num_seconds().max(0) as u64 + 1
}

/// Convert a configured duration, saturating instead of overflowing.
fn delta_from(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}

fn cutoff(now: DateTime<Utc>, age: TimeDelta) -> DateTime<Utc> {
    now.checked_sub_signed(age).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::ManualClock;
    use crate::ratelimit::decision::{DenyReason, HEADER_REMAINING};

    const START: i64 = 1_700_000_000;

    fn engine_with(settings: EngineSettings, quota: QuotaWindow) -> (RateLimitEngine, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::at_unix(START));
        let policy = LimitPolicy::new(quota);
        let engine = RateLimitEngine::with_clock(settings, policy, clock.clone());
        (engine, clock)
    }

    fn engine(max: u64, window: u64) -> (RateLimitEngine, Arc<ManualClock>) {
        engine_with(EngineSettings::default(), QuotaWindow::new(max, window).unwrap())
    }

    fn client() -> ClientKey {
        ClientKey::from("1.2.3.4")
    }

    fn admitted_quota(decision: Decision) -> QuotaStatus {
        match decision {
            Decision::Admit { quota: Some(quota) } => quota,
            other => panic!("expected admit with quota, got {:?}", other),
        }
    }

    fn denial(decision: Decision) -> Denial {
        match decision {
            Decision::Deny(denial) => denial,
            other => panic!("expected deny, got {:?}", other),
        }
    }

    #[test]
    fn test_sliding_window_denies_sixth_request() {
        let (engine, clock) = engine(5, 60);

        for _ in 0..5 {
            assert!(engine.decide(&client(), "/api").is_admitted());
            clock.advance_secs(1);
        }

        // t=5
        let denial = denial(engine.decide(&client(), "/api"));
        assert_eq!(
            denial.reason,
            DenyReason::QuotaExceeded {
                max_requests: 5,
                window_secs: 60
            }
        );
        assert_eq!(denial.retry_after, 56);
        assert_eq!(
            denial.quota,
            Some(QuotaStatus {
                limit: 5,
                remaining: 0,
                reset: START + 60,
            })
        );
    }

    #[test]
    fn test_sliding_window_admits_after_oldest_ages_out() {
        let (engine, clock) = engine(5, 60);

        for _ in 0..5 {
            assert!(engine.decide(&client(), "/api").is_admitted());
            clock.advance_secs(1);
        }

        clock.set(DateTime::from_timestamp(START + 61, 0).unwrap());
        assert!(engine.decide(&client(), "/api").is_admitted());
    }

    #[test]
    fn test_remaining_header_after_third_admit() {
        let (engine, _clock) = engine(5, 60);

        assert!(engine.decide(&client(), "/api").is_admitted());
        assert!(engine.decide(&client(), "/api").is_admitted());
        let quota = admitted_quota(engine.decide(&client(), "/api"));

        assert_eq!(quota.limit, 5);
        assert_eq!(quota.remaining, 2);
        assert_eq!(quota.reset, START + 60);
        assert!(quota.headers().contains(&(HEADER_REMAINING, "2".to_string())));
    }

    #[test]
    fn test_denied_requests_do_not_consume_quota() {
        let (engine, _clock) = engine(1, 60);
        let key = CounterKey::new(client(), "/api");

        assert!(engine.decide(&client(), "/api").is_admitted());
        for _ in 0..3 {
            assert!(!engine.decide(&client(), "/api").is_admitted());
        }

        let now = DateTime::from_timestamp(START, 0).unwrap();
        assert_eq!(engine.windows().count_since(&key, now - TimeDelta::seconds(60)), 1);
        assert_eq!(engine.windows().record_and_count(&key, now, TimeDelta::seconds(60)), 2);
        assert_eq!(engine.violations().violations(&client()), 3);
    }

    #[test]
    fn test_escalation_blocks_for_exactly_block_duration() {
        let (engine, _clock) = engine(1, 60);
        assert!(engine.decide(&client(), "/api").is_admitted());

        for expected in 1..10 {
            let denial = denial(engine.decide(&client(), "/api"));
            assert!(matches!(denial.reason, DenyReason::QuotaExceeded { .. }));
            assert_eq!(engine.violations().violations(&client()), expected);
        }

        // 10th violation escalates
        let denial = denial(engine.decide(&client(), "/api"));
        assert_eq!(denial.reason, DenyReason::Escalated);
        assert_eq!(denial.retry_after, 300);
        assert_eq!(engine.violations().violations(&client()), 0);

        // Now blocked for the full duration, on every route
        let blocked = self::denial(engine.decide(&client(), "/elsewhere"));
        assert_eq!(blocked.reason, DenyReason::Blocked);
        assert_eq!(blocked.retry_after, 300);
    }

    #[test]
    fn test_violations_restart_from_one_after_block() {
        let (engine, clock) = engine(1, 60);
        assert!(engine.decide(&client(), "/api").is_admitted());
        for _ in 0..10 {
            let _ = engine.decide(&client(), "/api");
        }
        assert_eq!(engine.violations().violations(&client()), 0);

        // Serve out the block; the window has also expired by then
        clock.advance_secs(300);
        assert!(engine.decide(&client(), "/api").is_admitted());

        let denial = denial(engine.decide(&client(), "/api"));
        assert!(matches!(denial.reason, DenyReason::QuotaExceeded { .. }));
        assert_eq!(engine.violations().violations(&client()), 1);
    }

    #[test]
    fn test_block_retry_after_decreases_then_lifts() {
        let (engine, clock) = engine(1, 1);
        assert!(engine.decide(&client(), "/api").is_admitted());
        for _ in 0..10 {
            let _ = engine.decide(&client(), "/api");
        }

        let mut last = u64::MAX;
        for _ in 0..300 {
            let denial = denial(engine.decide(&client(), "/api"));
            assert_eq!(denial.reason, DenyReason::Blocked);
            assert!(denial.retry_after < last);
            last = denial.retry_after;
            clock.advance_secs(1);
        }
        assert_eq!(last, 1);

        assert!(engine.decide(&client(), "/api").is_admitted());
        assert_eq!(engine.blocked_count(), 0);
    }

    #[test]
    fn test_blocked_requests_touch_no_counters() {
        let (engine, clock) = engine(5, 60);
        engine.blocks().block(&client(), clock.now(), TimeDelta::seconds(30));

        for _ in 0..20 {
            assert!(!engine.decide(&client(), "/api").is_admitted());
        }

        assert_eq!(engine.counter_count(), 0);
        assert_eq!(engine.violations().violations(&client()), 0);
    }

    #[test]
    fn test_disabled_admits_without_state() {
        let settings = EngineSettings {
            enabled: false,
            ..Default::default()
        };
        let (engine, _clock) = engine_with(settings, QuotaWindow::new(1, 60).unwrap());

        for _ in 0..1000 {
            assert_eq!(engine.decide(&client(), "/api"), Decision::Admit { quota: None });
        }

        assert_eq!(engine.counter_count(), 0);
        assert_eq!(engine.blocked_count(), 0);
        assert!(engine.violations().is_empty());
    }

    #[test]
    fn test_routes_and_clients_are_independent() {
        let clock = Arc::new(ManualClock::at_unix(START));
        let policy = LimitPolicy::new(QuotaWindow::new(10, 60).unwrap())
            .with_override("/auth/login", QuotaWindow::new(1, 60).unwrap());
        let engine = RateLimitEngine::with_clock(EngineSettings::default(), policy, clock);

        assert!(engine.decide(&client(), "/auth/login").is_admitted());
        assert!(!engine.decide(&client(), "/auth/login").is_admitted());
        assert!(engine.decide(&client(), "/users").is_admitted());
        assert!(engine.decide(&ClientKey::from("5.6.7.8"), "/auth/login").is_admitted());
    }

    #[test]
    fn test_custom_escalation_settings() {
        let settings = EngineSettings {
            violation_threshold: 2,
            block_duration: Duration::from_secs(30),
            ..Default::default()
        };
        let (engine, _clock) = engine_with(settings, QuotaWindow::new(1, 60).unwrap());

        assert!(engine.decide(&client(), "/api").is_admitted());
        let _ = engine.decide(&client(), "/api");
        let denial = denial(engine.decide(&client(), "/api"));
        assert_eq!(denial.reason, DenyReason::Escalated);
        assert_eq!(denial.retry_after, 30);
    }

    #[test]
    fn test_sweep_drops_idle_state() {
        let (engine, clock) = engine(1, 60);
        assert!(engine.decide(&client(), "/api").is_admitted());
        let _ = engine.decide(&client(), "/api");
        engine
            .blocks()
            .block(&ClientKey::from("9.9.9.9"), clock.now(), TimeDelta::seconds(10));

        clock.advance_secs(61);
        let stats = engine.sweep();

        assert_eq!(stats.counters, 1);
        assert_eq!(stats.blocks, 1);
        // Violations are kept without a TTL
        assert_eq!(stats.violations, 0);
        assert_eq!(engine.violations().violations(&client()), 1);
    }

    #[test]
    fn test_sweep_with_violation_ttl() {
        let settings = EngineSettings {
            violation_idle_ttl: Some(Duration::from_secs(3600)),
            ..Default::default()
        };
        let (engine, clock) = engine_with(settings, QuotaWindow::new(1, 60).unwrap());
        assert!(engine.decide(&client(), "/api").is_admitted());
        let _ = engine.decide(&client(), "/api");

        clock.advance_secs(3601);
        assert_eq!(engine.sweep().violations, 1);
        assert_eq!(engine.violations().violations(&client()), 0);
    }

    #[test]
    fn test_oversized_durations_saturate() {
        let settings = EngineSettings {
            violation_threshold: 1,
            block_duration: Duration::from_secs(10_000_000_000_000),
            violation_idle_ttl: Some(Duration::from_secs(u64::MAX)),
            ..Default::default()
        };
        let (engine, clock) = engine_with(settings, QuotaWindow::new(1, 60).unwrap());

        assert!(engine.decide(&client(), "/api").is_admitted());
        let denial = denial(engine.decide(&client(), "/api"));
        assert_eq!(denial.reason, DenyReason::Escalated);

        clock.advance_secs(365 * 24 * 60 * 60);
        assert!(engine.blocks().is_blocked(&client(), clock.now()));
        assert_eq!(engine.sweep().blocks, 0);
    }

    #[test]
    fn test_sweep_keeps_active_state() {
        let (engine, clock) = engine(5, 60);
        assert!(engine.decide(&client(), "/api").is_admitted());

        clock.advance_secs(30);
        assert_eq!(engine.sweep().total(), 0);
        assert_eq!(engine.counter_count(), 1);
    }

    #[test]
    fn test_retry_after_rounding() {
        let now = DateTime::from_timestamp(START, 0).unwrap();
        assert_eq!(retry_after_secs(now + TimeDelta::seconds(55), now), 56);
        assert_eq!(retry_after_secs(now + TimeDelta::milliseconds(55_300), now), 56);
        assert_eq!(retry_after_secs(now - TimeDelta::seconds(3), now), 1);
    }

    #[test]
    fn test_from_config_rejects_bad_limit() {
        let config = RateLimitingConfig {
            default_limit: "lots/minute".to_string(),
            ..Default::default()
        };
        assert!(RateLimitEngine::from_config(&config).is_err());
    }

    #[test]
    fn test_clear() {
        let (engine, _clock) = engine(5, 60);
        let _ = engine.decide(&client(), "/api");
        assert_eq!(engine.counter_count(), 1);

        engine.clear();
        assert_eq!(engine.counter_count(), 0);
    }
}

//! Sliding-window request log store.

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use std::collections::VecDeque;

use super::key::CounterKey;
use super::rules::QuotaWindow;

/// Outcome of an atomic quota check on one counter key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowCheck {
    /// The request was recorded. `prior_count` is the number of requests in
    /// the window before this one.
    Admitted { prior_count: u64 },
    /// The quota is used up; nothing was recorded.
    Exceeded {
        count: u64,
        oldest: DateTime<Utc>,
    },
}

/// Tracks request timestamps per (client, route) key.
///
/// Each key holds an ordered log of arrival instants. Logs are pruned to the
/// trailing window whenever they are read, which gives an exact sliding
/// window rather than fixed buckets. A log never holds more than the quota's
/// `max_requests` live entries, because denied requests are not recorded.
///
/// The map is sharded, so operations on one key lock only that key's shard.
#[derive(Debug, Default)]
pub struct WindowCounterStore {
    logs: DashMap<CounterKey, VecDeque<DateTime<Utc>>>,
}

impl WindowCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `now` to the log and return the number of requests within
    /// `window` of `now`, including this one.
    pub fn record_and_count(&self, key: &CounterKey, now: DateTime<Utc>, window: TimeDelta) -> u64 {
        let mut log = self.logs.entry(key.clone()).or_default();
        prune(&mut log, now - window);
        log.push_back(now);
        log.len() as u64
    }

    /// Number of requests strictly after `window_start`. Drops stale entries.
    pub fn count_since(&self, key: &CounterKey, window_start: DateTime<Utc>) -> u64 {
        match self.logs.get_mut(key) {
            Some(mut log) => {
                prune(&mut log, window_start);
                log.len() as u64
            }
            None => 0,
        }
    }

    /// Earliest instant still held for `key`.
    pub fn oldest_timestamp(&self, key: &CounterKey) -> Option<DateTime<Utc>> {
        self.logs.get(key).and_then(|log| log.front().copied())
    }

    /// Check the quota and record the request in one step.
    ///
    /// The key's entry stays locked between the count and the insert, so two
    /// concurrent requests cannot both take the last slot.
    pub fn check_and_record(&self, key: &CounterKey, now: DateTime<Utc>, quota: QuotaWindow) -> WindowCheck {
        let mut log = self.logs.entry(key.clone()).or_default();
        prune(&mut log, now - quota.window_delta());

        let count = log.len() as u64;
        if count >= quota.max_requests() {
            if let Some(oldest) = log.front().copied() {
                return WindowCheck::Exceeded { count, oldest };
            }
        }

        log.push_back(now);
        WindowCheck::Admitted { prior_count: count }
    }

    /// Remove logs whose newest entry is at or before `cutoff`.
    ///
    /// Returns the number of keys dropped.
    pub fn evict_idle(&self, cutoff: DateTime<Utc>) -> usize {
        let before = self.logs.len();
        self.logs
            .retain(|_, log| log.back().is_some_and(|newest| *newest > cutoff));
        before.saturating_sub(self.logs.len())
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.logs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.logs.is_empty()
    }

    pub fn clear(&self) {
        self.logs.clear();
    }
}

/// Drop entries at or before `window_start`.
fn prune(log: &mut VecDeque<DateTime<Utc>>, window_start: DateTime<Utc>) {
    while log.front().is_some_and(|ts| *ts <= window_start) {
        log.pop_front();
    }
}

//! Per-client quota violation counts.

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use super::key::ClientKey;

#[derive(Debug, Clone, Copy)]
struct ViolationEntry {
    count: u32,
    last_seen: DateTime<Utc>,
}

/// Counts quota violations per client.
///
/// Counts only go up; they return to zero when the engine escalates the
/// client into a block. There is no time-based decay, so violations spread
/// over unrelated periods still add up.
#[derive(Debug, Default)]
pub struct ViolationTracker {
    counts: DashMap<ClientKey, ViolationEntry>,
}

impl ViolationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one violation and return the new count.
    pub fn record_violation(&self, client: &ClientKey, now: DateTime<Utc>) -> u32 {
        let mut entry = self
            .counts
            .entry(client.clone())
            .or_insert(ViolationEntry { count: 0, last_seen: now });
        entry.count = entry.count.saturating_add(1);
        entry.last_seen = now;
        entry.count
    }

    pub fn reset_violations(&self, client: &ClientKey) {
        self.counts.remove(client);
    }

    /// Current count for `client`.
    pub fn violations(&self, client: &ClientKey) -> u32 {
        self.counts.get(client).map(|e| e.count).unwrap_or(0)
    }

    /// Forget clients whose last violation is at or before `cutoff`.
    pub fn evict_idle(&self, cutoff: DateTime<Utc>) -> usize {
        let before = self.counts.len();
        self.counts.retain(|_, entry| entry.last_seen > cutoff);
        before.saturating_sub(self.counts.len())
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn clear(&self) {
        self.counts.clear();
    }
}

//! Temporary client blocks.

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;

use super::key::ClientKey;

/// Tracks clients that are blocked outright until some instant.
///
/// A record is logically gone once `now >= block_until`; expired records are
/// removed when read and by [`BlockStore::evict_expired`].
#[derive(Debug, Default)]
pub struct BlockStore {
    blocks: DashMap<ClientKey, DateTime<Utc>>,
}

impl BlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block `client` for `duration` from `now`, replacing any earlier block.
    ///
    /// A duration past the representable range blocks until the end of time.
    pub fn block(&self, client: &ClientKey, now: DateTime<Utc>, duration: TimeDelta) -> DateTime<Utc> {
        let until = now.checked_add_signed(duration).unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.blocks.insert(client.clone(), until);
        until
    }

    /// Whether `client` is blocked at `now`. Removes the record if it expired.
    pub fn is_blocked(&self, client: &ClientKey, now: DateTime<Utc>) -> bool {
        let expired = match self.blocks.get(client) {
            Some(until) => now >= *until,
            None => return false,
        };

        if expired {
            self.blocks.remove_if(client, |_, until| now >= *until);
            return false;
        }
        true
    }

    /// Whole seconds until the block lifts, rounded up. Zero when not blocked.
    pub fn remaining_seconds(&self, client: &ClientKey, now: DateTime<Utc>) -> u64 {
        self.blocks
            .get(client)
            .map(|until| ceil_secs(*until - now))
            .unwrap_or(0)
    }

    /// Remove every expired block. Returns the number removed.
    pub fn evict_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.blocks.len();
        self.blocks.retain(|_, until| now < *until);
        before.saturating_sub(self.blocks.len())
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn clear(&self) {
        self.blocks.clear();
    }
}

fn ceil_secs(delta: TimeDelta) -> u64 {
    let millis = delta.num_milliseconds();
    if millis <= 0 {
        0
    } else {
        (millis as u64).div_ceil(1000)
    }
}

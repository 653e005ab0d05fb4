//! In-memory record of posts already handled, capped by eviction.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

/// Composite key: community id + post id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SeenKey {
    pub channel_id: i64,
    pub post_id: i64,
}

impl SeenKey {
    pub fn new(channel_id: i64, post_id: i64) -> Self {
        Self {
            channel_id,
            post_id,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct SeenEntry {
    first_seen: DateTime<Utc>,
    // insertion order, breaks timestamp ties
    seq: u64,
}

/// Single-owner store; the poller is the only writer.
#[derive(Debug, Default)]
pub struct DedupStore {
    entries: HashMap<SeenKey, SeenEntry>,
    next_seq: u64,
}

impl DedupStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_new(&self, channel_id: i64, post_id: i64) -> bool {
        !self.entries.contains_key(&SeenKey::new(channel_id, post_id))
    }

    /// Idempotent. Re-marking keeps the original first-seen time and order.
    /// Returns true if the key was not present before.
    pub fn mark_seen(&mut self, channel_id: i64, post_id: i64, now: DateTime<Utc>) -> bool {
        let key = SeenKey::new(channel_id, post_id);
        if self.entries.contains_key(&key) {
            return false;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(
            key,
            SeenEntry {
                first_seen: now,
                seq,
            },
        );
        true
    }

    /// When more than `high_water` entries are held, drop the oldest (by
    /// first-seen, then insertion order) until `low_water` remain.
    /// Returns how many entries were evicted.
    pub fn prune(&mut self, high_water: usize, low_water: usize) -> usize {
        let len = self.entries.len();
        if len <= high_water {
            return 0;
        }
        let keep = low_water.min(high_water);
        let excess = len - keep;

        let mut by_age: Vec<(SeenKey, SeenEntry)> =
            self.entries.iter().map(|(k, e)| (*k, *e)).collect();
        by_age.sort_by_key(|(_, e)| (e.first_seen, e.seq));

        for (key, _) in by_age.into_iter().take(excess) {
            self.entries.remove(&key);
        }
        excess
    }

    pub fn first_seen(&self, channel_id: i64, post_id: i64) -> Option<DateTime<Utc>> {
        self.entries
            .get(&SeenKey::new(channel_id, post_id))
            .map(|e| e.first_seen)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

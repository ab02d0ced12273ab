//! LRU cache over `(session, timestamp) -> SystemState` (spec §4.6 "Cache").
//!
//! Invalidation is deliberately coarse: any event landing in a session
//! invalidates every cached entry for that session, rather than tracking
//! which cached ranges the new event actually falls inside.

use std::collections::HashMap;

use uuid::Uuid;

use trace_core::SystemState;

pub const DEFAULT_CAPACITY: usize = 100;

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
struct CacheKey {
    session_id: Uuid,
    timestamp: i64,
}

/// Single-lock LRU keyed by `(session_id, timestamp)`. Recency is tracked
/// with an explicit access counter rather than a linked list; eviction
/// scans for the minimum, which is fine at this capacity.
pub struct StateCache {
    capacity: usize,
    entries: HashMap<CacheKey, (SystemState, u64)>,
    clock: u64,
}

impl StateCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::new(),
            clock: 0,
        }
    }

    pub fn get(&mut self, session_id: Uuid, timestamp: i64) -> Option<SystemState> {
        let key = CacheKey { session_id, timestamp };
        self.clock += 1;
        let tick = self.clock;
        let entry = self.entries.get_mut(&key)?;
        entry.1 = tick;
        Some(entry.0.clone())
    }

    pub fn put(&mut self, session_id: Uuid, timestamp: i64, state: SystemState) {
        let key = CacheKey { session_id, timestamp };
        self.clock += 1;
        let tick = self.clock;

        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            if let Some(evict_key) = self
                .entries
                .iter()
                .min_by_key(|(_, (_, last_used))| *last_used)
                .map(|(k, _)| *k)
            {
                self.entries.remove(&evict_key);
            }
        }
        self.entries.insert(key, (state, tick));
    }

    /// Drops every cached entry for `session_id` (spec §4.6 "simple scheme:
    /// invalidate all entries for the session").
    pub fn invalidate_session(&mut self, session_id: Uuid) {
        self.entries.retain(|k, _| k.session_id != session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_after_put_hits() {
        let mut cache = StateCache::new(2);
        let session = Uuid::new_v4();
        cache.put(session, 100, SystemState::empty(100));
        assert!(cache.get(session, 100).is_some());
        assert!(cache.get(session, 200).is_none());
    }

    #[test]
    fn eviction_drops_the_least_recently_used_entry() {
        let mut cache = StateCache::new(2);
        let session = Uuid::new_v4();
        cache.put(session, 100, SystemState::empty(100));
        cache.put(session, 200, SystemState::empty(200));
        // touch 100 so 200 becomes the least recently used
        cache.get(session, 100);
        cache.put(session, 300, SystemState::empty(300));

        assert!(cache.get(session, 100).is_some());
        assert!(cache.get(session, 200).is_none());
        assert!(cache.get(session, 300).is_some());
    }

    #[test]
    fn invalidate_session_clears_only_that_session() {
        let mut cache = StateCache::new(10);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        cache.put(a, 100, SystemState::empty(100));
        cache.put(b, 100, SystemState::empty(100));

        cache.invalidate_session(a);

        assert!(cache.get(a, 100).is_none());
        assert!(cache.get(b, 100).is_some());
    }
}

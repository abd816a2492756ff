//! # Engine-wide deduplication window.
//!
//! Events are keyed by `(kind, subject, timestamp bucket)`. A key seen again
//! within `window` is a duplicate; after the window it counts as new.
//!
//! The cache is bounded: when `capacity` keys are held, expired keys are purged
//! first and then the oldest insertions are evicted.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::events::{UpdateEvent, UpdateKind};

/// Content key of an event for deduplication.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub kind: UpdateKind,
    pub subject: String,
    pub bucket: i64,
}

impl DedupKey {
    /// Builds the key of `ev`, truncating its timestamp to `bucket`-sized slots.
    pub fn for_event(ev: &UpdateEvent, bucket: Duration) -> Self {
        let width = (bucket.as_millis() as i64).max(1);
        Self {
            kind: ev.kind(),
            subject: ev.subject().to_string(),
            bucket: ev.timestamp().timestamp_millis().div_euclid(width),
        }
    }
}

impl std::fmt::Display for DedupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.kind, self.subject, self.bucket)
    }
}

#[derive(Debug, Default)]
struct Seen {
    last: HashMap<DedupKey, Instant>,
    order: VecDeque<(DedupKey, Instant)>,
}

impl Seen {
    fn is_live(&self, key: &DedupKey, at: Instant) -> bool {
        self.last.get(key) == Some(&at)
    }
}

/// Time-windowed set of recently seen keys.
#[derive(Debug)]
pub struct DedupCache {
    window: Duration,
    capacity: usize,
    seen: Mutex<Seen>,
}

impl DedupCache {
    pub fn new(window: Duration, capacity: usize) -> Self {
        Self {
            window,
            capacity: capacity.max(1),
            seen: Mutex::new(Seen::default()),
        }
    }

    /// Records `key` at `now`.
    ///
    /// Returns `true` if the key is fresh (not seen within the window), `false`
    /// for a duplicate. Duplicates do not extend the window.
    pub fn check_and_insert(&self, key: DedupKey, now: Instant) -> bool {
        if self.window.is_zero() {
            return true;
        }
        let mut seen = self.seen.lock();
        if let Some(at) = seen.last.get(&key) {
            if now.saturating_duration_since(*at) < self.window {
                return false;
            }
        }

        if seen.last.len() >= self.capacity {
            Self::purge_locked(&mut seen, self.window, now);
            while seen.last.len() >= self.capacity {
                let Some((old, at)) = seen.order.pop_front() else {
                    break;
                };
                if seen.is_live(&old, at) {
                    seen.last.remove(&old);
                }
            }
        }

        seen.last.insert(key.clone(), now);
        seen.order.push_back((key, now));
        true
    }

    /// Forgets `key` so the same event can be published again.
    pub fn forget(&self, key: &DedupKey) {
        self.seen.lock().last.remove(key);
    }

    /// Drops keys older than the window; returns how many were removed.
    pub fn purge_expired(&self, now: Instant) -> usize {
        let mut seen = self.seen.lock();
        Self::purge_locked(&mut seen, self.window, now)
    }

    fn purge_locked(seen: &mut Seen, window: Duration, now: Instant) -> usize {
        let mut removed = 0;
        while let Some((key, at)) = seen.order.front() {
            if now.saturating_duration_since(*at) < window {
                break;
            }
            if seen.is_live(key, *at) {
                let key = key.clone();
                seen.last.remove(&key);
                removed += 1;
            }
            seen.order.pop_front();
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.seen.lock().last.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{CapabilityChange, CapabilityUpdateEvent};
    use chrono::{TimeZone, Utc};

    fn key(cap: &str, secs: i64) -> DedupKey {
        let ev: UpdateEvent = CapabilityUpdateEvent::new(cap, CapabilityChange::Added)
            .at(Utc.timestamp_opt(secs, 0).single().unwrap())
            .into();
        DedupKey::for_event(&ev, Duration::from_secs(1))
    }

    #[test]
    fn test_duplicate_within_window() {
        let cache = DedupCache::new(Duration::from_secs(30), 100);
        let t0 = Instant::now();
        assert!(cache.check_and_insert(key("vision", 100), t0));
        assert!(!cache.check_and_insert(key("vision", 100), t0 + Duration::from_secs(29)));
        assert!(cache.check_and_insert(key("vision", 100), t0 + Duration::from_secs(30)));
    }

    #[test]
    fn test_distinct_subject_or_bucket_is_fresh() {
        let cache = DedupCache::new(Duration::from_secs(30), 100);
        let t0 = Instant::now();
        assert!(cache.check_and_insert(key("vision", 100), t0));
        assert!(cache.check_and_insert(key("audio", 100), t0));
        assert!(cache.check_and_insert(key("vision", 101), t0));
    }

    #[test]
    fn test_purge_and_capacity() {
        let cache = DedupCache::new(Duration::from_secs(10), 2);
        let t0 = Instant::now();
        cache.check_and_insert(key("a", 1), t0);
        cache.check_and_insert(key("b", 1), t0 + Duration::from_secs(5));
        cache.check_and_insert(key("c", 1), t0 + Duration::from_secs(6));
        assert_eq!(cache.len(), 2, "oldest evicted at capacity");
        assert!(cache.check_and_insert(key("a", 1), t0 + Duration::from_secs(6)));

        assert_eq!(cache.purge_expired(t0 + Duration::from_secs(60)), 2);
        assert!(cache.is_empty());
    }
}

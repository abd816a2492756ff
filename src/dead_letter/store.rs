//! # Bounded dead-letter store.
//!
//! Records events that could not be delivered: retries exhausted, a
//! non-retryable error, or a failed replay. The store is a FIFO ring with a
//! single append point; once `capacity` is reached the oldest record is
//! evicted before the new one is appended.
//!
//! ```text
//! add(r) ──► [ oldest ... newest ] ──► evict front when len == capacity
//! page(limit, offset) reads from the newest end
//! ```

use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DeliveryError;
use crate::events::UpdateEvent;
use crate::registry::SubscriptionId;

/// Why an event ended up in the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadLetterReason {
    /// Every retry failed.
    MaxRetriesExceeded,
    /// The error was not retryable (invalid payload, auth, unknown target, ...).
    NonRetryable,
    /// A manual or automatic replay failed again.
    ReplayFailed,
}

impl DeadLetterReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeadLetterReason::MaxRetriesExceeded => "max_retries_exceeded",
            DeadLetterReason::NonRetryable => "non_retryable",
            DeadLetterReason::ReplayFailed => "replay_failed",
        }
    }
}

impl fmt::Display for DeadLetterReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One undeliverable event.
#[derive(Clone, Debug, PartialEq)]
pub struct DeadLetterRecord {
    /// Record id (used by `retry_dead_letter`).
    pub id: Uuid,
    pub subscription_id: SubscriptionId,
    /// Id assigned to the event when it was published.
    pub event_id: Uuid,
    pub event: UpdateEvent,
    /// Error of the last attempt.
    pub error: DeliveryError,
    /// Delivery attempts made, replays included.
    pub attempts: u32,
    pub reason: DeadLetterReason,
    pub at: DateTime<Utc>,
}

impl DeadLetterRecord {
    pub fn new(
        subscription_id: SubscriptionId,
        event_id: Uuid,
        event: UpdateEvent,
        error: DeliveryError,
        attempts: u32,
        reason: DeadLetterReason,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            subscription_id,
            event_id,
            event,
            error,
            attempts,
            reason,
            at: Utc::now(),
        }
    }
}

/// Bounded FIFO of [`DeadLetterRecord`]s, safe for concurrent appenders.
#[derive(Debug)]
pub struct DeadLetterStore {
    capacity: usize,
    records: Mutex<VecDeque<DeadLetterRecord>>,
}

impl DeadLetterStore {
    /// Creates a store holding at most `capacity` records (clamped to at least 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            records: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
        }
    }

    /// Appends a record; returns the evicted oldest record if the store was full.
    pub fn add(&self, record: DeadLetterRecord) -> Option<DeadLetterRecord> {
        let mut records = self.records.lock();
        let evicted = if records.len() >= self.capacity {
            records.pop_front()
        } else {
            None
        };
        records.push_back(record);
        evicted
    }

    /// Newest-first page of records.
    pub fn page(&self, limit: usize, offset: usize) -> Vec<DeadLetterRecord> {
        self.records
            .lock()
            .iter()
            .rev()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Removes and returns the record with `id`.
    pub fn take(&self, id: Uuid) -> Option<DeadLetterRecord> {
        let mut records = self.records.lock();
        let pos = records.iter().position(|r| r.id == id)?;
        records.remove(pos)
    }

    /// Subscription the record with `id` belongs to, without removing it.
    pub fn subscription_of(&self, id: Uuid) -> Option<SubscriptionId> {
        self.records
            .lock()
            .iter()
            .find(|r| r.id == id)
            .map(|r| r.subscription_id)
    }

    /// Ids of records with the given reason, oldest first.
    pub fn ids_with_reason(&self, reason: DeadLetterReason) -> Vec<Uuid> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.reason == reason)
            .map(|r| r.id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ModelChange, ModelUpdateEvent};

    fn record(model: &str) -> DeadLetterRecord {
        DeadLetterRecord::new(
            SubscriptionId::new(),
            Uuid::new_v4(),
            ModelUpdateEvent::new(model, "openai", ModelChange::Added).into(),
            DeliveryError::transient("reset"),
            4,
            DeadLetterReason::MaxRetriesExceeded,
        )
    }

    fn subjects(records: &[DeadLetterRecord]) -> Vec<String> {
        records.iter().map(|r| r.event.subject().to_string()).collect()
    }

    #[test]
    fn test_bounded_evicts_oldest_first() {
        let store = DeadLetterStore::new(3);
        for m in ["a", "b", "c"] {
            assert!(store.add(record(m)).is_none());
        }
        let evicted = store.add(record("d")).expect("full store evicts");
        assert_eq!(evicted.event.subject(), "a");
        assert_eq!(store.len(), 3);
        assert_eq!(subjects(&store.page(10, 0)), vec!["d", "c", "b"]);
    }

    #[test]
    fn test_page_newest_first_with_offset() {
        let store = DeadLetterStore::new(10);
        for m in ["a", "b", "c", "d", "e"] {
            store.add(record(m));
        }
        assert_eq!(subjects(&store.page(2, 1)), vec!["d", "c"]);
        assert!(store.page(2, 10).is_empty());
    }

    #[test]
    fn test_take_removes_once() {
        let store = DeadLetterStore::new(10);
        let r = record("a");
        let id = r.id;
        store.add(r);
        assert!(store.take(id).is_some());
        assert!(store.take(id).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_subscription_of_leaves_the_record_in_place() {
        let store = DeadLetterStore::new(10);
        let first = record("a");
        let (id, sub) = (first.id, first.subscription_id);
        store.add(first);
        store.add(record("b"));

        assert_eq!(store.subscription_of(id), Some(sub));
        assert_eq!(store.subscription_of(Uuid::new_v4()), None);
        assert_eq!(subjects(&store.page(10, 0)), vec!["b", "a"]);
    }
}

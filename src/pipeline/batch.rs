//! # Batches and the rule that closes them.
//!
//! A [`Batch`] is an ordered group of events for one subscription (or a single
//! broadcast). [`BatchPolicy`] decides when queued events form a batch:
//!
//! ```text
//! due  ⇔  queued ≥ max_size
//!      ∨  now − first_enqueued ≥ max_wait
//!      ∨  an immediate-flush event is queued
//! ```
//!
//! The payload size of a batch is the sum of its events' JSON lengths; batches
//! above the compression threshold are flagged `compressed` (the codec itself
//! belongs to the transport).

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use uuid::Uuid;

use crate::events::{DataFrame, UpdateEvent};
use crate::pipeline::priority::Priority;
use crate::registry::SubscriptionId;

/// An accepted event, shared by every subscription it was queued for.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedEvent {
    /// Id assigned at publish time.
    pub id: Uuid,
    pub event: UpdateEvent,
    /// Length of the event's JSON encoding.
    pub encoded_len: usize,
    pub received_at: DateTime<Utc>,
}

impl PublishedEvent {
    pub fn new(event: UpdateEvent) -> Self {
        Self::with_id(Uuid::new_v4(), event)
    }

    /// Rebuilds an event under its original id (dead-letter replay).
    pub fn with_id(id: Uuid, event: UpdateEvent) -> Self {
        let encoded_len = serde_json::to_vec(&event).map(|v| v.len()).unwrap_or(0);
        Self {
            id,
            event,
            encoded_len,
            received_at: Utc::now(),
        }
    }
}

/// Size/time closing rule for a subscription's queued events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPolicy {
    /// Events per batch; `1` disables batching.
    pub max_size: usize,
    /// Longest an event waits for its batch to fill.
    pub max_wait: Duration,
}

impl BatchPolicy {
    pub fn new(max_size: usize, max_wait: Duration) -> Self {
        Self {
            max_size: max_size.max(1),
            max_wait,
        }
    }

    /// Whether `queued` events whose oldest was enqueued at `first_enqueued` must flush now.
    pub fn is_due(&self, queued: usize, first_enqueued: Instant, immediate: bool, now: Instant) -> bool {
        queued > 0
            && (immediate
                || queued >= self.max_size
                || now.saturating_duration_since(first_enqueued) >= self.max_wait)
    }

    /// When a batch whose oldest event arrived at `first_enqueued` becomes due by time.
    pub fn deadline(&self, first_enqueued: Instant) -> Instant {
        first_enqueued + self.max_wait
    }
}

/// Ordered group of events delivered together.
#[derive(Debug, Clone)]
pub struct Batch {
    pub id: Uuid,
    /// Owning subscription; `None` for direct broadcasts.
    pub subscription_id: Option<SubscriptionId>,
    pub priority: Priority,
    pub events: Vec<Arc<PublishedEvent>>,
    pub created_at: DateTime<Utc>,
    /// Sum of the events' encoded lengths.
    pub size_bytes: usize,
    /// Set when `size_bytes` exceeds the compression threshold.
    pub compressed: bool,
}

impl Batch {
    pub fn new(
        subscription_id: Option<SubscriptionId>,
        priority: Priority,
        events: Vec<Arc<PublishedEvent>>,
        compression_threshold: Option<usize>,
    ) -> Self {
        let size_bytes = events.iter().map(|e| e.encoded_len).sum();
        let compressed = compression_threshold.is_some_and(|limit| size_bytes > limit);
        Self {
            id: Uuid::new_v4(),
            subscription_id,
            priority,
            events,
            created_at: Utc::now(),
            size_bytes,
            compressed,
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// The events in delivery order.
    pub fn updates(&self) -> impl Iterator<Item = &UpdateEvent> {
        self.events.iter().map(|e| &e.event)
    }

    /// Push-channel data frames for this batch, one per event.
    pub fn frames(&self) -> Vec<DataFrame> {
        self.events
            .iter()
            .map(|e| DataFrame {
                id: e.id,
                kind: e.event.kind(),
                event: e.event.clone(),
                timestamp: e.event.timestamp(),
                compressed: self.compressed,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ProviderStatus, ProviderUpdateEvent, UpdateKind};

    fn published(name: &str) -> Arc<PublishedEvent> {
        Arc::new(PublishedEvent::new(
            ProviderUpdateEvent::new(name, ProviderStatus::Degraded).into(),
        ))
    }

    #[test]
    fn test_policy_closes_on_size_time_or_immediate() {
        let p = BatchPolicy::new(5, Duration::from_secs(5));
        let t0 = Instant::now();
        assert!(!p.is_due(0, t0, true, t0));
        assert!(!p.is_due(3, t0, false, t0 + Duration::from_millis(4999)));
        assert!(p.is_due(3, t0, false, t0 + Duration::from_secs(5)));
        assert!(p.is_due(5, t0, false, t0));
        assert!(p.is_due(1, t0, true, t0));
        assert_eq!(p.deadline(t0), t0 + Duration::from_secs(5));
    }

    #[test]
    fn test_zero_size_means_unbatched() {
        assert_eq!(BatchPolicy::new(0, Duration::ZERO).max_size, 1);
    }

    #[test]
    fn test_compression_flag_and_frames() {
        let events = vec![published("openai"), published("anthropic")];
        let total: usize = events.iter().map(|e| e.encoded_len).sum();
        assert!(total > 0);

        let plain = Batch::new(None, Priority::Normal, events.clone(), Some(total));
        assert!(!plain.compressed);
        let big = Batch::new(None, Priority::Normal, events, Some(total - 1));
        assert!(big.compressed);

        let frames = big.frames();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].kind, UpdateKind::ProviderUpdate);
        assert!(frames.iter().all(|f| f.compressed));

        let json = serde_json::to_value(&frames[1]).unwrap();
        assert_eq!(json["type"], "provider_update");
        assert_eq!(json["event"]["provider_name"], "anthropic");
        assert_eq!(json["compressed"], true);
    }
}

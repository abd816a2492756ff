//! # Engine-wide counters.
//!
//! [`Metrics`] is a set of relaxed atomics updated on the hot paths;
//! [`Metrics::snapshot`] copies them into a serialisable [`MetricsSnapshot`].
//! Gauges other than `connections` (subscriptions, queued events, dead-letter
//! size) are filled in by the engine at snapshot time.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::Serialize;

/// Lock-free engine counters.
#[derive(Debug, Default)]
pub struct Metrics {
    published: AtomicU64,
    deduplicated: AtomicU64,
    unmatched: AtomicU64,
    enqueued: AtomicU64,
    dropped: AtomicU64,
    shed: AtomicU64,
    delivered_batches: AtomicU64,
    delivered_events: AtomicU64,
    failed_attempts: AtomicU64,
    retries: AtomicU64,
    circuit_open_rejections: AtomicU64,
    breaker_opens: AtomicU64,
    dead_lettered: AtomicU64,
    dead_letter_evictions: AtomicU64,
    replayed: AtomicU64,
    broadcasts: AtomicU64,
    pruned_connections: AtomicU64,
    connections: AtomicUsize,
}

impl Metrics {
    /// An event passed validation.
    #[inline]
    pub fn record_published(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    /// An event was suppressed by the dedup window.
    #[inline]
    pub fn record_deduplicated(&self) {
        self.deduplicated.fetch_add(1, Ordering::Relaxed);
    }

    /// An event matched no subscription.
    #[inline]
    pub fn record_unmatched(&self) {
        self.unmatched.fetch_add(1, Ordering::Relaxed);
    }

    /// An event was queued for one subscription.
    #[inline]
    pub fn record_enqueued(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    /// An event was dropped by a full queue (evicted or incoming).
    #[inline]
    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// An event was refused by a full queue under `Reject`.
    #[inline]
    pub fn record_shed(&self) {
        self.shed.fetch_add(1, Ordering::Relaxed);
    }

    /// A batch was delivered.
    #[inline]
    pub fn record_delivered_batch(&self) {
        self.delivered_batches.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_delivered_events(&self, n: usize) {
        self.delivered_events.fetch_add(n as u64, Ordering::Relaxed);
    }

    /// A delivery attempt failed.
    #[inline]
    pub fn record_failed_attempt(&self) {
        self.failed_attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// A retry was scheduled.
    #[inline]
    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    /// An attempt was refused by an open breaker.
    #[inline]
    pub fn record_circuit_open_rejection(&self) {
        self.circuit_open_rejections.fetch_add(1, Ordering::Relaxed);
    }

    /// A breaker opened.
    #[inline]
    pub fn record_breaker_open(&self) {
        self.breaker_opens.fetch_add(1, Ordering::Relaxed);
    }

    /// An event went to the dead-letter store.
    #[inline]
    pub fn record_dead_lettered(&self) {
        self.dead_lettered.fetch_add(1, Ordering::Relaxed);
    }

    /// A dead letter was evicted by a newer one.
    #[inline]
    pub fn record_dead_letter_eviction(&self) {
        self.dead_letter_evictions.fetch_add(1, Ordering::Relaxed);
    }

    /// A dead letter was replayed successfully.
    #[inline]
    pub fn record_replayed(&self) {
        self.replayed.fetch_add(1, Ordering::Relaxed);
    }

    /// A direct broadcast was made.
    #[inline]
    pub fn record_broadcast(&self) {
        self.broadcasts.fetch_add(1, Ordering::Relaxed);
    }

    /// A connection was pruned.
    #[inline]
    pub fn record_pruned_connection(&self) {
        self.pruned_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_connections(&self, n: usize) {
        self.connections.store(n, Ordering::Relaxed);
    }

    /// Copies the counters; the engine fills in the remaining gauges.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            published: self.published.load(Ordering::Relaxed),
            deduplicated: self.deduplicated.load(Ordering::Relaxed),
            unmatched: self.unmatched.load(Ordering::Relaxed),
            enqueued: self.enqueued.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            shed: self.shed.load(Ordering::Relaxed),
            delivered_batches: self.delivered_batches.load(Ordering::Relaxed),
            delivered_events: self.delivered_events.load(Ordering::Relaxed),
            failed_attempts: self.failed_attempts.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            circuit_open_rejections: self.circuit_open_rejections.load(Ordering::Relaxed),
            breaker_opens: self.breaker_opens.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            dead_letter_evictions: self.dead_letter_evictions.load(Ordering::Relaxed),
            replayed: self.replayed.load(Ordering::Relaxed),
            broadcasts: self.broadcasts.load(Ordering::Relaxed),
            pruned_connections: self.pruned_connections.load(Ordering::Relaxed),
            connections: self.connections.load(Ordering::Relaxed),
            ..MetricsSnapshot::default()
        }
    }
}

/// Point-in-time copy of [`Metrics`] plus gauges.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub published: u64,
    pub deduplicated: u64,
    pub unmatched: u64,
    pub enqueued: u64,
    pub dropped: u64,
    pub shed: u64,
    pub delivered_batches: u64,
    pub delivered_events: u64,
    pub failed_attempts: u64,
    pub retries: u64,
    pub circuit_open_rejections: u64,
    pub breaker_opens: u64,
    pub dead_lettered: u64,
    pub dead_letter_evictions: u64,
    pub replayed: u64,
    pub broadcasts: u64,
    pub pruned_connections: u64,
    pub connections: usize,
    pub subscriptions: usize,
    pub queued_events: usize,
    pub dead_letters: usize,
}

impl MetricsSnapshot {
    /// Share of delivery attempts that failed (`0.0` without attempts).
    pub fn failure_rate(&self) -> f64 {
        let attempts = self.delivered_batches + self.failed_attempts;
        if attempts == 0 {
            0.0
        } else {
            self.failed_attempts as f64 / attempts as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_and_failure_rate() {
        let m = Metrics::default();
        m.record_delivered_batch();
        m.record_delivered_events(3);
        m.record_failed_attempt();
        m.set_connections(2);

        let s = m.snapshot();
        assert_eq!(s.delivered_batches, 1);
        assert_eq!(s.delivered_events, 3);
        assert_eq!(s.connections, 2);
        assert!((s.failure_rate() - 0.5).abs() < f64::EPSILON);
        assert_eq!(MetricsSnapshot::default().failure_rate(), 0.0);
    }
}

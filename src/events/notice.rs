//! # Engine notices emitted along the delivery pipeline.
//!
//! The [`NoticeKind`] enum classifies notices across four groups:
//! - **Subscription lifecycle**: created, removed, paused, resumed, updated
//! - **Ingest**: deduplicated, dropped on overflow, shed by backpressure
//! - **Delivery**: batch delivered, attempt failed, retry scheduled, breaker transitions,
//!   dead-lettering and replay
//! - **Housekeeping**: pruned connections, observer overflow/panic
//!
//! The [`Notice`] struct carries optional metadata (subscription, connection,
//! attempt, delay, reason, event count).
//!
//! ## Ordering guarantees
//! Each notice has a globally unique sequence number (`seq`) that increases monotonically.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use capnotify::{Notice, NoticeKind};
//!
//! let n = Notice::new(NoticeKind::RetryScheduled)
//!     .with_attempt(2)
//!     .with_delay(Duration::from_millis(400))
//!     .with_reason("connection reset");
//!
//! assert_eq!(n.kind, NoticeKind::RetryScheduled);
//! assert_eq!(n.delay_ms, Some(400));
//! ```

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::dispatch::ConnectionId;
use crate::registry::SubscriptionId;

/// Global sequence counter for notice ordering.
static NOTICE_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of engine notices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    // === Subscription lifecycle ===
    SubscriptionCreated,
    SubscriptionRemoved,
    SubscriptionPaused,
    SubscriptionResumed,
    SubscriptionUpdated,

    // === Ingest ===
    /// Event suppressed by the dedup window (`reason`: dedup key).
    EventDeduplicated,
    /// Oldest lower-priority item evicted from a full queue.
    EventDropped,
    /// Event refused for a subscription whose queue is full.
    EventShed,

    // === Delivery ===
    /// Batch delivered (`events`: batch size, `delay_ms`: latency).
    BatchDelivered,
    /// One delivery attempt failed (`reason`: error, `attempt`: attempt number).
    DeliveryFailed,
    /// Retry scheduled (`delay_ms`: backoff, `attempt`: retry number).
    RetryScheduled,
    CircuitOpened,
    CircuitHalfOpen,
    CircuitClosed,
    /// Events moved to the dead-letter store (`reason`: reason code).
    DeadLettered,
    /// Oldest dead letter evicted because the store is full.
    DeadLetterEvicted,
    /// Dead letter replayed successfully.
    DeadLetterReplayed,

    // === Housekeeping ===
    ConnectionPruned,
    /// Observer queue was full or closed; the notice was dropped for it.
    ObserverOverflow,
    /// Observer panicked while handling a notice.
    ObserverPanicked,
}

/// Engine notice with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`NoticeKind`]
#[derive(Clone, Debug)]
pub struct Notice {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Notice classification.
    pub kind: NoticeKind,

    pub subscription: Option<SubscriptionId>,
    pub connection: Option<ConnectionId>,
    /// Observer name, for observer notices.
    pub observer: Option<&'static str>,
    /// Attempt or retry number.
    pub attempt: Option<u32>,
    /// Backoff or latency in milliseconds (compact).
    pub delay_ms: Option<u32>,
    /// Number of events the notice refers to.
    pub events: Option<usize>,
    /// Human-readable reason (errors, reason codes, dedup keys).
    pub reason: Option<Arc<str>>,
}

impl Notice {
    /// Creates a new notice of the given kind with current timestamp and next sequence number.
    pub fn new(kind: NoticeKind) -> Self {
        Self {
            seq: NOTICE_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            subscription: None,
            connection: None,
            observer: None,
            attempt: None,
            delay_ms: None,
            events: None,
            reason: None,
        }
    }

    #[inline]
    pub fn with_subscription(mut self, id: SubscriptionId) -> Self {
        self.subscription = Some(id);
        self
    }

    #[inline]
    pub fn with_connection(mut self, id: ConnectionId) -> Self {
        self.connection = Some(id);
        self
    }

    #[inline]
    pub fn with_attempt(mut self, n: u32) -> Self {
        self.attempt = Some(n);
        self
    }

    /// Attaches a delay or latency (stored as milliseconds).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        let ms = d.as_millis().min(u128::from(u32::MAX)) as u32;
        self.delay_ms = Some(ms);
        self
    }

    #[inline]
    pub fn with_events(mut self, n: usize) -> Self {
        self.events = Some(n);
        self
    }

    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Creates an observer overflow notice.
    #[inline]
    pub fn observer_overflow(observer: &'static str, reason: &'static str) -> Self {
        let mut n = Notice::new(NoticeKind::ObserverOverflow).with_reason(reason);
        n.observer = Some(observer);
        n
    }

    /// Creates an observer panic notice.
    #[inline]
    pub fn observer_panicked(observer: &'static str, info: String) -> Self {
        let mut n = Notice::new(NoticeKind::ObserverPanicked).with_reason(info);
        n.observer = Some(observer);
        n
    }
}

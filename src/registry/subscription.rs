//! # A live subscription.
//!
//! Identity (id, client, type) is fixed at creation. Everything that
//! `update_subscription` may change lives behind one `RwLock`, so concurrent
//! updates of the same id are serialized while readers on the publish path
//! never wait on other subscriptions.
//!
//! Counters are atomics:
//! - `event_count`: events accepted into the mailbox;
//! - `delivered`: events in successfully delivered batches;
//! - `error_count`: events dead-lettered or dropped by overflow.
//!
//! Once a subscription's queue and retries have settled,
//! `event_count == delivered + error_count`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::dispatch::ConnectionId;
use crate::events::UpdateEvent;
use crate::filters::{Combinator, Filter, PredicateSpec};
use crate::pipeline::Mailbox;
use crate::policies::{BreakerBoard, BreakerConfig};

use super::types::{
    DeliveryTunables, SubscriptionId, SubscriptionOptions, SubscriptionStatus, SubscriptionType,
};

/// Mutable settings of a subscription.
#[derive(Debug, Clone)]
pub(crate) struct Settings {
    pub filter: Filter,
    pub target: ConnectionId,
    /// Overrides as requested; `tunables` is derived from them.
    pub options: SubscriptionOptions,
    pub tunables: DeliveryTunables,
}

#[derive(Debug, Default)]
struct Counters {
    event_count: AtomicU64,
    delivered: AtomicU64,
    error_count: AtomicU64,
    attempts: AtomicU64,
    failed_attempts: AtomicU64,
    delivered_batches: AtomicU64,
    latency_micros: AtomicU64,
}

impl Counters {
    fn reset(&self) {
        for c in [
            &self.event_count,
            &self.delivered,
            &self.error_count,
            &self.attempts,
            &self.failed_attempts,
            &self.delivered_batches,
            &self.latency_micros,
        ] {
            c.store(0, Ordering::Relaxed);
        }
    }
}

/// Registered subscription with its mailbox, breakers and counters.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    client_id: String,
    kind: SubscriptionType,
    created_at: DateTime<Utc>,
    settings: RwLock<Settings>,
    paused: AtomicBool,
    pub(crate) mailbox: Mailbox,
    pub(crate) breakers: BreakerBoard,
    counters: Counters,
    activity: Mutex<(DateTime<Utc>, Instant)>,
    cancel: CancellationToken,
}

impl Subscription {
    pub(crate) fn new(
        client_id: String,
        kind: SubscriptionType,
        settings: Settings,
        queue_capacity: usize,
        breaker: BreakerConfig,
        cancel: CancellationToken,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: SubscriptionId::new(),
            client_id,
            kind,
            created_at: now,
            settings: RwLock::new(settings),
            paused: AtomicBool::new(false),
            mailbox: Mailbox::new(queue_capacity),
            breakers: BreakerBoard::new(breaker),
            counters: Counters::default(),
            activity: Mutex::new((now, Instant::now())),
            cancel,
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn kind(&self) -> SubscriptionType {
        self.kind
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn status(&self) -> SubscriptionStatus {
        if self.is_paused() {
            SubscriptionStatus::Paused
        } else {
            SubscriptionStatus::Active
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Sets the paused flag; returns `true` if it changed.
    pub(crate) fn set_paused(&self, paused: bool) -> bool {
        self.paused.swap(paused, Ordering::AcqRel) != paused
    }

    /// Evaluates the subscription's type and filter against `ev`.
    pub fn matches(&self, ev: &UpdateEvent) -> bool {
        self.kind.accepts(ev.kind()) && self.settings.read().filter.matches(ev)
    }

    pub fn target(&self) -> ConnectionId {
        self.settings.read().target.clone()
    }

    pub fn tunables(&self) -> DeliveryTunables {
        self.settings.read().tunables
    }

    pub fn options(&self) -> SubscriptionOptions {
        self.settings.read().options
    }

    /// Applies a settings change under the write lock.
    pub(crate) fn update_settings(&self, f: impl FnOnce(&mut Settings)) {
        let mut settings = self.settings.write();
        f(&mut *settings);
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub(crate) fn touch(&self) {
        *self.activity.lock() = (Utc::now(), Instant::now());
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        self.activity.lock().0
    }

    /// Time since the last publish or delivery for this subscription.
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.activity.lock().1)
    }

    pub(crate) fn record_enqueued(&self) {
        self.counters.event_count.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    pub(crate) fn record_errors(&self, events: usize) {
        self.counters
            .error_count
            .fetch_add(events as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_attempt_failed(&self) {
        self.counters.attempts.fetch_add(1, Ordering::Relaxed);
        self.counters.failed_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_delivered(&self, events: usize, latency: Duration) {
        let c = &self.counters;
        c.attempts.fetch_add(1, Ordering::Relaxed);
        c.delivered.fetch_add(events as u64, Ordering::Relaxed);
        c.delivered_batches.fetch_add(1, Ordering::Relaxed);
        c.latency_micros
            .fetch_add(latency.as_micros().min(u128::from(u64::MAX)) as u64, Ordering::Relaxed);
        self.touch();
    }

    pub(crate) fn reset_stats(&self) {
        self.counters.reset();
    }

    pub fn stats(&self) -> SubscriptionStats {
        let c = &self.counters;
        let batches = c.delivered_batches.load(Ordering::Relaxed);
        let latency = c.latency_micros.load(Ordering::Relaxed);
        SubscriptionStats {
            subscription_id: self.id,
            status: self.status(),
            event_count: c.event_count.load(Ordering::Relaxed),
            delivered: c.delivered.load(Ordering::Relaxed),
            error_count: c.error_count.load(Ordering::Relaxed),
            attempts: c.attempts.load(Ordering::Relaxed),
            failed_attempts: c.failed_attempts.load(Ordering::Relaxed),
            delivered_batches: batches,
            average_delivery_ms: if batches == 0 {
                0.0
            } else {
                latency as f64 / batches as f64 / 1000.0
            },
            queued: self.mailbox.len(),
            breaker_open: self.breakers.any_open(),
            last_activity: self.last_activity(),
        }
    }

    /// Serializable snapshot of identity, settings and stats.
    pub fn info(&self) -> SubscriptionInfo {
        let settings = self.settings.read().clone();
        SubscriptionInfo {
            id: self.id,
            client_id: self.client_id.clone(),
            kind: self.kind,
            status: self.status(),
            combinator: settings.filter.combinator(),
            filters: settings.filter.predicates().iter().map(|p| p.to_spec()).collect(),
            target: settings.target,
            batch_size: settings.tunables.batch.max_size,
            batch_timeout: settings.tunables.batch.max_wait,
            max_retries: settings.tunables.retry.max_retries,
            retry_delay: settings.tunables.retry.backoff.base,
            created_at: self.created_at,
            stats: self.stats(),
        }
    }
}

/// Counters of one subscription.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubscriptionStats {
    pub subscription_id: SubscriptionId,
    pub status: SubscriptionStatus,
    pub event_count: u64,
    pub delivered: u64,
    pub error_count: u64,
    pub attempts: u64,
    pub failed_attempts: u64,
    pub delivered_batches: u64,
    /// Mean latency of successful batch deliveries.
    pub average_delivery_ms: f64,
    /// Events currently waiting in the mailbox.
    pub queued: usize,
    pub breaker_open: bool,
    pub last_activity: DateTime<Utc>,
}

/// Snapshot returned by `get_subscription` and the query operations.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubscriptionInfo {
    pub id: SubscriptionId,
    pub client_id: String,
    #[serde(rename = "type")]
    pub kind: SubscriptionType,
    pub status: SubscriptionStatus,
    pub combinator: Combinator,
    pub filters: Vec<PredicateSpec>,
    pub target: ConnectionId,
    pub batch_size: usize,
    pub batch_timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub created_at: DateTime<Utc>,
    pub stats: SubscriptionStats,
}

/// Aggregate over one client's subscriptions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientStats {
    pub client_id: String,
    pub subscriptions: usize,
    pub active: usize,
    pub paused: usize,
    pub connections: usize,
    pub event_count: u64,
    pub delivered: u64,
    pub error_count: u64,
}

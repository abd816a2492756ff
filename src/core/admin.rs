//! # Operational surface of the engine.
//!
//! Direct broadcasts, metrics and health, dead-letter inspection and replay,
//! housekeeping and shutdown.
//!
//! ## Replay
//! ```text
//! retry_dead_letter(id)
//!   ├─► store.subscription_of(id)           → NotFound
//!   ├─► registry.get(subscription)          → record left in place, NotFound
//!   ├─► store.take(id)                      → NotFound (taken concurrently)
//!   ├─► subscription.breakers.reset()
//!   └─► one attempt to the current target
//!         ├─ Ok  → DeadLetterReplayed
//!         └─ Err → record re-added: attempts + 1, reason replay_failed
//! ```
//!
//! ## Shutdown
//! ```text
//! shutdown()
//!   ├─► closed = true (publish/subscribe now fail with Closed)
//!   ├─► runtime_token.cancel()  → workers, heartbeat, cleanup, replay, listener
//!   ├─► join all within shutdown_grace, abort the rest
//!   └─► drain observer queues
//! ```

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{info, warn};
use uuid::Uuid;

use crate::core::delivery;
use crate::core::health::{self, HealthInputs, HealthReport};
use crate::core::metrics::MetricsSnapshot;
use crate::dead_letter::{DeadLetterReason, DeadLetterRecord};
use crate::dispatch::{BroadcastReport, ConnectionId, DeliveryResult};
use crate::error::{DeliveryError, NotifyError};
use crate::events::{Notice, NoticeKind, UpdateEvent};
use crate::pipeline::{Batch, Priority, PublishedEvent};
use crate::registry::{ClientStats, SubscriptionId, SubscriptionStats, SubscriptionStatus};

use super::engine::NotificationEngine;

/// Outcome of a dead-letter replay that found its record and subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplayOutcome {
    Delivered,
    /// The attempt failed and the record went back to the store.
    Failed(DeliveryError),
}

impl ReplayOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, ReplayOutcome::Delivered)
    }
}

/// Result of one [`NotificationEngine::cleanup`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub idle_subscriptions_removed: usize,
    pub dedup_entries_purged: usize,
}

/// Result of [`NotificationEngine::shutdown`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    /// Tasks that stopped within the grace period.
    pub joined: usize,
    /// Tasks still running at the deadline, aborted.
    pub aborted: usize,
}

impl ShutdownReport {
    pub fn is_graceful(&self) -> bool {
        self.aborted == 0
    }
}

impl NotificationEngine {
    // ---- direct delivery ----

    /// Delivers `event` immediately, bypassing queues, batching and retries.
    ///
    /// With `subscriptions = None` every registered connection receives it; otherwise
    /// the distinct targets of the given (active) subscriptions do.
    pub async fn broadcast(
        &self,
        event: impl Into<UpdateEvent>,
        subscriptions: Option<&[SubscriptionId]>,
    ) -> Result<Vec<DeliveryResult>, NotifyError> {
        self.ensure_open()?;
        let event = event.into();
        event.validate()?;

        let targets: Vec<ConnectionId> = match subscriptions {
            None => self.ctx.hub.ids(),
            Some(ids) => {
                let mut targets = BTreeSet::new();
                for id in ids {
                    let sub = self
                        .registry
                        .get(*id)
                        .ok_or_else(|| NotifyError::not_found("subscription", id))?;
                    if !sub.is_paused() {
                        targets.insert(sub.target());
                    }
                }
                targets.into_iter().collect()
            }
        };

        let batch = self.direct_batch(event);
        Ok(self.ctx.hub.broadcast(&batch, &targets).await)
    }

    /// Delivers `event` to every connection of `client_id`, pruning failed ones on
    /// partial failure.
    pub async fn broadcast_to_client(
        &self,
        client_id: &str,
        event: impl Into<UpdateEvent>,
    ) -> Result<BroadcastReport, NotifyError> {
        self.ensure_open()?;
        let event = event.into();
        event.validate()?;
        let batch = self.direct_batch(event);
        Ok(self.ctx.hub.broadcast_to_client(client_id, &batch).await)
    }

    fn direct_batch(&self, event: UpdateEvent) -> Batch {
        let priority = Priority::for_event(&event);
        Batch::new(
            None,
            priority,
            vec![Arc::new(PublishedEvent::new(event))],
            self.cfg.compression_threshold,
        )
    }

    // ---- observability ----

    /// Engine counters plus current gauges.
    pub fn get_metrics(&self) -> MetricsSnapshot {
        let subs = self.registry.all();
        let mut snap = self.ctx.metrics.snapshot();
        snap.subscriptions = subs.len();
        snap.queued_events = subs.iter().map(|s| s.mailbox.len()).sum();
        snap.dead_letters = self.ctx.dead_letters.len();
        snap.connections = self.ctx.hub.len();
        snap
    }

    pub fn get_subscription_stats(&self, id: SubscriptionId) -> Option<SubscriptionStats> {
        self.registry.get(id).map(|s| s.stats())
    }

    /// Aggregate over the client's subscriptions; `None` if the client has neither
    /// subscriptions nor connections.
    pub fn get_client_stats(&self, client_id: &str) -> Option<ClientStats> {
        let subs = self.registry.by_client(client_id);
        let connections = self.ctx.hub.client_connections(client_id).len();
        if subs.is_empty() && connections == 0 {
            return None;
        }

        let mut out = ClientStats {
            client_id: client_id.to_string(),
            subscriptions: subs.len(),
            active: 0,
            paused: 0,
            connections,
            event_count: 0,
            delivered: 0,
            error_count: 0,
        };
        for s in subs.iter().map(|s| s.stats()) {
            if s.status == SubscriptionStatus::Paused {
                out.paused += 1;
            } else {
                out.active += 1;
            }
            out.event_count += s.event_count;
            out.delivered += s.delivered;
            out.error_count += s.error_count;
        }
        Some(out)
    }

    pub fn health_check(&self) -> HealthReport {
        let subs = self.registry.all();
        let metrics = self.ctx.metrics.snapshot();
        health::assess(&HealthInputs {
            closed: self.is_closed(),
            subscriptions: subs.len(),
            max_subscriptions: self.cfg.max_subscriptions,
            delivery_attempts: metrics.delivered_batches + metrics.failed_attempts,
            failure_rate: metrics.failure_rate(),
            error_rate_threshold: self.cfg.error_rate_threshold,
            dead_letters: self.ctx.dead_letters.len(),
            dead_letter_capacity: self.ctx.dead_letters.capacity(),
            open_breakers: subs.iter().filter(|s| s.breakers.any_open()).count(),
            saturated_queues: subs
                .iter()
                .filter(|s| health::queue_saturated(s.mailbox.len(), self.cfg.queue_capacity))
                .count(),
        })
    }

    // ---- dead letters ----

    /// Dead letters, newest first.
    pub fn get_dead_letter_queue(&self, limit: usize, offset: usize) -> Vec<DeadLetterRecord> {
        self.ctx.dead_letters.page(limit, offset)
    }

    /// Replays one dead letter with a single fresh attempt.
    ///
    /// # Errors
    /// [`NotifyError::NotFound`] if the record or its subscription no longer exists
    /// (in the latter case the record stays in the store).
    pub async fn retry_dead_letter(&self, id: Uuid) -> Result<ReplayOutcome, NotifyError> {
        let sub_id = self
            .ctx
            .dead_letters
            .subscription_of(id)
            .ok_or_else(|| NotifyError::not_found("dead letter", id))?;
        let sub = self
            .registry
            .get(sub_id)
            .ok_or_else(|| NotifyError::not_found("subscription", sub_id))?;
        let record = self
            .ctx
            .dead_letters
            .take(id)
            .ok_or_else(|| NotifyError::not_found("dead letter", id))?;

        sub.breakers.reset();
        let batch = Batch::new(
            Some(sub.id()),
            Priority::for_event(&record.event),
            vec![Arc::new(PublishedEvent::with_id(record.event_id, record.event.clone()))],
            self.cfg.compression_threshold,
        );
        let target = sub.target();
        let attempt = record.attempts.saturating_add(1);

        match delivery::attempt(&self.ctx, &sub, &batch, &target, attempt).await {
            Ok(_) => {
                self.ctx.metrics.record_replayed();
                info!(dead_letter = %id, subscription = %sub.id(), "dead letter replayed");
                self.ctx.bus.publish(
                    Notice::new(NoticeKind::DeadLetterReplayed)
                        .with_subscription(sub.id())
                        .with_connection(target)
                        .with_events(1)
                        .with_reason(id.to_string()),
                );
                Ok(ReplayOutcome::Delivered)
            }
            Err(err) => {
                warn!(dead_letter = %id, subscription = %sub.id(), error = %err, "dead letter replay failed");
                let retained = DeadLetterRecord {
                    error: err.clone(),
                    attempts: attempt,
                    reason: DeadLetterReason::ReplayFailed,
                    at: Utc::now(),
                    ..record
                };
                if let Some(evicted) = self.ctx.dead_letters.add(retained) {
                    self.ctx.metrics.record_dead_letter_eviction();
                    self.ctx.bus.publish(
                        Notice::new(NoticeKind::DeadLetterEvicted)
                            .with_subscription(evicted.subscription_id)
                            .with_reason(evicted.id.to_string()),
                    );
                }
                Ok(ReplayOutcome::Failed(err))
            }
        }
    }

    /// Replays every `max_retries_exceeded` dead letter once; returns how many succeeded.
    pub async fn replay_dead_letters(&self) -> usize {
        let ids = self
            .ctx
            .dead_letters
            .ids_with_reason(DeadLetterReason::MaxRetriesExceeded);
        let mut delivered = 0;
        for id in ids {
            if self.is_closed() {
                break;
            }
            if let Ok(ReplayOutcome::Delivered) = self.retry_dead_letter(id).await {
                delivered += 1;
            }
        }
        delivered
    }

    // ---- housekeeping ----

    /// Removes idle subscriptions (if an idle timeout is configured) and purges
    /// expired dedup entries.
    pub fn cleanup(&self) -> CleanupReport {
        let now = Instant::now();
        let mut report = CleanupReport::default();

        if let Some(idle) = self.cfg.idle_timeout {
            for sub in self.registry.all() {
                if sub.mailbox.is_empty() && sub.idle_for(now) >= idle && self.unsubscribe(sub.id()) {
                    report.idle_subscriptions_removed += 1;
                }
            }
        }
        report.dedup_entries_purged = self.dedup.purge_expired(now);

        if report.idle_subscriptions_removed > 0 {
            info!(removed = report.idle_subscriptions_removed, "idle subscriptions removed");
        }
        report
    }

    /// Stops the engine: no new work is accepted, every worker and background task is
    /// cancelled and joined within `shutdown_grace`; stragglers are aborted.
    ///
    /// Calling it again is a no-op returning an empty report.
    pub async fn shutdown(&self) -> ShutdownReport {
        if !self.close() {
            return ShutdownReport::default();
        }
        info!("shutdown requested");
        self.runtime_token.cancel();

        let mut handles: Vec<JoinHandle<()>> = self.workers.lock().drain().map(|(_, h)| h).collect();
        handles.extend(self.background.lock().drain(..));

        let total = handles.len();
        let aborts: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();
        let report = match time::timeout(self.cfg.shutdown_grace, join_all(handles)).await {
            Ok(_) => ShutdownReport {
                joined: total,
                aborted: 0,
            },
            Err(_) => {
                let aborted = aborts.iter().filter(|a| !a.is_finished()).count();
                aborts.iter().for_each(|a| a.abort());
                warn!(aborted, grace_ms = self.cfg.shutdown_grace.as_millis() as u64, "shutdown grace exceeded");
                ShutdownReport {
                    joined: total - aborted,
                    aborted,
                }
            }
        };

        let observers = self.observers.lock().take();
        if let Some(set) = observers.and_then(|set| Arc::try_unwrap(set).ok()) {
            set.shutdown().await;
        }
        info!(joined = report.joined, aborted = report.aborted, "engine stopped");
        report
    }
}

//! # One delivery attempt, guarded by the subscription's circuit breaker.
//!
//! ```text
//! attempt(batch, target):
//!   breakers.try_acquire(target)
//!     ├─ Err(wait)  → CircuitOpen { retry_in: wait }   (connection untouched)
//!     ├─ Probe      → publish CircuitHalfOpen
//!     └─ Allowed
//!   hub.deliver(target, batch)
//!     ├─ Ok(latency) → breakers.on_success → [CircuitClosed] → BatchDelivered
//!     └─ Err(e)      → breakers.on_failure → [CircuitOpened] → DeliveryFailed
//! ```
//!
//! ## Rules
//! - Publishes **exactly one** terminal notice per attempt: `BatchDelivered` or `DeliveryFailed`.
//! - A fail-fast rejection does not count towards the breaker threshold.
//! - Engine metrics are recorded here; subscription counters are left to the caller,
//!   because replays of dead letters must not touch them.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, warn};

use crate::core::Metrics;
use crate::dead_letter::{DeadLetterReason, DeadLetterRecord, DeadLetterStore};
use crate::dispatch::{ConnectionHub, ConnectionId};
use crate::error::DeliveryError;
use crate::events::{Bus, Notice, NoticeKind};
use crate::pipeline::Batch;
use crate::policies::{Admission, Transition};
use crate::registry::Subscription;

/// Shared handles every delivery needs.
pub(crate) struct DeliveryContext {
    pub hub: Arc<ConnectionHub>,
    pub dead_letters: Arc<DeadLetterStore>,
    pub metrics: Arc<Metrics>,
    pub bus: Bus,
    pub compression_threshold: Option<usize>,
}

/// Executes attempt number `attempt` of delivering `batch` to `target`.
pub(crate) async fn attempt(
    ctx: &DeliveryContext,
    sub: &Subscription,
    batch: &Batch,
    target: &ConnectionId,
    attempt: u32,
) -> Result<Duration, DeliveryError> {
    match sub.breakers.try_acquire(target, Instant::now()) {
        Err(retry_in) => {
            ctx.metrics.record_circuit_open_rejection();
            ctx.metrics.record_failed_attempt();
            let err = DeliveryError::CircuitOpen { retry_in };
            publish_failed(ctx, sub, target, attempt, &err);
            return Err(err);
        }
        Ok(Admission::Probe) => {
            info!(subscription = %sub.id(), connection = %target, "circuit half-open, probing");
            ctx.bus.publish(
                Notice::new(NoticeKind::CircuitHalfOpen)
                    .with_subscription(sub.id())
                    .with_connection(target.clone()),
            );
        }
        Ok(Admission::Allowed) => {}
    }

    match ctx.hub.deliver(target, batch).await {
        Ok(latency) => {
            if sub.breakers.on_success(target) {
                info!(subscription = %sub.id(), connection = %target, "circuit closed");
                ctx.bus.publish(
                    Notice::new(NoticeKind::CircuitClosed)
                        .with_subscription(sub.id())
                        .with_connection(target.clone()),
                );
            }
            ctx.metrics.record_delivered_batch();
            ctx.metrics.record_delivered_events(batch.len());
            ctx.bus.publish(
                Notice::new(NoticeKind::BatchDelivered)
                    .with_subscription(sub.id())
                    .with_connection(target.clone())
                    .with_attempt(attempt)
                    .with_events(batch.len())
                    .with_delay(latency),
            );
            Ok(latency)
        }
        Err(err) => {
            if sub.breakers.on_failure(target, Instant::now()) == Transition::Opened {
                ctx.metrics.record_breaker_open();
                warn!(
                    subscription = %sub.id(),
                    connection = %target,
                    error = %err,
                    "circuit opened"
                );
                ctx.bus.publish(
                    Notice::new(NoticeKind::CircuitOpened)
                        .with_subscription(sub.id())
                        .with_connection(target.clone())
                        .with_reason(err.to_string()),
                );
            }
            ctx.metrics.record_failed_attempt();
            publish_failed(ctx, sub, target, attempt, &err);
            Err(err)
        }
    }
}

fn publish_failed(
    ctx: &DeliveryContext,
    sub: &Subscription,
    target: &ConnectionId,
    attempt: u32,
    err: &DeliveryError,
) {
    ctx.bus.publish(
        Notice::new(NoticeKind::DeliveryFailed)
            .with_subscription(sub.id())
            .with_connection(target.clone())
            .with_attempt(attempt)
            .with_reason(err.to_string()),
    );
}

/// Moves every event of `batch` to the dead-letter store.
pub(crate) fn dead_letter(
    ctx: &DeliveryContext,
    sub: &Subscription,
    batch: &Batch,
    error: &DeliveryError,
    attempts: u32,
    reason: DeadLetterReason,
) {
    for ev in &batch.events {
        let record = DeadLetterRecord::new(
            sub.id(),
            ev.id,
            ev.event.clone(),
            error.clone(),
            attempts,
            reason,
        );
        ctx.metrics.record_dead_lettered();
        if let Some(evicted) = ctx.dead_letters.add(record) {
            ctx.metrics.record_dead_letter_eviction();
            ctx.bus.publish(
                Notice::new(NoticeKind::DeadLetterEvicted)
                    .with_subscription(evicted.subscription_id)
                    .with_reason(evicted.id.to_string()),
            );
        }
    }
    sub.record_errors(batch.len());

    warn!(
        subscription = %sub.id(),
        events = batch.len(),
        attempts,
        reason = %reason,
        error = %error,
        "batch dead-lettered"
    );
    ctx.bus.publish(
        Notice::new(NoticeKind::DeadLettered)
            .with_subscription(sub.id())
            .with_attempt(attempts)
            .with_events(batch.len())
            .with_reason(reason.as_str()),
    );
}

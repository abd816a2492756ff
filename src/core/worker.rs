//! # DeliveryWorker: the per-subscription delivery loop.
//!
//! Drains one subscription's [`Mailbox`](crate::pipeline::Mailbox) into batches and
//! delivers them with retries, backoff, the circuit breaker and dead-lettering.
//!
//! ## Architecture
//! ```text
//! subscribe() ──► tokio::spawn(DeliveryWorker::run(token))
//!
//! loop {
//!   ├─► cancelled?              → exit
//!   ├─► paused?                 → wait for wake / cancel
//!   ├─► mailbox.take_due(batch) → Some(events)
//!   │     └─► deliver_with_retry(batch)
//!   │           ├─► paused?                     → hold batch until resume / cancel
//!   │           ├─► attempt() ─────► Ok              → record delivered
//!   │           └─► Err ─► retry.decide()
//!   │                 ├─► Retry { delay }            → RetryScheduled → sleep
//!   │                 └─► DeadLetter { reason }      → dead_letter()
//!   └─► nothing due → select! { cancel | mailbox wake | batch deadline }
//! }
//! ```
//!
//! ## Rules
//! - One batch is in flight at a time, so events reach the target in queue order.
//! - Cancellation is observed between attempts and during backoff sleeps; an attempt
//!   already handed to the connection runs to completion.
//! - Pausing also stops a batch that is being retried: the next attempt waits for
//!   `resume` and keeps the retry count it had.
//! - Tunables are re-read for every batch, so `update_subscription` takes effect on
//!   the next batch.

use std::future;
use std::ops::ControlFlow;
use std::sync::Arc;

use tokio::select;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::core::delivery::{self, DeliveryContext};
use crate::events::{Notice, NoticeKind};
use crate::pipeline::Batch;
use crate::policies::{RetryDecision, RetryPolicy};
use crate::registry::Subscription;

pub(crate) struct DeliveryWorker {
    sub: Arc<Subscription>,
    ctx: Arc<DeliveryContext>,
}

impl DeliveryWorker {
    pub(crate) fn new(sub: Arc<Subscription>, ctx: Arc<DeliveryContext>) -> Self {
        Self { sub, ctx }
    }

    /// Runs until `token` is cancelled.
    pub(crate) async fn run(self, token: CancellationToken) {
        loop {
            if token.is_cancelled() {
                break;
            }

            let mut deadline = None;
            if !self.sub.is_paused() {
                let tunables = self.sub.tunables();
                if let Some((priority, events)) =
                    self.sub.mailbox.take_due(&tunables.batch, Instant::now())
                {
                    let batch = Batch::new(
                        Some(self.sub.id()),
                        priority,
                        events,
                        self.ctx.compression_threshold,
                    );
                    if self
                        .deliver_with_retry(&batch, &tunables.retry, &token)
                        .await
                        .is_break()
                    {
                        break;
                    }
                    continue;
                }
                deadline = self.sub.mailbox.next_deadline(&tunables.batch);
            }

            select! {
                biased;
                _ = token.cancelled() => break,
                _ = self.sub.mailbox.notified() => {}
                _ = sleep_until(deadline) => {}
            }
        }
        debug!(subscription = %self.sub.id(), "delivery worker stopped");
    }

    async fn deliver_with_retry(
        &self,
        batch: &Batch,
        retry: &RetryPolicy,
        token: &CancellationToken,
    ) -> ControlFlow<()> {
        let mut retries: u32 = 0;
        loop {
            if self.hold_while_paused(token).await.is_break() {
                return ControlFlow::Break(());
            }
            // Re-read per attempt: the target may be moved while retrying.
            let target = self.sub.target();
            let attempt = retries.saturating_add(1);

            let err = match delivery::attempt(&self.ctx, &self.sub, batch, &target, attempt).await {
                Ok(latency) => {
                    self.sub.record_delivered(batch.len(), latency);
                    return ControlFlow::Continue(());
                }
                Err(err) => err,
            };
            self.sub.record_attempt_failed();

            match retry.decide(retries, &err) {
                RetryDecision::Retry { delay } => {
                    self.ctx.metrics.record_retry();
                    self.ctx.bus.publish(
                        Notice::new(NoticeKind::RetryScheduled)
                            .with_subscription(self.sub.id())
                            .with_connection(target)
                            .with_attempt(attempt)
                            .with_delay(delay)
                            .with_reason(err.to_string()),
                    );

                    let sleep = time::sleep(delay);
                    tokio::pin!(sleep);
                    select! {
                        _ = &mut sleep => {}
                        _ = token.cancelled() => return ControlFlow::Break(()),
                    }
                    retries = attempt;
                }
                RetryDecision::DeadLetter { reason } => {
                    delivery::dead_letter(&self.ctx, &self.sub, batch, &err, attempt, reason);
                    return ControlFlow::Continue(());
                }
            }
        }
    }

    /// Parks the in-flight batch until the subscription is resumed or cancelled.
    async fn hold_while_paused(&self, token: &CancellationToken) -> ControlFlow<()> {
        while self.sub.is_paused() {
            select! {
                biased;
                _ = token.cancelled() => return ControlFlow::Break(()),
                _ = self.sub.mailbox.notified() => {}
            }
        }
        ControlFlow::Continue(())
    }
}

/// Sleeps until `deadline`, or forever when there is none.
async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => time::sleep_until(at).await,
        None => future::pending::<()>().await,
    }
}

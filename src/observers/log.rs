use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::events::{Notice, NoticeKind};
use crate::observers::Observe;

/// Observer that writes notices through `tracing`.
///
/// Enabled via the `logging` feature. Useful for demos and debugging.
pub struct LogWriter;

#[async_trait]
impl Observe for LogWriter {
    async fn on_notice(&self, n: &Notice) {
        let sub = n.subscription.map(|id| id.to_string()).unwrap_or_default();
        let conn = n.connection.as_ref().map(|c| c.to_string()).unwrap_or_default();
        let reason = n.reason.as_deref().unwrap_or("");

        match n.kind {
            NoticeKind::SubscriptionCreated
            | NoticeKind::SubscriptionRemoved
            | NoticeKind::SubscriptionPaused
            | NoticeKind::SubscriptionResumed
            | NoticeKind::SubscriptionUpdated => {
                info!(kind = ?n.kind, subscription = %sub, "[subscription]");
            }
            NoticeKind::BatchDelivered => {
                debug!(
                    subscription = %sub,
                    connection = %conn,
                    events = n.events.unwrap_or(0),
                    latency_ms = n.delay_ms.unwrap_or(0),
                    "[delivered]"
                );
            }
            NoticeKind::DeliveryFailed => {
                warn!(subscription = %sub, connection = %conn, attempt = ?n.attempt, err = reason, "[failed]");
            }
            NoticeKind::RetryScheduled => {
                info!(
                    subscription = %sub,
                    after_attempt = ?n.attempt,
                    delay_ms = n.delay_ms.unwrap_or(0),
                    "[retry]"
                );
            }
            NoticeKind::CircuitOpened | NoticeKind::CircuitHalfOpen | NoticeKind::CircuitClosed => {
                info!(kind = ?n.kind, subscription = %sub, connection = %conn, "[circuit]");
            }
            NoticeKind::DeadLettered | NoticeKind::DeadLetterEvicted => {
                warn!(kind = ?n.kind, subscription = %sub, events = ?n.events, reason, "[dead-letter]");
            }
            NoticeKind::DeadLetterReplayed => {
                info!(subscription = %sub, "[replayed]");
            }
            NoticeKind::EventDeduplicated => {
                debug!(key = reason, "[deduplicated]");
            }
            NoticeKind::EventDropped | NoticeKind::EventShed => {
                warn!(kind = ?n.kind, subscription = %sub, "[overflow]");
            }
            NoticeKind::ConnectionPruned => {
                warn!(connection = %conn, reason, "[pruned]");
            }
            NoticeKind::ObserverOverflow | NoticeKind::ObserverPanicked => {
                warn!(kind = ?n.kind, observer = ?n.observer, reason, "[observer]");
            }
        }
    }

    fn name(&self) -> &'static str {
        "log-writer"
    }
}

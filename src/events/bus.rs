//! # Notice bus.
//!
//! [`Bus`] is a thin wrapper around [`tokio::sync::broadcast`] that lets the
//! registry, delivery workers, the connection hub and the dead-letter store
//! publish [`Notice`]s without blocking.
//!
//! ## Architecture
//! ```text
//! Publishers (many):                   Listener (one):
//!   Worker 1 ──┐
//!   Worker N ──┼──────► Bus ───────► observer_listener ────► ObserverSet
//!   Hub      ──┤  (broadcast chan)     (in engine)
//!   Registry ──┘
//! ```
//!
//! ## Rules
//! - **Non-blocking publish**: `publish()` never blocks.
//! - **Bounded capacity**: one ring buffer shared by all receivers.
//! - **Lag handling**: slow receivers get `RecvError::Lagged(n)` and skip `n` oldest items.
//! - **No persistence**: notices are lost if there are no receivers at send time.

use tokio::sync::broadcast;

use super::notice::Notice;

/// Broadcast channel for engine notices.
#[derive(Clone, Debug)]
pub struct Bus {
    tx: broadcast::Sender<Notice>,
}

impl Bus {
    /// Creates a new bus with the given channel capacity (clamped to at least 1).
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel::<Notice>(capacity.max(1));
        Self { tx }
    }

    /// Publishes a notice to all active receivers; dropped if there are none.
    pub fn publish(&self, notice: Notice) {
        let _ = self.tx.send(notice);
    }

    /// Creates a receiver that observes notices sent after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NoticeKind;

    #[tokio::test]
    async fn test_receivers_see_later_notices_in_order() {
        let bus = Bus::new(8);
        bus.publish(Notice::new(NoticeKind::SubscriptionCreated));

        let mut rx = bus.subscribe();
        bus.publish(Notice::new(NoticeKind::BatchDelivered));
        bus.publish(Notice::new(NoticeKind::DeadLettered));

        let a = rx.recv().await.unwrap();
        let b = rx.recv().await.unwrap();
        assert_eq!(a.kind, NoticeKind::BatchDelivered);
        assert_eq!(b.kind, NoticeKind::DeadLettered);
        assert!(a.seq < b.seq);
    }
}

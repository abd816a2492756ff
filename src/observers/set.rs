//! # Non-blocking notice fan-out to observers.
//!
//! ```text
//! emit(notice)
//!     ├──► [queue 1] ──► worker 1 ──► observer1.on_notice()
//!     │    (bounded)         └──────► panic → ObserverPanicked
//!     └──► [queue N] ──► worker N ──► observerN.on_notice()
//! ```
//!
//! ## Rules
//! - `emit()` never blocks (`try_send`).
//! - A full or closed queue drops the notice for that observer only and publishes
//!   `ObserverOverflow`, except for overflow notices themselves.
//! - Each observer sees notices in order; there is no ordering across observers.
//! - A panicking observer is reported via `ObserverPanicked` and keeps receiving.

use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::events::{Bus, Notice, NoticeKind};

use super::observer::Observe;

struct ObserverChannel {
    name: &'static str,
    sender: mpsc::Sender<Arc<Notice>>,
}

/// Per-observer queues and workers.
pub struct ObserverSet {
    channels: Vec<ObserverChannel>,
    workers: Vec<JoinHandle<()>>,
    bus: Bus,
}

impl ObserverSet {
    /// Spawns one worker per observer. Must be called inside a Tokio runtime.
    #[must_use]
    pub fn new(observers: Vec<Arc<dyn Observe>>, bus: Bus) -> Self {
        let mut channels = Vec::with_capacity(observers.len());
        let mut workers = Vec::with_capacity(observers.len());

        for obs in observers {
            let name = obs.name();
            let (tx, mut rx) = mpsc::channel::<Arc<Notice>>(obs.queue_capacity().max(1));
            let worker_bus = bus.clone();

            let handle = tokio::spawn(async move {
                while let Some(notice) = rx.recv().await {
                    let fut = obs.on_notice(notice.as_ref());
                    if let Err(panic) = std::panic::AssertUnwindSafe(fut).catch_unwind().await {
                        let info = if let Some(msg) = panic.downcast_ref::<&'static str>() {
                            (*msg).to_string()
                        } else if let Some(msg) = panic.downcast_ref::<String>() {
                            msg.clone()
                        } else {
                            "unknown panic".to_string()
                        };
                        worker_bus.publish(Notice::observer_panicked(obs.name(), info));
                    }
                }
            });
            channels.push(ObserverChannel { name, sender: tx });
            workers.push(handle);
        }

        Self {
            channels,
            workers,
            bus,
        }
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Forwards `notice` to every observer queue.
    pub fn emit(&self, notice: Notice) {
        let is_overflow = notice.kind == NoticeKind::ObserverOverflow;
        let notice = Arc::new(notice);

        for channel in &self.channels {
            let reason = match channel.sender.try_send(Arc::clone(&notice)) {
                Ok(()) => continue,
                Err(mpsc::error::TrySendError::Full(_)) => "full",
                Err(mpsc::error::TrySendError::Closed(_)) => "closed",
            };
            if !is_overflow {
                self.bus.publish(Notice::observer_overflow(channel.name, reason));
            }
        }
    }

    /// Closes every queue and waits for the workers to drain them.
    pub async fn shutdown(self) {
        drop(self.channels);
        for h in self.workers {
            let _ = h.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<NoticeKind>>,
    }

    #[async_trait]
    impl Observe for Recorder {
        async fn on_notice(&self, notice: &Notice) {
            self.seen.lock().push(notice.kind);
        }

        fn name(&self) -> &'static str {
            "recorder"
        }
    }

    struct Panicky;

    #[async_trait]
    impl Observe for Panicky {
        async fn on_notice(&self, _notice: &Notice) {
            panic!("observer blew up");
        }

        fn name(&self) -> &'static str {
            "panicky"
        }
    }

    #[tokio::test]
    async fn test_emit_reaches_every_observer_in_order() {
        let bus = Bus::new(16);
        let rec = Arc::new(Recorder::default());
        let set = ObserverSet::new(vec![rec.clone(), Arc::new(Recorder::default())], bus);
        assert_eq!(set.len(), 2);

        set.emit(Notice::new(NoticeKind::SubscriptionCreated));
        set.emit(Notice::new(NoticeKind::BatchDelivered));
        set.shutdown().await;

        assert_eq!(
            *rec.seen.lock(),
            vec![NoticeKind::SubscriptionCreated, NoticeKind::BatchDelivered]
        );
    }

    #[tokio::test]
    async fn test_panic_is_reported_on_the_bus() {
        let bus = Bus::new(16);
        let mut rx = bus.subscribe();
        let set = ObserverSet::new(vec![Arc::new(Panicky)], bus);

        set.emit(Notice::new(NoticeKind::DeadLettered));
        set.shutdown().await;

        let notice = rx.recv().await.unwrap();
        assert_eq!(notice.kind, NoticeKind::ObserverPanicked);
        assert_eq!(notice.observer, Some("panicky"));
    }
}

//! # Connection hub: registration, timed delivery, fan-out and heartbeat.
//!
//! ```text
//! register(client, id, conn) ──► connections: id ─► Entry { client, conn, last_activity }
//!
//! deliver(id, batch) ──► timeout(delivery_timeout, conn.send(batch)) ──► touch(id)
//!
//! broadcast(batch, ids) ──► join_all(deliver(id_1), …, deliver(id_n)) ──► Vec<DeliveryResult>
//!
//! heartbeat tick ──► join_all(timeout(ping)) ──► prune failures (ConnectionPruned)
//! ```
//!
//! ## Rules
//! - No lock is held across `send`/`ping`: the entry `Arc` is cloned out first.
//! - A missing connection fails with [`DeliveryError::NotFound`].
//! - A zero delivery timeout disables the timeout.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::core::Metrics;
use crate::error::DeliveryError;
use crate::events::{Bus, Notice, NoticeKind};
use crate::pipeline::Batch;

use super::connection::{Connection, ConnectionId};

struct Entry {
    client_id: String,
    conn: Arc<dyn Connection>,
    last_activity: Mutex<Instant>,
}

impl Entry {
    fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }
}

/// Outcome of delivering one batch to one connection.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryResult {
    pub connection_id: ConnectionId,
    pub outcome: Result<(), DeliveryError>,
    pub latency: Duration,
}

impl DeliveryResult {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Overall result of a client-wide broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastStatus {
    /// Every connection accepted the batch.
    Delivered,
    /// Some connections failed; they were pruned.
    Partial,
    /// No connection accepted the batch (or the client had none).
    Failed,
}

/// Per-connection results of a client-wide broadcast.
#[derive(Debug, Clone, PartialEq)]
pub struct BroadcastReport {
    pub results: Vec<DeliveryResult>,
    /// Connections removed because they failed while others succeeded.
    pub pruned: Vec<ConnectionId>,
}

impl BroadcastReport {
    pub fn status(&self) -> BroadcastStatus {
        let ok = self.results.iter().filter(|r| r.is_success()).count();
        if ok == 0 {
            BroadcastStatus::Failed
        } else if ok == self.results.len() {
            BroadcastStatus::Delivered
        } else {
            BroadcastStatus::Partial
        }
    }

    pub fn all_succeeded(&self) -> bool {
        self.status() == BroadcastStatus::Delivered
    }
}

/// Registry of live connections and the delivery primitive.
pub struct ConnectionHub {
    connections: RwLock<HashMap<ConnectionId, Arc<Entry>>>,
    delivery_timeout: Duration,
    bus: Bus,
    metrics: Arc<Metrics>,
}

impl ConnectionHub {
    pub fn new(delivery_timeout: Duration, bus: Bus, metrics: Arc<Metrics>) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            delivery_timeout,
            bus,
            metrics,
        }
    }

    /// Registers (or replaces) a connection owned by `client_id`.
    ///
    /// Returns `true` if an existing connection with the same id was replaced.
    pub fn register(
        &self,
        client_id: impl Into<String>,
        id: ConnectionId,
        conn: Arc<dyn Connection>,
    ) -> bool {
        let entry = Arc::new(Entry {
            client_id: client_id.into(),
            conn,
            last_activity: Mutex::new(Instant::now()),
        });
        let replaced = self.connections.write().insert(id, entry).is_some();
        self.metrics.set_connections(self.len());
        replaced
    }

    pub fn unregister(&self, id: &ConnectionId) -> bool {
        let removed = self.connections.write().remove(id).is_some();
        self.metrics.set_connections(self.len());
        removed
    }

    /// Refreshes the liveness timestamp; `false` if unknown.
    pub fn touch(&self, id: &ConnectionId) -> bool {
        match self.entry(id) {
            Some(e) => {
                e.touch();
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All registered ids, sorted.
    pub fn ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<_> = self.connections.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Ids of the connections owned by `client_id`, sorted.
    pub fn client_connections(&self, client_id: &str) -> Vec<ConnectionId> {
        let mut ids: Vec<_> = self
            .connections
            .read()
            .iter()
            .filter(|(_, e)| e.client_id == client_id)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Time since the connection was last active.
    pub fn idle_for(&self, id: &ConnectionId) -> Option<Duration> {
        self.entry(id)
            .map(|e| Instant::now().saturating_duration_since(*e.last_activity.lock()))
    }

    fn entry(&self, id: &ConnectionId) -> Option<Arc<Entry>> {
        self.connections.read().get(id).cloned()
    }

    /// Sends `batch` to `target` within the delivery timeout; returns the latency.
    pub async fn deliver(&self, target: &ConnectionId, batch: &Batch) -> Result<Duration, DeliveryError> {
        let entry = self.entry(target).ok_or_else(|| DeliveryError::NotFound {
            connection: target.to_string(),
        })?;

        let started = Instant::now();
        let res = if self.delivery_timeout > Duration::ZERO {
            match time::timeout(self.delivery_timeout, entry.conn.send(batch)).await {
                Ok(r) => r,
                Err(_elapsed) => Err(DeliveryError::Timeout {
                    timeout: self.delivery_timeout,
                }),
            }
        } else {
            entry.conn.send(batch).await
        };

        let latency = started.elapsed();
        match res {
            Ok(()) => {
                entry.touch();
                debug!(
                    connection = %target,
                    transport = entry.conn.name(),
                    events = batch.len(),
                    latency_ms = latency.as_millis() as u64,
                    "batch delivered"
                );
                Ok(latency)
            }
            Err(e) => Err(e),
        }
    }

    /// Delivers `batch` to every target concurrently.
    pub async fn broadcast(&self, batch: &Batch, targets: &[ConnectionId]) -> Vec<DeliveryResult> {
        self.metrics.record_broadcast();
        let sends = targets.iter().map(|id| async move {
            let started = Instant::now();
            let outcome = self.deliver(id, batch).await;
            DeliveryResult {
                connection_id: id.clone(),
                latency: outcome.as_ref().map_or_else(|_| started.elapsed(), |l| *l),
                outcome: outcome.map(|_| ()),
            }
        });
        join_all(sends).await
    }

    /// Delivers `batch` to every connection of `client_id`.
    ///
    /// On partial failure the failed connections are pruned.
    pub async fn broadcast_to_client(&self, client_id: &str, batch: &Batch) -> BroadcastReport {
        let targets = self.client_connections(client_id);
        let results = self.broadcast(batch, &targets).await;

        let mut report = BroadcastReport {
            results,
            pruned: Vec::new(),
        };
        if report.status() == BroadcastStatus::Partial {
            for r in report.results.iter().filter(|r| !r.is_success()) {
                let reason = r
                    .outcome
                    .as_ref()
                    .err()
                    .map_or("delivery_failed", DeliveryError::as_label);
                if self.prune(&r.connection_id, reason) {
                    report.pruned.push(r.connection_id.clone());
                }
            }
        }
        report
    }

    /// Removes a connection and reports it; `false` if it was already gone.
    pub fn prune(&self, id: &ConnectionId, reason: &'static str) -> bool {
        if !self.unregister(id) {
            return false;
        }
        warn!(connection = %id, reason, "connection pruned");
        self.metrics.record_pruned_connection();
        self.bus.publish(
            Notice::new(NoticeKind::ConnectionPruned)
                .with_connection(id.clone())
                .with_reason(reason),
        );
        true
    }

    /// Pings every connection concurrently and prunes the ones that fail.
    ///
    /// Returns the pruned ids.
    pub async fn heartbeat(&self) -> Vec<ConnectionId> {
        let entries: Vec<(ConnectionId, Arc<Entry>)> = self
            .connections
            .read()
            .iter()
            .map(|(id, e)| (id.clone(), Arc::clone(e)))
            .collect();

        let timeout = self.delivery_timeout;
        let pings = entries.into_iter().map(|(id, entry)| async move {
            let res = if timeout > Duration::ZERO {
                time::timeout(timeout, entry.conn.ping())
                    .await
                    .unwrap_or(Err(DeliveryError::Timeout { timeout }))
            } else {
                entry.conn.ping().await
            };
            if res.is_ok() {
                entry.touch();
            }
            (id, res)
        });

        let mut pruned = Vec::new();
        for (id, res) in join_all(pings).await {
            if let Err(e) = res {
                if self.prune(&id, e.as_label()) {
                    pruned.push(id);
                }
            }
        }
        pruned
    }

    /// Runs [`ConnectionHub::heartbeat`] every `interval` until `token` is cancelled.
    pub fn spawn_heartbeat(
        self: Arc<Self>,
        interval: Duration,
        token: CancellationToken,
    ) -> Option<JoinHandle<()>> {
        if interval.is_zero() {
            return None;
        }
        Some(tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        self.heartbeat().await;
                    }
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;

    use crate::events::{ProviderStatus, ProviderUpdateEvent};
    use crate::pipeline::{Priority, PublishedEvent};

    #[derive(Default)]
    struct Probe {
        fail: AtomicBool,
        sends: AtomicUsize,
        dead: bool,
    }

    #[async_trait]
    impl Connection for Probe {
        async fn send(&self, _batch: &Batch) -> Result<(), DeliveryError> {
            self.sends.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                Err(DeliveryError::transient("reset"))
            } else {
                Ok(())
            }
        }

        async fn ping(&self) -> Result<(), DeliveryError> {
            if self.dead {
                Err(DeliveryError::permanent("no pong"))
            } else {
                Ok(())
            }
        }
    }

    struct Stalled;

    #[async_trait]
    impl Connection for Stalled {
        async fn send(&self, _batch: &Batch) -> Result<(), DeliveryError> {
            std::future::pending().await
        }
    }

    fn hub() -> ConnectionHub {
        ConnectionHub::new(Duration::from_secs(1), Bus::new(16), Arc::new(Metrics::default()))
    }

    fn batch() -> Batch {
        let ev = PublishedEvent::new(ProviderUpdateEvent::new("openai", ProviderStatus::Available).into());
        Batch::new(None, Priority::Normal, vec![Arc::new(ev)], None)
    }

    #[tokio::test]
    async fn test_deliver_unknown_target_is_not_found() {
        let err = hub().deliver(&"nope".into(), &batch()).await.unwrap_err();
        assert_eq!(err.as_label(), "connection_not_found");
    }

    #[tokio::test(start_paused = true)]
    async fn test_deliver_times_out() {
        let hub = hub();
        hub.register("alice", "ws-1".into(), Arc::new(Stalled));
        let err = hub.deliver(&"ws-1".into(), &batch()).await.unwrap_err();
        assert_eq!(
            err,
            DeliveryError::Timeout {
                timeout: Duration::from_secs(1)
            }
        );
    }

    #[tokio::test]
    async fn test_broadcast_to_client_prunes_failed_on_partial() {
        let hub = hub();
        let good = Arc::new(Probe::default());
        let bad = Arc::new(Probe::default());
        bad.fail.store(true, Ordering::SeqCst);
        hub.register("alice", "ws-good".into(), good.clone());
        hub.register("alice", "ws-bad".into(), bad.clone());
        hub.register("bob", "ws-bob".into(), Arc::new(Probe::default()));

        let report = hub.broadcast_to_client("alice", &batch()).await;
        assert_eq!(report.status(), BroadcastStatus::Partial);
        assert_eq!(report.pruned, vec![ConnectionId::from("ws-bad")]);
        assert!(!hub.contains(&"ws-bad".into()));
        assert!(hub.contains(&"ws-good".into()));
        assert_eq!(good.sends.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_heartbeat_prunes_dead_connections() {
        let hub = hub();
        let mut rx = hub.bus.subscribe();
        hub.register("alice", "ws-live".into(), Arc::new(Probe::default()));
        hub.register(
            "alice",
            "ws-dead".into(),
            Arc::new(Probe {
                dead: true,
                ..Default::default()
            }),
        );

        assert_eq!(hub.heartbeat().await, vec![ConnectionId::from("ws-dead")]);
        assert_eq!(hub.ids(), vec![ConnectionId::from("ws-live")]);

        let notice = rx.recv().await.unwrap();
        assert_eq!(notice.kind, NoticeKind::ConnectionPruned);
        assert_eq!(notice.connection, Some(ConnectionId::from("ws-dead")));
    }
}

//! # NotificationEngine: the explicitly owned engine instance.
//!
//! Owns the registry, the connection hub, the dedup cache, the dead-letter
//! store, the metrics and the notice bus, plus one delivery worker per
//! subscription. There is no global state: every caller holds an
//! `Arc<NotificationEngine>` obtained from [`NotificationEngine::builder`].
//!
//! ## Publish path
//! ```text
//! publish(ev)
//!   ├─► validate                         → Validation
//!   ├─► dedup (kind, subject, bucket)    → receipt.deduplicated
//!   ├─► registry.candidates(kind)        active subscriptions of the type + all_updates
//!   │     └─► filter.matches(ev)
//!   └─► mailbox.push(ev, priority, immediate, overflow) per match
//!         ├─ Enqueued          event_count += 1, worker woken
//!         ├─ Evicted(old)      event_count += 1, error_count += 1 (EventDropped)
//!         ├─ DroppedIncoming   event_count += 1, error_count += 1 (EventDropped)
//!         └─ Rejected          EventShed; ResourceExhausted if every match refused
//! ```
//!
//! `publish` never waits on a delivery: it returns once the event is queued.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::config::EngineConfig;
use crate::core::delivery::DeliveryContext;
use crate::core::worker::DeliveryWorker;
use crate::dispatch::{Connection, ConnectionId};
use crate::error::NotifyError;
use crate::events::{Bus, Notice, NoticeKind, UpdateEvent};
use crate::observers::ObserverSet;
use crate::pipeline::{DedupCache, DedupKey, Priority, PublishedEvent, PushOutcome};
use crate::registry::{
    Registry, Settings, SubscribeRequest, Subscription, SubscriptionId, SubscriptionInfo,
    SubscriptionType, SubscriptionUpdate,
};

use super::builder::EngineBuilder;

/// What happened to one published event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishReceipt {
    /// Id assigned to the event; delivered data frames and dead letters carry it.
    pub event_id: Uuid,
    /// Subscriptions whose type and filter matched.
    pub matched: usize,
    /// Subscriptions that queued the event.
    pub enqueued: usize,
    /// Events lost to `DropOldest` overflow (evicted or incoming).
    pub dropped: usize,
    /// Subscriptions that refused the event under `Reject`.
    pub shed: usize,
    /// Suppressed by the dedup window; nothing was queued.
    pub deduplicated: bool,
}

impl PublishReceipt {
    fn new(event_id: Uuid) -> Self {
        Self {
            event_id,
            matched: 0,
            enqueued: 0,
            dropped: 0,
            shed: 0,
            deduplicated: false,
        }
    }
}

/// Handle returned by [`NotificationEngine::subscribe`].
///
/// Dropping it does **not** unsubscribe; call [`Unsubscriber::unsubscribe`].
#[derive(Debug, Clone)]
pub struct Unsubscriber {
    engine: Weak<NotificationEngine>,
    id: SubscriptionId,
}

impl Unsubscriber {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Removes the subscription; `false` if it was already gone or the engine dropped.
    pub fn unsubscribe(&self) -> bool {
        self.engine
            .upgrade()
            .is_some_and(|engine| engine.unsubscribe(self.id))
    }
}

/// The notification engine.
pub struct NotificationEngine {
    pub(crate) cfg: EngineConfig,
    pub(crate) registry: Registry,
    pub(crate) ctx: Arc<DeliveryContext>,
    pub(crate) dedup: DedupCache,
    pub(crate) runtime_token: CancellationToken,
    pub(crate) workers: Mutex<HashMap<SubscriptionId, JoinHandle<()>>>,
    pub(crate) background: Mutex<Vec<JoinHandle<()>>>,
    pub(crate) observers: Mutex<Option<Arc<ObserverSet>>>,
    closed: AtomicBool,
}

impl NotificationEngine {
    /// Starts building an engine with `cfg`.
    pub fn builder(cfg: EngineConfig) -> EngineBuilder {
        EngineBuilder::new(cfg)
    }

    pub(crate) fn new_internal(
        cfg: EngineConfig,
        ctx: Arc<DeliveryContext>,
        runtime_token: CancellationToken,
    ) -> Self {
        Self {
            registry: Registry::new(cfg.max_subscriptions, cfg.max_subscriptions_per_client),
            dedup: DedupCache::new(cfg.dedup_window, cfg.dedup_capacity),
            ctx,
            runtime_token,
            workers: Mutex::new(HashMap::new()),
            background: Mutex::new(Vec::new()),
            observers: Mutex::new(None),
            closed: AtomicBool::new(false),
            cfg,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.cfg
    }

    /// Bus carrying every engine [`Notice`]; subscribe for in-process observation.
    pub fn bus(&self) -> &Bus {
        &self.ctx.bus
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn ensure_open(&self) -> Result<(), NotifyError> {
        if self.is_closed() {
            Err(NotifyError::Closed)
        } else {
            Ok(())
        }
    }

    /// Marks the engine closed; returns `false` if it already was.
    pub(crate) fn close(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }

    fn publish_notice(&self, notice: Notice) {
        self.ctx.bus.publish(notice);
    }

    fn subscription(&self, id: SubscriptionId) -> Result<Arc<Subscription>, NotifyError> {
        self.registry
            .get(id)
            .ok_or_else(|| NotifyError::not_found("subscription", id))
    }

    // ---- ingest ----

    /// Validates, deduplicates and queues an event for every matching subscription.
    ///
    /// # Errors
    /// - [`NotifyError::Validation`] for a malformed event;
    /// - [`NotifyError::ResourceExhausted`] when every matching subscription refused it
    ///   under the `Reject` overflow policy;
    /// - [`NotifyError::Closed`] after shutdown.
    pub fn publish(&self, event: impl Into<UpdateEvent>) -> Result<PublishReceipt, NotifyError> {
        self.ensure_open()?;
        let event = event.into();
        event.validate()?;
        self.ctx.metrics.record_published();

        let published = Arc::new(PublishedEvent::new(event));
        let ev = &published.event;
        let mut receipt = PublishReceipt::new(published.id);

        let key = DedupKey::for_event(ev, self.cfg.dedup_bucket);
        if !self.dedup.check_and_insert(key.clone(), Instant::now()) {
            self.ctx.metrics.record_deduplicated();
            debug!(key = %key, "duplicate event suppressed");
            self.publish_notice(Notice::new(NoticeKind::EventDeduplicated).with_reason(key.to_string()));
            receipt.deduplicated = true;
            return Ok(receipt);
        }

        let priority = Priority::for_event(ev);
        let immediate = self.cfg.flushes_immediately(ev.severity());

        for sub in self.registry.candidates(ev.kind()) {
            if !sub.matches(ev) {
                continue;
            }
            receipt.matched += 1;

            match sub
                .mailbox
                .push(Arc::clone(&published), priority, immediate, self.cfg.overflow)
            {
                PushOutcome::Enqueued => {
                    sub.record_enqueued();
                    self.ctx.metrics.record_enqueued();
                    receipt.enqueued += 1;
                }
                PushOutcome::Evicted(old) => {
                    sub.record_enqueued();
                    self.ctx.metrics.record_enqueued();
                    receipt.enqueued += 1;
                    self.record_overflow_drop(&sub, old.id, "evicted");
                    receipt.dropped += 1;
                }
                PushOutcome::DroppedIncoming => {
                    sub.record_enqueued();
                    self.record_overflow_drop(&sub, published.id, "incoming");
                    receipt.dropped += 1;
                }
                PushOutcome::Rejected => {
                    self.ctx.metrics.record_shed();
                    self.publish_notice(
                        Notice::new(NoticeKind::EventShed)
                            .with_subscription(sub.id())
                            .with_reason(published.id.to_string()),
                    );
                    receipt.shed += 1;
                }
            }
        }

        if receipt.matched == 0 {
            self.ctx.metrics.record_unmatched();
        } else if receipt.shed == receipt.matched {
            // Nothing was queued: let the producer retry the same event.
            self.dedup.forget(&key);
            warn!(event = %published.id, subscriptions = receipt.shed, "event shed by every subscription");
            return Err(NotifyError::ResourceExhausted {
                resource: "queue",
                limit: self.cfg.queue_capacity,
            });
        }
        Ok(receipt)
    }

    fn record_overflow_drop(&self, sub: &Subscription, event_id: Uuid, which: &'static str) {
        sub.record_errors(1);
        self.ctx.metrics.record_dropped();
        warn!(subscription = %sub.id(), event = %event_id, which, "queue full, event dropped");
        self.publish_notice(
            Notice::new(NoticeKind::EventDropped)
                .with_subscription(sub.id())
                .with_events(1)
                .with_reason(which),
        );
    }

    /// Publishes each event in order; one result per event.
    pub fn publish_batch<I, E>(&self, events: I) -> Vec<Result<PublishReceipt, NotifyError>>
    where
        I: IntoIterator<Item = E>,
        E: Into<UpdateEvent>,
    {
        events.into_iter().map(|ev| self.publish(ev)).collect()
    }

    // ---- subscriptions ----

    /// Registers a subscription and starts its delivery worker.
    ///
    /// # Errors
    /// - [`NotifyError::Validation`] for an empty client id, a missing target or bad options;
    /// - [`NotifyError::ResourceExhausted`] when the global or per-client limit is reached.
    pub fn subscribe(
        self: &Arc<Self>,
        req: SubscribeRequest,
    ) -> Result<(SubscriptionId, Unsubscriber), NotifyError> {
        self.ensure_open()?;
        if req.client_id.trim().is_empty() {
            return Err(NotifyError::validation("client id must not be empty"));
        }
        let target = match req.target {
            Some(t) if !t.as_str().is_empty() => t,
            _ => return Err(NotifyError::validation("subscription requires a delivery target")),
        };
        req.options.validate()?;

        let settings = Settings {
            filter: req.filter,
            target,
            options: req.options,
            tunables: self.cfg.tunables(&req.options),
        };
        let token = self.runtime_token.child_token();
        let sub = Arc::new(Subscription::new(
            req.client_id,
            req.kind,
            settings,
            self.cfg.queue_capacity,
            self.cfg.breaker(),
            token.clone(),
        ));
        self.registry.insert(Arc::clone(&sub))?;

        let id = sub.id();
        let worker = DeliveryWorker::new(Arc::clone(&sub), Arc::clone(&self.ctx));
        let handle = tokio::spawn(worker.run(token));
        self.workers.lock().insert(id, handle);

        info!(subscription = %id, client = sub.client_id(), kind = %sub.kind(), "subscription created");
        self.publish_notice(Notice::new(NoticeKind::SubscriptionCreated).with_subscription(id));

        Ok((
            id,
            Unsubscriber {
                engine: Arc::downgrade(self),
                id,
            },
        ))
    }

    /// Removes a subscription and stops its worker. Idempotent: `false` if unknown.
    ///
    /// Queued events are discarded; an attempt already in flight completes.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        match self.registry.remove(id) {
            Some(sub) => {
                self.retire(&sub);
                true
            }
            None => false,
        }
    }

    /// Removes every subscription of `client_id`; returns how many were removed.
    pub fn unsubscribe_all(&self, client_id: &str) -> usize {
        let removed = self.registry.remove_client(client_id);
        for sub in &removed {
            self.retire(sub);
        }
        removed.len()
    }

    fn retire(&self, sub: &Subscription) {
        sub.cancel_token().cancel();
        let discarded = sub.mailbox.clear();
        self.workers.lock().remove(&sub.id());
        info!(subscription = %sub.id(), discarded, "subscription removed");
        self.publish_notice(Notice::new(NoticeKind::SubscriptionRemoved).with_subscription(sub.id()));
    }

    /// Stops matching and delivery for `id`; queued events wait for [`resume`](Self::resume).
    pub fn pause(&self, id: SubscriptionId) -> Result<(), NotifyError> {
        let sub = self.subscription(id)?;
        if sub.set_paused(true) {
            self.publish_notice(Notice::new(NoticeKind::SubscriptionPaused).with_subscription(id));
        }
        Ok(())
    }

    pub fn resume(&self, id: SubscriptionId) -> Result<(), NotifyError> {
        let sub = self.subscription(id)?;
        if sub.set_paused(false) {
            sub.mailbox.wake();
            self.publish_notice(Notice::new(NoticeKind::SubscriptionResumed).with_subscription(id));
        }
        Ok(())
    }

    /// Applies a partial update atomically: either every field changes or none does.
    pub fn update_subscription(
        &self,
        id: SubscriptionId,
        update: SubscriptionUpdate,
    ) -> Result<SubscriptionInfo, NotifyError> {
        let sub = self.subscription(id)?;
        if update.is_empty() {
            return Ok(sub.info());
        }

        let filter = update.filter.map(|f| f.compile()).transpose()?;
        if let Some(opts) = &update.options {
            opts.validate()?;
        }
        if update.target.as_ref().is_some_and(|t| t.as_str().is_empty()) {
            return Err(NotifyError::validation("delivery target must not be empty"));
        }

        sub.update_settings(|s| {
            if let Some(f) = filter {
                s.filter = f;
            }
            if let Some(t) = update.target {
                s.target = t;
            }
            if let Some(patch) = update.options {
                s.options = s.options.merged(patch);
                s.tunables = self.cfg.tunables(&s.options);
            }
        });
        sub.mailbox.wake();

        self.publish_notice(Notice::new(NoticeKind::SubscriptionUpdated).with_subscription(id));
        Ok(sub.info())
    }

    pub fn get_subscription(&self, id: SubscriptionId) -> Option<SubscriptionInfo> {
        self.registry.get(id).map(|s| s.info())
    }

    /// Subscriptions of `client_id`, oldest first.
    pub fn get_subscriptions_by_client(&self, client_id: &str) -> Vec<SubscriptionInfo> {
        self.registry
            .by_client(client_id)
            .iter()
            .map(|s| s.info())
            .collect()
    }

    /// Subscriptions registered with exactly `kind`, oldest first.
    pub fn get_subscriptions_by_type(&self, kind: SubscriptionType) -> Vec<SubscriptionInfo> {
        self.registry.by_type(kind).iter().map(|s| s.info()).collect()
    }

    pub fn reset_subscription_stats(&self, id: SubscriptionId) -> Result<(), NotifyError> {
        self.subscription(id)?.reset_stats();
        Ok(())
    }

    // ---- connections ----

    /// Registers (or replaces) a delivery connection owned by `client_id`.
    ///
    /// Returns `true` if a connection with the same id was replaced.
    pub fn register_connection(
        &self,
        client_id: impl Into<String>,
        id: impl Into<ConnectionId>,
        conn: Arc<dyn Connection>,
    ) -> Result<bool, NotifyError> {
        self.ensure_open()?;
        let client_id = client_id.into();
        let id = id.into();
        if client_id.trim().is_empty() || id.as_str().is_empty() {
            return Err(NotifyError::validation("client and connection ids must not be empty"));
        }
        debug!(client = %client_id, connection = %id, transport = conn.name(), "connection registered");
        Ok(self.ctx.hub.register(client_id, id, conn))
    }

    pub fn unregister_connection(&self, id: &ConnectionId) -> bool {
        self.ctx.hub.unregister(id)
    }

    /// Refreshes a connection's liveness; `false` if unknown.
    pub fn touch_connection(&self, id: &ConnectionId) -> bool {
        self.ctx.hub.touch(id)
    }
}

impl Drop for NotificationEngine {
    fn drop(&mut self) {
        self.runtime_token.cancel();
    }
}

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use capnotify::{
    Batch, Connection, DeliveryError, EngineConfig, ModelChange, ModelUpdateEvent,
    NotificationEngine, SubscribeRequest, SubscriptionId, SubscriptionOptions, SubscriptionType,
};

/// In-memory connection that records every batch it accepts and fails on script.
#[derive(Default)]
pub struct Recorder {
    batches: Mutex<Vec<Vec<String>>>,
    script: Mutex<VecDeque<DeliveryError>>,
    always: Mutex<Option<DeliveryError>>,
    ping_fails: AtomicBool,
    sends: AtomicUsize,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fails the next `n` sends with `err`.
    pub fn fail_next(&self, n: usize, err: DeliveryError) {
        let mut script = self.script.lock();
        for _ in 0..n {
            script.push_back(err.clone());
        }
    }

    /// Fails every send with `err` until [`Recorder::heal`].
    pub fn fail_always(&self, err: DeliveryError) {
        *self.always.lock() = Some(err);
    }

    pub fn heal(&self) {
        *self.always.lock() = None;
        self.script.lock().clear();
    }

    pub fn fail_pings(&self) {
        self.ping_fails.store(true, Ordering::SeqCst);
    }

    /// Send calls so far, failed ones included.
    pub fn sends(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
    }

    /// Accepted batches as lists of event subjects.
    pub fn batches(&self) -> Vec<Vec<String>> {
        self.batches.lock().clone()
    }

    /// Every accepted event subject, in delivery order.
    pub fn subjects(&self) -> Vec<String> {
        self.batches.lock().iter().flatten().cloned().collect()
    }
}

#[async_trait]
impl Connection for Recorder {
    async fn send(&self, batch: &Batch) -> Result<(), DeliveryError> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.always.lock().clone() {
            return Err(err);
        }
        if let Some(err) = self.script.lock().pop_front() {
            return Err(err);
        }
        let subjects = batch.updates().map(|ev| ev.subject().to_string()).collect();
        self.batches.lock().push(subjects);
        Ok(())
    }

    async fn ping(&self) -> Result<(), DeliveryError> {
        if self.ping_fails.load(Ordering::SeqCst) {
            Err(DeliveryError::transient("no pong"))
        } else {
            Ok(())
        }
    }

    fn name(&self) -> &'static str {
        "recorder"
    }
}

/// Config with immediate single-event batches, fast retries and no background sweeps.
pub fn quick_config() -> EngineConfig {
    let mut cfg = EngineConfig::default();
    cfg.default_batch_size = 1;
    cfg.default_batch_wait = Duration::from_secs(5);
    cfg.backoff.base = Duration::from_millis(100);
    cfg.backoff.max = Duration::from_secs(1);
    cfg.heartbeat_interval = Duration::ZERO;
    cfg.cleanup_interval = Duration::ZERO;
    cfg
}

/// Builds an engine and registers one recorder as `conn-1` of `client-1`.
pub fn engine_with(cfg: EngineConfig) -> (Arc<NotificationEngine>, Arc<Recorder>) {
    let engine = NotificationEngine::builder(cfg).build().unwrap();
    let conn = Recorder::new();
    engine.register_connection("client-1", "conn-1", conn.clone()).unwrap();
    (engine, conn)
}

pub fn subscribe(
    engine: &Arc<NotificationEngine>,
    kind: SubscriptionType,
    options: SubscriptionOptions,
) -> SubscriptionId {
    let (id, _handle) = engine
        .subscribe(
            SubscribeRequest::new("client-1", kind)
                .to("conn-1")
                .with_options(options),
        )
        .unwrap();
    id
}

pub fn model(id: &str) -> ModelUpdateEvent {
    ModelUpdateEvent::new(id, "openai", ModelChange::Added)
}

/// Lets workers run without reaching any retry or batch deadline.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::core::config::EngineConfig;
use crate::core::delivery::DeliveryContext;
use crate::core::engine::NotificationEngine;
use crate::core::Metrics;
use crate::dead_letter::DeadLetterStore;
use crate::dispatch::ConnectionHub;
use crate::error::NotifyError;
use crate::events::{Bus, Notice};
use crate::observers::{Observe, ObserverSet};

/// Builder for constructing a [`NotificationEngine`] with optional observers.
pub struct EngineBuilder {
    cfg: EngineConfig,
    observers: Vec<Arc<dyn Observe>>,
}

impl EngineBuilder {
    /// Creates a new builder with the given configuration.
    pub fn new(cfg: EngineConfig) -> Self {
        Self {
            cfg,
            observers: Vec::new(),
        }
    }

    /// Sets notice observers.
    ///
    /// Observers receive engine notices (deliveries, failures, breaker transitions,
    /// dead letters, ...) through dedicated workers with bounded queues.
    pub fn with_observers(mut self, observers: Vec<Arc<dyn Observe>>) -> Self {
        self.observers = observers;
        self
    }

    /// Validates the configuration, builds the engine and starts its background tasks:
    /// - observer listener (if any observers are set);
    /// - connection heartbeat;
    /// - periodic cleanup;
    /// - automatic dead-letter replay (if configured).
    ///
    /// Must be called from within a Tokio runtime.
    pub fn build(self) -> Result<Arc<NotificationEngine>, NotifyError> {
        self.cfg.validate()?;

        let bus = Bus::new(self.cfg.bus_capacity_clamped());
        let metrics = Arc::new(Metrics::default());
        let hub = Arc::new(ConnectionHub::new(
            self.cfg.delivery_timeout,
            bus.clone(),
            Arc::clone(&metrics),
        ));
        let ctx = Arc::new(DeliveryContext {
            hub: Arc::clone(&hub),
            dead_letters: Arc::new(DeadLetterStore::new(self.cfg.dead_letter_capacity)),
            metrics,
            bus: bus.clone(),
            compression_threshold: self.cfg.compression_threshold,
        });
        let runtime_token = CancellationToken::new();

        let heartbeat = self.cfg.heartbeat_interval;
        let cleanup = self.cfg.cleanup_interval;
        let auto_replay = self.cfg.auto_replay_interval;

        let engine = Arc::new(NotificationEngine::new_internal(
            self.cfg,
            ctx,
            runtime_token.clone(),
        ));

        let mut background = Vec::new();
        if !self.observers.is_empty() {
            // Subscribe before anything can publish.
            let rx = bus.subscribe();
            let set = Arc::new(ObserverSet::new(self.observers, bus));
            background.push(observer_listener(rx, Arc::clone(&set), runtime_token.child_token()));
            *engine.observers.lock() = Some(set);
        }
        background.extend(hub.spawn_heartbeat(heartbeat, runtime_token.child_token()));
        background.extend(periodic(
            &engine,
            cleanup,
            runtime_token.child_token(),
            |engine| async move {
                engine.cleanup();
            },
        ));
        if let Some(every) = auto_replay {
            background.extend(periodic(
                &engine,
                every,
                runtime_token.child_token(),
                |engine| async move {
                    engine.replay_dead_letters().await;
                },
            ));
        }
        *engine.background.lock() = background;

        Ok(engine)
    }
}

/// Forwards bus notices to the observer set until cancelled, then drains what is left.
fn observer_listener(
    mut rx: broadcast::Receiver<Notice>,
    set: Arc<ObserverSet>,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                res = rx.recv() => match res {
                    Ok(notice) => set.emit(notice),
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => return,
                },
            }
        }
        while let Ok(notice) = rx.try_recv() {
            set.emit(notice);
        }
    })
}

/// Runs `job` every `every` on a weak engine handle; a zero interval disables it.
fn periodic<F, Fut>(
    engine: &Arc<NotificationEngine>,
    every: Duration,
    token: CancellationToken,
    job: F,
) -> Option<JoinHandle<()>>
where
    F: Fn(Arc<NotificationEngine>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    if every.is_zero() {
        return None;
    }
    let weak: Weak<NotificationEngine> = Arc::downgrade(engine);
    Some(tokio::spawn(async move {
        let mut ticker = time::interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    let Some(engine) = weak.upgrade() else { break };
                    job(engine).await;
                }
            }
        }
    }))
}

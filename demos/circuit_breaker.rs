//! # Example: circuit_breaker
//!
//! A consumer whose connection goes down for a while. Shows retries with
//! backoff, the breaker opening and failing fast, dead letters, and the replay
//! once the consumer is back.
//!
//! ## Flow
//! ```text
//! connection down
//!   publish(m1) ─► attempt 1 ✗ ─► retry 100ms ─► attempt 2 ✗ ─► breaker opens
//!               ─► retry 200ms ─► CircuitOpen (fail fast) ─► dead letter
//!   publish(m2) ─► CircuitOpen ×3 ─► dead letter
//! connection up, breaker timeout elapses
//!   replay_dead_letters() ─► m1, m2 delivered
//! ```
//!
//! ## Run
//! ```bash
//! cargo run --example circuit_breaker
//! ```

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast::error::RecvError;

use capnotify::{
    Batch, Connection, DeliveryError, EngineConfig, ModelChange, ModelUpdateEvent,
    NotificationEngine, NoticeKind, SubscribeRequest, SubscriptionOptions, SubscriptionType,
};

/// Connection that can be switched off.
struct Flaky {
    up: AtomicBool,
    calls: AtomicU32,
}

#[async_trait]
impl Connection for Flaky {
    async fn send(&self, batch: &Batch) -> Result<(), DeliveryError> {
        let call = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
        if !self.up.load(Ordering::Relaxed) {
            println!("💥 send #{call}: peer unavailable");
            return Err(DeliveryError::transient("peer unavailable"));
        }
        for ev in batch.updates() {
            println!("✅ send #{call}: {} delivered", ev.subject());
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "flaky"
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Trip the breaker after 2 failures, keep it open for 2s.
    let mut cfg = EngineConfig::default();
    cfg.default_batch_size = 1;
    cfg.failure_threshold = 2;
    cfg.circuit_breaker_timeout = Duration::from_secs(2);
    cfg.backoff.base = Duration::from_millis(100);
    let engine = NotificationEngine::builder(cfg).build()?;

    // 2. Print breaker transitions and dead letters straight from the bus.
    let mut rx = engine.bus().subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(n) => match n.kind {
                    NoticeKind::CircuitOpened
                    | NoticeKind::CircuitHalfOpen
                    | NoticeKind::CircuitClosed
                    | NoticeKind::DeadLettered
                    | NoticeKind::RetryScheduled => println!(
                        "🔔 {:?} attempt={:?} delay_ms={:?}",
                        n.kind, n.attempt, n.delay_ms
                    ),
                    _ => {}
                },
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    });

    let conn = Arc::new(Flaky {
        up: AtomicBool::new(false),
        calls: AtomicU32::new(0),
    });
    engine.register_connection("consumer", "sse-1", conn.clone())?;
    engine.subscribe(
        SubscribeRequest::new("consumer", SubscriptionType::ModelUpdate)
            .to("sse-1")
            .with_options(SubscriptionOptions {
                max_retries: Some(2),
                ..Default::default()
            }),
    )?;

    // 3. Publish while the peer is down.
    engine.publish(ModelUpdateEvent::new("m1", "openai", ModelChange::Added))?;
    engine.publish(ModelUpdateEvent::new("m2", "openai", ModelChange::Deprecated))?;
    tokio::time::sleep(Duration::from_secs(1)).await;
    println!("🪦 dead letters: {}", engine.get_dead_letter_queue(10, 0).len());

    // 4. Peer comes back; replay once the breaker would let a probe through.
    conn.up.store(true, Ordering::Relaxed);
    tokio::time::sleep(Duration::from_secs(2)).await;
    let replayed = engine.replay_dead_letters().await;
    println!("🔁 replayed {replayed} dead letter(s)");

    let metrics = engine.get_metrics();
    println!(
        "📊 failed attempts: {}, fail-fast rejections: {}, breaker opens: {}",
        metrics.failed_attempts, metrics.circuit_open_rejections, metrics.breaker_opens
    );

    engine.shutdown().await;
    Ok(())
}

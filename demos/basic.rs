//! # Example: basic
//!
//! Publishes a few provider-discovery records through a batched subscription and
//! prints what the consumer receives, with engine notices logged through
//! [`LogWriter`].
//!
//! ## Flow
//! ```text
//! register_connection("dashboard", "ws-1")
//! subscribe(all_updates, provider_name in [openai, anthropic], batch 3 / 500ms)
//! map_discovered(record) ──► publish(event)  ×4
//!   ├─► batch [gpt-4o, o3, claude-sonnet]   (size reached)
//!   └─► batch [vision]                      (500ms elapsed)
//! shutdown()
//! ```
//!
//! ## Run
//! ```bash
//! RUST_LOG=info cargo run --example basic --features logging
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing_subscriber::EnvFilter;

use capnotify::{
    map_discovered, Batch, CapabilityChange, CapabilityUpdateEvent, Connection, DeliveryError,
    EngineConfig, Field, Filter, FilterValue, LogWriter, NotificationEngine, Observe, Operator,
    Predicate, SubscribeRequest, SubscriptionOptions, SubscriptionType,
};

/// Prints every data frame as a JSON line.
struct Printer;

#[async_trait]
impl Connection for Printer {
    async fn send(&self, batch: &Batch) -> Result<(), DeliveryError> {
        println!("📦 batch of {} ({} priority)", batch.len(), batch.priority.as_str());
        for frame in batch.frames() {
            let line = serde_json::to_string(&frame).map_err(|e| DeliveryError::Invalid {
                reason: e.to_string(),
            })?;
            println!("   {line}");
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "printer"
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // 1. Engine with a short default batch window and the logging observer.
    let mut cfg = EngineConfig::default();
    cfg.default_batch_wait = Duration::from_millis(500);
    let observers: Vec<Arc<dyn Observe>> = vec![Arc::new(LogWriter)];
    let engine = NotificationEngine::builder(cfg)
        .with_observers(observers)
        .build()?;

    // 2. One push connection and a filtered subscription delivering to it.
    engine.register_connection("dashboard", "ws-1", Arc::new(Printer))?;
    let providers = Predicate::new(
        Field::ProviderName,
        Operator::In,
        FilterValue::List(vec!["openai".into(), "anthropic".into()]),
    )?;
    let (id, _handle) = engine.subscribe(
        SubscribeRequest::new("dashboard", SubscriptionType::AllUpdates)
            .with_filter(Filter::all(vec![providers]))
            .to("ws-1")
            .with_options(SubscriptionOptions {
                batch_size: Some(3),
                ..Default::default()
            }),
    )?;
    println!("✅ subscribed: {id}");

    // 3. Discovery records from different vendors, mapped to model updates.
    let discovered = [
        json!({"provider": "openai", "id": "gpt-4o", "created": 1715367049}),
        json!({"provider": "openai", "id": "o3", "created": 1744225308}),
        json!({"provider": "anthropic", "id": "claude-sonnet", "created_at": "2025-05-22T00:00:00Z"}),
        json!({"provider": "google", "name": "models/gemini-2.0-flash"}),
    ];
    for record in &discovered {
        let receipt = engine.publish(map_discovered(record)?)?;
        println!("➡️  published {} (matched {})", receipt.event_id, receipt.matched);
    }
    engine.publish(
        CapabilityUpdateEvent::new("vision", CapabilityChange::Added).with_provider("openai"),
    )?;

    // 4. Let the size-triggered and the time-triggered batches go out.
    tokio::time::sleep(Duration::from_secs(1)).await;

    let stats = engine.get_subscription_stats(id).ok_or("subscription vanished")?;
    println!("📊 delivered {} of {} events", stats.delivered, stats.event_count);

    let report = engine.shutdown().await;
    println!("🛑 shutdown: {} task(s) joined, {} aborted", report.joined, report.aborted);
    Ok(())
}

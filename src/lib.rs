//! # capnotify
//!
//! **capnotify** is a notification engine for model, provider and capability
//! updates. Producers publish change events; consumers register filtered
//! subscriptions and receive batched, retried, circuit-broken deliveries over
//! their own push connections. Undeliverable events land in a bounded
//! dead-letter store from which they can be replayed.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!   producer ──► publish(event)
//!                   │
//! ┌─────────────────▼─────────────────────────────────────────────────┐
//! │  NotificationEngine                                               │
//! │  - DedupCache      (engine-wide window on kind+subject+bucket)     │
//! │  - Registry        (subscriptions by id / client / type, limits)  │
//! │  - ConnectionHub   (connections, timed send, fan-out, heartbeat)  │
//! │  - DeadLetterStore (bounded FIFO, replay)                         │
//! │  - Metrics + Bus   (counters, notices)                            │
//! └──────┬──────────────────┬──────────────────┬──────────────────────┘
//!        ▼ filter match     ▼                  ▼
//!   ┌──────────┐       ┌──────────┐       ┌──────────┐
//!   │ Mailbox  │       │ Mailbox  │       │ Mailbox  │  high / normal / low lanes
//!   └────┬─────┘       └────┬─────┘       └────┬─────┘  shared bound, overflow policy
//!        ▼                  ▼                  ▼
//!   DeliveryWorker     DeliveryWorker     DeliveryWorker
//!   (batch → breaker → send → retry/backoff → dead letter)
//!        │                  │                  │
//!        ▼                  ▼                  ▼
//!    Connection         Connection         Connection   (user transport)
//! ```
//!
//! ### Notices
//! ```text
//! worker / hub / engine ──► Bus (broadcast) ──► observer listener ──► ObserverSet
//!                                                                     ├─► LogWriter
//!                                                                     └─► custom Observe
//! ```
//!
//! ### Delivery loop
//! ```text
//! loop {
//!   ├─► take_due(batch policy)            size reached | wait elapsed | immediate event
//!   ├─► breaker.try_acquire(target)       open → CircuitOpen (fail fast)
//!   ├─► hub.deliver(target, batch)        within delivery_timeout
//!   │     ├─ Ok  ──► BatchDelivered, breaker closed
//!   │     └─ Err ──► DeliveryFailed, breaker failure
//!   │           ├─ retryable and retries left ─► RetryScheduled, sleep(backoff)
//!   │           └─ otherwise                  ─► DeadLettered
//!   └─► wait for push | batch deadline | cancel
//! }
//! ```
//!
//! ## Features
//! | Area              | Description                                                  | Key types / traits                              |
//! |-------------------|--------------------------------------------------------------|-------------------------------------------------|
//! | **Engine**        | Publish, subscribe, manage, observe, shut down.              | [`NotificationEngine`], [`EngineBuilder`]       |
//! | **Events**        | Model / provider / capability updates and push frames.       | [`UpdateEvent`], [`Frame`]                      |
//! | **Filters**       | Field predicates combined with AND / OR.                     | [`Filter`], [`Predicate`]                       |
//! | **Transport**     | Bring your own push connection.                              | [`Connection`]                                  |
//! | **Policies**      | Backoff, jitter, retries, circuit breaking, overflow.        | [`BackoffPolicy`], [`RetryPolicy`], [`OverflowPolicy`] |
//! | **Observability** | Notices, observers, metrics and health.                      | [`Observe`], [`Notice`], [`MetricsSnapshot`]    |
//! | **Errors**        | API errors and delivery errors.                              | [`NotifyError`], [`DeliveryError`]              |
//! | **Configuration** | Engine-wide defaults and limits.                             | [`EngineConfig`]                                |
//!
//! ## Optional features
//! - `logging`: exports a built-in [`LogWriter`] observer that writes notices through `tracing`.
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use capnotify::{
//!     Batch, Connection, DeliveryError, EngineConfig, ModelChange, ModelUpdateEvent,
//!     NotificationEngine, SubscribeRequest, SubscriptionType,
//! };
//!
//! struct Stdout;
//!
//! #[async_trait]
//! impl Connection for Stdout {
//!     async fn send(&self, batch: &Batch) -> Result<(), DeliveryError> {
//!         for frame in batch.frames() {
//!             println!("{}", serde_json::to_string(&frame).unwrap_or_default());
//!         }
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = NotificationEngine::builder(EngineConfig::default()).build()?;
//!     engine.register_connection("dashboard", "ws-1", Arc::new(Stdout))?;
//!
//!     let (_id, _handle) = engine.subscribe(
//!         SubscribeRequest::new("dashboard", SubscriptionType::ModelUpdate).to("ws-1"),
//!     )?;
//!     engine.publish(ModelUpdateEvent::new("gpt-4o", "openai", ModelChange::Added))?;
//!
//!     engine.shutdown().await;
//!     Ok(())
//! }
//! ```
mod core;
mod dead_letter;
mod dispatch;
mod error;
mod events;
mod filters;
mod observers;
mod pipeline;
mod policies;
mod providers;
mod registry;

// ---- Public re-exports ----

pub use core::{
    assess, CleanupReport, EngineBuilder, EngineConfig, HealthInputs, HealthIssue, HealthReport,
    HealthStatus, Metrics, MetricsSnapshot, NotificationEngine, PublishReceipt, ReplayOutcome,
    ShutdownReport, Unsubscriber,
};
pub use dead_letter::{DeadLetterReason, DeadLetterRecord, DeadLetterStore};
pub use dispatch::{
    BroadcastReport, BroadcastStatus, Connection, ConnectionHub, ConnectionId, DeliveryResult,
};
pub use error::{DeliveryError, FailureClass, NotifyError};
pub use events::{
    Bus, CapabilityChange, CapabilityUpdateEvent, DataFrame, Frame, FrameOptions, ModelChange,
    ModelUpdateEvent, Notice, NoticeKind, ProviderStatus, ProviderUpdateEvent, Severity,
    SubscribeFrame, UpdateEvent, UpdateKind,
};
pub use filters::{Combinator, Field, Filter, FilterValue, Operator, Predicate, PredicateSpec};
pub use observers::{Observe, ObserverSet};
pub use pipeline::{Batch, BatchPolicy, Priority, PublishedEvent};
pub use policies::{
    Admission, BackoffPolicy, BreakerConfig, BreakerSnapshot, CircuitBreaker, CircuitState,
    JitterPolicy, OverflowPolicy, RetryDecision, RetryPolicy, Transition,
};
pub use providers::{map_discovered, Provider};
pub use registry::{
    ClientStats, DeliveryTunables, FilterPatch, SubscribeRequest, SubscriptionId,
    SubscriptionInfo, SubscriptionOptions, SubscriptionStats, SubscriptionStatus,
    SubscriptionType, SubscriptionUpdate,
};

// Optional: expose a built-in logging observer (demo/reference).
// Enable with: `--features logging`
#[cfg(feature = "logging")]
pub use observers::LogWriter;

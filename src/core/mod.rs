//! Engine core: ingest, delivery workers, operations and lifecycle.
//!
//! The public entry point is [`NotificationEngine`], built with [`EngineBuilder`].
//!
//! Internal modules:
//! - [`engine`]: the engine instance, publish path and subscription lifecycle;
//! - [`admin`]: broadcasts, metrics/health, dead-letter replay, cleanup, shutdown;
//! - [`control`]: push-channel control frames;
//! - [`worker`]: per-subscription delivery loop with retries and dead-lettering;
//! - [`delivery`]: one breaker-guarded delivery attempt;
//! - [`config`], [`metrics`], [`health`]: configuration, counters, health assessment.

mod admin;
mod builder;
mod config;
mod control;
mod delivery;
mod engine;
mod health;
mod metrics;
mod worker;

pub use admin::{CleanupReport, ReplayOutcome, ShutdownReport};
pub use builder::EngineBuilder;
pub use config::EngineConfig;
pub use engine::{NotificationEngine, PublishReceipt, Unsubscriber};
pub use health::{assess, HealthInputs, HealthIssue, HealthReport, HealthStatus};
pub use metrics::{Metrics, MetricsSnapshot};

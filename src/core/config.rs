//! # Engine configuration.
//!
//! Provides [`EngineConfig`]: centralized settings for the notification engine.
//!
//! Config is used in two ways:
//! 1. **Engine creation**: `NotificationEngine::builder(config).build()`
//! 2. **Subscription defaults**: [`EngineConfig::tunables`] merges per-subscription
//!    [`SubscriptionOptions`] over the engine defaults.
//!
//! ## Optional features
//! Features that can be switched off are `Option`s rather than zero sentinels:
//! - `flush_immediately_at = None` → every event waits for its batch
//! - `idle_timeout = None` → subscriptions never expire
//! - `compression_threshold = None` → batches are never flagged compressed
//! - `auto_replay_interval = None` → dead letters are replayed manually only
//!
//! Durations of background tasks use `Duration::ZERO` for "disabled"
//! (`heartbeat_interval`, `cleanup_interval`), as does `delivery_timeout`.
//!
//! ## Loading
//! ```rust
//! use capnotify::EngineConfig;
//!
//! let cfg = EngineConfig::from_json(r#"{ "max_subscriptions": 50, "default_max_retries": 2 }"#).unwrap();
//! assert_eq!(cfg.max_subscriptions, 50);
//! assert_eq!(cfg.default_batch_size, 100);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::NotifyError;
use crate::events::Severity;
use crate::pipeline::BatchPolicy;
use crate::policies::{BackoffPolicy, BreakerConfig, OverflowPolicy, RetryPolicy};
use crate::registry::{DeliveryTunables, SubscriptionOptions};

/// Global configuration of a [`NotificationEngine`](crate::NotificationEngine).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    // === Registry ===
    /// Total subscription cap.
    pub max_subscriptions: usize,
    /// Subscription cap per client id.
    pub max_subscriptions_per_client: usize,

    // === Batching & queues ===
    /// Default events per batch (`1` disables batching).
    pub default_batch_size: usize,
    /// Default longest wait for a batch to fill.
    pub default_batch_wait: Duration,
    /// Events a subscription may have queued across its priority lanes.
    pub queue_capacity: usize,
    /// What a full queue does with a new event.
    pub overflow: OverflowPolicy,
    /// Events at or above this severity skip the batch wait.
    pub flush_immediately_at: Option<Severity>,
    /// Batches whose payload exceeds this many bytes are flagged compressed.
    pub compression_threshold: Option<usize>,

    // === Deduplication ===
    /// Window during which identical events are suppressed (`0s` disables dedup).
    pub dedup_window: Duration,
    /// Width of the timestamp bucket in the dedup key.
    pub dedup_bucket: Duration,
    /// Keys kept in the dedup cache.
    pub dedup_capacity: usize,

    // === Retries & breaker ===
    /// Default retries after the first failed attempt.
    pub default_max_retries: u32,
    /// Backoff between retries; `base` is the default retry delay.
    pub backoff: BackoffPolicy,
    /// Consecutive failures that open a target's breaker.
    pub failure_threshold: u32,
    /// How long an open breaker rejects attempts before a probe.
    pub circuit_breaker_timeout: Duration,

    // === Dead letters ===
    /// Records kept in the dead-letter store.
    pub dead_letter_capacity: usize,
    /// Period of automatic replay of `max_retries_exceeded` records.
    pub auto_replay_interval: Option<Duration>,

    // === Connections ===
    /// Period of the connection heartbeat (`0s` disables it).
    pub heartbeat_interval: Duration,
    /// Timeout applied to every `send` and `ping` (`0s` disables it).
    pub delivery_timeout: Duration,

    // === Housekeeping ===
    /// Subscriptions idle for this long are removed by `cleanup`.
    pub idle_timeout: Option<Duration>,
    /// Period of the automatic `cleanup` sweep (`0s` disables it).
    pub cleanup_interval: Duration,
    /// Failed-attempt ratio above which `health_check` reports degraded.
    pub error_rate_threshold: f64,
    /// Capacity of the notice bus ring buffer (min 1).
    pub bus_capacity: usize,
    /// How long `shutdown` waits for workers before aborting them.
    pub shutdown_grace: Duration,
}

impl Default for EngineConfig {
    /// Defaults:
    ///
    /// - 10 000 subscriptions, 100 per client
    /// - batches of 100 or 5s, 1 000 queued events per subscription, drop-oldest,
    ///   critical events flush immediately, compression above 64 KiB
    /// - 30s dedup window in 1s buckets, 10 000 keys
    /// - 3 retries, backoff 1s × 2 capped at 30s, no jitter
    /// - breaker opens after 5 failures for 60s
    /// - 1 000 dead letters, no automatic replay
    /// - heartbeat 30s, delivery timeout 10s
    /// - no idle expiry, cleanup every 60s, degraded above 10% failed attempts
    /// - bus capacity 1 024, 10s shutdown grace
    fn default() -> Self {
        Self {
            max_subscriptions: 10_000,
            max_subscriptions_per_client: 100,
            default_batch_size: 100,
            default_batch_wait: Duration::from_secs(5),
            queue_capacity: 1_000,
            overflow: OverflowPolicy::DropOldest,
            flush_immediately_at: Some(Severity::Critical),
            compression_threshold: Some(64 * 1024),
            dedup_window: Duration::from_secs(30),
            dedup_bucket: Duration::from_secs(1),
            dedup_capacity: 10_000,
            default_max_retries: 3,
            backoff: BackoffPolicy::default(),
            failure_threshold: 5,
            circuit_breaker_timeout: Duration::from_secs(60),
            dead_letter_capacity: 1_000,
            auto_replay_interval: None,
            heartbeat_interval: Duration::from_secs(30),
            delivery_timeout: Duration::from_secs(10),
            idle_timeout: None,
            cleanup_interval: Duration::from_secs(60),
            error_rate_threshold: 0.1,
            bus_capacity: 1024,
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

impl EngineConfig {
    /// Parses a JSON config document; missing fields take their defaults.
    pub fn from_json(raw: &str) -> Result<Self, NotifyError> {
        let cfg: Self = serde_json::from_str(raw)
            .map_err(|e| NotifyError::validation(format!("invalid config: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Rejects settings the engine cannot run with.
    pub fn validate(&self) -> Result<(), NotifyError> {
        let positive = [
            ("max_subscriptions", self.max_subscriptions),
            ("max_subscriptions_per_client", self.max_subscriptions_per_client),
            ("default_batch_size", self.default_batch_size),
            ("queue_capacity", self.queue_capacity),
            ("dedup_capacity", self.dedup_capacity),
            ("dead_letter_capacity", self.dead_letter_capacity),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, v)| *v == 0) {
            return Err(NotifyError::validation(format!("{name} must be at least 1")));
        }
        if self.failure_threshold == 0 {
            return Err(NotifyError::validation("failure_threshold must be at least 1"));
        }
        if !(self.backoff.multiplier.is_finite() && self.backoff.multiplier >= 1.0) {
            return Err(NotifyError::validation("backoff.multiplier must be >= 1.0"));
        }
        if self.backoff.base > self.backoff.max {
            return Err(NotifyError::validation("backoff.base must not exceed backoff.max"));
        }
        if !(0.0..=1.0).contains(&self.error_rate_threshold) {
            return Err(NotifyError::validation("error_rate_threshold must be within 0..=1"));
        }
        Ok(())
    }

    /// Capacity of the notice bus, clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }

    /// Whether events of `severity` skip the batch wait.
    #[inline]
    pub fn flushes_immediately(&self, severity: Option<Severity>) -> bool {
        matches!((self.flush_immediately_at, severity), (Some(min), Some(s)) if s >= min)
    }

    pub fn breaker(&self) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: self.failure_threshold,
            open_timeout: self.circuit_breaker_timeout,
        }
    }

    /// Effective tunables for a subscription created with `options`.
    pub fn tunables(&self, options: &SubscriptionOptions) -> DeliveryTunables {
        let backoff = match options.retry_delay {
            Some(base) => {
                let mut b = self.backoff.with_base(base);
                b.max = b.max.max(base);
                b
            }
            None => self.backoff,
        };
        DeliveryTunables {
            batch: BatchPolicy::new(
                options.batch_size.unwrap_or(self.default_batch_size),
                options.batch_timeout.unwrap_or(self.default_batch_wait),
            ),
            retry: RetryPolicy::new(options.max_retries.unwrap_or(self.default_max_retries), backoff),
        }
    }
}

//! Delivery policies.
//!
//! This module groups the knobs that control **whether** a failed delivery is
//! retried, **how long** to wait between attempts, **when** a target is cut off,
//! and **what** a full queue does.
//!
//! ## Contents
//! - [`BackoffPolicy`] how retry delays evolve (base × multiplier^n, capped + jitter)
//! - [`JitterPolicy`]  randomization strategy to avoid synchronized retries
//! - [`RetryPolicy`]   retry budget; yields a [`RetryDecision`]
//! - [`CircuitBreaker`] / [`BreakerBoard`] per-target failure isolation
//! - [`OverflowPolicy`] drop-oldest vs. reject on full subscription queues
//!
//! ## Quick wiring
//! ```text
//! DeliveryWorker ──► BreakerBoard::try_acquire(target)
//!       │                 └─ Err(wait) → DeliveryError::CircuitOpen
//!       ├──► ConnectionHub::deliver(target, batch)
//!       └──► on failure: BreakerBoard::on_failure + RetryPolicy::decide
//!                 ├─ Retry { delay }      → cancellable sleep, try again
//!                 └─ DeadLetter { reason } → DeadLetterStore::add
//! ```
//!
//! ## Defaults
//! - `BackoffPolicy::default()` → base=1s, multiplier=2.0, max=30s, jitter=None.
//! - `RetryPolicy` used by the engine: `max_retries = 3`.
//! - `BreakerConfig::default()` → threshold=5, open timeout=60s.
//! - `OverflowPolicy::DropOldest`.

mod backoff;
mod breaker;
mod jitter;
mod overflow;
mod retry;

pub use backoff::BackoffPolicy;
pub use breaker::{
    Admission, BreakerBoard, BreakerConfig, BreakerSnapshot, CircuitBreaker, CircuitState,
    Transition,
};
pub use jitter::JitterPolicy;
pub use overflow::OverflowPolicy;
pub use retry::{RetryDecision, RetryPolicy};

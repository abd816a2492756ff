//! Dead-letter handling.
//!
//! - [`DeadLetterStore`] bounded FIFO of undeliverable events (oldest evicted first)
//! - [`DeadLetterRecord`] one entry: event, owning subscription, last error, attempts, reason
//! - [`DeadLetterReason`] `max_retries_exceeded` | `non_retryable` | `replay_failed`
//!
//! Replay (`NotificationEngine::retry_dead_letter`) takes a record out, resets the
//! subscription's breakers and makes one fresh attempt; a failure re-adds the
//! record with `attempts + 1` and reason `replay_failed`.

mod store;

pub use store::{DeadLetterReason, DeadLetterRecord, DeadLetterStore};

//! Filter & batch pipeline.
//!
//! Everything between an accepted `publish` and a delivery worker:
//!
//! ```text
//! publish(ev)
//!   ├─► DedupCache::check_and_insert(DedupKey)      engine-wide window
//!   ├─► Registry::candidates(kind) + Filter::matches
//!   └─► per matching subscription:
//!         Mailbox::push(ev, Priority::for_event(ev), immediate, overflow)
//!               │
//!               ▼
//!         DeliveryWorker: Mailbox::take_due(BatchPolicy) ─► Batch
//! ```
//!
//! ## Contents
//! - [`DedupCache`], [`DedupKey`] time-windowed duplicate suppression
//! - [`Priority`], [`PriorityQueues`], [`Mailbox`], [`PushOutcome`] bounded lanes
//! - [`Batch`], [`BatchPolicy`], [`PublishedEvent`] batch assembly

mod batch;
mod dedup;
mod priority;

pub use batch::{Batch, BatchPolicy, PublishedEvent};
pub use dedup::{DedupCache, DedupKey};
pub use priority::{Mailbox, Priority, PriorityQueues, PushOutcome};

//! Event data model, push-channel frames, and the engine notice bus.
//!
//! ## Contents
//! - [`UpdateEvent`] and its variants: what producers publish
//! - [`Frame`], [`DataFrame`], [`SubscribeFrame`]: push-channel envelope
//! - [`Notice`], [`NoticeKind`]: what the engine reports about itself
//! - [`Bus`]: thin wrapper over `tokio::sync::broadcast` carrying notices
//!
//! ## Quick reference
//! - **Notice publishers**: `NotificationEngine` (lifecycle, ingest),
//!   `DeliveryWorker` (delivery, retries, breaker, dead letters),
//!   `ConnectionHub` (pruning), `ObserverSet` workers (overflow/panic).
//! - **Notice consumers**: the engine's observer listener, which fans out to
//!   the `ObserverSet`.

mod bus;
mod frame;
mod notice;
mod update;

pub use bus::Bus;
pub use frame::{DataFrame, Frame, FrameOptions, SubscribeFrame};
pub use notice::{Notice, NoticeKind};
pub use update::{
    CapabilityChange, CapabilityUpdateEvent, ModelChange, ModelUpdateEvent, ProviderStatus,
    ProviderUpdateEvent, Severity, UpdateEvent, UpdateKind,
};

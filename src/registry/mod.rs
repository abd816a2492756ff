//! Subscription registry.
//!
//! Owns subscription identity, indexes and lifecycle state.
//!
//! ## Contents
//! - [`Registry`] primary map + client/type indexes, caps
//! - [`Subscription`] live state: settings, pause flag, mailbox, breakers, counters
//! - [`SubscribeRequest`], [`SubscriptionUpdate`], [`SubscriptionOptions`] API inputs
//! - [`SubscriptionInfo`], [`SubscriptionStats`], [`ClientStats`] snapshots

mod index;
mod subscription;
mod types;

pub use index::Registry;
pub(crate) use subscription::Settings;
pub use subscription::{ClientStats, Subscription, SubscriptionInfo, SubscriptionStats};
pub use types::{
    DeliveryTunables, FilterPatch, SubscribeRequest, SubscriptionId, SubscriptionOptions,
    SubscriptionStatus, SubscriptionType, SubscriptionUpdate,
};

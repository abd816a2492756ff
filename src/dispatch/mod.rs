//! Dispatch layer.
//!
//! - [`Connection`] the transport contract (`send`, optional `ping`)
//! - [`ConnectionId`] identifier of a registered connection
//! - [`ConnectionHub`] registration, timed delivery, concurrent fan-out,
//!   client-wide broadcast with pruning, periodic heartbeat
//! - [`DeliveryResult`], [`BroadcastReport`], [`BroadcastStatus`] fan-out results

mod connection;
mod hub;

pub use connection::{Connection, ConnectionId};
pub use hub::{BroadcastReport, BroadcastStatus, ConnectionHub, DeliveryResult};

//! # Connection contract.
//!
//! A [`Connection`] is anything that can push a [`Batch`] to a consumer: a
//! socket, a server-push stream, an outbound callback. Transports live outside
//! this crate; they only need to classify their failures as [`DeliveryError`]s:
//!
//! - transient I/O, overload → [`DeliveryError::Transient`] (retried)
//! - payload or auth rejected, peer gone → `Invalid`, `Unauthorized`, `Permanent`
//!   (dead-lettered without retry)
//!
//! The engine wraps every `send` and `ping` in the configured delivery timeout.
//!
//! ## Example
//! ```rust
//! use async_trait::async_trait;
//! use capnotify::{Batch, Connection, DeliveryError};
//!
//! struct Stdout;
//!
//! #[async_trait]
//! impl Connection for Stdout {
//!     async fn send(&self, batch: &Batch) -> Result<(), DeliveryError> {
//!         for frame in batch.frames() {
//!             println!("{}", serde_json::to_string(&frame).map_err(|e| DeliveryError::Invalid {
//!                 reason: e.to_string(),
//!             })?);
//!         }
//!         Ok(())
//!     }
//!
//!     fn name(&self) -> &'static str {
//!         "stdout"
//!     }
//! }
//! ```

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::DeliveryError;
use crate::pipeline::Batch;

/// Identifier of a registered connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&ConnectionId> for ConnectionId {
    fn from(id: &ConnectionId) -> Self {
        id.clone()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Push channel to one consumer.
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    /// Delivers one batch; returns once the transport accepted it.
    async fn send(&self, batch: &Batch) -> Result<(), DeliveryError>;

    /// Liveness probe used by the heartbeat; the default always succeeds.
    async fn ping(&self) -> Result<(), DeliveryError> {
        Ok(())
    }

    /// Human-readable name (for logs).
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

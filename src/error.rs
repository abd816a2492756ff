//! Error types used by the notification engine and its delivery path.
//!
//! This module defines two main error enums:
//!
//! - [`NotifyError`]: errors surfaced synchronously by the public API
//!   (malformed input, capacity limits, unknown ids).
//! - [`DeliveryError`]: errors produced while handing a batch to a connection.
//!   These never reach producers; they drive retries, the circuit breaker and
//!   the dead-letter store.
//!
//! Both types provide `as_label` for logging/metrics, and [`DeliveryError`]
//! additionally classifies itself via [`DeliveryError::is_retryable`].

use std::time::Duration;
use thiserror::Error;

/// # Errors returned by the engine API.
///
/// Only input validation and hard capacity limits are reported here; everything
/// downstream of an accepted publish is observable through metrics, notices and
/// the dead-letter queue instead.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotifyError {
    /// Malformed subscription, filter, event or frame.
    #[error("validation failed: {reason}")]
    Validation {
        /// What was wrong with the input.
        reason: String,
    },

    /// A subscription or queue limit was reached.
    #[error("{resource} limit of {limit} reached")]
    ResourceExhausted {
        /// Which limit was hit (`subscriptions`, `client_subscriptions`, `queue`).
        resource: &'static str,
        /// The configured limit.
        limit: usize,
    },

    /// The referenced subscription, connection or dead letter does not exist.
    #[error("{what} not found: {id}")]
    NotFound {
        /// Kind of object that was looked up.
        what: &'static str,
        /// The id that was not found.
        id: String,
    },

    /// The engine has been shut down.
    #[error("engine is shut down")]
    Closed,
}

impl NotifyError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use capnotify::NotifyError;
    ///
    /// let err = NotifyError::ResourceExhausted { resource: "queue", limit: 8 };
    /// assert_eq!(err.as_label(), "resource_exhausted");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            NotifyError::Validation { .. } => "validation_error",
            NotifyError::ResourceExhausted { .. } => "resource_exhausted",
            NotifyError::NotFound { .. } => "not_found",
            NotifyError::Closed => "closed",
        }
    }

    pub(crate) fn validation(reason: impl Into<String>) -> Self {
        NotifyError::Validation {
            reason: reason.into(),
        }
    }

    pub(crate) fn not_found(what: &'static str, id: impl ToString) -> Self {
        NotifyError::NotFound {
            what,
            id: id.to_string(),
        }
    }
}

/// Coarse failure class of a [`DeliveryError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// May succeed if retried.
    Transient,
    /// Will not succeed on retry; goes straight to the dead-letter store.
    Permanent,
}

/// # Errors produced while delivering a batch.
///
/// Connections return these from [`Connection::send`](crate::Connection::send);
/// the engine adds [`DeliveryError::Timeout`], [`DeliveryError::CircuitOpen`] and
/// [`DeliveryError::NotFound`] itself.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// Transient I/O failure (reset, refused, overloaded peer).
    #[error("transient delivery failure: {reason}")]
    Transient {
        /// The underlying error message.
        reason: String,
    },

    /// The connection did not complete `send` within the delivery timeout.
    #[error("delivery timed out after {timeout:?}")]
    Timeout {
        /// The timeout that was exceeded.
        timeout: Duration,
    },

    /// Fast failure: the target's circuit breaker is open.
    #[error("circuit open; next attempt allowed in {retry_in:?}")]
    CircuitOpen {
        /// Time left until the breaker allows a probe.
        retry_in: Duration,
    },

    /// Permanent failure reported by the transport.
    #[error("permanent delivery failure: {reason}")]
    Permanent {
        /// The underlying error message.
        reason: String,
    },

    /// The receiver rejected the payload as malformed.
    #[error("payload rejected: {reason}")]
    Invalid {
        /// The underlying error message.
        reason: String,
    },

    /// The receiver refused the delivery for authentication reasons.
    #[error("unauthorized: {reason}")]
    Unauthorized {
        /// The underlying error message.
        reason: String,
    },

    /// No live connection is registered for the delivery target.
    #[error("connection not found: {connection}")]
    NotFound {
        /// The missing connection id.
        connection: String,
    },
}

impl DeliveryError {
    /// Convenience constructor for [`DeliveryError::Transient`].
    pub fn transient(reason: impl Into<String>) -> Self {
        DeliveryError::Transient {
            reason: reason.into(),
        }
    }

    /// Convenience constructor for [`DeliveryError::Permanent`].
    pub fn permanent(reason: impl Into<String>) -> Self {
        DeliveryError::Permanent {
            reason: reason.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use capnotify::DeliveryError;
    /// use std::time::Duration;
    ///
    /// let err = DeliveryError::Timeout { timeout: Duration::from_secs(1) };
    /// assert_eq!(err.as_label(), "delivery_timeout");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            DeliveryError::Transient { .. } => "delivery_transient",
            DeliveryError::Timeout { .. } => "delivery_timeout",
            DeliveryError::CircuitOpen { .. } => "circuit_open",
            DeliveryError::Permanent { .. } => "delivery_permanent",
            DeliveryError::Invalid { .. } => "delivery_invalid",
            DeliveryError::Unauthorized { .. } => "delivery_unauthorized",
            DeliveryError::NotFound { .. } => "connection_not_found",
        }
    }

    /// Indicates whether a retry may succeed.
    ///
    /// Returns `true` for [`DeliveryError::Transient`], [`DeliveryError::Timeout`]
    /// and [`DeliveryError::CircuitOpen`], `false` otherwise.
    ///
    /// # Example
    /// ```
    /// use capnotify::DeliveryError;
    ///
    /// assert!(DeliveryError::transient("reset by peer").is_retryable());
    /// assert!(!DeliveryError::permanent("gone").is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DeliveryError::Transient { .. }
                | DeliveryError::Timeout { .. }
                | DeliveryError::CircuitOpen { .. }
        )
    }

    /// Returns the failure class of this error.
    pub fn class(&self) -> FailureClass {
        if self.is_retryable() {
            FailureClass::Transient
        } else {
            FailureClass::Permanent
        }
    }
}

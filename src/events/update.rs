//! # Update events emitted by the discovery side.
//!
//! [`UpdateEvent`] is a closed set of variants:
//! - [`ModelUpdateEvent`]: a model was added, changed, deprecated or removed;
//! - [`ProviderUpdateEvent`]: a provider changed status;
//! - [`CapabilityUpdateEvent`]: a capability appeared, changed or disappeared.
//!
//! Every variant carries a timestamp and an optional [`Severity`]. Events are
//! immutable once published: the engine wraps them in an `Arc` and never
//! hands out mutable access.
//!
//! ## Example
//! ```rust
//! use capnotify::{CapabilityChange, CapabilityUpdateEvent, Severity, UpdateEvent, UpdateKind};
//!
//! let ev: UpdateEvent = CapabilityUpdateEvent::new("vision", CapabilityChange::Added)
//!     .with_model("gpt-4o")
//!     .with_severity(Severity::High)
//!     .into();
//!
//! assert_eq!(ev.kind(), UpdateKind::CapabilityUpdate);
//! assert_eq!(ev.subject(), "vision");
//! ```

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::NotifyError;

/// Severity attached to an update.
///
/// Ordered from least to most severe, so `Severity::High > Severity::Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Stable lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    /// Numeric rank (`low = 0` .. `critical = 3`) used by ordered filter operators.
    pub fn rank(&self) -> u8 {
        *self as u8
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = NotifyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(NotifyError::validation(format!("unknown severity '{other}'"))),
        }
    }
}

/// Discriminant of an [`UpdateEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateKind {
    ModelUpdate,
    ProviderUpdate,
    CapabilityUpdate,
}

impl UpdateKind {
    /// Stable snake_case name, also used as the `type` of data frames.
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateKind::ModelUpdate => "model_update",
            UpdateKind::ProviderUpdate => "provider_update",
            UpdateKind::CapabilityUpdate => "capability_update",
        }
    }
}

impl fmt::Display for UpdateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened to a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelChange {
    Added,
    Updated,
    Deprecated,
    Removed,
}

/// Reported provider status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderStatus {
    Available,
    Degraded,
    Unavailable,
}

/// What happened to a capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityChange {
    Added,
    Updated,
    Removed,
}

/// A model was added, changed, deprecated or removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelUpdateEvent {
    pub model_id: String,
    pub provider_name: String,
    pub change: ModelChange,
    /// Capabilities the model advertises after the change.
    #[serde(default)]
    pub capabilities: Vec<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
}

impl ModelUpdateEvent {
    /// Creates an event stamped with the current time and no severity.
    pub fn new(
        model_id: impl Into<String>,
        provider_name: impl Into<String>,
        change: ModelChange,
    ) -> Self {
        Self {
            model_id: model_id.into(),
            provider_name: provider_name.into(),
            change,
            capabilities: Vec::new(),
            timestamp: Utc::now(),
            severity: None,
        }
    }

    /// Replaces the advertised capability list.
    pub fn with_capabilities<I, S>(mut self, caps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = caps.into_iter().map(Into::into).collect();
        self
    }

    #[inline]
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    #[inline]
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// A provider changed status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderUpdateEvent {
    pub provider_name: String,
    pub status: ProviderStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
}

impl ProviderUpdateEvent {
    /// Creates an event stamped with the current time and no severity.
    pub fn new(provider_name: impl Into<String>, status: ProviderStatus) -> Self {
        Self {
            provider_name: provider_name.into(),
            status,
            message: None,
            timestamp: Utc::now(),
            severity: None,
        }
    }

    #[inline]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    #[inline]
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    #[inline]
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// A capability appeared, changed or disappeared, optionally scoped to a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityUpdateEvent {
    pub capability: String,
    pub change: CapabilityChange,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_name: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
}

impl CapabilityUpdateEvent {
    /// Creates an event stamped with the current time and no severity.
    pub fn new(capability: impl Into<String>, change: CapabilityChange) -> Self {
        Self {
            capability: capability.into(),
            change,
            model_id: None,
            provider_name: None,
            timestamp: Utc::now(),
            severity: None,
        }
    }

    #[inline]
    pub fn with_model(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = Some(model_id.into());
        self
    }

    #[inline]
    pub fn with_provider(mut self, provider_name: impl Into<String>) -> Self {
        self.provider_name = Some(provider_name.into());
        self
    }

    #[inline]
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    #[inline]
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Update emitted by the discovery side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UpdateEvent {
    ModelUpdate(ModelUpdateEvent),
    ProviderUpdate(ProviderUpdateEvent),
    CapabilityUpdate(CapabilityUpdateEvent),
}

impl UpdateEvent {
    pub fn kind(&self) -> UpdateKind {
        match self {
            UpdateEvent::ModelUpdate(_) => UpdateKind::ModelUpdate,
            UpdateEvent::ProviderUpdate(_) => UpdateKind::ProviderUpdate,
            UpdateEvent::CapabilityUpdate(_) => UpdateKind::CapabilityUpdate,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            UpdateEvent::ModelUpdate(e) => e.timestamp,
            UpdateEvent::ProviderUpdate(e) => e.timestamp,
            UpdateEvent::CapabilityUpdate(e) => e.timestamp,
        }
    }

    pub fn severity(&self) -> Option<Severity> {
        match self {
            UpdateEvent::ModelUpdate(e) => e.severity,
            UpdateEvent::ProviderUpdate(e) => e.severity,
            UpdateEvent::CapabilityUpdate(e) => e.severity,
        }
    }

    /// The identifying value of the event: model id, provider name or capability.
    pub fn subject(&self) -> &str {
        match self {
            UpdateEvent::ModelUpdate(e) => &e.model_id,
            UpdateEvent::ProviderUpdate(e) => &e.provider_name,
            UpdateEvent::CapabilityUpdate(e) => &e.capability,
        }
    }

    pub fn model_id(&self) -> Option<&str> {
        match self {
            UpdateEvent::ModelUpdate(e) => Some(&e.model_id),
            UpdateEvent::ProviderUpdate(_) => None,
            UpdateEvent::CapabilityUpdate(e) => e.model_id.as_deref(),
        }
    }

    pub fn provider_name(&self) -> Option<&str> {
        match self {
            UpdateEvent::ModelUpdate(e) => Some(&e.provider_name),
            UpdateEvent::ProviderUpdate(e) => Some(&e.provider_name),
            UpdateEvent::CapabilityUpdate(e) => e.provider_name.as_deref(),
        }
    }

    /// Capabilities the event talks about (a model's list, or the single capability).
    pub fn capabilities(&self) -> Vec<&str> {
        match self {
            UpdateEvent::ModelUpdate(e) => e.capabilities.iter().map(String::as_str).collect(),
            UpdateEvent::ProviderUpdate(_) => Vec::new(),
            UpdateEvent::CapabilityUpdate(e) => vec![e.capability.as_str()],
        }
    }

    /// Rejects events without an identifying subject.
    pub fn validate(&self) -> Result<(), NotifyError> {
        if self.subject().trim().is_empty() {
            return Err(NotifyError::validation(format!(
                "{} event has an empty {}",
                self.kind(),
                match self.kind() {
                    UpdateKind::ModelUpdate => "model_id",
                    UpdateKind::ProviderUpdate => "provider_name",
                    UpdateKind::CapabilityUpdate => "capability",
                }
            )));
        }
        Ok(())
    }
}

impl From<ModelUpdateEvent> for UpdateEvent {
    fn from(e: ModelUpdateEvent) -> Self {
        UpdateEvent::ModelUpdate(e)
    }
}

impl From<ProviderUpdateEvent> for UpdateEvent {
    fn from(e: ProviderUpdateEvent) -> Self {
        UpdateEvent::ProviderUpdate(e)
    }
}

impl From<CapabilityUpdateEvent> for UpdateEvent {
    fn from(e: CapabilityUpdateEvent) -> Self {
        UpdateEvent::CapabilityUpdate(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_order_and_parse() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::Medium > Severity::Low);
        assert_eq!("HIGH".parse::<Severity>().unwrap(), Severity::High);
        assert!("urgent".parse::<Severity>().is_err());
    }

    #[test]
    fn test_empty_subject_is_rejected() {
        let ev: UpdateEvent = ProviderUpdateEvent::new("  ", ProviderStatus::Degraded).into();
        assert!(matches!(ev.validate(), Err(NotifyError::Validation { .. })));
    }

    #[test]
    fn test_tagged_json_shape() {
        let ev: UpdateEvent = ModelUpdateEvent::new("claude-x", "anthropic", ModelChange::Added).into();
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "model_update");
        assert_eq!(json["model_id"], "claude-x");
        assert!(json.get("severity").is_none());
    }
}

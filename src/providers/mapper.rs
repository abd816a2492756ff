//! # Vendor record → `ModelUpdateEvent`.
//!
//! ```text
//! openai     {"id","created": <epoch s>,"capabilities"?: [..]}
//! anthropic  {"id","created_at": <rfc3339>,"capabilities"?: [..]}
//! google     {"name": "models/<id>","supportedGenerationMethods": [..]}
//! custom     {"provider","model_id" | "id","capabilities"?: [..],"timestamp"?: <rfc3339>}
//! ```
//!
//! Every record may carry `"change"` (`added` by default) and `"severity"`.
//! Google generation methods become snake_case capabilities
//! (`generateContent` → `generate_content`).

use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::error::NotifyError;
use crate::events::{ModelChange, ModelUpdateEvent, Severity};

/// Known model vendors.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Provider {
    OpenAi,
    Anthropic,
    Google,
    /// Any other vendor, by name; records use the generic shape.
    Custom(String),
}

impl Provider {
    /// Resolves a vendor name (`"openai"`, `"Anthropic"`, ...); unknown names become `Custom`.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "openai" | "open_ai" => Provider::OpenAi,
            "anthropic" => Provider::Anthropic,
            "google" | "gemini" => Provider::Google,
            _ => Provider::Custom(name.trim().to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Anthropic => "anthropic",
            Provider::Google => "google",
            Provider::Custom(name) => name,
        }
    }

    /// Maps one discovered model record of this vendor.
    ///
    /// # Errors
    /// [`NotifyError::Validation`] when the record lacks a model id or a field has the
    /// wrong type.
    pub fn map_model(&self, record: &Value) -> Result<ModelUpdateEvent, NotifyError> {
        let common: Common = decode(record)?;
        let (model_id, capabilities, timestamp) = match self {
            Provider::OpenAi => {
                let r: OpenAiModel = decode(record)?;
                let at = r.created.and_then(|secs| Utc.timestamp_opt(secs, 0).single());
                (r.id, r.capabilities, at)
            }
            Provider::Anthropic => {
                let r: AnthropicModel = decode(record)?;
                (r.id, r.capabilities, r.created_at)
            }
            Provider::Google => {
                let r: GoogleModel = decode(record)?;
                let id = r.name.strip_prefix("models/").unwrap_or(&r.name).to_string();
                let caps = r
                    .supported_generation_methods
                    .iter()
                    .map(|m| snake_case(m))
                    .collect();
                (id, caps, None)
            }
            Provider::Custom(_) => {
                let r: CustomModel = decode(record)?;
                let id = r.model_id.or(r.id).unwrap_or_default();
                (id, r.capabilities, r.timestamp)
            }
        };

        if model_id.trim().is_empty() {
            return Err(NotifyError::validation(format!(
                "{} record has no model id",
                self.name()
            )));
        }

        let mut ev = ModelUpdateEvent::new(model_id, self.name(), common.change)
            .with_capabilities(capabilities);
        if let Some(at) = timestamp {
            ev = ev.at(at);
        }
        if let Some(sev) = common.severity {
            ev = ev.with_severity(sev);
        }
        Ok(ev)
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Maps a record using the vendor named by its `provider` field.
pub fn map_discovered(record: &Value) -> Result<ModelUpdateEvent, NotifyError> {
    let name = record
        .get("provider")
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| NotifyError::validation("record has no 'provider' field"))?;
    Provider::from_name(name).map_model(record)
}

#[derive(Deserialize)]
struct Common {
    #[serde(default = "added")]
    change: ModelChange,
    #[serde(default)]
    severity: Option<Severity>,
}

fn added() -> ModelChange {
    ModelChange::Added
}

#[derive(Deserialize)]
struct OpenAiModel {
    #[serde(default)]
    id: String,
    created: Option<i64>,
    #[serde(default)]
    capabilities: Vec<String>,
}

#[derive(Deserialize)]
struct AnthropicModel {
    #[serde(default)]
    id: String,
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    capabilities: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleModel {
    #[serde(default)]
    name: String,
    #[serde(default)]
    supported_generation_methods: Vec<String>,
}

#[derive(Deserialize)]
struct CustomModel {
    model_id: Option<String>,
    id: Option<String>,
    #[serde(default)]
    capabilities: Vec<String>,
    timestamp: Option<DateTime<Utc>>,
}

fn decode<T: for<'de> Deserialize<'de>>(record: &Value) -> Result<T, NotifyError> {
    T::deserialize(record).map_err(|e| NotifyError::validation(format!("bad model record: {e}")))
}

fn snake_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 4);
    for (i, c) in s.chars().enumerate() {
        if c.is_ascii_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

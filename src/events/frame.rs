//! # Push-channel frames.
//!
//! Transport-agnostic envelope multiplexing data and control messages on one
//! channel. Frames are JSON objects discriminated by a `frame` field:
//!
//! ```text
//! {"frame":"data","id":"…","type":"model_update","event":{…},"timestamp":"…","compressed":true}
//! {"frame":"subscribe","type":"capability_update","filters":[{"field":"capability","operator":"equals","value":"vision"}]}
//! {"frame":"unsubscribe","subscription_id":"…"}
//! {"frame":"ping"} / {"frame":"pong"}
//! {"frame":"authenticate","token":"…"}
//! ```
//!
//! Replies produced by the engine: `subscribed`, `unsubscribed`, `pong`, `error`.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::NotifyError;
use crate::events::{UpdateEvent, UpdateKind};
use crate::filters::{Combinator, PredicateSpec};
use crate::registry::{SubscriptionId, SubscriptionOptions, SubscriptionType};

/// One message on the push channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "frame", rename_all = "snake_case")]
pub enum Frame {
    Data(DataFrame),
    Subscribe(SubscribeFrame),
    Unsubscribe {
        subscription_id: SubscriptionId,
    },
    Ping {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        nonce: Option<u64>,
    },
    Pong {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        nonce: Option<u64>,
    },
    Authenticate {
        token: String,
    },
    Subscribed {
        subscription_id: SubscriptionId,
    },
    Unsubscribed {
        subscription_id: SubscriptionId,
        removed: bool,
    },
    Error {
        code: String,
        message: String,
    },
}

impl Frame {
    /// Parses a frame, mapping malformed input to [`NotifyError::Validation`].
    pub fn from_json(raw: &str) -> Result<Self, NotifyError> {
        serde_json::from_str(raw).map_err(|e| NotifyError::validation(format!("bad frame: {e}")))
    }

    pub fn to_json(&self) -> Result<String, NotifyError> {
        serde_json::to_string(self).map_err(|e| NotifyError::validation(format!("unencodable frame: {e}")))
    }

    /// Error reply for a failed control frame.
    pub fn error(err: &NotifyError) -> Self {
        Frame::Error {
            code: err.as_label().to_string(),
            message: err.to_string(),
        }
    }
}

/// Data frame: one event of a delivered batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataFrame {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: UpdateKind,
    pub event: UpdateEvent,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub compressed: bool,
}

/// Subscription request received over the channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscribeFrame {
    #[serde(rename = "type")]
    pub kind: SubscriptionType,
    #[serde(default)]
    pub combinator: Combinator,
    #[serde(default)]
    pub filters: Vec<PredicateSpec>,
    #[serde(default)]
    pub options: FrameOptions,
}

/// Wire form of [`SubscriptionOptions`] (durations in milliseconds).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_delay_ms: Option<u64>,
}

impl From<FrameOptions> for SubscriptionOptions {
    fn from(o: FrameOptions) -> Self {
        SubscriptionOptions {
            batch_size: o.batch_size,
            batch_timeout: o.batch_timeout_ms.map(Duration::from_millis),
            max_retries: o.max_retries,
            retry_delay: o.retry_delay_ms.map(Duration::from_millis),
        }
    }
}

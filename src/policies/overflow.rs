//! # Queue overflow policy.

use serde::{Deserialize, Serialize};

/// What a full subscription queue does with a new event.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest queued event of the lowest priority that does not
    /// outrank the incoming one; if every queued event outranks it, drop the
    /// incoming event instead.
    #[default]
    DropOldest,
    /// Refuse the incoming event for this subscription (load shedding).
    Reject,
}

impl OverflowPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverflowPolicy::DropOldest => "drop_oldest",
            OverflowPolicy::Reject => "reject",
        }
    }
}

//! # Jitter policy for retry delays.
//!
//! [`JitterPolicy`] perturbs backoff delays so that many subscriptions failing
//! against the same receiver do not retry in lockstep.
//!
//! - [`JitterPolicy::None`]: no randomization, predictable delays
//! - [`JitterPolicy::Bounded`]: delay × (1 ± percent/100), usually ±10%
//! - [`JitterPolicy::Equal`]: delay/2 + random[0, delay/2]

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Policy controlling randomization of retry delays.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterPolicy {
    /// Use the exact backoff delay.
    #[default]
    None,

    /// Uniformly perturb the delay by up to `percent` in either direction.
    Bounded {
        /// Maximum deviation in percent (clamped to 100).
        percent: u8,
    },

    /// Equal jitter: delay = delay/2 + random[0, delay/2].
    Equal,
}

impl JitterPolicy {
    /// The ±10% bounded jitter.
    pub const TEN_PERCENT: JitterPolicy = JitterPolicy::Bounded { percent: 10 };

    /// Applies jitter to the given delay.
    pub fn apply(&self, delay: Duration) -> Duration {
        match self {
            JitterPolicy::None => delay,
            JitterPolicy::Bounded { percent } => bounded_jitter(delay, *percent),
            JitterPolicy::Equal => equal_jitter(delay),
        }
    }
}

/// delay × (1 + r), r uniform in [-p, +p]
fn bounded_jitter(delay: Duration, percent: u8) -> Duration {
    let ms = delay.as_millis() as u64;
    let spread = ms * u64::from(percent.min(100)) / 100;
    if spread == 0 {
        return delay;
    }
    let mut rng = rand::rng();
    let jittered = rng.random_range(ms - spread..=ms + spread);
    Duration::from_millis(jittered)
}

/// delay/2 + random[0, delay/2]
fn equal_jitter(delay: Duration) -> Duration {
    let ms = delay.as_millis() as u64;
    if ms == 0 {
        return Duration::ZERO;
    }
    let half = ms / 2;
    let jitter = if half == 0 {
        0
    } else {
        rand::rng().random_range(0..=half)
    };
    Duration::from_millis(half + jitter)
}

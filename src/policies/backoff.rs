//! # Backoff policy for delivery retries.
//!
//! [`BackoffPolicy`] controls how retry delays grow after repeated delivery failures.
//! It is parameterized by:
//! - [`BackoffPolicy::multiplier`] the multiplicative growth factor;
//! - [`BackoffPolicy::base`] the delay before the first retry;
//! - [`BackoffPolicy::max`] the maximum delay cap.
//!
//! The delay for retry `n` (0-indexed) is `base × multiplier^n`, clamped to `max`,
//! then jitter is applied and the result clamped to `max` again. The base delay is
//! derived purely from the retry number, so jitter never feeds back into later delays.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use capnotify::{BackoffPolicy, JitterPolicy};
//!
//! let backoff = BackoffPolicy {
//!     base: Duration::from_millis(100),
//!     max: Duration::from_secs(10),
//!     multiplier: 2.0,
//!     jitter: JitterPolicy::None,
//! };
//!
//! assert_eq!(backoff.next(0), Duration::from_millis(100));
//! assert_eq!(backoff.next(1), Duration::from_millis(200));
//! // 100ms × 2^10 = 102_400ms → capped at max=10s
//! assert_eq!(backoff.next(10), Duration::from_secs(10));
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::policies::jitter::JitterPolicy;

/// Retry backoff policy.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub base: Duration,
    /// Maximum delay cap for retries.
    pub max: Duration,
    /// Multiplicative growth factor (`>= 1.0` recommended).
    pub multiplier: f64,
    /// Jitter policy applied on top of the clamped delay.
    #[serde(default)]
    pub jitter: JitterPolicy,
}

impl Default for BackoffPolicy {
    /// Returns a policy with:
    /// - `base = 1s`;
    /// - `multiplier = 2.0`;
    /// - `max = 30s`;
    /// - no jitter.
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: JitterPolicy::None,
        }
    }
}

impl BackoffPolicy {
    /// Returns a copy with a different base delay.
    pub fn with_base(mut self, base: Duration) -> Self {
        self.base = base;
        self
    }

    /// Computes the delay before retry number `retry` (0-indexed).
    ///
    /// # Notes
    /// - Overflowing or non-finite intermediate values clamp to [`BackoffPolicy::max`].
    /// - The result never exceeds [`BackoffPolicy::max`], jitter included.
    pub fn next(&self, retry: u32) -> Duration {
        let max_secs = self.max.as_secs_f64();
        let clamped_exp = retry.min(i32::MAX as u32) as i32;
        let unclamped_secs = self.base.as_secs_f64() * self.multiplier.powi(clamped_exp);

        let base =
            if !unclamped_secs.is_finite() || unclamped_secs < 0.0 || unclamped_secs > max_secs {
                self.max
            } else {
                Duration::from_secs_f64(unclamped_secs)
            };

        self.jitter.apply(base).min(self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(base_ms: u64, max: Duration, multiplier: f64) -> BackoffPolicy {
        BackoffPolicy {
            base: Duration::from_millis(base_ms),
            max,
            multiplier,
            jitter: JitterPolicy::None,
        }
    }

    #[test]
    fn test_defaults() {
        let p = BackoffPolicy::default();
        assert_eq!(p.next(0), Duration::from_secs(1));
        assert_eq!(p.next(1), Duration::from_secs(2));
        assert_eq!(p.next(2), Duration::from_secs(4));
        assert_eq!(p.next(5), Duration::from_secs(30));
    }

    #[test]
    fn test_exponential_growth_no_jitter() {
        let p = policy(100, Duration::from_secs(30), 2.0);
        assert_eq!(p.next(0), Duration::from_millis(100));
        assert_eq!(p.next(1), Duration::from_millis(200));
        assert_eq!(p.next(2), Duration::from_millis(400));
        assert_eq!(p.next(3), Duration::from_millis(800));
    }

    #[test]
    fn test_constant_multiplier() {
        let p = policy(500, Duration::from_secs(30), 1.0);
        for retry in 0..10 {
            assert_eq!(p.next(retry), Duration::from_millis(500), "retry {retry}");
        }
    }

    #[test]
    fn test_base_exceeds_max() {
        let p = BackoffPolicy {
            base: Duration::from_secs(10),
            ..policy(0, Duration::from_secs(5), 2.0)
        };
        assert_eq!(p.next(0), Duration::from_secs(5));
    }

    #[test]
    fn test_non_finite_overflow_clamps_to_max() {
        let p = policy(100, Duration::from_secs(10), 2.0);
        assert_eq!(p.next(u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn test_jitter_never_exceeds_max() {
        let p = BackoffPolicy {
            jitter: JitterPolicy::TEN_PERCENT,
            ..policy(1000, Duration::from_secs(2), 2.0)
        };
        for _ in 0..100 {
            assert!(p.next(4) <= Duration::from_secs(2));
            let first = p.next(0);
            assert!(first >= Duration::from_millis(900) && first <= Duration::from_millis(1100));
        }
    }
}

//! # Retry decision for failed deliveries.
//!
//! [`RetryPolicy`] turns a failed attempt into either another attempt after a
//! backoff delay or a terminal dead-letter outcome:
//!
//! ```text
//! DeliveryError ──► is_retryable()? ──no──► DeadLetter(NonRetryable)
//!                        │yes
//!                        ▼
//!            retries_done < max_retries? ──no──► DeadLetter(MaxRetriesExceeded)
//!                        │yes
//!                        ▼
//!            Retry { delay: backoff.next(retries_done) }
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::dead_letter::DeadLetterReason;
use crate::error::DeliveryError;
use crate::policies::backoff::BackoffPolicy;

/// Outcome of [`RetryPolicy::decide`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep for `delay`, then try again.
    Retry { delay: Duration },
    /// Stop and move the events to the dead-letter store.
    DeadLetter { reason: DeadLetterReason },
}

/// Retry budget plus backoff.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt; `0` means a single attempt.
    pub max_retries: u32,
    #[serde(default)]
    pub backoff: BackoffPolicy,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: BackoffPolicy) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    /// Decides what happens after an attempt failed with `err`, given how many
    /// retries have already been made.
    pub fn decide(&self, retries_done: u32, err: &DeliveryError) -> RetryDecision {
        if !err.is_retryable() {
            return RetryDecision::DeadLetter {
                reason: DeadLetterReason::NonRetryable,
            };
        }
        if retries_done >= self.max_retries {
            return RetryDecision::DeadLetter {
                reason: DeadLetterReason::MaxRetriesExceeded,
            };
        }
        RetryDecision::Retry {
            delay: self.backoff.next(retries_done),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policies::JitterPolicy;

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(
            max_retries,
            BackoffPolicy {
                base: Duration::from_millis(100),
                max: Duration::from_secs(30),
                multiplier: 2.0,
                jitter: JitterPolicy::None,
            },
        )
    }

    #[test]
    fn test_retries_then_exhausts() {
        let p = policy(2);
        let err = DeliveryError::transient("reset");
        assert_eq!(
            p.decide(0, &err),
            RetryDecision::Retry {
                delay: Duration::from_millis(100)
            }
        );
        assert_eq!(
            p.decide(1, &err),
            RetryDecision::Retry {
                delay: Duration::from_millis(200)
            }
        );
        assert_eq!(
            p.decide(2, &err),
            RetryDecision::DeadLetter {
                reason: DeadLetterReason::MaxRetriesExceeded
            }
        );
    }

    #[test]
    fn test_non_retryable_goes_straight_to_dead_letter() {
        let p = policy(5);
        for err in [
            DeliveryError::permanent("gone"),
            DeliveryError::Unauthorized {
                reason: "token expired".into(),
            },
            DeliveryError::NotFound {
                connection: "ws-9".into(),
            },
        ] {
            assert_eq!(
                p.decide(0, &err),
                RetryDecision::DeadLetter {
                    reason: DeadLetterReason::NonRetryable
                },
                "{err}"
            );
        }
    }

    #[test]
    fn test_circuit_open_is_retryable() {
        let err = DeliveryError::CircuitOpen {
            retry_in: Duration::from_secs(10),
        };
        assert!(matches!(policy(1).decide(0, &err), RetryDecision::Retry { .. }));
    }
}

//! # Circuit breaker per subscription/target.
//!
//! ```text
//!            failures ≥ threshold              timeout elapsed
//!  Closed ─────────────────────────► Open ─────────────────────► HalfOpen
//!    ▲                                 ▲   (one probe allowed)      │
//!    │            probe failed         └────────────────────────────┤
//!    └──────────────────────────────────────────────────────────────┘
//!                           probe (or any delivery) succeeded
//! ```
//!
//! ## Rules
//! - Breaker state is created lazily on the first failure for a target.
//! - While open, [`CircuitBreaker::try_acquire`] fails fast with the remaining wait.
//! - After the timeout exactly one probe is admitted; other callers keep failing fast
//!   until the probe reports back.
//! - Any success resets the breaker to closed with zero failures.
//!
//! Time is passed in explicitly (`tokio::time::Instant`) so transitions are
//! deterministic and testable on paused time.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;

use crate::dispatch::ConnectionId;

/// Breaker thresholds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BreakerConfig {
    /// Consecutive failures that open the breaker.
    pub failure_threshold: u32,
    /// How long the breaker stays open before admitting a probe.
    pub open_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_timeout: Duration::from_secs(60),
        }
    }
}

/// Breaker state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Observable breaker snapshot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub last_failure: Option<Instant>,
    pub next_attempt: Option<Instant>,
}

impl BreakerSnapshot {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_failure: None,
            next_attempt: None,
        }
    }
}

/// Outcome of recording a failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    /// State did not change.
    Unchanged,
    /// Breaker moved to open (threshold reached or probe failed).
    Opened,
}

/// Permission to attempt a delivery.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    /// Breaker closed; normal attempt.
    Allowed,
    /// Breaker half-open; this attempt is the single probe.
    Probe,
}

/// Single breaker state machine.
#[derive(Clone, Debug)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    state: CircuitState,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    next_attempt: Option<Instant>,
    probe_in_flight: bool,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_failure: None,
            next_attempt: None,
            probe_in_flight: false,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// Asks for permission to deliver at `now`.
    ///
    /// Returns the remaining wait when the attempt must fail fast.
    pub fn try_acquire(&mut self, now: Instant) -> Result<Admission, Duration> {
        match self.state {
            CircuitState::Closed => Ok(Admission::Allowed),
            CircuitState::Open => {
                let next = self.next_attempt.unwrap_or(now);
                if now >= next {
                    self.state = CircuitState::HalfOpen;
                    self.probe_in_flight = true;
                    Ok(Admission::Probe)
                } else {
                    Err(next - now)
                }
            }
            CircuitState::HalfOpen => {
                if self.probe_in_flight {
                    Err(Duration::ZERO)
                } else {
                    self.probe_in_flight = true;
                    Ok(Admission::Probe)
                }
            }
        }
    }

    /// Records a successful delivery: closed, zero failures.
    pub fn on_success(&mut self) {
        self.state = CircuitState::Closed;
        self.consecutive_failures = 0;
        self.next_attempt = None;
        self.probe_in_flight = false;
    }

    /// Records a failed delivery at `now`.
    pub fn on_failure(&mut self, now: Instant) -> Transition {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_failure = Some(now);

        let reopen = match self.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => self.consecutive_failures >= self.config.failure_threshold.max(1),
            CircuitState::Open => false,
        };
        if reopen {
            self.state = CircuitState::Open;
            self.next_attempt = Some(now + self.config.open_timeout);
            self.probe_in_flight = false;
            Transition::Opened
        } else {
            Transition::Unchanged
        }
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        BreakerSnapshot {
            state: self.state,
            consecutive_failures: self.consecutive_failures,
            last_failure: self.last_failure,
            next_attempt: self.next_attempt,
        }
    }
}

/// Lazily populated breakers of one subscription, keyed by delivery target.
///
/// Private to its subscription: no cross-subscription locking.
#[derive(Debug)]
pub struct BreakerBoard {
    config: BreakerConfig,
    breakers: Mutex<HashMap<ConnectionId, CircuitBreaker>>,
}

impl BreakerBoard {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// Admission for `target`; targets without a breaker are always allowed.
    pub fn try_acquire(&self, target: &ConnectionId, now: Instant) -> Result<Admission, Duration> {
        match self.breakers.lock().get_mut(target) {
            Some(b) => b.try_acquire(now),
            None => Ok(Admission::Allowed),
        }
    }

    /// Records a success; returns `true` if the breaker was not closed before.
    pub fn on_success(&self, target: &ConnectionId) -> bool {
        match self.breakers.lock().remove(target) {
            Some(b) => b.state() != CircuitState::Closed,
            None => false,
        }
    }

    /// Records a failure, creating the breaker on first use.
    pub fn on_failure(&self, target: &ConnectionId, now: Instant) -> Transition {
        self.breakers
            .lock()
            .entry(target.clone())
            .or_insert_with(|| CircuitBreaker::new(self.config))
            .on_failure(now)
    }

    /// Drops every breaker (all targets back to closed).
    pub fn reset(&self) {
        self.breakers.lock().clear();
    }

    pub fn snapshot(&self, target: &ConnectionId) -> BreakerSnapshot {
        self.breakers
            .lock()
            .get(target)
            .map(CircuitBreaker::snapshot)
            .unwrap_or_else(BreakerSnapshot::closed)
    }

    /// True if any target's breaker is open or half-open.
    pub fn any_open(&self) -> bool {
        self.breakers
            .lock()
            .values()
            .any(|b| b.state() != CircuitState::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(threshold: u32) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: threshold,
            open_timeout: Duration::from_secs(60),
        }
    }

    #[test]
    fn test_opens_at_threshold() {
        let now = Instant::now();
        let mut b = CircuitBreaker::new(cfg(3));
        assert_eq!(b.on_failure(now), Transition::Unchanged);
        assert_eq!(b.on_failure(now), Transition::Unchanged);
        assert_eq!(b.try_acquire(now), Ok(Admission::Allowed));
        assert_eq!(b.on_failure(now), Transition::Opened);
        assert_eq!(b.state(), CircuitState::Open);
        assert_eq!(b.try_acquire(now + Duration::from_secs(10)), Err(Duration::from_secs(50)));
    }

    #[test]
    fn test_single_probe_after_timeout() {
        let now = Instant::now();
        let mut b = CircuitBreaker::new(cfg(1));
        b.on_failure(now);

        let later = now + Duration::from_secs(60);
        assert_eq!(b.try_acquire(later), Ok(Admission::Probe));
        assert_eq!(b.state(), CircuitState::HalfOpen);
        assert!(b.try_acquire(later).is_err(), "second caller must fail fast");

        b.on_success();
        assert_eq!(b.snapshot(), BreakerSnapshot::closed());
    }

    #[test]
    fn test_failed_probe_reopens_and_restarts_timeout() {
        let now = Instant::now();
        let mut b = CircuitBreaker::new(cfg(2));
        b.on_failure(now);
        b.on_failure(now);

        let probe_at = now + Duration::from_secs(61);
        assert_eq!(b.try_acquire(probe_at), Ok(Admission::Probe));
        assert_eq!(b.on_failure(probe_at), Transition::Opened);
        assert_eq!(b.snapshot().next_attempt, Some(probe_at + Duration::from_secs(60)));
        assert!(b.try_acquire(probe_at + Duration::from_secs(59)).is_err());
    }

    #[test]
    fn test_board_is_lazy_and_resets_on_success() {
        let board = BreakerBoard::new(cfg(1));
        let target = ConnectionId::from("ws-1");
        let now = Instant::now();

        assert_eq!(board.snapshot(&target).state, CircuitState::Closed);
        assert_eq!(board.on_failure(&target, now), Transition::Opened);
        assert!(board.any_open());
        assert!(board.try_acquire(&target, now).is_err());

        assert!(board.on_success(&target));
        assert!(!board.any_open());
        assert_eq!(board.try_acquire(&target, now), Ok(Admission::Allowed));
    }
}

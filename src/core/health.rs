//! # Health assessment.
//!
//! `health_check` gathers a [`HealthInputs`] snapshot and [`assess`] turns it
//! into a [`HealthReport`]: `healthy`, or `degraded` with the list of issues.
//! A check fires at 90% of a hard limit so operators see pressure before
//! `ResourceExhausted` errors or dead-letter evictions start.

use serde::Serialize;

/// Overall status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

/// One detected problem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthIssue {
    /// Stable snake_case code.
    pub code: &'static str,
    pub detail: String,
}

/// Result of `health_check`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub issues: Vec<HealthIssue>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// Figures the assessment is based on.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HealthInputs {
    pub closed: bool,
    pub subscriptions: usize,
    pub max_subscriptions: usize,
    pub delivery_attempts: u64,
    pub failure_rate: f64,
    pub error_rate_threshold: f64,
    pub dead_letters: usize,
    pub dead_letter_capacity: usize,
    pub open_breakers: usize,
    /// Subscriptions whose mailbox is at least 90% full.
    pub saturated_queues: usize,
}

/// Attempts needed before the error rate is judged.
const MIN_ATTEMPTS_FOR_RATE: u64 = 10;

fn near_limit(used: usize, limit: usize) -> bool {
    limit > 0 && (used as u128) * 10 >= (limit as u128) * 9
}

pub fn assess(i: &HealthInputs) -> HealthReport {
    let mut issues = Vec::new();
    let mut flag = |code: &'static str, detail: String| issues.push(HealthIssue { code, detail });

    if i.closed {
        flag("shut_down", "engine has been shut down".to_string());
    }
    if near_limit(i.subscriptions, i.max_subscriptions) {
        flag(
            "subscription_limit",
            format!("{} of {} subscriptions in use", i.subscriptions, i.max_subscriptions),
        );
    }
    if i.delivery_attempts >= MIN_ATTEMPTS_FOR_RATE && i.failure_rate > i.error_rate_threshold {
        flag(
            "high_error_rate",
            format!(
                "{:.1}% of delivery attempts failed (threshold {:.1}%)",
                i.failure_rate * 100.0,
                i.error_rate_threshold * 100.0
            ),
        );
    }
    if near_limit(i.dead_letters, i.dead_letter_capacity) {
        flag(
            "dead_letter_pressure",
            format!("{} of {} dead-letter slots used", i.dead_letters, i.dead_letter_capacity),
        );
    }
    if i.open_breakers > 0 {
        flag(
            "circuit_open",
            format!("{} subscription(s) with an open circuit breaker", i.open_breakers),
        );
    }
    if i.saturated_queues > 0 {
        flag(
            "queue_pressure",
            format!("{} subscription queue(s) at least 90% full", i.saturated_queues),
        );
    }

    let status = if issues.is_empty() {
        HealthStatus::Healthy
    } else {
        HealthStatus::Degraded
    };
    HealthReport { status, issues }
}

/// Whether a mailbox with `queued` of `capacity` counts as saturated.
pub(crate) fn queue_saturated(queued: usize, capacity: usize) -> bool {
    near_limit(queued, capacity)
}

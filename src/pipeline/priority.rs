//! # Priority lanes with a shared per-subscription bound.
//!
//! Each subscription owns a [`Mailbox`]: three FIFO lanes (high, normal, low)
//! behind one lock, sharing a single capacity. The delivery worker takes
//! batches from the highest lane that is due, so high-priority batches may
//! overtake lower ones while order within a lane is preserved.
//!
//! ## Overflow
//! ```text
//! push(ev, p) on a full mailbox
//!   DropOldest: evict front of the lowest non-empty lane with priority ≤ p
//!               (none such → the incoming event is dropped)
//!   Reject:     refuse ev for this subscription
//! ```

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::events::{Severity, UpdateEvent};
use crate::pipeline::batch::{BatchPolicy, PublishedEvent};
use crate::policies::OverflowPolicy;

/// Delivery priority tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    Normal,
    Low,
}

impl Priority {
    const ALL: [Priority; 3] = [Priority::High, Priority::Normal, Priority::Low];

    /// High for high/critical severity; otherwise model and provider updates are
    /// normal and capability updates low.
    pub fn for_event(ev: &UpdateEvent) -> Self {
        match ev.severity() {
            Some(Severity::High | Severity::Critical) => Priority::High,
            _ => match ev {
                UpdateEvent::ModelUpdate(_) | UpdateEvent::ProviderUpdate(_) => Priority::Normal,
                UpdateEvent::CapabilityUpdate(_) => Priority::Low,
            },
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
        }
    }

    fn lane(self) -> usize {
        match self {
            Priority::High => 0,
            Priority::Normal => 1,
            Priority::Low => 2,
        }
    }
}

#[derive(Debug)]
struct Queued {
    event: Arc<PublishedEvent>,
    enqueued_at: Instant,
    immediate: bool,
}

/// Result of [`PriorityQueues::push`].
#[derive(Debug, Clone, PartialEq)]
pub enum PushOutcome {
    Enqueued,
    /// Enqueued after evicting an older event.
    Evicted(Arc<PublishedEvent>),
    /// Mailbox full of higher-priority events; the incoming event was dropped.
    DroppedIncoming,
    /// Refused under [`OverflowPolicy::Reject`].
    Rejected,
}

/// Three bounded FIFO lanes.
#[derive(Debug)]
pub struct PriorityQueues {
    lanes: [VecDeque<Queued>; 3],
    capacity: usize,
}

impl PriorityQueues {
    pub fn new(capacity: usize) -> Self {
        Self {
            lanes: Default::default(),
            capacity: capacity.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.lanes.iter().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.lanes.iter().all(VecDeque::is_empty)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Queues `event` in lane `priority`, applying `overflow` if full.
    pub fn push(
        &mut self,
        event: Arc<PublishedEvent>,
        priority: Priority,
        immediate: bool,
        now: Instant,
        overflow: OverflowPolicy,
    ) -> PushOutcome {
        let mut outcome = PushOutcome::Enqueued;
        if self.len() >= self.capacity {
            match overflow {
                OverflowPolicy::Reject => return PushOutcome::Rejected,
                OverflowPolicy::DropOldest => {
                    let victim = Priority::ALL
                        .iter()
                        .rev()
                        .filter(|p| p.lane() >= priority.lane())
                        .find_map(|p| self.lanes[p.lane()].pop_front());
                    match victim {
                        Some(v) => outcome = PushOutcome::Evicted(v.event),
                        None => return PushOutcome::DroppedIncoming,
                    }
                }
            }
        }
        self.lanes[priority.lane()].push_back(Queued {
            event,
            enqueued_at: now,
            immediate,
        });
        outcome
    }

    /// Takes the next due batch (at most `max_size` events), highest lane first.
    pub fn take_due(
        &mut self,
        policy: &BatchPolicy,
        now: Instant,
    ) -> Option<(Priority, Vec<Arc<PublishedEvent>>)> {
        for p in Priority::ALL {
            let lane = &mut self.lanes[p.lane()];
            let Some(front) = lane.front() else {
                continue;
            };
            let immediate = lane.iter().any(|q| q.immediate);
            if policy.is_due(lane.len(), front.enqueued_at, immediate, now) {
                let n = lane.len().min(policy.max_size);
                let events = lane.drain(..n).map(|q| q.event).collect();
                return Some((p, events));
            }
        }
        None
    }

    /// Earliest time-based flush deadline across lanes.
    pub fn next_deadline(&self, policy: &BatchPolicy) -> Option<Instant> {
        self.lanes
            .iter()
            .filter_map(|l| l.front())
            .map(|q| policy.deadline(q.enqueued_at))
            .min()
    }

    /// Empties every lane; returns how many events were discarded.
    pub fn clear(&mut self) -> usize {
        let n = self.len();
        self.lanes.iter_mut().for_each(VecDeque::clear);
        n
    }
}

/// A subscription's queues plus the wakeup for its delivery worker.
#[derive(Debug)]
pub struct Mailbox {
    queues: Mutex<PriorityQueues>,
    notify: Notify,
}

impl Mailbox {
    pub fn new(capacity: usize) -> Self {
        Self {
            queues: Mutex::new(PriorityQueues::new(capacity)),
            notify: Notify::new(),
        }
    }

    /// Queues an event and wakes the worker if it was accepted.
    pub fn push(
        &self,
        event: Arc<PublishedEvent>,
        priority: Priority,
        immediate: bool,
        overflow: OverflowPolicy,
    ) -> PushOutcome {
        let outcome = self
            .queues
            .lock()
            .push(event, priority, immediate, Instant::now(), overflow);
        if matches!(outcome, PushOutcome::Enqueued | PushOutcome::Evicted(_)) {
            self.notify.notify_one();
        }
        outcome
    }

    pub fn take_due(
        &self,
        policy: &BatchPolicy,
        now: Instant,
    ) -> Option<(Priority, Vec<Arc<PublishedEvent>>)> {
        self.queues.lock().take_due(policy, now)
    }

    pub fn next_deadline(&self, policy: &BatchPolicy) -> Option<Instant> {
        self.queues.lock().next_deadline(policy)
    }

    pub fn len(&self) -> usize {
        self.queues.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.lock().is_empty()
    }

    pub fn clear(&self) -> usize {
        self.queues.lock().clear()
    }

    /// Wakes the worker without queuing anything (resume, settings change).
    pub fn wake(&self) {
        self.notify.notify_one();
    }

    /// Resolves on the next push or [`Mailbox::wake`].
    pub async fn notified(&self) {
        self.notify.notified().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{
        CapabilityChange, CapabilityUpdateEvent, ModelChange, ModelUpdateEvent,
    };
    use std::time::Duration;

    fn model(id: &str, severity: Option<Severity>) -> Arc<PublishedEvent> {
        let mut ev = ModelUpdateEvent::new(id, "openai", ModelChange::Updated);
        ev.severity = severity;
        Arc::new(PublishedEvent::new(ev.into()))
    }

    fn capability(name: &str) -> Arc<PublishedEvent> {
        Arc::new(PublishedEvent::new(
            CapabilityUpdateEvent::new(name, CapabilityChange::Added).into(),
        ))
    }

    fn subject(e: &Arc<PublishedEvent>) -> &str {
        e.event.subject()
    }

    #[test]
    fn test_priority_derivation() {
        assert_eq!(Priority::for_event(&model("m", Some(Severity::Critical)).event), Priority::High);
        assert_eq!(Priority::for_event(&model("m", Some(Severity::High)).event), Priority::High);
        assert_eq!(Priority::for_event(&model("m", Some(Severity::Low)).event), Priority::Normal);
        assert_eq!(Priority::for_event(&capability("vision").event), Priority::Low);
    }

    #[test]
    fn test_drop_oldest_evicts_lowest_lane_first() {
        let now = Instant::now();
        let mut q = PriorityQueues::new(3);
        q.push(capability("c1"), Priority::Low, false, now, OverflowPolicy::DropOldest);
        q.push(model("m1", None), Priority::Normal, false, now, OverflowPolicy::DropOldest);
        q.push(capability("c2"), Priority::Low, false, now, OverflowPolicy::DropOldest);

        match q.push(model("m2", None), Priority::Normal, false, now, OverflowPolicy::DropOldest) {
            PushOutcome::Evicted(e) => assert_eq!(subject(&e), "c1"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(q.len(), 3);
    }

    #[test]
    fn test_drop_oldest_never_evicts_higher_priority() {
        let now = Instant::now();
        let mut q = PriorityQueues::new(2);
        let hi = Some(Severity::High);
        q.push(model("h1", hi), Priority::High, false, now, OverflowPolicy::DropOldest);
        q.push(model("h2", hi), Priority::High, false, now, OverflowPolicy::DropOldest);
        assert_eq!(
            q.push(capability("c"), Priority::Low, false, now, OverflowPolicy::DropOldest),
            PushOutcome::DroppedIncoming
        );
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn test_reject_refuses_when_full() {
        let now = Instant::now();
        let mut q = PriorityQueues::new(1);
        assert_eq!(
            q.push(model("a", None), Priority::Normal, false, now, OverflowPolicy::Reject),
            PushOutcome::Enqueued
        );
        assert_eq!(
            q.push(model("b", Some(Severity::Critical)), Priority::High, true, now, OverflowPolicy::Reject),
            PushOutcome::Rejected
        );
    }

    #[test]
    fn test_take_due_prefers_high_lane_and_respects_size() {
        let now = Instant::now();
        let policy = BatchPolicy::new(2, Duration::from_secs(5));
        let mut q = PriorityQueues::new(10);
        for id in ["n1", "n2", "n3"] {
            q.push(model(id, None), Priority::Normal, false, now, OverflowPolicy::DropOldest);
        }
        q.push(model("h1", Some(Severity::Critical)), Priority::High, true, now, OverflowPolicy::DropOldest);

        let (p, batch) = q.take_due(&policy, now).unwrap();
        assert_eq!(p, Priority::High);
        assert_eq!(batch.len(), 1);

        let (p, batch) = q.take_due(&policy, now).unwrap();
        assert_eq!(p, Priority::Normal);
        assert_eq!(batch.iter().map(subject).collect::<Vec<_>>(), vec!["n1", "n2"]);

        assert!(q.take_due(&policy, now).is_none(), "n3 waits for its timer");
        assert_eq!(q.next_deadline(&policy), Some(now + Duration::from_secs(5)));
        assert!(q.take_due(&policy, now + Duration::from_secs(5)).is_some());
    }
}

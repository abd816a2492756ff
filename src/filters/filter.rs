//! # Predicate groups.
//!
//! A [`Filter`] is an ordered list of [`Predicate`]s joined by a [`Combinator`]:
//! `And` requires every predicate to match, `Or` at least one. A filter with no
//! predicates matches every event.

use serde::{Deserialize, Serialize};

use crate::error::NotifyError;
use crate::events::UpdateEvent;

use super::predicate::{Predicate, PredicateSpec};

/// How the predicates of a [`Filter`] are combined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Combinator {
    #[default]
    And,
    Or,
}

/// Ordered predicate group evaluated against each candidate event.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    combinator: Combinator,
    predicates: Vec<Predicate>,
}

impl Filter {
    /// Matches every event.
    pub fn none() -> Self {
        Self::default()
    }

    /// All predicates must match.
    pub fn all(predicates: Vec<Predicate>) -> Self {
        Self {
            combinator: Combinator::And,
            predicates,
        }
    }

    /// At least one predicate must match.
    pub fn any(predicates: Vec<Predicate>) -> Self {
        Self {
            combinator: Combinator::Or,
            predicates,
        }
    }

    /// Compiles uncompiled specs, failing on the first invalid one.
    pub fn from_specs(combinator: Combinator, specs: &[PredicateSpec]) -> Result<Self, NotifyError> {
        let predicates = specs
            .iter()
            .map(Predicate::parse)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            combinator,
            predicates,
        })
    }

    pub fn combinator(&self) -> Combinator {
        self.combinator
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    pub fn matches(&self, ev: &UpdateEvent) -> bool {
        if self.predicates.is_empty() {
            return true;
        }
        match self.combinator {
            Combinator::And => self.predicates.iter().all(|p| p.matches(ev)),
            Combinator::Or => self.predicates.iter().any(|p| p.matches(ev)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{CapabilityChange, CapabilityUpdateEvent, Severity};
    use crate::filters::{Field, Operator};

    fn vision(sev: Severity) -> UpdateEvent {
        CapabilityUpdateEvent::new("vision", CapabilityChange::Added)
            .with_severity(sev)
            .into()
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        assert!(Filter::none().matches(&vision(Severity::Low)));
    }

    #[test]
    fn test_and_or_combinators() {
        let is_vision = Predicate::new(Field::Capability, Operator::Equals, "vision").unwrap();
        let is_critical = Predicate::new(Field::Severity, Operator::Equals, "critical").unwrap();

        let both = Filter::all(vec![is_vision.clone(), is_critical.clone()]);
        let either = Filter::any(vec![is_vision, is_critical]);

        assert!(!both.matches(&vision(Severity::Low)));
        assert!(both.matches(&vision(Severity::Critical)));
        assert!(either.matches(&vision(Severity::Low)));
    }

    #[test]
    fn test_from_specs_rejects_unknown_operator() {
        let specs = vec![PredicateSpec {
            field: "capability".into(),
            operator: "sounds_like".into(),
            value: "vision".into(),
        }];
        assert!(Filter::from_specs(Combinator::And, &specs).is_err());
    }
}

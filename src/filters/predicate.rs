//! # Filter predicates.
//!
//! A [`Predicate`] compares one projected [`Field`] of an [`UpdateEvent`] with a
//! [`FilterValue`] using an [`Operator`]. Predicates are validated and compiled once
//! (regexes, numeric thresholds) when a subscription is created or updated, so
//! evaluation on the publish path never fails.
//!
//! ## Field projection
//! ```text
//! type          → "model_update" | "provider_update" | "capability_update"
//! model_id      → model id (capability events: the scoped model, if any)
//! provider_name → provider name (capability events: the scoped provider, if any)
//! capability    → capability list of a model event, or the capability itself
//! severity      → "low" | "medium" | "high" | "critical"   (ordered: rank 0..3)
//! timestamp     → RFC 3339 text                             (ordered: epoch millis)
//! ```
//!
//! ## Operator semantics
//! - Positive operators match if **any** projected value matches.
//! - `not_*` operators are the negation of their positive form, so a missing
//!   field satisfies `not_equals` but never `equals`.
//! - `greater_than` / `less_than` compare numerically (severity rank, epoch millis,
//!   or the field parsed as a number).

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use chrono::DateTime;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::NotifyError;
use crate::events::{Severity, UpdateEvent};

/// Projected event field a predicate can test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Type,
    ModelId,
    ProviderName,
    Capability,
    Severity,
    Timestamp,
}

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    GreaterThan,
    LessThan,
    In,
    NotIn,
    Regex,
}

/// Comparison operand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Number(f64),
    Text(String),
    List(Vec<String>),
}

impl From<&str> for FilterValue {
    fn from(s: &str) -> Self {
        FilterValue::Text(s.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(s: String) -> Self {
        FilterValue::Text(s)
    }
}

impl From<f64> for FilterValue {
    fn from(n: f64) -> Self {
        FilterValue::Number(n)
    }
}

impl From<Vec<String>> for FilterValue {
    fn from(items: Vec<String>) -> Self {
        FilterValue::List(items)
    }
}

/// Uncompiled predicate as received from a client (strings for field/operator).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredicateSpec {
    pub field: String,
    pub operator: String,
    pub value: FilterValue,
}

/// Lowercases and strips `_`/`-` so `modelId`, `model_id` and `model-id` agree.
fn normalize(s: &str) -> String {
    s.chars()
        .filter(|c| *c != '_' && *c != '-')
        .flat_map(char::to_lowercase)
        .collect()
}

impl FromStr for Field {
    type Err = NotifyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "type" => Ok(Field::Type),
            "modelid" => Ok(Field::ModelId),
            "providername" => Ok(Field::ProviderName),
            "capability" => Ok(Field::Capability),
            "severity" => Ok(Field::Severity),
            "timestamp" => Ok(Field::Timestamp),
            _ => Err(NotifyError::validation(format!("unknown filter field '{s}'"))),
        }
    }
}

impl FromStr for Operator {
    type Err = NotifyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "equals" | "eq" => Ok(Operator::Equals),
            "notequals" | "ne" => Ok(Operator::NotEquals),
            "contains" => Ok(Operator::Contains),
            "notcontains" => Ok(Operator::NotContains),
            "startswith" => Ok(Operator::StartsWith),
            "endswith" => Ok(Operator::EndsWith),
            "greaterthan" | "gt" => Ok(Operator::GreaterThan),
            "lessthan" | "lt" => Ok(Operator::LessThan),
            "in" => Ok(Operator::In),
            "notin" => Ok(Operator::NotIn),
            "regex" | "matches" => Ok(Operator::Regex),
            _ => Err(NotifyError::validation(format!("unknown filter operator '{s}'"))),
        }
    }
}

impl Operator {
    /// Positive form of a negated operator (`not_in` → `in`), identity otherwise.
    fn positive(self) -> Operator {
        match self {
            Operator::NotEquals => Operator::Equals,
            Operator::NotContains => Operator::Contains,
            Operator::NotIn => Operator::In,
            other => other,
        }
    }

    fn is_negated(self) -> bool {
        self.positive() != self
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operator::Equals => "equals",
            Operator::NotEquals => "not_equals",
            Operator::Contains => "contains",
            Operator::NotContains => "not_contains",
            Operator::StartsWith => "starts_with",
            Operator::EndsWith => "ends_with",
            Operator::GreaterThan => "greater_than",
            Operator::LessThan => "less_than",
            Operator::In => "in",
            Operator::NotIn => "not_in",
            Operator::Regex => "regex",
        };
        f.write_str(s)
    }
}

/// Validated, compiled predicate.
#[derive(Debug, Clone)]
pub struct Predicate {
    field: Field,
    op: Operator,
    value: FilterValue,
    regex: Option<Regex>,
    threshold: Option<f64>,
}

impl Predicate {
    /// Validates and compiles a predicate.
    ///
    /// # Errors
    /// [`NotifyError::Validation`] when the operand type does not fit the operator,
    /// a regex does not compile, or an ordered comparison has no numeric reading.
    pub fn new(field: Field, op: Operator, value: impl Into<FilterValue>) -> Result<Self, NotifyError> {
        let value = value.into();
        let mut regex = None;
        let mut threshold = None;

        match op {
            Operator::In | Operator::NotIn => {
                if !matches!(value, FilterValue::List(_)) {
                    return Err(NotifyError::validation(format!("operator '{op}' requires a list value")));
                }
            }
            Operator::Contains | Operator::NotContains | Operator::StartsWith | Operator::EndsWith => {
                if !matches!(value, FilterValue::Text(_)) {
                    return Err(NotifyError::validation(format!("operator '{op}' requires a text value")));
                }
            }
            Operator::Regex => {
                let FilterValue::Text(pattern) = &value else {
                    return Err(NotifyError::validation("operator 'regex' requires a text pattern"));
                };
                let compiled = Regex::new(pattern)
                    .map_err(|e| NotifyError::validation(format!("invalid regex '{pattern}': {e}")))?;
                regex = Some(compiled);
            }
            Operator::GreaterThan | Operator::LessThan => {
                threshold = Some(numeric_operand(field, &value)?);
            }
            Operator::Equals | Operator::NotEquals => match (&value, field) {
                (FilterValue::List(_), _) => {
                    return Err(NotifyError::validation(format!(
                        "operator '{op}' requires a text or numeric value"
                    )));
                }
                (FilterValue::Text(t), Field::Severity) => {
                    t.parse::<Severity>()?;
                }
                (FilterValue::Number(_), _) => {
                    threshold = Some(numeric_operand(field, &value)?);
                }
                _ => {}
            },
        }

        Ok(Self {
            field,
            op,
            value,
            regex,
            threshold,
        })
    }

    /// Parses field and operator names and compiles the predicate.
    pub fn parse(spec: &PredicateSpec) -> Result<Self, NotifyError> {
        let field = spec.field.parse::<Field>()?;
        let op = spec.operator.parse::<Operator>()?;
        Predicate::new(field, op, spec.value.clone())
    }

    pub fn field(&self) -> Field {
        self.field
    }

    pub fn operator(&self) -> Operator {
        self.op
    }

    pub fn value(&self) -> &FilterValue {
        &self.value
    }

    /// Returns the uncompiled form (for control frames and introspection).
    pub fn to_spec(&self) -> PredicateSpec {
        let field = serde_json::to_value(self.field)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        PredicateSpec {
            field,
            operator: self.op.to_string(),
            value: self.value.clone(),
        }
    }

    /// Evaluates the predicate against an event.
    pub fn matches(&self, ev: &UpdateEvent) -> bool {
        match self.op {
            Operator::GreaterThan | Operator::LessThan => self.compare(ev),
            op if op.is_negated() => !self.matches_positive(ev),
            _ => self.matches_positive(ev),
        }
    }

    fn matches_positive(&self, ev: &UpdateEvent) -> bool {
        if let (Operator::Equals, Some(n)) = (self.op.positive(), self.threshold) {
            return numeric_field(self.field, ev) == Some(n);
        }
        project(self.field, ev).iter().any(|v| self.test_text(v))
    }

    fn test_text(&self, v: &str) -> bool {
        match (self.op.positive(), &self.value) {
            (Operator::Equals, FilterValue::Text(t)) => match self.field {
                Field::Severity => v.eq_ignore_ascii_case(t),
                _ => v == t,
            },
            (Operator::Contains, FilterValue::Text(t)) => v.contains(t.as_str()),
            (Operator::StartsWith, FilterValue::Text(t)) => v.starts_with(t.as_str()),
            (Operator::EndsWith, FilterValue::Text(t)) => v.ends_with(t.as_str()),
            (Operator::In, FilterValue::List(items)) => items.iter().any(|i| i == v),
            (Operator::Regex, _) => self.regex.as_ref().is_some_and(|r| r.is_match(v)),
            _ => false,
        }
    }

    fn compare(&self, ev: &UpdateEvent) -> bool {
        let (Some(lhs), Some(rhs)) = (numeric_field(self.field, ev), self.threshold) else {
            return false;
        };
        match self.op {
            Operator::GreaterThan => lhs > rhs,
            Operator::LessThan => lhs < rhs,
            _ => false,
        }
    }
}

/// Text values of `field` on `ev`; empty when the event has no such field.
fn project(field: Field, ev: &UpdateEvent) -> Vec<Cow<'_, str>> {
    match field {
        Field::Type => vec![Cow::Borrowed(ev.kind().as_str())],
        Field::ModelId => ev.model_id().map(Cow::Borrowed).into_iter().collect(),
        Field::ProviderName => ev.provider_name().map(Cow::Borrowed).into_iter().collect(),
        Field::Capability => ev.capabilities().into_iter().map(Cow::Borrowed).collect(),
        Field::Severity => ev
            .severity()
            .map(|s| Cow::Borrowed(s.as_str()))
            .into_iter()
            .collect(),
        Field::Timestamp => vec![Cow::Owned(ev.timestamp().to_rfc3339())],
    }
}

/// Numeric reading of `field` on `ev`.
fn numeric_field(field: Field, ev: &UpdateEvent) -> Option<f64> {
    match field {
        Field::Severity => ev.severity().map(|s| f64::from(s.rank())),
        Field::Timestamp => Some(ev.timestamp().timestamp_millis() as f64),
        other => project(other, ev).first().and_then(|v| v.parse::<f64>().ok()),
    }
}

/// Numeric reading of an operand for ordered comparison against `field`.
fn numeric_operand(field: Field, value: &FilterValue) -> Result<f64, NotifyError> {
    match value {
        FilterValue::Number(n) if n.is_finite() => Ok(*n),
        FilterValue::Text(t) => match field {
            Field::Severity => Ok(f64::from(t.parse::<Severity>()?.rank())),
            Field::Timestamp => DateTime::parse_from_rfc3339(t)
                .map(|dt| dt.timestamp_millis() as f64)
                .map_err(|e| NotifyError::validation(format!("invalid timestamp '{t}': {e}"))),
            _ => t
                .parse::<f64>()
                .map_err(|_| NotifyError::validation(format!("'{t}' is not numeric"))),
        },
        _ => Err(NotifyError::validation("ordered comparison requires a numeric value")),
    }
}

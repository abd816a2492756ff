//! Subscription filters.
//!
//! ## Contents
//! - [`Field`], [`Operator`], [`FilterValue`] the predicate vocabulary
//! - [`Predicate`] one validated field/operator/value comparison
//! - [`PredicateSpec`] the uncompiled, string-typed form clients send
//! - [`Filter`], [`Combinator`] AND/OR groups of predicates

mod filter;
mod predicate;

pub use filter::{Combinator, Filter};
pub use predicate::{Field, FilterValue, Operator, Predicate, PredicateSpec};

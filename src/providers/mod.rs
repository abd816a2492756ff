//! Provider mappers.
//!
//! Discovery records arrive in each vendor's own shape. [`Provider`] is the closed
//! set of known vendors (plus [`Provider::Custom`]) behind one mapping contract,
//! [`Provider::map_model`], which turns a raw record into a [`ModelUpdateEvent`].
//! [`map_discovered`] picks the mapper from the record's `provider` field.
//!
//! [`ModelUpdateEvent`]: crate::events::ModelUpdateEvent

mod mapper;

pub use mapper::{map_discovered, Provider};

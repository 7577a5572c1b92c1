#![forbid(unsafe_code)]

//! Equality query planning and execution.
//!
//! A query is a single `type.field = value` predicate. The planner picks an
//! index lookup when the field is indexed for the type and a scan-and-filter
//! otherwise; both paths return the same ids in ascending order.

/// Runs a plan against a snapshot.
pub mod executor;

/// Chooses between the index path and the scan path.
pub mod planner;

pub use executor::{execute, find_equal};
pub use planner::{plan, QueryPlan, QueryStrategy};

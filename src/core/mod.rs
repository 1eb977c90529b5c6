//! Core business logic - framework-agnostic ledger, budget, recurrence and report operations.
//!
//! Functions here take a database handle and plain values and return structured data.
//! Nothing in this module knows about the scheduler or the outbound collaborators
//! except through [`crate::services::JobContext`].

/// Accounts, default-account handling and the atomic balance primitive
pub mod account;
/// Budgets, expense aggregation and threshold alerts
pub mod budget;
/// Parsing and formatting of amounts in minor units
pub mod money;
/// Calendar month helpers
pub mod period;
/// Recurrence engine
pub mod recurrence;
/// Monthly statistics and report emails
pub mod report;
/// Per-user token bucket rate limiting
pub mod throttle;
/// Transaction CRUD with balance effects
pub mod transaction;
/// Users and identity resolution
pub mod user;

use chrono::{DateTime, Utc};
use sea_orm::{ColumnTrait, sea_query::SimpleExpr};

/// Filter matching a nullable timestamp column against a previously read value.
///
/// Used as the guard of compare-and-set updates: the update only applies when the
/// column still holds what was read, including "still unset".
pub(crate) fn timestamp_matches<C>(column: C, previous: Option<DateTime<Utc>>) -> SimpleExpr
where
    C: ColumnTrait,
{
    match previous {
        Some(value) => column.eq(value),
        None => column.is_null(),
    }
}

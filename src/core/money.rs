//! Money parsing and formatting.
//!
//! Amounts are carried as `i64` minor units (cents) everywhere in the ledger so that every
//! balance mutation is an exact integer add. `Decimal` is only used at the edges: parsing
//! user input, rendering notifications, and computing percentages.

use crate::errors::{Error, Result};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

/// Number of decimal places in one major currency unit.
pub const MINOR_UNIT_SCALE: u32 = 2;

/// Largest magnitude accepted for a single amount: ten trillion in major units.
///
/// Keeps sums and differences of stored amounts far away from `i64` overflow.
pub const MAX_AMOUNT: i64 = 1_000_000_000_000_000;

/// Parses a decimal string such as `"1250.50"` into minor units (`125050`).
///
/// Rejects non-numeric input, more than two decimal places, and magnitudes above
/// [`MAX_AMOUNT`].
pub fn parse_amount(input: &str) -> Result<i64> {
    let trimmed = input.trim();
    let value: Decimal = trimmed.parse().map_err(|_| Error::Validation {
        message: format!("Invalid amount: {trimmed:?} is not a number"),
    })?;

    if value.normalize().scale() > MINOR_UNIT_SCALE {
        return Err(Error::Validation {
            message: format!("Invalid amount: {trimmed:?} has more than two decimal places"),
        });
    }

    value
        .checked_mul(Decimal::ONE_HUNDRED)
        .and_then(|minor| minor.to_i64())
        .filter(|minor| minor.unsigned_abs() <= MAX_AMOUNT.unsigned_abs())
        .ok_or_else(|| Error::Validation {
            message: format!("Invalid amount: {trimmed:?} is out of range"),
        })
}

/// Converts minor units into a two-decimal `Decimal`.
#[must_use]
pub fn to_decimal(minor: i64) -> Decimal {
    Decimal::new(minor, MINOR_UNIT_SCALE)
}

/// Formats minor units as a dollar string, e.g. `-$25.50`.
#[must_use]
pub fn format_amount(minor: i64) -> String {
    let magnitude = to_decimal(minor).abs();
    if minor < 0 {
        format!("-${magnitude}")
    } else {
        format!("${magnitude}")
    }
}

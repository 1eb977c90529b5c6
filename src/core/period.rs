//! Calendar period helpers shared by the once-per-month gates.
//!
//! All periods are computed in UTC.

use crate::errors::{Error, Result};
use chrono::{DateTime, Datelike, Months, NaiveDate, Utc};

/// True when both instants fall in the same calendar month of the same year.
#[must_use]
pub fn is_same_month(a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
    a.year() == b.year() && a.month() == b.month()
}

/// Once-per-period suppression: has nothing fired yet in `now`'s month?
///
/// Returns `true` when `last_fired` is `None` or falls in a different month/year.
#[must_use]
pub fn is_new_period(last_fired: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    last_fired.is_none_or(|last| !is_same_month(last, now))
}

/// Midnight UTC on the first day of `now`'s month.
pub fn month_start(now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    NaiveDate::from_ymd_opt(now.year(), now.month(), 1)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| Error::Validation {
            message: format!("Cannot compute start of month for {now}"),
        })
}

/// Half-open range `[start, end)` covering the calendar month before `now`.
pub fn previous_month_range(now: DateTime<Utc>) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let end = month_start(now)?;
    let start = end
        .checked_sub_months(Months::new(1))
        .ok_or_else(|| Error::Validation {
            message: format!("Cannot compute previous month for {now}"),
        })?;
    Ok((start, end))
}

/// Half-open range `[start, end)` covering `now`'s calendar month.
pub fn current_month_range(now: DateTime<Utc>) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let start = month_start(now)?;
    let end = start
        .checked_add_months(Months::new(1))
        .ok_or_else(|| Error::Validation {
            message: format!("Cannot compute end of month for {now}"),
        })?;
    Ok((start, end))
}

/// Human label for a month, e.g. `"March 2024"`.
#[must_use]
pub fn month_label(date: DateTime<Utc>) -> String {
    date.format("%B %Y").to_string()
}

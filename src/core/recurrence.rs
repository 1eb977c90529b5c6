//! Recurrence engine - finds due recurring transactions and materializes occurrences.
//!
//! Processing is split in two phases so the second can run concurrently or be throttled:
//!
//! 1. [`find_due_recurring`] scans for due templates and returns one [`WorkItem`] each.
//!    Re-running the scan before items are processed may emit the same id again.
//! 2. [`process_recurring_transaction`] re-fetches the template, re-checks that its
//!    next occurrence has arrived, and then writes the generated transaction, the balance delta and the
//!    template's new schedule in one database transaction. The schedule update is
//!    conditional on the values read, so of two racing invocations at most one commits.

use crate::{
    core::{account, timestamp_matches, transaction::signed_effect},
    entities::{
        Transaction,
        transaction::{self, RecurringInterval, TransactionStatus},
    },
    errors::{Error, Result},
};
use chrono::{DateTime, Days, Months, Utc};
use sea_orm::{Condition, QueryOrder, Set, TransactionTrait, prelude::*, sea_query::Expr};
use tracing::{debug, info, instrument, warn};

/// Suffix appended to the description of generated occurrences.
pub const GENERATED_SUFFIX: &str = " (Recurring)";

/// One due recurring transaction, keyed by id and owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkItem {
    /// Recurring template to materialize
    pub transaction_id: i64,
    /// Owner, used for scoping and throttling
    pub user_id: i64,
}

impl From<&transaction::Model> for WorkItem {
    fn from(model: &transaction::Model) -> Self {
        Self {
            transaction_id: model.id,
            user_id: model.user_id,
        }
    }
}

/// What [`process_recurring_transaction`] did with a work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// A new occurrence was written and the template rescheduled
    Materialized {
        /// Id of the generated one-time transaction
        generated_id: i64,
        /// The template's new next occurrence
        next_recurring_date: DateTime<Utc>,
    },
    /// The template is no longer due (already processed, or changed)
    NotDue,
    /// The template no longer exists for this user
    NotFound,
    /// Another invocation rescheduled the template between our read and our write
    Lost,
}

/// Totals from processing a batch of work items inline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecurringRunSummary {
    /// Work items returned by the scan
    pub scanned: usize,
    /// Occurrences written
    pub materialized: usize,
    /// Items skipped because they were no longer due, gone, or lost a race
    pub skipped: usize,
    /// Items that failed and stay due for the next run
    pub failed: usize,
}

/// Advances `date` by exactly one unit of `interval`.
///
/// Monthly and yearly steps keep the day of month, clamped to the length of the target
/// month (Jan 31 + 1 month = Feb 28/29, Feb 29 + 1 year = Feb 28).
pub fn advance(date: DateTime<Utc>, interval: RecurringInterval) -> Result<DateTime<Utc>> {
    let next = match interval {
        RecurringInterval::Daily => date.checked_add_days(Days::new(1)),
        RecurringInterval::Weekly => date.checked_add_days(Days::new(7)),
        RecurringInterval::Monthly => date.checked_add_months(Months::new(1)),
        RecurringInterval::Yearly => date.checked_add_months(Months::new(12)),
    };

    next.ok_or_else(|| Error::Validation {
        message: format!("Cannot advance {date} by {interval:?}"),
    })
}

/// Due predicate: a completed recurring template that has never fired, or whose next
/// occurrence is at or before `now`.
#[must_use]
pub fn is_due(model: &transaction::Model, now: DateTime<Utc>) -> bool {
    model.is_recurring
        && model.status == TransactionStatus::Completed
        && (model.last_processed.is_none()
            || model.next_recurring_date.is_some_and(|next| next <= now))
}

/// Process-time check: due, and the scheduled occurrence itself has arrived.
///
/// A template that has never fired is picked up by the scan, but its first occurrence
/// was already applied when it was created, so it only materializes once
/// `next_recurring_date` has passed.
#[must_use]
pub fn is_occurrence_due(model: &transaction::Model, now: DateTime<Utc>) -> bool {
    is_due(model, now) && model.next_recurring_date.is_none_or(|next| next <= now)
}

/// Scan step: every due recurring template as a work item.
#[instrument(skip(db))]
pub async fn find_due_recurring<C>(db: &C, now: DateTime<Utc>) -> Result<Vec<WorkItem>>
where
    C: ConnectionTrait,
{
    let due = Transaction::find()
        .filter(transaction::Column::IsRecurring.eq(true))
        .filter(transaction::Column::Status.eq(TransactionStatus::Completed))
        .filter(
            Condition::any()
                .add(transaction::Column::LastProcessed.is_null())
                .add(transaction::Column::NextRecurringDate.lte(now)),
        )
        .order_by_asc(transaction::Column::Id)
        .all(db)
        .await?;

    let items: Vec<WorkItem> = due
        .iter()
        .filter(|model| is_due(model, now))
        .map(WorkItem::from)
        .collect();

    debug!(count = items.len(), "Found due recurring transactions");
    Ok(items)
}

/// Process-one step: materializes a single occurrence if the template is still due.
///
/// Safe to call repeatedly or concurrently for the same item; only one call per
/// occurrence commits. On any error nothing is written and the template stays due.
#[instrument(skip(db), fields(transaction_id = item.transaction_id, user_id = item.user_id))]
pub async fn process_recurring_transaction(
    db: &DatabaseConnection,
    item: WorkItem,
    now: DateTime<Utc>,
) -> Result<ProcessOutcome> {
    let Some(source) = Transaction::find_by_id(item.transaction_id)
        .filter(transaction::Column::UserId.eq(item.user_id))
        .one(db)
        .await?
    else {
        return Ok(ProcessOutcome::NotFound);
    };

    if !is_occurrence_due(&source, now) {
        debug!("Recurring transaction no longer due");
        return Ok(ProcessOutcome::NotDue);
    }

    let interval = source.recurring_interval.ok_or_else(|| Error::Validation {
        message: format!("Recurring transaction {} has no interval", source.id),
    })?;
    let next_date = advance(now, interval)?;

    let txn = db.begin().await?;

    // Claim the occurrence first: only succeeds if nobody rescheduled it since we read it
    let claimed = Transaction::update_many()
        .col_expr(transaction::Column::LastProcessed, Expr::value(now))
        .col_expr(transaction::Column::NextRecurringDate, Expr::value(next_date))
        .filter(transaction::Column::Id.eq(source.id))
        .filter(transaction::Column::UserId.eq(source.user_id))
        .filter(timestamp_matches(
            transaction::Column::LastProcessed,
            source.last_processed,
        ))
        .filter(timestamp_matches(
            transaction::Column::NextRecurringDate,
            source.next_recurring_date,
        ))
        .exec(&txn)
        .await?;

    if claimed.rows_affected == 0 {
        debug!("Recurring transaction claimed by another worker");
        return Ok(ProcessOutcome::Lost);
    }

    let generated = transaction::ActiveModel {
        user_id: Set(source.user_id),
        account_id: Set(source.account_id),
        transaction_type: Set(source.transaction_type),
        amount: Set(source.amount),
        date: Set(now),
        description: Set(format!("{}{GENERATED_SUFFIX}", source.description)),
        category: Set(source.category.clone()),
        status: Set(TransactionStatus::Completed),
        is_recurring: Set(false),
        recurring_interval: Set(None),
        next_recurring_date: Set(None),
        last_processed: Set(None),
        created_at: Set(now),
        ..Default::default()
    }
    .insert(&txn)
    .await?;

    account::apply_balance_delta(
        &txn,
        source.user_id,
        source.account_id,
        signed_effect(source.transaction_type, source.amount),
    )
    .await?;

    txn.commit().await?;

    info!(
        generated_id = generated.id,
        next_recurring_date = %next_date,
        "Materialized recurring transaction"
    );
    Ok(ProcessOutcome::Materialized {
        generated_id: generated.id,
        next_recurring_date: next_date,
    })
}

/// Scans and processes every due template inline, without fan-out or throttling.
///
/// Used for manual one-off runs; the scheduler uses the queued worker instead.
pub async fn process_due_recurring(
    db: &DatabaseConnection,
    now: DateTime<Utc>,
) -> Result<RecurringRunSummary> {
    let items = find_due_recurring(db, now).await?;
    let mut summary = RecurringRunSummary {
        scanned: items.len(),
        ..Default::default()
    };

    for item in items {
        match process_recurring_transaction(db, item, now).await {
            Ok(ProcessOutcome::Materialized { .. }) => summary.materialized += 1,
            Ok(_) => summary.skipped += 1,
            Err(e) => {
                warn!(
                    transaction_id = item.transaction_id,
                    error = %e,
                    "Failed to process recurring transaction"
                );
                summary.failed += 1;
            }
        }
    }

    Ok(summary)
}

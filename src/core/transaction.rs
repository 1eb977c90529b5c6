//! Transaction business logic - Handles all ledger writes and their balance effects.
//!
//! Every create, update and delete runs inside one database transaction together with
//! the balance delta it causes, so a ledger row and its account balance can never be
//! observed out of sync. Amounts are positive magnitudes; the sign is derived from the
//! transaction type. All reads and writes are scoped by the owning user id.

use crate::{
    core::{account, money::MAX_AMOUNT, recurrence, throttle::RateLimiter},
    entities::{
        Transaction,
        transaction::{self, RecurringInterval, TransactionStatus, TransactionType},
    },
    errors::{Error, Result},
};
use chrono::{DateTime, Utc};
use sea_orm::{QueryOrder, Set, TransactionTrait, prelude::*};
use std::time::Instant;
use tracing::{instrument, warn};

/// Input for creating or replacing a transaction.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    /// Account whose balance this transaction affects
    pub account_id: i64,
    /// `INCOME` or `EXPENSE`
    pub transaction_type: TransactionType,
    /// Positive magnitude in minor units
    pub amount: i64,
    /// When the transaction occurred
    pub date: DateTime<Utc>,
    /// Free-text description
    pub description: String,
    /// Category key
    pub category: String,
    /// Whether this transaction repeats
    pub is_recurring: bool,
    /// Required when `is_recurring`
    pub recurring_interval: Option<RecurringInterval>,
}

/// Signed balance effect of a transaction: expenses subtract, income adds.
#[must_use]
pub const fn signed_effect(transaction_type: TransactionType, amount: i64) -> i64 {
    match transaction_type {
        TransactionType::Income => amount,
        TransactionType::Expense => -amount,
    }
}

/// Rejects malformed input before anything is written.
///
/// Returns the interval to store: `Some` exactly when the transaction is recurring.
fn validate(new_transaction: &NewTransaction) -> Result<Option<RecurringInterval>> {
    if !(1..=MAX_AMOUNT).contains(&new_transaction.amount) {
        return Err(Error::InvalidAmount {
            amount: new_transaction.amount,
        });
    }

    match (new_transaction.is_recurring, new_transaction.recurring_interval) {
        (true, None) => Err(Error::Validation {
            message: "Recurring interval is required for recurring transactions".to_string(),
        }),
        (true, interval) => Ok(interval),
        (false, _) => Ok(None),
    }
}

fn next_recurring_date(
    date: DateTime<Utc>,
    interval: Option<RecurringInterval>,
) -> Result<Option<DateTime<Utc>>> {
    interval
        .map(|interval| recurrence::advance(date, interval))
        .transpose()
}

/// Records a new transaction and applies its effect to the account balance.
#[instrument(skip(db, new_transaction), fields(account_id = new_transaction.account_id))]
pub async fn create_transaction(
    db: &DatabaseConnection,
    user_id: i64,
    new_transaction: NewTransaction,
) -> Result<transaction::Model> {
    let interval = validate(&new_transaction)?;
    let next_date = next_recurring_date(new_transaction.date, interval)?;

    // Use a transaction to ensure atomicity
    let txn = db.begin().await?;

    account::get_account(&txn, user_id, new_transaction.account_id).await?;

    let created = transaction::ActiveModel {
        user_id: Set(user_id),
        account_id: Set(new_transaction.account_id),
        transaction_type: Set(new_transaction.transaction_type),
        amount: Set(new_transaction.amount),
        date: Set(new_transaction.date),
        description: Set(new_transaction.description),
        category: Set(new_transaction.category),
        status: Set(TransactionStatus::Completed),
        is_recurring: Set(interval.is_some()),
        recurring_interval: Set(interval),
        next_recurring_date: Set(next_date),
        last_processed: Set(None),
        created_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(&txn)
    .await?;

    account::apply_balance_delta(
        &txn,
        user_id,
        created.account_id,
        signed_effect(created.transaction_type, created.amount),
    )
    .await?;

    txn.commit().await?;
    Ok(created)
}

/// [`create_transaction`] behind the per-user creation limit.
///
/// The limiter is consulted before anything is read or written; a user over the limit
/// gets [`Error::RateLimited`] and the ledger is untouched.
#[instrument(skip(db, limiter, new_transaction), fields(account_id = new_transaction.account_id))]
pub async fn create_transaction_limited(
    db: &DatabaseConnection,
    limiter: &RateLimiter,
    user_id: i64,
    new_transaction: NewTransaction,
) -> Result<transaction::Model> {
    if let Err(retry_after) = limiter.try_acquire(user_id, Instant::now()) {
        warn!(user_id, ?retry_after, "Transaction creation rate limited");
        return Err(Error::RateLimited { retry_after });
    }

    create_transaction(db, user_id, new_transaction).await
}

/// Replaces a transaction's fields and moves the balance by `new effect - old effect`.
///
/// When the transaction moves to another account, the old effect is reversed on the old
/// account and the new effect applied to the new one.
#[instrument(skip(db, update))]
pub async fn update_transaction(
    db: &DatabaseConnection,
    user_id: i64,
    transaction_id: i64,
    update: NewTransaction,
) -> Result<transaction::Model> {
    let interval = validate(&update)?;
    let next_date = next_recurring_date(update.date, interval)?;

    let txn = db.begin().await?;

    let existing = find_owned_transaction(&txn, user_id, transaction_id)
        .await?
        .ok_or(Error::TransactionNotFound { id: transaction_id })?;
    account::get_account(&txn, user_id, update.account_id).await?;

    let old_account_id = existing.account_id;
    let old_effect = signed_effect(existing.transaction_type, existing.amount);
    let new_effect = signed_effect(update.transaction_type, update.amount);

    let mut active_model: transaction::ActiveModel = existing.into();
    active_model.account_id = Set(update.account_id);
    active_model.transaction_type = Set(update.transaction_type);
    active_model.amount = Set(update.amount);
    active_model.date = Set(update.date);
    active_model.description = Set(update.description);
    active_model.category = Set(update.category);
    active_model.is_recurring = Set(interval.is_some());
    active_model.recurring_interval = Set(interval);
    active_model.next_recurring_date = Set(next_date);
    let updated = active_model.update(&txn).await?;

    if old_account_id == updated.account_id {
        let net = new_effect
            .checked_sub(old_effect)
            .ok_or(Error::InvalidAmount {
                amount: update.amount,
            })?;
        if net != 0 {
            account::apply_balance_delta(&txn, user_id, old_account_id, net).await?;
        }
    } else {
        account::apply_balance_delta(&txn, user_id, old_account_id, -old_effect).await?;
        account::apply_balance_delta(&txn, user_id, updated.account_id, new_effect).await?;
    }

    txn.commit().await?;
    Ok(updated)
}

/// Deletes a transaction and reverses its effect on the account balance.
#[instrument(skip(db))]
pub async fn delete_transaction(
    db: &DatabaseConnection,
    user_id: i64,
    transaction_id: i64,
) -> Result<()> {
    bulk_delete_transactions(db, user_id, &[transaction_id]).await
}

/// Deletes several transactions at once, reversing each one's balance effect.
///
/// All-or-nothing: if any id is missing or foreign, nothing is deleted.
#[instrument(skip(db))]
pub async fn bulk_delete_transactions(
    db: &DatabaseConnection,
    user_id: i64,
    transaction_ids: &[i64],
) -> Result<()> {
    let txn = db.begin().await?;

    for &transaction_id in transaction_ids {
        let existing = find_owned_transaction(&txn, user_id, transaction_id)
            .await?
            .ok_or(Error::TransactionNotFound { id: transaction_id })?;

        let account_id = existing.account_id;
        let reversal = -signed_effect(existing.transaction_type, existing.amount);

        existing.delete(&txn).await?;
        account::apply_balance_delta(&txn, user_id, account_id, reversal).await?;
    }

    txn.commit().await?;
    Ok(())
}

/// Finds a transaction only if it belongs to `user_id`.
pub async fn find_owned_transaction<C>(
    db: &C,
    user_id: i64,
    transaction_id: i64,
) -> Result<Option<transaction::Model>>
where
    C: ConnectionTrait,
{
    Transaction::find_by_id(transaction_id)
        .filter(transaction::Column::UserId.eq(user_id))
        .one(db)
        .await
        .map_err(Into::into)
}

/// Retrieves a transaction owned by `user_id`; a missing one is an error.
pub async fn get_transaction(
    db: &DatabaseConnection,
    user_id: i64,
    transaction_id: i64,
) -> Result<transaction::Model> {
    find_owned_transaction(db, user_id, transaction_id)
        .await?
        .ok_or(Error::TransactionNotFound { id: transaction_id })
}

/// All transactions of one account, newest first.
pub async fn get_transactions_for_account(
    db: &DatabaseConnection,
    user_id: i64,
    account_id: i64,
) -> Result<Vec<transaction::Model>> {
    Transaction::find()
        .filter(transaction::Column::UserId.eq(user_id))
        .filter(transaction::Column::AccountId.eq(account_id))
        .order_by_desc(transaction::Column::Date)
        .order_by_desc(transaction::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

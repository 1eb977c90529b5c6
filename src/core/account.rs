//! Account business logic - creation, lookups, the default-account invariant, and the
//! balance mutator.
//!
//! Every query is scoped by the owning user id. Balances are never written directly after
//! creation; they only move through [`apply_balance_delta`], which runs inside the same
//! database transaction as the ledger write that caused it.

use crate::{
    core::money::parse_amount,
    entities::{Account, Transaction, account, transaction},
    errors::{Error, Result},
};
use sea_orm::{QueryOrder, Set, TransactionTrait, prelude::*, sea_query::Expr};
use tracing::{debug, instrument};

/// Minimum account name length after trimming.
const MIN_NAME_LEN: usize = 3;

/// Input for [`create_account`], as submitted by the user.
#[derive(Debug, Clone)]
pub struct NewAccount {
    /// Display name, at least three characters
    pub name: String,
    /// `CURRENT` or `SAVINGS`
    pub account_type: account::AccountType,
    /// Opening balance as typed by the user, e.g. `"1250.50"`
    pub balance: String,
    /// Whether the new account should become the default
    pub is_default: bool,
}

/// An account together with how many transactions reference it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountSummary {
    /// The account row
    pub account: account::Model,
    /// Number of transactions attached to the account
    pub transaction_count: u64,
}

/// Adds `delta` minor units to an account's balance.
///
/// Issues a single `UPDATE accounts SET balance = balance + ?` so concurrent writers
/// cannot lose each other's updates. Pass the open database transaction of the ledger
/// write so both commit or roll back together.
///
/// # Errors
/// [`Error::AccountNotFound`] if no account with this id belongs to `user_id`.
pub async fn apply_balance_delta<C>(db: &C, user_id: i64, account_id: i64, delta: i64) -> Result<()>
where
    C: ConnectionTrait,
{
    let result = Account::update_many()
        .col_expr(
            account::Column::Balance,
            Expr::col(account::Column::Balance).add(delta),
        )
        .filter(account::Column::Id.eq(account_id))
        .filter(account::Column::UserId.eq(user_id))
        .exec(db)
        .await?;

    if result.rows_affected == 0 {
        return Err(Error::AccountNotFound { id: account_id });
    }

    debug!(user_id, account_id, delta, "Applied balance delta");
    Ok(())
}

/// Creates an account for `user_id`.
///
/// The opening balance is parsed from text and rejected if it is not a valid amount.
/// A user's first account always becomes the default; making any account default clears
/// the flag on all of the user's other accounts in the same transaction.
#[instrument(skip(db, new_account), fields(name = %new_account.name))]
pub async fn create_account(
    db: &DatabaseConnection,
    user_id: i64,
    new_account: NewAccount,
) -> Result<account::Model> {
    let name = new_account.name.trim().to_string();
    if name.chars().count() < MIN_NAME_LEN {
        return Err(Error::Validation {
            message: format!("Account name must be at least {MIN_NAME_LEN} characters"),
        });
    }

    let balance = parse_amount(&new_account.balance)?;

    let txn = db.begin().await?;

    let existing = Account::find()
        .filter(account::Column::UserId.eq(user_id))
        .count(&txn)
        .await?;
    let is_default = existing == 0 || new_account.is_default;

    if is_default {
        clear_default_flags(&txn, user_id).await?;
    }

    let account = account::ActiveModel {
        user_id: Set(user_id),
        name: Set(name),
        account_type: Set(new_account.account_type),
        balance: Set(balance),
        is_default: Set(is_default),
        created_at: Set(chrono::Utc::now()),
        ..Default::default()
    }
    .insert(&txn)
    .await?;

    txn.commit().await?;
    Ok(account)
}

async fn clear_default_flags<C>(db: &C, user_id: i64) -> Result<()>
where
    C: ConnectionTrait,
{
    Account::update_many()
        .col_expr(account::Column::IsDefault, Expr::value(false))
        .filter(account::Column::UserId.eq(user_id))
        .filter(account::Column::IsDefault.eq(true))
        .exec(db)
        .await?;
    Ok(())
}

/// Makes `account_id` the user's only default account.
///
/// Clearing the old default and setting the new one happen in one transaction; if the
/// account does not belong to the user nothing changes.
#[instrument(skip(db))]
pub async fn set_default_account(
    db: &DatabaseConnection,
    user_id: i64,
    account_id: i64,
) -> Result<account::Model> {
    let txn = db.begin().await?;

    clear_default_flags(&txn, user_id).await?;

    let result = Account::update_many()
        .col_expr(account::Column::IsDefault, Expr::value(true))
        .filter(account::Column::Id.eq(account_id))
        .filter(account::Column::UserId.eq(user_id))
        .exec(&txn)
        .await?;

    if result.rows_affected == 0 {
        // Dropping `txn` rolls back the cleared flags
        return Err(Error::AccountNotFound { id: account_id });
    }

    let account = find_owned_account(&txn, user_id, account_id)
        .await?
        .ok_or(Error::AccountNotFound { id: account_id })?;

    txn.commit().await?;
    Ok(account)
}

/// Finds an account only if it belongs to `user_id`.
pub async fn find_owned_account<C>(
    db: &C,
    user_id: i64,
    account_id: i64,
) -> Result<Option<account::Model>>
where
    C: ConnectionTrait,
{
    Account::find_by_id(account_id)
        .filter(account::Column::UserId.eq(user_id))
        .one(db)
        .await
        .map_err(Into::into)
}

/// Like [`find_owned_account`] but a missing account is an error.
pub async fn get_account<C>(db: &C, user_id: i64, account_id: i64) -> Result<account::Model>
where
    C: ConnectionTrait,
{
    find_owned_account(db, user_id, account_id)
        .await?
        .ok_or(Error::AccountNotFound { id: account_id })
}

/// The user's default account, if they have one.
pub async fn get_default_account<C>(db: &C, user_id: i64) -> Result<Option<account::Model>>
where
    C: ConnectionTrait,
{
    Account::find()
        .filter(account::Column::UserId.eq(user_id))
        .filter(account::Column::IsDefault.eq(true))
        .one(db)
        .await
        .map_err(Into::into)
}

/// All of a user's accounts, newest first, with their transaction counts.
pub async fn get_user_accounts(
    db: &DatabaseConnection,
    user_id: i64,
) -> Result<Vec<AccountSummary>> {
    let accounts = Account::find()
        .filter(account::Column::UserId.eq(user_id))
        .order_by_desc(account::Column::CreatedAt)
        .order_by_desc(account::Column::Id)
        .all(db)
        .await?;

    let mut summaries = Vec::with_capacity(accounts.len());
    for account in accounts {
        let transaction_count = Transaction::find()
            .filter(transaction::Column::AccountId.eq(account.id))
            .count(db)
            .await?;
        summaries.push(AccountSummary {
            account,
            transaction_count,
        });
    }

    Ok(summaries)
}

/// An account with its transactions, newest first.
pub async fn get_account_with_transactions(
    db: &DatabaseConnection,
    user_id: i64,
    account_id: i64,
) -> Result<(account::Model, Vec<transaction::Model>)> {
    let account = get_account(db, user_id, account_id).await?;
    let transactions =
        crate::core::transaction::get_transactions_for_account(db, user_id, account_id).await?;
    Ok((account, transactions))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::entities::account::AccountType;
    use crate::test_utils::*;

    fn new_account(name: &str, balance: &str, is_default: bool) -> NewAccount {
        NewAccount {
            name: name.to_string(),
            account_type: AccountType::Current,
            balance: balance.to_string(),
            is_default,
        }
    }

    async fn default_count(db: &DatabaseConnection, user_id: i64) -> Result<u64> {
        Ok(Account::find()
            .filter(account::Column::UserId.eq(user_id))
            .filter(account::Column::IsDefault.eq(true))
            .count(db)
            .await?)
    }

    #[tokio::test]
    async fn test_first_account_becomes_default() -> Result<()> {
        let db = setup_test_db().await?;
        let user = create_test_user(&db, "alice").await?;

        let account = create_account(&db, user.id, new_account("Checking", "100.50", false)).await?;
        assert!(account.is_default);
        assert_eq!(account.balance, 10_050);

        let second = create_account(&db, user.id, new_account("Savings", "0", false)).await?;
        assert!(!second.is_default);

        Ok(())
    }

    #[tokio::test]
    async fn test_create_account_rejects_invalid_input() -> Result<()> {
        let db = setup_test_db().await?;
        let user = create_test_user(&db, "alice").await?;

        let result = create_account(&db, user.id, new_account("Main", "lots", false)).await;
        assert!(matches!(result, Err(Error::Validation { .. })));

        let result = create_account(&db, user.id, new_account(" ab ", "10", false)).await;
        assert!(matches!(result, Err(Error::Validation { .. })));

        // Nothing was written
        assert_eq!(get_user_accounts(&db, user.id).await?.len(), 0);

        Ok(())
    }

    #[tokio::test]
    async fn test_new_default_account_clears_previous() -> Result<()> {
        let db = setup_test_db().await?;
        let user = create_test_user(&db, "alice").await?;

        let first = create_account(&db, user.id, new_account("Checking", "0", false)).await?;
        let second = create_account(&db, user.id, new_account("Savings", "0", true)).await?;

        assert!(second.is_default);
        assert!(!get_account(&db, user.id, first.id).await?.is_default);
        assert_eq!(default_count(&db, user.id).await?, 1);

        Ok(())
    }

    #[tokio::test]
    async fn test_set_default_account_keeps_exactly_one() -> Result<()> {
        let db = setup_test_db().await?;
        let user = create_test_user(&db, "alice").await?;

        let a = create_account(&db, user.id, new_account("Account A", "0", false)).await?;
        let b = create_account(&db, user.id, new_account("Account B", "0", false)).await?;
        let c = create_account(&db, user.id, new_account("Account C", "0", false)).await?;

        for target in [&b, &c, &a, &a] {
            let updated = set_default_account(&db, user.id, target.id).await?;
            assert!(updated.is_default);
            assert_eq!(default_count(&db, user.id).await?, 1);
            assert_eq!(
                get_default_account(&db, user.id).await?.map(|acc| acc.id),
                Some(target.id)
            );
        }

        Ok(())
    }

    #[tokio::test]
    async fn test_set_default_account_rejects_foreign_account() -> Result<()> {
        let db = setup_test_db().await?;
        let alice = create_test_user(&db, "alice").await?;
        let mallory = create_test_user(&db, "mallory").await?;

        let alice_account =
            create_account(&db, alice.id, new_account("Alice main", "0", true)).await?;
        let mallory_account =
            create_account(&db, mallory.id, new_account("Mallory main", "0", true)).await?;

        let result = set_default_account(&db, alice.id, mallory_account.id).await;
        assert!(matches!(result, Err(Error::AccountNotFound { .. })));

        // The rollback left alice's default in place
        assert!(get_account(&db, alice.id, alice_account.id).await?.is_default);
        assert!(get_account(&db, mallory.id, mallory_account.id).await?.is_default);

        Ok(())
    }

    #[tokio::test]
    async fn test_apply_balance_delta() -> Result<()> {
        let db = setup_test_db().await?;
        let user = create_test_user(&db, "alice").await?;
        let account = create_account(&db, user.id, new_account("Checking", "10", false)).await?;

        apply_balance_delta(&db, user.id, account.id, -250).await?;
        apply_balance_delta(&db, user.id, account.id, 1_000).await?;

        assert_eq!(get_account(&db, user.id, account.id).await?.balance, 1_750);

        Ok(())
    }

    #[tokio::test]
    async fn test_apply_balance_delta_scoped_by_owner() -> Result<()> {
        let db = setup_test_db().await?;
        let alice = create_test_user(&db, "alice").await?;
        let mallory = create_test_user(&db, "mallory").await?;
        let account = create_account(&db, alice.id, new_account("Checking", "10", false)).await?;

        let result = apply_balance_delta(&db, mallory.id, account.id, -1_000).await;
        assert!(matches!(result, Err(Error::AccountNotFound { .. })));
        assert_eq!(get_account(&db, alice.id, account.id).await?.balance, 1_000);

        Ok(())
    }

    #[tokio::test]
    async fn test_get_user_accounts_counts_transactions() -> Result<()> {
        let db = setup_test_db().await?;
        let user = create_test_user(&db, "alice").await?;
        let account = create_account(&db, user.id, new_account("Checking", "0", false)).await?;
        create_test_expense(&db, user.id, account.id, 500, fixed_now()).await?;
        create_test_expense(&db, user.id, account.id, 700, fixed_now()).await?;

        let summaries = get_user_accounts(&db, user.id).await?;
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].transaction_count, 2);
        assert_eq!(summaries[0].account.balance, -1_200);

        let (loaded, transactions) = get_account_with_transactions(&db, user.id, account.id).await?;
        assert_eq!(loaded.id, account.id);
        assert_eq!(transactions.len(), 2);

        Ok(())
    }
}

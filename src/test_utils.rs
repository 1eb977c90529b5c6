//! Shared test utilities for `pocket-ledger`.
//!
//! This module provides common helper functions for setting up test databases,
//! creating test entities with sensible defaults, and collaborator doubles for the
//! scheduled jobs.

#![allow(clippy::unwrap_used)]

use crate::{
    core::{
        account::{NewAccount, create_account},
        money::to_decimal,
        report::MonthlyStats,
        transaction::{NewTransaction, create_transaction},
        user::create_user,
    },
    entities::{
        Transaction, account,
        account::AccountType,
        transaction::{self, RecurringInterval, TransactionStatus, TransactionType},
        user,
    },
    errors::{Error, Result},
    services::{
        JobContext, Notification, Notifier,
        insights::{Insights, ReceiptFields},
    },
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use sea_orm::{DatabaseConnection, Set, prelude::*, sea_query::Expr};
use std::sync::{Arc, Mutex};

/// Creates an in-memory `SQLite` database with all tables initialized.
/// This is the standard setup for all integration tests.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = sea_orm::Database::connect("sqlite::memory:").await?;
    crate::config::database::create_tables(&db).await?;
    Ok(db)
}

/// The instant every test treats as "now": 2024-03-15 12:00:00 UTC.
pub fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap()
}

/// Creates a user with external id `ext_{name}` and email `{name}@example.com`.
pub async fn create_test_user(db: &DatabaseConnection, name: &str) -> Result<user::Model> {
    create_user(
        db,
        format!("ext_{name}"),
        format!("{name}@example.com"),
        name.to_string(),
    )
    .await
}

/// Creates a current account with an opening balance in minor units.
///
/// The user's first account becomes the default.
pub async fn create_test_account(
    db: &DatabaseConnection,
    user_id: i64,
    name: &str,
    balance: i64,
) -> Result<account::Model> {
    create_account(
        db,
        user_id,
        NewAccount {
            name: name.to_string(),
            account_type: AccountType::Current,
            balance: to_decimal(balance).to_string(),
            is_default: false,
        },
    )
    .await
}

/// Fresh database with user `alice` and her default account `Checking`.
pub async fn setup_with_account(
    balance: i64,
) -> Result<(DatabaseConnection, user::Model, account::Model)> {
    let db = setup_test_db().await?;
    let user = create_test_user(&db, "alice").await?;
    let account = create_test_account(&db, user.id, "Checking", balance).await?;
    Ok((db, user, account))
}

/// Records a one-off grocery expense through the normal ledger path.
pub async fn create_test_expense(
    db: &DatabaseConnection,
    user_id: i64,
    account_id: i64,
    amount: i64,
    date: DateTime<Utc>,
) -> Result<transaction::Model> {
    create_categorized_expense(db, user_id, account_id, amount, "groceries", date).await
}

/// Records a one-off expense in `category`.
pub async fn create_categorized_expense(
    db: &DatabaseConnection,
    user_id: i64,
    account_id: i64,
    amount: i64,
    category: &str,
    date: DateTime<Utc>,
) -> Result<transaction::Model> {
    create_transaction(
        db,
        user_id,
        NewTransaction {
            account_id,
            transaction_type: TransactionType::Expense,
            amount,
            date,
            description: format!("Test {category}"),
            category: category.to_string(),
            is_recurring: false,
            recurring_interval: None,
        },
    )
    .await
}

/// Records a one-off salary payment.
pub async fn create_test_income(
    db: &DatabaseConnection,
    user_id: i64,
    account_id: i64,
    amount: i64,
    date: DateTime<Utc>,
) -> Result<transaction::Model> {
    create_transaction(
        db,
        user_id,
        NewTransaction {
            account_id,
            transaction_type: TransactionType::Income,
            amount,
            date,
            description: "Salary".to_string(),
            category: "salary".to_string(),
            is_recurring: false,
            recurring_interval: None,
        },
    )
    .await
}

/// Inserts a completed recurring expense template directly, with the given schedule.
///
/// Bypasses the ledger path, so the account balance is not touched.
/// Defaults: "Gym membership", 1500 minor units, category "healthcare".
pub async fn insert_recurring(
    db: &DatabaseConnection,
    account: &account::Model,
    interval: RecurringInterval,
    next_recurring_date: Option<DateTime<Utc>>,
    last_processed: Option<DateTime<Utc>>,
) -> Result<transaction::Model> {
    let model = transaction::ActiveModel {
        user_id: Set(account.user_id),
        account_id: Set(account.id),
        transaction_type: Set(TransactionType::Expense),
        amount: Set(1_500),
        date: Set(fixed_now() - Duration::days(30)),
        description: Set("Gym membership".to_string()),
        category: Set("healthcare".to_string()),
        status: Set(TransactionStatus::Completed),
        is_recurring: Set(true),
        recurring_interval: Set(Some(interval)),
        next_recurring_date: Set(next_recurring_date),
        last_processed: Set(last_processed),
        created_at: Set(fixed_now() - Duration::days(30)),
        ..Default::default()
    };
    Ok(model.insert(db).await?)
}

/// Overwrites a transaction's status.
pub async fn set_status(
    db: &DatabaseConnection,
    transaction_id: i64,
    status: TransactionStatus,
) -> Result<()> {
    Transaction::update_many()
        .col_expr(transaction::Column::Status, Expr::value(status))
        .filter(transaction::Column::Id.eq(transaction_id))
        .exec(db)
        .await?;
    Ok(())
}

/// Notifier that keeps every message it was asked to send.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
    fail_for: Option<String>,
}

impl RecordingNotifier {
    /// A recorder that rejects messages addressed to `address`.
    pub fn failing_for(address: &str) -> Self {
        Self {
            sent: Mutex::default(),
            fail_for: Some(address.to_string()),
        }
    }

    /// Messages delivered so far.
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, notification: &Notification) -> Result<()> {
        if self.fail_for.as_deref() == Some(notification.to.as_str()) {
            return Err(Error::Notification {
                message: format!("mailbox {} unavailable", notification.to),
            });
        }
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

/// Notifier whose every send fails.
#[derive(Debug, Default)]
pub struct FailingNotifier;

#[async_trait]
impl Notifier for FailingNotifier {
    async fn send(&self, _notification: &Notification) -> Result<()> {
        Err(Error::Notification {
            message: "provider unavailable".to_string(),
        })
    }
}

/// Insights provider with a fixed answer.
#[derive(Debug, Default)]
pub struct StaticInsights;

impl StaticInsights {
    /// The single insight always returned.
    pub const INSIGHT: &'static str = "Groceries were your steadiest expense.";
}

#[async_trait]
impl Insights for StaticInsights {
    async fn summarize_finances(&self, _stats: &MonthlyStats, _month: &str) -> Result<Vec<String>> {
        Ok(vec![Self::INSIGHT.to_string()])
    }

    async fn extract_receipt_fields(
        &self,
        _image: &[u8],
        _mime_type: &str,
    ) -> Result<Option<ReceiptFields>> {
        Ok(None)
    }
}

/// Insights provider that always errors.
#[derive(Debug, Default)]
pub struct FailingInsights;

#[async_trait]
impl Insights for FailingInsights {
    async fn summarize_finances(&self, _stats: &MonthlyStats, _month: &str) -> Result<Vec<String>> {
        Err(Error::Insights {
            message: "model overloaded".to_string(),
        })
    }

    async fn extract_receipt_fields(
        &self,
        _image: &[u8],
        _mime_type: &str,
    ) -> Result<Option<ReceiptFields>> {
        Err(Error::Insights {
            message: "model overloaded".to_string(),
        })
    }
}

/// Insights provider that never answers within any reasonable timeout.
#[derive(Debug, Default)]
pub struct SlowInsights;

#[async_trait]
impl Insights for SlowInsights {
    async fn summarize_finances(&self, _stats: &MonthlyStats, _month: &str) -> Result<Vec<String>> {
        tokio::time::sleep(std::time::Duration::from_secs(60)).await;
        Ok(Vec::new())
    }

    async fn extract_receipt_fields(
        &self,
        _image: &[u8],
        _mime_type: &str,
    ) -> Result<Option<ReceiptFields>> {
        tokio::time::sleep(std::time::Duration::from_secs(60)).await;
        Ok(None)
    }
}

/// Job context with a recording notifier and static insights.
pub fn test_context(db: DatabaseConnection) -> (JobContext, Arc<RecordingNotifier>) {
    let notifier = Arc::new(RecordingNotifier::default());
    let ctx = test_context_with(
        db,
        Arc::clone(&notifier) as Arc<dyn Notifier>,
        Arc::new(StaticInsights),
    );
    (ctx, notifier)
}

/// Job context with the given collaborators and a one-second timeout.
pub fn test_context_with(
    db: DatabaseConnection,
    notifier: Arc<dyn Notifier>,
    insights: Arc<dyn Insights>,
) -> JobContext {
    JobContext {
        db,
        notifier,
        insights,
        collaborator_timeout: std::time::Duration::from_secs(1),
    }
}

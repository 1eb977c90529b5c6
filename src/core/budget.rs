//! Budget business logic - monthly budgets and the threshold alert monitor.
//!
//! A budget is compared against the current calendar month's expenses on the owner's
//! default account, including entries dated later in the month.
//! At most one alert is sent per budget per calendar month; `last_alert_sent` is the
//! gate and is claimed with a compare-and-set before the notification goes out.

use crate::{
    core::{
        account::get_default_account,
        money::{MAX_AMOUNT, format_amount, to_decimal},
        period::{current_month_range, is_new_period},
        timestamp_matches,
    },
    entities::{
        Budget, Transaction, User, account, budget,
        transaction::{self, TransactionType},
        user,
    },
    errors::{Error, Result},
    services::{JobContext, Notification},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{QueryOrder, QuerySelect, Set, TransactionTrait, prelude::*, sea_query::Expr};
use tracing::{debug, info, instrument, warn};

/// Alerts fire once usage reaches this share of the budget.
pub const ALERT_THRESHOLD_PERCENT: u32 = 80;

/// A user's budget together with this month's spending on one account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BudgetProgress {
    /// The budget, if the user has set one
    pub budget: Option<budget::Model>,
    /// Expenses dated in the current calendar month, in minor units
    pub current_expenses: i64,
    /// Usage as a percentage, `None` without a positive budget
    pub percentage_used: Option<Decimal>,
}

/// Outcome of one monitor run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BudgetAlertSummary {
    /// Budgets examined
    pub checked: usize,
    /// Alerts delivered
    pub alerts_sent: usize,
    /// Budgets that needed no alert
    pub skipped: usize,
    /// Budgets whose check or send failed; they are retried next run
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BudgetCheck {
    Sent,
    ZeroBudget,
    NoDefaultAccount,
    BelowThreshold,
    AlreadyAlerted,
    Lost,
}

/// Creates or replaces the user's monthly budget. The alert gate is preserved on update.
#[instrument(skip(db))]
pub async fn upsert_budget(db: &DatabaseConnection, user_id: i64, amount: i64) -> Result<budget::Model> {
    if !(0..=MAX_AMOUNT).contains(&amount) {
        return Err(Error::InvalidAmount { amount });
    }

    let txn = db.begin().await?;

    let existing = Budget::find()
        .filter(budget::Column::UserId.eq(user_id))
        .one(&txn)
        .await?;

    let saved = match existing {
        Some(current) => {
            let mut active: budget::ActiveModel = current.into();
            active.amount = Set(amount);
            active.update(&txn).await?
        }
        None => {
            budget::ActiveModel {
                user_id: Set(user_id),
                amount: Set(amount),
                last_alert_sent: Set(None),
                ..Default::default()
            }
            .insert(&txn)
            .await?
        }
    };

    txn.commit().await?;
    Ok(saved)
}

/// The user's budget, if any.
pub async fn get_budget<C>(db: &C, user_id: i64) -> Result<Option<budget::Model>>
where
    C: ConnectionTrait,
{
    Budget::find()
        .filter(budget::Column::UserId.eq(user_id))
        .one(db)
        .await
        .map_err(Into::into)
}

/// Budget and the current month's expenses for one of the user's accounts.
pub async fn get_current_budget(
    db: &DatabaseConnection,
    user_id: i64,
    account_id: i64,
    now: DateTime<Utc>,
) -> Result<BudgetProgress> {
    crate::core::account::get_account(db, user_id, account_id).await?;

    let budget = get_budget(db, user_id).await?;
    let (start, end) = current_month_range(now)?;
    let current_expenses = aggregate_expenses(db, user_id, account_id, start, end).await?;
    let percentage_used = budget
        .as_ref()
        .and_then(|b| percentage_used(current_expenses, b.amount));

    Ok(BudgetProgress {
        budget,
        current_expenses,
        percentage_used,
    })
}

/// Sum of expense amounts on an account with `from <= date < to`.
pub async fn aggregate_expenses<C>(
    db: &C,
    user_id: i64,
    account_id: i64,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<i64>
where
    C: ConnectionTrait,
{
    let total: Option<Option<i64>> = Transaction::find()
        .select_only()
        .column_as(Expr::col(transaction::Column::Amount).sum(), "total")
        .filter(transaction::Column::UserId.eq(user_id))
        .filter(transaction::Column::AccountId.eq(account_id))
        .filter(transaction::Column::TransactionType.eq(TransactionType::Expense))
        .filter(transaction::Column::Date.gte(from))
        .filter(transaction::Column::Date.lt(to))
        .into_tuple()
        .one(db)
        .await?;

    Ok(total.flatten().unwrap_or(0))
}

/// Expenses as a percentage of the budget; `None` when the budget is not positive.
#[must_use]
pub fn percentage_used(expenses: i64, budget_amount: i64) -> Option<Decimal> {
    if budget_amount <= 0 {
        return None;
    }
    (Decimal::from(expenses) * Decimal::ONE_HUNDRED).checked_div(Decimal::from(budget_amount))
}

/// Renders the alert email for a budget that crossed the threshold.
#[must_use]
pub fn format_budget_alert(
    user: &user::Model,
    account: &account::Model,
    budget_amount: i64,
    expenses: i64,
    percentage: Decimal,
) -> Notification {
    let remaining = budget_amount.saturating_sub(expenses);
    let body = format!(
        "Hello {name},\n\n\
         You have used {pct}% of your monthly budget.\n\n\
         Budget amount: {budget}\n\
         Spent so far: {spent}\n\
         Remaining: {remaining}\n\
         Account: {account}\n",
        name = user.name,
        pct = percentage.round_dp(1),
        budget = format_amount(budget_amount),
        spent = format_amount(expenses),
        remaining = format_amount(remaining),
        account = account.name,
    );

    Notification {
        to: user.email.clone(),
        subject: format!("Budget Alert for {}", account.name),
        body,
    }
}

/// Scans every budget and sends at most one threshold alert per budget per month.
///
/// A failure on one budget is logged and counted; the scan continues with the next.
#[instrument(skip(ctx))]
pub async fn check_budget_alerts(ctx: &JobContext, now: DateTime<Utc>) -> Result<BudgetAlertSummary> {
    let budgets = Budget::find()
        .find_also_related(User)
        .order_by_asc(budget::Column::Id)
        .all(&ctx.db)
        .await?;

    let mut summary = BudgetAlertSummary {
        checked: budgets.len(),
        ..Default::default()
    };

    for (budget, user) in budgets {
        let Some(user) = user else {
            warn!(budget_id = budget.id, "Budget has no owner, skipping");
            summary.skipped += 1;
            continue;
        };

        match check_budget(ctx, &budget, &user, now).await {
            Ok(BudgetCheck::Sent) => summary.alerts_sent += 1,
            Ok(outcome) => {
                debug!(budget_id = budget.id, ?outcome, "No alert sent");
                summary.skipped += 1;
            }
            Err(e) => {
                warn!(budget_id = budget.id, user_id = user.id, error = %e, "Budget alert failed");
                summary.failed += 1;
            }
        }
    }

    info!(
        checked = summary.checked,
        sent = summary.alerts_sent,
        failed = summary.failed,
        "Budget alert scan complete"
    );
    Ok(summary)
}

async fn check_budget(
    ctx: &JobContext,
    budget: &budget::Model,
    user: &user::Model,
    now: DateTime<Utc>,
) -> Result<BudgetCheck> {
    if budget.amount <= 0 {
        return Ok(BudgetCheck::ZeroBudget);
    }

    let Some(account) = get_default_account(&ctx.db, user.id).await? else {
        return Ok(BudgetCheck::NoDefaultAccount);
    };

    let (start, end) = current_month_range(now)?;
    let expenses = aggregate_expenses(&ctx.db, user.id, account.id, start, end).await?;
    let Some(percentage) = percentage_used(expenses, budget.amount) else {
        return Ok(BudgetCheck::ZeroBudget);
    };

    if percentage < Decimal::from(ALERT_THRESHOLD_PERCENT) {
        return Ok(BudgetCheck::BelowThreshold);
    }

    if !is_new_period(budget.last_alert_sent, now) {
        return Ok(BudgetCheck::AlreadyAlerted);
    }

    if !claim_alert(&ctx.db, budget, now).await? {
        return Ok(BudgetCheck::Lost);
    }

    let notification = format_budget_alert(user, &account, budget.amount, expenses, percentage);
    if let Err(e) = ctx.bounded(ctx.notifier.send(&notification)).await {
        release_alert(&ctx.db, budget, now).await?;
        return Err(e);
    }

    info!(
        budget_id = budget.id,
        user_id = user.id,
        percentage = %percentage.round_dp(1),
        spent = %to_decimal(expenses),
        "Budget alert sent"
    );
    Ok(BudgetCheck::Sent)
}

/// Sets `last_alert_sent = now` if it still holds the value read with `budget`.
async fn claim_alert(db: &DatabaseConnection, budget: &budget::Model, now: DateTime<Utc>) -> Result<bool> {
    let result = Budget::update_many()
        .col_expr(budget::Column::LastAlertSent, Expr::value(now))
        .filter(budget::Column::Id.eq(budget.id))
        .filter(timestamp_matches(budget::Column::LastAlertSent, budget.last_alert_sent))
        .exec(db)
        .await?;
    Ok(result.rows_affected == 1)
}

/// Undoes [`claim_alert`] after a failed send so the next run retries.
async fn release_alert(db: &DatabaseConnection, budget: &budget::Model, claimed_at: DateTime<Utc>) -> Result<()> {
    Budget::update_many()
        .col_expr(budget::Column::LastAlertSent, Expr::value(budget.last_alert_sent))
        .filter(budget::Column::Id.eq(budget.id))
        .filter(budget::Column::LastAlertSent.eq(claimed_at))
        .exec(db)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::core::account::{NewAccount, create_account};
    use crate::entities::account::AccountType;
    use crate::test_utils::*;
    use chrono::{Duration, TimeZone};
    use std::sync::Arc;

    #[test]
    fn test_percentage_used() {
        assert_eq!(percentage_used(85_000, 100_000), Some(Decimal::from(85)));
        assert_eq!(percentage_used(0, 100_000), Some(Decimal::ZERO));
        assert_eq!(percentage_used(500, 0), None);
        assert_eq!(
            percentage_used(1, 3).unwrap().round_dp(2),
            Decimal::new(3333, 2)
        );
    }

    #[tokio::test]
    async fn test_upsert_budget_replaces_amount() -> Result<()> {
        let (db, user, _account) = setup_with_account(0).await?;

        let created = upsert_budget(&db, user.id, 50_000).await?;
        let updated = upsert_budget(&db, user.id, 75_000).await?;
        assert_eq!(created.id, updated.id);
        assert_eq!(get_budget(&db, user.id).await?.unwrap().amount, 75_000);

        let result = upsert_budget(&db, user.id, -1).await;
        assert!(matches!(result, Err(Error::InvalidAmount { amount: -1 })));

        Ok(())
    }

    #[tokio::test]
    async fn test_get_current_budget_whole_month() -> Result<()> {
        let (db, user, account) = setup_with_account(0).await?;
        let now = fixed_now();
        upsert_budget(&db, user.id, 10_000).await?;

        create_test_expense(&db, user.id, account.id, 2_000, now - Duration::days(3)).await?;
        // Later this month, still counted
        create_test_expense(&db, user.id, account.id, 500, now + Duration::days(10)).await?;
        // Last month and next month, ignored
        create_test_expense(&db, user.id, account.id, 9_999, now - Duration::days(30)).await?;
        let april = Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap();
        create_test_expense(&db, user.id, account.id, 7_777, april).await?;

        let progress = get_current_budget(&db, user.id, account.id, now).await?;
        assert_eq!(progress.current_expenses, 2_500);
        assert_eq!(progress.percentage_used, Some(Decimal::from(25)));

        Ok(())
    }

    #[tokio::test]
    async fn test_alert_fires_once_per_month() -> Result<()> {
        let (db, user, account) = setup_with_account(0).await?;
        let now = fixed_now();
        upsert_budget(&db, user.id, 100_000).await?;
        create_test_expense(&db, user.id, account.id, 85_000, now - Duration::days(1)).await?;

        let (ctx, notifier) = test_context(db.clone());

        let summary = check_budget_alerts(&ctx, now).await?;
        assert_eq!(summary.alerts_sent, 1);

        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "alice@example.com");
        assert_eq!(sent[0].subject, "Budget Alert for Checking");
        assert!(sent[0].body.contains("85"));
        assert!(sent[0].body.contains("$1000.00"));
        assert!(sent[0].body.contains("$850.00"));

        let stored = get_budget(&db, user.id).await?.unwrap();
        assert_eq!(stored.last_alert_sent, Some(now));

        // Later the same month: suppressed
        let summary = check_budget_alerts(&ctx, now + Duration::days(5)).await?;
        assert_eq!(summary.alerts_sent, 0);
        assert_eq!(notifier.sent().len(), 1);

        // Next month, once spending crosses the threshold again
        let april = Utc.with_ymd_and_hms(2024, 4, 10, 9, 0, 0).unwrap();
        create_test_expense(&db, user.id, account.id, 90_000, april - Duration::days(1)).await?;
        let summary = check_budget_alerts(&ctx, april).await?;
        assert_eq!(summary.alerts_sent, 1);
        assert_eq!(notifier.sent().len(), 2);

        Ok(())
    }

    #[tokio::test]
    async fn test_below_threshold_does_not_fire() -> Result<()> {
        let (db, user, account) = setup_with_account(0).await?;
        upsert_budget(&db, user.id, 100_000).await?;
        create_test_expense(&db, user.id, account.id, 79_999, fixed_now()).await?;

        let (ctx, notifier) = test_context(db.clone());
        let summary = check_budget_alerts(&ctx, fixed_now()).await?;

        assert_eq!(summary.alerts_sent, 0);
        assert_eq!(summary.skipped, 1);
        assert!(notifier.sent().is_empty());

        Ok(())
    }

    #[tokio::test]
    async fn test_only_default_account_counts() -> Result<()> {
        let (db, user, _checking) = setup_with_account(0).await?;
        let savings = create_test_account(&db, user.id, "Savings", 0).await?;
        upsert_budget(&db, user.id, 10_000).await?;
        create_test_expense(&db, user.id, savings.id, 9_000, fixed_now()).await?;

        let (ctx, notifier) = test_context(db.clone());
        check_budget_alerts(&ctx, fixed_now()).await?;
        assert!(notifier.sent().is_empty());

        Ok(())
    }

    #[tokio::test]
    async fn test_skips_zero_budget_and_missing_default_account() -> Result<()> {
        let db = setup_test_db().await?;

        // No accounts at all
        let bob = create_test_user(&db, "bob").await?;
        upsert_budget(&db, bob.id, 10_000).await?;

        // Zero budget
        let carol = create_test_user(&db, "carol").await?;
        let carol_account = create_account(
            &db,
            carol.id,
            NewAccount {
                name: "Checking".to_string(),
                account_type: AccountType::Current,
                balance: "0".to_string(),
                is_default: true,
            },
        )
        .await?;
        upsert_budget(&db, carol.id, 0).await?;
        create_test_expense(&db, carol.id, carol_account.id, 5_000, fixed_now()).await?;

        let (ctx, notifier) = test_context(db.clone());
        let summary = check_budget_alerts(&ctx, fixed_now()).await?;

        assert_eq!(summary.checked, 2);
        assert_eq!(summary.skipped, 2);
        assert_eq!(summary.failed, 0);
        assert!(notifier.sent().is_empty());

        Ok(())
    }

    #[tokio::test]
    async fn test_failed_send_leaves_gate_unchanged() -> Result<()> {
        let (db, user, account) = setup_with_account(0).await?;
        upsert_budget(&db, user.id, 10_000).await?;
        create_test_expense(&db, user.id, account.id, 9_500, fixed_now()).await?;

        let ctx = test_context_with(
            db.clone(),
            Arc::new(FailingNotifier),
            Arc::new(StaticInsights::default()),
        );
        let summary = check_budget_alerts(&ctx, fixed_now()).await?;
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.alerts_sent, 0);
        assert!(get_budget(&db, user.id).await?.unwrap().last_alert_sent.is_none());

        // The next run with a working notifier retries
        let (ctx, notifier) = test_context(db.clone());
        let summary = check_budget_alerts(&ctx, fixed_now()).await?;
        assert_eq!(summary.alerts_sent, 1);
        assert_eq!(notifier.sent().len(), 1);

        Ok(())
    }

    #[tokio::test]
    async fn test_claim_alert_is_conditional() -> Result<()> {
        let (db, user, _account) = setup_with_account(0).await?;
        let budget = upsert_budget(&db, user.id, 10_000).await?;
        let now = fixed_now();

        assert!(claim_alert(&db, &budget, now).await?);
        // Stale snapshot still says "never alerted"
        assert!(!claim_alert(&db, &budget, now + Duration::minutes(1)).await?);
        assert_eq!(get_budget(&db, user.id).await?.unwrap().last_alert_sent, Some(now));

        Ok(())
    }
}

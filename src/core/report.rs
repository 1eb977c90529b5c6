//! Monthly report generation.
//!
//! Each user gets one report per calendar month covering the previous month's activity,
//! with generated insights when the provider answers in time and generic ones otherwise.

use crate::{
    core::{
        money::format_amount,
        period::{is_new_period, month_label, previous_month_range},
        timestamp_matches,
        user::get_all_users,
    },
    entities::{
        Transaction, User,
        transaction::{self, TransactionType},
        user,
    },
    errors::{Error, Result},
    services::{JobContext, Notification, insights::fallback_insights},
};
use chrono::{DateTime, Utc};
use sea_orm::{DatabaseConnection, prelude::*, sea_query::Expr};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use tracing::{debug, info, instrument, warn};

/// Aggregated activity for one user over one month.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonthlyStats {
    /// Sum of income, in minor units
    pub total_income: i64,
    /// Sum of expenses, in minor units
    pub total_expenses: i64,
    /// Expense totals keyed by category
    pub by_category: BTreeMap<String, i64>,
    /// Number of transactions in the period
    pub transaction_count: u64,
}

impl MonthlyStats {
    /// Income minus expenses.
    #[must_use]
    pub const fn net_income(&self) -> i64 {
        self.total_income.saturating_sub(self.total_expenses)
    }

    /// Expense categories, largest first.
    #[must_use]
    pub fn top_categories(&self) -> Vec<(&str, i64)> {
        let mut categories: Vec<(&str, i64)> = self
            .by_category
            .iter()
            .map(|(category, amount)| (category.as_str(), *amount))
            .collect();
        categories.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        categories
    }
}

/// Outcome of one report run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonthlyReportSummary {
    /// Users examined
    pub users: usize,
    /// Reports delivered
    pub reports_sent: usize,
    /// Users already reported on this month
    pub skipped: usize,
    /// Users whose report failed; they are retried next run
    pub failed: usize,
}

/// Stats for `user_id` over `[month_start, month_end)`.
pub async fn get_monthly_stats<C>(
    db: &C,
    user_id: i64,
    month_start: DateTime<Utc>,
    month_end: DateTime<Utc>,
) -> Result<MonthlyStats>
where
    C: ConnectionTrait,
{
    let transactions = Transaction::find()
        .filter(transaction::Column::UserId.eq(user_id))
        .filter(transaction::Column::Date.gte(month_start))
        .filter(transaction::Column::Date.lt(month_end))
        .all(db)
        .await?;

    let mut stats = MonthlyStats {
        transaction_count: transactions.len() as u64,
        ..Default::default()
    };

    for t in transactions {
        match t.transaction_type {
            TransactionType::Income => {
                stats.total_income = add_amount(stats.total_income, t.amount)?;
            }
            TransactionType::Expense => {
                stats.total_expenses = add_amount(stats.total_expenses, t.amount)?;
                let category = stats.by_category.entry(t.category).or_insert(0);
                *category = add_amount(*category, t.amount)?;
            }
        }
    }

    Ok(stats)
}

fn add_amount(total: i64, amount: i64) -> Result<i64> {
    total
        .checked_add(amount)
        .ok_or(Error::InvalidAmount { amount })
}

/// Renders the monthly report email.
#[must_use]
pub fn format_monthly_report(
    user: &user::Model,
    stats: &MonthlyStats,
    month: &str,
    insights: &[String],
) -> Notification {
    let mut body = format!(
        "Hello {},\n\n\
         Here's your financial summary for {month}.\n\n\
         Total income: {}\n\
         Total expenses: {}\n\
         Net: {}\n\
         Transactions: {}\n",
        user.name,
        format_amount(stats.total_income),
        format_amount(stats.total_expenses),
        format_amount(stats.net_income()),
        stats.transaction_count,
    );

    let categories = stats.top_categories();
    if !categories.is_empty() {
        body.push_str("\nExpenses by category:\n");
        for (category, amount) in categories {
            let _ = writeln!(body, "  {category}: {}", format_amount(amount));
        }
    }

    if !insights.is_empty() {
        body.push_str("\nInsights:\n");
        for insight in insights {
            let _ = writeln!(body, "  - {insight}");
        }
    }

    Notification {
        to: user.email.clone(),
        subject: format!("Your Monthly Financial Report - {month}"),
        body,
    }
}

/// Sends each user their report for the previous month, at most once per month.
///
/// Failures are isolated per user and leave that user's gate untouched.
#[instrument(skip(ctx))]
pub async fn generate_monthly_reports(
    ctx: &JobContext,
    now: DateTime<Utc>,
) -> Result<MonthlyReportSummary> {
    let users = get_all_users(&ctx.db).await?;
    let mut summary = MonthlyReportSummary {
        users: users.len(),
        ..Default::default()
    };

    for user in users {
        match report_user(ctx, &user, now).await {
            Ok(true) => summary.reports_sent += 1,
            Ok(false) => summary.skipped += 1,
            Err(e) => {
                warn!(user_id = user.id, error = %e, "Monthly report failed");
                summary.failed += 1;
            }
        }
    }

    info!(
        users = summary.users,
        sent = summary.reports_sent,
        failed = summary.failed,
        "Monthly reports complete"
    );
    Ok(summary)
}

async fn report_user(ctx: &JobContext, user: &user::Model, now: DateTime<Utc>) -> Result<bool> {
    if !is_new_period(user.last_monthly_alert_sent, now) {
        debug!(user_id = user.id, "Report already sent this month");
        return Ok(false);
    }

    let (start, end) = previous_month_range(now)?;
    let month = month_label(start);
    let stats = get_monthly_stats(&ctx.db, user.id, start, end).await?;

    let insights = match ctx
        .bounded(ctx.insights.summarize_finances(&stats, &month))
        .await
    {
        Ok(insights) => insights,
        Err(e) => {
            warn!(user_id = user.id, error = %e, "Using fallback insights");
            fallback_insights()
        }
    };

    if !claim_report(&ctx.db, user, now).await? {
        debug!(user_id = user.id, "Report claimed by another run");
        return Ok(false);
    }

    let notification = format_monthly_report(user, &stats, &month, &insights);
    if let Err(e) = ctx.bounded(ctx.notifier.send(&notification)).await {
        release_report(&ctx.db, user, now).await?;
        return Err(e);
    }

    info!(user_id = user.id, %month, "Monthly report sent");
    Ok(true)
}

async fn claim_report(db: &DatabaseConnection, user: &user::Model, now: DateTime<Utc>) -> Result<bool> {
    let result = User::update_many()
        .col_expr(user::Column::LastMonthlyAlertSent, Expr::value(now))
        .filter(user::Column::Id.eq(user.id))
        .filter(timestamp_matches(
            user::Column::LastMonthlyAlertSent,
            user.last_monthly_alert_sent,
        ))
        .exec(db)
        .await?;
    Ok(result.rows_affected == 1)
}

async fn release_report(db: &DatabaseConnection, user: &user::Model, claimed_at: DateTime<Utc>) -> Result<()> {
    User::update_many()
        .col_expr(
            user::Column::LastMonthlyAlertSent,
            Expr::value(user.last_monthly_alert_sent),
        )
        .filter(user::Column::Id.eq(user.id))
        .filter(user::Column::LastMonthlyAlertSent.eq(claimed_at))
        .exec(db)
        .await?;
    Ok(())
}

//! Periodic triggers for the background jobs.
//!
//! Each job runs on its own timer and is independent of the others: a failing run is
//! logged and the next tick tries again. Recurring transactions are fanned out through
//! a bounded queue to a [`RecurringWorker`] that throttles per user.

/// Recurring transaction queue consumer
pub mod worker;

pub use crate::core::throttle::RateLimiter;
pub use worker::RecurringWorker;

use crate::{
    config::{AppConfig, ScheduleConfig, ThrottleConfig},
    core::{
        budget::{BudgetAlertSummary, check_budget_alerts},
        recurrence::{RecurringRunSummary, WorkItem, find_due_recurring, process_due_recurring},
        report::{MonthlyReportSummary, generate_monthly_reports},
    },
    errors::Result,
    services::JobContext,
};
use chrono::{DateTime, Datelike, Utc};
use clap::ValueEnum;
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, warn};

/// The background jobs that can be triggered by hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Job {
    /// Check budgets against the current month's spending
    BudgetAlerts,
    /// Materialize due recurring transactions
    Recurring,
    /// Send last month's reports
    MonthlyReports,
}

/// What a manually triggered job did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobSummary {
    /// Result of [`Job::BudgetAlerts`]
    BudgetAlerts(BudgetAlertSummary),
    /// Result of [`Job::Recurring`]
    Recurring(RecurringRunSummary),
    /// Result of [`Job::MonthlyReports`]
    MonthlyReports(MonthlyReportSummary),
}

/// Runs one job to completion, outside the timers.
///
/// Recurring transactions are processed inline without throttling. The monthly report
/// runs regardless of the day of month; its per-user gate still applies.
pub async fn run_job_once(ctx: &JobContext, job: Job, now: DateTime<Utc>) -> Result<JobSummary> {
    info!(?job, "Running job");
    let summary = match job {
        Job::BudgetAlerts => JobSummary::BudgetAlerts(check_budget_alerts(ctx, now).await?),
        Job::Recurring => JobSummary::Recurring(process_due_recurring(&ctx.db, now).await?),
        Job::MonthlyReports => {
            JobSummary::MonthlyReports(generate_monthly_reports(ctx, now).await?)
        }
    };
    Ok(summary)
}

/// Monthly reports go out on the first day of the month.
#[must_use]
pub fn is_report_day(now: DateTime<Utc>) -> bool {
    now.day() == 1
}

/// Owns the timers and the recurring worker.
pub struct Scheduler {
    ctx: JobContext,
    schedule: ScheduleConfig,
    throttle: ThrottleConfig,
}

impl Scheduler {
    /// Builds a scheduler from the job context and the loaded configuration.
    #[must_use]
    pub fn new(ctx: JobContext, config: &AppConfig) -> Self {
        Self {
            ctx,
            schedule: config.schedule.clone(),
            throttle: config.throttle.clone(),
        }
    }

    /// Runs every job on its timer until `shutdown` completes.
    ///
    /// All timers fire once immediately at startup.
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let (tx, rx) = mpsc::channel(self.throttle.queue_capacity);
        let limiter = RateLimiter::new(
            self.throttle.recurring_per_user,
            Duration::from_secs(self.throttle.period_secs),
        );
        let worker = RecurringWorker::new(self.ctx.db.clone(), limiter, rx, tx.downgrade());
        let worker_handle = tokio::spawn(worker.run());

        let mut budget_tick = interval(self.schedule.budget_alert_interval());
        let mut recurring_tick = interval(self.schedule.recurring_scan_interval());
        let mut monthly_tick = interval(self.schedule.monthly_report_check_interval());
        for tick in [&mut budget_tick, &mut recurring_tick, &mut monthly_tick] {
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        }

        info!(
            budget_alert_secs = self.schedule.budget_alert_interval_secs,
            recurring_scan_secs = self.schedule.recurring_scan_interval_secs,
            monthly_check_secs = self.schedule.monthly_report_check_interval_secs,
            "Scheduler started"
        );

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
                _ = budget_tick.tick() => self.budget_alerts().await,
                _ = recurring_tick.tick() => self.scan_recurring(&tx).await,
                _ = monthly_tick.tick() => self.monthly_reports().await,
            }
        }

        drop(tx);
        match tokio::time::timeout(self.schedule.collaborator_timeout(), worker_handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "Recurring worker panicked"),
            Err(_) => warn!("Recurring worker still busy at shutdown, abandoning"),
        }

        info!("Scheduler stopped");
        Ok(())
    }

    async fn budget_alerts(&self) {
        if let Err(e) = check_budget_alerts(&self.ctx, Utc::now()).await {
            error!(error = %e, "Budget alert job failed");
        }
    }

    async fn scan_recurring(&self, tx: &mpsc::Sender<WorkItem>) {
        let items = match find_due_recurring(&self.ctx.db, Utc::now()).await {
            Ok(items) => items,
            Err(e) => {
                error!(error = %e, "Recurring scan failed");
                return;
            }
        };

        info!(count = items.len(), "Queueing due recurring transactions");
        for item in items {
            if tx.send(item).await.is_err() {
                warn!("Recurring worker is gone, stopping scan");
                return;
            }
        }
    }

    async fn monthly_reports(&self) {
        let now = Utc::now();
        if !is_report_day(now) {
            debug!("Not the first of the month, skipping reports");
            return;
        }

        if let Err(e) = generate_monthly_reports(&self.ctx, now).await {
            error!(error = %e, "Monthly report job failed");
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::core::account::get_account;
    use crate::core::budget::upsert_budget;
    use crate::entities::transaction::RecurringInterval;
    use crate::test_utils::*;
    use chrono::{Duration as ChronoDuration, TimeZone};

    #[test]
    fn test_is_report_day() {
        assert!(is_report_day(Utc.with_ymd_and_hms(2024, 4, 1, 0, 30, 0).unwrap()));
        assert!(!is_report_day(fixed_now()));
    }

    #[tokio::test]
    async fn test_run_job_once_dispatches() -> Result<()> {
        let (db, user, account) = setup_with_account(0).await?;
        insert_recurring(
            &db,
            &account,
            RecurringInterval::Monthly,
            Some(fixed_now() - ChronoDuration::days(1)),
            None,
        )
        .await?;
        upsert_budget(&db, user.id, 1_000).await?;

        let (ctx, notifier) = test_context(db.clone());

        let JobSummary::Recurring(recurring) =
            run_job_once(&ctx, Job::Recurring, fixed_now()).await?
        else {
            panic!("wrong summary kind");
        };
        assert_eq!(recurring.materialized, 1);

        // The generated expense pushes spending past the budget
        let JobSummary::BudgetAlerts(alerts) =
            run_job_once(&ctx, Job::BudgetAlerts, fixed_now()).await?
        else {
            panic!("wrong summary kind");
        };
        assert_eq!(alerts.alerts_sent, 1);

        // Mid-month manual trigger still sends
        let JobSummary::MonthlyReports(reports) =
            run_job_once(&ctx, Job::MonthlyReports, fixed_now()).await?
        else {
            panic!("wrong summary kind");
        };
        assert_eq!(reports.reports_sent, 1);
        assert_eq!(notifier.sent().len(), 2);

        Ok(())
    }

    #[tokio::test]
    async fn test_scheduler_runs_jobs_until_shutdown() -> Result<()> {
        let (db, user, account) = setup_with_account(0).await?;
        insert_recurring(
            &db,
            &account,
            RecurringInterval::Daily,
            Some(Utc::now() - ChronoDuration::days(1)),
            None,
        )
        .await?;

        let (ctx, _notifier) = test_context(db.clone());
        let scheduler = Scheduler::new(ctx, &AppConfig::default());

        // Every timer fires once at startup
        scheduler
            .run(tokio::time::sleep(Duration::from_millis(300)))
            .await?;

        assert_eq!(get_account(&db, user.id, account.id).await?.balance, -1_500);
        assert!(find_due_recurring(&db, Utc::now()).await?.is_empty());

        Ok(())
    }

    #[test]
    fn test_job_names_on_the_command_line() {
        assert_eq!(Job::from_str("budget-alerts", false).unwrap(), Job::BudgetAlerts);
        assert_eq!(Job::from_str("recurring", false).unwrap(), Job::Recurring);
        assert_eq!(
            Job::from_str("monthly-reports", false).unwrap(),
            Job::MonthlyReports
        );
    }
}

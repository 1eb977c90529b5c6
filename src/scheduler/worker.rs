//! Queue consumer that materializes recurring transactions under per-user throttling.

use crate::core::{
    recurrence::{ProcessOutcome, WorkItem, process_recurring_transaction},
    throttle::RateLimiter,
};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

/// Drains the recurring work queue.
///
/// Items over a user's rate are put back on the queue after the limiter's wait. The
/// worker only holds a weak handle to the queue, so it stops once every sender is gone.
pub struct RecurringWorker {
    db: DatabaseConnection,
    limiter: RateLimiter,
    rx: mpsc::Receiver<WorkItem>,
    requeue: mpsc::WeakSender<WorkItem>,
}

impl RecurringWorker {
    /// Builds a worker reading from `rx`; `requeue` must point at the same channel.
    #[must_use]
    pub const fn new(
        db: DatabaseConnection,
        limiter: RateLimiter,
        rx: mpsc::Receiver<WorkItem>,
        requeue: mpsc::WeakSender<WorkItem>,
    ) -> Self {
        Self {
            db,
            limiter,
            rx,
            requeue,
        }
    }

    /// Processes items until the queue is closed.
    pub async fn run(mut self) {
        info!("Recurring worker started");
        while let Some(item) = self.rx.recv().await {
            match self.limiter.try_acquire(item.user_id, Instant::now()) {
                Ok(()) => self.process(item).await,
                Err(wait) => self.defer(item, wait),
            }
        }
        info!("Recurring worker stopped");
    }

    #[instrument(skip(self), fields(transaction_id = item.transaction_id, user_id = item.user_id))]
    async fn process(&self, item: WorkItem) {
        match process_recurring_transaction(&self.db, item, Utc::now()).await {
            Ok(ProcessOutcome::Materialized { generated_id, .. }) => {
                debug!(generated_id, "Recurring item processed");
            }
            Ok(outcome) => debug!(?outcome, "Recurring item skipped"),
            // Nothing was written; the next scan finds it again
            Err(e) => warn!(error = %e, "Recurring item failed"),
        }
    }

    fn defer(&self, item: WorkItem, wait: Duration) {
        let Some(tx) = self.requeue.upgrade() else {
            debug!(
                transaction_id = item.transaction_id,
                "Queue closed, leaving item for the next scan"
            );
            return;
        };

        debug!(
            transaction_id = item.transaction_id,
            user_id = item.user_id,
            wait_ms = wait.as_millis(),
            "Rate limited, requeueing"
        );
        tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            if tx.send(item).await.is_err() {
                debug!(
                    transaction_id = item.transaction_id,
                    "Queue closed before requeue"
                );
            }
        });
    }
}

//! Outbound collaborators and the context the scheduled jobs run with.

/// AI insights and receipt parsing
pub mod insights;
/// Email notifications
pub mod notify;

pub use insights::{FallbackInsights, GeminiInsights, Insights};
pub use notify::{LogNotifier, Notification, Notifier, ResendNotifier};

use crate::errors::Result;
use sea_orm::DatabaseConnection;
use std::{future::Future, sync::Arc, time::Duration};

const USER_AGENT: &str = concat!("pocket-ledger/", env!("CARGO_PKG_VERSION"));

/// Everything a job needs, built once in `main` and passed in.
#[derive(Clone)]
pub struct JobContext {
    /// Shared connection pool
    pub db: DatabaseConnection,
    /// Where alerts and reports go
    pub notifier: Arc<dyn Notifier>,
    /// Source of generated report text
    pub insights: Arc<dyn Insights>,
    /// Upper bound for each collaborator call
    pub collaborator_timeout: Duration,
}

impl JobContext {
    /// Runs a collaborator call, failing with [`crate::errors::Error::Timeout`] if it
    /// does not finish within the configured bound.
    pub async fn bounded<T, F>(&self, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::time::timeout(self.collaborator_timeout, call).await?
    }
}

impl std::fmt::Debug for JobContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobContext")
            .field("collaborator_timeout", &self.collaborator_timeout)
            .finish_non_exhaustive()
    }
}

/// HTTP client shared by the collaborator adapters.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()?)
}

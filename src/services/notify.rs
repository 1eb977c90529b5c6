//! Notification collaborator - sends alert and report emails.

use crate::{
    config::NotificationConfig,
    errors::{Error, Result},
};
use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, instrument};

/// A rendered message ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Recipient address
    pub to: String,
    /// Subject line
    pub subject: String,
    /// Plain-text body
    pub body: String,
}

/// Outbound notification channel.
///
/// Implementations report failure through the returned `Result`; callers decide
/// whether a failed send is retried on a later run.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Sends one notification.
    async fn send(&self, notification: &Notification) -> Result<()>;
}

/// Writes notifications to the log instead of sending them.
///
/// Selected when no email API key is configured.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: &Notification) -> Result<()> {
        info!(
            to = %notification.to,
            subject = %notification.subject,
            "Notification (log only):\n{}",
            notification.body
        );
        Ok(())
    }
}

/// Sends email through the Resend HTTP API.
#[derive(Debug, Clone)]
pub struct ResendNotifier {
    client: reqwest::Client,
    api_key: String,
    from: String,
    endpoint: String,
}

#[derive(Debug, Serialize)]
struct SendEmailRequest<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    text: &'a str,
}

impl ResendNotifier {
    /// Creates a notifier using the shared HTTP client.
    #[must_use]
    pub fn new(client: reqwest::Client, api_key: String, config: &NotificationConfig) -> Self {
        Self {
            client,
            api_key,
            from: config.from.clone(),
            endpoint: config.endpoint.clone(),
        }
    }
}

#[async_trait]
impl Notifier for ResendNotifier {
    #[instrument(skip(self, notification), fields(to = %notification.to))]
    async fn send(&self, notification: &Notification) -> Result<()> {
        let request = SendEmailRequest {
            from: &self.from,
            to: [notification.to.as_str()],
            subject: &notification.subject,
            text: &notification.body,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Notification {
                message: format!("Email API returned {status}: {body}"),
            });
        }

        debug!(subject = %notification.subject, "Email accepted");
        Ok(())
    }
}

//! Application configuration loading from config.toml
//!
//! Every section falls back to defaults, so an empty or missing file yields a working
//! configuration. Secrets (API keys) are never read from this file; they come from the
//! environment.

use crate::errors::{Error, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Configuration structure representing the entire config.toml file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Timer intervals for the scheduled jobs
    pub schedule: ScheduleConfig,
    /// Per-user throttling of recurring processing and transaction creation
    pub throttle: ThrottleConfig,
    /// Outbound email settings
    pub notifications: NotificationConfig,
    /// Insight provider settings
    pub insights: InsightsConfig,
}

/// Timer intervals, in seconds
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Budget alert scan cadence (default every 6 hours)
    pub budget_alert_interval_secs: u64,
    /// Recurring transaction scan cadence (default daily)
    pub recurring_scan_interval_secs: u64,
    /// How often to check whether the monthly report is due (default hourly)
    pub monthly_report_check_interval_secs: u64,
    /// Upper bound for a single notification or insight call
    pub collaborator_timeout_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            budget_alert_interval_secs: 6 * 60 * 60,
            recurring_scan_interval_secs: 24 * 60 * 60,
            monthly_report_check_interval_secs: 60 * 60,
            collaborator_timeout_secs: 30,
        }
    }
}

impl ScheduleConfig {
    /// Budget alert cadence as a [`Duration`]
    #[must_use]
    pub const fn budget_alert_interval(&self) -> Duration {
        Duration::from_secs(self.budget_alert_interval_secs)
    }

    /// Recurring scan cadence as a [`Duration`]
    #[must_use]
    pub const fn recurring_scan_interval(&self) -> Duration {
        Duration::from_secs(self.recurring_scan_interval_secs)
    }

    /// Monthly report check cadence as a [`Duration`]
    #[must_use]
    pub const fn monthly_report_check_interval(&self) -> Duration {
        Duration::from_secs(self.monthly_report_check_interval_secs)
    }

    /// Collaborator call timeout as a [`Duration`]
    #[must_use]
    pub const fn collaborator_timeout(&self) -> Duration {
        Duration::from_secs(self.collaborator_timeout_secs)
    }
}

/// Token bucket settings for the recurring transaction worker and transaction creation
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    /// Items each user may have processed per period
    pub recurring_per_user: u32,
    /// Refill period in seconds
    pub period_secs: u64,
    /// Capacity of the fan-out queue between scan and worker
    pub queue_capacity: usize,
    /// Transactions each user may create per creation period
    pub transactions_per_user: u32,
    /// Creation refill period in seconds (default one hour)
    pub transactions_period_secs: u64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            recurring_per_user: 10,
            period_secs: 60,
            queue_capacity: 1024,
            transactions_per_user: 10,
            transactions_period_secs: 60 * 60,
        }
    }
}

impl ThrottleConfig {
    /// Creation refill period as a [`Duration`]
    #[must_use]
    pub const fn transactions_period(&self) -> Duration {
        Duration::from_secs(self.transactions_period_secs)
    }
}

/// Outbound email settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Sender shown on alerts and reports
    pub from: String,
    /// Email API endpoint
    pub endpoint: String,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            from: "Finance App <onboarding@resend.dev>".to_string(),
            endpoint: "https://api.resend.com/emails".to_string(),
        }
    }
}

/// Insight provider settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InsightsConfig {
    /// Generative model name
    pub model: String,
    /// Base URL of the generative language API
    pub endpoint: String,
}

impl Default for InsightsConfig {
    fn default() -> Self {
        Self {
            model: "gemini-1.5-flash".to_string(),
            endpoint: "https://generativelanguage.googleapis.com/v1beta".to_string(),
        }
    }
}

impl AppConfig {
    /// Rejects settings the scheduler cannot run with.
    ///
    /// # Errors
    /// Returns [`Error::Config`] naming the first offending key.
    pub fn validate(&self) -> Result<()> {
        let non_zero = [
            (
                "schedule.budget_alert_interval_secs",
                self.schedule.budget_alert_interval_secs,
            ),
            (
                "schedule.recurring_scan_interval_secs",
                self.schedule.recurring_scan_interval_secs,
            ),
            (
                "schedule.monthly_report_check_interval_secs",
                self.schedule.monthly_report_check_interval_secs,
            ),
            (
                "schedule.collaborator_timeout_secs",
                self.schedule.collaborator_timeout_secs,
            ),
            ("throttle.period_secs", self.throttle.period_secs),
            (
                "throttle.recurring_per_user",
                u64::from(self.throttle.recurring_per_user),
            ),
            ("throttle.queue_capacity", self.throttle.queue_capacity as u64),
            (
                "throttle.transactions_per_user",
                u64::from(self.throttle.transactions_per_user),
            ),
            (
                "throttle.transactions_period_secs",
                self.throttle.transactions_period_secs,
            ),
        ];

        if let Some((key, _)) = non_zero.iter().find(|(_, value)| *value == 0) {
            return Err(Error::Config {
                message: format!("{key} must be greater than zero"),
            });
        }

        Ok(())
    }
}

/// Loads application configuration from a TOML file
///
/// # Errors
/// Returns an error if the file cannot be read or the TOML is invalid.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<AppConfig> {
    let path_ref = path.as_ref();
    debug!("Attempting to load configuration from: {:?}", path_ref);
    let contents = std::fs::read_to_string(path_ref).map_err(|e| Error::Config {
        message: format!("Failed to read config file {}: {e}", path_ref.display()),
    })?;

    toml::from_str(&contents).map_err(|e| Error::Config {
        message: format!("Failed to parse {}: {e}", path_ref.display()),
    })
}

/// Loads configuration from `path` if it exists, otherwise returns the defaults.
pub fn load_config_or_default<P: AsRef<Path>>(path: P) -> Result<AppConfig> {
    let path_ref = path.as_ref();
    if path_ref.exists() {
        load_config(path_ref)
    } else {
        info!(
            "No config file at {}, using defaults",
            path_ref.display()
        );
        Ok(AppConfig::default())
    }
}

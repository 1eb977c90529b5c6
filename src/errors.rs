//! Unified error type for the ledger, the scheduled jobs and their collaborators.

use thiserror::Error;

/// All errors produced by `pocket-ledger`.
#[derive(Debug, Error)]
pub enum Error {
    /// No authenticated user was supplied for an owner-scoped operation
    #[error("Unauthorized")]
    Unauthorized,

    /// The identity provider id does not map to a stored user
    #[error("User not found: {id}")]
    UserNotFound {
        /// External or internal id that was looked up
        id: String,
    },

    /// The account does not exist or is not owned by the acting user
    #[error("Account not found: {id}")]
    AccountNotFound {
        /// Account id that was looked up
        id: i64,
    },

    /// The transaction does not exist or is not owned by the acting user
    #[error("Transaction not found: {id}")]
    TransactionNotFound {
        /// Transaction id that was looked up
        id: i64,
    },

    /// Input rejected before any write happened
    #[error("Validation error: {message}")]
    Validation {
        /// What was wrong with the input
        message: String,
    },

    /// Amounts must be strictly positive magnitudes in minor units
    #[error("Invalid amount: {amount}")]
    InvalidAmount {
        /// The rejected amount in minor units
        amount: i64,
    },

    /// The user exceeded their request allowance
    #[error("Too many requests, retry in {}s", .retry_after.as_secs().max(1))]
    RateLimited {
        /// Time until the next request is allowed
        retry_after: std::time::Duration,
    },

    /// Configuration could not be read or parsed
    #[error("Configuration error: {message}")]
    Config {
        /// Details about the failure
        message: String,
    },

    /// Storage failure; the enclosing transaction is rolled back
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    /// The notification collaborator rejected or failed a send
    #[error("Notification error: {message}")]
    Notification {
        /// Provider response or failure reason
        message: String,
    },

    /// The insight collaborator returned an unusable response
    #[error("Insights error: {message}")]
    Insights {
        /// Provider response or failure reason
        message: String,
    },

    /// A collaborator call did not finish in time
    #[error("Collaborator call timed out")]
    Timeout,

    /// Outbound HTTP failure
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON encoding or decoding failure
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::Timeout
    }
}

/// Convenience `Result` type
pub type Result<T> = std::result::Result<T, Error>;

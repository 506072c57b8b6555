//! Error types for citecheck.

use thiserror::Error;

/// Result type alias using citecheck's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for citecheck operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Submission batch contained no citations
    #[error("Empty batch: at least one citation is required")]
    EmptyBatch,

    /// Invalid input (rejected locally or by the backend with a 4xx)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Submission or status request failed in transit
    #[error("Network error: {0}")]
    Network(String),

    /// Per-request timeout or total polling budget exhausted
    #[error("Timed out waiting for job {job_id} after {after_ms}ms")]
    Timeout { job_id: String, after_ms: u64 },

    /// Backend rejected the request: no credits left
    #[error("Insufficient credits: {0}")]
    InsufficientCredits(String),

    /// Backend rejected the request: free-tier daily limit reached
    #[error("Daily limit reached: {0}")]
    DailyLimit(String),

    /// Status payload missing required fields
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Backend does not know the tracked job
    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// Backend reported the job as failed
    #[error("Job failed: {0}")]
    JobFailed(String),

    /// Polling stopped before the job reached a terminal status
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Durable storage read/write failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the poll loop may retry after this error within its budget.
    ///
    /// Transient transport failures and malformed payloads are retried.
    /// Business-rule rejections and input errors are surfaced immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::MalformedResponse(_))
    }

    /// Message suitable for showing to an end user.
    pub fn user_message(&self) -> String {
        match self {
            Self::EmptyBatch => "Please enter at least one citation.".to_string(),
            Self::InvalidInput(msg) => msg.clone(),
            Self::InsufficientCredits(_) => {
                "You have no credits remaining. Purchase more to validate additional citations."
                    .to_string()
            }
            Self::DailyLimit(_) => {
                "You have reached today's free validation limit. Try again tomorrow or upgrade."
                    .to_string()
            }
            Self::Timeout { .. } => {
                "Validation is taking longer than expected. Please try again.".to_string()
            }
            Self::JobNotFound(_) => {
                "This validation job is no longer available. Please resubmit.".to_string()
            }
            _ => "Something went wrong while validating your citations.".to_string(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Network(e.to_string())
    }
}

//! Error types shared across the library.

use crate::core::models::AcceptedLead;
use thiserror::Error;

/// Top-level error for the lead generation library.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Initialization error: {0}")]
    Initialization(String),

    #[error("Invalid run request: {0}")]
    InvalidRequest(String),

    #[error("Candidate source failed: {0}")]
    Source(#[from] SourceError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Accepted leads could not be written. The leads travel with the error
    /// so the caller can retry or export them.
    #[error("Database save failed: {at_risk} verified leads were not saved ({source})")]
    Persistence {
        at_risk: usize,
        leads: Vec<AcceptedLead>,
        #[source]
        source: StoreError,
    },

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Library-wide result alias.
pub type Result<T> = std::result::Result<T, AppError>;

/// Failure while fetching a page of candidates.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("query timed out: {0}")]
    Timeout(String),

    #[error("credentials rejected: {0}")]
    Auth(String),

    #[error("permission denied: {0}")]
    Permission(String),

    #[error("query syntax error: {0}")]
    Syntax(String),

    #[error("dataset or table not found: {0}")]
    NotFound(String),

    #[error("transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("could not decode response: {0}")]
    Decode(String),

    #[error("{0}")]
    Unknown(String),
}

impl SourceError {
    /// Short category tag used in logs and progress messages.
    pub fn kind(&self) -> &'static str {
        match self {
            SourceError::Timeout(_) => "timeout",
            SourceError::Auth(_) => "credentials",
            SourceError::Permission(_) => "permission",
            SourceError::Syntax(_) => "sql_error",
            SourceError::NotFound(_) => "not_found",
            SourceError::Http(e) if e.is_timeout() => "timeout",
            SourceError::Http(_) => "transport",
            SourceError::Decode(_) => "decode",
            SourceError::Unknown(_) => "unknown",
        }
    }

    /// Categorizes a free-text service message the way operators triage them.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        if lower.contains("timeout") || lower.contains("timed out") || lower.contains("deadline") {
            SourceError::Timeout(message)
        } else if lower.contains("credentials") || lower.contains("auth") {
            SourceError::Auth(message)
        } else if lower.contains("denied") || lower.contains("permission") {
            SourceError::Permission(message)
        } else if lower.contains("syntax error") {
            SourceError::Syntax(message)
        } else if lower.contains("not found") {
            SourceError::NotFound(message)
        } else {
            SourceError::Unknown(message)
        }
    }
}

/// Failure of a single verification call. Always isolated to one email.
#[derive(Debug, Error)]
pub enum VerificationCallError {
    #[error("verification timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("service error: {0}")]
    Service(String),
}

/// Failure inside a `LeadStore` implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error("store task failed: {0}")]
    Task(String),

    #[error("stored value could not be decoded: {0}")]
    Decode(String),
}

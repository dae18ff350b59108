//! Error types for docket.

use thiserror::Error;

/// Result type alias using docket's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for docket operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Job not found
    #[error("Job not found: {0}")]
    JobNotFound(uuid::Uuid),

    /// Job queue error
    #[error("Job error: {0}")]
    Job(String),

    /// A job handler exceeded its deadline
    #[error("Job timed out after {0}s")]
    Timeout(u64),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl Error {
    /// Short machine-readable code stored in `error_code` on failed jobs.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Database(_) => "store_error",
            Error::NotFound(_) | Error::JobNotFound(_) => "not_found",
            Error::Job(_) => "handler_error",
            Error::Timeout(_) => "timeout",
            Error::Serialization(_) => "serialization",
            Error::Config(_) => "configuration",
            Error::InvalidInput(_) => "invalid_input",
            Error::Internal(_) => "internal",
            Error::Io(_) => "io_error",
        }
    }
}

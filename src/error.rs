//! Error types for retrieve-tasks
//!
//! Losing a claim race or updating a task that no longer references the
//! queue message are not errors. Those outcomes surface as `None` / `0` from
//! the store operations and are left to the caller to log.

use thiserror::Error;

/// Result type alias for retrieve-tasks operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for retrieve-tasks
#[derive(Debug, Error)]
pub enum Error {
    /// A required field was missing or out of range; nothing was written
    #[error("validation failed for {field}: {message}")]
    Validation {
        /// Name of the offending field (e.g., "study_iuid")
        field: &'static str,
        /// Human-readable reason
        message: String,
    },

    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "dispatch.device_name")
        key: Option<String>,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// I/O error (export sinks, database directory creation)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The dispatcher could not hand a claimed task to the broker
    #[error("dispatch failed: {0}")]
    Dispatch(String),
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Constraint violation (e.g., duplicate message id)
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
}

impl Error {
    /// Shorthand for a validation failure on `field`
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Error::Validation {
            field,
            message: message.into(),
        }
    }

    /// Machine-readable error code
    pub fn error_code(&self) -> &str {
        match self {
            Error::Validation { .. } => "validation_error",
            Error::Config { .. } => "config_error",
            Error::Database(DatabaseError::ConstraintViolation(_)) => "constraint_violation",
            Error::Database(_) => "database_error",
            Error::Io(_) => "io_error",
            Error::Serialization(_) => "serialization_error",
            Error::Dispatch(_) => "dispatch_error",
        }
    }

    /// Whether the backing store rejected or failed the operation
    ///
    /// Retry policy for these belongs to the scheduler or worker.
    pub fn is_persistence_failure(&self) -> bool {
        matches!(self, Error::Database(_))
    }
}

/// Map a sqlx error into a [`DatabaseError`], separating constraint violations
pub(crate) fn query_failed(context: &str, e: sqlx::Error) -> Error {
    let constraint = match &e {
        sqlx::Error::Database(db_err) => {
            db_err.is_unique_violation()
                || db_err.is_foreign_key_violation()
                || db_err.is_check_violation()
        }
        _ => false,
    };
    if constraint {
        return Error::Database(DatabaseError::ConstraintViolation(format!(
            "{}: {}",
            context, e
        )));
    }
    Error::Database(DatabaseError::QueryFailed(format!("{}: {}", context, e)))
}

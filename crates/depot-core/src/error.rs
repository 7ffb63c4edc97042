//! Error types module
//!
//! All failures surfaced by the upload lifecycle and the outbox producer are
//! unified under [`DepotError`]. Each variant maps onto one class of the
//! hand-off taxonomy, and [`ErrorMetadata`] tells callers how to react to it
//! (retry, skip, surface, or alert).
//!
//! The `Database` variant and `From<sqlx::Error>` are gated behind the `sqlx` feature.

use std::io;

#[cfg(feature = "sqlx")]
use sqlx::Error as SqlxError;
use uuid::Uuid;

/// Log level for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug level - for expected errors like validation failures
    Debug,
    /// Warning level - for transient issues that a sweep will retry
    Warn,
    /// Error level - for invariant violations and unexpected failures
    Error,
}

/// Metadata describing how an error should be presented and handled.
pub trait ErrorMetadata {
    /// HTTP-equivalent status code for the surrounding application
    fn http_status_code(&self) -> u16;

    /// Machine-readable error code (e.g., "NOT_READY")
    fn error_code(&self) -> &'static str;

    /// Whether this error is recoverable (can be retried)
    fn is_recoverable(&self) -> bool;

    /// Suggested action for the caller
    fn suggested_action(&self) -> Option<&'static str>;

    /// Caller-facing message (may differ from internal error message)
    fn client_message(&self) -> String;

    /// Whether details should be hidden from end users
    fn is_sensitive(&self) -> bool;

    /// Log level for this error
    fn log_level(&self) -> LogLevel;
}

#[derive(Debug, thiserror::Error)]
pub enum DepotError {
    #[cfg(feature = "sqlx")]
    #[error("Database error: {0}")]
    Database(#[source] SqlxError),

    #[cfg(not(feature = "sqlx"))]
    #[error("Database error: {0}")]
    Database(String),

    /// Bad input or an oversized artifact. Not retried.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The artifact is not visible in quarantine yet. The caller retries.
    #[error("Not ready: {0}")]
    NotReady(String),

    /// Unknown record, or a record the caller does not own.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Lost a claim race on an outbox job.
    #[error("Job {job_id} is already being processed")]
    AlreadyProcessing { job_id: Uuid },

    /// Remote store or queue failure. State is parked and a sweep retries it.
    #[error("Transient I/O failure: {0}")]
    TransientIo(String),

    /// An invariant was violated, e.g. mutating a terminal record.
    #[error("Fatal state: {0}")]
    FatalState(String),
}

/// Result alias used across the depot crates
pub type DepotResult<T> = Result<T, DepotError>;

#[cfg(feature = "sqlx")]
impl From<SqlxError> for DepotError {
    fn from(err: SqlxError) -> Self {
        DepotError::Database(err)
    }
}

impl From<io::Error> for DepotError {
    fn from(err: io::Error) -> Self {
        DepotError::TransientIo(format!("IO error: {}", err))
    }
}

impl From<serde_json::Error> for DepotError {
    fn from(err: serde_json::Error) -> Self {
        DepotError::Validation(format!("JSON parsing error: {}", err))
    }
}

impl From<uuid::Error> for DepotError {
    fn from(err: uuid::Error) -> Self {
        DepotError::Validation(format!("UUID parsing error: {}", err))
    }
}

impl From<validator::ValidationErrors> for DepotError {
    fn from(err: validator::ValidationErrors) -> Self {
        DepotError::Validation(format!("Validation error: {}", err))
    }
}

/// Static metadata for each variant: (http_status, error_code, recoverable, suggested_action, sensitive, log_level).
fn depot_error_static_metadata(
    err: &DepotError,
) -> (
    u16,
    &'static str,
    bool,
    Option<&'static str>,
    bool,
    LogLevel,
) {
    match err {
        DepotError::Database(_) => (
            500,
            "DATABASE_ERROR",
            true,
            Some("Retry after a short delay"),
            true,
            LogLevel::Error,
        ),
        DepotError::Validation(_) => (
            400,
            "VALIDATION_ERROR",
            false,
            Some("Check the request and the artifact, then start a new upload"),
            false,
            LogLevel::Debug,
        ),
        DepotError::NotReady(_) => (
            409,
            "NOT_READY",
            true,
            Some("Retry once the direct write to storage has finished"),
            false,
            LogLevel::Debug,
        ),
        DepotError::NotFound(_) => (
            404,
            "NOT_FOUND",
            false,
            Some("Verify the resource ID exists"),
            false,
            LogLevel::Debug,
        ),
        DepotError::AlreadyProcessing { .. } => (
            409,
            "ALREADY_PROCESSING",
            false,
            Some("No action needed, another dispatcher owns this job"),
            false,
            LogLevel::Debug,
        ),
        DepotError::TransientIo(_) => (
            503,
            "TRANSIENT_IO_ERROR",
            true,
            Some("Retry after a short delay"),
            true,
            LogLevel::Warn,
        ),
        DepotError::FatalState(_) => (
            409,
            "FATAL_STATE",
            false,
            Some("Contact support if this error persists"),
            false,
            LogLevel::Error,
        ),
    }
}

impl DepotError {
    /// Get the error type name for detailed error responses
    pub fn error_type(&self) -> &str {
        match self {
            DepotError::Database(_) => "Database",
            DepotError::Validation(_) => "Validation",
            DepotError::NotReady(_) => "NotReady",
            DepotError::NotFound(_) => "NotFound",
            DepotError::AlreadyProcessing { .. } => "AlreadyProcessing",
            DepotError::TransientIo(_) => "TransientIo",
            DepotError::FatalState(_) => "FatalState",
        }
    }

    /// True for failures that leave state parked for a later retry
    pub fn is_transient(&self) -> bool {
        matches!(self, DepotError::TransientIo(_) | DepotError::Database(_))
    }

    /// Get detailed error information including error chain
    pub fn detailed_message(&self) -> String {
        use std::error::Error;

        let mut details = self.to_string();

        let mut source = self.source();
        let mut depth = 0;
        while let Some(err) = source {
            depth += 1;
            if depth > 5 {
                details.push_str("\n  ... (truncated)");
                break;
            }
            details.push_str(&format!("\n  Caused by: {}", err));
            source = err.source();
        }

        details
    }
}

impl ErrorMetadata for DepotError {
    fn http_status_code(&self) -> u16 {
        depot_error_static_metadata(self).0
    }

    fn error_code(&self) -> &'static str {
        depot_error_static_metadata(self).1
    }

    fn is_recoverable(&self) -> bool {
        depot_error_static_metadata(self).2
    }

    fn suggested_action(&self) -> Option<&'static str> {
        depot_error_static_metadata(self).3
    }

    fn is_sensitive(&self) -> bool {
        depot_error_static_metadata(self).4
    }

    fn log_level(&self) -> LogLevel {
        depot_error_static_metadata(self).5
    }

    fn client_message(&self) -> String {
        match self {
            DepotError::Database(_) => "Failed to access database".to_string(),
            DepotError::Validation(ref msg) => msg.clone(),
            DepotError::NotReady(ref msg) => msg.clone(),
            DepotError::NotFound(ref msg) => msg.clone(),
            DepotError::AlreadyProcessing { job_id } => {
                format!("Job {} is already being processed", job_id)
            }
            DepotError::TransientIo(_) => "Storage or queue temporarily unavailable".to_string(),
            DepotError::FatalState(ref msg) => msg.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_metadata_database() {
        #[cfg(feature = "sqlx")]
        let err = DepotError::from(sqlx::Error::PoolClosed);
        #[cfg(not(feature = "sqlx"))]
        let err = DepotError::Database("pool closed".to_string());
        assert_eq!(err.http_status_code(), 500);
        assert_eq!(err.error_code(), "DATABASE_ERROR");
        assert!(err.is_recoverable());
        assert!(err.is_transient());
        assert_eq!(err.client_message(), "Failed to access database");
        assert!(err.is_sensitive());
    }

    #[test]
    fn test_error_metadata_not_ready() {
        let err = DepotError::NotReady("still uploading".to_string());
        assert_eq!(err.http_status_code(), 409);
        assert_eq!(err.error_code(), "NOT_READY");
        assert!(err.is_recoverable());
        assert!(!err.is_transient());
        assert_eq!(err.client_message(), "still uploading");
        assert_eq!(err.log_level(), LogLevel::Debug);
    }

    #[test]
    fn test_error_metadata_already_processing() {
        let job_id = Uuid::new_v4();
        let err = DepotError::AlreadyProcessing { job_id };
        assert_eq!(err.error_code(), "ALREADY_PROCESSING");
        assert!(!err.is_recoverable());
        assert!(err.client_message().contains(&job_id.to_string()));
    }

    #[test]
    fn test_error_metadata_fatal_state_logs_loudly() {
        let err = DepotError::FatalState("upload is not pending".to_string());
        assert_eq!(err.log_level(), LogLevel::Error);
        assert!(!err.is_recoverable());
        assert_eq!(err.error_type(), "FatalState");
    }

    #[test]
    fn test_error_metadata_transient_hidden_from_client() {
        let err = DepotError::TransientIo("connection reset by s3.internal".to_string());
        assert!(err.is_sensitive());
        assert!(!err.client_message().contains("s3.internal"));
        assert_eq!(err.log_level(), LogLevel::Warn);
    }
}

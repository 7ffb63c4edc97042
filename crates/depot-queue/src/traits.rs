//! Job queue abstraction trait

use async_trait::async_trait;
use depot_core::models::OutboxEvent;
use depot_core::DepotError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

/// Queue operation errors
#[derive(Debug, Error)]
pub enum QueueError {
    /// Network failure, throttling or timeout. The job can be re-sent later.
    #[error("Queue temporarily unavailable: {0}")]
    Transient(String),

    /// The queue refused the message itself. Re-sending the same message will not help.
    #[error("Message rejected by queue: {0}")]
    Rejected(String),

    #[error("Failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;

impl From<QueueError> for DepotError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::Rejected(msg) => DepotError::Validation(msg),
            QueueError::Encode(e) => DepotError::Validation(e.to_string()),
            other => DepotError::TransientIo(other.to_string()),
        }
    }
}

/// Message body handed to the downstream worker
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueuedJob {
    pub job_id: Uuid,
    pub kind: String,
    pub upload_id: Uuid,
    pub owner_id: Uuid,
    pub payload: serde_json::Value,
}

impl From<&OutboxEvent> for QueuedJob {
    fn from(event: &OutboxEvent) -> Self {
        Self {
            job_id: event.job_id,
            kind: event.kind.clone(),
            upload_id: event.upload_id,
            owner_id: event.owner_id,
            payload: event.payload.clone(),
        }
    }
}

/// Deterministic idempotency key for a job.
///
/// Every dispatch attempt of the same job carries the same key, so a consumer that
/// remembers keys sees redeliveries after a re-arm as duplicates.
pub fn idempotency_key(job_id: Uuid) -> String {
    hex::encode(Sha256::digest(format!("depot-job:{}", job_id).as_bytes()))
}

/// Remote job queue contract
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &'static str;

    /// Enqueue `job`. A returned error means the message may or may not have been
    /// accepted; callers keep the job parked and retry with the same key.
    async fn enqueue(&self, job: &QueuedJob, idempotency_key: &str) -> QueueResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idempotency_key_is_stable_per_job() {
        let job_id = Uuid::new_v4();
        assert_eq!(idempotency_key(job_id), idempotency_key(job_id));
        assert_ne!(idempotency_key(job_id), idempotency_key(Uuid::new_v4()));
        assert_eq!(idempotency_key(job_id).len(), 64);
    }

    #[test]
    fn test_rejected_maps_to_validation() {
        let err: DepotError = QueueError::Rejected("body too large".to_string()).into();
        assert!(matches!(err, DepotError::Validation(_)));

        let err: DepotError = QueueError::Transient("throttled".to_string()).into();
        assert!(err.is_transient());
    }
}

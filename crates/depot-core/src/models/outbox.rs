use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

use crate::error::DepotError;
use crate::models::upload::UploadRecord;

/// Outbox kind used for artifact processing jobs
pub const ARTIFACT_PROCESSING_KIND: &str = "artifact-processing";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum OutboxStatus {
    Pending,
    Sending,
    Processing,
    Completed,
    Failed,
    NotACv,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Sending => "sending",
            OutboxStatus::Processing => "processing",
            OutboxStatus::Completed => "completed",
            OutboxStatus::Failed => "failed",
            OutboxStatus::NotACv => "not-a-cv",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OutboxStatus::Completed | OutboxStatus::Failed | OutboxStatus::NotACv
        )
    }

    /// Legal successor states.
    ///
    /// `sending -> pending` is the re-arm performed by the stuck-dispatch sweep.
    /// `pending|sending -> failed` is how a sweep records a dispatch that cannot succeed.
    pub fn can_transition_to(&self, next: OutboxStatus) -> bool {
        use OutboxStatus::*;
        matches!(
            (self, next),
            (Pending, Sending)
                | (Pending, Failed)
                | (Sending, Processing)
                | (Sending, Pending)
                | (Sending, Failed)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Processing, NotACv)
        )
    }
}

impl Display for OutboxStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OutboxStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OutboxStatus::Pending),
            "sending" => Ok(OutboxStatus::Sending),
            "processing" => Ok(OutboxStatus::Processing),
            "completed" => Ok(OutboxStatus::Completed),
            "failed" => Ok(OutboxStatus::Failed),
            "not-a-cv" => Ok(OutboxStatus::NotACv),
            _ => Err(anyhow::anyhow!("Invalid outbox status: {}", s)),
        }
    }
}

/// One immutable entry in the outbox log.
///
/// `seq` numbers the events of a job from zero. The current status of a job is the
/// event with the highest `seq`; appends name the `seq` they expect to follow, so two
/// writers racing on the same job cannot both succeed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutboxEvent {
    pub event_id: Uuid,
    pub job_id: Uuid,
    pub seq: i64,
    pub kind: String,
    pub status: OutboxStatus,
    pub upload_id: Uuid,
    pub owner_id: Uuid,
    pub payload: serde_json::Value,
    pub error: Option<String>,
    pub result: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

#[cfg(feature = "sqlx")]
impl sqlx::FromRow<'_, sqlx::postgres::PgRow> for OutboxEvent {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(OutboxEvent {
            event_id: row.try_get("event_id")?,
            job_id: row.try_get("job_id")?,
            seq: row.try_get("seq")?,
            kind: row.try_get("kind")?,
            status: row
                .try_get::<String, _>("status")?
                .parse()
                .map_err(|e| sqlx::Error::Decode(format!("Failed to parse status: {}", e).into()))?,
            upload_id: row.try_get("upload_id")?,
            owner_id: row.try_get("owner_id")?,
            payload: row.try_get("payload")?,
            error: row.try_get("error")?,
            result: row.try_get("result")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl OutboxEvent {
    /// First event of a new job.
    pub fn first(
        kind: impl Into<String>,
        upload_id: Uuid,
        owner_id: Uuid,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            job_id: Uuid::new_v4(),
            seq: 0,
            kind: kind.into(),
            status: OutboxStatus::Pending,
            upload_id,
            owner_id,
            payload,
            error: None,
            result: None,
            created_at: Utc::now(),
        }
    }

    /// First event of the processing job for `record`, whose bytes live under
    /// `canonical_upload_id`.
    pub fn artifact_processing(
        kind: impl Into<String>,
        record: &UploadRecord,
        canonical_upload_id: Uuid,
    ) -> Self {
        let payload = serde_json::json!({
            "upload_id": record.upload_id,
            "owner_id": record.owner_id,
            "content_type": record.declared_content_type,
            "content_hash": record.content_hash.clone().unwrap_or_default(),
            "canonical_upload_id": canonical_upload_id,
        });
        Self::first(kind, record.upload_id, record.owner_id, payload)
    }

    /// Successor event carrying `status`, sharing this job's identity and payload.
    pub fn next(&self, status: OutboxStatus) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            job_id: self.job_id,
            seq: self.seq + 1,
            kind: self.kind.clone(),
            status,
            upload_id: self.upload_id,
            owner_id: self.owner_id,
            payload: self.payload.clone(),
            error: None,
            result: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_result(mut self, result: serde_json::Value) -> Self {
        self.result = Some(result);
        self
    }
}

/// Payload of an artifact processing job
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArtifactProcessingPayload {
    pub upload_id: Uuid,
    pub owner_id: Uuid,
    pub content_type: String,
    pub content_hash: String,
    /// Upload whose stored object holds the bytes (differs from `upload_id` for duplicates)
    pub canonical_upload_id: Uuid,
}

/// Terminal outcome reported by the downstream worker
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed { result: serde_json::Value },
    Failed { error: String },
    NotACv,
}

impl JobOutcome {
    pub fn status(&self) -> OutboxStatus {
        match self {
            JobOutcome::Completed { .. } => OutboxStatus::Completed,
            JobOutcome::Failed { .. } => OutboxStatus::Failed,
            JobOutcome::NotACv => OutboxStatus::NotACv,
        }
    }
}

/// Worker callback body: `{jobId, status, error?, result?}`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordOutcomeRequest {
    pub job_id: Uuid,
    pub status: String,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
}

impl TryFrom<RecordOutcomeRequest> for JobOutcome {
    type Error = DepotError;

    fn try_from(request: RecordOutcomeRequest) -> Result<Self, Self::Error> {
        let status: OutboxStatus = request
            .status
            .parse()
            .map_err(|e: anyhow::Error| DepotError::Validation(e.to_string()))?;

        match status {
            OutboxStatus::Completed => {
                if request.error.is_some() {
                    return Err(DepotError::Validation(
                        "completed outcome must not carry an error".to_string(),
                    ));
                }
                let result = request.result.ok_or_else(|| {
                    DepotError::Validation("completed outcome requires a result".to_string())
                })?;
                Ok(JobOutcome::Completed { result })
            }
            OutboxStatus::Failed => {
                if request.result.is_some() {
                    return Err(DepotError::Validation(
                        "failed outcome must not carry a result".to_string(),
                    ));
                }
                let error = request.error.filter(|e| !e.trim().is_empty()).ok_or_else(|| {
                    DepotError::Validation("failed outcome requires an error".to_string())
                })?;
                Ok(JobOutcome::Failed { error })
            }
            OutboxStatus::NotACv => Ok(JobOutcome::NotACv),
            other => Err(DepotError::Validation(format!(
                "{} is not a terminal outcome",
                other
            ))),
        }
    }
}

/// Check that an ordered event history is a legal walk of the job state machine.
pub fn validate_walk(events: &[OutboxEvent]) -> Result<(), String> {
    let Some(first) = events.first() else {
        return Ok(());
    };
    if first.status != OutboxStatus::Pending || first.seq != 0 {
        return Err(format!(
            "job {} starts with {} at seq {}",
            first.job_id, first.status, first.seq
        ));
    }
    for pair in events.windows(2) {
        let (prev, next) = (&pair[0], &pair[1]);
        if next.job_id != prev.job_id {
            return Err(format!("mixed jobs {} and {}", prev.job_id, next.job_id));
        }
        if next.seq != prev.seq + 1 {
            return Err(format!(
                "job {} skips from seq {} to {}",
                prev.job_id, prev.seq, next.seq
            ));
        }
        if !prev.status.can_transition_to(next.status) {
            return Err(format!(
                "job {} moves {} -> {}",
                prev.job_id, prev.status, next.status
            ));
        }
    }
    Ok(())
}

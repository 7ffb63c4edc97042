//! Repository contracts
//!
//! Every mutation is guarded on the expected current state. A guard that does not
//! match is reported as `Ok(None)` (or a `FatalState` error where noted) and leaves
//! the stored data untouched.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use depot_core::models::{OutboxEvent, OutboxStatus, UploadRecord};
use depot_core::DepotResult;
use uuid::Uuid;

/// Outcome of atomic canonical resolution for one `(owner, content hash)`
#[derive(Debug, Clone, PartialEq)]
pub enum CanonicalResolution {
    /// The record is now the canonical holder of the hash. It is still `pending`
    /// and must be promoted once its bytes are in the healthy namespace.
    Canonical {
        record: UploadRecord,
        /// Previous canonical record (in a replaceable state) that lost the flag
        superseded: Option<Uuid>,
    },
    /// Another record holds the hash in a blocking state. The record is now
    /// `deduplicated` and its first outbox event has been written.
    Deduplicated {
        record: UploadRecord,
        canonical: UploadRecord,
        event: OutboxEvent,
    },
}

/// Successor event to append, minus the identity copied from the current event
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxTransition {
    pub status: OutboxStatus,
    pub error: Option<String>,
    pub result: Option<serde_json::Value>,
}

impl OutboxTransition {
    pub fn to(status: OutboxStatus) -> Self {
        Self {
            status,
            error: None,
            result: None,
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

#[async_trait]
pub trait UploadRepository: Send + Sync {
    /// Insert a fresh `pending` record.
    async fn create_pending(&self, record: &UploadRecord) -> DepotResult<()>;

    async fn get(&self, upload_id: Uuid) -> DepotResult<Option<UploadRecord>>;

    /// Owner-scoped read. Records of other owners are reported as absent.
    async fn get_for_owner(
        &self,
        upload_id: Uuid,
        owner_id: Uuid,
    ) -> DepotResult<Option<UploadRecord>>;

    /// Current canonical record for `(owner, content hash)`, whatever its status.
    async fn find_canonical(
        &self,
        owner_id: Uuid,
        content_hash: &str,
    ) -> DepotResult<Option<UploadRecord>>;

    /// Decide, atomically per `(owner, content hash)`, whether a `pending` record
    /// becomes canonical or a duplicate. `FatalState` if the record is not `pending`.
    async fn resolve_canonical(
        &self,
        upload_id: Uuid,
        content_hash: &str,
        size_bytes: i64,
        job_kind: &str,
    ) -> DepotResult<CanonicalResolution>;

    /// Flip a canonical `pending` record to `uploaded` under `healthy_key` and write
    /// its first outbox event in the same transaction. `FatalState` if the record is
    /// not a canonical `pending` record.
    async fn promote(
        &self,
        upload_id: Uuid,
        healthy_key: &str,
        job_kind: &str,
    ) -> DepotResult<(UploadRecord, OutboxEvent)>;

    /// `pending -> failed`
    async fn mark_failed(&self, upload_id: Uuid) -> DepotResult<Option<UploadRecord>>;

    /// `pending -> rejected`
    async fn mark_rejected(&self, upload_id: Uuid) -> DepotResult<Option<UploadRecord>>;

    /// `uploaded|deduplicated -> deleted-by-user`
    async fn mark_deleted_by_user(
        &self,
        upload_id: Uuid,
        owner_id: Uuid,
    ) -> DepotResult<Option<UploadRecord>>;

    /// `deduplicated` records linked to `canonical_id`, oldest first.
    async fn list_duplicates(&self, canonical_id: Uuid) -> DepotResult<Vec<UploadRecord>>;

    /// Hand the canonical flag of a record that ended without bytes (`failed` or
    /// `rejected`) to one of its duplicates, whose copy is now at `healthy_key`.
    ///
    /// The successor becomes `uploaded` and keeps its existing job. The remaining
    /// duplicates are relinked to it. `Ok(None)` if `previous_id` is no longer the
    /// canonical holder or `successor_id` is no longer its duplicate.
    async fn adopt_duplicate(
        &self,
        previous_id: Uuid,
        successor_id: Uuid,
        healthy_key: &str,
    ) -> DepotResult<Option<UploadRecord>>;

    /// `pending` records created at or before `older_than`, oldest first.
    async fn list_stale_pending(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> DepotResult<Vec<UploadRecord>>;
}

#[async_trait]
pub trait OutboxRepository: Send + Sync {
    /// Most recent event of a job.
    async fn latest(&self, job_id: Uuid) -> DepotResult<Option<OutboxEvent>>;

    /// All events of a job ordered by `seq`.
    async fn history(&self, job_id: Uuid) -> DepotResult<Vec<OutboxEvent>>;

    /// Append `transition` if and only if the job's current status is `from`.
    ///
    /// Both-or-neither: of several concurrent callers expecting the same current
    /// event, exactly one gets `Some`.
    async fn append_transition(
        &self,
        job_id: Uuid,
        from: OutboxStatus,
        transition: OutboxTransition,
    ) -> DepotResult<Option<OutboxEvent>>;

    /// Jobs whose current event has `status` and was created at or before
    /// `older_than`, oldest first.
    async fn list_current_in_status(
        &self,
        status: OutboxStatus,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> DepotResult<Vec<OutboxEvent>>;

    /// Current event of every job created for an upload.
    async fn jobs_for_upload(&self, upload_id: Uuid) -> DepotResult<Vec<OutboxEvent>>;
}

//! In-memory repositories
//!
//! Both repositories of a [`MemoryStore`] share one lock, so operations that touch an
//! upload record and the outbox log together (promotion, deduplication) are atomic
//! exactly like their Postgres transactions.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use depot_core::models::{OutboxEvent, OutboxStatus, UploadRecord, UploadStatus};
use depot_core::{DepotError, DepotResult};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::db::traits::{
    CanonicalResolution, OutboxRepository, OutboxTransition, UploadRepository,
};

#[derive(Default)]
struct MemoryState {
    uploads: HashMap<Uuid, UploadRecord>,
    /// Events per job, ordered by `seq`
    jobs: HashMap<Uuid, Vec<OutboxEvent>>,
}

impl MemoryState {
    fn canonical_for(&self, owner_id: Uuid, content_hash: &str) -> Option<&UploadRecord> {
        self.uploads.values().find(|r| {
            r.is_canonical && r.owner_id == owner_id && r.content_hash.as_deref() == Some(content_hash)
        })
    }

    fn push_first_event(&mut self, event: OutboxEvent) {
        self.jobs.insert(event.job_id, vec![event]);
    }

    fn current_events(&self) -> impl Iterator<Item = &OutboxEvent> {
        self.jobs.values().filter_map(|events| events.last())
    }
}

/// Shared backing store for the in-memory repositories
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn uploads(&self) -> MemoryUploadRepository {
        MemoryUploadRepository {
            store: self.clone(),
        }
    }

    pub fn outbox(&self) -> MemoryOutboxRepository {
        MemoryOutboxRepository {
            store: self.clone(),
        }
    }

    /// Every upload record, for assertions in tests and one-shot tools
    pub async fn all_uploads(&self) -> Vec<UploadRecord> {
        let state = self.state.lock().await;
        let mut records: Vec<UploadRecord> = state.uploads.values().cloned().collect();
        records.sort_by_key(|r| r.created_at);
        records
    }
}

#[derive(Clone)]
pub struct MemoryUploadRepository {
    store: MemoryStore,
}

impl MemoryUploadRepository {
    async fn transition_from_pending(
        &self,
        upload_id: Uuid,
        status: UploadStatus,
    ) -> DepotResult<Option<UploadRecord>> {
        let mut state = self.store.state.lock().await;
        match state.uploads.get_mut(&upload_id) {
            Some(record) if record.status == UploadStatus::Pending => {
                record.status = status;
                record.updated_at = Utc::now();
                Ok(Some(record.clone()))
            }
            _ => Ok(None),
        }
    }
}

fn claim(
    state: &mut MemoryState,
    upload_id: Uuid,
    content_hash: &str,
    size_bytes: i64,
) -> DepotResult<UploadRecord> {
    let record = state
        .uploads
        .get_mut(&upload_id)
        .filter(|r| r.status == UploadStatus::Pending)
        .ok_or_else(|| {
            DepotError::FatalState(format!("Upload {} left pending during resolution", upload_id))
        })?;
    record.is_canonical = true;
    record.content_hash = Some(content_hash.to_string());
    record.size_bytes = Some(size_bytes);
    record.updated_at = Utc::now();
    Ok(record.clone())
}

#[async_trait]
impl UploadRepository for MemoryUploadRepository {
    async fn create_pending(&self, record: &UploadRecord) -> DepotResult<()> {
        if record.status != UploadStatus::Pending {
            return Err(DepotError::FatalState(format!(
                "Upload {} must be created pending, got {}",
                record.upload_id, record.status
            )));
        }

        let mut state = self.store.state.lock().await;
        if state.uploads.contains_key(&record.upload_id) {
            return Err(DepotError::FatalState(format!(
                "Upload {} already exists",
                record.upload_id
            )));
        }
        state.uploads.insert(record.upload_id, record.clone());
        Ok(())
    }

    async fn get(&self, upload_id: Uuid) -> DepotResult<Option<UploadRecord>> {
        let state = self.store.state.lock().await;
        Ok(state.uploads.get(&upload_id).cloned())
    }

    async fn get_for_owner(
        &self,
        upload_id: Uuid,
        owner_id: Uuid,
    ) -> DepotResult<Option<UploadRecord>> {
        let state = self.store.state.lock().await;
        Ok(state
            .uploads
            .get(&upload_id)
            .filter(|r| r.owner_id == owner_id)
            .cloned())
    }

    async fn find_canonical(
        &self,
        owner_id: Uuid,
        content_hash: &str,
    ) -> DepotResult<Option<UploadRecord>> {
        let state = self.store.state.lock().await;
        Ok(state.canonical_for(owner_id, content_hash).cloned())
    }

    async fn resolve_canonical(
        &self,
        upload_id: Uuid,
        content_hash: &str,
        size_bytes: i64,
        job_kind: &str,
    ) -> DepotResult<CanonicalResolution> {
        let mut state = self.store.state.lock().await;

        let record = state
            .uploads
            .get_mut(&upload_id)
            .ok_or_else(|| DepotError::NotFound(format!("Upload {} not found", upload_id)))?;

        if record.status != UploadStatus::Pending {
            return Err(DepotError::FatalState(format!(
                "Upload {} is {}, not pending",
                upload_id, record.status
            )));
        }

        if record.is_canonical && record.content_hash.as_deref() != Some(content_hash) {
            record.is_canonical = false;
            record.updated_at = Utc::now();
        }
        let owner_id = record.owner_id;

        let current = state.canonical_for(owner_id, content_hash).cloned();

        match current {
            Some(canonical) if canonical.upload_id == upload_id => {
                let record = claim(&mut state, upload_id, content_hash, size_bytes)?;
                Ok(CanonicalResolution::Canonical {
                    record,
                    superseded: None,
                })
            }
            Some(canonical) if canonical.status.is_blocking() => {
                let record = state.uploads.get_mut(&upload_id).ok_or_else(|| {
                    DepotError::NotFound(format!("Upload {} not found", upload_id))
                })?;
                record.status = UploadStatus::Deduplicated;
                record.duplicate_of = Some(canonical.upload_id);
                record.content_hash = Some(content_hash.to_string());
                record.size_bytes = Some(size_bytes);
                record.is_canonical = false;
                record.updated_at = Utc::now();
                let record = record.clone();

                let event =
                    OutboxEvent::artifact_processing(job_kind, &record, canonical.upload_id);
                state.push_first_event(event.clone());

                Ok(CanonicalResolution::Deduplicated {
                    record,
                    canonical,
                    event,
                })
            }
            Some(canonical) => {
                if let Some(previous) = state.uploads.get_mut(&canonical.upload_id) {
                    previous.is_canonical = false;
                    previous.updated_at = Utc::now();
                }
                let record = claim(&mut state, upload_id, content_hash, size_bytes)?;
                Ok(CanonicalResolution::Canonical {
                    record,
                    superseded: Some(canonical.upload_id),
                })
            }
            None => {
                let record = claim(&mut state, upload_id, content_hash, size_bytes)?;
                Ok(CanonicalResolution::Canonical {
                    record,
                    superseded: None,
                })
            }
        }
    }

    async fn promote(
        &self,
        upload_id: Uuid,
        healthy_key: &str,
        job_kind: &str,
    ) -> DepotResult<(UploadRecord, OutboxEvent)> {
        let mut state = self.store.state.lock().await;

        let record = state
            .uploads
            .get_mut(&upload_id)
            .ok_or_else(|| DepotError::NotFound(format!("Upload {} not found", upload_id)))?;

        if record.status != UploadStatus::Pending || !record.is_canonical {
            return Err(DepotError::FatalState(format!(
                "Upload {} cannot be promoted from {} (canonical: {})",
                upload_id, record.status, record.is_canonical
            )));
        }

        record.status = UploadStatus::Uploaded;
        record.storage_key = healthy_key.to_string();
        record.updated_at = Utc::now();
        let record = record.clone();

        let event = OutboxEvent::artifact_processing(job_kind, &record, record.upload_id);
        state.push_first_event(event.clone());

        Ok((record, event))
    }

    async fn mark_failed(&self, upload_id: Uuid) -> DepotResult<Option<UploadRecord>> {
        self.transition_from_pending(upload_id, UploadStatus::Failed)
            .await
    }

    async fn mark_rejected(&self, upload_id: Uuid) -> DepotResult<Option<UploadRecord>> {
        self.transition_from_pending(upload_id, UploadStatus::Rejected)
            .await
    }

    async fn mark_deleted_by_user(
        &self,
        upload_id: Uuid,
        owner_id: Uuid,
    ) -> DepotResult<Option<UploadRecord>> {
        let mut state = self.store.state.lock().await;
        match state.uploads.get_mut(&upload_id) {
            Some(record) if record.owner_id == owner_id && record.status.is_user_deletable() => {
                record.status = UploadStatus::DeletedByUser;
                record.updated_at = Utc::now();
                Ok(Some(record.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn list_duplicates(&self, canonical_id: Uuid) -> DepotResult<Vec<UploadRecord>> {
        let state = self.store.state.lock().await;
        let mut records: Vec<UploadRecord> = state
            .uploads
            .values()
            .filter(|r| {
                r.status == UploadStatus::Deduplicated && r.duplicate_of == Some(canonical_id)
            })
            .cloned()
            .collect();
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }

    async fn adopt_duplicate(
        &self,
        previous_id: Uuid,
        successor_id: Uuid,
        healthy_key: &str,
    ) -> DepotResult<Option<UploadRecord>> {
        let mut state = self.store.state.lock().await;

        let releasable = state.uploads.get(&previous_id).is_some_and(|r| {
            r.is_canonical && matches!(r.status, UploadStatus::Failed | UploadStatus::Rejected)
        });
        let adoptable = state.uploads.get(&successor_id).is_some_and(|r| {
            r.status == UploadStatus::Deduplicated && r.duplicate_of == Some(previous_id)
        });
        if !releasable || !adoptable {
            return Ok(None);
        }

        let now = Utc::now();
        for record in state.uploads.values_mut() {
            if record.upload_id == previous_id {
                record.is_canonical = false;
                record.updated_at = now;
            } else if record.upload_id == successor_id {
                record.status = UploadStatus::Uploaded;
                record.is_canonical = true;
                record.duplicate_of = None;
                record.storage_key = healthy_key.to_string();
                record.updated_at = now;
            } else if record.status == UploadStatus::Deduplicated
                && record.duplicate_of == Some(previous_id)
            {
                record.duplicate_of = Some(successor_id);
                record.updated_at = now;
            }
        }

        Ok(state.uploads.get(&successor_id).cloned())
    }

    async fn list_stale_pending(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> DepotResult<Vec<UploadRecord>> {
        let state = self.store.state.lock().await;
        let mut records: Vec<UploadRecord> = state
            .uploads
            .values()
            .filter(|r| r.status == UploadStatus::Pending && r.created_at <= older_than)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.created_at);
        records.truncate(limit.max(0) as usize);
        Ok(records)
    }
}

#[derive(Clone)]
pub struct MemoryOutboxRepository {
    store: MemoryStore,
}

#[async_trait]
impl OutboxRepository for MemoryOutboxRepository {
    async fn latest(&self, job_id: Uuid) -> DepotResult<Option<OutboxEvent>> {
        let state = self.store.state.lock().await;
        Ok(state.jobs.get(&job_id).and_then(|events| events.last()).cloned())
    }

    async fn history(&self, job_id: Uuid) -> DepotResult<Vec<OutboxEvent>> {
        let state = self.store.state.lock().await;
        Ok(state.jobs.get(&job_id).cloned().unwrap_or_default())
    }

    async fn append_transition(
        &self,
        job_id: Uuid,
        from: OutboxStatus,
        transition: OutboxTransition,
    ) -> DepotResult<Option<OutboxEvent>> {
        if !from.can_transition_to(transition.status) {
            return Err(DepotError::FatalState(format!(
                "Illegal outbox transition {} -> {} for job {}",
                from, transition.status, job_id
            )));
        }

        let mut state = self.store.state.lock().await;
        let Some(events) = state.jobs.get_mut(&job_id) else {
            return Ok(None);
        };
        let Some(current) = events.last() else {
            return Ok(None);
        };
        if current.status != from {
            return Ok(None);
        }

        let mut next = current.next(transition.status);
        next.error = transition.error;
        next.result = transition.result;
        events.push(next.clone());

        Ok(Some(next))
    }

    async fn list_current_in_status(
        &self,
        status: OutboxStatus,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> DepotResult<Vec<OutboxEvent>> {
        let state = self.store.state.lock().await;
        let mut events: Vec<OutboxEvent> = state
            .current_events()
            .filter(|e| e.status == status && e.created_at <= older_than)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.created_at);
        events.truncate(limit.max(0) as usize);
        Ok(events)
    }

    async fn jobs_for_upload(&self, upload_id: Uuid) -> DepotResult<Vec<OutboxEvent>> {
        let state = self.store.state.lock().await;
        let mut events: Vec<OutboxEvent> = state
            .current_events()
            .filter(|e| e.upload_id == upload_id)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.created_at);
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use depot_core::models::{validate_walk, ARTIFACT_PROCESSING_KIND};

    fn pending(owner_id: Uuid) -> UploadRecord {
        let upload_id = Uuid::new_v4();
        UploadRecord::new_pending(
            upload_id,
            owner_id,
            "local".to_string(),
            format!("quarantine/{}/{}/cv.pdf", owner_id, upload_id),
            "cv.pdf".to_string(),
            "application/pdf".to_string(),
            Utc::now() + Duration::minutes(15),
        )
    }

    fn hash() -> String {
        "ab".repeat(32)
    }

    #[tokio::test]
    async fn test_first_record_claims_canonical() {
        let store = MemoryStore::new();
        let uploads = store.uploads();
        let record = pending(Uuid::new_v4());
        uploads.create_pending(&record).await.unwrap();

        let resolution = uploads
            .resolve_canonical(record.upload_id, &hash(), 42, ARTIFACT_PROCESSING_KIND)
            .await
            .unwrap();

        match resolution {
            CanonicalResolution::Canonical { record, superseded } => {
                assert!(record.is_canonical);
                assert_eq!(record.status, UploadStatus::Pending);
                assert_eq!(record.size_bytes, Some(42));
                assert!(superseded.is_none());
            }
            other => panic!("unexpected resolution: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_blocking_canonical_deduplicates_with_event() {
        let store = MemoryStore::new();
        let uploads = store.uploads();
        let owner = Uuid::new_v4();
        let a = pending(owner);
        let b = pending(owner);
        uploads.create_pending(&a).await.unwrap();
        uploads.create_pending(&b).await.unwrap();

        uploads
            .resolve_canonical(a.upload_id, &hash(), 1, ARTIFACT_PROCESSING_KIND)
            .await
            .unwrap();
        let resolution = uploads
            .resolve_canonical(b.upload_id, &hash(), 1, ARTIFACT_PROCESSING_KIND)
            .await
            .unwrap();

        let CanonicalResolution::Deduplicated { record, canonical, event } = resolution else {
            panic!("expected deduplication");
        };
        assert_eq!(record.status, UploadStatus::Deduplicated);
        assert_eq!(record.duplicate_of, Some(a.upload_id));
        assert_eq!(canonical.upload_id, a.upload_id);

        let latest = store.outbox().latest(event.job_id).await.unwrap().unwrap();
        assert_eq!(latest.status, OutboxStatus::Pending);
    }

    #[tokio::test]
    async fn test_promote_requires_canonical_pending() {
        let store = MemoryStore::new();
        let uploads = store.uploads();
        let record = pending(Uuid::new_v4());
        uploads.create_pending(&record).await.unwrap();

        let err = uploads
            .promote(record.upload_id, "artifacts/x/y", ARTIFACT_PROCESSING_KIND)
            .await
            .unwrap_err();
        assert!(matches!(err, DepotError::FatalState(_)));
    }

    #[tokio::test]
    async fn test_adopt_duplicate_moves_canonical_flag() {
        let store = MemoryStore::new();
        let uploads = store.uploads();
        let owner = Uuid::new_v4();
        let (a, b, c) = (pending(owner), pending(owner), pending(owner));
        for record in [&a, &b, &c] {
            uploads.create_pending(record).await.unwrap();
            uploads
                .resolve_canonical(record.upload_id, &hash(), 1, ARTIFACT_PROCESSING_KIND)
                .await
                .unwrap();
        }

        // A still blocks the hash
        assert!(uploads
            .adopt_duplicate(a.upload_id, b.upload_id, "artifacts/o/h")
            .await
            .unwrap()
            .is_none());

        uploads.mark_failed(a.upload_id).await.unwrap();
        assert_eq!(uploads.list_duplicates(a.upload_id).await.unwrap().len(), 2);

        let adopted = uploads
            .adopt_duplicate(a.upload_id, b.upload_id, "artifacts/o/h")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(adopted.status, UploadStatus::Uploaded);
        assert!(adopted.is_canonical);
        assert_eq!(adopted.duplicate_of, None);
        assert_eq!(adopted.storage_key, "artifacts/o/h");

        let canonical = uploads.find_canonical(owner, &hash()).await.unwrap().unwrap();
        assert_eq!(canonical.upload_id, b.upload_id);
        let c_record = uploads.get(c.upload_id).await.unwrap().unwrap();
        assert_eq!(c_record.duplicate_of, Some(b.upload_id));
        assert!(uploads.list_duplicates(a.upload_id).await.unwrap().is_empty());

        // Second hand-off of the same record is a no-op
        assert!(uploads
            .adopt_duplicate(a.upload_id, c.upload_id, "artifacts/o/h")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_append_transition_single_winner() {
        let store = MemoryStore::new();
        let uploads = store.uploads();
        let outbox = store.outbox();
        let record = pending(Uuid::new_v4());
        uploads.create_pending(&record).await.unwrap();
        uploads
            .resolve_canonical(record.upload_id, &hash(), 1, ARTIFACT_PROCESSING_KIND)
            .await
            .unwrap();
        let (_, event) = uploads
            .promote(record.upload_id, "artifacts/x/y", ARTIFACT_PROCESSING_KIND)
            .await
            .unwrap();

        let first = outbox
            .append_transition(
                event.job_id,
                OutboxStatus::Pending,
                OutboxTransition::to(OutboxStatus::Sending),
            )
            .await
            .unwrap();
        let second = outbox
            .append_transition(
                event.job_id,
                OutboxStatus::Pending,
                OutboxTransition::to(OutboxStatus::Sending),
            )
            .await
            .unwrap();
        assert!(first.is_some());
        assert!(second.is_none());

        let history = outbox.history(event.job_id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(validate_walk(&history).is_ok());
    }

    #[tokio::test]
    async fn test_illegal_transition_is_fatal() {
        let store = MemoryStore::new();
        let err = store
            .outbox()
            .append_transition(
                Uuid::new_v4(),
                OutboxStatus::Pending,
                OutboxTransition::to(OutboxStatus::Processing),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DepotError::FatalState(_)));
    }

    #[tokio::test]
    async fn test_deleted_by_user_only_from_live_states() {
        let store = MemoryStore::new();
        let uploads = store.uploads();
        let record = pending(Uuid::new_v4());
        uploads.create_pending(&record).await.unwrap();

        assert!(uploads
            .mark_deleted_by_user(record.upload_id, record.owner_id)
            .await
            .unwrap()
            .is_none());
    }
}

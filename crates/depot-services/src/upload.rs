//! Upload lifecycle
//!
//! Moves an upload from a quarantined write location to a deduplicated, content
//! addressed object in the healthy namespace, and creates the first processing job.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use depot_core::models::{
    CompleteUploadResponse, IssueWriteLocationRequest, UploadRecord, UploadStatus, WriteLocation,
};
use depot_core::hashing::is_content_hash;
use depot_core::validation::{normalize_content_type, validate_filename};
use depot_core::{Config, ContentHasher, DepotError, DepotResult};
use depot_db::{CanonicalResolution, UploadRepository};
use depot_storage::keys::{healthy_key, is_quarantine_key, quarantine_key};
use depot_storage::{Storage, StorageError};
use futures::StreamExt;
use uuid::Uuid;
use validator::Validate;

use crate::remote::with_timeout;

/// Longest `duplicate_of` chain followed before falling back to a canonical lookup
const MAX_DUPLICATE_HOPS: usize = 8;

/// Settings for [`UploadLifecycle`]
#[derive(Clone, Debug)]
pub struct UploadLifecycleConfig {
    pub max_artifact_size_bytes: u64,
    pub allowed_content_types: Vec<String>,
    pub write_location_ttl: Duration,
    pub remote_call_timeout: Duration,
    pub job_kind: String,
}

impl UploadLifecycleConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_artifact_size_bytes: config.max_artifact_size_bytes,
            allowed_content_types: config.allowed_content_types.clone(),
            write_location_ttl: config.write_location_ttl(),
            remote_call_timeout: config.remote_call_timeout(),
            job_kind: config.job_kind.clone(),
        }
    }
}

/// Upload admission, completion and deletion
#[derive(Clone)]
pub struct UploadLifecycle {
    uploads: Arc<dyn UploadRepository>,
    storage: Arc<dyn Storage>,
    config: UploadLifecycleConfig,
}

impl UploadLifecycle {
    pub fn new(
        uploads: Arc<dyn UploadRepository>,
        storage: Arc<dyn Storage>,
        config: UploadLifecycleConfig,
    ) -> Self {
        Self {
            uploads,
            storage,
            config,
        }
    }

    /// Create a `pending` record and a time-boxed write target in quarantine.
    #[tracing::instrument(skip(self, request), fields(owner_id = %request.owner_id))]
    pub async fn issue_write_location(
        &self,
        request: IssueWriteLocationRequest,
    ) -> DepotResult<WriteLocation> {
        request
            .validate()
            .map_err(|e| DepotError::Validation(e.to_string()))?;
        validate_filename(&request.filename)?;
        let content_type =
            normalize_content_type(&request.content_type, &self.config.allowed_content_types)?;

        let upload_id = Uuid::new_v4();
        let storage_key = quarantine_key(request.owner_id, upload_id, &request.filename);
        let ttl = chrono::Duration::from_std(self.config.write_location_ttl)
            .map_err(|e| DepotError::Validation(format!("Invalid write location TTL: {}", e)))?;
        let expires_at = Utc::now() + ttl;

        // Signing first means a store failure leaves no orphaned record behind
        let write_target = with_timeout(
            self.config.remote_call_timeout,
            "storage.write_target",
            self.storage
                .write_target(&storage_key, &content_type, self.config.write_location_ttl),
        )
        .await?;

        let record = UploadRecord::new_pending(
            upload_id,
            request.owner_id,
            self.storage.bucket().to_string(),
            storage_key.clone(),
            request.filename,
            content_type,
            expires_at,
        );
        self.uploads.create_pending(&record).await?;

        tracing::info!(
            upload_id = %upload_id,
            storage_key = %storage_key,
            expires_at = %expires_at,
            "Write location issued"
        );

        Ok(WriteLocation {
            upload_id,
            write_target,
            storage_key,
            expires_at,
        })
    }

    /// Finish an upload the client has written to quarantine.
    ///
    /// Either deduplicates it against the live canonical record for the same
    /// `(owner, content hash)`, or promotes it into the healthy namespace as the new
    /// canonical record. Both outcomes create the first processing job atomically
    /// with the status change.
    #[tracing::instrument(skip(self))]
    pub async fn complete_upload(
        &self,
        upload_id: Uuid,
        owner_id: Uuid,
    ) -> DepotResult<CompleteUploadResponse> {
        let start = Instant::now();
        let record = self.owned(upload_id, owner_id).await?;

        if !record.is_pending() {
            return Err(DepotError::FatalState(format!(
                "Upload {} was already completed (status: {})",
                upload_id, record.status
            )));
        }

        let quarantine = record.storage_key.clone();
        let probed = match self.remote(self.storage.content_length(&quarantine), "storage.head").await
        {
            Ok(size) => size,
            Err(DepotError::NotFound(_)) => {
                return Err(DepotError::NotReady(format!(
                    "Upload {} has not been written yet",
                    upload_id
                )))
            }
            Err(e) => return Err(e),
        };

        if probed > self.config.max_artifact_size_bytes {
            return Err(self.fail_oversized(&record, probed).await);
        }

        let (content_hash, size) = self.hash_object(&quarantine).await?;
        if size > self.config.max_artifact_size_bytes {
            return Err(self.fail_oversized(&record, size).await);
        }

        let resolution = self
            .uploads
            .resolve_canonical(upload_id, &content_hash, size as i64, &self.config.job_kind)
            .await?;

        let response = match resolution {
            CanonicalResolution::Deduplicated {
                record,
                canonical,
                event,
            } => {
                if canonical.status == UploadStatus::Uploaded {
                    self.discard_quarantine(&quarantine).await;
                } else {
                    // Only copy of the bytes until the canonical record is promoted
                    tracing::debug!(
                        upload_id = %upload_id,
                        canonical = %canonical.upload_id,
                        "Keeping quarantined object of duplicate"
                    );
                }
                tracing::info!(
                    upload_id = %upload_id,
                    duplicate_of = %canonical.upload_id,
                    job_id = %event.job_id,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "Upload deduplicated"
                );
                CompleteUploadResponse {
                    upload_id,
                    status: record.status,
                    deduplicated: true,
                    duplicate_of: record.duplicate_of,
                    job_id: Some(event.job_id),
                }
            }
            CanonicalResolution::Canonical { superseded, .. } => {
                if let Some(previous) = superseded {
                    tracing::info!(
                        upload_id = %upload_id,
                        superseded = %previous,
                        "Replacing canonical record"
                    );
                }

                let target = healthy_target(owner_id, &content_hash)?;
                self.copy_verified(&quarantine, &target, &content_hash, size)
                    .await?;

                let (record, event) = self
                    .uploads
                    .promote(upload_id, &target, &self.config.job_kind)
                    .await?;
                self.discard_quarantine(&quarantine).await;
                self.release_duplicates(&record).await;

                tracing::info!(
                    upload_id = %upload_id,
                    storage_key = %record.storage_key,
                    size_bytes = size,
                    job_id = %event.job_id,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "Upload promoted"
                );
                CompleteUploadResponse {
                    upload_id,
                    status: record.status,
                    deduplicated: false,
                    duplicate_of: None,
                    job_id: Some(event.job_id),
                }
            }
        };

        Ok(response)
    }

    /// Mark an `uploaded` or `deduplicated` record deleted by its owner.
    ///
    /// Stored bytes are kept; other records may still resolve to them.
    #[tracing::instrument(skip(self))]
    pub async fn delete_upload(&self, upload_id: Uuid, owner_id: Uuid) -> DepotResult<UploadRecord> {
        let record = self.owned(upload_id, owner_id).await?;

        if !record.status.is_user_deletable() {
            return Err(DepotError::FatalState(format!(
                "Upload {} cannot be deleted from status {}",
                upload_id, record.status
            )));
        }

        let deleted = self
            .uploads
            .mark_deleted_by_user(upload_id, owner_id)
            .await?
            .ok_or_else(|| {
                DepotError::FatalState(format!(
                    "Upload {} changed status during deletion",
                    upload_id
                ))
            })?;

        tracing::info!(upload_id = %upload_id, "Upload deleted by user");
        Ok(deleted)
    }

    /// Owner-scoped read of an upload record.
    pub async fn get_upload(&self, upload_id: Uuid, owner_id: Uuid) -> DepotResult<UploadRecord> {
        self.owned(upload_id, owner_id).await
    }

    /// Find the live record whose stored object holds this upload's bytes.
    #[tracing::instrument(skip(self))]
    pub async fn resolve_payload(
        &self,
        upload_id: Uuid,
        owner_id: Uuid,
    ) -> DepotResult<UploadRecord> {
        let record = self.owned(upload_id, owner_id).await?;

        match record.status {
            UploadStatus::Uploaded => return Ok(record),
            UploadStatus::Deduplicated => {}
            other => {
                return Err(DepotError::NotFound(format!(
                    "Upload {} has no payload (status: {})",
                    upload_id, other
                )))
            }
        }

        let mut next = record.duplicate_of;
        let mut orphaned_by = None;
        for _ in 0..MAX_DUPLICATE_HOPS {
            let Some(target_id) = next else { break };
            let Some(target) = self.uploads.get(target_id).await? else {
                break;
            };
            if target.content_hash != record.content_hash {
                break;
            }
            match target.status {
                UploadStatus::Uploaded => return Ok(target),
                UploadStatus::Deduplicated => next = target.duplicate_of,
                UploadStatus::Failed | UploadStatus::Rejected if target.is_canonical => {
                    orphaned_by = Some(target);
                    break;
                }
                _ => break,
            }
        }

        // The canonical ended without bytes and an earlier hand-off did not finish
        if let Some(previous) = orphaned_by {
            if let Some(adopted) = self.hand_off_duplicates(&previous).await? {
                return Ok(adopted);
            }
        }

        // The link target was superseded or deleted; whoever holds the hash now wins
        if let Some(hash) = record.content_hash.as_deref() {
            if let Some(canonical) = self.uploads.find_canonical(owner_id, hash).await? {
                if canonical.status == UploadStatus::Uploaded {
                    return Ok(canonical);
                }
            }
        }

        Err(DepotError::NotFound(format!(
            "No live payload for upload {}",
            upload_id
        )))
    }

    /// System rejection of a pending upload, e.g. by a content scanner.
    #[tracing::instrument(skip(self))]
    pub async fn reject_upload(&self, upload_id: Uuid) -> DepotResult<UploadRecord> {
        let Some(record) = self.uploads.mark_rejected(upload_id).await? else {
            return match self.uploads.get(upload_id).await? {
                Some(existing) => Err(DepotError::FatalState(format!(
                    "Upload {} cannot be rejected from status {}",
                    upload_id, existing.status
                ))),
                None => Err(DepotError::NotFound(format!("Upload {} not found", upload_id))),
            };
        };

        self.discard_quarantine(&record.storage_key).await;
        self.hand_off_logged(&record).await;
        tracing::info!(upload_id = %upload_id, "Upload rejected");
        Ok(record)
    }

    /// Fail a `pending` upload whose write window was abandoned and remove its
    /// quarantined object. `Ok(None)` if it left `pending` in the meantime.
    #[tracing::instrument(skip(self))]
    pub async fn expire_upload(&self, upload_id: Uuid) -> DepotResult<Option<UploadRecord>> {
        let Some(failed) = self.uploads.mark_failed(upload_id).await? else {
            return Ok(None);
        };

        self.discard_quarantine(&failed.storage_key).await;
        self.hand_off_logged(&failed).await;
        Ok(Some(failed))
    }

    async fn owned(&self, upload_id: Uuid, owner_id: Uuid) -> DepotResult<UploadRecord> {
        self.uploads
            .get_for_owner(upload_id, owner_id)
            .await?
            .ok_or_else(|| DepotError::NotFound(format!("Upload {} not found", upload_id)))
    }

    async fn remote<T, F>(&self, call: F, operation: &'static str) -> DepotResult<T>
    where
        F: std::future::Future<Output = Result<T, StorageError>>,
    {
        with_timeout(self.config.remote_call_timeout, operation, call).await
    }

    /// Stream an object through SHA-256, stopping early once it exceeds the size cap.
    async fn hash_object(&self, storage_key: &str) -> DepotResult<(String, u64)> {
        let limit = self.config.max_artifact_size_bytes;
        let storage = self.storage.clone();
        let hashing = async move {
            let mut stream = storage.download_stream(storage_key).await?;
            let mut hasher = ContentHasher::new();
            while let Some(chunk) = stream.next().await {
                hasher.update(&chunk?);
                if hasher.bytes_seen() > limit {
                    break;
                }
            }
            Ok::<_, StorageError>(hasher.finalize())
        };

        match self.remote(hashing, "storage.hash").await {
            Err(DepotError::NotFound(_)) => Err(DepotError::TransientIo(format!(
                "Object {} disappeared while hashing",
                storage_key
            ))),
            other => other,
        }
    }

    /// Copy into the healthy namespace and check the destination matches what was hashed.
    async fn copy_verified(
        &self,
        from: &str,
        to: &str,
        content_hash: &str,
        size: u64,
    ) -> DepotResult<()> {
        self.remote(self.storage.copy(from, to), "storage.copy")
            .await?;

        let copied_size = self
            .remote(self.storage.content_length(to), "storage.head")
            .await?;
        let (copied_hash, _) = self.hash_object(to).await?;

        if copied_size != size || copied_hash != content_hash {
            tracing::warn!(
                storage_key = %to,
                expected_size = size,
                copied_size,
                "Healthy copy does not match quarantined bytes"
            );
            if let Err(e) = self.remote(self.storage.delete(to), "storage.delete").await {
                tracing::warn!(storage_key = %to, error = %e, "Failed to remove mismatched copy");
            }
            return Err(DepotError::TransientIo(format!(
                "Copy to {} did not match the quarantined object",
                to
            )));
        }

        Ok(())
    }

    /// Delete the quarantined object and fail the record. Returns the error to surface.
    async fn fail_oversized(&self, record: &UploadRecord, size: u64) -> DepotError {
        if let Err(e) = self
            .remote(self.storage.delete(&record.storage_key), "storage.delete")
            .await
        {
            return e;
        }

        match self.uploads.mark_failed(record.upload_id).await {
            Ok(Some(failed)) => {
                self.hand_off_logged(&failed).await;
                tracing::info!(
                    upload_id = %record.upload_id,
                    size_bytes = size,
                    max_bytes = self.config.max_artifact_size_bytes,
                    "Oversized upload rejected"
                );
                DepotError::Validation(format!(
                    "Artifact is {} bytes, maximum is {} bytes",
                    size, self.config.max_artifact_size_bytes
                ))
            }
            Ok(None) => DepotError::FatalState(format!(
                "Upload {} left pending while failing oversized artifact",
                record.upload_id
            )),
            Err(e) => e,
        }
    }

    /// Promote one duplicate of a canonical record that ended without bytes.
    ///
    /// Duplicates of a `pending` canonical keep their quarantined object, so the
    /// oldest one still holding it is copied into the healthy namespace and takes
    /// over the canonical flag. Returns the new canonical record.
    async fn hand_off_duplicates(
        &self,
        previous: &UploadRecord,
    ) -> DepotResult<Option<UploadRecord>> {
        if !previous.is_canonical {
            return Ok(None);
        }
        let Some(content_hash) = previous.content_hash.as_deref() else {
            return Ok(None);
        };
        let target = healthy_target(previous.owner_id, content_hash)?;

        for candidate in self.uploads.list_duplicates(previous.upload_id).await? {
            let Some(size) = candidate.size_bytes.and_then(|s| u64::try_from(s).ok()) else {
                continue;
            };
            if !is_quarantine_key(&candidate.storage_key)
                || !self
                    .remote(self.storage.exists(&candidate.storage_key), "storage.exists")
                    .await?
            {
                continue;
            }

            if let Err(e) = self
                .copy_verified(&candidate.storage_key, &target, content_hash, size)
                .await
            {
                tracing::warn!(
                    upload_id = %candidate.upload_id,
                    error = %e,
                    "Failed to copy duplicate into healthy namespace"
                );
                continue;
            }

            let Some(adopted) = self
                .uploads
                .adopt_duplicate(previous.upload_id, candidate.upload_id, &target)
                .await?
            else {
                // Another hand-off or a new completion got there first
                return Ok(None);
            };

            self.discard_quarantine(&candidate.storage_key).await;
            self.release_duplicates(&adopted).await;
            tracing::info!(
                upload_id = %adopted.upload_id,
                previous = %previous.upload_id,
                storage_key = %adopted.storage_key,
                "Duplicate took over canonical bytes"
            );
            return Ok(Some(adopted));
        }

        tracing::warn!(
            upload_id = %previous.upload_id,
            "No duplicate holds the bytes of a canonical upload that ended"
        );
        Ok(None)
    }

    async fn hand_off_logged(&self, previous: &UploadRecord) {
        if let Err(e) = self.hand_off_duplicates(previous).await {
            tracing::warn!(
                upload_id = %previous.upload_id,
                error = %e,
                "Failed to hand off canonical bytes to a duplicate"
            );
        }
    }

    /// Remove the quarantined objects kept by duplicates of a now promoted record.
    async fn release_duplicates(&self, canonical: &UploadRecord) {
        let duplicates = match self.uploads.list_duplicates(canonical.upload_id).await {
            Ok(duplicates) => duplicates,
            Err(e) => {
                tracing::warn!(upload_id = %canonical.upload_id, error = %e, "Failed to list duplicates");
                return;
            }
        };

        // Duplicates of a claim given up on a retry hold other bytes
        for duplicate in duplicates.iter().filter(|d| {
            d.content_hash == canonical.content_hash && is_quarantine_key(&d.storage_key)
        }) {
            self.discard_quarantine(&duplicate.storage_key).await;
        }
    }

    /// Best-effort removal of a quarantined object. The stale-upload sweep never
    /// sees terminal records, so a failure here only leaks the object.
    async fn discard_quarantine(&self, storage_key: &str) {
        if let Err(e) = self
            .remote(self.storage.delete(storage_key), "storage.delete")
            .await
        {
            tracing::warn!(
                storage_key = %storage_key,
                error = %e,
                "Failed to delete quarantined object"
            );
        }
    }
}

/// Healthy key for a content hash, refusing anything that is not a hex SHA-256.
fn healthy_target(owner_id: Uuid, content_hash: &str) -> DepotResult<String> {
    if !is_content_hash(content_hash) {
        return Err(DepotError::FatalState(format!(
            "Malformed content hash '{}'",
            content_hash
        )));
    }
    Ok(healthy_key(owner_id, content_hash))
}

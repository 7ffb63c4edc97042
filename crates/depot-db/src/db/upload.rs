use async_trait::async_trait;
use chrono::{DateTime, Utc};
use depot_core::models::{OutboxEvent, UploadRecord, UploadStatus};
use depot_core::{DepotError, DepotResult};
use sqlx::{PgConnection, PgPool, Postgres};
use uuid::Uuid;

use crate::db::traits::{CanonicalResolution, UploadRepository};
use crate::db::transaction::{acquire_content_lock, insert_outbox_event, UPLOAD_COLUMNS};

/// Repository for upload records
#[derive(Clone)]
pub struct PgUploadRepository {
    pool: PgPool,
}

impl PgUploadRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_for_update(
        conn: &mut PgConnection,
        upload_id: Uuid,
    ) -> DepotResult<Option<UploadRecord>> {
        let record = sqlx::query_as::<Postgres, UploadRecord>(&format!(
            "SELECT {} FROM upload_records WHERE upload_id = $1 FOR UPDATE",
            UPLOAD_COLUMNS
        ))
        .bind(upload_id)
        .fetch_optional(&mut *conn)
        .await?;
        Ok(record)
    }

    /// Mark a pending record canonical for `content_hash`.
    async fn claim(
        conn: &mut PgConnection,
        upload_id: Uuid,
        content_hash: &str,
        size_bytes: i64,
    ) -> DepotResult<UploadRecord> {
        let record = sqlx::query_as::<Postgres, UploadRecord>(&format!(
            r#"
            UPDATE upload_records
            SET is_canonical = TRUE, content_hash = $2, size_bytes = $3, updated_at = NOW()
            WHERE upload_id = $1 AND status = 'pending'
            RETURNING {}
            "#,
            UPLOAD_COLUMNS
        ))
        .bind(upload_id)
        .bind(content_hash)
        .bind(size_bytes)
        .fetch_optional(&mut *conn)
        .await?;

        record.ok_or_else(|| {
            DepotError::FatalState(format!("Upload {} left pending during resolution", upload_id))
        })
    }

    /// Guarded status change shared by the simple terminal transitions
    async fn transition_from_pending(
        &self,
        upload_id: Uuid,
        status: UploadStatus,
    ) -> DepotResult<Option<UploadRecord>> {
        let record = sqlx::query_as::<Postgres, UploadRecord>(&format!(
            r#"
            UPDATE upload_records
            SET status = $2, updated_at = NOW()
            WHERE upload_id = $1 AND status = 'pending'
            RETURNING {}
            "#,
            UPLOAD_COLUMNS
        ))
        .bind(upload_id)
        .bind(status.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }
}

#[async_trait]
impl UploadRepository for PgUploadRepository {
    #[tracing::instrument(skip(self, record), fields(upload_id = %record.upload_id))]
    async fn create_pending(&self, record: &UploadRecord) -> DepotResult<()> {
        if record.status != UploadStatus::Pending {
            return Err(DepotError::FatalState(format!(
                "Upload {} must be created pending, got {}",
                record.upload_id, record.status
            )));
        }

        sqlx::query(
            r#"
            INSERT INTO upload_records (
                upload_id, owner_id, storage_key, bucket, original_filename,
                declared_content_type, status, write_window_expiry, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, 'pending', $7, $8, $9)
            "#,
        )
        .bind(record.upload_id)
        .bind(record.owner_id)
        .bind(&record.storage_key)
        .bind(&record.bucket)
        .bind(&record.original_filename)
        .bind(&record.declared_content_type)
        .bind(record.write_window_expiry)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, upload_id: Uuid) -> DepotResult<Option<UploadRecord>> {
        let record = sqlx::query_as::<Postgres, UploadRecord>(&format!(
            "SELECT {} FROM upload_records WHERE upload_id = $1",
            UPLOAD_COLUMNS
        ))
        .bind(upload_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn get_for_owner(
        &self,
        upload_id: Uuid,
        owner_id: Uuid,
    ) -> DepotResult<Option<UploadRecord>> {
        let record = sqlx::query_as::<Postgres, UploadRecord>(&format!(
            "SELECT {} FROM upload_records WHERE upload_id = $1 AND owner_id = $2",
            UPLOAD_COLUMNS
        ))
        .bind(upload_id)
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn find_canonical(
        &self,
        owner_id: Uuid,
        content_hash: &str,
    ) -> DepotResult<Option<UploadRecord>> {
        let record = sqlx::query_as::<Postgres, UploadRecord>(&format!(
            r#"
            SELECT {} FROM upload_records
            WHERE owner_id = $1 AND content_hash = $2 AND is_canonical
            "#,
            UPLOAD_COLUMNS
        ))
        .bind(owner_id)
        .bind(content_hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    #[tracing::instrument(skip(self, job_kind))]
    async fn resolve_canonical(
        &self,
        upload_id: Uuid,
        content_hash: &str,
        size_bytes: i64,
        job_kind: &str,
    ) -> DepotResult<CanonicalResolution> {
        let mut tx = self.pool.begin().await?;

        let record = Self::fetch_for_update(&mut tx, upload_id)
            .await?
            .ok_or_else(|| DepotError::NotFound(format!("Upload {} not found", upload_id)))?;

        if record.status != UploadStatus::Pending {
            return Err(DepotError::FatalState(format!(
                "Upload {} is {}, not pending",
                upload_id, record.status
            )));
        }

        acquire_content_lock(&mut tx, record.owner_id, content_hash).await?;

        // A retry that measured different bytes gives up its earlier claim
        if record.is_canonical && record.content_hash.as_deref() != Some(content_hash) {
            sqlx::query(
                "UPDATE upload_records SET is_canonical = FALSE, updated_at = NOW() WHERE upload_id = $1",
            )
            .bind(upload_id)
            .execute(&mut *tx)
            .await?;
        }

        let current = sqlx::query_as::<Postgres, UploadRecord>(&format!(
            r#"
            SELECT {} FROM upload_records
            WHERE owner_id = $1 AND content_hash = $2 AND is_canonical
            FOR UPDATE
            "#,
            UPLOAD_COLUMNS
        ))
        .bind(record.owner_id)
        .bind(content_hash)
        .fetch_optional(&mut *tx)
        .await?;

        let resolution = match current {
            Some(canonical) if canonical.upload_id == upload_id => {
                let record = Self::claim(&mut tx, upload_id, content_hash, size_bytes).await?;
                CanonicalResolution::Canonical {
                    record,
                    superseded: None,
                }
            }
            Some(canonical) if canonical.status.is_blocking() => {
                let record = sqlx::query_as::<Postgres, UploadRecord>(&format!(
                    r#"
                    UPDATE upload_records
                    SET status = 'deduplicated', duplicate_of = $2, content_hash = $3,
                        size_bytes = $4, is_canonical = FALSE, updated_at = NOW()
                    WHERE upload_id = $1 AND status = 'pending'
                    RETURNING {}
                    "#,
                    UPLOAD_COLUMNS
                ))
                .bind(upload_id)
                .bind(canonical.upload_id)
                .bind(content_hash)
                .bind(size_bytes)
                .fetch_one(&mut *tx)
                .await?;

                let event =
                    OutboxEvent::artifact_processing(job_kind, &record, canonical.upload_id);
                insert_outbox_event(&mut tx, &event).await?;

                CanonicalResolution::Deduplicated {
                    record,
                    canonical,
                    event,
                }
            }
            Some(canonical) => {
                sqlx::query(
                    r#"
                    UPDATE upload_records
                    SET is_canonical = FALSE, updated_at = NOW()
                    WHERE upload_id = $1 AND is_canonical
                    "#,
                )
                .bind(canonical.upload_id)
                .execute(&mut *tx)
                .await?;

                let record = Self::claim(&mut tx, upload_id, content_hash, size_bytes).await?;
                CanonicalResolution::Canonical {
                    record,
                    superseded: Some(canonical.upload_id),
                }
            }
            None => {
                let record = Self::claim(&mut tx, upload_id, content_hash, size_bytes).await?;
                CanonicalResolution::Canonical {
                    record,
                    superseded: None,
                }
            }
        };

        tx.commit().await?;

        Ok(resolution)
    }

    #[tracing::instrument(skip(self, job_kind))]
    async fn promote(
        &self,
        upload_id: Uuid,
        healthy_key: &str,
        job_kind: &str,
    ) -> DepotResult<(UploadRecord, OutboxEvent)> {
        let mut tx = self.pool.begin().await?;

        let record = sqlx::query_as::<Postgres, UploadRecord>(&format!(
            r#"
            UPDATE upload_records
            SET status = 'uploaded', storage_key = $2, updated_at = NOW()
            WHERE upload_id = $1 AND status = 'pending' AND is_canonical
            RETURNING {}
            "#,
            UPLOAD_COLUMNS
        ))
        .bind(upload_id)
        .bind(healthy_key)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(record) = record else {
            tx.rollback().await?;
            return match self.get(upload_id).await? {
                Some(existing) => Err(DepotError::FatalState(format!(
                    "Upload {} cannot be promoted from {} (canonical: {})",
                    upload_id, existing.status, existing.is_canonical
                ))),
                None => Err(DepotError::NotFound(format!("Upload {} not found", upload_id))),
            };
        };

        let event = OutboxEvent::artifact_processing(job_kind, &record, record.upload_id);
        insert_outbox_event(&mut tx, &event).await?;

        tx.commit().await?;

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
        let record = sqlx::query_as::<Postgres, UploadRecord>(&format!(
            r#"
            UPDATE upload_records
            SET status = 'deleted-by-user', updated_at = NOW()
            WHERE upload_id = $1 AND owner_id = $2 AND status IN ('uploaded', 'deduplicated')
            RETURNING {}
            "#,
            UPLOAD_COLUMNS
        ))
        .bind(upload_id)
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn list_duplicates(&self, canonical_id: Uuid) -> DepotResult<Vec<UploadRecord>> {
        let records = sqlx::query_as::<Postgres, UploadRecord>(&format!(
            r#"
            SELECT {} FROM upload_records
            WHERE duplicate_of = $1 AND status = 'deduplicated'
            ORDER BY created_at ASC
            "#,
            UPLOAD_COLUMNS
        ))
        .bind(canonical_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    #[tracing::instrument(skip(self))]
    async fn adopt_duplicate(
        &self,
        previous_id: Uuid,
        successor_id: Uuid,
        healthy_key: &str,
    ) -> DepotResult<Option<UploadRecord>> {
        let Some(previous) = self.get(previous_id).await? else {
            return Ok(None);
        };
        let Some(content_hash) = previous.content_hash.as_deref() else {
            return Ok(None);
        };

        let mut tx = self.pool.begin().await?;
        acquire_content_lock(&mut tx, previous.owner_id, content_hash).await?;

        let released = sqlx::query(
            r#"
            UPDATE upload_records
            SET is_canonical = FALSE, updated_at = NOW()
            WHERE upload_id = $1 AND is_canonical AND status IN ('failed', 'rejected')
            "#,
        )
        .bind(previous_id)
        .execute(&mut *tx)
        .await?;

        if released.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        let successor = sqlx::query_as::<Postgres, UploadRecord>(&format!(
            r#"
            UPDATE upload_records
            SET status = 'uploaded', is_canonical = TRUE, duplicate_of = NULL,
                storage_key = $3, updated_at = NOW()
            WHERE upload_id = $1 AND status = 'deduplicated' AND duplicate_of = $2
            RETURNING {}
            "#,
            UPLOAD_COLUMNS
        ))
        .bind(successor_id)
        .bind(previous_id)
        .bind(healthy_key)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(successor) = successor else {
            tx.rollback().await?;
            return Ok(None);
        };

        sqlx::query(
            r#"
            UPDATE upload_records
            SET duplicate_of = $2, updated_at = NOW()
            WHERE duplicate_of = $1 AND status = 'deduplicated'
            "#,
        )
        .bind(previous_id)
        .bind(successor_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Some(successor))
    }

    async fn list_stale_pending(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> DepotResult<Vec<UploadRecord>> {
        let records = sqlx::query_as::<Postgres, UploadRecord>(&format!(
            r#"
            SELECT {} FROM upload_records
            WHERE status = 'pending' AND created_at <= $1
            ORDER BY created_at ASC
            LIMIT $2
            "#,
            UPLOAD_COLUMNS
        ))
        .bind(older_than)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }
}

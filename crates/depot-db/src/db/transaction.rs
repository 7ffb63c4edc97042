//! Transaction helpers shared by the Postgres repositories
//!
//! Functions here take a `&mut PgConnection` so they can run inside a caller's
//! transaction (`&mut *tx`).

use depot_core::models::OutboxEvent;
use sqlx::PgConnection;
use uuid::Uuid;

/// Column list matching `OutboxEvent`'s `FromRow` impl
pub(crate) const OUTBOX_COLUMNS: &str =
    "event_id, job_id, seq, kind, status, upload_id, owner_id, payload, error, result, created_at";

/// Column list matching `UploadRecord`'s `FromRow` impl
pub(crate) const UPLOAD_COLUMNS: &str = "upload_id, owner_id, storage_key, bucket, original_filename, \
     declared_content_type, status, content_hash, is_canonical, duplicate_of, size_bytes, \
     write_window_expiry, created_at, updated_at";

/// Key serialising canonical resolution for one owner's content hash
pub fn content_lock_key(owner_id: Uuid, content_hash: &str) -> String {
    format!("depot:canonical:{}:{}", owner_id, content_hash)
}

/// Take a transaction-scoped advisory lock on `(owner, content hash)`.
///
/// Released automatically on commit or rollback.
pub async fn acquire_content_lock(
    conn: &mut PgConnection,
    owner_id: Uuid,
    content_hash: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
        .bind(content_lock_key(owner_id, content_hash))
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Insert an outbox event as-is (used for the first event of a job).
pub async fn insert_outbox_event(
    conn: &mut PgConnection,
    event: &OutboxEvent,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO outbox_events (
            event_id, job_id, seq, kind, status, upload_id, owner_id,
            payload, error, result, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        "#,
    )
    .bind(event.event_id)
    .bind(event.job_id)
    .bind(event.seq)
    .bind(&event.kind)
    .bind(event.status.as_str())
    .bind(event.upload_id)
    .bind(event.owner_id)
    .bind(&event.payload)
    .bind(&event.error)
    .bind(&event.result)
    .bind(event.created_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_lock_key_is_owner_scoped() {
        let hash = "ab".repeat(32);
        let a = content_lock_key(Uuid::new_v4(), &hash);
        let b = content_lock_key(Uuid::new_v4(), &hash);
        assert_ne!(a, b);
        assert!(a.ends_with(&hash));
    }
}

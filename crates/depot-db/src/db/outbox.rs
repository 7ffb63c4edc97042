use async_trait::async_trait;
use chrono::{DateTime, Utc};
use depot_core::models::{OutboxEvent, OutboxStatus};
use depot_core::{DepotError, DepotResult};
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

use crate::db::traits::{OutboxRepository, OutboxTransition};
use crate::db::transaction::OUTBOX_COLUMNS;

/// Repository for the append-only outbox log
///
/// Rows are only ever inserted. A job's current event is the row with the highest
/// `seq`; the `(job_id, seq)` unique constraint turns concurrent appends after the
/// same event into a single winner.
#[derive(Clone)]
pub struct PgOutboxRepository {
    pool: PgPool,
}

impl PgOutboxRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OutboxRepository for PgOutboxRepository {
    async fn latest(&self, job_id: Uuid) -> DepotResult<Option<OutboxEvent>> {
        let event = sqlx::query_as::<Postgres, OutboxEvent>(&format!(
            r#"
            SELECT {} FROM outbox_events
            WHERE job_id = $1
            ORDER BY seq DESC
            LIMIT 1
            "#,
            OUTBOX_COLUMNS
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(event)
    }

    async fn history(&self, job_id: Uuid) -> DepotResult<Vec<OutboxEvent>> {
        let events = sqlx::query_as::<Postgres, OutboxEvent>(&format!(
            "SELECT {} FROM outbox_events WHERE job_id = $1 ORDER BY seq ASC",
            OUTBOX_COLUMNS
        ))
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(events)
    }

    #[tracing::instrument(skip(self, transition), fields(to = %transition.status))]
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

        // Reads the current event and inserts its successor in one statement. Two
        // writers that both saw `cur` collide on (job_id, seq + 1); the loser inserts
        // nothing.
        let event = sqlx::query_as::<Postgres, OutboxEvent>(&format!(
            r#"
            INSERT INTO outbox_events (
                event_id, job_id, seq, kind, status, upload_id, owner_id,
                payload, error, result, created_at
            )
            SELECT $1, cur.job_id, cur.seq + 1, cur.kind, $4, cur.upload_id, cur.owner_id,
                   cur.payload, $5, $6, NOW()
            FROM outbox_events cur
            WHERE cur.job_id = $2
              AND cur.status = $3
              AND NOT EXISTS (
                  SELECT 1 FROM outbox_events newer
                  WHERE newer.job_id = cur.job_id AND newer.seq > cur.seq
              )
            ON CONFLICT (job_id, seq) DO NOTHING
            RETURNING {}
            "#,
            OUTBOX_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(job_id)
        .bind(from.as_str())
        .bind(transition.status.as_str())
        .bind(&transition.error)
        .bind(&transition.result)
        .fetch_optional(&self.pool)
        .await?;

        Ok(event)
    }

    async fn list_current_in_status(
        &self,
        status: OutboxStatus,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> DepotResult<Vec<OutboxEvent>> {
        let events = sqlx::query_as::<Postgres, OutboxEvent>(&format!(
            r#"
            SELECT {} FROM outbox_events cur
            WHERE cur.status = $1
              AND cur.created_at <= $2
              AND NOT EXISTS (
                  SELECT 1 FROM outbox_events newer
                  WHERE newer.job_id = cur.job_id AND newer.seq > cur.seq
              )
            ORDER BY cur.created_at ASC
            LIMIT $3
            "#,
            OUTBOX_COLUMNS
        ))
        .bind(status.as_str())
        .bind(older_than)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(events)
    }

    async fn jobs_for_upload(&self, upload_id: Uuid) -> DepotResult<Vec<OutboxEvent>> {
        let events = sqlx::query_as::<Postgres, OutboxEvent>(&format!(
            r#"
            SELECT {} FROM outbox_events cur
            WHERE cur.upload_id = $1
              AND NOT EXISTS (
                  SELECT 1 FROM outbox_events newer
                  WHERE newer.job_id = cur.job_id AND newer.seq > cur.seq
              )
            ORDER BY cur.created_at ASC
            "#,
            OUTBOX_COLUMNS
        ))
        .bind(upload_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(events)
    }
}

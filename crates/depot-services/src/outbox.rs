//! Outbox producer
//!
//! Drives a job through `pending -> sending -> processing -> terminal` by appending
//! events. Every append is conditioned on the job's current status, so concurrent
//! dispatchers and callbacks cannot interleave illegally.

use std::sync::Arc;
use std::time::{Duration, Instant};

use depot_core::models::{JobOutcome, OutboxEvent, OutboxStatus, RecordOutcomeRequest};
use depot_core::{Config, DepotError, DepotResult};
use depot_db::{OutboxRepository, OutboxTransition};
use depot_queue::{idempotency_key, JobQueue, QueuedJob};
use uuid::Uuid;

use crate::remote::with_timeout;

/// Dispatches outbox jobs to the job queue and records their outcomes
#[derive(Clone)]
pub struct OutboxProducer {
    outbox: Arc<dyn OutboxRepository>,
    queue: Arc<dyn JobQueue>,
    remote_call_timeout: Duration,
}

impl OutboxProducer {
    pub fn new(
        outbox: Arc<dyn OutboxRepository>,
        queue: Arc<dyn JobQueue>,
        remote_call_timeout: Duration,
    ) -> Self {
        Self {
            outbox,
            queue,
            remote_call_timeout,
        }
    }

    pub fn from_config(
        outbox: Arc<dyn OutboxRepository>,
        queue: Arc<dyn JobQueue>,
        config: &Config,
    ) -> Self {
        Self::new(outbox, queue, config.remote_call_timeout())
    }

    pub fn outbox(&self) -> &Arc<dyn OutboxRepository> {
        &self.outbox
    }

    /// Claim a pending job and hand it to the queue.
    ///
    /// Only the caller whose `sending` append wins may enqueue. If the enqueue
    /// fails the job stays in `sending` until the stuck-dispatch sweep re-arms it.
    #[tracing::instrument(skip(self))]
    pub async fn dispatch(&self, job_id: Uuid) -> DepotResult<OutboxEvent> {
        let start = Instant::now();

        let claimed = self
            .outbox
            .append_transition(
                job_id,
                OutboxStatus::Pending,
                OutboxTransition::to(OutboxStatus::Sending),
            )
            .await?;

        let Some(claimed) = claimed else {
            return match self.outbox.latest(job_id).await? {
                Some(_) => Err(DepotError::AlreadyProcessing { job_id }),
                None => Err(DepotError::NotFound(format!("Job {} not found", job_id))),
            };
        };

        let job = QueuedJob::from(&claimed);
        let key = idempotency_key(job_id);
        if let Err(e) = with_timeout(
            self.remote_call_timeout,
            "queue.enqueue",
            self.queue.enqueue(&job, &key),
        )
        .await
        {
            tracing::warn!(
                job_id = %job_id,
                queue = self.queue.name(),
                error = %e,
                "Enqueue failed, job parked in sending"
            );
            return Err(e);
        }

        let processing = self
            .outbox
            .append_transition(
                job_id,
                OutboxStatus::Sending,
                OutboxTransition::to(OutboxStatus::Processing),
            )
            .await?;

        // Re-armed while the enqueue was in flight; the redelivery reuses the key
        let Some(processing) = processing else {
            tracing::warn!(job_id = %job_id, "Job left sending before enqueue was acknowledged");
            return Err(DepotError::AlreadyProcessing { job_id });
        };

        tracing::info!(
            job_id = %job_id,
            upload_id = %processing.upload_id,
            queue = self.queue.name(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Job dispatched"
        );

        Ok(processing)
    }

    /// Append the single terminal event for a job in `processing`.
    #[tracing::instrument(skip(self, outcome), fields(outcome = %outcome.status()))]
    pub async fn record_outcome(&self, job_id: Uuid, outcome: JobOutcome) -> DepotResult<OutboxEvent> {
        let current = self
            .outbox
            .latest(job_id)
            .await?
            .ok_or_else(|| DepotError::NotFound(format!("Job {} not found", job_id)))?;

        if current.status != OutboxStatus::Processing {
            return Err(DepotError::FatalState(format!(
                "Job {} is {}, not processing",
                job_id, current.status
            )));
        }

        let transition = match outcome {
            JobOutcome::Completed { result } => {
                OutboxTransition::to(OutboxStatus::Completed).with_result(result)
            }
            JobOutcome::Failed { error } => {
                OutboxTransition::to(OutboxStatus::Failed).with_error(error)
            }
            JobOutcome::NotACv => OutboxTransition::to(OutboxStatus::NotACv),
        };

        let event = self
            .outbox
            .append_transition(job_id, OutboxStatus::Processing, transition)
            .await?
            .ok_or_else(|| {
                DepotError::FatalState(format!("Job {} already has a terminal outcome", job_id))
            })?;

        tracing::info!(job_id = %job_id, status = %event.status, "Job outcome recorded");
        Ok(event)
    }

    /// Worker callback entry point.
    pub async fn record_outcome_request(
        &self,
        request: RecordOutcomeRequest,
    ) -> DepotResult<OutboxEvent> {
        let job_id = request.job_id;
        let outcome = JobOutcome::try_from(request)?;
        self.record_outcome(job_id, outcome).await
    }

    /// Ordered event history of a job.
    pub async fn job_history(&self, job_id: Uuid) -> DepotResult<Vec<OutboxEvent>> {
        let events = self.outbox.history(job_id).await?;
        if events.is_empty() {
            return Err(DepotError::NotFound(format!("Job {} not found", job_id)));
        }
        Ok(events)
    }

    /// Current event of every job created for an upload.
    pub async fn jobs_for_upload(&self, upload_id: Uuid) -> DepotResult<Vec<OutboxEvent>> {
        self.outbox.jobs_for_upload(upload_id).await
    }
}

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use depot_core::models::OutboxStatus;
use depot_core::{DepotError, DepotResult, SweepSettings};
use depot_db::OutboxTransition;
use depot_services::OutboxProducer;
use uuid::Uuid;

use crate::guard::SingleFlight;
use crate::sweeps::{Sweep, SweepReport};

/// Dispatches the oldest `pending` jobs
pub struct OutboxSweep {
    producer: OutboxProducer,
    settings: SweepSettings,
    flight: SingleFlight,
}

impl OutboxSweep {
    pub fn new(producer: OutboxProducer, settings: SweepSettings) -> Self {
        Self {
            producer,
            settings,
            flight: SingleFlight::new(),
        }
    }

    /// Record a dispatch that cannot succeed by retrying.
    async fn fail_job(&self, job_id: Uuid, error: &DepotError) -> DepotResult<bool> {
        let outbox = self.producer.outbox();
        let Some(current) = outbox.latest(job_id).await? else {
            return Ok(false);
        };
        if !matches!(current.status, OutboxStatus::Pending | OutboxStatus::Sending) {
            return Ok(false);
        }

        let failed = outbox
            .append_transition(
                job_id,
                current.status,
                OutboxTransition::to(OutboxStatus::Failed).with_error(error.to_string()),
            )
            .await?;
        Ok(failed.is_some())
    }
}

#[async_trait]
impl Sweep for OutboxSweep {
    fn name(&self) -> &'static str {
        "outbox"
    }

    fn interval(&self) -> Duration {
        self.settings.interval()
    }

    #[tracing::instrument(skip(self), fields(sweep = "outbox"))]
    async fn run_once(&self) -> DepotResult<Option<SweepReport>> {
        let Some(_flight) = self.flight.try_acquire() else {
            tracing::debug!("Outbox sweep already running, skipping tick");
            return Ok(None);
        };
        let started = Instant::now();
        let mut report = SweepReport::new(self.name());

        let jobs = self
            .producer
            .outbox()
            .list_current_in_status(OutboxStatus::Pending, Utc::now(), self.settings.batch_size)
            .await?;
        report.scanned = jobs.len();

        for job in jobs {
            match self.producer.dispatch(job.job_id).await {
                Ok(_) => report.progressed += 1,
                Err(DepotError::AlreadyProcessing { .. }) => report.skipped += 1,
                Err(e) if e.is_transient() => {
                    // Parked in sending; the stuck-dispatch sweep re-arms it
                    tracing::warn!(job_id = %job.job_id, error = %e, "Dispatch deferred");
                    report.skipped += 1;
                }
                Err(e) => {
                    tracing::error!(job_id = %job.job_id, error = %e, "Dispatch failed permanently");
                    match self.fail_job(job.job_id, &e).await {
                        Ok(true) => report.failed += 1,
                        Ok(false) => report.skipped += 1,
                        Err(append_err) => {
                            tracing::error!(
                                job_id = %job.job_id,
                                error = %append_err,
                                "Failed to record dispatch failure"
                            );
                            report.failed += 1;
                        }
                    }
                }
            }
        }

        report.log(started);
        Ok(Some(report))
    }
}

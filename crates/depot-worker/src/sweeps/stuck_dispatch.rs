use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use depot_core::models::OutboxStatus;
use depot_core::{DepotResult, SweepSettings};
use depot_db::{OutboxRepository, OutboxTransition};

use crate::guard::SingleFlight;
use crate::sweeps::{cutoff, Sweep, SweepReport};

/// Re-arms jobs whose enqueue never got acknowledged
pub struct StuckDispatchSweep {
    outbox: Arc<dyn OutboxRepository>,
    settings: SweepSettings,
    stuck_after: Duration,
    flight: SingleFlight,
}

impl StuckDispatchSweep {
    pub fn new(
        outbox: Arc<dyn OutboxRepository>,
        settings: SweepSettings,
        stuck_after: Duration,
    ) -> Self {
        Self {
            outbox,
            settings,
            stuck_after,
            flight: SingleFlight::new(),
        }
    }
}

#[async_trait]
impl Sweep for StuckDispatchSweep {
    fn name(&self) -> &'static str {
        "stuck-dispatch"
    }

    fn interval(&self) -> Duration {
        self.settings.interval()
    }

    #[tracing::instrument(skip(self), fields(sweep = "stuck-dispatch"))]
    async fn run_once(&self) -> DepotResult<Option<SweepReport>> {
        let Some(_flight) = self.flight.try_acquire() else {
            tracing::debug!("Stuck-dispatch sweep already running, skipping tick");
            return Ok(None);
        };
        let started = Instant::now();
        let mut report = SweepReport::new(self.name());

        let stuck = self
            .outbox
            .list_current_in_status(
                OutboxStatus::Sending,
                cutoff(self.stuck_after)?,
                self.settings.batch_size,
            )
            .await?;
        report.scanned = stuck.len();

        for event in stuck {
            let rearmed = self
                .outbox
                .append_transition(
                    event.job_id,
                    OutboxStatus::Sending,
                    OutboxTransition::to(OutboxStatus::Pending),
                )
                .await;

            match rearmed {
                Ok(Some(_)) => {
                    tracing::info!(
                        job_id = %event.job_id,
                        stuck_since = %event.created_at,
                        "Stuck job re-armed"
                    );
                    report.progressed += 1;
                }
                Ok(None) => report.skipped += 1,
                Err(e) => {
                    tracing::error!(job_id = %event.job_id, error = %e, "Failed to re-arm stuck job");
                    report.failed += 1;
                }
            }
        }

        report.log(started);
        Ok(Some(report))
    }
}

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use depot_core::{DepotResult, SweepSettings};
use depot_db::UploadRepository;
use depot_services::UploadLifecycle;

use crate::guard::SingleFlight;
use crate::sweeps::{cutoff, Sweep, SweepReport};

/// Fails uploads left `pending` past the stale-upload timeout
pub struct StaleUploadSweep {
    uploads: Arc<dyn UploadRepository>,
    lifecycle: UploadLifecycle,
    settings: SweepSettings,
    stale_after: Duration,
    flight: SingleFlight,
}

impl StaleUploadSweep {
    pub fn new(
        uploads: Arc<dyn UploadRepository>,
        lifecycle: UploadLifecycle,
        settings: SweepSettings,
        stale_after: Duration,
    ) -> Self {
        Self {
            uploads,
            lifecycle,
            settings,
            stale_after,
            flight: SingleFlight::new(),
        }
    }
}

#[async_trait]
impl Sweep for StaleUploadSweep {
    fn name(&self) -> &'static str {
        "stale-upload"
    }

    fn interval(&self) -> Duration {
        self.settings.interval()
    }

    #[tracing::instrument(skip(self), fields(sweep = "stale-upload"))]
    async fn run_once(&self) -> DepotResult<Option<SweepReport>> {
        let Some(_flight) = self.flight.try_acquire() else {
            tracing::debug!("Stale-upload sweep already running, skipping tick");
            return Ok(None);
        };
        let started = Instant::now();
        let mut report = SweepReport::new(self.name());

        let stale = self
            .uploads
            .list_stale_pending(cutoff(self.stale_after)?, self.settings.batch_size)
            .await?;
        report.scanned = stale.len();

        for record in stale {
            match self.lifecycle.expire_upload(record.upload_id).await {
                Ok(Some(failed)) => {
                    report.progressed += 1;
                    tracing::info!(
                        upload_id = %failed.upload_id,
                        created_at = %failed.created_at,
                        "Stale upload failed"
                    );
                }
                // Completed or rejected since it was listed
                Ok(None) => report.skipped += 1,
                Err(e) => {
                    tracing::error!(upload_id = %record.upload_id, error = %e, "Failed to fail stale upload");
                    report.failed += 1;
                }
            }
        }

        report.log(started);
        Ok(Some(report))
    }
}

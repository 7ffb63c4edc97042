//! Reconciliation sweeps
//!
//! Each sweep scans a bounded, oldest-first batch and pushes every item one step
//! forward through the same guarded operations the request path uses. A sweep that
//! is still running when its next tick fires is skipped, not queued.

mod outbox;
mod stale_upload;
mod stuck_dispatch;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use depot_core::{DepotError, DepotResult};
use serde::Serialize;

pub use outbox::OutboxSweep;
pub use stale_upload::StaleUploadSweep;
pub use stuck_dispatch::StuckDispatchSweep;

/// A periodic reconciler
#[async_trait]
pub trait Sweep: Send + Sync {
    fn name(&self) -> &'static str;

    /// Time between runs
    fn interval(&self) -> Duration;

    /// Run one batch. `Ok(None)` when a previous run still holds the single-flight flag.
    async fn run_once(&self) -> DepotResult<Option<SweepReport>>;
}

/// Counters for one sweep run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub sweep: &'static str,
    pub scanned: usize,
    /// Items moved to their next state
    pub progressed: usize,
    /// Items another actor got to first, or left parked for a later run
    pub skipped: usize,
    pub failed: usize,
}

impl SweepReport {
    pub fn new(sweep: &'static str) -> Self {
        Self {
            sweep,
            scanned: 0,
            progressed: 0,
            skipped: 0,
            failed: 0,
        }
    }

    pub fn log(&self, started: std::time::Instant) {
        tracing::info!(
            sweep = self.sweep,
            scanned = self.scanned,
            progressed = self.progressed,
            skipped = self.skipped,
            failed = self.failed,
            duration_ms = started.elapsed().as_secs_f64() * 1000.0,
            "Sweep completed"
        );
    }
}

/// Instant before which an item counts as stale.
pub(crate) fn cutoff(age: Duration) -> DepotResult<DateTime<Utc>> {
    let age = chrono::Duration::from_std(age)
        .map_err(|e| DepotError::Validation(format!("Invalid sweep timeout: {}", e)))?;
    Ok(Utc::now() - age)
}

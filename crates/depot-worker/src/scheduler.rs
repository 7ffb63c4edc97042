//! Reconciler scheduler
//!
//! Owns one timer loop per sweep. Start it once storage and the database are
//! reachable; [`ReconcilerScheduler::shutdown`] stops every loop and waits for an
//! in-flight batch to finish.

use std::sync::Arc;

use anyhow::{Context, Result};
use depot_core::{Config, DepotError};
use depot_db::UploadRepository;
use depot_services::{OutboxProducer, UploadLifecycle};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::sweeps::{OutboxSweep, StaleUploadSweep, StuckDispatchSweep, Sweep};

struct RunningSweep {
    name: &'static str,
    shutdown_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

pub struct ReconcilerScheduler {
    sweeps: Vec<Arc<dyn Sweep>>,
    running: Vec<RunningSweep>,
}

impl ReconcilerScheduler {
    pub fn new(sweeps: Vec<Arc<dyn Sweep>>) -> Self {
        Self {
            sweeps,
            running: Vec::new(),
        }
    }

    /// Build the outbox, stale-upload and stuck-dispatch sweeps from configuration.
    pub fn from_config(
        config: &Config,
        uploads: Arc<dyn UploadRepository>,
        lifecycle: UploadLifecycle,
        producer: OutboxProducer,
    ) -> Self {
        let stuck_outbox = producer.outbox().clone();
        let sweeps: Vec<Arc<dyn Sweep>> = vec![
            Arc::new(OutboxSweep::new(producer, config.outbox_sweep)),
            Arc::new(StaleUploadSweep::new(
                uploads,
                lifecycle,
                config.stale_upload_sweep,
                config.stale_upload_timeout(),
            )),
            Arc::new(StuckDispatchSweep::new(
                stuck_outbox,
                config.stuck_dispatch_sweep,
                config.stuck_dispatch_timeout(),
            )),
        ];
        Self::new(sweeps)
    }

    pub fn sweeps(&self) -> &[Arc<dyn Sweep>] {
        &self.sweeps
    }

    /// Look up a sweep by name for one-shot runs.
    pub fn sweep(&self, name: &str) -> Option<Arc<dyn Sweep>> {
        self.sweeps.iter().find(|s| s.name() == name).cloned()
    }

    pub fn is_running(&self) -> bool {
        !self.running.is_empty()
    }

    /// Spawn a timer loop for every sweep. Calling it again while running is a no-op.
    pub fn start(&mut self) {
        if self.is_running() {
            tracing::warn!("Reconcilers already started");
            return;
        }

        for sweep in &self.sweeps {
            let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
            let handle = tokio::spawn(Self::run_loop(sweep.clone(), shutdown_rx));
            self.running.push(RunningSweep {
                name: sweep.name(),
                shutdown_tx,
                handle,
            });
        }

        tracing::info!(sweeps = self.running.len(), "Reconcilers started");
    }

    /// Stop every loop and wait for them to exit.
    pub async fn shutdown(&mut self) -> Result<()> {
        tracing::info!("Stopping reconcilers");

        for running in &self.running {
            let _ = running.shutdown_tx.send(()).await;
        }

        for running in self.running.drain(..) {
            running
                .handle
                .await
                .with_context(|| format!("Reconciler {} panicked", running.name))?;
        }

        tracing::info!("Reconcilers stopped");
        Ok(())
    }

    async fn run_loop(sweep: Arc<dyn Sweep>, mut shutdown_rx: mpsc::Receiver<()>) {
        let mut ticker = interval(sweep.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            sweep = sweep.name(),
            interval_secs = sweep.interval().as_secs(),
            "Reconciler loop started"
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = ticker.tick() => {
                    match sweep.run_once().await {
                        Ok(_) => {}
                        Err(e @ DepotError::FatalState(_)) => {
                            tracing::error!(sweep = sweep.name(), error = %e, "Sweep hit an invariant violation");
                        }
                        Err(e) => {
                            tracing::warn!(sweep = sweep.name(), error = %e, "Sweep run failed");
                        }
                    }
                }
            }
        }

        tracing::info!(sweep = sweep.name(), "Reconciler loop stopped");
    }
}

impl Drop for ReconcilerScheduler {
    fn drop(&mut self) {
        for running in &self.running {
            running.handle.abort();
        }
    }
}

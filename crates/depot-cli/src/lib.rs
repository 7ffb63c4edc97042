//! Wiring for the `depot` binary

use std::num::NonZeroUsize;
use std::sync::Arc;

use anyhow::{Context, Result};
use bytes::Bytes;
use depot_core::models::{ArtifactProcessingPayload, UploadRecord};
use depot_core::{Config, DepotError, ErrorMetadata, LogLevel};
use depot_db::{create_repositories, Repositories};
use depot_queue::{create_job_queue, DeliveredJob};
use depot_services::{OutboxProducer, UploadLifecycle, UploadLifecycleConfig};
use depot_storage::{create_storage, Storage};
use depot_worker::ReconcilerScheduler;
use lru::LruCache;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

/// Initialize tracing for the binary. `RUST_LOG` overrides the default filter.
pub fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "depot=info".into());
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().compact().with_target(false))
            .init();
    }
}

/// Services assembled from configuration
pub struct App {
    pub config: Config,
    pub repos: Repositories,
    pub storage: Arc<dyn Storage>,
    pub lifecycle: UploadLifecycle,
    pub producer: OutboxProducer,
    /// Consumer end of the in-process queue, when that backend is selected
    pub channel_jobs: Option<mpsc::Receiver<DeliveredJob>>,
}

impl App {
    pub async fn from_config(config: Config) -> Result<Self> {
        config.validate().context("Invalid configuration")?;

        let repos = create_repositories(&config).await?;
        let storage = create_storage(&config)
            .await
            .context("Failed to initialize artifact storage")?;
        let (queue, channel_jobs) = create_job_queue(&config)
            .await
            .context("Failed to initialize job queue")?;

        tracing::info!(
            environment = %config.environment,
            repository = ?config.repository_backend,
            storage = %storage.backend_type(),
            queue = queue.name(),
            "Depot initialized"
        );

        let lifecycle = UploadLifecycle::new(
            repos.uploads.clone(),
            storage.clone(),
            UploadLifecycleConfig::from_config(&config),
        );
        let producer = OutboxProducer::from_config(repos.outbox.clone(), queue, &config);

        Ok(Self {
            config,
            repos,
            storage,
            lifecycle,
            producer,
            channel_jobs,
        })
    }

    /// Store `data` at a pending upload's quarantine key, as a client would through
    /// its write target.
    pub async fn write_quarantined(
        &self,
        upload_id: Uuid,
        owner_id: Uuid,
        data: Bytes,
    ) -> Result<UploadRecord, DepotError> {
        let record = self.lifecycle.get_upload(upload_id, owner_id).await?;
        if !record.is_pending() {
            return Err(DepotError::FatalState(format!(
                "Upload {} is {}, its write window is closed",
                upload_id, record.status
            )));
        }

        self.storage
            .put(&record.storage_key, data, &record.declared_content_type)
            .await?;
        tracing::info!(upload_id = %upload_id, storage_key = %record.storage_key, "Quarantined object written");
        Ok(record)
    }

    pub fn scheduler(&self) -> ReconcilerScheduler {
        ReconcilerScheduler::from_config(
            &self.config,
            self.repos.uploads.clone(),
            self.lifecycle.clone(),
            self.producer.clone(),
        )
    }
}

/// Idempotency keys remembered by the channel consumer
pub const DELIVERY_DEDUP_WINDOW: usize = 10_000;

/// Remembers the most recent idempotency keys and flags redeliveries.
pub struct DeliveryDedup {
    seen: LruCache<String, ()>,
}

impl DeliveryDedup {
    pub fn new(capacity: usize) -> Self {
        Self {
            seen: LruCache::new(NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN)),
        }
    }

    /// True the first time a key is seen within the window.
    pub fn first_delivery(&mut self, idempotency_key: &str) -> bool {
        self.seen.put(idempotency_key.to_string(), ()).is_none()
    }
}

/// Drain the in-process queue, logging each job once per idempotency key.
///
/// Stands in for the downstream worker when the channel backend is selected.
pub fn spawn_channel_consumer(mut jobs: mpsc::Receiver<DeliveredJob>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut dedup = DeliveryDedup::new(DELIVERY_DEDUP_WINDOW);
        while let Some(delivered) = jobs.recv().await {
            if !dedup.first_delivery(&delivered.idempotency_key) {
                tracing::info!(job_id = %delivered.job.job_id, "Duplicate delivery dropped");
                continue;
            }

            let payload =
                serde_json::from_value::<ArtifactProcessingPayload>(delivered.job.payload.clone());
            match payload {
                Ok(payload) => tracing::info!(
                    job_id = %delivered.job.job_id,
                    upload_id = %delivered.job.upload_id,
                    canonical_upload_id = %payload.canonical_upload_id,
                    kind = %delivered.job.kind,
                    "Job received"
                ),
                Err(e) => tracing::warn!(
                    job_id = %delivered.job.job_id,
                    kind = %delivered.job.kind,
                    error = %e,
                    "Job received with unreadable payload"
                ),
            }
        }
        tracing::debug!("Job channel closed");
    })
}

pub fn print_json(value: &impl Serialize) -> Result<()> {
    let out = serde_json::to_string_pretty(value).context("Serialize output")?;
    println!("{}", out);
    Ok(())
}

#[derive(Debug, Serialize, PartialEq)]
pub struct ErrorBody {
    pub error: String,
    pub code: &'static str,
    pub recoverable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_action: Option<&'static str>,
}

/// Log a depot error at its own level and build the body printed to stderr.
pub fn report_error(err: &DepotError) -> ErrorBody {
    match err.log_level() {
        LogLevel::Debug => tracing::debug!(error_type = err.error_type(), error = %err, "Command failed"),
        LogLevel::Warn => tracing::warn!(error_type = err.error_type(), error = %err, "Command failed"),
        LogLevel::Error => {
            tracing::error!(error_type = err.error_type(), error = %err.detailed_message(), "Command failed")
        }
    }

    ErrorBody {
        error: err.client_message(),
        code: err.error_code(),
        recoverable: err.is_recoverable(),
        suggested_action: err.suggested_action(),
    }
}

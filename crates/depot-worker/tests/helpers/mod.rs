#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use depot_core::models::{IssueWriteLocationRequest, ARTIFACT_PROCESSING_KIND};
use depot_core::SweepSettings;
use depot_db::{MemoryStore, Repositories};
use depot_queue::{ChannelJobQueue, DeliveredJob, JobQueue, QueueError, QueueResult, QueuedJob};
use depot_services::{OutboxProducer, UploadLifecycle, UploadLifecycleConfig};
use depot_storage::{LocalStorage, Storage};
use tempfile::TempDir;
use tokio::sync::mpsc;
use uuid::Uuid;

pub const SETTINGS: SweepSettings = SweepSettings {
    interval_secs: 1,
    batch_size: 50,
};

pub struct TestHarness {
    pub store: MemoryStore,
    pub repos: Repositories,
    pub storage: Arc<LocalStorage>,
    pub lifecycle: UploadLifecycle,
    pub producer: OutboxProducer,
    _dir: TempDir,
}

pub async fn setup_with_queue(queue: Arc<dyn JobQueue>) -> TestHarness {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let storage = Arc::new(
        LocalStorage::new(dir.path().join("objects"), "http://localhost/files".to_string())
            .await
            .expect("Failed to create local storage"),
    );

    let store = MemoryStore::new();
    let repos = Repositories::memory(&store);
    let lifecycle = UploadLifecycle::new(
        repos.uploads.clone(),
        storage.clone() as Arc<dyn Storage>,
        UploadLifecycleConfig {
            max_artifact_size_bytes: 1024,
            allowed_content_types: Vec::new(),
            write_location_ttl: Duration::from_secs(900),
            remote_call_timeout: Duration::from_secs(5),
            job_kind: ARTIFACT_PROCESSING_KIND.to_string(),
        },
    );
    let producer = OutboxProducer::new(repos.outbox.clone(), queue, Duration::from_millis(200));

    TestHarness {
        store,
        repos,
        storage,
        lifecycle,
        producer,
        _dir: dir,
    }
}

pub async fn setup() -> (TestHarness, mpsc::Receiver<DeliveredJob>) {
    let (queue, receiver) = ChannelJobQueue::new(64);
    (setup_with_queue(Arc::new(queue)).await, receiver)
}

impl TestHarness {
    pub async fn write_upload(&self, owner_id: Uuid, data: &[u8]) -> Uuid {
        let location = self
            .lifecycle
            .issue_write_location(IssueWriteLocationRequest {
                owner_id,
                filename: "cv.pdf".to_string(),
                content_type: "application/pdf".to_string(),
            })
            .await
            .expect("Failed to issue write location");
        self.storage
            .put(&location.storage_key, Bytes::copy_from_slice(data), "application/pdf")
            .await
            .expect("Failed to write quarantined object");
        location.upload_id
    }

    /// Write and complete an upload, returning its first job id.
    pub async fn pending_job(&self, data: &[u8]) -> Uuid {
        let owner_id = Uuid::new_v4();
        let upload_id = self.write_upload(owner_id, data).await;
        self.lifecycle
            .complete_upload(upload_id, owner_id)
            .await
            .expect("Failed to complete upload")
            .job_id
            .expect("completion creates a job")
    }
}

/// Fails the first `failures` enqueues transiently, then forwards to a channel.
pub struct FlakyQueue {
    remaining_failures: AtomicUsize,
    inner: ChannelJobQueue,
}

impl FlakyQueue {
    pub fn new(failures: usize) -> (Self, mpsc::Receiver<DeliveredJob>) {
        let (inner, receiver) = ChannelJobQueue::new(64);
        (
            Self {
                remaining_failures: AtomicUsize::new(failures),
                inner,
            },
            receiver,
        )
    }
}

#[async_trait]
impl JobQueue for FlakyQueue {
    fn name(&self) -> &'static str {
        "flaky"
    }

    async fn enqueue(&self, job: &QueuedJob, idempotency_key: &str) -> QueueResult<()> {
        let failing = self
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(QueueError::Transient("throttled".to_string()));
        }
        self.inner.enqueue(job, idempotency_key).await
    }
}

/// Refuses every message outright
pub struct RejectingQueue;

#[async_trait]
impl JobQueue for RejectingQueue {
    fn name(&self) -> &'static str {
        "rejecting"
    }

    async fn enqueue(&self, _job: &QueuedJob, _idempotency_key: &str) -> QueueResult<()> {
        Err(QueueError::Rejected("message body too large".to_string()))
    }
}

/// Never answers within the producer's timeout
pub struct StalledQueue;

#[async_trait]
impl JobQueue for StalledQueue {
    fn name(&self) -> &'static str {
        "stalled"
    }

    async fn enqueue(&self, _job: &QueuedJob, _idempotency_key: &str) -> QueueResult<()> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(())
    }
}

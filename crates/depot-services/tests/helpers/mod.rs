//! Test harness: in-memory repositories, local storage in a temp dir and a channel queue.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use depot_core::models::{IssueWriteLocationRequest, ARTIFACT_PROCESSING_KIND};
use depot_core::ContentHasher;
use depot_db::{MemoryStore, Repositories};
use depot_queue::{ChannelJobQueue, DeliveredJob, JobQueue, QueueError, QueueResult, QueuedJob};
use depot_services::{OutboxProducer, UploadLifecycle, UploadLifecycleConfig};
use depot_storage::{LocalStorage, Storage};
use tempfile::TempDir;
use tokio::sync::mpsc;
use uuid::Uuid;

pub const MAX_TEST_ARTIFACT_BYTES: u64 = 1024;

/// Hex SHA-256 of an in-memory buffer
pub fn content_hash(data: &[u8]) -> String {
    let mut hasher = ContentHasher::new();
    hasher.update(data);
    hasher.finalize().0
}

pub struct TestHarness {
    pub store: MemoryStore,
    pub repos: Repositories,
    pub storage: Arc<LocalStorage>,
    pub lifecycle: UploadLifecycle,
    pub producer: OutboxProducer,
    pub jobs: Option<mpsc::Receiver<DeliveredJob>>,
    dir: TempDir,
}

pub fn lifecycle_config() -> UploadLifecycleConfig {
    UploadLifecycleConfig {
        max_artifact_size_bytes: MAX_TEST_ARTIFACT_BYTES,
        allowed_content_types: vec!["application/pdf".to_string(), "text/plain".to_string()],
        write_location_ttl: Duration::from_secs(900),
        remote_call_timeout: Duration::from_secs(5),
        job_kind: ARTIFACT_PROCESSING_KIND.to_string(),
    }
}

/// Harness wired to a channel queue whose receiver is kept in `jobs`.
pub async fn setup() -> TestHarness {
    let (queue, receiver) = ChannelJobQueue::new(64);
    let mut harness = setup_with_queue(Arc::new(queue)).await;
    harness.jobs = Some(receiver);
    harness
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
        lifecycle_config(),
    );
    let producer = OutboxProducer::new(repos.outbox.clone(), queue, Duration::from_millis(200));

    TestHarness {
        store,
        repos,
        storage,
        lifecycle,
        producer,
        jobs: None,
        dir,
    }
}

impl TestHarness {
    /// Issue a write location and write `data` to it the way a client would.
    pub async fn write_upload(&self, owner_id: Uuid, filename: &str, data: &[u8]) -> Uuid {
        let location = self
            .lifecycle
            .issue_write_location(IssueWriteLocationRequest {
                owner_id,
                filename: filename.to_string(),
                content_type: "application/pdf".to_string(),
            })
            .await
            .expect("Failed to issue write location");

        self.storage
            .put(
                &location.storage_key,
                Bytes::copy_from_slice(data),
                "application/pdf",
            )
            .await
            .expect("Failed to write quarantined object");

        location.upload_id
    }

    /// Write and complete an upload, returning the first job id.
    pub async fn completed_upload(&self, owner_id: Uuid, data: &[u8]) -> (Uuid, Uuid) {
        let upload_id = self.write_upload(owner_id, "cv.pdf", data).await;
        let response = self
            .lifecycle
            .complete_upload(upload_id, owner_id)
            .await
            .expect("Failed to complete upload");
        (upload_id, response.job_id.expect("completion creates a job"))
    }

    pub fn objects_root(&self) -> PathBuf {
        self.dir.path().join("objects")
    }

    /// Number of objects stored in the owner's healthy namespace.
    pub fn healthy_object_count(&self, owner_id: Uuid) -> usize {
        let dir = self.objects_root().join("artifacts").join(owner_id.to_string());
        match std::fs::read_dir(dir) {
            Ok(entries) => entries.count(),
            Err(_) => 0,
        }
    }
}

/// Queue that refuses every message as a transient failure
pub struct UnavailableQueue;

#[async_trait]
impl JobQueue for UnavailableQueue {
    fn name(&self) -> &'static str {
        "unavailable"
    }

    async fn enqueue(&self, _job: &QueuedJob, _idempotency_key: &str) -> QueueResult<()> {
        Err(QueueError::Transient("connection refused".to_string()))
    }
}

/// Queue that never answers within the producer's timeout
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

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::traits::{JobQueue, QueueError, QueueResult, QueuedJob};

/// A job as seen by the consumer end of a [`ChannelJobQueue`]
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveredJob {
    pub job: QueuedJob,
    pub idempotency_key: String,
}

/// In-process queue backed by a bounded tokio channel
#[derive(Clone)]
pub struct ChannelJobQueue {
    sender: mpsc::Sender<DeliveredJob>,
}

impl ChannelJobQueue {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<DeliveredJob>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl JobQueue for ChannelJobQueue {
    fn name(&self) -> &'static str {
        "channel"
    }

    async fn enqueue(&self, job: &QueuedJob, idempotency_key: &str) -> QueueResult<()> {
        self.sender
            .send(DeliveredJob {
                job: job.clone(),
                idempotency_key: idempotency_key.to_string(),
            })
            .await
            .map_err(|_| QueueError::Transient("job channel closed".to_string()))?;

        tracing::debug!(job_id = %job.job_id, "Job enqueued on channel");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::idempotency_key;
    use serde_json::json;
    use uuid::Uuid;

    fn job() -> QueuedJob {
        QueuedJob {
            job_id: Uuid::new_v4(),
            kind: "artifact-processing".to_string(),
            upload_id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            payload: json!({}),
        }
    }

    #[tokio::test]
    async fn test_enqueue_delivers_with_key() {
        let (queue, mut receiver) = ChannelJobQueue::new(4);
        let job = job();
        let key = idempotency_key(job.job_id);

        queue.enqueue(&job, &key).await.unwrap();

        let delivered = receiver.recv().await.unwrap();
        assert_eq!(delivered.job, job);
        assert_eq!(delivered.idempotency_key, key);
    }

    #[tokio::test]
    async fn test_closed_channel_is_transient() {
        let (queue, receiver) = ChannelJobQueue::new(1);
        drop(receiver);

        let result = queue.enqueue(&job(), "key").await;
        assert!(matches!(result, Err(QueueError::Transient(_))));
    }
}

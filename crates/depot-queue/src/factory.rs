use std::sync::Arc;

use depot_core::Config;
use tokio::sync::mpsc;

use crate::channel::{ChannelJobQueue, DeliveredJob};
#[cfg(feature = "queue-sqs")]
use crate::sqs::SqsJobQueue;
use crate::traits::{JobQueue, QueueError, QueueResult};
use crate::QueueBackend;

const CHANNEL_CAPACITY: usize = 1024;

/// Create a job queue based on configuration.
///
/// The channel backend also returns its receiving end; the caller owns the consumer.
pub async fn create_job_queue(
    config: &Config,
) -> QueueResult<(Arc<dyn JobQueue>, Option<mpsc::Receiver<DeliveredJob>>)> {
    match config.queue_backend {
        #[cfg(feature = "queue-sqs")]
        QueueBackend::Sqs => {
            let queue_url = config.sqs_queue_url.clone().ok_or_else(|| {
                QueueError::ConfigError("SQS_QUEUE_URL not configured".to_string())
            })?;
            let queue = SqsJobQueue::new(queue_url, config.s3_region.clone()).await?;
            Ok((Arc::new(queue), None))
        }

        #[cfg(not(feature = "queue-sqs"))]
        QueueBackend::Sqs => Err(QueueError::ConfigError(
            "SQS queue backend not available (queue-sqs feature not enabled)".to_string(),
        )),

        QueueBackend::Channel => {
            let (queue, receiver) = ChannelJobQueue::new(CHANNEL_CAPACITY);
            Ok((Arc::new(queue), Some(receiver)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_backend_returns_receiver() {
        let config = Config::from_lookup(|key| match key {
            "QUEUE_BACKEND" => Some("channel".to_string()),
            _ => None,
        })
        .unwrap();

        let (queue, receiver) = create_job_queue(&config).await.unwrap();
        assert_eq!(queue.name(), "channel");
        assert!(receiver.is_some());
    }
}

use async_trait::async_trait;
use aws_sdk_sqs::error::SdkError;
use aws_sdk_sqs::operation::send_message::SendMessageError;
use aws_sdk_sqs::Client;

use crate::traits::{JobQueue, QueueError, QueueResult, QueuedJob};

/// Amazon SQS queue implementation
///
/// FIFO queues (URL ending in `.fifo`) get the idempotency key as
/// `MessageDeduplicationId` and the owner as `MessageGroupId`. Standard queues carry
/// the key as a message attribute only.
#[derive(Clone)]
pub struct SqsJobQueue {
    client: Client,
    queue_url: String,
    fifo: bool,
}

impl SqsJobQueue {
    /// Create a new SqsJobQueue using the default AWS credential chain.
    pub async fn new(queue_url: String, region: Option<String>) -> QueueResult<Self> {
        if queue_url.trim().is_empty() {
            return Err(QueueError::ConfigError("SQS_QUEUE_URL is empty".to_string()));
        }

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(aws_config::Region::new(region));
        }
        let shared = loader.load().await;

        Ok(Self::from_client(Client::new(&shared), queue_url))
    }

    pub fn from_client(client: Client, queue_url: String) -> Self {
        let fifo = queue_url.ends_with(".fifo");
        Self {
            client,
            queue_url,
            fifo,
        }
    }

    fn classify(err: SdkError<SendMessageError>) -> QueueError {
        match err {
            SdkError::ServiceError(ctx) => {
                let service_err = ctx.err();
                if service_err.is_invalid_message_contents() || service_err.is_unsupported_operation()
                {
                    QueueError::Rejected(service_err.to_string())
                } else {
                    QueueError::Transient(service_err.to_string())
                }
            }
            other => QueueError::Transient(other.to_string()),
        }
    }
}

#[async_trait]
impl JobQueue for SqsJobQueue {
    fn name(&self) -> &'static str {
        "sqs"
    }

    async fn enqueue(&self, job: &QueuedJob, idempotency_key: &str) -> QueueResult<()> {
        let body = serde_json::to_string(job)?;
        let start = std::time::Instant::now();

        let attribute = aws_sdk_sqs::types::MessageAttributeValue::builder()
            .data_type("String")
            .string_value(idempotency_key)
            .build()
            .map_err(|e| QueueError::Rejected(e.to_string()))?;

        let mut request = self
            .client
            .send_message()
            .queue_url(&self.queue_url)
            .message_body(body)
            .message_attributes("idempotency_key", attribute);

        if self.fifo {
            request = request
                .message_group_id(job.owner_id.to_string())
                .message_deduplication_id(idempotency_key);
        }

        let output = request.send().await.map_err(|e| {
            let err = Self::classify(e);
            tracing::error!(
                error = %err,
                job_id = %job.job_id,
                duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                "SQS enqueue failed"
            );
            err
        })?;

        tracing::info!(
            job_id = %job.job_id,
            message_id = output.message_id().unwrap_or_default(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "SQS enqueue successful"
        );

        Ok(())
    }
}

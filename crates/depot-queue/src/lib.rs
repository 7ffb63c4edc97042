//! Depot Queue Library
//!
//! Job queue adapters. The producer only ever needs one operation from the queue:
//! enqueue a job under an idempotency key so the consumer can drop redeliveries.

pub mod channel;
pub mod factory;
#[cfg(feature = "queue-sqs")]
pub mod sqs;
pub mod traits;

pub use channel::{ChannelJobQueue, DeliveredJob};
pub use depot_core::QueueBackend;
pub use factory::create_job_queue;
#[cfg(feature = "queue-sqs")]
pub use sqs::SqsJobQueue;
pub use traits::{idempotency_key, JobQueue, QueueError, QueueResult, QueuedJob};

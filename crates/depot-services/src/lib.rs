//! Depot Services Layer
//!
//! Business services on top of the repositories and remote adapters:
//!
//! - [`UploadLifecycle`]: admission, hashing, canonical resolution and promotion of
//!   uploaded artifacts
//! - [`OutboxProducer`]: race-free dispatch of processing jobs and recording of
//!   their outcomes

pub mod outbox;
pub mod remote;
pub mod upload;

pub use depot_queue::{JobQueue, QueuedJob};
pub use depot_storage::{Storage, StorageBackend};
pub use outbox::OutboxProducer;
pub use upload::{UploadLifecycle, UploadLifecycleConfig};

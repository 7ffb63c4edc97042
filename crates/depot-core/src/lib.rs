//! Depot Core Library
//!
//! Domain models, the error taxonomy, configuration, validation and content hashing
//! shared by every depot crate.

pub mod backends;
pub mod config;
pub mod error;
pub mod hashing;
pub mod models;
pub mod validation;

// Re-export commonly used types
pub use backends::{QueueBackend, RepositoryBackend, StorageBackend};
pub use config::{Config, SweepSettings};
pub use error::{DepotError, DepotResult, ErrorMetadata, LogLevel};
pub use hashing::ContentHasher;
// Storage and queue error types live in depot-storage and depot-queue

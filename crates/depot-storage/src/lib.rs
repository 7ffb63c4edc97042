//! Depot Storage Library
//!
//! Artifact store adapters. Objects live in two namespaces of the same bucket:
//!
//! - **Quarantine**: `quarantine/{owner_id}/{upload_id}/{filename}`, written directly by
//!   clients through a time-boxed write target
//! - **Healthy**: `artifacts/{owner_id}/{content_hash}`, written only by promotion
//!
//! Keys must not contain `..` or a leading `/`. Key generation is centralized in the
//! `keys` module so all backends stay consistent.

pub mod factory;
pub mod keys;
#[cfg(feature = "storage-local")]
pub mod local;
#[cfg(feature = "storage-s3")]
pub mod s3;
pub mod traits;

// Re-export commonly used types
pub use depot_core::StorageBackend;
pub use factory::create_storage;
#[cfg(feature = "storage-local")]
pub use local::LocalStorage;
#[cfg(feature = "storage-s3")]
pub use s3::S3Storage;
pub use traits::{ByteStream, Storage, StorageError, StorageResult};

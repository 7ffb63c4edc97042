//! Storage abstraction trait
//!
//! This module defines the artifact store contract that all storage backends implement.

use crate::StorageBackend;
use async_trait::async_trait;
use bytes::Bytes;
use depot_core::DepotError;
use futures::Stream;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Storage backend error: {0}")]
    BackendError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Chunked object body
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, StorageError>> + Send>>;

impl From<StorageError> for DepotError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(key) => DepotError::NotFound(format!("Object {}", key)),
            StorageError::InvalidKey(msg) => DepotError::Validation(msg),
            other => DepotError::TransientIo(other.to_string()),
        }
    }
}

/// Artifact store contract
///
/// Backends expose put/head/get/copy/delete by key plus a time-boxed write target
/// that clients use to write into the quarantine namespace directly.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Bucket (or root) name recorded on upload records
    fn bucket(&self) -> &str;

    /// Get the storage backend type
    fn backend_type(&self) -> StorageBackend;

    /// Write `data` to `storage_key`, replacing any existing object.
    async fn put(&self, storage_key: &str, data: Bytes, content_type: &str) -> StorageResult<()>;

    /// Check if an object exists
    async fn exists(&self, storage_key: &str) -> StorageResult<bool>;

    /// Size in bytes of an object. `NotFound` when absent.
    async fn content_length(&self, storage_key: &str) -> StorageResult<u64>;

    /// Download an object as a stream of chunks.
    async fn download_stream(&self, storage_key: &str) -> StorageResult<ByteStream>;

    /// Server-side copy. `NotFound` when the source is absent.
    async fn copy(&self, from_key: &str, to_key: &str) -> StorageResult<()>;

    /// Delete an object. Deleting a missing object succeeds.
    async fn delete(&self, storage_key: &str) -> StorageResult<()>;

    /// URL a client can PUT the bytes to until `expires_in` elapses.
    async fn write_target(
        &self,
        storage_key: &str,
        content_type: &str,
        expires_in: Duration,
    ) -> StorageResult<String>;
}

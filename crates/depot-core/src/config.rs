//! Configuration module
//!
//! Settings are read from the environment (with `.env` support via dotenvy).
//! Every tunable has an explicit default; backend-specific settings are checked
//! by [`Config::validate`].

use std::env;
use std::time::Duration;

use crate::backends::{QueueBackend, RepositoryBackend, StorageBackend};
use crate::models::ARTIFACT_PROCESSING_KIND;

const MAX_CONNECTIONS: u32 = 10;
const CONNECTION_TIMEOUT_SECS: u64 = 30;
const MAX_ARTIFACT_SIZE_MB: u64 = 10;
const BYTES_PER_MB: u64 = 1024 * 1024;
const WRITE_LOCATION_TTL_SECS: u64 = 900;
const STALE_UPLOAD_TIMEOUT_SECS: u64 = 3600;
const STUCK_DISPATCH_TIMEOUT_SECS: u64 = 300;
const OUTBOX_SWEEP_INTERVAL_SECS: u64 = 10;
const OUTBOX_SWEEP_BATCH_SIZE: i64 = 50;
const STALE_UPLOAD_SWEEP_INTERVAL_SECS: u64 = 300;
const STALE_UPLOAD_SWEEP_BATCH_SIZE: i64 = 100;
const STUCK_DISPATCH_SWEEP_INTERVAL_SECS: u64 = 60;
const STUCK_DISPATCH_SWEEP_BATCH_SIZE: i64 = 100;
const REMOTE_CALL_TIMEOUT_SECS: u64 = 30;
const DEFAULT_ALLOWED_CONTENT_TYPES: &str = "application/pdf,application/msword,application/vnd.openxmlformats-officedocument.wordprocessingml.document,application/rtf,text/plain";

/// Interval and batch size of one reconciler
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SweepSettings {
    pub interval_secs: u64,
    pub batch_size: i64,
}

impl SweepSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Application configuration
#[derive(Clone, Debug)]
pub struct Config {
    pub environment: String,
    // Persistence
    pub repository_backend: RepositoryBackend,
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub db_timeout_seconds: u64,
    // Storage
    pub storage_backend: StorageBackend,
    pub s3_bucket: Option<String>,
    pub s3_region: Option<String>,
    pub s3_endpoint: Option<String>, // MinIO and other S3-compatible providers
    pub local_storage_path: Option<String>,
    pub local_storage_base_url: Option<String>,
    // Queue
    pub queue_backend: QueueBackend,
    pub sqs_queue_url: Option<String>,
    pub job_kind: String,
    // Upload admission
    pub max_artifact_size_bytes: u64,
    pub allowed_content_types: Vec<String>,
    pub write_location_ttl_secs: u64,
    // Reconcilers
    pub stale_upload_timeout_secs: u64,
    pub stuck_dispatch_timeout_secs: u64,
    pub outbox_sweep: SweepSettings,
    pub stale_upload_sweep: SweepSettings,
    pub stuck_dispatch_sweep: SweepSettings,
    pub remote_call_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, anyhow::Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let parsed_u64 = |key: &str, default: u64| -> u64 {
            lookup(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .unwrap_or(default)
        };
        let parsed_i64 = |key: &str, default: i64| -> i64 {
            lookup(key)
                .and_then(|v| v.trim().parse::<i64>().ok())
                .unwrap_or(default)
        };

        let repository_backend = match lookup("REPOSITORY_BACKEND") {
            Some(value) => value.parse()?,
            None => RepositoryBackend::Postgres,
        };
        let storage_backend = match lookup("STORAGE_BACKEND") {
            Some(value) => value.parse()?,
            None => StorageBackend::S3,
        };
        let queue_backend = match lookup("QUEUE_BACKEND") {
            Some(value) => value.parse()?,
            None => QueueBackend::Sqs,
        };

        let allowed_content_types = lookup("ALLOWED_CONTENT_TYPES")
            .unwrap_or_else(|| DEFAULT_ALLOWED_CONTENT_TYPES.to_string())
            .split(',')
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();

        let max_artifact_size_mb = parsed_u64("MAX_ARTIFACT_SIZE_MB", MAX_ARTIFACT_SIZE_MB);

        Ok(Config {
            environment: lookup("ENVIRONMENT")
                .or_else(|| lookup("APP_ENV"))
                .unwrap_or_else(|| "development".to_string()),
            repository_backend,
            database_url: lookup("DATABASE_URL"),
            db_max_connections: lookup("DB_MAX_CONNECTIONS")
                .and_then(|v| v.trim().parse::<u32>().ok())
                .unwrap_or(MAX_CONNECTIONS),
            db_timeout_seconds: parsed_u64("DB_TIMEOUT_SECONDS", CONNECTION_TIMEOUT_SECS),
            storage_backend,
            s3_bucket: lookup("S3_BUCKET"),
            s3_region: lookup("S3_REGION").or_else(|| lookup("AWS_REGION")),
            s3_endpoint: lookup("S3_ENDPOINT"),
            local_storage_path: lookup("LOCAL_STORAGE_PATH"),
            local_storage_base_url: lookup("LOCAL_STORAGE_BASE_URL"),
            queue_backend,
            sqs_queue_url: lookup("SQS_QUEUE_URL"),
            job_kind: lookup("JOB_KIND").unwrap_or_else(|| ARTIFACT_PROCESSING_KIND.to_string()),
            // Saturates so validate() can report an oversized setting
            max_artifact_size_bytes: max_artifact_size_mb
                .checked_mul(BYTES_PER_MB)
                .unwrap_or(u64::MAX),
            allowed_content_types,
            write_location_ttl_secs: parsed_u64("WRITE_LOCATION_TTL_SECS", WRITE_LOCATION_TTL_SECS),
            stale_upload_timeout_secs: parsed_u64(
                "STALE_UPLOAD_TIMEOUT_SECS",
                STALE_UPLOAD_TIMEOUT_SECS,
            ),
            stuck_dispatch_timeout_secs: parsed_u64(
                "STUCK_DISPATCH_TIMEOUT_SECS",
                STUCK_DISPATCH_TIMEOUT_SECS,
            ),
            outbox_sweep: SweepSettings {
                interval_secs: parsed_u64("OUTBOX_SWEEP_INTERVAL_SECS", OUTBOX_SWEEP_INTERVAL_SECS),
                batch_size: parsed_i64("OUTBOX_SWEEP_BATCH_SIZE", OUTBOX_SWEEP_BATCH_SIZE),
            },
            stale_upload_sweep: SweepSettings {
                interval_secs: parsed_u64(
                    "STALE_UPLOAD_SWEEP_INTERVAL_SECS",
                    STALE_UPLOAD_SWEEP_INTERVAL_SECS,
                ),
                batch_size: parsed_i64(
                    "STALE_UPLOAD_SWEEP_BATCH_SIZE",
                    STALE_UPLOAD_SWEEP_BATCH_SIZE,
                ),
            },
            stuck_dispatch_sweep: SweepSettings {
                interval_secs: parsed_u64(
                    "STUCK_DISPATCH_SWEEP_INTERVAL_SECS",
                    STUCK_DISPATCH_SWEEP_INTERVAL_SECS,
                ),
                batch_size: parsed_i64(
                    "STUCK_DISPATCH_SWEEP_BATCH_SIZE",
                    STUCK_DISPATCH_SWEEP_BATCH_SIZE,
                ),
            },
            remote_call_timeout_secs: parsed_u64(
                "REMOTE_CALL_TIMEOUT_SECS",
                REMOTE_CALL_TIMEOUT_SECS,
            ),
        })
    }

    /// Check if the application is running in production mode
    pub fn is_production(&self) -> bool {
        let env = self.environment.to_lowercase();
        env == "production" || env == "prod"
    }

    pub fn write_location_ttl(&self) -> Duration {
        Duration::from_secs(self.write_location_ttl_secs)
    }

    pub fn stale_upload_timeout(&self) -> Duration {
        Duration::from_secs(self.stale_upload_timeout_secs)
    }

    pub fn stuck_dispatch_timeout(&self) -> Duration {
        Duration::from_secs(self.stuck_dispatch_timeout_secs)
    }

    pub fn remote_call_timeout(&self) -> Duration {
        Duration::from_secs(self.remote_call_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.max_artifact_size_bytes == 0 {
            return Err(anyhow::anyhow!("MAX_ARTIFACT_SIZE_MB must be greater than 0"));
        }

        // Sizes are stored as BIGINT
        if self.max_artifact_size_bytes > i64::MAX as u64 {
            return Err(anyhow::anyhow!("MAX_ARTIFACT_SIZE_MB is too large"));
        }

        for (name, value) in [
            ("WRITE_LOCATION_TTL_SECS", self.write_location_ttl_secs),
            ("STALE_UPLOAD_TIMEOUT_SECS", self.stale_upload_timeout_secs),
            ("STUCK_DISPATCH_TIMEOUT_SECS", self.stuck_dispatch_timeout_secs),
            ("REMOTE_CALL_TIMEOUT_SECS", self.remote_call_timeout_secs),
            ("OUTBOX_SWEEP_INTERVAL_SECS", self.outbox_sweep.interval_secs),
            (
                "STALE_UPLOAD_SWEEP_INTERVAL_SECS",
                self.stale_upload_sweep.interval_secs,
            ),
            (
                "STUCK_DISPATCH_SWEEP_INTERVAL_SECS",
                self.stuck_dispatch_sweep.interval_secs,
            ),
        ] {
            if value == 0 {
                return Err(anyhow::anyhow!("{} must be greater than 0", name));
            }
        }

        for (name, value) in [
            ("OUTBOX_SWEEP_BATCH_SIZE", self.outbox_sweep.batch_size),
            (
                "STALE_UPLOAD_SWEEP_BATCH_SIZE",
                self.stale_upload_sweep.batch_size,
            ),
            (
                "STUCK_DISPATCH_SWEEP_BATCH_SIZE",
                self.stuck_dispatch_sweep.batch_size,
            ),
        ] {
            if value <= 0 {
                return Err(anyhow::anyhow!("{} must be greater than 0", name));
            }
        }

        if self.job_kind.trim().is_empty() {
            return Err(anyhow::anyhow!("JOB_KIND cannot be empty"));
        }

        if self.repository_backend == RepositoryBackend::Postgres {
            match self.database_url.as_deref() {
                Some(url) if url.starts_with("postgres://") || url.starts_with("postgresql://") => {}
                _ => {
                    return Err(anyhow::anyhow!(
                        "DATABASE_URL must be a valid PostgreSQL connection string"
                    ))
                }
            }
        } else if self.is_production() {
            return Err(anyhow::anyhow!(
                "REPOSITORY_BACKEND=memory is not allowed in production"
            ));
        }

        match self.storage_backend {
            StorageBackend::S3 => {
                if self.s3_bucket.is_none() {
                    return Err(anyhow::anyhow!(
                        "S3_BUCKET must be set when using S3 storage backend"
                    ));
                }
                if self.s3_region.is_none() {
                    return Err(anyhow::anyhow!(
                        "S3_REGION or AWS_REGION must be set when using S3 storage backend"
                    ));
                }
            }
            StorageBackend::Local => {
                if self.local_storage_path.is_none() {
                    return Err(anyhow::anyhow!(
                        "LOCAL_STORAGE_PATH must be set when using local storage backend"
                    ));
                }
                if self.local_storage_base_url.is_none() {
                    return Err(anyhow::anyhow!(
                        "LOCAL_STORAGE_BASE_URL must be set when using local storage backend"
                    ));
                }
            }
        }

        if self.queue_backend == QueueBackend::Sqs && self.sqs_queue_url.is_none() {
            return Err(anyhow::anyhow!(
                "SQS_QUEUE_URL must be set when using SQS queue backend"
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config, anyhow::Error> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    fn local_memory_pairs() -> Vec<(&'static str, &'static str)> {
        vec![
            ("REPOSITORY_BACKEND", "memory"),
            ("STORAGE_BACKEND", "local"),
            ("LOCAL_STORAGE_PATH", "/tmp/depot"),
            ("LOCAL_STORAGE_BASE_URL", "http://localhost:3000/files"),
            ("QUEUE_BACKEND", "channel"),
        ]
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&local_memory_pairs()).unwrap();
        assert_eq!(config.max_artifact_size_bytes, 10 * 1024 * 1024);
        assert_eq!(config.write_location_ttl(), Duration::from_secs(900));
        assert_eq!(config.stale_upload_timeout_secs, 3600);
        assert_eq!(config.stuck_dispatch_timeout_secs, 300);
        assert_eq!(config.outbox_sweep.batch_size, 50);
        assert_eq!(config.stuck_dispatch_sweep.interval(), Duration::from_secs(60));
        assert_eq!(config.job_kind, ARTIFACT_PROCESSING_KIND);
        assert!(config
            .allowed_content_types
            .contains(&"application/pdf".to_string()));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_huge_artifact_size_rejected() {
        let mut pairs = local_memory_pairs();
        pairs.push(("MAX_ARTIFACT_SIZE_MB", "18446744073709551615"));
        let config = config_from(&pairs).unwrap();
        assert_eq!(config.max_artifact_size_bytes, u64::MAX);
        assert!(config.validate().is_err());

        let mut pairs = local_memory_pairs();
        pairs.push(("MAX_ARTIFACT_SIZE_MB", "8796093022208"));
        assert!(config_from(&pairs).unwrap().validate().is_err());
    }

    #[test]
    fn test_overrides_are_parsed() {
        let mut pairs = local_memory_pairs();
        pairs.push(("MAX_ARTIFACT_SIZE_MB", "2"));
        pairs.push(("OUTBOX_SWEEP_BATCH_SIZE", "7"));
        pairs.push(("ALLOWED_CONTENT_TYPES", "Application/PDF, text/plain"));
        let config = config_from(&pairs).unwrap();
        assert_eq!(config.max_artifact_size_bytes, 2 * 1024 * 1024);
        assert_eq!(config.outbox_sweep.batch_size, 7);
        assert_eq!(
            config.allowed_content_types,
            vec!["application/pdf".to_string(), "text/plain".to_string()]
        );
    }

    #[test]
    fn test_invalid_backend_is_an_error() {
        assert!(config_from(&[("QUEUE_BACKEND", "kafka")]).is_err());
    }

    #[test]
    fn test_validate_rejects_zero_batch() {
        let mut pairs = local_memory_pairs();
        pairs.push(("STALE_UPLOAD_SWEEP_BATCH_SIZE", "0"));
        let config = config_from(&pairs).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_requires_backend_settings() {
        let config = config_from(&[]).unwrap();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("DATABASE_URL"));

        let config = config_from(&[
            ("DATABASE_URL", "postgresql://localhost/depot"),
            ("S3_BUCKET", "artifacts"),
            ("AWS_REGION", "eu-west-1"),
        ])
        .unwrap();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("SQS_QUEUE_URL"));
    }

    #[test]
    fn test_memory_backend_refused_in_production() {
        let mut pairs = local_memory_pairs();
        pairs.push(("ENVIRONMENT", "production"));
        let config = config_from(&pairs).unwrap();
        assert!(config.is_production());
        assert!(config.validate().is_err());
    }
}

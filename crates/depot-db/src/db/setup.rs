//! Database setup and repository wiring

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use depot_core::{Config, RepositoryBackend};
use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::db::memory::MemoryStore;
use crate::db::outbox::PgOutboxRepository;
use crate::db::traits::{OutboxRepository, UploadRepository};
use crate::db::upload::PgUploadRepository;

/// Workspace migrations, embedded at compile time
pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

/// Connect to Postgres and apply pending migrations.
pub async fn connect(config: &Config) -> Result<PgPool> {
    let database_url = config
        .database_url
        .as_deref()
        .context("DATABASE_URL is required for the postgres repository backend")?;

    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .acquire_timeout(Duration::from_secs(config.db_timeout_seconds))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await
        .context("Failed to connect to database")?;

    tracing::info!(
        max_connections = config.db_max_connections,
        "Database connected successfully"
    );

    MIGRATOR
        .run(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database migrations applied");

    Ok(pool)
}

/// Repository handles used by the services
#[derive(Clone)]
pub struct Repositories {
    pub uploads: Arc<dyn UploadRepository>,
    pub outbox: Arc<dyn OutboxRepository>,
}

impl Repositories {
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            uploads: Arc::new(PgUploadRepository::new(pool.clone())),
            outbox: Arc::new(PgOutboxRepository::new(pool)),
        }
    }

    pub fn memory(store: &MemoryStore) -> Self {
        Self {
            uploads: Arc::new(store.uploads()),
            outbox: Arc::new(store.outbox()),
        }
    }
}

/// Build repositories for the configured backend.
pub async fn create_repositories(config: &Config) -> Result<Repositories> {
    match config.repository_backend {
        RepositoryBackend::Postgres => {
            let pool = connect(config).await?;
            Ok(Repositories::postgres(pool))
        }
        RepositoryBackend::Memory => {
            tracing::warn!("Using in-memory repositories; state is lost on exit");
            Ok(Repositories::memory(&MemoryStore::new()))
        }
    }
}

//! Database repositories for the data access layer
//
// Repository contracts
pub mod traits;
//
// Postgres repositories
pub mod outbox;
pub mod upload;
//
// In-memory repositories sharing one lock
pub mod memory;
//
// Pool setup, migrations and transaction helpers
pub mod setup;
pub mod transaction;

pub use memory::{MemoryOutboxRepository, MemoryStore, MemoryUploadRepository};
pub use outbox::PgOutboxRepository;
pub use setup::{connect, create_repositories, Repositories, MIGRATOR};
pub use traits::{CanonicalResolution, OutboxRepository, OutboxTransition, UploadRepository};
pub use upload::PgUploadRepository;

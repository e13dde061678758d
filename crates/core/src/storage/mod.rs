//! Repositories for the assistant's persistent state.

mod audit;
mod confirmations;
mod conversations;
mod embeddings;
pub mod lock;

pub use audit::PgAuditRepository;
pub use confirmations::PgConfirmationRepository;
pub use conversations::PgConversationRepository;
pub use embeddings::PgVectorStore;

use crate::audit::{AuditRepository, InMemoryAuditRepository};
use crate::context::Clock;
use crate::embeddings::{InMemoryVectorStore, VectorStore};
use crate::memory::{ConversationMemoryRepository, InMemoryConversationRepository};
use crate::risk::{ConfirmationRepository, InMemoryConfirmationRepository};
use anyhow::Context;
use std::sync::Arc;

pub async fn connect(database_url: &str) -> anyhow::Result<sqlx::PgPool> {
    sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await
        .context("connect DATABASE_URL failed")
}

pub async fn migrate(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("sqlx migrations failed")?;
    Ok(())
}

/// The persistence ports, backed by one store.
#[derive(Clone)]
pub struct Repositories {
    pub memory: Arc<dyn ConversationMemoryRepository>,
    pub vectors: Arc<dyn VectorStore>,
    pub confirmations: Arc<dyn ConfirmationRepository>,
    pub audit: Arc<dyn AuditRepository>,
}

impl Repositories {
    pub fn postgres(pool: sqlx::PgPool, clock: Arc<dyn Clock>) -> Self {
        Self {
            memory: Arc::new(PgConversationRepository::new(pool.clone(), clock.clone())),
            vectors: Arc::new(PgVectorStore::new(pool.clone(), clock)),
            confirmations: Arc::new(PgConfirmationRepository::new(pool.clone())),
            audit: Arc::new(PgAuditRepository::new(pool)),
        }
    }

    /// Process-local state, lost on restart.
    pub fn in_memory(clock: Arc<dyn Clock>) -> Self {
        Self {
            memory: Arc::new(InMemoryConversationRepository::new(clock.clone())),
            vectors: Arc::new(InMemoryVectorStore::new(clock)),
            confirmations: Arc::new(InMemoryConfirmationRepository::new()),
            audit: Arc::new(InMemoryAuditRepository::new()),
        }
    }
}

use std::sync::Arc;

use log::info;

use crate::config::PostgresSettings;

pub mod checkpoint;
pub mod memory;
pub mod models;
pub mod postgres;
pub mod store;

pub use checkpoint::CheckpointStore;
pub use memory::{MemoryCheckpointStore, MemoryStore};
pub use postgres::PostgresClient;
pub use store::EntityStore;

/// Database handle shared by the poller and the API layer.
///
/// PostgreSQL holds vehicles, toll transactions and the poller checkpoint.
#[derive(Clone)]
pub struct Database {
    pub postgres: Arc<PostgresClient>,
}

impl Database {
    pub async fn new(settings: PostgresSettings) -> anyhow::Result<Self> {
        let postgres = PostgresClient::new(settings).await?;

        // Run migrations
        postgres.migrate().await?;

        info!("Database ready");

        Ok(Self {
            postgres: Arc::new(postgres),
        })
    }
}

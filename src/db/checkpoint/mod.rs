//! Durable watermark of the last fully processed block.
//!
//! Backends never move the stored value backwards: saving a block lower
//! than the current one is a no-op.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{CheckpointBackend, CheckpointSettings};
use crate::db::postgres::PostgresClient;

mod file;
mod postgres;

pub use file::FileCheckpointStore;
pub use postgres::PostgresCheckpointStore;

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Last processed block, `None` if nothing was ever saved.
    async fn load(&self) -> anyhow::Result<Option<u64>>;

    /// Persist `block`; returns once the value is durable.
    async fn save(&self, block: u64) -> anyhow::Result<()>;
}

/// Build the checkpoint backend selected in the settings.
pub fn from_settings(
    settings: &CheckpointSettings,
    postgres: Arc<PostgresClient>,
) -> Arc<dyn CheckpointStore> {
    match settings.backend {
        CheckpointBackend::Postgres => {
            Arc::new(PostgresCheckpointStore::new(postgres, settings.name.clone()))
        },
        CheckpointBackend::File => {
            Arc::new(FileCheckpointStore::new(&settings.path, settings.name.clone()))
        },
    }
}

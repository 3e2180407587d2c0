use std::sync::Arc;

use async_trait::async_trait;

use super::CheckpointStore;
use crate::db::{models::PollerCheckpoint, postgres::PostgresClient};

/// Checkpoint kept as a singleton row in `tollchain.poller_checkpoints`.
pub struct PostgresCheckpointStore {
    client: Arc<PostgresClient>,
    name: String,
}

impl PostgresCheckpointStore {
    pub fn new(client: Arc<PostgresClient>, name: String) -> Self {
        Self { client, name }
    }
}

#[async_trait]
impl CheckpointStore for PostgresCheckpointStore {
    async fn load(&self) -> anyhow::Result<Option<u64>> {
        Ok(self
            .client
            .get_poller_checkpoint(&self.name)
            .await?
            .map(|c| c.last_processed_block))
    }

    async fn save(&self, block: u64) -> anyhow::Result<()> {
        let checkpoint = PollerCheckpoint::new(self.name.clone(), block);
        self.client.set_poller_checkpoint(&checkpoint).await
    }
}

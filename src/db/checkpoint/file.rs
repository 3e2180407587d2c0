use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use log::debug;
use tokio::io::AsyncWriteExt;

use super::CheckpointStore;
use crate::db::models::PollerCheckpoint;

/// Checkpoint kept in a small JSON file.
///
/// Writes go to a sibling temp file which is synced and renamed over the
/// target, so a crash leaves either the old or the new checkpoint.
pub struct FileCheckpointStore {
    path: PathBuf,
    name: String,
}

impl FileCheckpointStore {
    pub fn new(path: impl AsRef<Path>, name: String) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            name,
        }
    }

    async fn read(&self) -> anyhow::Result<Option<PollerCheckpoint>> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to read checkpoint file {}", self.path.display())
                })
            },
        };

        let checkpoint: PollerCheckpoint = serde_json::from_slice(&raw).with_context(|| {
            format!("Corrupt checkpoint file {}", self.path.display())
        })?;

        Ok(Some(checkpoint))
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn load(&self) -> anyhow::Result<Option<u64>> {
        Ok(self.read().await?.map(|c| c.last_processed_block))
    }

    async fn save(&self, block: u64) -> anyhow::Result<()> {
        if let Some(current) = self.read().await? {
            if current.last_processed_block > block {
                debug!(
                    "Ignoring checkpoint {} below stored {}",
                    block, current.last_processed_block
                );
                return Ok(());
            }
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let checkpoint = PollerCheckpoint::new(self.name.clone(), block);
        let payload = serde_json::to_vec_pretty(&checkpoint)?;

        let tmp_path = self.path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp_path)
            .await
            .with_context(|| format!("Failed to create {}", tmp_path.display()))?;
        file.write_all(&payload).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .with_context(|| format!("Failed to move checkpoint into {}", self.path.display()))?;

        Ok(())
    }
}

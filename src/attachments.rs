//! Pruning of field attachments that were uploaded but never persisted.

use chrono::{DateTime, Duration, Utc};
use panel_framework::{PanelConfig, PanelError, StorageClient};
use tracing::{debug, info};

pub const PENDING_ATTACHMENTS_TABLE: &str = "pending_attachments";

pub struct PruneStaleAttachments {
    storage: StorageClient,
    ttl: Duration,
    chunk_size: usize,
}

impl PruneStaleAttachments {
    pub fn new(storage: StorageClient, config: &PanelConfig) -> Self {
        Self {
            storage,
            ttl: Duration::hours(config.pending_attachment_ttl_hours),
            chunk_size: config.prune_chunk_size.max(1),
        }
    }

    /// Removes pending attachments older than the configured TTL. Returns how many were removed.
    pub async fn run(&self) -> Result<usize, PanelError> {
        self.prune_before(Utc::now() - self.ttl).await
    }

    /// Removes pending attachments created before `cutoff`, one chunk per storage request.
    pub async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<usize, PanelError> {
        let stale: Vec<u64> = self
            .storage
            .scan(PENDING_ATTACHMENTS_TABLE)
            .await?
            .into_iter()
            .filter(|row| row.created_at < cutoff)
            .map(|row| row.id)
            .collect();

        let mut pruned = 0;
        for chunk in stale.chunks(self.chunk_size) {
            pruned += self.storage.force_delete(PENDING_ATTACHMENTS_TABLE, chunk.to_vec()).await?.len();
            debug!(pruned, "Pruned chunk");
        }
        info!(pruned, "Stale attachments pruned");
        Ok(pruned)
    }
}

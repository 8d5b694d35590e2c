use crate::db::Database;
use crate::embeddings::EmbeddingClient;
use crate::vector::VectorIndex;
use serde_json::json;
use std::sync::Arc;
use tokio::time::Duration;
use tracing::{debug, error, info};

/// Background worker that embeds stored messages and ships them to the
/// vector index, marking each row indexed once the vector write succeeded.
pub struct EmbeddingIndexer {
    db: Database,
    embedder: Arc<EmbeddingClient>,
    index: Arc<dyn VectorIndex>,
    batch_size: usize,
    interval: Duration,
}

impl EmbeddingIndexer {
    pub fn new(
        db: Database,
        embedder: Arc<EmbeddingClient>,
        index: Arc<dyn VectorIndex>,
        batch_size: usize,
        interval: Duration,
    ) -> Self {
        Self {
            db,
            embedder,
            index,
            batch_size,
            interval,
        }
    }

    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            ticker.tick().await;
            match self.process_batch().await {
                Ok(0) => debug!("Embedding indexer: no messages to index"),
                Ok(n) => info!("Embedding indexer: indexed {} messages", n),
                Err(e) => error!("Embedding indexer error: {}", e),
            }
        }
    }

    async fn process_batch(&self) -> anyhow::Result<usize> {
        let batch_size = self.batch_size;
        let db = self.db.clone();
        let pending =
            tokio::task::spawn_blocking(move || db.unindexed_messages(batch_size)).await??;

        let mut indexed = 0usize;
        for message in pending {
            // Skip very short messages to reduce embedding noise/cost.
            if message.content.trim().len() < 3 {
                self.mark_indexed(&message.id).await?;
                continue;
            }

            match self.embedder.embed(&message.content).await {
                Ok(embedding) => {
                    let metadata = json!({
                        "channel_id": message.channel_id,
                        "created_at": message.created_at,
                    });
                    if let Err(e) = self
                        .index
                        .add(&message.id, &embedding, &message.content, metadata)
                        .await
                    {
                        debug!(
                            "Embedding indexer: failed to store vector for message {}: {}",
                            message.id, e
                        );
                        continue;
                    }
                    self.mark_indexed(&message.id).await?;
                    indexed += 1;
                }
                Err(e) => {
                    debug!(
                        "Embedding indexer: failed to embed message {}: {}",
                        message.id, e
                    );
                }
            }
        }

        Ok(indexed)
    }

    async fn mark_indexed(&self, message_id: &str) -> anyhow::Result<()> {
        let db = self.db.clone();
        let id = message_id.to_string();
        tokio::task::spawn_blocking(move || db.mark_message_indexed(&id)).await?
    }
}

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

/// Sink for embedded messages. Storage and search live in an external
/// service; this crate only writes to it and flips the indexed flag.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn add(
        &self,
        id: &str,
        embedding: &[f32],
        document: &str,
        metadata: Value,
    ) -> anyhow::Result<()>;
}

/// Chroma-compatible HTTP client. The collection is resolved once on
/// connect with get_or_create semantics.
pub struct ChromaIndex {
    http: reqwest::Client,
    base_url: String,
    collection_id: String,
}

#[derive(Deserialize)]
struct CollectionResponse {
    id: String,
}

impl ChromaIndex {
    pub async fn connect(
        http: reqwest::Client,
        base_url: &str,
        collection: &str,
    ) -> anyhow::Result<Self> {
        let base_url = base_url.trim_end_matches('/').to_string();
        let response = http
            .post(format!("{}/api/v1/collections", base_url))
            .json(&json!({ "name": collection, "get_or_create": true }))
            .send()
            .await?
            .error_for_status()?;

        let body: CollectionResponse = response.json().await?;
        debug!(
            "Vector index collection \"{}\" resolved to {}",
            collection, body.id
        );

        Ok(Self {
            http,
            base_url,
            collection_id: body.id,
        })
    }
}

#[async_trait]
impl VectorIndex for ChromaIndex {
    async fn add(
        &self,
        id: &str,
        embedding: &[f32],
        document: &str,
        metadata: Value,
    ) -> anyhow::Result<()> {
        self.http
            .post(format!(
                "{}/api/v1/collections/{}/add",
                self.base_url, self.collection_id
            ))
            .json(&json!({
                "ids": [id],
                "embeddings": [embedding],
                "documents": [document],
                "metadatas": [metadata],
            }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

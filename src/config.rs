use dotenvy::dotenv;
use std::env;

#[derive(Clone)]
pub struct Config {
    pub discord_token: String,
    pub application_id: u64,
    pub database_url: String,
    pub status_message: String,
    // Courtesy delay between successive history requests
    pub history_fetch_delay_secs: u64,
    // Embedding endpoint (OpenAI-compatible)
    pub embedding_url: String,
    pub embedding_model: String,
    pub embedding_api_key: Option<String>,
    // Background embedding indexer settings
    pub embedding_indexer_enabled: bool,
    pub embedding_indexer_batch_size: usize,
    pub embedding_indexer_interval_secs: u64,
    // Vector index (Chroma-compatible HTTP API)
    pub vector_index_url: String,
    pub vector_index_collection: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok();
        Self::build()
    }

    fn build() -> anyhow::Result<Self> {
        Ok(Config {
            discord_token: env::var("DISCORD_TOKEN")
                .map_err(|_| anyhow::anyhow!("DISCORD_TOKEN must be set"))?,
            application_id: env::var("APPLICATION_ID")
                .map_err(|_| anyhow::anyhow!("APPLICATION_ID must be set"))?
                .parse()
                .map_err(|_| anyhow::anyhow!("APPLICATION_ID must be a valid u64"))?,
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "data/chronicord.db".to_string()),
            status_message: env::var("STATUS_MESSAGE")
                .unwrap_or_else(|_| "Archiving history".to_string()),
            history_fetch_delay_secs: env::var("HISTORY_FETCH_DELAY_SECS")
                .unwrap_or_else(|_| "1".to_string())
                .parse()
                .unwrap_or(1),
            embedding_url: env::var("EMBEDDING_URL")
                .unwrap_or_else(|_| "http://localhost:8080/v1".to_string()),
            embedding_model: env::var("EMBEDDING_MODEL")
                .unwrap_or_else(|_| "local-model".to_string()),
            embedding_api_key: env::var("EMBEDDING_API_KEY").ok(),
            embedding_indexer_enabled: env::var("EMBEDDING_INDEXER_ENABLED")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .unwrap_or(true),
            embedding_indexer_batch_size: env::var("EMBEDDING_INDEXER_BATCH_SIZE")
                .unwrap_or_else(|_| "25".to_string())
                .parse()
                .unwrap_or(25),
            embedding_indexer_interval_secs: env::var("EMBEDDING_INDEXER_INTERVAL_SECS")
                .unwrap_or_else(|_| "300".to_string())
                .parse()
                .unwrap_or(300),
            vector_index_url: env::var("VECTOR_INDEX_URL")
                .unwrap_or_else(|_| "http://localhost:8000".to_string()),
            vector_index_collection: env::var("VECTOR_INDEX_COLLECTION")
                .unwrap_or_else(|_| "chronicord".to_string()),
        })
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("discord_token", &"[REDACTED]")
            .field("application_id", &self.application_id)
            .field("database_url", &self.database_url)
            .field("status_message", &self.status_message)
            .field("history_fetch_delay_secs", &self.history_fetch_delay_secs)
            .field("embedding_url", &self.embedding_url)
            .field("embedding_model", &self.embedding_model)
            .field(
                "embedding_api_key",
                &self.embedding_api_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("embedding_indexer_enabled", &self.embedding_indexer_enabled)
            .field(
                "embedding_indexer_batch_size",
                &self.embedding_indexer_batch_size,
            )
            .field(
                "embedding_indexer_interval_secs",
                &self.embedding_indexer_interval_secs,
            )
            .field("vector_index_url", &self.vector_index_url)
            .field("vector_index_collection", &self.vector_index_collection)
            .finish()
    }
}

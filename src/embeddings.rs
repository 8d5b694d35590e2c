use crate::config::Config;
use async_openai::{config::OpenAIConfig, types::CreateEmbeddingRequestArgs, Client};

/// Client for an OpenAI-compatible embedding endpoint.
pub struct EmbeddingClient {
    client: Client<OpenAIConfig>,
    model: String,
}

impl EmbeddingClient {
    pub fn new(config: &Config) -> Self {
        let mut api_config = OpenAIConfig::new().with_api_base(&config.embedding_url);

        if let Some(key) = &config.embedding_api_key {
            api_config = api_config.with_api_key(key);
        } else {
            api_config = api_config.with_api_key("unused");
        }

        Self {
            client: Client::with_config(api_config),
            model: config.embedding_model.clone(),
        }
    }

    pub async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.model)
            .input(text)
            .build()?;

        let response = self.client.embeddings().create(request).await?;
        let embedding = response
            .data
            .first()
            .ok_or_else(|| anyhow::anyhow!("No embedding returned"))?
            .embedding
            .clone();

        Ok(embedding)
    }
}

use chronicord::commands::{self, fetch};
use chronicord::{config::Config, ingest, Data};
use poise::serenity_prelude as serenity;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    // Load configuration
    let config = Config::from_env()?;
    let discord_token = config.discord_token.clone();

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: vec![fetch::fetch(), commands::ping()],
            event_handler: |ctx, event, _framework, data| {
                Box::pin(async move {
                    if let serenity::FullEvent::Message { new_message } = event {
                        // Mirror live traffic as it happens; bots and DMs are
                        // filtered inside the conversion.
                        if let Some(incoming) =
                            ingest::IncomingMessage::from_discord(ctx, new_message).await
                        {
                            if let Err(e) = ingest::persist_incoming(&data.db, &incoming) {
                                error!("Failed to store live message {}: {}", new_message.id, e);
                            }
                        }
                    }
                    Ok(())
                })
            },
            ..Default::default()
        })
        .setup(|ctx, _ready, framework| {
            Box::pin(async move {
                info!("Bot is ready!");
                poise::builtins::register_globally(ctx, &framework.options().commands).await?;

                // Set bot status
                ctx.set_activity(Some(serenity::ActivityData::custom(&config.status_message)));

                let db = chronicord::db::Database::new(&config).expect("Failed to open database");
                db.execute_init().expect("Failed to initialize database");

                if config.embedding_indexer_enabled {
                    match chronicord::vector::ChromaIndex::connect(
                        reqwest::Client::new(),
                        &config.vector_index_url,
                        &config.vector_index_collection,
                    )
                    .await
                    {
                        Ok(index) => {
                            let embedder =
                                Arc::new(chronicord::embeddings::EmbeddingClient::new(&config));
                            let indexer = chronicord::indexer::EmbeddingIndexer::new(
                                db.clone(),
                                embedder,
                                Arc::new(index),
                                config.embedding_indexer_batch_size,
                                tokio::time::Duration::from_secs(
                                    config.embedding_indexer_interval_secs,
                                ),
                            );
                            tokio::spawn(indexer.run());
                        }
                        Err(e) => {
                            error!("Vector index unavailable, embedding indexer disabled: {}", e)
                        }
                    }
                }

                Ok(Data { config, db })
            })
        })
        .build();

    let intents = serenity::GatewayIntents::non_privileged()
        | serenity::GatewayIntents::MESSAGE_CONTENT
        | serenity::GatewayIntents::GUILD_MESSAGES;

    let mut client = serenity::ClientBuilder::new(&discord_token, intents)
        .framework(framework)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create client: {}", e))?;

    info!("Starting bot...");
    if let Err(why) = client.start().await {
        error!("Client error: {:?}", why);
    }

    Ok(())
}

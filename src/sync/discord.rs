use super::source::{ChannelRef, FetchedMessage, GuildInfo, HistorySource};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serenity::all::{ChannelId, ChannelType, GetMessages, GuildId, MessageId};
use serenity::http::Http;
use std::sync::Arc;
use tracing::warn;

/// History source backed by the Discord REST API.
pub struct DiscordSource {
    http: Arc<Http>,
}

impl DiscordSource {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

fn parse_snowflake(value: &str) -> anyhow::Result<u64> {
    let id: u64 = value
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid snowflake '{}'", value))?;
    if id == 0 {
        anyhow::bail!("snowflake must be non-zero");
    }
    Ok(id)
}

#[async_trait]
impl HistorySource for DiscordSource {
    async fn guild(&self, guild_id: &str) -> anyhow::Result<Option<GuildInfo>> {
        let Ok(id) = parse_snowflake(guild_id) else {
            return Ok(None);
        };
        match GuildId::new(id).to_partial_guild(&self.http).await {
            Ok(guild) => Ok(Some(GuildInfo {
                id: guild.id.to_string(),
                name: guild.name,
            })),
            Err(e) => {
                warn!("Could not resolve guild {}: {}", guild_id, e);
                Ok(None)
            }
        }
    }

    async fn text_channels(&self, guild_id: &str) -> anyhow::Result<Vec<ChannelRef>> {
        let id = parse_snowflake(guild_id)?;
        let channels = GuildId::new(id).channels(&self.http).await?;
        Ok(channels
            .into_values()
            .filter(|channel| channel.kind == ChannelType::Text)
            .map(|channel| ChannelRef {
                id: channel.id.to_string(),
                name: channel.name,
                parent_id: None,
            })
            .collect())
    }

    async fn threads(
        &self,
        guild_id: &str,
        channel_id: &str,
    ) -> anyhow::Result<Vec<ChannelRef>> {
        let gid = parse_snowflake(guild_id)?;
        let cid = parse_snowflake(channel_id)?;

        // The active-thread listing is guild-wide; narrow it to this channel.
        let active = GuildId::new(gid).get_active_threads(&self.http).await?;
        let mut threads: Vec<ChannelRef> = active
            .threads
            .into_iter()
            .filter(|thread| thread.parent_id.map(|p| p.get()) == Some(cid))
            .map(|thread| ChannelRef {
                id: thread.id.to_string(),
                name: thread.name,
                parent_id: Some(channel_id.to_string()),
            })
            .collect();

        let archived = ChannelId::new(cid)
            .get_archived_public_threads(&self.http, None, None)
            .await?;
        threads.extend(archived.threads.into_iter().map(|thread| ChannelRef {
            id: thread.id.to_string(),
            name: thread.name,
            parent_id: Some(channel_id.to_string()),
        }));

        Ok(threads)
    }

    async fn messages_before(
        &self,
        channel_id: &str,
        before: Option<&str>,
        limit: u8,
    ) -> anyhow::Result<Vec<FetchedMessage>> {
        let cid = parse_snowflake(channel_id)?;
        let mut builder = GetMessages::new().limit(limit);
        if let Some(before_id) = before {
            builder = builder.before(MessageId::new(parse_snowflake(before_id)?));
        }

        let messages = ChannelId::new(cid).messages(&self.http, builder).await?;
        Ok(messages
            .into_iter()
            .map(|message| FetchedMessage {
                id: message.id.to_string(),
                author_id: message.author.id.to_string(),
                author_tag: message.author.tag(),
                content: message.content,
                created_at: Utc
                    .timestamp_opt(message.timestamp.unix_timestamp(), 0)
                    .single()
                    .unwrap_or_else(Utc::now),
            })
            .collect())
    }
}

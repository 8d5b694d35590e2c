use crate::db::Database;
use chrono::{DateTime, TimeZone, Utc};
use serenity::all::{Channel, Context as SerenityContext, Message};
use tracing::debug;

pub const UNKNOWN_CHANNEL: &str = "unknown-channel";
pub const UNKNOWN_PARENT_CHANNEL: &str = "unknown-parent-channel";

/// A live gateway message reduced to the fields the store needs.
pub struct IncomingMessage {
    pub id: String,
    pub guild_id: String,
    pub guild_name: String,
    pub channel_id: String,
    pub channel_name: String,
    pub parent_channel_id: Option<String>,
    pub parent_channel_name: Option<String>,
    pub author_id: String,
    pub author_tag: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl IncomingMessage {
    /// Resolves guild and channel context for a gateway message. Returns
    /// None for bot authors and for messages outside any guild (DMs).
    pub async fn from_discord(ctx: &SerenityContext, message: &Message) -> Option<Self> {
        if message.author.bot {
            return None;
        }
        let guild_id = message.guild_id?;

        let cached_name = ctx.cache.guild(guild_id).map(|g| g.name.clone());
        let guild_name = match cached_name {
            Some(name) => name,
            None => match guild_id.to_partial_guild(&ctx.http).await {
                Ok(guild) => guild.name,
                Err(_) => "unknown-server".to_string(),
            },
        };

        let (channel_name, parent_channel_id) = match message.channel_id.to_channel(ctx).await {
            Ok(Channel::Guild(channel)) => {
                // parent_id points at the category for regular channels;
                // only threads carry their parent channel there.
                let parent = channel.thread_metadata.and(channel.parent_id);
                (channel.name, parent)
            }
            _ => (UNKNOWN_CHANNEL.to_string(), None),
        };

        let parent_channel_name = match parent_channel_id {
            Some(parent_id) => match parent_id.to_channel(ctx).await {
                Ok(Channel::Guild(parent)) => Some(parent.name),
                _ => None,
            },
            None => None,
        };

        Some(Self {
            id: message.id.to_string(),
            guild_id: guild_id.to_string(),
            guild_name,
            channel_id: message.channel_id.to_string(),
            channel_name,
            parent_channel_id: parent_channel_id.map(|id| id.to_string()),
            parent_channel_name,
            author_id: message.author.id.to_string(),
            author_tag: message.author.tag(),
            content: message.content.clone(),
            created_at: Utc
                .timestamp_opt(message.timestamp.unix_timestamp(), 0)
                .single()
                .unwrap_or_else(Utc::now),
        })
    }
}

/// Persists one live message through the same store contracts the sync pass
/// uses, so the two paths converge on identical rows.
pub fn persist_incoming(db: &Database, message: &IncomingMessage) -> anyhow::Result<()> {
    let server_id = db.upsert_server(&message.guild_id, &message.guild_name)?;

    if let Some(parent_id) = message.parent_channel_id.as_deref() {
        // The parent row must exist before its thread. A placeholder name is
        // used when the real one could not be resolved; the next sync pass
        // refreshes it.
        if !db.channel_exists(parent_id)? {
            let parent_name = message
                .parent_channel_name
                .as_deref()
                .unwrap_or(UNKNOWN_PARENT_CHANNEL);
            db.upsert_channel(parent_id, server_id, parent_name, None)?;
        }
        db.upsert_channel(
            &message.channel_id,
            server_id,
            &message.channel_name,
            Some(parent_id),
        )?;
    } else {
        db.upsert_channel(&message.channel_id, server_id, &message.channel_name, None)?;
    }

    let user_db_id = db.upsert_user(&message.author_id, &message.author_tag)?;
    db.upsert_message(
        &message.id,
        &message.channel_id,
        user_db_id,
        &message.content,
        message.created_at,
    )?;
    debug!("Stored live message {}", message.id);
    Ok(())
}

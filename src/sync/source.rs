use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone)]
pub struct GuildInfo {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct ChannelRef {
    pub id: String,
    pub name: String,
    pub parent_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FetchedMessage {
    pub id: String,
    pub author_id: String,
    pub author_tag: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Seam over the platform's paged history API and channel hierarchy.
/// Production uses the serenity-backed implementation; tests use a mock.
#[async_trait]
pub trait HistorySource: Send + Sync {
    /// Resolve a guild reference. None when the guild cannot be seen.
    async fn guild(&self, guild_id: &str) -> anyhow::Result<Option<GuildInfo>>;

    /// All standard text channels of the guild. Other channel kinds (voice,
    /// category, forum) are not part of the mirror.
    async fn text_channels(&self, guild_id: &str) -> anyhow::Result<Vec<ChannelRef>>;

    /// Active and archived threads anchored to the given channel.
    async fn threads(&self, guild_id: &str, channel_id: &str)
        -> anyhow::Result<Vec<ChannelRef>>;

    /// One page of messages strictly older than `before` (newest page when
    /// unset), newest first, at most `limit` entries.
    async fn messages_before(
        &self,
        channel_id: &str,
        before: Option<&str>,
        limit: u8,
    ) -> anyhow::Result<Vec<FetchedMessage>>;
}

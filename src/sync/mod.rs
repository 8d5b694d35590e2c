pub mod discord;
pub mod paginator;
pub mod source;

use crate::db::Database;
use chrono::{DateTime, Utc};
use paginator::{fetch_channel_history, RequestPacer};
use source::{FetchedMessage, HistorySource};
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Mirror the entire reachable history.
    Full,
    /// Mirror only messages newer than the stored watermark.
    Differential,
}

/// Terminal failures of a sync invocation. Everything else is logged and
/// isolated to the channel or thread it happened in.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("no server is associated with this request")]
    MissingGuild,
    #[error("the server could not be resolved")]
    UnknownGuild,
    #[error("failed to persist the server record: {0}")]
    ServerPersist(anyhow::Error),
}

#[derive(Debug, Default)]
struct SyncReport {
    channels_synced: usize,
    channels_failed: usize,
    threads_synced: usize,
    threads_failed: usize,
    messages_saved: usize,
    messages_skipped: usize,
}

impl SyncReport {
    fn render(&self) -> String {
        let mut status = format!(
            "Sync complete: {} messages stored across {} channels and {} threads.",
            self.messages_saved, self.channels_synced, self.threads_synced
        );
        let failed = self.channels_failed + self.threads_failed;
        if failed > 0 {
            status.push_str(&format!(" {} units failed and were skipped.", failed));
        }
        if self.messages_skipped > 0 {
            status.push_str(&format!(
                " {} messages could not be attributed and were skipped.",
                self.messages_skipped
            ));
        }
        status
    }
}

/// Drives one full or differential pass over a guild: resolves the
/// watermark, upserts the server row, then walks channels and their threads,
/// paginating history and persisting users and messages as it goes.
pub struct Syncer<'a> {
    db: &'a Database,
    source: &'a dyn HistorySource,
    pacer: &'a RequestPacer,
}

impl<'a> Syncer<'a> {
    pub fn new(db: &'a Database, source: &'a dyn HistorySource, pacer: &'a RequestPacer) -> Self {
        Self { db, source, pacer }
    }

    pub async fn sync_guild(
        &self,
        guild_id: Option<&str>,
        mode: SyncMode,
    ) -> Result<String, SyncError> {
        let guild_id = guild_id.ok_or(SyncError::MissingGuild)?;
        let guild = match self.source.guild(guild_id).await {
            Ok(Some(guild)) => guild,
            Ok(None) => return Err(SyncError::UnknownGuild),
            Err(e) => {
                warn!("Guild lookup for {} failed: {}", guild_id, e);
                return Err(SyncError::UnknownGuild);
            }
        };
        info!("Syncing server \"{}\" ({:?})", guild.name, mode);

        let cutoff = self.resolve_watermark(guild_id, mode);
        match cutoff {
            Some(c) => info!("Fetching messages created after {}", c),
            None => info!("Fetching all messages"),
        }

        // The server row is the root of the FK graph; without it no channel
        // work is valid.
        let server_id = self
            .db
            .upsert_server(&guild.id, &guild.name)
            .map_err(SyncError::ServerPersist)?;

        let channels = match self.source.text_channels(guild_id).await {
            Ok(channels) => channels,
            Err(e) => {
                warn!("Failed to enumerate channels for guild {}: {}", guild_id, e);
                Vec::new()
            }
        };
        info!("Text channels to sync: {}", channels.len());

        let mut report = SyncReport::default();
        for channel in &channels {
            if let Err(e) = self
                .sync_channel(server_id, &channel.id, &channel.name, None, cutoff, &mut report)
                .await
            {
                error!("Skipping channel \"{}\": {}", channel.name, e);
                report.channels_failed += 1;
                continue;
            }
            report.channels_synced += 1;

            let threads = match self.source.threads(guild_id, &channel.id).await {
                Ok(threads) => threads,
                Err(e) => {
                    warn!(
                        "Failed to enumerate threads for channel \"{}\": {}",
                        channel.name, e
                    );
                    Vec::new()
                }
            };
            for thread in &threads {
                match self
                    .sync_channel(
                        server_id,
                        &thread.id,
                        &thread.name,
                        Some(&channel.id),
                        cutoff,
                        &mut report,
                    )
                    .await
                {
                    Ok(()) => report.threads_synced += 1,
                    Err(e) => {
                        error!("Skipping thread \"{}\": {}", thread.name, e);
                        report.threads_failed += 1;
                    }
                }
            }
        }

        let status = report.render();
        info!("{}", status);
        Ok(status)
    }

    /// Cutoff timestamp for this pass. Full mode has none; differential mode
    /// uses the newest stored message, degrading to a full pass when nothing
    /// is stored yet or the lookup fails.
    fn resolve_watermark(&self, guild_id: &str, mode: SyncMode) -> Option<DateTime<Utc>> {
        match mode {
            SyncMode::Full => None,
            SyncMode::Differential => match self.db.latest_message_timestamp(guild_id) {
                Ok(watermark) => watermark,
                Err(e) => {
                    warn!(
                        "Failed to resolve watermark for {} (falling back to full sync): {}",
                        guild_id, e
                    );
                    None
                }
            },
        }
    }

    async fn sync_channel(
        &self,
        server_id: i64,
        channel_id: &str,
        name: &str,
        parent_id: Option<&str>,
        cutoff: Option<DateTime<Utc>>,
        report: &mut SyncReport,
    ) -> anyhow::Result<()> {
        self.db.upsert_channel(channel_id, server_id, name, parent_id)?;

        self.pacer.wait().await;
        let messages = fetch_channel_history(self.source, self.pacer, channel_id, cutoff).await;

        let (saved, skipped) = self.persist_messages(channel_id, &messages)?;
        report.messages_saved += saved;
        report.messages_skipped += skipped;
        info!("Stored {} messages from \"{}\"", saved, name);
        Ok(())
    }

    fn persist_messages(
        &self,
        channel_id: &str,
        messages: &[FetchedMessage],
    ) -> anyhow::Result<(usize, usize)> {
        let mut saved = 0;
        let mut skipped = 0;
        for message in messages {
            // The message row needs the author's surrogate id first.
            let user_db_id = match self.db.upsert_user(&message.author_id, &message.author_tag) {
                Ok(id) => id,
                Err(e) => {
                    error!(
                        "Could not resolve a user row for {} (skipping message {}): {}",
                        message.author_id, message.id, e
                    );
                    skipped += 1;
                    continue;
                }
            };
            self.db.upsert_message(
                &message.id,
                channel_id,
                user_db_id,
                &message.content,
                message.created_at,
            )?;
            saved += 1;
        }
        Ok((saved, skipped))
    }
}

#[cfg(test)]
mod tests {
    use super::source::mock::{history, message, MockSource};
    use super::*;
    use crate::db::{test_database, test_database_uninitialized};
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn zero_pacer() -> RequestPacer {
        RequestPacer::new(Duration::ZERO)
    }

    #[tokio::test]
    async fn test_full_sync_persists_hierarchy() {
        let db = test_database();
        let mut source = MockSource::with_guild("g1", "My Server");
        source.add_channel("c1", "general", history(150));
        source.add_channel("c2", "random", history(30));
        source.add_thread("c1", "t1", "a thread", history(10));

        let pacer = zero_pacer();
        let syncer = Syncer::new(&db, &source, &pacer);
        let status = syncer.sync_guild(Some("g1"), SyncMode::Full).await.unwrap();

        assert!(status.contains("190 messages"), "unexpected status: {status}");
        assert_eq!(db.count_messages(), 190);
        assert!(db.channel_exists("c1").unwrap());
        assert!(db.channel_exists("c2").unwrap());
        assert!(db.channel_exists("t1").unwrap());
        assert_eq!(db.channel_parent("t1"), Some("c1".to_string()));
        // c1: 2 pages, c2: 1 page, t1: 1 page
        assert_eq!(source.page_requests.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_channel_fetch_failure_is_isolated() {
        let db = test_database();
        let mut source = MockSource::with_guild("g1", "srv");
        source.add_channel("a", "alpha", history(5));
        source.add_channel("b", "bravo", history(7));
        source.add_channel("c", "charlie", history(9));
        source.fail_channels.insert("b".to_string());

        let pacer = zero_pacer();
        let syncer = Syncer::new(&db, &source, &pacer);
        let status = syncer.sync_guild(Some("g1"), SyncMode::Full).await.unwrap();

        // Channel b's fetch error costs only b's messages; a and c are intact
        // and b's channel row still exists.
        assert_eq!(db.count_messages(), 14);
        assert!(db.channel_exists("a").unwrap());
        assert!(db.channel_exists("b").unwrap());
        assert!(db.channel_exists("c").unwrap());
        assert!(status.contains("14 messages"), "unexpected status: {status}");
    }

    #[tokio::test]
    async fn test_thread_enumeration_failure_yields_empty_list() {
        let db = test_database();
        let mut source = MockSource::with_guild("g1", "srv");
        source.add_channel("c1", "general", history(5));
        source.add_thread("c1", "t1", "never reached", history(3));
        source.fail_threads.insert("c1".to_string());

        let pacer = zero_pacer();
        let syncer = Syncer::new(&db, &source, &pacer);
        let status = syncer.sync_guild(Some("g1"), SyncMode::Full).await.unwrap();

        assert_eq!(db.count_messages(), 5);
        assert!(!db.channel_exists("t1").unwrap());
        assert!(status.contains("0 threads"), "unexpected status: {status}");
    }

    #[tokio::test]
    async fn test_differential_sync_fetches_only_newer_messages() {
        let db = test_database();

        // Seed the mirror as an earlier sync would have left it.
        let server_id = db.upsert_server("g1", "srv").unwrap();
        db.upsert_channel("c1", server_id, "general", None).unwrap();
        let user_id = db.upsert_user("u1", "tester#0001").unwrap();
        let watermark = message(5, 5);
        db.upsert_message(&watermark.id, "c1", user_id, &watermark.content, watermark.created_at)
            .unwrap();

        let mut source = MockSource::with_guild("g1", "srv");
        source.add_channel("c1", "general", history(10));

        let pacer = zero_pacer();
        let syncer = Syncer::new(&db, &source, &pacer);
        let status = syncer
            .sync_guild(Some("g1"), SyncMode::Differential)
            .await
            .unwrap();

        // Only messages 6..=10 are newer than the stored watermark; the seed
        // row stays as a single row.
        assert_eq!(db.count_messages(), 6);
        assert!(status.contains("5 messages"), "unexpected status: {status}");
    }

    #[tokio::test]
    async fn test_differential_on_empty_mirror_degrades_to_full() {
        let db = test_database();
        let mut source = MockSource::with_guild("g1", "srv");
        source.add_channel("c1", "general", history(25));

        let pacer = zero_pacer();
        let syncer = Syncer::new(&db, &source, &pacer);
        syncer
            .sync_guild(Some("g1"), SyncMode::Differential)
            .await
            .unwrap();

        assert_eq!(db.count_messages(), 25);
    }

    #[tokio::test]
    async fn test_missing_and_unknown_guild_are_terminal() {
        let db = test_database();
        let source = MockSource::with_guild("g1", "srv");
        let pacer = zero_pacer();
        let syncer = Syncer::new(&db, &source, &pacer);

        let err = syncer.sync_guild(None, SyncMode::Full).await.unwrap_err();
        assert!(matches!(err, SyncError::MissingGuild));

        let err = syncer
            .sync_guild(Some("other"), SyncMode::Full)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::UnknownGuild));
        assert_eq!(source.page_requests.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_server_persist_failure_is_fatal() {
        // No schema; the server upsert itself fails.
        let db = test_database_uninitialized();
        let mut source = MockSource::with_guild("g1", "srv");
        source.add_channel("c1", "general", history(5));

        let pacer = zero_pacer();
        let syncer = Syncer::new(&db, &source, &pacer);
        let err = syncer.sync_guild(Some("g1"), SyncMode::Full).await.unwrap_err();

        assert!(matches!(err, SyncError::ServerPersist(_)));
        // No channel work is attempted once the root row fails.
        assert_eq!(source.page_requests.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_resync_does_not_duplicate_rows() {
        let db = test_database();
        let mut source = MockSource::with_guild("g1", "srv");
        source.add_channel("c1", "general", history(40));

        let pacer = zero_pacer();
        let syncer = Syncer::new(&db, &source, &pacer);
        syncer.sync_guild(Some("g1"), SyncMode::Full).await.unwrap();
        syncer.sync_guild(Some("g1"), SyncMode::Full).await.unwrap();

        assert_eq!(db.count_messages(), 40);
    }
}

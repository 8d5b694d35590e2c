use crate::config::Config;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{Connection, OptionalExtension, Result};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// A message row the embedding indexer has not processed yet.
pub struct UnindexedMessage {
    pub id: String,
    pub channel_id: String,
    pub content: String,
    pub created_at: String,
}

/// Shared handle to the SQLite mirror. Cloning is cheap; every store call
/// locks the connection for exactly one logical unit of work.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn new(config: &Config) -> Result<Self> {
        let conn = Connection::open(&config.database_url)?;
        // FK enforcement is per-connection in SQLite; the cascade rules in
        // the schema are inert without it.
        conn.pragma_update(None, "foreign_keys", "ON")?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn execute_init(&self) -> anyhow::Result<()> {
        info!("Database: Initializing schema...");
        let sql = "
            CREATE TABLE IF NOT EXISTS servers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                discord_server_id TEXT NOT NULL UNIQUE,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            CREATE TABLE IF NOT EXISTS channels (
                id TEXT PRIMARY KEY,
                server_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                parent_channel_id TEXT,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (server_id) REFERENCES servers(id) ON DELETE CASCADE,
                FOREIGN KEY (parent_channel_id) REFERENCES channels(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT NOT NULL,
                discord_user_id TEXT NOT NULL UNIQUE,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                channel_id TEXT NOT NULL,
                user_id INTEGER NOT NULL,
                content TEXT,
                created_at DATETIME NOT NULL,
                is_indexed BOOLEAN DEFAULT FALSE,
                FOREIGN KEY (channel_id) REFERENCES channels(id) ON DELETE CASCADE,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_messages_created_at ON messages (created_at);
        ";
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(sql)?;
        debug!("Database: Schema initialized successfully");
        Ok(())
    }

    /// Returns the surrogate id for the guild, creating the row on first
    /// observation and refreshing the stored name otherwise.
    pub fn upsert_server(&self, discord_server_id: &str, name: &str) -> anyhow::Result<i64> {
        let conn = self.conn.lock().unwrap();
        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM servers WHERE discord_server_id = ?1",
                [discord_server_id],
                |row| row.get(0),
            )
            .optional()?;

        match existing {
            Some(id) => {
                conn.execute("UPDATE servers SET name = ?1 WHERE id = ?2", (name, id))?;
                Ok(id)
            }
            None => {
                conn.execute(
                    "INSERT INTO servers (name, discord_server_id) VALUES (?1, ?2)",
                    (name, discord_server_id),
                )?;
                Ok(conn.last_insert_rowid())
            }
        }
    }

    /// Inserts or refreshes a channel row. The stored parent id is only
    /// replaced when this call supplies one; parents are never auto-created,
    /// so callers must insert a parent channel before any of its threads.
    pub fn upsert_channel(
        &self,
        channel_id: &str,
        server_id: i64,
        name: &str,
        parent_channel_id: Option<&str>,
    ) -> anyhow::Result<()> {
        debug!("Database: Upserting channel {} ({})", channel_id, name);
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO channels (id, server_id, name, parent_channel_id)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 parent_channel_id = COALESCE(excluded.parent_channel_id, channels.parent_channel_id)",
            (channel_id, server_id, name, parent_channel_id),
        )?;
        Ok(())
    }

    /// Returns the surrogate id for the user, creating the row on first
    /// observation and updating the display tag in place when it changed.
    pub fn upsert_user(&self, discord_user_id: &str, username: &str) -> anyhow::Result<i64> {
        let conn = self.conn.lock().unwrap();
        let existing: Option<(i64, String)> = conn
            .query_row(
                "SELECT id, username FROM users WHERE discord_user_id = ?1",
                [discord_user_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match existing {
            Some((id, stored)) => {
                if stored != username {
                    conn.execute("UPDATE users SET username = ?1 WHERE id = ?2", (username, id))?;
                }
                Ok(id)
            }
            None => {
                conn.execute(
                    "INSERT INTO users (username, discord_user_id) VALUES (?1, ?2)",
                    (username, discord_user_id),
                )?;
                Ok(conn.last_insert_rowid())
            }
        }
    }

    /// Inserts a message, or refreshes content and creation time in place
    /// when the id is already stored. Handles edits and backfill without
    /// ever producing a duplicate row.
    pub fn upsert_message(
        &self,
        message_id: &str,
        channel_id: &str,
        user_db_id: i64,
        content: &str,
        created_at: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        debug!(
            "Database: Upserting message {} in channel {}",
            message_id, channel_id
        );
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO messages (id, channel_id, user_id, content, created_at)
             VALUES (?1, ?2, ?3, ?4, datetime(?5, 'unixepoch'))
             ON CONFLICT(id) DO UPDATE SET
                 content = excluded.content,
                 created_at = excluded.created_at",
            (message_id, channel_id, user_db_id, content, created_at.timestamp()),
        )?;
        Ok(())
    }

    /// Maximum stored message creation time across all channels of the
    /// guild, or None when nothing is stored yet. Used as the differential
    /// sync watermark.
    pub fn latest_message_timestamp(
        &self,
        discord_server_id: &str,
    ) -> anyhow::Result<Option<DateTime<Utc>>> {
        let conn = self.conn.lock().unwrap();
        let ts: Option<i64> = conn.query_row(
            "SELECT CAST(strftime('%s', MAX(m.created_at)) AS INTEGER)
             FROM messages m
             JOIN channels c ON m.channel_id = c.id
             JOIN servers s ON c.server_id = s.id
             WHERE s.discord_server_id = ?1",
            [discord_server_id],
            |row| row.get(0),
        )?;
        Ok(ts.and_then(|t| Utc.timestamp_opt(t, 0).single()))
    }

    pub fn channel_exists(&self, channel_id: &str) -> anyhow::Result<bool> {
        let conn = self.conn.lock().unwrap();
        let exists = conn
            .prepare("SELECT 1 FROM channels WHERE id = ?1")?
            .exists([channel_id])?;
        Ok(exists)
    }

    // --- Embedding pipeline feed ---

    pub fn unindexed_messages(&self, limit: usize) -> anyhow::Result<Vec<UnindexedMessage>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, channel_id, content, created_at FROM messages
             WHERE is_indexed = FALSE
             ORDER BY created_at
             LIMIT ?1",
        )?;
        let rows = stmt.query_map([limit], |row| {
            Ok(UnindexedMessage {
                id: row.get(0)?,
                channel_id: row.get(1)?,
                content: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                created_at: row.get(3)?,
            })
        })?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    pub fn mark_message_indexed(&self, message_id: &str) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE messages SET is_indexed = TRUE WHERE id = ?1",
            [message_id],
        )?;
        Ok(())
    }
}

#[cfg(test)]
impl Database {
    pub(crate) fn count_messages(&self) -> i64 {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))
            .unwrap()
    }

    pub(crate) fn channel_parent(&self, channel_id: &str) -> Option<String> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT parent_channel_id FROM channels WHERE id = ?1",
            [channel_id],
            |row| row.get(0),
        )
        .optional()
        .unwrap()
        .flatten()
    }

    pub(crate) fn channel_name(&self, channel_id: &str) -> Option<String> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT name FROM channels WHERE id = ?1",
            [channel_id],
            |row| row.get(0),
        )
        .optional()
        .unwrap()
    }
}

#[cfg(test)]
pub(crate) fn test_database_uninitialized() -> Database {
    let config = Config {
        discord_token: "test".to_string(),
        application_id: 0,
        database_url: ":memory:".to_string(),
        status_message: "test".to_string(),
        history_fetch_delay_secs: 0,
        embedding_url: "test".to_string(),
        embedding_model: "test".to_string(),
        embedding_api_key: None,
        embedding_indexer_enabled: false,
        embedding_indexer_batch_size: 25,
        embedding_indexer_interval_secs: 300,
        vector_index_url: "test".to_string(),
        vector_index_collection: "test".to_string(),
    };
    Database::new(&config).unwrap()
}

#[cfg(test)]
pub(crate) fn test_database() -> Database {
    let db = test_database_uninitialized();
    db.execute_init().unwrap();
    db
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_server_upsert_is_idempotent() {
        let db = test_database();

        let id1 = db.upsert_server("g1", "My Server").unwrap();
        let id2 = db.upsert_server("g1", "Renamed Server").unwrap();
        assert_eq!(id1, id2);

        let conn = db.conn.lock().unwrap();
        let (count, name): (i64, String) = conn
            .query_row(
                "SELECT COUNT(*), MAX(name) FROM servers WHERE discord_server_id = 'g1'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(name, "Renamed Server");
    }

    #[test]
    fn test_user_upsert_updates_tag() {
        let db = test_database();

        let id1 = db.upsert_user("u1", "alice#0001").unwrap();
        let id2 = db.upsert_user("u1", "alice#0001").unwrap();
        assert_eq!(id1, id2);

        let id3 = db.upsert_user("u1", "alice_renamed").unwrap();
        assert_eq!(id1, id3);

        let conn = db.conn.lock().unwrap();
        let name: String = conn
            .query_row("SELECT username FROM users WHERE id = ?1", [id1], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(name, "alice_renamed");
    }

    #[test]
    fn test_channel_upsert_keeps_parent_when_not_supplied() {
        let db = test_database();
        let server_id = db.upsert_server("g1", "srv").unwrap();

        db.upsert_channel("c1", server_id, "general", None).unwrap();
        db.upsert_channel("t1", server_id, "thread", Some("c1")).unwrap();

        // A later upsert without a parent must not clear the stored one.
        db.upsert_channel("t1", server_id, "thread-renamed", None).unwrap();

        let conn = db.conn.lock().unwrap();
        let (name, parent): (String, Option<String>) = conn
            .query_row(
                "SELECT name, parent_channel_id FROM channels WHERE id = 't1'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(name, "thread-renamed");
        assert_eq!(parent, Some("c1".to_string()));
    }

    #[test]
    fn test_message_upsert_refreshes_in_place() {
        let db = test_database();
        let server_id = db.upsert_server("g1", "srv").unwrap();
        db.upsert_channel("c1", server_id, "general", None).unwrap();
        let user_id = db.upsert_user("u1", "alice#0001").unwrap();

        db.upsert_message("m1", "c1", user_id, "hello", ts(1_600_000_000))
            .unwrap();
        db.upsert_message("m1", "c1", user_id, "hello (edited)", ts(1_600_000_100))
            .unwrap();

        assert_eq!(db.count_messages(), 1);

        let conn = db.conn.lock().unwrap();
        let content: String = conn
            .query_row("SELECT content FROM messages WHERE id = 'm1'", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(content, "hello (edited)");
    }

    #[test]
    fn test_latest_message_timestamp_scoped_per_guild() {
        let db = test_database();

        let s1 = db.upsert_server("g1", "srv1").unwrap();
        let s2 = db.upsert_server("g2", "srv2").unwrap();
        db.upsert_channel("c1", s1, "general", None).unwrap();
        db.upsert_channel("c2", s1, "random", None).unwrap();
        db.upsert_channel("c3", s2, "other", None).unwrap();
        let user_id = db.upsert_user("u1", "alice#0001").unwrap();

        assert!(db.latest_message_timestamp("g1").unwrap().is_none());

        db.upsert_message("m1", "c1", user_id, "a", ts(1_600_000_000)).unwrap();
        db.upsert_message("m2", "c2", user_id, "b", ts(1_600_000_500)).unwrap();
        db.upsert_message("m3", "c3", user_id, "c", ts(1_700_000_000)).unwrap();

        // Max is taken across the guild's channels only.
        assert_eq!(
            db.latest_message_timestamp("g1").unwrap(),
            Some(ts(1_600_000_500))
        );
        assert_eq!(
            db.latest_message_timestamp("g2").unwrap(),
            Some(ts(1_700_000_000))
        );
        assert!(db.latest_message_timestamp("unknown").unwrap().is_none());
    }

    #[test]
    fn test_cascade_delete() {
        let db = test_database();
        let server_id = db.upsert_server("g1", "srv").unwrap();
        db.upsert_channel("c1", server_id, "general", None).unwrap();
        db.upsert_channel("t1", server_id, "thread", Some("c1")).unwrap();
        let user_id = db.upsert_user("u1", "alice#0001").unwrap();
        db.upsert_message("m1", "c1", user_id, "a", ts(1_600_000_000)).unwrap();
        db.upsert_message("m2", "t1", user_id, "b", ts(1_600_000_001)).unwrap();

        // Deleting the parent channel takes the thread and both message rows.
        {
            let conn = db.conn.lock().unwrap();
            conn.execute("DELETE FROM channels WHERE id = 'c1'", []).unwrap();
        }
        assert!(!db.channel_exists("t1").unwrap());
        assert_eq!(db.count_messages(), 0);

        // Deleting the server takes its remaining channels.
        db.upsert_channel("c2", server_id, "general2", None).unwrap();
        {
            let conn = db.conn.lock().unwrap();
            conn.execute("DELETE FROM servers WHERE id = ?1", [server_id]).unwrap();
        }
        assert!(!db.channel_exists("c2").unwrap());
    }

    #[test]
    fn test_message_requires_existing_channel() {
        let db = test_database();
        let user_id = db.upsert_user("u1", "alice#0001").unwrap();

        let result = db.upsert_message("m1", "missing", user_id, "a", ts(1_600_000_000));
        assert!(result.is_err());
    }

    #[test]
    fn test_unindexed_feed() {
        let db = test_database();
        let server_id = db.upsert_server("g1", "srv").unwrap();
        db.upsert_channel("c1", server_id, "general", None).unwrap();
        let user_id = db.upsert_user("u1", "alice#0001").unwrap();

        db.upsert_message("m1", "c1", user_id, "first", ts(1_600_000_000)).unwrap();
        db.upsert_message("m2", "c1", user_id, "second", ts(1_600_000_001)).unwrap();

        let pending = db.unindexed_messages(10).unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].id, "m1");

        db.mark_message_indexed("m1").unwrap();
        let pending = db.unindexed_messages(10).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "m2");
    }
}

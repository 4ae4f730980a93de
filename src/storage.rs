//! Local channel: a `SQLite` stand-in for the chat platform.
//!
//! One database file emulates one workspace. Messages keep their blocks as
//! JSON, exactly as the platform would return them, so the notifier's
//! correlation scan runs unchanged against it.
//!
//! ```text
//! channel  (id, name)
//! member   (id, name)
//! message  (ts, channel, member, thread_ts, text, blocks, posted_at)
//! ```

use std::{fs, io, path::PathBuf};

use jiff::Timestamp;
use rusqlite::{Connection, OptionalExtension};
use uuid::Uuid;

use crate::model::{Block, Message};
use crate::transport::{self, Transport, Window};

/// Errors that can occur during local channel operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("message not found: {0}")]
    MessageNotFound(String),

    #[error("corrupt channel data: {0}")]
    Corrupt(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = core::result::Result<T, StorageError>;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS channel (
        id   TEXT PRIMARY KEY,
        name TEXT NOT NULL UNIQUE
    );
    CREATE TABLE IF NOT EXISTS member (
        id   TEXT PRIMARY KEY,
        name TEXT NOT NULL UNIQUE
    );
    CREATE TABLE IF NOT EXISTS message (
        ts        TEXT PRIMARY KEY,
        channel   TEXT NOT NULL,
        member    TEXT NOT NULL,
        thread_ts TEXT,
        text      TEXT,
        blocks    TEXT NOT NULL,
        posted_at INTEGER NOT NULL
    );
";

/// A local channel database.
///
/// Messages posted through it are attributed to the poster it was opened with.
pub struct ChannelStore {
    path: PathBuf,
    poster_id: String,
}

impl ChannelStore {
    /// Opens (or creates) the database and registers the poster.
    pub fn open(path: impl Into<PathBuf>, poster: &str) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&path)?;
        conn.execute_batch(SCHEMA)?;

        let mut store = Self {
            path,
            poster_id: String::new(),
        };
        store.poster_id = store.ensure_user(poster)?;
        Ok(store)
    }

    /// Returns the default database path: `~/.buildbot/channel.sqlite`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".buildbot").join("channel.sqlite"))
    }

    pub fn poster_id(&self) -> &str {
        &self.poster_id
    }

    /// Channel id for `name`, creating the channel if needed.
    pub fn ensure_channel(&self, name: &str) -> Result<String> {
        self.ensure_named("channel", 'C', name)
    }

    /// User id for `name`, creating the user if needed.
    pub fn ensure_user(&self, name: &str) -> Result<String> {
        self.ensure_named("member", 'U', name)
    }

    /// Inserts a message as `member` at `at`.
    pub fn insert_message(
        &self,
        channel: &str,
        member: &str,
        thread_ts: Option<&str>,
        text: Option<&str>,
        blocks: &[Block],
        at: Timestamp,
    ) -> Result<Message> {
        let conn = self.conn()?;
        let seq: i64 = conn.query_row(
            "SELECT COALESCE(MAX(rowid), 0) + 1 FROM message",
            [],
            |row| row.get(0),
        )?;
        let ts = format!("{}.{seq:06}", at.as_second());

        conn.execute(
            "INSERT INTO message (ts, channel, member, thread_ts, text, blocks, posted_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                &ts,
                channel,
                member,
                thread_ts,
                text,
                serde_json::to_string(blocks)?,
                at.as_millisecond(),
            ],
        )?;

        Ok(Message {
            ts,
            user: Some(member.to_string()),
            blocks: blocks.to_vec(),
        })
    }

    /// Loads a single message.
    pub fn load_message(&self, channel: &str, ts: &str) -> Result<Message> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT ts, member, blocks FROM message WHERE channel = ?1 AND ts = ?2",
            rusqlite::params![channel, ts],
            message_row,
        )
        .optional()?
        .ok_or_else(|| StorageError::MessageNotFound(ts.to_string()))?
    }

    /// Texts of the replies in a message's thread, oldest first.
    pub fn replies(&self, channel: &str, thread_ts: &str) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT COALESCE(text, '') FROM message
             WHERE channel = ?1 AND thread_ts = ?2
             ORDER BY posted_at, rowid",
        )?;
        let texts = stmt
            .query_map(rusqlite::params![channel, thread_ts], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(texts)
    }

    fn ensure_named(&self, table: &str, prefix: char, name: &str) -> Result<String> {
        let conn = self.conn()?;
        if let Some(id) = lookup(&conn, table, "name", name, "id")? {
            return Ok(id);
        }

        let id = format!("{prefix}{}", short_id());
        conn.execute(
            &format!("INSERT INTO {table} (id, name) VALUES (?1, ?2)"),
            rusqlite::params![&id, name],
        )?;
        Ok(id)
    }

    fn conn(&self) -> Result<Connection> {
        Ok(Connection::open(&self.path)?)
    }
}

impl Transport for ChannelStore {
    fn find_channel(&self, name: &str) -> transport::Result<Option<String>> {
        Ok(lookup(&self.conn()?, "channel", "name", name, "id")?)
    }

    fn history(&self, channel: &str, window: Window) -> transport::Result<Vec<Message>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT ts, member, blocks FROM message
                 WHERE channel = ?1 AND thread_ts IS NULL AND posted_at BETWEEN ?2 AND ?3
                 ORDER BY posted_at DESC, rowid DESC
                 LIMIT ?4",
            )
            .map_err(StorageError::from)?;
        let rows = stmt
            .query_map(
                rusqlite::params![
                    channel,
                    window.oldest.as_millisecond(),
                    window.latest.as_millisecond(),
                    i64::try_from(window.limit).unwrap_or(i64::MAX),
                ],
                message_row,
            )
            .map_err(StorageError::from)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row.map_err(StorageError::from)??);
        }
        Ok(messages)
    }

    fn user_name(&self, user_id: &str) -> transport::Result<Option<String>> {
        Ok(lookup(&self.conn()?, "member", "id", user_id, "name")?)
    }

    fn find_user(&self, name: &str) -> transport::Result<Option<String>> {
        Ok(lookup(&self.conn()?, "member", "name", name, "id")?)
    }

    fn post(&self, channel: &str, blocks: &[Block]) -> transport::Result<Message> {
        self.require_channel(channel)?;
        Ok(self.insert_message(channel, &self.poster_id, None, None, blocks, Timestamp::now())?)
    }

    fn update(&self, channel: &str, ts: &str, blocks: &[Block]) -> transport::Result<Message> {
        let conn = self.conn()?;
        let rows = conn
            .execute(
                "UPDATE message SET blocks = ?1 WHERE channel = ?2 AND ts = ?3",
                rusqlite::params![
                    serde_json::to_string(blocks).map_err(StorageError::from)?,
                    channel,
                    ts,
                ],
            )
            .map_err(StorageError::from)?;
        if rows == 0 {
            return Err(StorageError::MessageNotFound(ts.to_string()).into());
        }
        Ok(self.load_message(channel, ts)?)
    }

    fn reply(&self, channel: &str, thread_ts: &str, text: &str) -> transport::Result<Message> {
        self.require_channel(channel)?;
        Ok(self.insert_message(
            channel,
            &self.poster_id,
            Some(thread_ts),
            Some(text),
            &[],
            Timestamp::now(),
        )?)
    }
}

impl ChannelStore {
    fn require_channel(&self, channel: &str) -> transport::Result<()> {
        let known = lookup(&self.conn()?, "channel", "id", channel, "id")?;
        match known {
            Some(_) => Ok(()),
            None => Err(transport::TransportError::ChannelNotFound(channel.to_string())),
        }
    }
}

/// Single-column lookup: `SELECT <column> FROM <table> WHERE <key> = ?`.
fn lookup(
    conn: &Connection,
    table: &str,
    key: &str,
    value: &str,
    column: &str,
) -> Result<Option<String>> {
    Ok(conn
        .query_row(
            &format!("SELECT {column} FROM {table} WHERE {key} = ?1"),
            [value],
            |row| row.get(0),
        )
        .optional()?)
}

/// Reads a `(ts, member, blocks)` row. Block JSON errors surface as the
/// inner result so a corrupt row doesn't masquerade as a SQL error.
fn message_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<Message>> {
    let ts: String = row.get(0)?;
    let user: String = row.get(1)?;
    let blocks: String = row.get(2)?;

    Ok(serde_json::from_str(&blocks)
        .map(|blocks| Message {
            ts,
            user: Some(user),
            blocks,
        })
        .map_err(|e| StorageError::Corrupt(format!("invalid blocks: {e}"))))
}

fn short_id() -> String {
    Uuid::new_v4().simple().to_string()[..10].to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    use jiff::SignedDuration;
    use tempfile::TempDir;

    use crate::model::{BlockName, Content};

    fn test_store() -> (TempDir, ChannelStore) {
        let dir = TempDir::new().unwrap();
        let store = ChannelStore::open(dir.path().join("channel.sqlite"), "BuildBot").unwrap();
        (dir, store)
    }

    fn status(text: &str) -> Vec<Block> {
        vec![Block::new(BlockName::Status, Content::Text(text.into()))]
    }

    #[test]
    fn ensure_is_idempotent() {
        let (_dir, store) = test_store();

        let first = store.ensure_channel("deployments").unwrap();
        let second = store.ensure_channel("deployments").unwrap();

        assert_eq!(first, second);
        assert!(first.starts_with('C'));
        assert_eq!(store.ensure_user("BuildBot").unwrap(), store.poster_id());
    }

    #[test]
    fn finds_channels_and_users() {
        let (_dir, store) = test_store();
        let channel = store.ensure_channel("deployments").unwrap();

        assert_eq!(store.find_channel("deployments").unwrap(), Some(channel));
        assert_eq!(store.find_channel("random").unwrap(), None);
        assert_eq!(
            store.user_name(store.poster_id()).unwrap().as_deref(),
            Some("BuildBot")
        );
        assert_eq!(
            store.find_user("BuildBot").unwrap().as_deref(),
            Some(store.poster_id())
        );
    }

    #[test]
    fn post_then_update() {
        let (_dir, store) = test_store();
        let channel = store.ensure_channel("deployments").unwrap();

        let posted = store.post(&channel, &status("one")).unwrap();
        let updated = store.update(&channel, &posted.ts, &status("two")).unwrap();

        assert_eq!(updated.ts, posted.ts);
        assert_eq!(updated.blocks, status("two"));
        assert_eq!(updated.user.as_deref(), Some(store.poster_id()));
    }

    #[test]
    fn update_unknown_message_fails() {
        let (_dir, store) = test_store();
        let channel = store.ensure_channel("deployments").unwrap();

        let err = store.update(&channel, "1.000001", &status("x")).unwrap_err();

        assert!(matches!(
            err,
            transport::TransportError::Storage(StorageError::MessageNotFound(_))
        ));
    }

    #[test]
    fn post_to_unknown_channel_fails() {
        let (_dir, store) = test_store();
        let err = store.post("CNOPE", &status("x")).unwrap_err();

        assert!(matches!(err, transport::TransportError::ChannelNotFound(_)));
    }

    #[test]
    fn history_is_windowed_newest_first_without_replies() {
        let (_dir, store) = test_store();
        let channel = store.ensure_channel("deployments").unwrap();
        let now = Timestamp::now();
        let poster = store.poster_id().to_string();

        let old = now - SignedDuration::from_mins(45);
        store
            .insert_message(&channel, &poster, None, None, &status("old"), old)
            .unwrap();
        let first = store
            .insert_message(
                &channel,
                &poster,
                None,
                None,
                &status("first"),
                now - SignedDuration::from_mins(10),
            )
            .unwrap();
        let second = store
            .insert_message(
                &channel,
                &poster,
                None,
                None,
                &status("second"),
                now - SignedDuration::from_mins(5),
            )
            .unwrap();
        store.reply(&channel, &first.ts, "thread reply").unwrap();
        assert_eq!(store.replies(&channel, &first.ts).unwrap(), ["thread reply"]);

        let window = Window::ending_at(now, SignedDuration::from_mins(30), 200);
        let history = store.history(&channel, window).unwrap();

        let ts: Vec<&str> = history.iter().map(|m| m.ts.as_str()).collect();
        assert_eq!(ts, [second.ts.as_str(), first.ts.as_str()]);
    }

    #[test]
    fn history_respects_limit() {
        let (_dir, store) = test_store();
        let channel = store.ensure_channel("deployments").unwrap();
        for i in 0..3 {
            store.post(&channel, &status(&i.to_string())).unwrap();
        }

        let window = Window::ending_at(
            Timestamp::now() + SignedDuration::from_secs(1),
            SignedDuration::from_mins(30),
            2,
        );
        assert_eq!(store.history(&channel, window).unwrap().len(), 2);
    }
}

//! Persistent storage of chats and their messages.
//!
//! One embedded SQLite file holds a root `chats` partition and one logical
//! `chat-<id>` partition per chat, each with its own monotonic sequence
//! counter. Durable ids are the zero-padded sequence number prefixed onto the
//! caller's candidate id, so ids sort lexicographically in insertion order.
//! Every operation runs in its own transaction; `update_message` is called on
//! every streamed delta and must stay cheap.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use rusqlite::{params, Connection};

use crate::models::{Chat, Message};

pub struct MessageStore {
    conn: Mutex<Connection>,
}

impl MessageStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path.as_ref()).with_context(|| {
            format!("failed to open store at {}", path.as_ref().display())
        })?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .context("failed to set store pragmas")?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory store")?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        self.lock()
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS chats (
                    id   TEXT PRIMARY KEY,
                    seq  INTEGER NOT NULL,
                    body TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS messages (
                    chat_id TEXT NOT NULL,
                    id      TEXT NOT NULL,
                    seq     INTEGER NOT NULL,
                    body    TEXT NOT NULL,
                    PRIMARY KEY (chat_id, id)
                );

                CREATE TABLE IF NOT EXISTS sequences (
                    partition TEXT PRIMARY KEY,
                    value     INTEGER NOT NULL
                );",
            )
            .context("store migration failed")?;
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        // A poisoning panic in another writer must not wedge the store.
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// All chats, newest first.
    pub fn list_chats(&self) -> Result<Vec<Chat>> {
        let conn = self.lock();
        let mut stmt = conn.prepare("SELECT body FROM chats ORDER BY seq DESC")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut chats = Vec::new();
        for body in rows {
            chats.push(serde_json::from_str(&body?).context("failed to decode chat record")?);
        }
        Ok(chats)
    }

    /// Store a new chat, assigning its durable id. The chat's message
    /// partition is created along with it.
    pub fn add_chat(&self, mut chat: Chat) -> Result<String> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let seq = next_sequence(&tx, "chats")?;
        chat.id = format!("{seq:020}-{}", chat.id);
        tx.execute(
            "INSERT OR IGNORE INTO sequences (partition, value) VALUES (?1, 0)",
            params![message_partition(&chat.id)],
        )?;
        let body = serde_json::to_string(&chat)?;
        tx.execute(
            "INSERT INTO chats (id, seq, body) VALUES (?1, ?2, ?3)",
            params![chat.id, seq, body],
        )?;
        tx.commit()?;
        Ok(chat.id)
    }

    /// Overwrite a chat record. Unknown ids are silently ignored.
    pub fn update_chat(&self, chat: &Chat) -> Result<()> {
        let body = serde_json::to_string(chat)?;
        self.lock().execute(
            "UPDATE chats SET body = ?2 WHERE id = ?1",
            params![chat.id, body],
        )?;
        Ok(())
    }

    /// All messages of a chat in insertion order.
    pub fn list_messages(&self, chat_id: &str) -> Result<Vec<Message>> {
        let conn = self.lock();
        let mut stmt =
            conn.prepare("SELECT body FROM messages WHERE chat_id = ?1 ORDER BY seq ASC")?;
        let rows = stmt.query_map(params![chat_id], |row| row.get::<_, String>(0))?;
        let mut messages = Vec::new();
        for body in rows {
            messages
                .push(serde_json::from_str(&body?).context("failed to decode message record")?);
        }
        Ok(messages)
    }

    /// Store a new message in the chat's partition, assigning its durable id.
    pub fn add_message(&self, chat_id: &str, mut message: Message) -> Result<String> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let seq = next_sequence(&tx, &message_partition(chat_id))?;
        message.id = format!("{seq:020}-{}", message.id);
        let body = serde_json::to_string(&message)?;
        tx.execute(
            "INSERT INTO messages (chat_id, id, seq, body) VALUES (?1, ?2, ?3, ?4)",
            params![chat_id, message.id, seq, body],
        )?;
        tx.commit()?;
        Ok(message.id)
    }

    /// Overwrite the record at `message.id`. Unknown ids are silently
    /// ignored. This runs once per streamed delta.
    pub fn update_message(&self, chat_id: &str, message: &Message) -> Result<()> {
        let body = serde_json::to_string(message)?;
        self.lock().execute(
            "UPDATE messages SET body = ?3 WHERE chat_id = ?1 AND id = ?2",
            params![chat_id, message.id, body],
        )?;
        Ok(())
    }
}

fn message_partition(chat_id: &str) -> String {
    format!("chat-{chat_id}")
}

fn next_sequence(conn: &Connection, partition: &str) -> Result<i64> {
    conn.execute(
        "INSERT INTO sequences (partition, value) VALUES (?1, 1)
         ON CONFLICT(partition) DO UPDATE SET value = value + 1",
        params![partition],
    )?;
    let value = conn.query_row(
        "SELECT value FROM sequences WHERE partition = ?1",
        params![partition],
        |row| row.get(0),
    )?;
    Ok(value)
}

//! Local SQLite thread store.
//!
//! Drop-in stand-in for the Supabase backend during development. Messages are
//! stored as JSON blobs; multi-part content is flattened to plain text on
//! read, which is the shape the model provider and summarizer expect from
//! history.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{Connection, params};
use uuid::Uuid;

use kestrel_types::{Message, MessageContent, Role, Thread, ThreadConfig};

use crate::error::{Result, StoreError};
use crate::ThreadStore;

/// SQLite-backed [`ThreadStore`].
pub struct LocalStore {
    conn: Mutex<Connection>,
}

impl LocalStore {
    /// Open (and create if needed) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Config(format!("cannot create db dir: {e}")))?;
        }
        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open the path from `LOCAL_DB_PATH`, defaulting to `./data/threads.db`.
    pub fn open_from_env() -> Result<Self> {
        let path = std::env::var("LOCAL_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("data/threads.db"));
        Self::open(path)
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS threads (
                id TEXT PRIMARY KEY,
                created_at TEXT NOT NULL,
                user_id TEXT,
                kafka_profile_id TEXT,
                metadata TEXT,
                sandbox_id TEXT
            );

            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                thread_id TEXT NOT NULL,
                seq INTEGER NOT NULL,
                message TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (thread_id) REFERENCES threads(id)
            );

            CREATE INDEX IF NOT EXISTS idx_messages_thread_id
            ON messages(thread_id, seq);
            "#,
        )?;
        Ok(())
    }

    /// Flatten multi-part content to joined text, dropping image parts.
    fn flatten_content(mut message: Message) -> Message {
        if let Some(MessageContent::Parts(_)) = &message.content {
            let text = message.text();
            message.content = if text.is_empty() {
                None
            } else {
                Some(MessageContent::Text(text))
            };
        }
        message
    }

    fn insert_message(conn: &Connection, thread_id: &str, message: &Message) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let seq: i64 = conn.query_row(
            "SELECT COALESCE(MAX(seq), 0) + 1 FROM messages WHERE thread_id = ?1",
            params![thread_id],
            |row| row.get(0),
        )?;
        conn.execute(
            "INSERT INTO messages (id, thread_id, seq, message, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                id,
                thread_id,
                seq,
                serde_json::to_string(message)?,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(id)
    }
}

#[async_trait]
impl ThreadStore for LocalStore {
    async fn get_thread_messages(
        &self,
        thread_id: &str,
        limit: Option<usize>,
        include_system: bool,
    ) -> Result<Vec<Message>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn.prepare(
            "SELECT message FROM messages WHERE thread_id = ?1 ORDER BY seq ASC",
        )?;
        let mut rows = stmt.query(params![thread_id])?;

        let mut messages = Vec::new();
        while let Some(row) = rows.next()? {
            let raw: String = row.get(0)?;
            let message: Message = serde_json::from_str(&raw)?;
            if !include_system && message.role == Role::System {
                continue;
            }
            messages.push(Self::flatten_content(message));
            if let Some(limit) = limit {
                if messages.len() >= limit {
                    break;
                }
            }
        }
        Ok(messages)
    }

    async fn add_message(&self, thread_id: &str, message: &Message) -> Result<String> {
        let conn = self.conn.lock().unwrap();
        Self::insert_message(&conn, thread_id, message)
    }

    async fn add_messages(&self, thread_id: &str, messages: &[Message]) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut ids = Vec::with_capacity(messages.len());
        for message in messages {
            ids.push(Self::insert_message(&conn, thread_id, message)?);
        }
        Ok(ids)
    }

    async fn create_thread(
        &self,
        thread_id: Option<&str>,
        user_id: Option<&str>,
        kafka_profile_id: Option<&str>,
        system_message: Option<&str>,
    ) -> Result<Thread> {
        let id = thread_id
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let created_at = Utc::now();

        {
            let conn = self.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO threads (id, created_at, user_id, kafka_profile_id) VALUES (?1, ?2, ?3, ?4)",
                params![id, created_at.to_rfc3339(), user_id, kafka_profile_id],
            )?;

            if let Some(system) = system_message {
                Self::insert_message(&conn, &id, &Message::system(system))?;
            }
        }

        tracing::debug!(thread_id = %id, "created thread");

        Ok(Thread {
            id,
            created_at,
            user_id: user_id.map(str::to_string),
            kafka_profile_id: kafka_profile_id.map(str::to_string),
            sandbox_id: None,
            metadata: None,
        })
    }

    async fn thread_exists(&self, thread_id: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let exists: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM threads WHERE id = ?1",
                params![thread_id],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        Ok(exists.is_some())
    }

    async fn get_thread(&self, thread_id: &str) -> Result<Option<Thread>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT id, created_at, user_id, kafka_profile_id, metadata, sandbox_id FROM threads WHERE id = ?1",
                params![thread_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, Option<String>>(5)?,
                    ))
                },
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        let Some((id, created_at, user_id, kafka_profile_id, metadata, sandbox_id)) = row else {
            return Ok(None);
        };

        let created_at = chrono::DateTime::parse_from_rfc3339(&created_at)
            .map(|dt| dt.with_timezone(&chrono::Utc))
            .unwrap_or_else(|_| Utc::now());
        let metadata = metadata.and_then(|m| serde_json::from_str(&m).ok());

        Ok(Some(Thread {
            id,
            created_at,
            user_id,
            kafka_profile_id,
            sandbox_id,
            metadata,
        }))
    }

    async fn delete_thread_messages(&self, thread_id: &str) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute(
            "DELETE FROM messages WHERE thread_id = ?1",
            params![thread_id],
        )?;
        Ok(deleted)
    }

    async fn get_thread_sandbox_id(&self, thread_id: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let sandbox_id: Option<String> = conn
            .query_row(
                "SELECT sandbox_id FROM threads WHERE id = ?1",
                params![thread_id],
                |row| row.get(0),
            )
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        Ok(sandbox_id)
    }

    async fn update_thread_sandbox_id(&self, thread_id: &str, sandbox_id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE threads SET sandbox_id = ?1 WHERE id = ?2",
            params![sandbox_id, thread_id],
        )?;
        if updated == 0 {
            return Err(StoreError::ThreadNotFound(thread_id.to_string()));
        }
        Ok(())
    }

    async fn get_thread_config(&self, _thread_id: &str) -> Result<Option<ThreadConfig>> {
        // The local database has no profile joins; callers fall back to
        // process environment defaults.
        Ok(None)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_types::ToolCall;

    async fn store() -> LocalStore {
        LocalStore::open_in_memory().unwrap()
    }

    #[tokio::test]
    async fn test_create_and_exists() {
        let store = store().await;
        let thread = store
            .create_thread(None, Some("u1"), None, None)
            .await
            .unwrap();
        assert!(store.thread_exists(&thread.id).await.unwrap());
        assert!(!store.thread_exists("missing").await.unwrap());
    }

    #[tokio::test]
    async fn test_messages_ordered_roundtrip() {
        let store = store().await;
        let thread = store.create_thread(None, None, None, None).await.unwrap();

        store
            .add_message(&thread.id, &Message::user("first"))
            .await
            .unwrap();
        store
            .add_messages(
                &thread.id,
                &[
                    Message::assistant_tool_calls(
                        None,
                        vec![ToolCall::function("c1", "run", "{}")],
                    ),
                    Message::tool("output", "c1", "run"),
                ],
            )
            .await
            .unwrap();

        let messages = store
            .get_thread_messages(&thread.id, None, true)
            .await
            .unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].text(), "first");
        assert!(messages[1].has_tool_calls());
        assert_eq!(messages[2].tool_call_id.as_deref(), Some("c1"));
    }

    #[tokio::test]
    async fn test_system_message_filtering() {
        let store = store().await;
        let thread = store
            .create_thread(None, None, None, Some("be helpful"))
            .await
            .unwrap();
        store
            .add_message(&thread.id, &Message::user("hi"))
            .await
            .unwrap();

        let all = store
            .get_thread_messages(&thread.id, None, true)
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].role, Role::System);

        let without = store
            .get_thread_messages(&thread.id, None, false)
            .await
            .unwrap();
        assert_eq!(without.len(), 1);
        assert_eq!(without[0].role, Role::User);
    }

    #[tokio::test]
    async fn test_multipart_content_flattened_on_read() {
        let store = store().await;
        let thread = store.create_thread(None, None, None, None).await.unwrap();

        let message: Message = serde_json::from_str(
            r#"{"role":"user","content":[{"type":"text","text":"a"},{"type":"text","text":"b"}]}"#,
        )
        .unwrap();
        store.add_message(&thread.id, &message).await.unwrap();

        let messages = store
            .get_thread_messages(&thread.id, None, true)
            .await
            .unwrap();
        assert_eq!(
            messages[0].content,
            Some(MessageContent::Text("a\nb".to_string()))
        );
    }

    #[tokio::test]
    async fn test_sandbox_binding() {
        let store = store().await;
        let thread = store.create_thread(None, None, None, None).await.unwrap();

        assert!(store
            .get_thread_sandbox_id(&thread.id)
            .await
            .unwrap()
            .is_none());
        store
            .update_thread_sandbox_id(&thread.id, "sb-1")
            .await
            .unwrap();
        assert_eq!(
            store.get_thread_sandbox_id(&thread.id).await.unwrap(),
            Some("sb-1".to_string())
        );

        assert!(store
            .update_thread_sandbox_id("missing", "sb-2")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_delete_thread_messages() {
        let store = store().await;
        let thread = store.create_thread(None, None, None, None).await.unwrap();
        store
            .add_messages(
                &thread.id,
                &[Message::user("a"), Message::assistant("b")],
            )
            .await
            .unwrap();

        let deleted = store.delete_thread_messages(&thread.id).await.unwrap();
        assert_eq!(deleted, 2);
        assert!(store
            .get_thread_messages(&thread.id, None, true)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_local_config_is_none() {
        let store = store().await;
        assert!(store.get_thread_config("any").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_open_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("threads.db");
        let store = LocalStore::open(&path).unwrap();
        let thread = store.create_thread(None, None, None, None).await.unwrap();
        drop(store);

        // Reopen and confirm persistence.
        let store = LocalStore::open(&path).unwrap();
        assert!(store.thread_exists(&thread.id).await.unwrap());
    }
}

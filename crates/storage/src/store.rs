//! SQLite message store implementation.

use crate::{Error, Message, Result, Role, StoredMessage, ThreadId, ThreadSummary, ToolCall};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Deserialize;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

/// SQLite-backed, per-thread, append-only message store.
///
/// The connection sits behind a mutex so one store can be shared by
/// concurrent conversations; every write is a single transaction.
pub struct MessageStore {
    conn: Mutex<Connection>,
}

#[derive(Debug, Deserialize)]
struct MessageRow {
    seq: i64,
    thread_id: String,
    role: String,
    content: String,
    tool_call: Option<String>,
    created_at: String,
}

#[derive(Debug, Deserialize)]
struct SummaryRow {
    thread_id: String,
    message_count: i64,
    first_message: Option<String>,
    created_at: String,
    updated_at: String,
}

impl MessageStore {
    /// Open or create a message store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get::<_, String>(0))?;
        conn.execute_batch("PRAGMA synchronous = FULL;")?;
        debug!(path = %path.as_ref().display(), "opened message store");
        Self::with_connection(conn)
    }

    /// Create an in-memory store (useful for testing).
    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.lock()?.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                thread_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                tool_call TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_messages_thread
                ON messages(thread_id, seq);
            CREATE TABLE IF NOT EXISTS threads (
                thread_id TEXT PRIMARY KEY,
                checkpoint INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Unavailable("connection lock poisoned".into()))
    }

    /// Append a message to a thread, creating the thread on first use.
    pub fn append(&self, thread_id: &ThreadId, message: &Message) -> Result<()> {
        self.append_all(thread_id, std::slice::from_ref(message))
    }

    /// Append several messages to a thread in one transaction.
    ///
    /// Either every message is committed or none is.
    pub fn append_all(&self, thread_id: &ThreadId, messages: &[Message]) -> Result<()> {
        if messages.is_empty() {
            return Ok(());
        }

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();

        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO messages (thread_id, role, content, tool_call, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for message in messages {
                let tool_call = message
                    .tool_call
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?;
                stmt.execute(params![
                    thread_id.as_str(),
                    message.role.as_str(),
                    message.content,
                    tool_call,
                    now,
                ])?;
            }
        }

        let checkpoint = tx.last_insert_rowid();
        tx.execute(
            "INSERT INTO threads (thread_id, checkpoint, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?3)
             ON CONFLICT(thread_id) DO UPDATE SET
                checkpoint = excluded.checkpoint,
                updated_at = excluded.updated_at",
            params![thread_id.as_str(), checkpoint, now],
        )?;
        tx.commit()?;

        debug!(thread_id = %thread_id, count = messages.len(), checkpoint, "appended messages");
        Ok(())
    }

    /// Load a thread's messages in append order. Unknown threads are empty.
    pub fn load(&self, thread_id: &ThreadId) -> Result<Vec<Message>> {
        Ok(self
            .load_stored(thread_id)?
            .into_iter()
            .map(|stored| stored.message)
            .collect())
    }

    /// Load a thread's messages along with their sequence numbers and timestamps.
    pub fn load_stored(&self, thread_id: &ThreadId) -> Result<Vec<StoredMessage>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(
            "SELECT seq, thread_id, role, content, tool_call, created_at FROM messages
             WHERE thread_id = ?1 ORDER BY seq",
        )?;

        serde_rusqlite::from_rows::<MessageRow>(stmt.query([thread_id.as_str()])?)
            .map(|row| stored_message(row?))
            .collect()
    }

    /// List every thread that has received at least one message,
    /// most recently updated first.
    pub fn list_threads(&self) -> Result<Vec<ThreadId>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare_cached("SELECT thread_id FROM threads ORDER BY checkpoint DESC")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        ids.into_iter().map(ThreadId::new).collect()
    }

    /// Summaries of every thread, most recently updated first.
    pub fn thread_summaries(&self) -> Result<Vec<ThreadSummary>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(
            "SELECT t.thread_id, t.created_at, t.updated_at,
                (SELECT COUNT(*) FROM messages m WHERE m.thread_id = t.thread_id)
                    AS message_count,
                (SELECT content FROM messages m
                    WHERE m.thread_id = t.thread_id AND m.role = 'user'
                    ORDER BY m.seq LIMIT 1) AS first_message
             FROM threads t ORDER BY t.checkpoint DESC",
        )?;

        serde_rusqlite::from_rows::<SummaryRow>(stmt.query([])?)
            .map(|row| {
                let row = row?;
                Ok(ThreadSummary {
                    thread_id: ThreadId::new(row.thread_id)?,
                    message_count: to_u64(row.message_count)?,
                    first_message: row.first_message,
                    created_at: parse_timestamp(&row.created_at)?,
                    updated_at: parse_timestamp(&row.updated_at)?,
                })
            })
            .collect()
    }

    /// The checkpoint marker of a thread: the sequence number of the last
    /// committed message, or `None` for an unknown thread.
    pub fn checkpoint(&self, thread_id: &ThreadId) -> Result<Option<u64>> {
        let checkpoint = self
            .lock()?
            .query_row(
                "SELECT checkpoint FROM threads WHERE thread_id = ?1",
                [thread_id.as_str()],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        checkpoint.map(to_u64).transpose()
    }

    /// Close the underlying connection.
    pub fn close(self) -> Result<()> {
        let conn = self
            .conn
            .into_inner()
            .map_err(|_| Error::Unavailable("connection lock poisoned".into()))?;
        conn.close().map_err(|(_, e)| Error::Database(e))
    }
}

fn stored_message(row: MessageRow) -> Result<StoredMessage> {
    let tool_call = row
        .tool_call
        .as_deref()
        .map(serde_json::from_str::<ToolCall>)
        .transpose()?;

    Ok(StoredMessage {
        seq: to_u64(row.seq)?,
        thread_id: ThreadId::new(row.thread_id)?,
        created_at: parse_timestamp(&row.created_at)?,
        message: Message {
            role: row.role.parse::<Role>()?,
            content: row.content,
            tool_call,
        },
    })
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| Error::Corrupt(format!("bad timestamp {raw:?}: {e}")))
}

fn to_u64(value: i64) -> Result<u64> {
    u64::try_from(value).map_err(|_| Error::Corrupt(format!("negative counter: {value}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thread(id: &str) -> ThreadId {
        ThreadId::new(id).unwrap()
    }

    #[test]
    fn unknown_thread_loads_empty() {
        let store = MessageStore::in_memory().unwrap();
        assert!(store.load(&thread("nope")).unwrap().is_empty());
        assert_eq!(store.checkpoint(&thread("nope")).unwrap(), None);
        assert!(store.list_threads().unwrap().is_empty());
    }

    #[test]
    fn load_returns_messages_in_append_order() {
        let store = MessageStore::in_memory().unwrap();
        let t = thread("t1");

        for n in 0..5 {
            assert_eq!(store.load(&t).unwrap().len(), n);
            let msg = if n % 2 == 0 {
                Message::user(format!("question {n}"))
            } else {
                Message::assistant(format!("answer {n}"))
            };
            store.append(&t, &msg).unwrap();
        }

        let contents: Vec<String> = store
            .load(&t)
            .unwrap()
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(
            contents,
            ["question 0", "answer 1", "question 2", "answer 3", "question 4"]
        );
    }

    #[test]
    fn threads_are_isolated() {
        let store = MessageStore::in_memory().unwrap();
        store.append(&thread("a"), &Message::user("for a")).unwrap();
        store.append(&thread("b"), &Message::user("for b")).unwrap();
        store.append(&thread("a"), &Message::assistant("reply a")).unwrap();

        let b = store.load(&thread("b")).unwrap();
        assert_eq!(b, vec![Message::user("for b")]);
        assert_eq!(store.load(&thread("a")).unwrap().len(), 2);
    }

    #[test]
    fn list_threads_has_no_duplicates() {
        let store = MessageStore::in_memory().unwrap();
        store.append(&thread("a"), &Message::user("1")).unwrap();
        store.append(&thread("a"), &Message::user("2")).unwrap();
        store.append(&thread("b"), &Message::user("3")).unwrap();

        let threads = store.list_threads().unwrap();
        assert_eq!(threads, vec![thread("b"), thread("a")]);
    }

    #[test]
    fn tool_calls_survive_storage() {
        let store = MessageStore::in_memory().unwrap();
        let t = thread("tools");
        let call = ToolCall::new("calculator", "2+2");
        let batch = [
            Message::user("what is 2+2"),
            Message::tool_request("", call.clone()),
            Message::tool_result(call, "4"),
            Message::assistant("4"),
        ];
        store.append_all(&t, &batch).unwrap();

        assert_eq!(store.load(&t).unwrap(), batch);
    }

    #[test]
    fn empty_batch_does_not_create_thread() {
        let store = MessageStore::in_memory().unwrap();
        store.append_all(&thread("t"), &[]).unwrap();
        assert!(store.list_threads().unwrap().is_empty());
    }

    #[test]
    fn checkpoint_tracks_last_sequence() {
        let store = MessageStore::in_memory().unwrap();
        let t = thread("t");
        store.append(&t, &Message::user("one")).unwrap();
        store.append(&thread("other"), &Message::user("x")).unwrap();
        store
            .append_all(&t, &[Message::user("two"), Message::assistant("three")])
            .unwrap();

        let stored = store.load_stored(&t).unwrap();
        assert_eq!(stored.len(), 3);
        assert!(stored.windows(2).all(|w| w[0].seq < w[1].seq));
        assert_eq!(store.checkpoint(&t).unwrap(), Some(stored[2].seq));
    }

    #[test]
    fn summaries_count_messages_and_title_by_first_user_message() {
        let store = MessageStore::in_memory().unwrap();
        let t = thread("t");
        store
            .append_all(
                &t,
                &[Message::user("Hello"), Message::assistant("Hi there")],
            )
            .unwrap();
        store.append(&t, &Message::user("Again")).unwrap();

        let summaries = store.thread_summaries().unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].thread_id, t);
        assert_eq!(summaries[0].message_count, 3);
        assert_eq!(summaries[0].first_message.as_deref(), Some("Hello"));
        assert!(summaries[0].created_at <= summaries[0].updated_at);
    }

    #[test]
    fn reopening_file_store_restores_threads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chat.db");

        let store = MessageStore::open(&path).unwrap();
        store.append(&thread("a"), &Message::user("hi a")).unwrap();
        store
            .append_all(
                &thread("b"),
                &[Message::user("hi b"), Message::assistant("hello b")],
            )
            .unwrap();
        let threads_before = store.list_threads().unwrap();
        let a_before = store.load(&thread("a")).unwrap();
        let b_before = store.load(&thread("b")).unwrap();
        store.close().unwrap();

        let reopened = MessageStore::open(&path).unwrap();
        assert_eq!(reopened.list_threads().unwrap(), threads_before);
        assert_eq!(reopened.load(&thread("a")).unwrap(), a_before);
        assert_eq!(reopened.load(&thread("b")).unwrap(), b_before);
    }

    #[test]
    fn failed_batch_commits_nothing() {
        let store = MessageStore::in_memory().unwrap();
        store
            .lock()
            .unwrap()
            .execute_batch(
                "CREATE TRIGGER reject_boom BEFORE INSERT ON messages
                 WHEN NEW.content = 'boom'
                 BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
            )
            .unwrap();

        let t = thread("t");
        let result = store.append_all(&t, &[Message::user("ok"), Message::assistant("boom")]);

        assert!(matches!(result, Err(Error::Database(_))));
        assert!(store.load(&t).unwrap().is_empty());
        assert!(store.list_threads().unwrap().is_empty());
        assert_eq!(store.checkpoint(&t).unwrap(), None);
    }

    #[test]
    fn corrupt_role_is_reported() {
        let store = MessageStore::in_memory().unwrap();
        store
            .lock()
            .unwrap()
            .execute(
                "INSERT INTO messages (thread_id, role, content, created_at)
                 VALUES ('t', 'wizard', 'boo', '2024-01-01T00:00:00+00:00')",
                [],
            )
            .unwrap();

        assert!(matches!(
            store.load(&thread("t")),
            Err(Error::Corrupt(_))
        ));
    }
}

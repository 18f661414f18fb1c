//! # SQLite Store
//!
//! Durable [`ChatStore`] backed by a single SQLite file.
//!
//! ## Notes
//! - One connection is shared behind a mutex; statements are short, so
//!   sessions contend only briefly.
//! - An empty receiver is stored as `NULL` and read back as `""`.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, Result as SqlResult, params};
use tracing::{error, info, warn};

use relay_common::{Message, User};

use crate::store::{ChatStore, StoreError, StoreResult};

/// Path understood by SQLite as a private in-memory database.
pub const IN_MEMORY_PATH: &str = ":memory:";

pub struct SqliteStore {
    path: PathBuf,
    conn: Mutex<Option<Connection>>,
}

impl SqliteStore {
    /// Creates a store for the database at `path`; nothing is opened yet.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        SqliteStore {
            path: path.as_ref().to_path_buf(),
            conn: Mutex::new(None),
        }
    }

    /// Creates a store backed by a private in-memory database.
    pub fn in_memory() -> Self {
        Self::new(IN_MEMORY_PATH)
    }

    fn init_schema(conn: &Connection) -> SqlResult<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS users (
                nickname TEXT PRIMARY KEY,
                password TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                sender_nickname TEXT NOT NULL,
                receiver_nickname TEXT,
                text TEXT NOT NULL,
                posted_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_messages_posted_at ON messages(posted_at);",
        )
    }

    /// Runs `op` against the open connection, folding every failure into `None`.
    fn with_conn<T>(&self, op_name: &str, op: impl FnOnce(&Connection) -> SqlResult<T>) -> Option<T> {
        let guard = self.conn.lock();
        let Some(conn) = guard.as_ref() else {
            warn!(op = op_name, error = %StoreError::NotConnected, "sqlite store unavailable");
            return None;
        };
        match op(conn) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(op = op_name, error = %err, "sqlite statement failed");
                None
            }
        }
    }
}

impl ChatStore for SqliteStore {
    fn connect(&self) -> StoreResult<()> {
        let mut guard = self.conn.lock();
        if guard.is_some() {
            return Ok(());
        }

        let conn = Connection::open(&self.path)
            .map_err(|err| StoreError::Connection(format!("{}: {err}", self.path.display())))?;
        Self::init_schema(&conn).map_err(|err| StoreError::Backend(err.to_string()))?;

        info!(path = %self.path.display(), "connected to sqlite store");
        *guard = Some(conn);
        Ok(())
    }

    fn user_exists(&self, user: &User) -> bool {
        self.with_conn("user_exists", |conn| {
            conn.query_row(
                "SELECT 1 FROM users WHERE nickname = ?1 AND password = ?2",
                params![user.nickname, user.password],
                |_| Ok(()),
            )
            .optional()
        })
        .flatten()
        .is_some()
    }

    fn create_user(&self, user: &User) -> bool {
        self.with_conn("create_user", |conn| {
            conn.execute(
                "INSERT INTO users (nickname, password) VALUES (?1, ?2)",
                params![user.nickname, user.password],
            )
        })
        .is_some_and(|rows| rows > 0)
    }

    fn all_messages(&self) -> Option<Vec<Message>> {
        self.with_conn("all_messages", |conn| {
            let mut stmt = conn.prepare(
                "SELECT sender_nickname, receiver_nickname, text, posted_at
                 FROM messages
                 ORDER BY posted_at, id",
            )?;

            stmt.query_map([], |row| {
                let receiver: Option<String> = row.get(1)?;
                let posted_at: DateTime<Utc> = row.get(3)?;
                Ok(Message {
                    sender_nickname: row.get(0)?,
                    receiver_nickname: receiver.unwrap_or_default(),
                    text: row.get(2)?,
                    posted_at,
                })
            })?
            .collect::<SqlResult<Vec<_>>>()
        })
    }

    fn post_message(&self, message: &Message) -> bool {
        let receiver = (!message.is_broadcast()).then_some(message.receiver_nickname.as_str());
        self.with_conn("post_message", |conn| {
            conn.execute(
                "INSERT INTO messages (sender_nickname, receiver_nickname, text, posted_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![message.sender_nickname, receiver, message.text, message.posted_at],
            )
        })
        .is_some_and(|rows| rows > 0)
    }

    fn disconnect(&self) {
        let Some(conn) = self.conn.lock().take() else {
            return;
        };
        if let Err((_, err)) = conn.close() {
            error!(error = %err, "failed to close sqlite connection cleanly");
        } else {
            info!(path = %self.path.display(), "disconnected from sqlite store");
        }
    }
}

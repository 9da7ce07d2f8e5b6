//! Database module for threadrun
//!
//! Provides persistence for conversations, run snapshots and working memory.
//! Messages and memory values are stored as JSON text; everything above this
//! module works with the typed values from [`schema`].

mod memory;
mod runs;
mod schema;

pub use schema::*;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),
    #[error("Message {index} not found in conversation {conversation_id}")]
    MessageNotFound {
        conversation_id: String,
        index: usize,
    },
    #[error("Memory module '{module}' not found in conversation {conversation_id}")]
    ModuleNotFound {
        conversation_id: String,
        module: String,
    },
    #[error("Corrupt stored value: {0}")]
    Corrupt(String),
    #[error("Database connection lock poisoned")]
    LockPoisoned,
}

pub type DbResult<T> = Result<T, DbError>;

type WriteLocks = Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>;

/// Thread-safe database handle. Clones share the connection and the
/// per-conversation memory write locks.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    memory_locks: WriteLocks,
}

impl Database {
    /// Open or create database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let db = Self::with_connection(Connection::open(path)?);
        db.run_migrations()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    #[allow(dead_code)] // Used in tests
    pub fn open_in_memory() -> DbResult<Self> {
        let db = Self::with_connection(Connection::open_in_memory()?);
        db.run_migrations()?;
        Ok(db)
    }

    fn with_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            memory_locks: Arc::default(),
        }
    }

    /// Write lock for the working memory of one conversation.
    ///
    /// Locks nobody holds any more are dropped from the map here.
    pub(crate) fn memory_write_lock(&self, conversation_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self
            .memory_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        locks.retain(|id, lock| id == conversation_id || Arc::strong_count(lock) > 1);
        Arc::clone(locks.entry(conversation_id.to_string()).or_default())
    }

    #[cfg(test)]
    pub(crate) fn memory_lock_count(&self) -> usize {
        self.memory_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn run_migrations(&self) -> DbResult<()> {
        let conn = self.conn()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    fn conn(&self) -> DbResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| DbError::LockPoisoned)
    }

    // ==================== Conversation Operations ====================

    /// Create a new, empty conversation
    pub fn create_conversation(&self, id: &str) -> DbResult<Conversation> {
        let conn = self.conn()?;
        let now = Utc::now();

        conn.execute(
            "INSERT INTO conversations (id, messages, created_at, updated_at)
             VALUES (?1, '[]', ?2, ?2)",
            params![id, now.to_rfc3339()],
        )?;

        Ok(Conversation {
            id: id.to_string(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        })
    }

    /// Get conversation by ID
    pub fn get_conversation(&self, id: &str) -> DbResult<Conversation> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT id, messages, created_at, updated_at FROM conversations WHERE id = ?1",
                params![id],
                ConversationRow::from_row,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => DbError::ConversationNotFound(id.to_string()),
                other => DbError::Sqlite(other),
            })?;
        row.into_conversation()
    }

    /// List all conversations, most recently updated first
    pub fn list_conversations(&self) -> DbResult<Vec<Conversation>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, messages, created_at, updated_at FROM conversations
             ORDER BY updated_at DESC",
        )?;

        let rows = stmt.query_map([], ConversationRow::from_row)?;
        rows.map(|row| row.map_err(DbError::from).and_then(ConversationRow::into_conversation))
            .collect()
    }

    // ==================== Message Operations ====================

    /// Get the ordered messages of a conversation
    pub fn get_messages(&self, conversation_id: &str) -> DbResult<Vec<Message>> {
        let conn = self.conn()?;
        load_messages(&conn, conversation_id)
    }

    /// Read-modify-write the message list of a conversation in one transaction.
    ///
    /// `edit` sees the current messages and may mutate them. If it returns an
    /// error the transaction is rolled back and nothing is written. The
    /// conversation's `updated_at` is refreshed only when the list changed.
    pub fn update_messages<T, E, F>(&self, conversation_id: &str, edit: F) -> Result<T, E>
    where
        F: FnOnce(&mut Vec<Message>) -> Result<T, E>,
        E: From<DbError>,
    {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(DbError::from)?;

        let mut messages = load_messages(&tx, conversation_id)?;
        let before = messages.clone();
        let value = edit(&mut messages)?;

        if messages != before {
            let json = serde_json::to_string(&messages).map_err(DbError::from)?;
            tx.execute(
                "UPDATE conversations SET messages = ?1, updated_at = ?2 WHERE id = ?3",
                params![json, Utc::now().to_rfc3339(), conversation_id],
            )
            .map_err(DbError::from)?;
        }

        tx.commit().map_err(DbError::from)?;
        Ok(value)
    }
}

/// Raw conversation row before JSON decoding
struct ConversationRow {
    id: String,
    messages: String,
    created_at: String,
    updated_at: String,
}

impl ConversationRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            messages: row.get(1)?,
            created_at: row.get(2)?,
            updated_at: row.get(3)?,
        })
    }

    fn into_conversation(self) -> DbResult<Conversation> {
        Ok(Conversation {
            messages: serde_json::from_str(&self.messages)?,
            id: self.id,
            created_at: parse_datetime(&self.created_at),
            updated_at: parse_datetime(&self.updated_at),
        })
    }
}

/// Load and decode the message list of a conversation
fn load_messages(conn: &Connection, conversation_id: &str) -> DbResult<Vec<Message>> {
    let json: String = conn
        .query_row(
            "SELECT messages FROM conversations WHERE id = ?1",
            params![conversation_id],
            |row| row.get(0),
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => {
                DbError::ConversationNotFound(conversation_id.to_string())
            }
            other => DbError::Sqlite(other),
        })?;
    Ok(serde_json::from_str(&json)?)
}

fn ensure_conversation(conn: &Connection, conversation_id: &str) -> DbResult<()> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM conversations WHERE id = ?1)",
        params![conversation_id],
        |row| row.get(0),
    )?;
    if exists {
        Ok(())
    } else {
        Err(DbError::ConversationNotFound(conversation_id.to_string()))
    }
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}

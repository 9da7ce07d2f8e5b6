//! Run snapshot persistence

use super::memory::load_memory;
use super::{load_messages, parse_datetime, Database, DbError, DbResult, RunSnapshot, RunStatus};
use chrono::Utc;
use rusqlite::{params, OptionalExtension};

const SNAPSHOT_COLUMNS: &str = "id, conversation_id, messages, working_memory, status, created_at";

impl Database {
    /// Snapshot the current messages and memory of a conversation.
    ///
    /// Reads and insert share one transaction, so the snapshot never mixes
    /// state from before and after a concurrent write.
    pub fn insert_run_snapshot(
        &self,
        conversation_id: &str,
        status: RunStatus,
    ) -> DbResult<RunSnapshot> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let messages = load_messages(&tx, conversation_id)?;
        let working_memory = load_memory(&tx, conversation_id)?;
        let now = Utc::now();

        tx.execute(
            "INSERT INTO run_snapshots (conversation_id, messages, working_memory, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                conversation_id,
                serde_json::to_string(&messages)?,
                serde_json::to_string(&working_memory)?,
                status.as_str(),
                now.to_rfc3339(),
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        Ok(RunSnapshot {
            id,
            conversation_id: conversation_id.to_string(),
            messages,
            working_memory,
            status,
            created_at: now,
        })
    }

    /// Status of the most recent control snapshot, if any
    pub fn latest_control_status(&self, conversation_id: &str) -> DbResult<Option<RunStatus>> {
        let statuses = RunStatus::CONTROL
            .iter()
            .map(|s| format!("'{}'", s.as_str()))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT status FROM run_snapshots
             WHERE conversation_id = ?1 AND status IN ({statuses})
             ORDER BY id DESC LIMIT 1"
        );

        let conn = self.conn()?;
        let status: Option<String> = conn
            .query_row(&sql, params![conversation_id], |row| row.get(0))
            .optional()?;
        status
            .map(|s| s.parse::<RunStatus>().map_err(DbError::Corrupt))
            .transpose()
    }

    /// All snapshots of a conversation, oldest first
    pub fn list_run_snapshots(&self, conversation_id: &str) -> DbResult<Vec<RunSnapshot>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM run_snapshots WHERE conversation_id = ?1 ORDER BY id ASC"
        ))?;

        let rows = stmt.query_map(params![conversation_id], SnapshotRow::from_row)?;
        rows.map(|row| row.map_err(DbError::from).and_then(SnapshotRow::into_snapshot))
            .collect()
    }

    /// Most recent snapshot of any status
    pub fn latest_run_snapshot(&self, conversation_id: &str) -> DbResult<Option<RunSnapshot>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!(
                    "SELECT {SNAPSHOT_COLUMNS} FROM run_snapshots
                     WHERE conversation_id = ?1 ORDER BY id DESC LIMIT 1"
                ),
                params![conversation_id],
                SnapshotRow::from_row,
            )
            .optional()?;
        row.map(SnapshotRow::into_snapshot).transpose()
    }
}

struct SnapshotRow {
    id: i64,
    conversation_id: String,
    messages: String,
    working_memory: String,
    status: String,
    created_at: String,
}

impl SnapshotRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            conversation_id: row.get(1)?,
            messages: row.get(2)?,
            working_memory: row.get(3)?,
            status: row.get(4)?,
            created_at: row.get(5)?,
        })
    }

    fn into_snapshot(self) -> DbResult<RunSnapshot> {
        Ok(RunSnapshot {
            id: self.id,
            conversation_id: self.conversation_id,
            messages: serde_json::from_str(&self.messages)?,
            working_memory: serde_json::from_str(&self.working_memory)?,
            status: self.status.parse().map_err(DbError::Corrupt)?,
            created_at: parse_datetime(&self.created_at),
        })
    }
}

//! Working-memory module persistence
//!
//! Locking lives one level up in `MemoryStore`; these are plain transactions.

use super::{ensure_conversation, Database, DbError, DbResult, MemoryExport};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::collections::BTreeSet;

impl Database {
    /// Update the module if it exists, insert it otherwise
    pub fn upsert_memory_module(
        &self,
        conversation_id: &str,
        module: &str,
        value: &Value,
    ) -> DbResult<()> {
        let data = serde_json::to_string(value)?;
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        ensure_conversation(&tx, conversation_id)?;
        let existing: Option<i64> = tx
            .query_row(
                "SELECT id FROM memory_modules WHERE conversation_id = ?1 AND module_name = ?2",
                params![conversation_id, module],
                |row| row.get(0),
            )
            .optional()?;

        match existing {
            Some(id) => {
                tx.execute(
                    "UPDATE memory_modules SET data = ?1 WHERE id = ?2",
                    params![data, id],
                )?;
            }
            None => {
                tx.execute(
                    "INSERT INTO memory_modules (conversation_id, module_name, data)
                     VALUES (?1, ?2, ?3)",
                    params![conversation_id, module, data],
                )?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    pub fn get_memory_module(&self, conversation_id: &str, module: &str) -> DbResult<Value> {
        let conn = self.conn()?;
        let data: Option<String> = conn
            .query_row(
                "SELECT data FROM memory_modules WHERE conversation_id = ?1 AND module_name = ?2",
                params![conversation_id, module],
                |row| row.get(0),
            )
            .optional()?;

        match data {
            Some(data) => Ok(serde_json::from_str(&data)?),
            None => Err(DbError::ModuleNotFound {
                conversation_id: conversation_id.to_string(),
                module: module.to_string(),
            }),
        }
    }

    /// Returns whether a module was removed
    pub fn delete_memory_module(&self, conversation_id: &str, module: &str) -> DbResult<bool> {
        let conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM memory_modules WHERE conversation_id = ?1 AND module_name = ?2",
            params![conversation_id, module],
        )?;
        Ok(deleted > 0)
    }

    pub fn memory_module_names(&self, conversation_id: &str) -> DbResult<BTreeSet<String>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT module_name FROM memory_modules WHERE conversation_id = ?1")?;
        let names = stmt
            .query_map(params![conversation_id], |row| row.get(0))?
            .collect::<Result<BTreeSet<String>, _>>()?;
        Ok(names)
    }

    pub fn export_memory(&self, conversation_id: &str) -> DbResult<MemoryExport> {
        let conn = self.conn()?;
        load_memory(&conn, conversation_id)
    }

    /// Delete every module of a conversation, returning how many were removed
    pub fn clear_memory(&self, conversation_id: &str) -> DbResult<usize> {
        let conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM memory_modules WHERE conversation_id = ?1",
            params![conversation_id],
        )?;
        Ok(deleted)
    }
}

pub(super) fn load_memory(conn: &Connection, conversation_id: &str) -> DbResult<MemoryExport> {
    let mut stmt =
        conn.prepare("SELECT module_name, data FROM memory_modules WHERE conversation_id = ?1")?;
    let rows = stmt.query_map(params![conversation_id], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;

    let mut export = MemoryExport::new();
    for row in rows {
        let (name, data) = row?;
        export.insert(name, serde_json::from_str(&data)?);
    }
    Ok(export)
}

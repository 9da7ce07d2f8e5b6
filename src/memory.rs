//! Working memory
//!
//! Named JSON modules attached to a conversation. Writers for one conversation
//! are serialized by a per-conversation async lock held on the shared
//! [`Database`], so every store opened on the same database takes the same
//! lock. Readers go straight to the store and see each write either fully
//! applied or not at all.

use crate::db::{Database, DbResult, MemoryExport};
use serde_json::Value;
use std::collections::BTreeSet;
use tokio::sync::OwnedMutexGuard;

/// Per-conversation working memory store
#[derive(Clone)]
pub struct MemoryStore {
    db: Database,
}

impl MemoryStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    async fn write_lock(&self, conversation_id: &str) -> OwnedMutexGuard<()> {
        self.db.memory_write_lock(conversation_id).lock_owned().await
    }

    /// Create or overwrite a module
    pub async fn upsert(&self, conversation_id: &str, module: &str, value: Value) -> DbResult<()> {
        let _guard = self.write_lock(conversation_id).await;
        self.db.upsert_memory_module(conversation_id, module, &value)?;
        tracing::debug!(conv_id = %conversation_id, module, "Upserted memory module");
        Ok(())
    }

    /// Fails with `ModuleNotFound` when the module does not exist
    pub fn get(&self, conversation_id: &str, module: &str) -> DbResult<Value> {
        self.db.get_memory_module(conversation_id, module)
    }

    /// Remove a module; absent modules are ignored
    pub async fn delete(&self, conversation_id: &str, module: &str) -> DbResult<()> {
        let _guard = self.write_lock(conversation_id).await;
        if self.db.delete_memory_module(conversation_id, module)? {
            tracing::debug!(conv_id = %conversation_id, module, "Deleted memory module");
        }
        Ok(())
    }

    pub fn list_names(&self, conversation_id: &str) -> DbResult<BTreeSet<String>> {
        self.db.memory_module_names(conversation_id)
    }

    pub fn export_all(&self, conversation_id: &str) -> DbResult<MemoryExport> {
        self.db.export_memory(conversation_id)
    }

    /// Upsert every entry of an export
    #[allow(dead_code)] // Used in tests
    pub async fn import_all(&self, conversation_id: &str, export: MemoryExport) -> DbResult<()> {
        let _guard = self.write_lock(conversation_id).await;
        for (module, value) in &export {
            self.db.upsert_memory_module(conversation_id, module, value)?;
        }
        Ok(())
    }

    pub async fn clear_all(&self, conversation_id: &str) -> DbResult<()> {
        let _guard = self.write_lock(conversation_id).await;
        let removed = self.db.clear_memory(conversation_id)?;
        tracing::debug!(conv_id = %conversation_id, removed, "Cleared working memory");
        Ok(())
    }
}

//! Run snapshots and the cancellation protocol built on them

use crate::db::{Database, DbError, DbResult, RunSnapshot, RunStatus};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ControlError {
    #[error("'{0}' does not halt a conversation (use stopping, cancelled or paused)")]
    NotHalting(RunStatus),
    #[error(transparent)]
    Db(#[from] DbError),
}

#[derive(Clone)]
pub struct RunRecorder {
    db: Database,
}

impl RunRecorder {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Snapshot the current messages and working memory under `status`
    pub fn record(&self, conversation_id: &str, status: RunStatus) -> DbResult<RunSnapshot> {
        let snapshot = self.db.insert_run_snapshot(conversation_id, status)?;
        tracing::info!(
            conv_id = %conversation_id,
            snapshot_id = snapshot.id,
            %status,
            messages = snapshot.messages.len(),
            "Recorded run snapshot"
        );
        Ok(snapshot)
    }

    /// Latest stopping/cancelled/paused/resumed status; later records win
    pub fn latest_control_status(&self, conversation_id: &str) -> DbResult<Option<RunStatus>> {
        self.db.latest_control_status(conversation_id)
    }

    /// Latest control status, if it halts the conversation
    pub fn halt_status(&self, conversation_id: &str) -> DbResult<Option<RunStatus>> {
        Ok(self
            .latest_control_status(conversation_id)?
            .filter(|status| status.halts()))
    }

    /// Halt a conversation from outside the run loop. A running step notices
    /// at its next checkpoint.
    pub fn request_stop(
        &self,
        conversation_id: &str,
        status: RunStatus,
    ) -> Result<RunSnapshot, ControlError> {
        if !status.halts() {
            return Err(ControlError::NotHalting(status));
        }
        tracing::info!(conv_id = %conversation_id, %status, "Stop requested");
        Ok(self.record(conversation_id, status)?)
    }

    /// Lift an earlier halt
    pub fn resume(&self, conversation_id: &str) -> DbResult<RunSnapshot> {
        tracing::info!(conv_id = %conversation_id, "Resume requested");
        self.record(conversation_id, RunStatus::Resumed)
    }

    /// All snapshots, oldest first
    pub fn history(&self, conversation_id: &str) -> DbResult<Vec<RunSnapshot>> {
        self.db.list_run_snapshots(conversation_id)
    }

    pub fn latest(&self, conversation_id: &str) -> DbResult<Option<RunSnapshot>> {
        self.db.latest_run_snapshot(conversation_id)
    }
}

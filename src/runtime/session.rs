//! Session driver: one objective, repeated steps until something ends the run

use super::{RunController, StepErrorKind, StepOutcome, TurnConfig};
use crate::conversation::ConversationResult;
use crate::db::{ConversationId, Message, MemoryExport, RunStatus};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_ITERATION_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub turn: TurnConfig,
    /// User message appended between iterations; empty means none
    pub continue_instructions: String,
    pub iteration_delay: Duration,
}

impl SessionConfig {
    pub fn new(turn: TurnConfig) -> Self {
        Self {
            turn,
            continue_instructions: String::new(),
            iteration_delay: DEFAULT_ITERATION_DELAY,
        }
    }
}

/// Why a session stopped looping
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SessionEnd {
    /// The in-process stop signal fired
    StopSignal,
    /// A control snapshot halted the conversation
    Halted { status: RunStatus },
    /// The iteration budget is used up
    Budget,
    Failed {
        kind: StepErrorKind,
        message: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub conversation_id: ConversationId,
    pub iterations: u32,
    pub end: SessionEnd,
}

pub struct Session {
    controller: Arc<RunController>,
    config: SessionConfig,
    stop: CancellationToken,
}

impl Session {
    pub fn new(controller: Arc<RunController>, config: SessionConfig) -> Self {
        Self {
            controller,
            config,
            stop: CancellationToken::new(),
        }
    }

    /// Token that ends the run loop at its next check when cancelled
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Open (or create) a conversation and hand it a new objective.
    ///
    /// Unanswered tool calls left by an interrupted run are dropped first, and
    /// working memory starts empty.
    pub async fn init(
        &self,
        conversation_id: Option<&str>,
        objective: &str,
    ) -> ConversationResult<ConversationId> {
        let log = self.controller.log();
        let conversation_id = match conversation_id {
            Some(id) => log.conversation(id)?.id,
            None => log.create()?,
        };

        log.repair_incomplete_tail(&conversation_id)?;
        log.append(&conversation_id, Message::user(objective))?;
        self.controller.memory().clear_all(&conversation_id).await?;

        tracing::info!(conv_id = %conversation_id, "Session initialized");
        Ok(conversation_id)
    }

    /// Step until stopped, halted, failed or out of budget
    pub async fn run(
        &self,
        conversation_id: &str,
        max_iterations: Option<u32>,
    ) -> ConversationResult<SessionReport> {
        let log = self.controller.log();
        let mut iterations = 0;

        let end = loop {
            if self.stop.is_cancelled() {
                break SessionEnd::StopSignal;
            }

            log.repair_incomplete_tail(conversation_id)?;
            if let Some(status) = self.controller.halt_status(conversation_id)? {
                break SessionEnd::Halted { status };
            }

            let memory = self.controller.memory().export_all(conversation_id)?;
            let turn = self.turn_with_memory(&memory);

            tracing::info!(
                conv_id = %conversation_id,
                iteration = iterations + 1,
                "Starting iteration"
            );
            let outcome = self.controller.step(conversation_id, &turn).await;
            iterations += 1;

            match outcome {
                StepOutcome::Error { kind, message } => {
                    if let Err(e) = self
                        .controller
                        .recorder()
                        .record(conversation_id, RunStatus::Error)
                    {
                        tracing::error!(conv_id = %conversation_id, error = %e, "Failed to record error snapshot");
                    }
                    break SessionEnd::Failed { kind, message };
                }
                StepOutcome::Stopped { status, .. } => break SessionEnd::Halted { status },
                StepOutcome::Reply { .. } | StepOutcome::ToolsDispatched { .. } => {}
            }

            if max_iterations.is_some_and(|max| iterations >= max) {
                break SessionEnd::Budget;
            }

            if !self.config.continue_instructions.is_empty() {
                log.append(
                    conversation_id,
                    Message::user(self.config.continue_instructions.clone()),
                )?;
            }

            tokio::select! {
                () = self.stop.cancelled() => break SessionEnd::StopSignal,
                () = tokio::time::sleep(self.config.iteration_delay) => {}
            }
        };

        tracing::info!(conv_id = %conversation_id, iterations, end = ?end, "Session ended");
        Ok(SessionReport {
            conversation_id: conversation_id.to_string(),
            iterations,
            end,
        })
    }

    fn turn_with_memory(&self, memory: &MemoryExport) -> TurnConfig {
        let rendered = serde_json::to_string_pretty(memory).unwrap_or_else(|_| "{}".to_string());
        let block = format!("Working Memory <working_memory> {rendered} </working_memory>");

        let mut turn = self.config.turn.clone();
        turn.additional_instructions = Some(match turn.additional_instructions.take() {
            Some(existing) if !existing.is_empty() => format!("{existing}\n\n{block}"),
            _ => block,
        });
        turn
    }
}

//! Single-step turn controller

use super::{Checkpoint, DispatchedCall, StepErrorKind, StepOutcome, TurnConfig};
use crate::conversation::{ConversationError, ConversationLog};
use crate::db::{Database, DbError, DbResult, Message, RunStatus, ToolCallRequest, ToolResult};
use crate::llm::{LlmError, LlmRequest, LlmService};
use crate::memory::MemoryStore;
use crate::recorder::RunRecorder;
use crate::tools::{ToolCatalog, ToolContext};
use futures::FutureExt;
use serde_json::Value;
use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Failures that end a step early
enum StepError {
    Model(LlmError),
    Storage(String),
}

impl From<DbError> for StepError {
    fn from(e: DbError) -> Self {
        StepError::Storage(e.to_string())
    }
}

impl From<ConversationError> for StepError {
    fn from(e: ConversationError) -> Self {
        StepError::Storage(e.to_string())
    }
}

pub struct RunController {
    log: ConversationLog,
    memory: MemoryStore,
    recorder: RunRecorder,
    catalog: Arc<ToolCatalog>,
    llm: Arc<dyn LlmService>,
}

impl RunController {
    pub fn new(db: Database, catalog: Arc<ToolCatalog>, llm: Arc<dyn LlmService>) -> Self {
        Self {
            log: ConversationLog::new(db.clone()),
            memory: MemoryStore::new(db.clone()),
            recorder: RunRecorder::new(db),
            catalog,
            llm,
        }
    }

    pub fn log(&self) -> &ConversationLog {
        &self.log
    }

    pub fn memory(&self) -> &MemoryStore {
        &self.memory
    }

    pub fn recorder(&self) -> &RunRecorder {
        &self.recorder
    }

    /// Latest control status, if it halts the conversation
    pub fn halt_status(&self, conversation_id: &str) -> DbResult<Option<RunStatus>> {
        self.recorder.halt_status(conversation_id)
    }

    #[allow(dead_code)] // Used in tests
    pub fn should_stop(&self, conversation_id: &str) -> DbResult<bool> {
        Ok(self.halt_status(conversation_id)?.is_some())
    }

    /// Run one turn. Never panics and never returns an error; failures are
    /// reported as [`StepOutcome::Error`].
    pub async fn step(&self, conversation_id: &str, turn: &TurnConfig) -> StepOutcome {
        match self.try_step(conversation_id, turn).await {
            Ok(outcome) => outcome,
            Err(StepError::Model(e)) => {
                tracing::error!(conv_id = %conversation_id, error = %e, "Model invocation failed");
                StepOutcome::Error {
                    kind: StepErrorKind::ModelInvocation,
                    message: e.message,
                }
            }
            Err(StepError::Storage(message)) => {
                tracing::error!(conv_id = %conversation_id, error = %message, "Storage failure during step");
                StepOutcome::Error {
                    kind: StepErrorKind::Storage,
                    message,
                }
            }
        }
    }

    async fn try_step(
        &self,
        conversation_id: &str,
        turn: &TurnConfig,
    ) -> Result<StepOutcome, StepError> {
        if let Some(status) = self.halt_status(conversation_id)? {
            tracing::info!(conv_id = %conversation_id, %status, "Halted before model call");
            return Ok(StepOutcome::Stopped {
                status,
                checkpoint: Checkpoint::BeforeModel,
            });
        }

        let request = self.build_request(conversation_id, turn)?;
        let response = self.llm.complete(&request).await.map_err(StepError::Model)?;

        let outcome = if response.has_tool_calls() {
            let calls = with_unique_ids(conversation_id, response.tool_calls);
            self.log.append(
                conversation_id,
                Message::assistant_with_tool_calls(response.text, calls.clone()),
            )?;

            let mut results = Vec::with_capacity(calls.len());
            for call in calls {
                let result = self.dispatch(conversation_id, &call).await;
                self.log.append(conversation_id, Message::tool(&call, &result))?;
                results.push(DispatchedCall { call, result });
            }
            StepOutcome::ToolsDispatched { results }
        } else {
            self.log
                .append(conversation_id, Message::assistant(response.text.clone()))?;
            StepOutcome::Reply {
                text: response.text,
            }
        };

        if let Some(status) = self.halt_status(conversation_id)? {
            tracing::info!(conv_id = %conversation_id, %status, "Halted after applying reply");
            return Ok(StepOutcome::Stopped {
                status,
                checkpoint: Checkpoint::AfterApply,
            });
        }

        self.recorder.record(conversation_id, RunStatus::Completed)?;
        Ok(outcome)
    }

    fn build_request(&self, conversation_id: &str, turn: &TurnConfig) -> Result<LlmRequest, StepError> {
        let mut messages = Vec::new();
        if !turn.system_prompt.is_empty() {
            messages.push(Message::system(turn.system_prompt.clone()));
        }
        messages.extend(self.log.list(conversation_id, true)?);
        if let Some(extra) = turn
            .additional_instructions
            .as_deref()
            .filter(|s| !s.is_empty())
        {
            messages.push(Message::system(extra));
        }

        Ok(LlmRequest {
            model: turn.model.model.clone(),
            messages,
            tools: self.catalog.schemas_for(turn.tool_names.as_deref()),
            temperature: turn.model.temperature,
            max_tokens: turn.model.max_tokens,
            tool_choice: turn.model.tool_choice.clone(),
            json_mode: turn.model.json_mode,
        })
    }

    /// Invoke one tool call. Every failure becomes a failed result.
    async fn dispatch(&self, conversation_id: &str, call: &ToolCallRequest) -> ToolResult {
        let outcome = match self.catalog.resolve(&call.name) {
            Err(e) => Err(e.to_string()),
            Ok(tool) => match &call.arguments {
                Value::Object(arguments) => {
                    let ctx = ToolContext::new(conversation_id, self.memory.clone());
                    let invocation = tool.invoke(&call.name, arguments.clone(), ctx);
                    match AssertUnwindSafe(invocation).catch_unwind().await {
                        Ok(Ok(result)) => Ok(result),
                        Ok(Err(e)) => Err(e.to_string()),
                        Err(panic) => Err(format!(
                            "tool panicked: {}",
                            panic_message(panic.as_ref())
                        )),
                    }
                }
                other => Err(format!(
                    "Invalid arguments: expected a JSON object, got {other}"
                )),
            },
        };

        match outcome {
            Ok(result) => {
                tracing::info!(
                    conv_id = %conversation_id,
                    tool = %call.name,
                    call_id = %call.id,
                    success = result.success,
                    "Tool call finished"
                );
                result
            }
            Err(message) => {
                tracing::warn!(
                    conv_id = %conversation_id,
                    tool = %call.name,
                    call_id = %call.id,
                    error = %message,
                    "Tool call failed"
                );
                ToolResult::failure(format!("Error in {}: {message}", call.name))
            }
        }
    }
}

/// Give empty or repeated call ids a fresh one so each request can be
/// paired with exactly one response
fn with_unique_ids(
    conversation_id: &str,
    mut calls: Vec<ToolCallRequest>,
) -> Vec<ToolCallRequest> {
    let mut seen = HashSet::new();
    for call in &mut calls {
        if call.id.is_empty() || !seen.insert(call.id.clone()) {
            let fresh = format!("call_{}", uuid::Uuid::new_v4().simple());
            tracing::warn!(
                conv_id = %conversation_id,
                tool = %call.name,
                call_id = %call.id,
                new_id = %fresh,
                "Reassigned tool call id"
            );
            seen.insert(fresh.clone());
            call.id = fresh;
        }
    }
    calls
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

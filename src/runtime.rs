//! Turn orchestration
//!
//! `RunController` runs single steps: check for a halt, build the prompt,
//! call the model, apply the reply or dispatch tools, check again, snapshot.
//! `Session` drives repeated steps for one objective.

mod controller;
mod session;

#[cfg(test)]
pub mod testing;

pub use controller::RunController;
pub use session::{Session, SessionConfig};

use crate::db::{RunStatus, ToolCallRequest, ToolResult};
use crate::llm::ToolChoice;
use serde::Serialize;

/// Model selection and sampling parameters for a step
#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub tool_choice: ToolChoice,
    pub json_mode: bool,
}

impl ModelConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            temperature: crate::config::DEFAULT_TEMPERATURE,
            max_tokens: Some(crate::config::DEFAULT_MAX_TOKENS),
            tool_choice: ToolChoice::Auto,
            json_mode: false,
        }
    }
}

/// Everything a step needs besides the stored conversation
#[derive(Debug, Clone, PartialEq)]
pub struct TurnConfig {
    /// Leading system message; omitted when empty
    pub system_prompt: String,
    pub model: ModelConfig,
    /// Tools offered to the model; `None` offers every registered tool
    pub tool_names: Option<Vec<String>>,
    /// Trailing system message; omitted when empty
    pub additional_instructions: Option<String>,
}

impl TurnConfig {
    pub fn new(model: ModelConfig) -> Self {
        Self {
            system_prompt: String::new(),
            model,
            tool_names: None,
            additional_instructions: None,
        }
    }
}

/// Where a step noticed that its conversation was halted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Checkpoint {
    /// Before the model was called; nothing was written
    BeforeModel,
    /// After the reply or tool results were appended
    AfterApply,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepErrorKind {
    ModelInvocation,
    Storage,
}

/// One answered tool call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchedCall {
    pub call: ToolCallRequest,
    pub result: ToolResult,
}

/// Result of a single step. Steps never fail in any other way.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StepOutcome {
    /// The model answered in plain text
    Reply { text: String },
    /// The model requested tools and every request was answered
    ToolsDispatched { results: Vec<DispatchedCall> },
    /// The conversation is halted
    Stopped {
        status: RunStatus,
        checkpoint: Checkpoint,
    },
    Error {
        kind: StepErrorKind,
        message: String,
    },
}

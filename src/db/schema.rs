//! Database schema and types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// SQL schema for initialization
pub const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS conversations (
    id TEXT PRIMARY KEY,
    messages TEXT NOT NULL DEFAULT '[]',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_conversations_updated ON conversations(updated_at DESC);

CREATE TABLE IF NOT EXISTS run_snapshots (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    conversation_id TEXT NOT NULL,
    messages TEXT NOT NULL,
    working_memory TEXT NOT NULL,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL,

    FOREIGN KEY (conversation_id) REFERENCES conversations(id)
);

CREATE INDEX IF NOT EXISTS idx_run_snapshots_conversation
    ON run_snapshots(conversation_id, id DESC);

CREATE TABLE IF NOT EXISTS memory_modules (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    conversation_id TEXT NOT NULL,
    module_name TEXT NOT NULL,
    data TEXT NOT NULL,

    FOREIGN KEY (conversation_id) REFERENCES conversations(id),
    CONSTRAINT uq_memory_conversation_module UNIQUE (conversation_id, module_name)
);
";

/// Conversation identifier (UUID v4 string)
pub type ConversationId = String;

/// Working-memory export: module name -> value, ordered by name
pub type MemoryExport = BTreeMap<String, Value>;

/// Conversation record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============================================================
// Message Types
// ============================================================

/// A tool call requested by the model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    /// Structured arguments. Anything other than a JSON object is rejected
    /// at dispatch time.
    pub arguments: Value,
}

impl ToolCallRequest {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// Tool execution result. Failures are results too, never dropped messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolResult {
    pub success: bool,
    pub output: String,
}

impl ToolResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
        }
    }

    /// Successful result whose output is pretty-printed JSON
    pub fn json(data: &Value) -> Self {
        let output = serde_json::to_string_pretty(data).unwrap_or_else(|_| data.to_string());
        Self::success(output)
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            output: message.into(),
        }
    }
}

/// A message in a conversation, tagged by role
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        #[serde(default)]
        content: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCallRequest>,
    },
    Tool {
        tool_call_id: String,
        name: String,
        content: String,
        #[serde(default = "default_true")]
        success: bool,
    },
}

fn default_true() -> bool {
    true
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self::System {
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::User {
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::Assistant {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn assistant_with_tool_calls(
        content: impl Into<String>,
        tool_calls: Vec<ToolCallRequest>,
    ) -> Self {
        Self::Assistant {
            content: content.into(),
            tool_calls,
        }
    }

    /// Tool response message answering `call`
    pub fn tool(call: &ToolCallRequest, result: &ToolResult) -> Self {
        Self::Tool {
            tool_call_id: call.id.clone(),
            name: call.name.clone(),
            content: result.output.clone(),
            success: result.success,
        }
    }

    pub fn role(&self) -> MessageRole {
        match self {
            Self::System { .. } => MessageRole::System,
            Self::User { .. } => MessageRole::User,
            Self::Assistant { .. } => MessageRole::Assistant,
            Self::Tool { .. } => MessageRole::Tool,
        }
    }

    /// Text content of the message (tool output for tool messages)
    pub fn content(&self) -> &str {
        match self {
            Self::System { content }
            | Self::User { content }
            | Self::Assistant { content, .. }
            | Self::Tool { content, .. } => content,
        }
    }

    /// Tool calls carried by an assistant message; empty for other roles
    pub fn tool_calls(&self) -> &[ToolCallRequest] {
        match self {
            Self::Assistant { tool_calls, .. } => tool_calls,
            _ => &[],
        }
    }
}

/// Message role
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::Tool => write!(f, "tool"),
        }
    }
}

// ============================================================
// Run Snapshots
// ============================================================

/// Status recorded on a run snapshot
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Stopping,
    Cancelled,
    Paused,
    Error,
    /// Lifts an earlier stopping/cancelled/paused snapshot
    Resumed,
}

impl RunStatus {
    /// Statuses that take part in the later-wins cancellation protocol
    pub const CONTROL: [RunStatus; 4] = [
        RunStatus::Stopping,
        RunStatus::Cancelled,
        RunStatus::Paused,
        RunStatus::Resumed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Completed => "completed",
            RunStatus::Stopping => "stopping",
            RunStatus::Cancelled => "cancelled",
            RunStatus::Paused => "paused",
            RunStatus::Error => "error",
            RunStatus::Resumed => "resumed",
        }
    }

    /// Whether this status, as the latest control status, stops further steps
    pub fn halts(self) -> bool {
        matches!(
            self,
            RunStatus::Stopping | RunStatus::Cancelled | RunStatus::Paused
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "completed" => Ok(RunStatus::Completed),
            "stopping" => Ok(RunStatus::Stopping),
            "cancelled" => Ok(RunStatus::Cancelled),
            "paused" => Ok(RunStatus::Paused),
            "error" => Ok(RunStatus::Error),
            "resumed" => Ok(RunStatus::Resumed),
            other => Err(format!("unknown run status: {other}")),
        }
    }
}

/// Immutable snapshot of a conversation written at the end of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub id: i64,
    pub conversation_id: ConversationId,
    pub messages: Vec<Message>,
    pub working_memory: MemoryExport,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
}

//! Mock implementations for testing
//!
//! These mocks enable controller and session tests without real I/O.

use crate::db::{ToolCallRequest, ToolResult};
use crate::llm::{LlmError, LlmRequest, LlmResponse, LlmService, ToolDefinition};
use crate::tools::{Tool, ToolContext, ToolError};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::VecDeque;
use std::sync::Mutex;

// ============================================================================
// Mock LLM Service
// ============================================================================

/// Mock LLM service that returns queued responses
pub struct MockLlmService {
    responses: Mutex<VecDeque<Result<LlmResponse, LlmError>>>,
    /// Record of all requests made
    requests: Mutex<Vec<LlmRequest>>,
}

impl MockLlmService {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue a successful response
    pub fn queue_response(&self, response: LlmResponse) {
        self.responses.lock().unwrap().push_back(Ok(response));
    }

    pub fn queue_text(&self, text: &str) {
        self.queue_response(LlmResponse::text(text));
    }

    pub fn queue_tool_calls(&self, calls: Vec<ToolCallRequest>) {
        self.queue_response(LlmResponse::with_tool_calls(calls));
    }

    /// Queue an error response
    pub fn queue_error(&self, error: LlmError) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    /// Get recorded requests
    pub fn recorded_requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl Default for MockLlmService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmService for MockLlmService {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::network("No mock response queued")))
    }

    fn provider(&self) -> &str {
        "mock"
    }
}

// ============================================================================
// Mock Tools
// ============================================================================

fn definition(name: &str) -> Vec<ToolDefinition> {
    vec![ToolDefinition::new(
        name,
        format!("Mock {name}"),
        json!({ "type": "object", "properties": {} }),
    )]
}

type InvokeHook = Box<dyn Fn(&ToolContext) + Send + Sync>;

/// Tool that records its calls and returns a fixed output
pub struct RecordingTool {
    name: String,
    output: String,
    calls: Mutex<Vec<(String, Value)>>,
    hook: Option<InvokeHook>,
}

impl RecordingTool {
    pub fn new(name: &str, output: &str) -> Self {
        Self {
            name: name.to_string(),
            output: output.to_string(),
            calls: Mutex::new(Vec::new()),
            hook: None,
        }
    }

    /// Run `hook` inside every invocation, before returning
    pub fn on_invoke(mut self, hook: impl Fn(&ToolContext) + Send + Sync + 'static) -> Self {
        self.hook = Some(Box::new(hook));
        self
    }

    /// (function, arguments) of every call so far
    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Tool for RecordingTool {
    fn definitions(&self) -> Vec<ToolDefinition> {
        definition(&self.name)
    }

    async fn invoke(
        &self,
        function: &str,
        arguments: Map<String, Value>,
        ctx: ToolContext,
    ) -> Result<ToolResult, ToolError> {
        self.calls
            .lock()
            .unwrap()
            .push((function.to_string(), Value::Object(arguments)));
        if let Some(hook) = &self.hook {
            hook(&ctx);
        }
        Ok(ToolResult::success(self.output.clone()))
    }
}

/// Tool that always returns an error
pub struct FailingTool {
    name: String,
}

impl FailingTool {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

#[async_trait]
impl Tool for FailingTool {
    fn definitions(&self) -> Vec<ToolDefinition> {
        definition(&self.name)
    }

    async fn invoke(
        &self,
        _function: &str,
        _arguments: Map<String, Value>,
        _ctx: ToolContext,
    ) -> Result<ToolResult, ToolError> {
        Err(ToolError::Failed("disk on fire".to_string()))
    }
}

/// Tool that panics mid-call
pub struct PanickingTool {
    name: String,
}

impl PanickingTool {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

#[async_trait]
impl Tool for PanickingTool {
    fn definitions(&self) -> Vec<ToolDefinition> {
        definition(&self.name)
    }

    async fn invoke(
        &self,
        _function: &str,
        _arguments: Map<String, Value>,
        _ctx: ToolContext,
    ) -> Result<ToolResult, ToolError> {
        panic!("{} blew up", self.name);
    }
}

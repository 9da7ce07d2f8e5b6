//! `OpenAI` and `OpenAI`-compatible chat completions provider

use super::types::{LlmRequest, LlmResponse, ToolChoice, Usage};
use super::{LlmConfig, LlmError, LlmService};
use crate::db::{Message, ToolCallRequest};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI-compatible service implementation
pub struct OpenAIService {
    client: Client,
    api_key: String,
    endpoint: String,
}

impl OpenAIService {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_key = config
            .openai_api_key
            .clone()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| LlmError::auth("OPENAI_API_KEY is not set"))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| LlmError::unknown(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key,
            endpoint: format!(
                "{}/chat/completions",
                config.base_url.trim_end_matches('/')
            ),
        })
    }

    fn translate_request(request: &LlmRequest) -> OpenAIRequest {
        let messages = request.messages.iter().map(Self::translate_message).collect();

        let tools: Option<Vec<OpenAITool>> = if request.tools.is_empty() {
            None
        } else {
            Some(
                request
                    .tools
                    .iter()
                    .map(|t| OpenAITool {
                        r#type: "function".to_string(),
                        function: OpenAIFunction {
                            name: t.name.clone(),
                            description: t.description.clone(),
                            parameters: t.parameters.clone(),
                        },
                    })
                    .collect(),
            )
        };

        // tool_choice without tools is rejected by the API
        let tool_choice = tools
            .as_ref()
            .map(|_| Self::translate_tool_choice(&request.tool_choice));

        OpenAIRequest {
            model: request.model.clone(),
            messages,
            tools,
            tool_choice,
            max_tokens: request.max_tokens,
            temperature: Some(request.temperature),
            response_format: request
                .json_mode
                .then(|| json!({"type": "json_object"})),
            stream: false,
        }
    }

    fn translate_tool_choice(choice: &ToolChoice) -> Value {
        match choice {
            ToolChoice::Auto => json!("auto"),
            ToolChoice::None => json!("none"),
            ToolChoice::Required => json!("required"),
            ToolChoice::Function(name) => json!({
                "type": "function",
                "function": {"name": name}
            }),
        }
    }

    fn translate_message(msg: &Message) -> OpenAIMessage {
        match msg {
            Message::System { content } => OpenAIMessage::plain("system", content),
            Message::User { content } => OpenAIMessage::plain("user", content),
            Message::Assistant {
                content,
                tool_calls,
            } => {
                if tool_calls.is_empty() {
                    return OpenAIMessage::plain("assistant", content);
                }
                OpenAIMessage {
                    role: "assistant".to_string(),
                    content: (!content.is_empty()).then(|| content.clone()),
                    tool_calls: Some(tool_calls.iter().map(Self::translate_tool_call).collect()),
                    tool_call_id: None,
                }
            }
            Message::Tool {
                tool_call_id,
                content,
                success,
                ..
            } => OpenAIMessage {
                role: "tool".to_string(),
                content: Some(if *success {
                    content.clone()
                } else {
                    format!("Error: {content}")
                }),
                tool_calls: None,
                tool_call_id: Some(tool_call_id.clone()),
            },
        }
    }

    fn translate_tool_call(call: &ToolCallRequest) -> OpenAIToolCall {
        // Arguments that never parsed are echoed back verbatim
        let arguments = match &call.arguments {
            Value::String(raw) => raw.clone(),
            other => other.to_string(),
        };
        OpenAIToolCall {
            id: call.id.clone(),
            r#type: "function".to_string(),
            function: OpenAIFunctionCall {
                name: call.name.clone(),
                arguments,
            },
        }
    }

    fn normalize_response(resp: OpenAIResponse) -> Result<LlmResponse, LlmError> {
        let choice = resp
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::unknown("No choices in response"))?;

        let mut tool_calls = Vec::new();
        for tc in choice.message.tool_calls.unwrap_or_default() {
            if tc.function.name.is_empty() {
                tracing::warn!(call_id = %tc.id, "Dropping tool call without a function name");
                continue;
            }

            let arguments = serde_json::from_str(&tc.function.arguments).unwrap_or_else(|e| {
                tracing::warn!(
                    call_id = %tc.id,
                    error = %e,
                    "Tool call arguments are not valid JSON"
                );
                Value::String(tc.function.arguments.clone())
            });
            tool_calls.push(ToolCallRequest::new(tc.id, tc.function.name, arguments));
        }

        Ok(LlmResponse {
            text: choice.message.content.unwrap_or_default(),
            tool_calls,
            usage: Usage {
                input_tokens: u64::from(resp.usage.prompt_tokens),
                output_tokens: u64::from(resp.usage.completion_tokens),
            },
        })
    }
}

#[async_trait]
impl LlmService for OpenAIService {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let openai_request = Self::translate_request(request);

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&openai_request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::network(format!("Request timeout: {e}"))
                } else if e.is_connect() {
                    LlmError::network(format!("Connection failed: {e}"))
                } else {
                    LlmError::unknown(format!("Request failed: {e}"))
                }
            })?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let body = response
            .text()
            .await
            .map_err(|e| LlmError::network(format!("Failed to read response: {e}")))?;

        if !status.is_success() {
            let message = serde_json::from_str::<OpenAIErrorResponse>(&body)
                .map_or(body, |error_resp| error_resp.error.message);
            let error = LlmError::from_status(status.as_u16(), &message);
            return Err(match retry_after {
                Some(delay) => error.with_retry_after(delay),
                None => error,
            });
        }

        let openai_response: OpenAIResponse = serde_json::from_str(&body).map_err(|e| {
            LlmError::unknown(format!("Failed to parse response: {e} - body: {body}"))
        })?;

        Self::normalize_response(openai_response)
    }

    fn provider(&self) -> &str {
        "openai"
    }
}

// OpenAI API types

#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<OpenAITool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAIMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OpenAIToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl OpenAIMessage {
    fn plain(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: Some(content.to_string()),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct OpenAITool {
    r#type: String,
    function: OpenAIFunction,
}

#[derive(Debug, Serialize)]
struct OpenAIFunction {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAIToolCall {
    id: String,
    r#type: String,
    function: OpenAIFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAIFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
    #[serde(default)]
    usage: OpenAIUsage,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessage,
}

#[derive(Debug, Default, Deserialize)]
#[allow(clippy::struct_field_names)]
struct OpenAIUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct OpenAIErrorResponse {
    error: OpenAIError,
}

#[derive(Debug, Deserialize)]
struct OpenAIError {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ToolResult;
    use crate::llm::ToolDefinition;

    fn request(messages: Vec<Message>) -> LlmRequest {
        LlmRequest {
            model: "gpt-4o".to_string(),
            messages,
            tools: Vec::new(),
            temperature: 0.1,
            max_tokens: Some(8192),
            tool_choice: ToolChoice::Auto,
            json_mode: false,
        }
    }

    #[test]
    fn test_translate_tool_round() {
        let call = ToolCallRequest::new("t1", "example_function", json!({"input_text": "hi"}));
        let req = request(vec![
            Message::system("be brief"),
            Message::user("go"),
            Message::assistant_with_tool_calls("", vec![call.clone()]),
            Message::tool(&call, &ToolResult::failure("Error in example_function: boom")),
        ]);

        let wire = serde_json::to_value(OpenAIService::translate_request(&req)).unwrap();
        let messages = wire["messages"].as_array().unwrap();
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[2]["role"], "assistant");
        assert!(messages[2].get("content").is_none());
        assert_eq!(messages[2]["tool_calls"][0]["function"]["arguments"], r#"{"input_text":"hi"}"#);
        assert_eq!(messages[3]["role"], "tool");
        assert_eq!(messages[3]["tool_call_id"], "t1");
        assert_eq!(messages[3]["content"], "Error: Error in example_function: boom");
        // No tools offered: no tool_choice either
        assert!(wire.get("tools").is_none());
        assert!(wire.get("tool_choice").is_none());
        assert!(wire.get("response_format").is_none());
    }

    #[test]
    fn test_translate_tools_and_json_mode() {
        let mut req = request(vec![Message::user("go")]);
        req.tools = vec![ToolDefinition::new(
            "example_function",
            "demo",
            json!({"type": "object"}),
        )];
        req.tool_choice = ToolChoice::Function("example_function".to_string());
        req.json_mode = true;

        let wire = serde_json::to_value(OpenAIService::translate_request(&req)).unwrap();
        assert_eq!(wire["tools"][0]["type"], "function");
        assert_eq!(wire["tools"][0]["function"]["name"], "example_function");
        assert_eq!(wire["tool_choice"]["function"]["name"], "example_function");
        assert_eq!(wire["response_format"]["type"], "json_object");
        assert_eq!(wire["max_tokens"], 8192);
    }

    #[test]
    fn test_unparsable_arguments_kept_raw() {
        let call = ToolCallRequest::new("t1", "example_function", Value::String("{oops".to_string()));
        let msg = OpenAIService::translate_message(&Message::assistant_with_tool_calls("", vec![call]));
        assert_eq!(msg.tool_calls.unwrap()[0].function.arguments, "{oops");
    }

    #[test]
    fn test_normalize_response() {
        let resp: OpenAIResponse = serde_json::from_value(json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [
                        {"id": "a", "type": "function", "function": {"name": "example_function", "arguments": "{\"input_text\":\"x\"}"}},
                        {"id": "b", "type": "function", "function": {"name": "example_function", "arguments": "not json"}},
                        {"id": "c", "type": "function", "function": {"name": "", "arguments": "{}"}}
                    ]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        }))
        .unwrap();

        let normalized = OpenAIService::normalize_response(resp).unwrap();
        assert_eq!(normalized.text, "");
        assert_eq!(normalized.tool_calls.len(), 2);
        assert_eq!(normalized.tool_calls[0].arguments, json!({"input_text": "x"}));
        assert_eq!(normalized.tool_calls[1].arguments, json!("not json"));
        assert_eq!(normalized.usage.input_tokens, 10);
    }

    #[test]
    fn test_normalize_empty_choices() {
        let resp: OpenAIResponse = serde_json::from_value(json!({"choices": []})).unwrap();
        assert!(OpenAIService::normalize_response(resp).is_err());
    }

    #[test]
    fn test_missing_api_key() {
        let config = LlmConfig {
            openai_api_key: None,
            ..LlmConfig::default()
        };
        let err = OpenAIService::new(&config).err().unwrap();
        assert_eq!(err.kind, crate::llm::LlmErrorKind::Auth);
    }
}

//! Example tool - uppercases its input

use super::{Tool, ToolContext, ToolError};
use crate::db::ToolResult;
use crate::llm::ToolDefinition;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};

pub struct ExampleTool;

#[derive(Debug, Deserialize)]
struct ExampleInput {
    input_text: String,
}

#[async_trait]
impl Tool for ExampleTool {
    fn definitions(&self) -> Vec<ToolDefinition> {
        vec![ToolDefinition::new(
            "example_function",
            "An example function that uppercases the given text",
            json!({
                "type": "object",
                "required": ["input_text"],
                "properties": {
                    "input_text": {
                        "type": "string",
                        "description": "The text to be processed"
                    }
                }
            }),
        )]
    }

    async fn invoke(
        &self,
        function: &str,
        arguments: Map<String, Value>,
        _ctx: ToolContext,
    ) -> Result<ToolResult, ToolError> {
        if function != "example_function" {
            return Err(ToolError::UnknownFunction(function.to_string()));
        }
        let input: ExampleInput = ToolError::parse_args(arguments)?;
        Ok(ToolResult::json(&json!({
            "original_text": input.input_text,
            "processed_text": input.input_text.to_uppercase(),
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::memory::MemoryStore;

    fn test_context() -> ToolContext {
        ToolContext::new(
            "test-conv",
            MemoryStore::new(Database::open_in_memory().unwrap()),
        )
    }

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_uppercases() {
        let result = ExampleTool
            .invoke("example_function", args(json!({"input_text": "hi"})), test_context())
            .await
            .unwrap();
        assert!(result.success);

        let output: Value = serde_json::from_str(&result.output).unwrap();
        assert_eq!(output["original_text"], "hi");
        assert_eq!(output["processed_text"], "HI");
    }

    #[tokio::test]
    async fn test_missing_input() {
        let err = ExampleTool
            .invoke("example_function", Map::new(), test_context())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}

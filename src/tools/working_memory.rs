//! Working memory tool - lets the model keep named notes across turns

use super::{Tool, ToolContext, ToolError};
use crate::db::{DbError, ToolResult};
use crate::llm::ToolDefinition;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};

pub struct WorkingMemoryTool;

#[derive(Debug, Deserialize)]
struct ModuleInput {
    module: String,
}

#[derive(Debug, Deserialize)]
struct SetInput {
    module: String,
    value: Value,
}

fn module_schema(extra: Option<(&str, Value)>) -> Value {
    let mut properties = json!({
        "module": {
            "type": "string",
            "description": "Name of the memory module"
        }
    });
    let mut required = vec!["module"];
    if let Some((name, schema)) = extra {
        properties[name] = schema;
        required.push(name);
    }
    json!({
        "type": "object",
        "required": required,
        "properties": properties
    })
}

#[async_trait]
impl Tool for WorkingMemoryTool {
    fn definitions(&self) -> Vec<ToolDefinition> {
        vec![
            ToolDefinition::new(
                "memory_get",
                "Read a working memory module",
                module_schema(None),
            ),
            ToolDefinition::new(
                "memory_set",
                "Create or overwrite a working memory module with any JSON value",
                module_schema(Some((
                    "value",
                    json!({"description": "JSON value to store"}),
                ))),
            ),
            ToolDefinition::new(
                "memory_delete",
                "Delete a working memory module",
                module_schema(None),
            ),
            ToolDefinition::new(
                "memory_list",
                "List the names of all working memory modules",
                json!({"type": "object", "properties": {}}),
            ),
        ]
    }

    async fn invoke(
        &self,
        function: &str,
        arguments: Map<String, Value>,
        ctx: ToolContext,
    ) -> Result<ToolResult, ToolError> {
        let conv = ctx.conversation_id.as_str();
        match function {
            "memory_get" => {
                let input: ModuleInput = ToolError::parse_args(arguments)?;
                match ctx.memory.get(conv, &input.module) {
                    Ok(value) => Ok(ToolResult::json(&value)),
                    Err(DbError::ModuleNotFound { module, .. }) => {
                        Ok(ToolResult::failure(format!("No memory module named '{module}'")))
                    }
                    Err(e) => Err(e.into()),
                }
            }
            "memory_set" => {
                let input: SetInput = ToolError::parse_args(arguments)?;
                ctx.memory.upsert(conv, &input.module, input.value).await?;
                Ok(ToolResult::success(format!("Stored '{}'", input.module)))
            }
            "memory_delete" => {
                let input: ModuleInput = ToolError::parse_args(arguments)?;
                ctx.memory.delete(conv, &input.module).await?;
                Ok(ToolResult::success(format!("Deleted '{}'", input.module)))
            }
            "memory_list" => {
                let names = ctx.memory.list_names(conv)?;
                Ok(ToolResult::json(&json!(names)))
            }
            other => Err(ToolError::UnknownFunction(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::memory::MemoryStore;

    fn test_context() -> ToolContext {
        let db = Database::open_in_memory().unwrap();
        db.create_conversation("test-conv").unwrap();
        ToolContext::new("test-conv", MemoryStore::new(db))
    }

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_set_get_list_delete() {
        let ctx = test_context();
        let tool = WorkingMemoryTool;

        let set = tool
            .invoke(
                "memory_set",
                args(json!({"module": "plan", "value": {"steps": ["a", "b"]}})),
                ctx.clone(),
            )
            .await
            .unwrap();
        assert!(set.success);

        let got = tool
            .invoke("memory_get", args(json!({"module": "plan"})), ctx.clone())
            .await
            .unwrap();
        let value: Value = serde_json::from_str(&got.output).unwrap();
        assert_eq!(value, json!({"steps": ["a", "b"]}));

        let listed = tool
            .invoke("memory_list", Map::new(), ctx.clone())
            .await
            .unwrap();
        let names: Vec<String> = serde_json::from_str(&listed.output).unwrap();
        assert_eq!(names, vec!["plan"]);

        tool.invoke("memory_delete", args(json!({"module": "plan"})), ctx.clone())
            .await
            .unwrap();
        let missing = tool
            .invoke("memory_get", args(json!({"module": "plan"})), ctx)
            .await
            .unwrap();
        assert!(!missing.success);
    }

    #[tokio::test]
    async fn test_unknown_function() {
        let err = WorkingMemoryTool
            .invoke("memory_explode", Map::new(), test_context())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::UnknownFunction(_)));
    }
}

//! Tool implementations and the catalog that exposes them to the model
//!
//! Tools are stateless singletons; everything a call needs arrives through
//! `ToolContext`.

mod example;
mod working_memory;

pub use example::ExampleTool;
pub use working_memory::WorkingMemoryTool;

use crate::db::{DbError, ToolResult};
use crate::llm::ToolDefinition;
use crate::memory::MemoryStore;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Failure raised by a tool. The controller turns these into failed results.
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("Unknown function: {0}")]
    UnknownFunction(String),
    #[error(transparent)]
    Storage(#[from] DbError),
    #[error("{0}")]
    Failed(String),
}

impl ToolError {
    /// Parse the argument object into a typed input
    pub fn parse_args<T: serde::de::DeserializeOwned>(
        arguments: Map<String, Value>,
    ) -> Result<T, ToolError> {
        serde_json::from_value(Value::Object(arguments))
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))
    }
}

/// Per-call context
#[derive(Clone)]
pub struct ToolContext {
    /// The conversation this call belongs to
    pub conversation_id: String,

    /// Working memory of the conversation
    pub memory: MemoryStore,
}

impl ToolContext {
    pub fn new(conversation_id: impl Into<String>, memory: MemoryStore) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            memory,
        }
    }
}

/// A capability the model can invoke. One tool may expose several functions.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Function schemas this tool answers to
    fn definitions(&self) -> Vec<ToolDefinition>;

    /// Run `function` with an argument object
    async fn invoke(
        &self,
        function: &str,
        arguments: Map<String, Value>,
        ctx: ToolContext,
    ) -> Result<ToolResult, ToolError>;
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CatalogError {
    #[error("Tool not found: {0}")]
    NotFound(String),
}

/// Function name to tool mapping, keeping registration order for schemas
#[derive(Default)]
pub struct ToolCatalog {
    order: Vec<String>,
    entries: HashMap<String, (Arc<dyn Tool>, ToolDefinition)>,
}

impl ToolCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog with every built-in tool
    pub fn standard() -> Self {
        let tools: Vec<Arc<dyn Tool>> = vec![Arc::new(ExampleTool), Arc::new(WorkingMemoryTool)];
        Self::from_tools(tools)
    }

    pub fn from_tools(tools: Vec<Arc<dyn Tool>>) -> Self {
        let mut catalog = Self::new();
        for tool in tools {
            catalog.register(tool);
        }
        catalog
    }

    /// Index `tool` under every function it advertises. A later registration
    /// of the same name replaces the earlier one but keeps its position.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        for definition in tool.definitions() {
            let name = definition.name.clone();
            if self
                .entries
                .insert(name.clone(), (Arc::clone(&tool), definition))
                .is_some()
            {
                tracing::debug!(tool = %name, "Replaced tool registration");
            } else {
                self.order.push(name);
            }
        }
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Tool>, CatalogError> {
        self.entries
            .get(name)
            .map(|(tool, _)| Arc::clone(tool))
            .ok_or_else(|| CatalogError::NotFound(name.to_string()))
    }

    /// Schemas for `names`, or every registered function in registration
    /// order. Unknown names are skipped.
    pub fn schemas_for(&self, names: Option<&[String]>) -> Vec<ToolDefinition> {
        match names {
            None => self
                .order
                .iter()
                .filter_map(|name| self.entries.get(name))
                .map(|(_, definition)| definition.clone())
                .collect(),
            Some(names) => names
                .iter()
                .filter_map(|name| {
                    let found = self.entries.get(name);
                    if found.is_none() {
                        tracing::warn!(tool = %name, "Requested tool is not registered");
                    }
                    found
                })
                .map(|(_, definition)| definition.clone())
                .collect(),
        }
    }

    pub fn names(&self) -> &[String] {
        &self.order
    }
}

//! Tools an agent can call.
//!
//! A tool is a named function with a JSON parameter schema. The model
//! chooses when to call it; the agent core parses the arguments and feeds
//! the returned string back to the model.

mod web;

pub use web::WebSearch;

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::llm::ToolDefinition;

/// Trait for agent tools.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Name the model uses to call this tool. Unique within one agent.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema of the arguments object.
    fn parameters_schema(&self) -> Value;

    /// Run the tool with parsed arguments.
    async fn execute(&self, args: Value) -> anyhow::Result<String>;

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// Outcome of one tool call, fed back to the model as a tool message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub name: String,
    /// Tool output, or a serialized error payload on failure.
    pub content: String,
    #[serde(skip)]
    pub is_error: bool,
}

impl ToolResult {
    pub fn ok(tool_call_id: impl Into<String>, name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            name: name.into(),
            content: content.into(),
            is_error: false,
        }
    }

    /// Failure result carrying `{"success": false, "error": message}`.
    pub fn failure(tool_call_id: impl Into<String>, name: impl Into<String>, error: impl Into<String>) -> Self {
        let payload = serde_json::json!({ "success": false, "error": error.into() });
        Self {
            tool_call_id: tool_call_id.into(),
            name: name.into(),
            content: payload.to_string(),
            is_error: true,
        }
    }
}

type ToolFn = Arc<dyn Fn(Value) -> BoxFuture<'static, anyhow::Result<String>> + Send + Sync>;

/// Tool backed by an async closure.
#[derive(Clone)]
pub struct FunctionTool {
    name: String,
    description: String,
    parameters: Value,
    func: ToolFn,
}

impl FunctionTool {
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        func: F,
    ) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<String>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            func: Arc::new(move |args| Box::pin(func(args))),
        }
    }
}

#[async_trait]
impl Tool for FunctionTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        self.parameters.clone()
    }

    async fn execute(&self, args: Value) -> anyhow::Result<String> {
        (self.func)(args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn function_tool_runs_closure() {
        let tool = FunctionTool::new(
            "echo",
            "Echo the input",
            json!({"type": "object", "properties": {"text": {"type": "string"}}}),
            |args| async move {
                args["text"]
                    .as_str()
                    .map(str::to_string)
                    .ok_or_else(|| anyhow::anyhow!("Missing 'text' argument"))
            },
        );

        assert_eq!(tool.execute(json!({"text": "hi"})).await.unwrap(), "hi");
        assert!(tool.execute(json!({})).await.is_err());
        assert_eq!(tool.definition().name, "echo");
    }

    #[test]
    fn failure_result_serializes_error_payload() {
        let result = ToolResult::failure("call_1", "lookup", "Tool not found: lookup");
        assert!(result.is_error);
        let payload: Value = serde_json::from_str(&result.content).unwrap();
        assert_eq!(payload, json!({"success": false, "error": "Tool not found: lookup"}));
    }
}

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::llm::ChatMessage;

/// Turn budget used when the context does not set one.
pub const DEFAULT_MAX_TURNS: u32 = 25;

/// Per-invocation state carried through a task and its hand-offs.
///
/// Created by the caller for each task, cloned (shallowly) on hand-off and
/// dropped when the task completes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContext {
    /// Names of the agents this task was handed to, in order. Append-only.
    #[serde(default)]
    pub handoff_tracker: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handoff_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conversation_history: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_turns: Option<u32>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_tool_call: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caller_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_query: Option<String>,
    /// Caller-supplied extras.
    #[serde(default, flatten)]
    pub metadata: Map<String, Value>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = Some(max_turns);
        self
    }

    pub fn with_original_query(mut self, query: impl Into<String>) -> Self {
        self.original_query = Some(query.into());
        self
    }

    pub fn with_history(mut self, history: Vec<ChatMessage>) -> Self {
        self.conversation_history = history;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn turn_budget(&self) -> u32 {
        self.max_turns.unwrap_or(DEFAULT_MAX_TURNS)
    }

    /// Whether the caller flagged this interaction as worth keeping long-term.
    pub fn is_important(&self) -> bool {
        self.metadata
            .get("important")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Echo of this context plus the execution id, for [`AgentResponse::metadata`].
    pub fn to_metadata(&self, execution_id: Uuid) -> Value {
        let mut value = serde_json::to_value(self).unwrap_or_else(|_| json!({}));
        if let Value::Object(map) = &mut value {
            map.insert("executionId".to_string(), json!(execution_id));
        }
        value
    }
}

/// Result of running a task on an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentResponse {
    pub content: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: Value,
    /// Opaque backend responses, kept for audit.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub raw_responses: Vec<Value>,
    /// Same text as `content`.
    #[serde(rename = "final_output")]
    pub final_output: String,
}

impl AgentResponse {
    pub fn success(content: impl Into<String>, metadata: Value) -> Self {
        let content = content.into();
        Self {
            final_output: content.clone(),
            content,
            success: true,
            error: None,
            metadata,
            raw_responses: Vec::new(),
        }
    }

    pub fn failure(error: impl Into<String>, metadata: Value) -> Self {
        let error = error.into();
        let content = format!("Error: {}", error);
        Self {
            final_output: content.clone(),
            content,
            success: false,
            error: Some(error),
            metadata,
            raw_responses: Vec::new(),
        }
    }

    pub fn with_raw_responses(mut self, raw: Vec<Value>) -> Self {
        self.raw_responses = raw;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_echoes_context_and_execution_id() {
        let ctx = ExecutionContext::new()
            .with_max_turns(3)
            .with_metadata("tenant", json!("acme"));
        let id = Uuid::new_v4();
        let meta = ctx.to_metadata(id);

        assert_eq!(meta["maxTurns"], json!(3));
        assert_eq!(meta["tenant"], json!("acme"));
        assert_eq!(meta["handoffTracker"], json!([]));
        assert_eq!(meta["executionId"], json!(id));
    }

    #[test]
    fn failure_prefixes_content_and_mirrors_final_output() {
        let resp = AgentResponse::failure("backend down", json!({}));
        assert!(!resp.success);
        assert_eq!(resp.content, "Error: backend down");
        assert_eq!(resp.final_output, resp.content);

        let wire = serde_json::to_value(&resp).unwrap();
        assert_eq!(wire["final_output"], json!("Error: backend down"));
        assert!(wire.get("rawResponses").is_none());
    }

    #[test]
    fn turn_budget_defaults_to_25() {
        assert_eq!(ExecutionContext::new().turn_budget(), DEFAULT_MAX_TURNS);
        assert_eq!(ExecutionContext::new().with_max_turns(2).turn_budget(), 2);
    }
}

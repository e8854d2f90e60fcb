//! LLM backend abstraction.
//!
//! The agent core talks to the model through [`LlmClient`], which exposes a
//! one-shot completion and a streaming completion. The only production
//! implementation is [`OpenAiClient`] (any OpenAI-compatible endpoint).

mod openai;
#[cfg(test)]
pub(crate) mod scripted;

pub use openai::OpenAiClient;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Errors raised by an LLM backend.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("request to LLM backend failed: {0}")]
    Transport(String),

    #[error("LLM backend returned status {status}: {message}")]
    Api { status: u16, message: String },

    #[error("could not decode LLM backend response: {0}")]
    Decode(String),

    #[error("LLM backend stream failed: {0}")]
    Stream(String),
}

/// Message role in a chat conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A single chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::text(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::text(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::text(Role::Assistant, content)
    }

    /// Assistant turn that requested tool calls.
    pub fn assistant_tool_calls(content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content,
            tool_calls,
            tool_call_id: None,
            name: None,
        }
    }

    /// Result of a tool call, fed back to the model.
    pub fn tool(tool_call_id: impl Into<String>, name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
            name: Some(name.into()),
        }
    }

    fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
        }
    }
}

/// A tool call requested by the model. `arguments` is the raw JSON text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }
}

/// Function-calling surface entry sent to the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Sampling parameters. Unknown keys are passed through to the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            temperature: Some(0.7),
            top_p: None,
            max_tokens: None,
            extra: serde_json::Map::new(),
        }
    }
}

/// A completion request.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolDefinition>,
    pub settings: ModelSettings,
}

/// A non-streaming completion response.
#[derive(Debug, Clone, Default)]
pub struct CompletionResponse {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    /// Raw backend payload, kept for audit.
    pub raw: Value,
}

impl CompletionResponse {
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// One unit of streamed backend output.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendEvent {
    /// Text appended to the assistant message.
    TextDelta(String),
    /// Fragment of a tool call. `arguments` is partial JSON text.
    ToolCallDelta {
        id: String,
        name: Option<String>,
        arguments: String,
    },
    /// The backend finished emitting a tool-call batch.
    ToolCallsComplete(Vec<ToolCall>),
}

pub type BackendStream = BoxStream<'static, Result<BackendEvent, LlmError>>;

/// Trait for LLM backends.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Run a single completion.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;

    /// Start a streaming completion.
    async fn stream_complete(&self, request: CompletionRequest) -> Result<BackendStream, LlmError>;
}

//! Scripted backend for tests: replays queued responses and records requests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::json;

use super::{
    BackendEvent, BackendStream, CompletionRequest, CompletionResponse, LlmClient, LlmError,
    ToolCall,
};

#[derive(Default)]
pub(crate) struct ScriptedLlm {
    completions: Mutex<VecDeque<Result<CompletionResponse, LlmError>>>,
    streams: Mutex<VecDeque<Vec<Result<BackendEvent, LlmError>>>>,
    requests: Mutex<Vec<CompletionRequest>>,
    hang: bool,
}

impl ScriptedLlm {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Backend whose calls never resolve.
    pub(crate) fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::default()
        }
    }

    pub(crate) fn with_text(self, text: &str) -> Self {
        self.push(Ok(CompletionResponse {
            content: Some(text.to_string()),
            tool_calls: Vec::new(),
            raw: json!({ "content": text }),
        }))
    }

    pub(crate) fn with_tool_calls(self, calls: Vec<ToolCall>) -> Self {
        self.push(Ok(CompletionResponse {
            content: None,
            tool_calls: calls,
            raw: json!({ "tool_calls": true }),
        }))
    }

    pub(crate) fn with_error(self, error: LlmError) -> Self {
        self.push(Err(error))
    }

    pub(crate) fn with_stream(self, events: Vec<BackendEvent>) -> Self {
        self.streams
            .lock()
            .unwrap()
            .push_back(events.into_iter().map(Ok).collect());
        self
    }

    pub(crate) fn with_failing_stream(self, events: Vec<BackendEvent>, error: LlmError) -> Self {
        let mut script: Vec<_> = events.into_iter().map(Ok).collect();
        script.push(Err(error));
        self.streams.lock().unwrap().push_back(script);
        self
    }

    pub(crate) fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub(crate) fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn push(self, response: Result<CompletionResponse, LlmError>) -> Self {
        self.completions.lock().unwrap().push_back(response);
        self
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.requests.lock().unwrap().push(request);
        if self.hang {
            futures::future::pending::<()>().await;
        }
        self.completions
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::Transport("script exhausted".to_string())))
    }

    async fn stream_complete(&self, request: CompletionRequest) -> Result<BackendStream, LlmError> {
        self.requests.lock().unwrap().push(request);
        if self.hang {
            futures::future::pending::<()>().await;
        }
        let script = self
            .streams
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| LlmError::Transport("stream script exhausted".to_string()))?;
        Ok(Box::pin(futures::stream::iter(script)))
    }
}

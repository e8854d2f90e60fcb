//! Streaming task execution.
//!
//! A task streams backend output to a [`StreamCallbacks`] sink. Exactly one
//! of `on_complete` or `on_error` is called per task.

use std::collections::HashMap;

use futures::StreamExt;
use serde_json::json;

use crate::llm::{BackendEvent, ChatMessage, CompletionRequest, ToolCall};
use crate::tools::ToolResult;

use super::{Agent, AgentError, AgentResponse, ExecutionContext};

const PROCESSING_REQUEST: &str = "\n\nProcessing your request...";
const PROCESSING_RESULTS: &str = "\n\nProcessing tool results...\n\n";

/// Receiver of streaming task events. All methods default to no-ops.
pub trait StreamCallbacks: Send + Sync {
    fn on_start(&self) {}

    fn on_token(&self, _token: &str) {}

    fn on_tool_call(&self, _call: &ToolCall) {}

    fn on_handoff(&self, _source: &str, _target: &str) {}

    fn on_complete(&self, _response: AgentResponse) {}

    fn on_error(&self, _error: AgentError) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamState {
    Idle,
    Started,
    TokenStreaming,
    ToolCallAccumulating,
    ToolExecuting,
    HandoffInProgress,
    FollowUp,
    Completed,
    Errored,
}

struct StateMachine<'a> {
    agent: &'a str,
    state: StreamState,
}

impl<'a> StateMachine<'a> {
    fn new(agent: &'a str) -> Self {
        Self {
            agent,
            state: StreamState::Idle,
        }
    }

    fn transition(&mut self, next: StreamState) {
        if self.state != next {
            tracing::trace!(agent = %self.agent, from = ?self.state, to = ?next, "Stream state");
            self.state = next;
        }
    }
}

#[derive(Debug, Default)]
struct PendingToolCall {
    name: Option<String>,
    arguments: String,
}

/// Buffers tool-call fragments per id. Arguments are only parsed after the
/// batch is finalized.
#[derive(Debug, Default)]
struct ToolCallBuffer {
    order: Vec<String>,
    calls: HashMap<String, PendingToolCall>,
}

impl ToolCallBuffer {
    fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    fn push(&mut self, id: String, name: Option<String>, fragment: &str) {
        let entry = self.calls.entry(id.clone()).or_insert_with(|| {
            self.order.push(id);
            PendingToolCall::default()
        });
        if entry.name.is_none() {
            entry.name = name;
        }
        entry.arguments.push_str(fragment);
    }

    /// Close the batch. A batch reported by the backend wins over the
    /// buffered fragments; otherwise the buffer is assembled in arrival order.
    fn finalize(&mut self, reported: Vec<ToolCall>) -> Vec<ToolCall> {
        let order = std::mem::take(&mut self.order);
        let mut calls = std::mem::take(&mut self.calls);
        if !reported.is_empty() {
            return reported;
        }
        order
            .into_iter()
            .filter_map(|id| {
                let pending = calls.remove(&id)?;
                let name = pending.name?;
                Some(ToolCall::new(id, name, pending.arguments))
            })
            .collect()
    }
}

impl Agent {
    /// Stream `query`, reporting progress through `callbacks`.
    pub async fn stream_task(
        &self,
        query: &str,
        callbacks: &dyn StreamCallbacks,
        context: ExecutionContext,
    ) {
        if query.trim().is_empty() {
            callbacks.on_error(AgentError::EmptyQuery(self.name.clone()));
            return;
        }

        match self.drive_stream(query, callbacks, context).await {
            Ok(response) => callbacks.on_complete(response),
            Err(e) => {
                tracing::error!(agent = %self.name, error = %e, "Stream failed");
                callbacks.on_error(e);
            }
        }
    }

    async fn drive_stream(
        &self,
        query: &str,
        callbacks: &dyn StreamCallbacks,
        context: ExecutionContext,
    ) -> Result<AgentResponse, AgentError> {
        let mut machine = StateMachine::new(&self.name);
        let result = self
            .consume_stream(query, callbacks, context, &mut machine)
            .await;
        machine.transition(match result {
            Ok(_) => StreamState::Completed,
            Err(_) => StreamState::Errored,
        });
        result
    }

    async fn consume_stream(
        &self,
        query: &str,
        callbacks: &dyn StreamCallbacks,
        context: ExecutionContext,
        machine: &mut StateMachine<'_>,
    ) -> Result<AgentResponse, AgentError> {
        callbacks.on_start();
        machine.transition(StreamState::Started);

        let instructions = self.resolve_instructions(&context);
        let request = self.completion_request(&instructions, query);
        let history = self.handoff_history(&context, query);
        let max_turns = context.turn_budget();
        let mut turns_left = max_turns;

        let mut stream = self.llm.stream_complete(request.clone()).await?;
        let mut content = String::new();
        let mut buffer = ToolCallBuffer::default();

        loop {
            let event = match stream.next().await {
                Some(event) => Some(event?),
                None => None,
            };
            let finished = event.is_none();
            if finished && buffer.is_empty() {
                break;
            }

            if turns_left == 0 {
                return Err(AgentError::TurnLimitExceeded {
                    max_turns,
                    agent: self.name.clone(),
                });
            }

            let batch = match event {
                Some(BackendEvent::TextDelta(text)) => {
                    machine.transition(StreamState::TokenStreaming);
                    callbacks.on_token(&text);
                    content.push_str(&text);
                    None
                }
                Some(BackendEvent::ToolCallDelta { id, name, arguments }) => {
                    if buffer.is_empty() {
                        callbacks.on_token(PROCESSING_REQUEST);
                    }
                    machine.transition(StreamState::ToolCallAccumulating);
                    buffer.push(id, name, &arguments);
                    None
                }
                Some(BackendEvent::ToolCallsComplete(calls)) => Some(buffer.finalize(calls)),
                // Stream ended with fragments still buffered.
                None => Some(buffer.finalize(Vec::new())),
            };

            if let Some(batch) = batch.filter(|b| !b.is_empty()) {
                turns_left -= 1;
                machine.transition(StreamState::ToolExecuting);
                for call in &batch {
                    callbacks.on_tool_call(call);
                }

                let outcome = self.handle_tool_calls(&batch, &context, &history).await;
                if let Some(handoff) = outcome.handoff {
                    machine.transition(StreamState::HandoffInProgress);
                    callbacks.on_handoff(&self.name, &handoff.target);
                    return Ok(handoff.response);
                }

                machine.transition(StreamState::FollowUp);
                callbacks.on_token(PROCESSING_RESULTS);
                let follow_up = self
                    .follow_up(&request, &batch, &outcome.tool_results)
                    .await?;
                callbacks.on_token(&follow_up);
                content.push_str(&follow_up);
            }

            if finished {
                break;
            }
        }

        Ok(AgentResponse::success(
            content,
            json!({
                "model": self.model,
                "query": query,
                "context": context,
                "agent": self.name,
            }),
        ))
    }

    /// One non-streaming call carrying the batch's tool results.
    async fn follow_up(
        &self,
        request: &CompletionRequest,
        batch: &[ToolCall],
        results: &[ToolResult],
    ) -> Result<String, AgentError> {
        let mut request = request.clone();
        request
            .messages
            .push(ChatMessage::assistant_tool_calls(None, batch.to_vec()));
        request.messages.extend(
            results
                .iter()
                .map(|r| ChatMessage::tool(&r.tool_call_id, &r.name, &r.content)),
        );
        let response = self.llm.complete(request).await?;
        Ok(response.content.unwrap_or_default())
    }
}

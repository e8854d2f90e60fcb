//! OpenAI-compatible chat completions client.

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest_eventsource::{Event, RequestBuilderExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::{
    BackendEvent, BackendStream, ChatMessage, CompletionRequest, CompletionResponse, LlmClient,
    LlmError, ToolCall,
};

/// Client for any endpoint speaking the OpenAI `/chat/completions` dialect.
#[derive(Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl OpenAiClient {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: base_url.into(),
        }
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    fn build_body(request: &CompletionRequest, stream: bool) -> Value {
        let mut body = json!({
            "model": request.model,
            "messages": request.messages.iter().map(wire_message).collect::<Vec<_>>(),
            "stream": stream,
        });
        if !request.tools.is_empty() {
            body["tools"] = request
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect();
        }
        let settings = &request.settings;
        if let Some(t) = settings.temperature {
            body["temperature"] = json!(t);
        }
        if let Some(p) = settings.top_p {
            body["top_p"] = json!(p);
        }
        if let Some(m) = settings.max_tokens {
            body["max_tokens"] = json!(m);
        }
        for (key, value) in &settings.extra {
            body[key] = value.clone();
        }
        body
    }
}

/// Convert a [`ChatMessage`] to the OpenAI wire format.
fn wire_message(message: &ChatMessage) -> Value {
    let mut value = json!({ "role": message.role });
    if let Some(content) = &message.content {
        value["content"] = json!(content);
    }
    if !message.tool_calls.is_empty() {
        value["tool_calls"] = message
            .tool_calls
            .iter()
            .map(|c| {
                json!({
                    "id": c.id,
                    "type": "function",
                    "function": { "name": c.name, "arguments": c.arguments },
                })
            })
            .collect();
    }
    if let Some(id) = &message.tool_call_id {
        value["tool_call_id"] = json!(id);
    }
    if let Some(name) = &message.name {
        value["name"] = json!(name);
    }
    value
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let body = Self::build_body(&request, false);
        info!(
            model = request.model.as_str(),
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Sending completion request"
        );

        let response = self
            .http
            .post(self.completions_url())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let raw: Value = response
            .json()
            .await
            .map_err(|e| LlmError::Decode(e.to_string()))?;
        debug!("Received completion response");
        parse_completion(raw)
    }

    async fn stream_complete(&self, request: CompletionRequest) -> Result<BackendStream, LlmError> {
        let body = Self::build_body(&request, true);
        info!(
            model = request.model.as_str(),
            messages = request.messages.len(),
            "Opening streaming completion"
        );

        let source = self
            .http
            .post(self.completions_url())
            .bearer_auth(&self.api_key)
            .json(&body)
            .eventsource()
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        Ok(Box::pin(translate_events(source)))
    }
}

fn translate_events(
    mut source: reqwest_eventsource::EventSource,
) -> impl Stream<Item = Result<BackendEvent, LlmError>> {
    async_stream::try_stream! {
        let mut assembler = DeltaAssembler::default();
        while let Some(event) = source.next().await {
            match event {
                Ok(Event::Open) => {}
                Ok(Event::Message(message)) => {
                    if message.data.trim() == "[DONE]" {
                        break;
                    }
                    let chunk: StreamChunk = serde_json::from_str(&message.data)
                        .map_err(|e| LlmError::Decode(e.to_string()))?;
                    for out in assembler.apply(chunk) {
                        yield out;
                    }
                }
                Err(reqwest_eventsource::Error::StreamEnded) => break,
                Err(reqwest_eventsource::Error::InvalidStatusCode(status, response)) => {
                    let message = response.text().await.unwrap_or_default();
                    Err::<(), _>(LlmError::Api { status: status.as_u16(), message })?;
                }
                Err(e) => {
                    Err::<(), _>(LlmError::Stream(e.to_string()))?;
                }
            }
        }
        source.close();
        if let Some(out) = assembler.finish() {
            yield out;
        }
    }
}

fn parse_completion(raw: Value) -> Result<CompletionResponse, LlmError> {
    let parsed: CompletionBody =
        serde_json::from_value(raw.clone()).map_err(|e| LlmError::Decode(e.to_string()))?;
    let message = parsed
        .choices
        .into_iter()
        .next()
        .map(|c| c.message)
        .ok_or_else(|| LlmError::Decode("response has no choices".to_string()))?;

    let tool_calls = message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|c| ToolCall::new(c.id, c.function.name, c.function.arguments))
        .collect();

    Ok(CompletionResponse {
        content: message.content,
        tool_calls,
        raw,
    })
}

#[derive(Deserialize)]
struct CompletionBody {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<StreamDelta>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallChunk>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallChunk {
    #[serde(default)]
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionChunk>,
}

#[derive(Debug, Deserialize)]
struct FunctionChunk {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Default)]
struct PendingCall {
    id: String,
    name: String,
    arguments: String,
}

/// Turns OpenAI chunk deltas into [`BackendEvent`]s.
///
/// Only the first fragment of each tool call carries its id; later fragments
/// are matched by `index`.
#[derive(Debug, Default)]
struct DeltaAssembler {
    pending: Vec<PendingCall>,
}

impl DeltaAssembler {
    fn apply(&mut self, chunk: StreamChunk) -> Vec<BackendEvent> {
        let mut out = Vec::new();
        for choice in chunk.choices {
            let delta = choice.delta.unwrap_or_default();
            if let Some(text) = delta.content.filter(|t| !t.is_empty()) {
                out.push(BackendEvent::TextDelta(text));
            }
            for fragment in delta.tool_calls.unwrap_or_default() {
                while self.pending.len() <= fragment.index {
                    self.pending.push(PendingCall::default());
                }
                let call = &mut self.pending[fragment.index];
                if let Some(id) = fragment.id.filter(|id| !id.is_empty()) {
                    call.id = id;
                }
                if call.id.is_empty() {
                    call.id = format!("call_{}", fragment.index);
                }
                let (name, arguments) = match fragment.function {
                    Some(f) => (f.name, f.arguments.unwrap_or_default()),
                    None => (None, String::new()),
                };
                if let Some(name) = &name {
                    call.name.push_str(name);
                }
                call.arguments.push_str(&arguments);
                out.push(BackendEvent::ToolCallDelta {
                    id: call.id.clone(),
                    name,
                    arguments,
                });
            }
            if choice.finish_reason.as_deref() == Some("tool_calls") {
                out.extend(self.finish());
            }
        }
        out
    }

    fn finish(&mut self) -> Option<BackendEvent> {
        if self.pending.is_empty() {
            return None;
        }
        let calls: Vec<ToolCall> = std::mem::take(&mut self.pending)
            .into_iter()
            .filter(|c| {
                if c.name.is_empty() {
                    warn!(id = c.id.as_str(), "Dropping streamed tool call without a name");
                }
                !c.name.is_empty()
            })
            .map(|c| ToolCall::new(c.id, c.name, c.arguments))
            .collect();
        (!calls.is_empty()).then_some(BackendEvent::ToolCallsComplete(calls))
    }
}

//! Server-sent events pushed to API clients, and the callback sink that
//! produces them.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::agent::{Agent, AgentError, AgentResponse, StreamCallbacks};
use crate::agents::TriageResult;
use crate::llm::ToolCall;
use crate::orchestrator::OrchestratorCallbacks;

/// One event on the agent-query stream. `Complete` and `Error` are terminal.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    Start {
        timestamp: i64,
    },
    Token {
        token: String,
    },
    ToolCall {
        id: String,
        name: String,
        arguments: String,
    },
    Handoff {
        from: String,
        to: String,
        timestamp: i64,
    },
    Triage {
        #[serde(flatten)]
        result: TriageResult,
    },
    ResearchStart {
        timestamp: i64,
    },
    ResearchComplete {
        timestamp: i64,
        citations: usize,
    },
    ReportStart {
        timestamp: i64,
    },
    Heartbeat {
        timestamp: i64,
    },
    Trace {
        trace_id: String,
        spans: Vec<Value>,
    },
    Complete {
        success: bool,
        content: String,
        metadata: Value,
    },
    Error {
        message: String,
    },
}

impl ClientEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            ClientEvent::Start { .. } => "start",
            ClientEvent::Token { .. } => "token",
            ClientEvent::ToolCall { .. } => "tool_call",
            ClientEvent::Handoff { .. } => "handoff",
            ClientEvent::Triage { .. } => "triage",
            ClientEvent::ResearchStart { .. } => "research_start",
            ClientEvent::ResearchComplete { .. } => "research_complete",
            ClientEvent::ReportStart { .. } => "report_start",
            ClientEvent::Heartbeat { .. } => "heartbeat",
            ClientEvent::Trace { .. } => "trace",
            ClientEvent::Complete { .. } => "complete",
            ClientEvent::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ClientEvent::Complete { .. } | ClientEvent::Error { .. })
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Callback sink that turns orchestrator callbacks into [`ClientEvent`]s on
/// a channel. Sends after the receiver is gone are ignored.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ClientEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<ClientEvent>) -> Self {
        Self { tx }
    }

    fn send(&self, event: ClientEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("Event receiver dropped");
        }
    }
}

impl StreamCallbacks for ChannelSink {
    fn on_start(&self) {
        self.send(ClientEvent::Start {
            timestamp: now_millis(),
        });
    }

    fn on_token(&self, token: &str) {
        self.send(ClientEvent::Token {
            token: token.to_string(),
        });
    }

    fn on_tool_call(&self, call: &ToolCall) {
        self.send(ClientEvent::ToolCall {
            id: call.id.clone(),
            name: call.name.clone(),
            arguments: call.arguments.clone(),
        });
    }

    fn on_handoff(&self, source: &str, target: &str) {
        self.send(ClientEvent::Handoff {
            from: source.to_string(),
            to: target.to_string(),
            timestamp: now_millis(),
        });
    }

    fn on_complete(&self, response: AgentResponse) {
        if let Some(trace_id) = response.metadata.get("traceId").and_then(Value::as_str) {
            let spans = response
                .metadata
                .get("spans")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            self.send(ClientEvent::Trace {
                trace_id: trace_id.to_string(),
                spans,
            });
        }
        self.send(ClientEvent::Complete {
            success: response.success,
            content: response.content,
            metadata: response.metadata,
        });
    }

    fn on_error(&self, error: AgentError) {
        self.send(ClientEvent::Error {
            message: error.to_string(),
        });
    }
}

impl OrchestratorCallbacks for ChannelSink {
    fn on_triage_complete(&self, result: &TriageResult) {
        self.send(ClientEvent::Triage {
            result: result.clone(),
        });
    }

    fn on_research_start(&self) {
        self.send(ClientEvent::ResearchStart {
            timestamp: now_millis(),
        });
    }

    fn on_research_complete(&self, research: &str) {
        self.send(ClientEvent::ResearchComplete {
            timestamp: now_millis(),
            citations: Agent::count_citations(research),
        });
    }

    fn on_report_start(&self) {
        self.send(ClientEvent::ReportStart {
            timestamp: now_millis(),
        });
    }

    fn on_heartbeat(&self, at: DateTime<Utc>) {
        self.send(ClientEvent::Heartbeat {
            timestamp: at.timestamp_millis(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn drain(rx: &mut mpsc::UnboundedReceiver<ClientEvent>) -> Vec<ClientEvent> {
        let mut events = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            events.push(ev);
        }
        events
    }

    #[test]
    fn trace_event_precedes_complete_when_trace_id_present() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = ChannelSink::new(tx);

        sink.on_complete(AgentResponse::success(
            "report",
            json!({ "traceId": "trace_abc", "citations": 2 }),
        ));

        let events = drain(&mut rx);
        let names: Vec<_> = events.iter().map(ClientEvent::event_name).collect();
        assert_eq!(names, vec!["trace", "complete"]);
        assert!(events[1].is_terminal());
    }

    #[test]
    fn complete_without_trace_id_is_sent_alone() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = ChannelSink::new(tx);

        sink.on_complete(AgentResponse::success("done", json!({ "traceId": null })));

        let names: Vec<_> = drain(&mut rx).iter().map(ClientEvent::event_name).collect();
        assert_eq!(names, vec!["complete"]);
    }

    #[test]
    fn research_complete_counts_citations() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = ChannelSink::new(tx);

        sink.on_research_complete("Rust [1] is fast [2].");

        assert!(matches!(
            drain(&mut rx).as_slice(),
            [ClientEvent::ResearchComplete { citations: 2, .. }]
        ));
    }

    #[test]
    fn triage_payload_is_flattened() {
        let event = ClientEvent::Triage {
            result: TriageResult::fallback("why"),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "triage");
        assert_eq!(value["taskType"], "research");
        assert_eq!(value["reasoning"], "why");
    }

    #[test]
    fn sending_after_receiver_drop_is_harmless() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let sink = ChannelSink::new(tx);
        sink.on_token("lost");
        sink.on_error(AgentError::EmptyQuery("Research Agent".into()));
    }
}

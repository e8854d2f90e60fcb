//! Orchestrator callback surface and the sinks wrapping it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::agent::{AgentError, AgentResponse, StreamCallbacks};
use crate::agents::TriageResult;
use crate::llm::ToolCall;

/// Streaming callbacks for a whole orchestrated workflow.
pub trait OrchestratorCallbacks: StreamCallbacks {
    fn on_triage_complete(&self, _result: &TriageResult) {}

    fn on_research_start(&self) {}

    fn on_research_complete(&self, _research: &str) {}

    fn on_report_start(&self) {}

    fn on_heartbeat(&self, _at: DateTime<Utc>) {}
}

/// Forwards events until the first terminal one, then drops everything.
pub(crate) struct TerminalGuard<'a> {
    inner: &'a dyn OrchestratorCallbacks,
    finished: AtomicBool,
}

impl<'a> TerminalGuard<'a> {
    pub(crate) fn new(inner: &'a dyn OrchestratorCallbacks) -> Self {
        Self {
            inner,
            finished: AtomicBool::new(false),
        }
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    fn claim_terminal(&self) -> bool {
        self.finished
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn live(&self) -> Option<&'a dyn OrchestratorCallbacks> {
        (!self.is_finished()).then_some(self.inner)
    }
}

impl StreamCallbacks for TerminalGuard<'_> {
    fn on_start(&self) {
        if let Some(cb) = self.live() {
            cb.on_start();
        }
    }

    fn on_token(&self, token: &str) {
        if let Some(cb) = self.live() {
            cb.on_token(token);
        }
    }

    fn on_tool_call(&self, call: &ToolCall) {
        if let Some(cb) = self.live() {
            cb.on_tool_call(call);
        }
    }

    fn on_handoff(&self, source: &str, target: &str) {
        if let Some(cb) = self.live() {
            cb.on_handoff(source, target);
        }
    }

    fn on_complete(&self, response: AgentResponse) {
        if self.claim_terminal() {
            self.inner.on_complete(response);
        } else {
            tracing::debug!("Dropping completion after terminal event");
        }
    }

    fn on_error(&self, error: AgentError) {
        if self.claim_terminal() {
            self.inner.on_error(error);
        } else {
            tracing::debug!(error = %error, "Dropping error after terminal event");
        }
    }
}

impl OrchestratorCallbacks for TerminalGuard<'_> {
    fn on_triage_complete(&self, result: &TriageResult) {
        if let Some(cb) = self.live() {
            cb.on_triage_complete(result);
        }
    }

    fn on_research_start(&self) {
        if let Some(cb) = self.live() {
            cb.on_research_start();
        }
    }

    fn on_research_complete(&self, research: &str) {
        if let Some(cb) = self.live() {
            cb.on_research_complete(research);
        }
    }

    fn on_report_start(&self) {
        if let Some(cb) = self.live() {
            cb.on_report_start();
        }
    }

    fn on_heartbeat(&self, at: DateTime<Utc>) {
        if let Some(cb) = self.live() {
            cb.on_heartbeat(at);
        }
    }
}

/// Sink for one pipeline stage: progress goes to the workflow, the stage's
/// terminal event is captured for the pipeline to inspect.
pub(crate) struct StageSink<'a> {
    workflow: &'a TerminalGuard<'a>,
    outcome: Mutex<Option<Result<AgentResponse, AgentError>>>,
}

impl<'a> StageSink<'a> {
    pub(crate) fn new(workflow: &'a TerminalGuard<'a>) -> Self {
        Self {
            workflow,
            outcome: Mutex::new(None),
        }
    }

    pub(crate) fn into_outcome(self) -> Option<Result<AgentResponse, AgentError>> {
        self.outcome.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, outcome: Result<AgentResponse, AgentError>) {
        let mut slot = self.outcome.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if slot.is_none() {
            *slot = Some(outcome);
        }
    }
}

impl StreamCallbacks for StageSink<'_> {
    fn on_token(&self, token: &str) {
        self.workflow.on_token(token);
    }

    fn on_tool_call(&self, call: &ToolCall) {
        self.workflow.on_tool_call(call);
    }

    fn on_handoff(&self, source: &str, target: &str) {
        self.workflow.on_handoff(source, target);
    }

    fn on_complete(&self, response: AgentResponse) {
        self.record(Ok(response));
    }

    fn on_error(&self, error: AgentError) {
        self.record(Err(error));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Default)]
    struct Counter {
        tokens: Mutex<usize>,
        terminals: Mutex<usize>,
    }

    impl StreamCallbacks for Counter {
        fn on_token(&self, _token: &str) {
            *self.tokens.lock().unwrap() += 1;
        }
        fn on_complete(&self, _response: AgentResponse) {
            *self.terminals.lock().unwrap() += 1;
        }
        fn on_error(&self, _error: AgentError) {
            *self.terminals.lock().unwrap() += 1;
        }
    }

    impl OrchestratorCallbacks for Counter {}

    #[test]
    fn guard_forwards_one_terminal_and_silences_the_rest() {
        let counter = Counter::default();
        let guard = TerminalGuard::new(&counter);

        guard.on_token("a");
        guard.on_error(AgentError::Timeout(std::time::Duration::from_secs(1)));
        guard.on_token("b");
        guard.on_complete(AgentResponse::success("late", json!({})));

        assert_eq!(*counter.tokens.lock().unwrap(), 1);
        assert_eq!(*counter.terminals.lock().unwrap(), 1);
        assert!(guard.is_finished());
    }

    #[test]
    fn stage_sink_captures_first_outcome() {
        let counter = Counter::default();
        let guard = TerminalGuard::new(&counter);
        let sink = StageSink::new(&guard);

        sink.on_token("x");
        sink.on_complete(AgentResponse::success("done", json!({})));
        sink.on_error(AgentError::EmptyQuery("x".into()));

        assert_eq!(*counter.tokens.lock().unwrap(), 1);
        assert_eq!(*counter.terminals.lock().unwrap(), 0);
        assert_eq!(sink.into_outcome().unwrap().unwrap().content, "done");
    }
}

//! Orchestrator: triage, then research and/or report, or direct delegation.
//!
//! The pipeline is fixed. Streaming runs own a heartbeat timer and a timeout;
//! when the timeout fires the pipeline future is dropped, which also aborts
//! any backend request still in flight.

mod callbacks;

pub use callbacks::OrchestratorCallbacks;

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::Instrument;
use uuid::Uuid;

use crate::agent::{
    Agent, AgentError, AgentResponse, ExecutionContext, StreamCallbacks, DEFAULT_MAX_TURNS,
};
use crate::agents::{AgentKind, BuiltinAgents, TaskType, TriageResult};

use callbacks::{StageSink, TerminalGuard};

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorSettings {
    pub heartbeat_interval: Duration,
    pub timeout: Duration,
    /// Turn budget handed to every stage
    pub max_turns: u32,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
            max_turns: DEFAULT_MAX_TURNS,
        }
    }
}

/// Per-run workflow options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunConfig {
    #[serde(default)]
    pub workflow_name: Option<String>,
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub tracing_disabled: bool,
    /// Record queries and outputs in workflow logs.
    #[serde(default)]
    pub trace_include_sensitive_data: bool,
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
}

impl RunConfig {
    fn workflow_name(&self) -> &str {
        self.workflow_name.as_deref().unwrap_or("Agent orchestration")
    }

    fn new_trace_id(&self) -> Option<String> {
        (!self.tracing_disabled).then(|| format!("trace_{}", Uuid::new_v4().simple()))
    }
}

/// Outcome of a non-streaming workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestrationResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub metadata: Value,
}

/// Per-run bookkeeping shared by both entry points.
struct Workflow {
    started: Instant,
    trace_id: Option<String>,
    config: RunConfig,
}

impl Workflow {
    fn new(config: RunConfig) -> Self {
        Self {
            started: Instant::now(),
            trace_id: config.new_trace_id(),
            config,
        }
    }

    fn span(&self) -> tracing::Span {
        tracing::info_span!(
            "workflow",
            name = %self.config.workflow_name(),
            trace_id = self.trace_id.as_deref().unwrap_or("disabled"),
            group_id = self.config.group_id.as_deref().unwrap_or_default(),
        )
    }

    fn metadata(&self, triage: Option<&TriageResult>, citations: usize) -> Value {
        let mut meta = self.config.metadata.clone().unwrap_or_default();
        meta.insert(
            "taskType".to_string(),
            json!(triage.map(|t| t.task_type.as_str())),
        );
        meta.insert("reasoning".to_string(), json!(triage.map(|t| &t.reasoning)));
        meta.insert("citations".to_string(), json!(citations));
        meta.insert("traceId".to_string(), json!(self.trace_id));
        meta.insert(
            "workflowName".to_string(),
            json!(self.config.workflow_name()),
        );
        if let Some(group) = &self.config.group_id {
            meta.insert("groupId".to_string(), json!(group));
        }
        meta.insert(
            "durationMs".to_string(),
            json!(self.started.elapsed().as_millis() as u64),
        );
        Value::Object(meta)
    }
}

/// Prompt for the report stage after research.
fn report_prompt(query: &str, research: &str) -> String {
    format!(
        "Create a comprehensive report for the query: \"{}\"\n\nResearch findings:\n{}",
        query, research
    )
}

pub struct Orchestrator {
    agents: BuiltinAgents,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(agents: BuiltinAgents, settings: OrchestratorSettings) -> Self {
        Self { agents, settings }
    }

    pub fn agents(&self) -> &BuiltinAgents {
        &self.agents
    }

    pub fn settings(&self) -> OrchestratorSettings {
        self.settings
    }

    fn context(&self) -> ExecutionContext {
        ExecutionContext::new().with_max_turns(self.settings.max_turns)
    }

    pub fn count_citations(&self, text: &str) -> usize {
        Agent::count_citations(text)
    }

    /// Run the whole pipeline and return the final report.
    pub async fn handle_query(&self, query: &str, run_config: RunConfig) -> OrchestrationResult {
        let workflow = Workflow::new(run_config);
        let span = workflow.span();
        let run = self.run_pipeline(query, &workflow).instrument(span);

        match tokio::time::timeout(self.settings.timeout, run).await {
            Ok(result) => result,
            Err(_) => {
                let err = AgentError::Timeout(self.settings.timeout);
                tracing::warn!(error = %err, "Workflow timed out");
                OrchestrationResult {
                    success: false,
                    report: None,
                    error: Some(err.to_string()),
                    metadata: workflow.metadata(None, 0),
                }
            }
        }
    }

    async fn run_pipeline(&self, query: &str, workflow: &Workflow) -> OrchestrationResult {
        if workflow.config.trace_include_sensitive_data {
            tracing::info!(query = %query, "Workflow started");
        } else {
            tracing::info!("Workflow started");
        }

        let triage = match self.triage(query).await {
            Ok(triage) => triage,
            Err(e) => return self.failed(workflow, None, e),
        };
        let effective = triage.effective_query(query).to_string();

        let outcome = match triage.task_type {
            TaskType::Research => {
                match self.run_stage(&self.agents.research, &effective, self.context()).await {
                    Ok(research) => {
                        let prompt = report_prompt(&effective, &research.content);
                        self.run_stage(&self.agents.report, &prompt, self.context())
                            .await
                    }
                    Err(e) => Err(e),
                }
            }
            TaskType::Report => {
                self.run_stage(&self.agents.report, &effective, self.context())
                    .await
            }
            TaskType::PassThrough => {
                let ctx = self.context().with_original_query(effective.clone());
                self.run_stage(&self.agents.delegation, &effective, ctx).await
            }
        };

        match outcome {
            Ok(response) => {
                let citations = Agent::count_citations(&response.content);
                tracing::info!(
                    task_type = triage.task_type.as_str(),
                    citations,
                    "Workflow complete"
                );
                OrchestrationResult {
                    success: true,
                    report: Some(response.content),
                    error: None,
                    metadata: workflow.metadata(Some(&triage), citations),
                }
            }
            Err(e) => self.failed(workflow, Some(&triage), e),
        }
    }

    fn failed(&self, workflow: &Workflow, triage: Option<&TriageResult>, error: AgentError) -> OrchestrationResult {
        tracing::error!(error = %error, "Workflow failed");
        OrchestrationResult {
            success: false,
            report: None,
            error: Some(error.to_string()),
            metadata: workflow.metadata(triage, 0),
        }
    }

    async fn run_stage(
        &self,
        agent: &Agent,
        query: &str,
        context: ExecutionContext,
    ) -> Result<AgentResponse, AgentError> {
        agent.execute_task(query, context, Uuid::new_v4()).await
    }

    /// Classify `query`. Only backend failures are errors; an unreadable
    /// answer falls back to research on the original query.
    async fn triage(&self, query: &str) -> Result<TriageResult, AgentError> {
        let response = self
            .run_stage(&self.agents.triage, query, self.context())
            .await?;
        Ok(TriageResult::parse(&response.content).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Could not parse triage answer, defaulting to research");
            TriageResult::fallback("Triage answer could not be parsed; defaulting to research")
        }))
    }

    // ─── Streaming ───────────────────────────────────────────────────────

    /// Stream the whole pipeline. Exactly one of `on_complete` / `on_error`
    /// reaches `callbacks`, and nothing after it.
    pub async fn stream_query(
        &self,
        query: &str,
        callbacks: &dyn OrchestratorCallbacks,
        run_config: RunConfig,
    ) {
        let guard = TerminalGuard::new(callbacks);
        let workflow = Workflow::new(run_config);
        let span = workflow.span();
        let pipeline = self
            .stream_pipeline(query, &guard, &workflow)
            .instrument(span);
        self.supervise(pipeline, &guard).await;
    }

    /// Stream a single built-in agent under the same heartbeat and timeout.
    pub async fn stream_agent(
        &self,
        kind: AgentKind,
        query: &str,
        callbacks: &dyn OrchestratorCallbacks,
    ) {
        let guard = TerminalGuard::new(callbacks);
        let agent = self.agents.get(kind).clone();
        let query = query.to_string();
        let guard_ref = &guard;

        let run = async move {
            match kind {
                AgentKind::Triage => {
                    guard_ref.on_start();
                    match self.triage(&query).await {
                        Ok(triage) => {
                            guard_ref.on_triage_complete(&triage);
                            guard_ref.on_token(&format!(
                                "Analyzed your query. This appears to be a {} task.\n\nReasoning: {}\n\n",
                                triage.task_type.as_str(),
                                triage.reasoning
                            ));
                            let content = serde_json::to_string(&triage).unwrap_or_default();
                            guard_ref.on_complete(AgentResponse::success(
                                content,
                                json!({ "agent": agent.name(), "taskType": triage.task_type.as_str() }),
                            ));
                        }
                        Err(e) => guard_ref.on_error(e),
                    }
                }
                AgentKind::Delegation => {
                    let ctx = self.context().with_original_query(query.clone());
                    agent.stream_task(&query, guard_ref, ctx).await;
                }
                AgentKind::Research | AgentKind::Report => {
                    agent
                        .stream_task(&query, guard_ref, self.context())
                        .await;
                }
            }
        };
        let span = tracing::info_span!("agent_stream", agent = %kind);
        self.supervise(run.instrument(span), &guard).await;
    }

    /// Drive `pipeline` alongside the heartbeat and timeout timers.
    async fn supervise<F>(&self, pipeline: F, guard: &TerminalGuard<'_>)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(pipeline);
        let period = self.settings.heartbeat_interval;
        let mut heartbeat = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let deadline = tokio::time::sleep(self.settings.timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                biased;
                _ = &mut pipeline => break,
                _ = &mut deadline => {
                    let err = AgentError::Timeout(self.settings.timeout);
                    tracing::warn!(error = %err, "Stream timed out; cancelling pipeline");
                    guard.on_error(err);
                    break;
                }
                _ = heartbeat.tick() => {
                    guard.on_heartbeat(Utc::now());
                }
            }
        }

        if !guard.is_finished() {
            tracing::error!("Pipeline ended without a terminal event");
            guard.on_error(AgentError::Interrupted("workflow".to_string()));
        }
    }

    async fn stream_pipeline(&self, query: &str, guard: &TerminalGuard<'_>, workflow: &Workflow) {
        guard.on_start();

        let triage = match self.triage(query).await {
            Ok(triage) => triage,
            Err(e) => return guard.on_error(e),
        };
        guard.on_triage_complete(&triage);
        let effective = triage.effective_query(query).to_string();

        let outcome = match triage.task_type {
            TaskType::Research => {
                guard.on_research_start();
                match self
                    .stream_stage(&self.agents.research, &effective, self.context(), guard)
                    .await
                {
                    Ok(research) => {
                        guard.on_research_complete(&research.content);
                        guard.on_report_start();
                        let prompt = report_prompt(&effective, &research.content);
                        self.stream_stage(&self.agents.report, &prompt, self.context(), guard)
                            .await
                    }
                    Err(e) => Err(e),
                }
            }
            TaskType::Report => {
                guard.on_report_start();
                self.stream_stage(&self.agents.report, &effective, self.context(), guard)
                    .await
            }
            TaskType::PassThrough => {
                let ctx = self.context().with_original_query(effective.clone());
                self.stream_stage(&self.agents.delegation, &effective, ctx, guard)
                    .await
            }
        };

        match outcome {
            Ok(response) => {
                let citations = Agent::count_citations(&response.content);
                guard.on_complete(AgentResponse::success(
                    response.content,
                    workflow.metadata(Some(&triage), citations),
                ));
            }
            Err(e) => guard.on_error(e),
        }
    }

    async fn stream_stage(
        &self,
        agent: &Arc<Agent>,
        query: &str,
        context: ExecutionContext,
        guard: &TerminalGuard<'_>,
    ) -> Result<AgentResponse, AgentError> {
        let sink = StageSink::new(guard);
        agent.stream_task(query, &sink, context).await;
        sink.into_outcome()
            .unwrap_or_else(|| Err(AgentError::Interrupted(agent.name().to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::llm::scripted::ScriptedLlm;
    use crate::llm::{BackendEvent, ToolCall};

    #[derive(Debug, Clone, PartialEq)]
    enum Seen {
        Start,
        Token(String),
        Triage(TaskType),
        ResearchStart,
        ResearchComplete,
        ReportStart,
        Heartbeat,
        Handoff(String, String),
        Complete(String, Value),
        Error(String),
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<Seen>>,
    }

    impl Recorder {
        fn push(&self, seen: Seen) {
            self.events.lock().unwrap().push(seen);
        }

        fn events(&self) -> Vec<Seen> {
            self.events.lock().unwrap().clone()
        }
    }

    impl StreamCallbacks for Recorder {
        fn on_start(&self) {
            self.push(Seen::Start);
        }
        fn on_token(&self, token: &str) {
            self.push(Seen::Token(token.to_string()));
        }
        fn on_handoff(&self, source: &str, target: &str) {
            self.push(Seen::Handoff(source.to_string(), target.to_string()));
        }
        fn on_complete(&self, response: AgentResponse) {
            self.push(Seen::Complete(response.content, response.metadata));
        }
        fn on_error(&self, error: AgentError) {
            self.push(Seen::Error(error.to_string()));
        }
    }

    impl OrchestratorCallbacks for Recorder {
        fn on_triage_complete(&self, result: &TriageResult) {
            self.push(Seen::Triage(result.task_type));
        }
        fn on_research_start(&self) {
            self.push(Seen::ResearchStart);
        }
        fn on_research_complete(&self, _research: &str) {
            self.push(Seen::ResearchComplete);
        }
        fn on_report_start(&self) {
            self.push(Seen::ReportStart);
        }
        fn on_heartbeat(&self, _at: chrono::DateTime<Utc>) {
            self.push(Seen::Heartbeat);
        }
    }

    fn orchestrator(llm: ScriptedLlm, settings: OrchestratorSettings) -> Orchestrator {
        let agents = BuiltinAgents::new(Arc::new(llm), "gpt-4o").unwrap();
        Orchestrator::new(agents, settings)
    }

    const RESEARCH_TRIAGE: &str =
        r#"{"taskType":"research","reasoning":"needs sources","modifiedQuery":"EV market share 2024"}"#;

    #[tokio::test]
    async fn research_flow_produces_report() {
        let llm = ScriptedLlm::new()
            .with_text(RESEARCH_TRIAGE)
            .with_text("EVs reached 18% [1].")
            .with_text("# Report\nEVs reached 18% [1]. Growth continued [2].");
        let orch = orchestrator(llm, OrchestratorSettings::default());

        let result = orch.handle_query("ev stuff", RunConfig::default()).await;

        assert!(result.success);
        assert!(result.report.unwrap().starts_with("# Report"));
        assert_eq!(result.metadata["taskType"], json!("research"));
        assert_eq!(result.metadata["reasoning"], json!("needs sources"));
        assert_eq!(result.metadata["citations"], json!(2));
        assert!(result.metadata["traceId"].as_str().unwrap().starts_with("trace_"));
        assert!(result.metadata["durationMs"].is_u64());
    }

    #[tokio::test]
    async fn unparseable_triage_falls_back_to_research() {
        let llm = Arc::new(
            ScriptedLlm::new()
                .with_text("I think this is research")
                .with_text("facts")
                .with_text("report"),
        );
        let agents = BuiltinAgents::new(llm.clone(), "gpt-4o").unwrap();
        let orch = Orchestrator::new(agents, OrchestratorSettings::default());

        let result = orch
            .handle_query(
                "original question",
                RunConfig {
                    tracing_disabled: true,
                    ..RunConfig::default()
                },
            )
            .await;

        assert!(result.success);
        assert_eq!(result.metadata["taskType"], json!("research"));
        assert_eq!(result.metadata["traceId"], Value::Null);
        let research_request = &llm.requests()[1];
        assert_eq!(
            research_request.messages[1].content.as_deref(),
            Some("original question")
        );
    }

    #[tokio::test]
    async fn report_only_flow_skips_research() {
        let llm = Arc::new(
            ScriptedLlm::new()
                .with_text(r#"{"taskType":"report","reasoning":"material supplied"}"#)
                .with_text("Structured report"),
        );
        let agents = BuiltinAgents::new(llm.clone(), "gpt-4o").unwrap();
        let orch = Orchestrator::new(agents, OrchestratorSettings::default());

        let result = orch.handle_query("write up: A, B", RunConfig::default()).await;

        assert_eq!(result.report.as_deref(), Some("Structured report"));
        assert_eq!(llm.call_count(), 2);
        assert_eq!(
            llm.requests()[1].messages[1].content.as_deref(),
            Some("write up: A, B")
        );
    }

    #[tokio::test]
    async fn triage_backend_failure_fails_workflow() {
        let orch = orchestrator(ScriptedLlm::new(), OrchestratorSettings::default());
        let result = orch.handle_query("anything", RunConfig::default()).await;

        assert!(!result.success);
        assert!(result.error.unwrap().contains("script exhausted"));
        assert!(result.report.is_none());
    }

    #[tokio::test]
    async fn streamed_research_flow_emits_stage_events_in_order() {
        let llm = ScriptedLlm::new()
            .with_text(RESEARCH_TRIAGE)
            .with_stream(vec![BackendEvent::TextDelta("Findings [1]".into())])
            .with_stream(vec![
                BackendEvent::TextDelta("Report ".into()),
                BackendEvent::TextDelta("[1]".into()),
            ]);
        let orch = orchestrator(llm, OrchestratorSettings::default());
        let recorder = Recorder::default();

        orch.stream_query("ev stuff", &recorder, RunConfig::default()).await;

        let events = recorder.events();
        assert_eq!(
            events[..6],
            [
                Seen::Start,
                Seen::Triage(TaskType::Research),
                Seen::ResearchStart,
                Seen::Token("Findings [1]".into()),
                Seen::ResearchComplete,
                Seen::ReportStart,
            ]
        );
        match events.last() {
            Some(Seen::Complete(content, meta)) => {
                assert_eq!(content, "Report [1]");
                assert_eq!(meta["citations"], json!(1));
                assert_eq!(meta["taskType"], json!("research"));
            }
            other => panic!("expected completion, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn streamed_direct_flow_forwards_handoff() {
        let llm = ScriptedLlm::new()
            .with_text(r#"{"taskType":"direct","reasoning":"simple"}"#)
            .with_stream(vec![BackendEvent::ToolCallsComplete(vec![ToolCall::new(
                "call_1",
                "transfer_to_report_agent",
                r#"{"reason":"needs a write-up"}"#,
            )])])
            .with_text("Report from hand-off");
        let orch = orchestrator(llm, OrchestratorSettings::default());
        let recorder = Recorder::default();

        orch.stream_query("summarize this", &recorder, RunConfig::default()).await;

        let events = recorder.events();
        assert!(events.contains(&Seen::Handoff(
            "Delegation Agent".into(),
            "Report Agent".into()
        )));
        assert!(matches!(events.last(), Some(Seen::Complete(c, _)) if c == "Report from hand-off"));
    }

    #[tokio::test]
    async fn stream_timeout_reports_error_and_goes_silent() {
        let settings = OrchestratorSettings {
            heartbeat_interval: Duration::from_millis(30),
            timeout: Duration::from_millis(100),
            ..Default::default()
        };
        let orch = orchestrator(ScriptedLlm::hanging(), settings);
        let recorder = Recorder::default();

        orch.stream_query("slow question", &recorder, RunConfig::default()).await;
        tokio::time::sleep(Duration::from_millis(80)).await;

        let events = recorder.events();
        assert_eq!(events.first(), Some(&Seen::Start));
        assert!(events.contains(&Seen::Heartbeat));
        assert_eq!(
            events.last(),
            Some(&Seen::Error("Request timed out after 0.1 seconds".into()))
        );
        let terminals = events
            .iter()
            .filter(|e| matches!(e, Seen::Complete(..) | Seen::Error(_)))
            .count();
        assert_eq!(terminals, 1);
    }

    #[tokio::test]
    async fn non_streaming_timeout_returns_error_result() {
        let settings = OrchestratorSettings {
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            timeout: Duration::from_millis(50),
            ..Default::default()
        };
        let orch = orchestrator(ScriptedLlm::hanging(), settings);

        let result = orch.handle_query("slow", RunConfig::default()).await;

        assert!(!result.success);
        assert_eq!(
            result.error.as_deref(),
            Some("Request timed out after 0.05 seconds")
        );
    }

    #[tokio::test]
    async fn stream_agent_triage_reports_classification() {
        let llm = ScriptedLlm::new().with_text(r#"{"taskType":"report","reasoning":"has data"}"#);
        let orch = orchestrator(llm, OrchestratorSettings::default());
        let recorder = Recorder::default();

        orch.stream_agent(AgentKind::Triage, "q", &recorder).await;

        let events = recorder.events();
        assert_eq!(events[0], Seen::Start);
        assert_eq!(events[1], Seen::Triage(TaskType::Report));
        assert!(matches!(events.last(), Some(Seen::Complete(c, _)) if c.contains("\"report\"")));
    }

    #[tokio::test]
    async fn stream_agent_reports_stream_errors() {
        let orch = orchestrator(ScriptedLlm::new(), OrchestratorSettings::default());
        let recorder = Recorder::default();

        orch.stream_agent(AgentKind::Research, "q", &recorder).await;

        let events = recorder.events();
        assert_eq!(events[0], Seen::Start);
        assert!(matches!(events.last(), Some(Seen::Error(msg)) if msg.contains("stream script exhausted")));
    }
}

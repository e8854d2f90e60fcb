//! Core agent implementation: construction and the non-streaming task loop.

use std::fmt;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::llm::{ChatMessage, CompletionRequest, LlmClient, ModelSettings};
use crate::memory::{MemoryKind, MemoryStore};
use crate::tools::{Tool, ToolResult};

use super::handoff::{HandoffInputData, HandoffTarget, InputFilter};
use super::prompt::tool_definitions;
use super::registry::HandoffRegistry;
use super::{AgentConfigError, AgentError, AgentResponse, ExecutionContext};

pub const DEFAULT_MODEL: &str = "gpt-4o";
const DEFAULT_INSTRUCTIONS: &str = "You are a helpful assistant.";

/// Stable identifier assigned to an agent when it is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentId(Uuid);

impl AgentId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// System prompt source: a literal or a pure function of the context.
#[derive(Clone)]
pub enum Instructions {
    Static(String),
    Dynamic(Arc<dyn Fn(&ExecutionContext) -> String + Send + Sync>),
}

impl Instructions {
    pub fn dynamic<F>(f: F) -> Self
    where
        F: Fn(&ExecutionContext) -> String + Send + Sync + 'static,
    {
        Instructions::Dynamic(Arc::new(f))
    }

    pub fn resolve(&self, context: &ExecutionContext) -> String {
        match self {
            Instructions::Static(text) => text.clone(),
            Instructions::Dynamic(f) => f(context),
        }
    }
}

impl From<&str> for Instructions {
    fn from(text: &str) -> Self {
        Instructions::Static(text.to_string())
    }
}

impl From<String> for Instructions {
    fn from(text: String) -> Self {
        Instructions::Static(text)
    }
}

/// Post-processing applied to final output text.
pub type OutputFilter = Arc<dyn Fn(String) -> String + Send + Sync>;

/// A configured LLM persona: instructions, model, tools and hand-off targets.
pub struct Agent {
    pub(crate) id: AgentId,
    pub(crate) name: String,
    pub(crate) instructions: Instructions,
    pub(crate) model: String,
    pub(crate) model_settings: ModelSettings,
    pub(crate) tools: Vec<Arc<dyn Tool>>,
    pub(crate) registry: HandoffRegistry,
    pub(crate) handoff_input_filter: Option<InputFilter>,
    pub(crate) output_filter: Option<OutputFilter>,
    pub(crate) memory: Option<Arc<dyn MemoryStore>>,
    pub(crate) llm: Arc<dyn LlmClient>,
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("model", &self.model)
            .field("tools", &self.tools.iter().map(|t| t.name()).collect::<Vec<_>>())
            .field(
                "handoffs",
                &self.registry.targets().map(|t| t.agent().name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl Agent {
    pub fn builder(name: impl Into<String>, llm: Arc<dyn LlmClient>) -> AgentBuilder {
        AgentBuilder {
            name: name.into(),
            instructions: Instructions::from(DEFAULT_INSTRUCTIONS),
            model: DEFAULT_MODEL.to_string(),
            model_settings: ModelSettings::default(),
            tools: Vec::new(),
            handoffs: Vec::new(),
            handoff_input_filter: None,
            output_filter: None,
            memory: None,
            llm,
        }
    }

    pub fn id(&self) -> AgentId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn tools(&self) -> &[Arc<dyn Tool>] {
        &self.tools
    }

    pub fn handoffs(&self) -> impl Iterator<Item = &HandoffTarget> {
        self.registry.targets()
    }

    pub fn registry(&self) -> &HandoffRegistry {
        &self.registry
    }

    pub fn resolve_instructions(&self, context: &ExecutionContext) -> String {
        self.instructions.resolve(context)
    }

    /// Replace the input filter used when handing off to `target_name`.
    pub fn set_handoff_input_filter<F>(
        &mut self,
        target_name: &str,
        filter: F,
    ) -> Result<(), AgentConfigError>
    where
        F: Fn(&str, &str, HandoffInputData) -> HandoffInputData + Send + Sync + 'static,
    {
        self.registry
            .set_input_filter(&self.name, target_name, Arc::new(filter))
    }

    /// Number of `[n]` citation markers in `text`.
    pub fn count_citations(text: &str) -> usize {
        static CITATION_RE: LazyLock<Regex> =
            LazyLock::new(|| Regex::new(r"\[\d+\]").unwrap());
        CITATION_RE.find_iter(text).count()
    }

    /// Run `query` to completion. Failures come back as an unsuccessful
    /// response rather than an error.
    pub async fn handle_task(&self, query: &str, context: ExecutionContext) -> AgentResponse {
        let execution_id = Uuid::new_v4();
        let metadata_ctx = context.clone();
        match self.execute_task(query, context, execution_id).await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(agent = %self.name, error = %e, "Task failed");
                AgentResponse::failure(e.to_string(), metadata_ctx.to_metadata(execution_id))
            }
        }
    }

    pub(crate) async fn execute_task(
        &self,
        query: &str,
        context: ExecutionContext,
        execution_id: Uuid,
    ) -> Result<AgentResponse, AgentError> {
        tracing::info!(
            agent = %self.name,
            agent_id = %self.id,
            query = %truncate_for_log(query, 100),
            "Handling task"
        );

        let context = self.enhance_context(context, query).await;
        let instructions = self.resolve_instructions(&context);
        let request = self.completion_request(&instructions, query);
        let response = self.llm.complete(request).await?;

        let content = if response.has_tool_calls() {
            let history = self.handoff_history(&context, query);
            let outcome = self
                .handle_tool_calls(&response.tool_calls, &context, &history)
                .await;
            match outcome.handoff {
                Some(handoff) => handoff.response.content,
                None => summarize_tool_results(&outcome.tool_results),
            }
        } else {
            response.content.clone().unwrap_or_default()
        };

        let content = self.process_output(content);
        self.record_memory(query, &content, &context).await;

        Ok(AgentResponse::success(content, context.to_metadata(execution_id))
            .with_raw_responses(vec![response.raw]))
    }

    pub(crate) fn completion_request(&self, instructions: &str, query: &str) -> CompletionRequest {
        CompletionRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage::system(instructions), ChatMessage::user(query)],
            tools: tool_definitions(&self.tools, &self.registry),
            settings: self.model_settings.clone(),
        }
    }

    /// Conversation forwarded to hand-off targets: prior history plus this query.
    pub(crate) fn handoff_history(&self, context: &ExecutionContext, query: &str) -> Vec<ChatMessage> {
        let mut history = context.conversation_history.clone();
        history.push(ChatMessage::user(query));
        history
    }

    fn process_output(&self, content: String) -> String {
        match &self.output_filter {
            Some(filter) => filter(content),
            None => content,
        }
    }

    async fn enhance_context(&self, context: ExecutionContext, query: &str) -> ExecutionContext {
        let Some(memory) = &self.memory else {
            return context;
        };
        match memory.enhance_context(context.clone(), query).await {
            Ok(enhanced) => enhanced,
            Err(e) => {
                tracing::warn!(agent = %self.name, error = %e, "Failed to enhance context with memories");
                context
            }
        }
    }

    async fn record_memory(&self, query: &str, content: &str, context: &ExecutionContext) {
        let Some(memory) = &self.memory else {
            return;
        };
        let text = format!("User: {}\nAgent: {}", query, content);
        let tags = vec![self.name.clone()];

        if let Err(e) = memory.store(&text, MemoryKind::Conversation, &tags).await {
            tracing::warn!(agent = %self.name, error = %e, "Failed to store conversation memory");
        }
        if context.is_important() {
            if let Err(e) = memory.store(&text, MemoryKind::LongTerm, &tags).await {
                tracing::warn!(agent = %self.name, error = %e, "Failed to store long-term memory");
            }
        }
    }
}

/// Builder for [`Agent`]; validates the hand-off list in [`AgentBuilder::build`].
pub struct AgentBuilder {
    name: String,
    instructions: Instructions,
    model: String,
    model_settings: ModelSettings,
    tools: Vec<Arc<dyn Tool>>,
    handoffs: Vec<HandoffTarget>,
    handoff_input_filter: Option<InputFilter>,
    output_filter: Option<OutputFilter>,
    memory: Option<Arc<dyn MemoryStore>>,
    llm: Arc<dyn LlmClient>,
}

impl AgentBuilder {
    pub fn instructions(mut self, instructions: impl Into<Instructions>) -> Self {
        self.instructions = instructions.into();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn model_settings(mut self, settings: ModelSettings) -> Self {
        self.model_settings = settings;
        self
    }

    pub fn tool(mut self, tool: impl Tool + 'static) -> Self {
        self.tools.push(Arc::new(tool));
        self
    }

    pub fn shared_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn handoff(mut self, target: impl Into<HandoffTarget>) -> Self {
        self.handoffs.push(target.into());
        self
    }

    /// Filter applied to every hand-off that has no filter of its own.
    pub fn handoff_input_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&str, &str, HandoffInputData) -> HandoffInputData + Send + Sync + 'static,
    {
        self.handoff_input_filter = Some(Arc::new(filter));
        self
    }

    pub fn output_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(String) -> String + Send + Sync + 'static,
    {
        self.output_filter = Some(Arc::new(filter));
        self
    }

    pub fn memory(mut self, memory: Arc<dyn MemoryStore>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn build(self) -> Result<Agent, AgentConfigError> {
        if self.name.trim().is_empty() {
            return Err(AgentConfigError::EmptyName);
        }

        let mut tool_names: Vec<&str> = Vec::with_capacity(self.tools.len());
        for tool in &self.tools {
            if tool_names.contains(&tool.name()) {
                return Err(AgentConfigError::DuplicateToolName {
                    agent: self.name.clone(),
                    name: tool.name().to_string(),
                });
            }
            tool_names.push(tool.name());
        }

        let registry = HandoffRegistry::build(&self.name, &self.handoffs, &tool_names)?;

        Ok(Agent {
            id: AgentId::new(),
            name: self.name,
            instructions: self.instructions,
            model: self.model,
            model_settings: self.model_settings,
            tools: self.tools,
            registry,
            handoff_input_filter: self.handoff_input_filter,
            output_filter: self.output_filter,
            memory: self.memory,
            llm: self.llm,
        })
    }
}

/// One line per tool result, used as the answer when no hand-off happened.
fn summarize_tool_results(results: &[ToolResult]) -> String {
    results
        .iter()
        .map(|r| {
            if r.is_error {
                format!("Tool {} failed: {}", r.name, r.content)
            } else {
                format!("Tool {} returned: {}", r.name, r.content)
            }
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Truncate a string for logging purposes.
pub(crate) fn truncate_for_log(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_chars).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::scripted::ScriptedLlm;
    use crate::llm::{LlmError, Role, ToolCall};
    use crate::memory::InMemoryStore;
    use crate::tools::FunctionTool;
    use serde_json::json;

    fn weather_tool() -> FunctionTool {
        FunctionTool::new(
            "getWeather",
            "Get the weather for a city",
            json!({"type": "object", "properties": {"city": {"type": "string"}}, "required": ["city"]}),
            |args| async move {
                let city = args["city"]
                    .as_str()
                    .ok_or_else(|| anyhow::anyhow!("Missing 'city' argument"))?;
                Ok(format!("Sunny and 22C in {}", city))
            },
        )
    }

    #[tokio::test]
    async fn tool_call_result_becomes_content() {
        let llm = Arc::new(ScriptedLlm::new().with_tool_calls(vec![ToolCall::new(
            "call_1",
            "getWeather",
            r#"{"city":"Lisbon"}"#,
        )]));
        let agent = Agent::builder("Weather Agent", llm.clone())
            .tool(weather_tool())
            .build()
            .unwrap();

        let resp = agent.handle_task("Weather in Lisbon?", ExecutionContext::new()).await;

        assert!(resp.success);
        assert_eq!(resp.content, "Tool getWeather returned: Sunny and 22C in Lisbon");
        assert_eq!(resp.final_output, resp.content);
        assert_eq!(resp.raw_responses.len(), 1);
        assert!(resp.metadata["executionId"].is_string());

        let request = &llm.requests()[0];
        assert_eq!(request.messages[0].role, Role::System);
        assert_eq!(request.messages[1].content.as_deref(), Some("Weather in Lisbon?"));
        assert_eq!(request.tools.len(), 1);
    }

    #[tokio::test]
    async fn plain_text_response_is_returned() {
        let llm = Arc::new(ScriptedLlm::new().with_text("Hello there"));
        let agent = Agent::builder("Greeter", llm)
            .output_filter(|s| s.to_uppercase())
            .build()
            .unwrap();

        let resp = agent.handle_task("hi", ExecutionContext::new()).await;
        assert!(resp.success);
        assert_eq!(resp.content, "HELLO THERE");
    }

    #[tokio::test]
    async fn backend_error_becomes_failed_response() {
        let llm = Arc::new(ScriptedLlm::new().with_error(LlmError::Api {
            status: 429,
            message: "quota exceeded".to_string(),
        }));
        let agent = Agent::builder("Greeter", llm).build().unwrap();

        let resp = agent
            .handle_task("hi", ExecutionContext::new().with_max_turns(4))
            .await;

        assert!(!resp.success);
        assert!(resp.content.starts_with("Error: "));
        assert!(resp.error.unwrap().contains("quota exceeded"));
        assert_eq!(resp.metadata["maxTurns"], json!(4));
    }

    #[tokio::test]
    async fn successful_task_is_remembered() {
        let memory = Arc::new(InMemoryStore::new("Greeter"));
        let llm = Arc::new(ScriptedLlm::new().with_text("Paris").with_text("Still Paris"));
        let agent = Agent::builder("Greeter", llm.clone())
            .memory(memory.clone())
            .build()
            .unwrap();

        let ctx = ExecutionContext::new().with_metadata("important", json!(true));
        agent.handle_task("capital of France", ctx).await;

        let entries = memory.entries().await;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].kind, MemoryKind::Conversation);
        assert_eq!(entries[1].kind, MemoryKind::LongTerm);

        let resp = agent
            .handle_task("remind me about France", ExecutionContext::new())
            .await;
        assert!(resp.metadata["relevantMemories"].is_array());
    }

    #[test]
    fn resolve_instructions_is_pure() {
        let agent = Agent::builder("Dynamic", Arc::new(ScriptedLlm::new()))
            .instructions(Instructions::dynamic(|ctx| {
                format!("Depth {}", ctx.handoff_tracker.len())
            }))
            .build()
            .unwrap();
        let mut ctx = ExecutionContext::new();
        ctx.handoff_tracker.push("Triage".into());

        let first = agent.resolve_instructions(&ctx);
        let second = agent.resolve_instructions(&ctx);
        assert_eq!(first, "Depth 1");
        assert_eq!(first, second);
        assert_eq!(ctx.handoff_tracker, vec!["Triage".to_string()]);
    }

    #[test]
    fn builder_rejects_invalid_configuration() {
        let llm: Arc<dyn LlmClient> = Arc::new(ScriptedLlm::new());
        assert!(matches!(
            Agent::builder("  ", llm.clone()).build(),
            Err(AgentConfigError::EmptyName)
        ));
        assert!(matches!(
            Agent::builder("Weather", llm.clone())
                .tool(weather_tool())
                .tool(weather_tool())
                .build(),
            Err(AgentConfigError::DuplicateToolName { .. })
        ));
        let shadowing = FunctionTool::new("transfer_to_support", "Not a hand-off", json!({}), |_| async {
            Ok("never runs".to_string())
        });
        assert!(matches!(
            Agent::builder("Weather", llm).tool(shadowing).build(),
            Err(AgentConfigError::ReservedToolName { .. })
        ));
    }

    #[test]
    fn counts_citation_markers() {
        assert_eq!(Agent::count_citations("See [1], [2] and [12]."), 3);
        assert_eq!(Agent::count_citations("No citations [a]."), 0);
    }

    #[test]
    fn agents_get_distinct_ids() {
        let llm: Arc<dyn LlmClient> = Arc::new(ScriptedLlm::new());
        let a = Agent::builder("A", llm.clone()).build().unwrap();
        let b = Agent::builder("A", llm).build().unwrap();
        assert_ne!(a.id(), b.id());
    }
}

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::agent::{Agent, AgentConfigError};
use crate::llm::{LlmClient, ModelSettings};

pub const TRIAGE_AGENT_NAME: &str = "Triage Agent";

const INSTRUCTIONS: &str = r#"You are a triage agent. Classify the user's query and decide how it should be handled.

Task types:
- "research": the query needs facts gathered from external sources before it can be answered.
- "report": the query already contains the material and asks for a structured write-up of it.
- "direct": the query is simple enough to be handed to a general assistant.

If the query is ambiguous or poorly phrased, rewrite it into a clearer version.

Respond with JSON only, no prose and no code fences:
{"taskType": "research" | "report" | "direct", "reasoning": "<one or two sentences>", "modifiedQuery": "<optional rewritten query>"}"#;

/// How the orchestrator should route a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskType {
    #[serde(rename = "research")]
    Research,
    #[serde(rename = "report")]
    Report,
    #[serde(rename = "direct", alias = "pass_through", alias = "passthrough")]
    PassThrough,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Research => "research",
            TaskType::Report => "report",
            TaskType::PassThrough => "direct",
        }
    }
}

/// Parsed triage decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriageResult {
    pub task_type: TaskType,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_query: Option<String>,
}

impl TriageResult {
    /// Parse the triage agent's answer. Tolerates code fences and prose
    /// around the JSON object.
    pub fn parse(content: &str) -> Result<Self, serde_json::Error> {
        let trimmed = content.trim();
        let candidate = match (trimmed.find('{'), trimmed.rfind('}')) {
            (Some(start), Some(end)) if start < end => &trimmed[start..=end],
            _ => trimmed,
        };
        serde_json::from_str(candidate)
    }

    /// Default used when the triage answer cannot be understood.
    pub fn fallback(reason: impl Into<String>) -> Self {
        Self {
            task_type: TaskType::Research,
            reasoning: reason.into(),
            modified_query: None,
        }
    }

    /// Query the next stage should run: the rewrite when present and non-empty.
    pub fn effective_query<'a>(&'a self, original: &'a str) -> &'a str {
        self.modified_query
            .as_deref()
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .unwrap_or(original)
    }
}

pub fn triage_agent(llm: Arc<dyn LlmClient>, model: &str) -> Result<Agent, AgentConfigError> {
    Agent::builder(TRIAGE_AGENT_NAME, llm)
        .instructions(INSTRUCTIONS)
        .model(model)
        .model_settings(ModelSettings {
            temperature: Some(0.2),
            ..ModelSettings::default()
        })
        .build()
}

//! API request and response types.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::agents::AgentKind;
use crate::orchestrator::RunConfig;

fn default_agent_type() -> String {
    "auto".to_string()
}

/// Body of `POST /api/agent-query`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentQueryRequest {
    /// The user prompt. Validated by the handler so a missing query is a 400.
    #[serde(default)]
    pub query: Option<String>,

    /// `auto` for the full pipeline, or one of the built-in agent names
    #[serde(default = "default_agent_type")]
    pub agent_type: String,

    #[serde(default)]
    pub stream: bool,

    #[serde(default)]
    pub workflow_name: Option<String>,

    #[serde(default)]
    pub group_id: Option<String>,

    #[serde(default)]
    pub tracing_disabled: bool,

    #[serde(default)]
    pub trace_include_sensitive_data: bool,

    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
}

/// Where a query is routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryTarget {
    Orchestrated,
    Agent(AgentKind),
}

impl AgentQueryRequest {
    /// The trimmed query, or `None` when absent or blank.
    pub fn valid_query(&self) -> Option<&str> {
        self.query
            .as_deref()
            .map(str::trim)
            .filter(|q| !q.is_empty())
    }

    /// Unknown agent types run the full pipeline, like `auto`.
    pub fn target(&self) -> QueryTarget {
        if self.agent_type.eq_ignore_ascii_case("auto") {
            return QueryTarget::Orchestrated;
        }
        match self.agent_type.parse::<AgentKind>() {
            Ok(kind) => QueryTarget::Agent(kind),
            Err(e) => {
                tracing::warn!(agent_type = %self.agent_type, "{}; using the orchestrator", e);
                QueryTarget::Orchestrated
            }
        }
    }

    pub fn run_config(&self) -> RunConfig {
        RunConfig {
            workflow_name: Some(
                self.workflow_name
                    .clone()
                    .unwrap_or_else(|| format!("API Request - {}", self.agent_type)),
            ),
            group_id: self.group_id.clone(),
            tracing_disabled: self.tracing_disabled,
            trace_include_sensitive_data: self.trace_include_sensitive_data,
            metadata: self.metadata.clone(),
        }
    }
}

/// Non-streaming answer to an agent query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentQueryResponse {
    pub success: bool,

    /// Single-agent output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    /// Orchestrated report
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default)]
    pub metadata: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self { error: error.into() }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

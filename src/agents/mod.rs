//! Built-in agents used by the orchestrator and the HTTP API.

mod delegation;
mod report;
mod research;
mod triage;

pub use delegation::{delegation_agent, DELEGATION_AGENT_NAME};
pub use report::{report_agent, REPORT_AGENT_NAME};
pub use research::{research_agent, RESEARCH_AGENT_NAME};
pub use triage::{triage_agent, TaskType, TriageResult, TRIAGE_AGENT_NAME};

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::agent::{Agent, AgentConfigError};
use crate::llm::LlmClient;
use crate::memory::{InMemoryStore, MemoryStore};

/// Selects one built-in agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    Triage,
    Research,
    Report,
    Delegation,
}

impl AgentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Triage => "triage",
            AgentKind::Research => "research",
            AgentKind::Report => "report",
            AgentKind::Delegation => "delegation",
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "triage" => Ok(AgentKind::Triage),
            "research" => Ok(AgentKind::Research),
            "report" => Ok(AgentKind::Report),
            "delegation" => Ok(AgentKind::Delegation),
            other => Err(format!("unknown agent type: {}", other)),
        }
    }
}

/// The four built-in agents, sharing one backend.
#[derive(Clone)]
pub struct BuiltinAgents {
    pub triage: Arc<Agent>,
    pub research: Arc<Agent>,
    pub report: Arc<Agent>,
    pub delegation: Arc<Agent>,
}

impl BuiltinAgents {
    pub fn new(llm: Arc<dyn LlmClient>, model: &str) -> Result<Self, AgentConfigError> {
        Self::build(llm, model, false)
    }

    /// Like [`BuiltinAgents::new`], with an in-memory store per research and
    /// report agent.
    pub fn with_memory(llm: Arc<dyn LlmClient>, model: &str) -> Result<Self, AgentConfigError> {
        Self::build(llm, model, true)
    }

    fn build(llm: Arc<dyn LlmClient>, model: &str, memory: bool) -> Result<Self, AgentConfigError> {
        let mut research = research_agent(llm.clone(), model)?;
        let mut report = report_agent(llm.clone(), model)?;
        if memory {
            research.memory = Some(Arc::new(InMemoryStore::new(RESEARCH_AGENT_NAME)) as Arc<dyn MemoryStore>);
            report.memory = Some(Arc::new(InMemoryStore::new(REPORT_AGENT_NAME)) as Arc<dyn MemoryStore>);
        }
        let research = Arc::new(research);
        let report = Arc::new(report);
        let delegation = delegation_agent(llm.clone(), model, research.clone(), report.clone())?;

        Ok(Self {
            triage: Arc::new(triage_agent(llm, model)?),
            research,
            report,
            delegation: Arc::new(delegation),
        })
    }

    pub fn get(&self, kind: AgentKind) -> &Arc<Agent> {
        match kind {
            AgentKind::Triage => &self.triage,
            AgentKind::Research => &self.research,
            AgentKind::Report => &self.report,
            AgentKind::Delegation => &self.delegation,
        }
    }
}

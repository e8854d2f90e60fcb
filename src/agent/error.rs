use std::time::Duration;

use thiserror::Error;

use crate::llm::LlmError;

/// Errors raised while executing an agent task.
///
/// Only [`AgentError::Backend`], [`AgentError::TurnLimitExceeded`] and
/// [`AgentError::Timeout`] abort a task. The tool and hand-off kinds are
/// turned into failure tool results and the batch keeps going.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Failed to parse arguments for {name}: {message}")]
    Parse { name: String, message: String },

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool {name} failed: {message}")]
    ToolExecution { name: String, message: String },

    #[error("Target agent not found for handoff: {0}")]
    HandoffTargetNotFound(String),

    #[error("Handoff to {target} failed: {message}")]
    HandoffExecution { target: String, message: String },

    #[error(transparent)]
    Backend(#[from] LlmError),

    #[error("Maximum number of turns ({max_turns}) exceeded for agent {agent}")]
    TurnLimitExceeded { max_turns: u32, agent: String },

    #[error("Request timed out after {} seconds", .0.as_secs_f64())]
    Timeout(Duration),

    #[error("Empty query provided. Please provide a valid query for {0}.")]
    EmptyQuery(String),

    #[error("{0} ended without a result")]
    Interrupted(String),
}

impl AgentError {
    /// Stable identifier for the error kind, used in event payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            AgentError::Parse { .. } => "parse_error",
            AgentError::ToolNotFound(_) => "tool_not_found",
            AgentError::ToolExecution { .. } => "tool_execution_error",
            AgentError::HandoffTargetNotFound(_) => "handoff_target_not_found",
            AgentError::HandoffExecution { .. } => "handoff_execution_error",
            AgentError::Backend(_) => "backend_error",
            AgentError::TurnLimitExceeded { .. } => "turn_limit_exceeded",
            AgentError::Timeout(_) => "timeout",
            AgentError::EmptyQuery(_) => "empty_query",
            AgentError::Interrupted(_) => "interrupted",
        }
    }

    /// Whether this error aborts the task instead of becoming a tool result.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AgentError::Backend(_)
                | AgentError::TurnLimitExceeded { .. }
                | AgentError::Timeout(_)
                | AgentError::EmptyQuery(_)
                | AgentError::Interrupted(_)
        )
    }
}

/// Invalid agent configuration, detected when the agent is built.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AgentConfigError {
    #[error("agent name must not be empty")]
    EmptyName,

    #[error("agent {agent} has two hand-off targets that normalize to '{key}'")]
    DuplicateHandoffKey { agent: String, key: String },

    #[error("agent {agent} declares the tool name '{name}' more than once")]
    DuplicateToolName { agent: String, name: String },

    #[error("agent {agent} has a tool named '{name}', which is reserved for hand-offs")]
    ReservedToolName { agent: String, name: String },

    #[error("agent {agent} has no hand-off target named '{target}'")]
    UnknownHandoffTarget { agent: String, target: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_backend_turn_limit_and_timeout_are_fatal() {
        assert!(!AgentError::ToolNotFound("x".into()).is_fatal());
        assert!(!AgentError::HandoffTargetNotFound("x".into()).is_fatal());
        assert!(AgentError::Timeout(Duration::from_secs(60)).is_fatal());
        assert!(AgentError::TurnLimitExceeded {
            max_turns: 1,
            agent: "a".into()
        }
        .is_fatal());
    }

    #[test]
    fn timeout_message_mentions_seconds() {
        let err = AgentError::Timeout(Duration::from_millis(100));
        assert_eq!(err.to_string(), "Request timed out after 0.1 seconds");
        assert_eq!(err.kind(), "timeout");
    }
}

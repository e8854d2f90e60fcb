use std::sync::Arc;

use crate::agent::{Agent, AgentConfigError, Handoff, HandoffInputData};
use crate::llm::LlmClient;

pub const DELEGATION_AGENT_NAME: &str = "Delegation Agent";

const INSTRUCTIONS: &str = "You are a delegation agent. Answer simple questions yourself, concisely.

When a question needs up-to-date facts or sources, transfer it to the Research Agent.
When the user supplies material and wants it written up as a structured report, transfer it to the Report Agent.
Always give a short reason when you transfer a task.";

/// Delegation agent handing off to `research` and `report`.
pub fn delegation_agent(
    llm: Arc<dyn LlmClient>,
    model: &str,
    research: Arc<Agent>,
    report: Arc<Agent>,
) -> Result<Agent, AgentConfigError> {
    Agent::builder(DELEGATION_AGENT_NAME, llm)
        .instructions(INSTRUCTIONS)
        .model(model)
        .handoff(Handoff::new(research).on_handoff(|ctx, _| async move {
            tracing::info!(
                reason = ctx.handoff_reason.as_deref().unwrap_or_default(),
                chain = ?ctx.handoff_tracker,
                "Delegating to research"
            );
        }))
        .handoff(report)
        // Targets only see the user's own turns.
        .handoff_input_filter(|_, _, input| HandoffInputData {
            messages: input
                .messages
                .into_iter()
                .filter(|m| m.role == crate::llm::Role::User)
                .collect(),
        })
        .build()
}

use std::sync::Arc;

use crate::agent::{Agent, AgentConfigError};
use crate::llm::{LlmClient, ModelSettings};

pub const REPORT_AGENT_NAME: &str = "Report Agent";

const INSTRUCTIONS: &str = "You are a report-writing agent. Turn the material you are given into a well-structured report in Markdown.

- Start with a short executive summary.
- Organize the body under clear headings.
- Keep every citation marker like [1] from the source material next to the fact it supports.
- Finish with the list of sources exactly as provided.
- Do not invent facts that are not in the material.";

pub fn report_agent(llm: Arc<dyn LlmClient>, model: &str) -> Result<Agent, AgentConfigError> {
    Agent::builder(REPORT_AGENT_NAME, llm)
        .instructions(INSTRUCTIONS)
        .model(model)
        .model_settings(ModelSettings {
            temperature: Some(0.4),
            max_tokens: Some(4000),
            ..ModelSettings::default()
        })
        .build()
}

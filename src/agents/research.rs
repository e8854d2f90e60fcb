use std::sync::Arc;

use crate::agent::{Agent, AgentConfigError, Instructions};
use crate::llm::LlmClient;
use crate::tools::WebSearch;

pub const RESEARCH_AGENT_NAME: &str = "Research Agent";

pub fn research_agent(llm: Arc<dyn LlmClient>, model: &str) -> Result<Agent, AgentConfigError> {
    Agent::builder(RESEARCH_AGENT_NAME, llm)
        .instructions(Instructions::dynamic(|ctx| {
            let mut prompt = String::from(
                "You are a research agent. Gather accurate, current information for the user's query.\n\n\
                 - Use the web_search tool to find sources.\n\
                 - Cite every fact with a numbered marker like [1] that matches a source.\n\
                 - End with a \"Sources\" list giving the number, title and URL of each source.\n\
                 - Say plainly when the sources disagree or information is missing.",
            );
            if let Some(reason) = &ctx.handoff_reason {
                prompt.push_str(&format!("\n\nYou received this task by hand-off. Reason: {}", reason));
            }
            prompt
        }))
        .model(model)
        .tool(WebSearch::new())
        .build()
}

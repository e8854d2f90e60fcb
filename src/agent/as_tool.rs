use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{Agent, ExecutionContext};
use crate::tools::Tool;

/// An agent exposed to other agents as an ordinary tool.
pub struct AgentTool {
    agent: Arc<Agent>,
    name: String,
    description: String,
}

impl Agent {
    pub fn as_tool(self: &Arc<Self>, name: impl Into<String>, description: impl Into<String>) -> AgentTool {
        AgentTool {
            agent: self.clone(),
            name: name.into(),
            description: description.into(),
        }
    }
}

#[async_trait]
impl Tool for AgentTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "input": {
                    "type": "string",
                    "description": "The input to send to the agent"
                },
                "context": {
                    "type": "object",
                    "description": "Additional context for the agent",
                    "additionalProperties": true
                }
            },
            "required": ["input"]
        })
    }

    async fn execute(&self, args: Value) -> anyhow::Result<String> {
        let input = args["input"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("Missing 'input' argument"))?;

        let mut context: ExecutionContext = match args.get("context") {
            Some(ctx) if !ctx.is_null() => serde_json::from_value(ctx.clone())
                .map_err(|e| anyhow::anyhow!("Invalid 'context' argument: {}", e))?,
            _ => ExecutionContext::new(),
        };
        context.is_tool_call = true;
        if context.caller_agent.is_none() {
            context.caller_agent = Some("unknown".to_string());
        }

        let response = self.agent.handle_task(input, context).await;
        Ok(serde_json::to_string(&response)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentResponse;
    use crate::llm::scripted::ScriptedLlm;

    #[tokio::test]
    async fn agent_tool_runs_task_and_serializes_response() {
        let agent = Arc::new(
            Agent::builder("Summarizer", Arc::new(ScriptedLlm::new().with_text("short summary")))
                .build()
                .unwrap(),
        );
        let tool = agent.as_tool("summarize", "Summarize text");

        let output = tool
            .execute(json!({"input": "long text", "context": {"callerAgent": "Report Agent"}}))
            .await
            .unwrap();
        let response: AgentResponse = serde_json::from_str(&output).unwrap();

        assert!(response.success);
        assert_eq!(response.content, "short summary");
        assert_eq!(response.metadata["isToolCall"], json!(true));
        assert_eq!(response.metadata["callerAgent"], json!("Report Agent"));
        assert_eq!(tool.definition().name, "summarize");
    }

    #[tokio::test]
    async fn missing_input_is_an_error() {
        let agent = Arc::new(
            Agent::builder("Summarizer", Arc::new(ScriptedLlm::new()))
                .build()
                .unwrap(),
        );
        assert!(agent.as_tool("summarize", "x").execute(json!({})).await.is_err());
    }
}

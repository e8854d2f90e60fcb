//! Tool-call batch execution, including hand-offs.

use async_recursion::async_recursion;
use serde_json::{json, Value};
use tracing::Instrument;

use crate::llm::{ChatMessage, ToolCall};
use crate::tools::ToolResult;

use super::handoff::HandoffInputData;
use super::{Agent, AgentError, AgentResponse, ExecutionContext};

/// Maximum length of a hand-off chain recorded in `handoff_tracker`.
pub const MAX_HANDOFF_DEPTH: usize = 8;

const DEFAULT_HANDOFF_REASON: &str = "No reason provided";
const DEFAULT_HANDOFF_QUERY: &str = "Please help with this task";

/// A completed hand-off.
#[derive(Debug, Clone)]
pub struct HandoffOutcome {
    /// Display name of the agent that took over.
    pub target: String,
    pub tool_call_id: String,
    pub response: AgentResponse,
}

/// Result of processing one tool-call batch.
#[derive(Debug, Clone, Default)]
pub struct ToolBatchOutcome {
    pub tool_results: Vec<ToolResult>,
    pub handoff: Option<HandoffOutcome>,
}

impl Agent {
    /// Execute a batch in order.
    ///
    /// Every call yields one result, except that a successful hand-off ends
    /// the batch and later calls are never looked at.
    pub async fn handle_tool_calls(
        &self,
        calls: &[ToolCall],
        context: &ExecutionContext,
        history: &[ChatMessage],
    ) -> ToolBatchOutcome {
        let mut outcome = ToolBatchOutcome::default();

        for call in calls {
            if self.registry.is_handoff(&call.name) {
                match self.perform_handoff(call, context, history).await {
                    Ok(handoff) => {
                        outcome.tool_results.push(ToolResult::ok(
                            &call.id,
                            &call.name,
                            json!({
                                "success": true,
                                "message": format!("Successfully handed off to {}", handoff.target),
                            })
                            .to_string(),
                        ));
                        outcome.handoff = Some(handoff);
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(agent = %self.name, tool = %call.name, error = %e, "Hand-off failed");
                        outcome
                            .tool_results
                            .push(ToolResult::failure(&call.id, &call.name, e.to_string()));
                    }
                }
            } else {
                outcome.tool_results.push(self.run_tool(call).await);
            }
        }

        outcome
    }

    async fn run_tool(&self, call: &ToolCall) -> ToolResult {
        let Some(tool) = self.tools.iter().find(|t| t.name() == call.name) else {
            let err = AgentError::ToolNotFound(call.name.clone());
            tracing::warn!(agent = %self.name, error = %err, "Unknown tool");
            return ToolResult::failure(&call.id, &call.name, err.to_string());
        };

        let args = match parse_arguments(call) {
            Ok(args) => args,
            Err(err) => return ToolResult::failure(&call.id, &call.name, err.to_string()),
        };

        tracing::debug!(agent = %self.name, tool = %call.name, "Executing tool");
        match tool.execute(args).await {
            Ok(output) => ToolResult::ok(&call.id, &call.name, output),
            Err(e) => {
                let err = AgentError::ToolExecution {
                    name: call.name.clone(),
                    message: e.to_string(),
                };
                tracing::warn!(agent = %self.name, error = %err, "Tool execution failed");
                ToolResult::failure(&call.id, &call.name, err.to_string())
            }
        }
    }

    #[async_recursion]
    async fn perform_handoff(
        &self,
        call: &ToolCall,
        context: &ExecutionContext,
        history: &[ChatMessage],
    ) -> Result<HandoffOutcome, AgentError> {
        let args = parse_arguments(call)?;
        let target = self
            .registry
            .resolve(&call.name)
            .ok_or_else(|| AgentError::HandoffTargetNotFound(call.name.clone()))?;
        let target_agent = target.agent().clone();
        let target_name = target_agent.name().to_string();
        let key = target.key();

        if context.handoff_tracker.len() >= MAX_HANDOFF_DEPTH {
            return Err(AgentError::HandoffExecution {
                target: target_name,
                message: format!("hand-off chain is already {} deep", MAX_HANDOFF_DEPTH),
            });
        }

        let reason = args
            .get("reason")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_HANDOFF_REASON)
            .to_string();

        let mut handoff_ctx = context.clone();
        handoff_ctx.handoff_tracker.push(target_name.clone());
        handoff_ctx.handoff_reason = Some(reason.clone());

        let span = tracing::info_span!("handoff", source = %self.name, target = %target_name);
        async {
            tracing::info!(reason = %reason, "Handing off");

            if let Some(callback) = self.registry.callback(&key) {
                let data = match self.registry.input_type(&key) {
                    Some(input_type) => match input_type.parse(&args) {
                        Ok(parsed) => Some(parsed),
                        Err(e) => {
                            tracing::warn!(error = %e, "Hand-off arguments failed validation");
                            None
                        }
                    },
                    None => None,
                };
                callback(handoff_ctx.clone(), data).await;
            }

            let mut input = HandoffInputData {
                messages: if history.is_empty() {
                    vec![ChatMessage::user(
                        context
                            .original_query
                            .as_deref()
                            .unwrap_or(DEFAULT_HANDOFF_QUERY),
                    )]
                } else {
                    history.to_vec()
                },
            };
            if let Some(filter) = self.registry.input_filter(&key) {
                input = filter(&self.name, &target_name, input);
            } else if let Some(filter) = &self.handoff_input_filter {
                input = filter(&self.name, &target_name, input);
            }

            let message = input
                .latest_user_message()
                .map(str::to_string)
                .or_else(|| context.original_query.clone())
                .unwrap_or_else(|| DEFAULT_HANDOFF_QUERY.to_string());

            // A failed target run is still the hand-off's answer.
            let response = target_agent.handle_task(&message, handoff_ctx).await;
            if !response.success {
                tracing::warn!(
                    error = response.error.as_deref().unwrap_or_default(),
                    "Hand-off target failed"
                );
            }

            Ok::<_, AgentError>(HandoffOutcome {
                target: target_name.clone(),
                tool_call_id: call.id.clone(),
                response,
            })
        }
        .instrument(span)
        .await
    }
}

/// Parse raw tool arguments; an empty string means no arguments.
fn parse_arguments(call: &ToolCall) -> Result<Value, AgentError> {
    if call.arguments.trim().is_empty() {
        return Ok(json!({}));
    }
    serde_json::from_str(&call.arguments).map_err(|e| AgentError::Parse {
        name: call.name.clone(),
        message: e.to_string(),
    })
}

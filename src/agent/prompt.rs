//! Function-calling surface sent to the backend.

use std::sync::Arc;

use serde_json::{json, Map, Value};

use crate::llm::ToolDefinition;
use crate::tools::Tool;

use super::handoff::{default_tool_description, default_tool_name};
use super::registry::HandoffRegistry;

/// Tool definitions: the agent's own tools, then one hand-off tool per target
/// in declaration order.
pub(crate) fn tool_definitions(
    tools: &[Arc<dyn Tool>],
    registry: &HandoffRegistry,
) -> Vec<ToolDefinition> {
    let mut definitions: Vec<ToolDefinition> = tools.iter().map(|t| t.definition()).collect();

    for target in registry.targets() {
        let key = target.key();
        let target_name = target.agent().name();

        let name = registry
            .tool_name(&key)
            .map(str::to_string)
            .unwrap_or_else(|| default_tool_name(target_name));
        let description = registry
            .tool_description(&key)
            .map(str::to_string)
            .unwrap_or_else(|| default_tool_description(target_name));
        let fields = registry
            .input_type(&key)
            .map(|t| t.fields())
            .unwrap_or_default();

        definitions.push(ToolDefinition {
            name,
            description,
            parameters: handoff_parameters(&fields),
        });
    }

    definitions
}

fn handoff_parameters(fields: &[String]) -> Value {
    let mut properties = Map::new();
    properties.insert(
        "reason".to_string(),
        json!({
            "type": "string",
            "description": "Optional reason for the handoff"
        }),
    );
    for field in fields {
        properties
            .entry(field.clone())
            .or_insert_with(|| json!({ "type": "string" }));
    }

    json!({
        "type": "object",
        "properties": properties,
        "required": []
    })
}

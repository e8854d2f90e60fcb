//! Per-agent hand-off registry, built once from the agent's hand-off list.

use std::collections::HashMap;

use super::handoff::{
    default_tool_description, default_tool_name, AgentKey, HandoffInputType, HandoffTarget,
    InputFilter, OnHandoff, HANDOFF_TOOL_PREFIX,
};
use super::AgentConfigError;
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct HandoffRegistry {
    targets: Vec<(AgentKey, HandoffTarget)>,
    callbacks: HashMap<AgentKey, OnHandoff>,
    input_types: HashMap<AgentKey, Arc<dyn HandoffInputType>>,
    input_filters: HashMap<AgentKey, InputFilter>,
    tool_names: HashMap<AgentKey, String>,
    tool_descriptions: HashMap<AgentKey, String>,
    /// Synthesized tool name -> target key.
    tool_targets: HashMap<String, AgentKey>,
}

impl HandoffRegistry {
    /// Build the registry for `agent_name`.
    ///
    /// Rejects two targets normalizing to the same key, hand-off tool
    /// names that repeat or collide with one of the agent's own tools, and
    /// own tools named like hand-offs.
    pub fn build(
        agent_name: &str,
        handoffs: &[HandoffTarget],
        own_tool_names: &[&str],
    ) -> Result<Self, AgentConfigError> {
        if let Some(name) = own_tool_names
            .iter()
            .find(|n| n.starts_with(HANDOFF_TOOL_PREFIX))
        {
            return Err(AgentConfigError::ReservedToolName {
                agent: agent_name.to_string(),
                name: name.to_string(),
            });
        }

        let mut registry = Self::default();

        for target in handoffs {
            let key = target.key();
            if registry.targets.iter().any(|(k, _)| *k == key) {
                return Err(AgentConfigError::DuplicateHandoffKey {
                    agent: agent_name.to_string(),
                    key: key.to_string(),
                });
            }

            let target_name = target.agent().name().to_string();
            let mut tool_name = default_tool_name(&target_name);
            let mut description = default_tool_description(&target_name);

            if let HandoffTarget::Handoff(handoff) = target {
                if let Some(cb) = &handoff.on_handoff {
                    registry.callbacks.insert(key.clone(), cb.clone());
                }
                if let Some(input_type) = &handoff.input_type {
                    registry.input_types.insert(key.clone(), input_type.clone());
                }
                if let Some(filter) = &handoff.input_filter {
                    registry.input_filters.insert(key.clone(), filter.clone());
                }
                if let Some(name) = &handoff.tool_name_override {
                    tool_name = name.clone();
                }
                if let Some(desc) = &handoff.tool_description_override {
                    description = desc.clone();
                }
            }

            if registry.tool_targets.contains_key(&tool_name)
                || own_tool_names.contains(&tool_name.as_str())
            {
                return Err(AgentConfigError::DuplicateToolName {
                    agent: agent_name.to_string(),
                    name: tool_name,
                });
            }

            registry.tool_targets.insert(tool_name.clone(), key.clone());
            registry.tool_names.insert(key.clone(), tool_name);
            registry.tool_descriptions.insert(key.clone(), description);
            registry.targets.push((key, target.clone()));
        }

        Ok(registry)
    }

    /// Whether a tool-call name addresses a hand-off rather than a tool.
    pub fn is_handoff(&self, tool_name: &str) -> bool {
        self.tool_targets.contains_key(tool_name) || tool_name.starts_with(HANDOFF_TOOL_PREFIX)
    }

    /// Find the target a hand-off tool call refers to.
    ///
    /// Registered tool names map directly. Anything else falls back to a scan
    /// in declaration order where the first target whose key or display name
    /// (case-insensitive) appears inside the tool name wins.
    pub fn resolve(&self, tool_name: &str) -> Option<&HandoffTarget> {
        if let Some(key) = self.tool_targets.get(tool_name) {
            return self.target(key);
        }

        let lowered = tool_name.to_lowercase();
        self.targets
            .iter()
            .find(|(key, target)| {
                lowered.contains(key.as_str())
                    || lowered.contains(&target.agent().name().to_lowercase())
            })
            .map(|(_, target)| target)
    }

    pub fn target(&self, key: &AgentKey) -> Option<&HandoffTarget> {
        self.targets.iter().find(|(k, _)| k == key).map(|(_, t)| t)
    }

    pub fn targets(&self) -> impl Iterator<Item = &HandoffTarget> {
        self.targets.iter().map(|(_, t)| t)
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn callback(&self, key: &AgentKey) -> Option<&OnHandoff> {
        self.callbacks.get(key)
    }

    pub fn input_type(&self, key: &AgentKey) -> Option<&Arc<dyn HandoffInputType>> {
        self.input_types.get(key)
    }

    pub fn input_filter(&self, key: &AgentKey) -> Option<&InputFilter> {
        self.input_filters.get(key)
    }

    pub fn tool_name(&self, key: &AgentKey) -> Option<&str> {
        self.tool_names.get(key).map(String::as_str)
    }

    pub fn tool_description(&self, key: &AgentKey) -> Option<&str> {
        self.tool_descriptions.get(key).map(String::as_str)
    }

    /// Replace the input filter for one target.
    pub fn set_input_filter(
        &mut self,
        agent_name: &str,
        target_name: &str,
        filter: InputFilter,
    ) -> Result<(), AgentConfigError> {
        let key = AgentKey::from_name(target_name);
        if self.target(&key).is_none() {
            return Err(AgentConfigError::UnknownHandoffTarget {
                agent: agent_name.to_string(),
                target: target_name.to_string(),
            });
        }
        self.input_filters.insert(key, filter);
        Ok(())
    }
}

//! Hand-off declarations.
//!
//! An agent lists the agents it may transfer a task to. Each entry is either a
//! bare agent or a [`Handoff`] carrying per-target customization. The choice
//! is made when the agent is built, never inferred later.

use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Agent, ExecutionContext};
use crate::llm::ChatMessage;

/// Prefix of synthesized hand-off tool names.
pub const HANDOFF_TOOL_PREFIX: &str = "transfer_to_";

/// Normalized registry key derived from an agent's display name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AgentKey(String);

impl AgentKey {
    /// Lowercase the name and join whitespace-separated words with `_`.
    pub fn from_name(name: &str) -> Self {
        Self(
            name.split_whitespace()
                .map(str::to_lowercase)
                .collect::<Vec<_>>()
                .join("_"),
        )
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Default hand-off tool name, e.g. `transfer_to_research_agent`.
pub fn default_tool_name(agent_name: &str) -> String {
    format!("{}{}", HANDOFF_TOOL_PREFIX, AgentKey::from_name(agent_name))
}

pub fn default_tool_description(agent_name: &str) -> String {
    format!(
        "Handoff to the {} agent to handle the request.",
        agent_name
    )
}

/// Conversation payload forwarded to a hand-off target.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HandoffInputData {
    pub messages: Vec<ChatMessage>,
}

impl HandoffInputData {
    /// Content of the most recent user message.
    pub fn latest_user_message(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == crate::llm::Role::User)
            .and_then(|m| m.content.as_deref())
    }
}

/// Transforms the payload sent to a target: `(source, target, input) -> input`.
pub type InputFilter = Arc<dyn Fn(&str, &str, HandoffInputData) -> HandoffInputData + Send + Sync>;

/// Invoked before control moves to the target, with parsed arguments when an
/// input type is registered and they validate.
pub type OnHandoff = Arc<dyn Fn(ExecutionContext, Option<Value>) -> BoxFuture<'static, ()> + Send + Sync>;

/// Schema for hand-off arguments.
pub trait HandoffInputType: Send + Sync {
    /// Validate raw arguments, returning the normalized value.
    fn parse(&self, args: &Value) -> Result<Value, String>;

    /// Extra argument names advertised in the hand-off tool schema.
    fn fields(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Input type backed by a serde type: arguments validate when they
/// deserialize into `T`.
pub struct TypedInput<T> {
    fields: Vec<String>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> TypedInput<T> {
    pub fn new(fields: &[&str]) -> Self {
        Self {
            fields: fields.iter().map(|f| f.to_string()).collect(),
            _marker: PhantomData,
        }
    }
}

impl<T> HandoffInputType for TypedInput<T>
where
    T: DeserializeOwned + Serialize + 'static,
{
    fn parse(&self, args: &Value) -> Result<Value, String> {
        let typed: T = serde_json::from_value(args.clone()).map_err(|e| e.to_string())?;
        serde_json::to_value(typed).map_err(|e| e.to_string())
    }

    fn fields(&self) -> Vec<String> {
        self.fields.clone()
    }
}

/// A hand-off target with optional customization.
#[derive(Clone)]
pub struct Handoff {
    pub(crate) agent: Arc<Agent>,
    pub(crate) on_handoff: Option<OnHandoff>,
    pub(crate) input_type: Option<Arc<dyn HandoffInputType>>,
    pub(crate) input_filter: Option<InputFilter>,
    pub(crate) tool_name_override: Option<String>,
    pub(crate) tool_description_override: Option<String>,
}

impl Handoff {
    pub fn new(agent: Arc<Agent>) -> Self {
        Self {
            agent,
            on_handoff: None,
            input_type: None,
            input_filter: None,
            tool_name_override: None,
            tool_description_override: None,
        }
    }

    pub fn on_handoff<F, Fut>(mut self, callback: F) -> Self
    where
        F: Fn(ExecutionContext, Option<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_handoff = Some(Arc::new(move |ctx, data| Box::pin(callback(ctx, data))));
        self
    }

    pub fn input_type(mut self, input_type: impl HandoffInputType + 'static) -> Self {
        self.input_type = Some(Arc::new(input_type));
        self
    }

    pub fn input_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&str, &str, HandoffInputData) -> HandoffInputData + Send + Sync + 'static,
    {
        self.input_filter = Some(Arc::new(filter));
        self
    }

    pub fn tool_name(mut self, name: impl Into<String>) -> Self {
        self.tool_name_override = Some(name.into());
        self
    }

    pub fn tool_description(mut self, description: impl Into<String>) -> Self {
        self.tool_description_override = Some(description.into());
        self
    }

    pub fn agent(&self) -> &Arc<Agent> {
        &self.agent
    }
}

/// Entry in an agent's hand-off list.
#[derive(Clone)]
pub enum HandoffTarget {
    Agent(Arc<Agent>),
    Handoff(Handoff),
}

impl HandoffTarget {
    pub fn agent(&self) -> &Arc<Agent> {
        match self {
            HandoffTarget::Agent(agent) => agent,
            HandoffTarget::Handoff(handoff) => &handoff.agent,
        }
    }

    pub fn key(&self) -> AgentKey {
        AgentKey::from_name(self.agent().name())
    }
}

impl From<Arc<Agent>> for HandoffTarget {
    fn from(agent: Arc<Agent>) -> Self {
        HandoffTarget::Agent(agent)
    }
}

impl From<Handoff> for HandoffTarget {
    fn from(handoff: Handoff) -> Self {
        HandoffTarget::Handoff(handoff)
    }
}

//! Agent module - the core agent logic.
//!
//! An agent follows a single-turn "tools then answer" pattern:
//! 1. Resolve instructions against the execution context
//! 2. Call the LLM with the agent's tools plus one synthesized tool per hand-off target
//! 3. Execute requested tool calls in order; a successful hand-off ends the batch
//!    and the target agent's response becomes the answer
//! 4. Otherwise answer with the text (or tool results) produced by the model
//!
//! The streaming variant keeps consuming backend events after each tool batch
//! until the stream ends, a hand-off happens or the turn budget runs out.

mod agent_loop;
mod as_tool;
mod context;
mod error;
mod handoff;
mod prompt;
mod registry;
mod stream;
mod tool_calls;

pub use agent_loop::{Agent, AgentBuilder, AgentId, Instructions, OutputFilter, DEFAULT_MODEL};
pub use as_tool::AgentTool;
pub use context::{AgentResponse, ExecutionContext, DEFAULT_MAX_TURNS};
pub use error::{AgentConfigError, AgentError};
pub use handoff::{
    AgentKey, Handoff, HandoffInputData, HandoffInputType, HandoffTarget, InputFilter, OnHandoff,
    TypedInput, HANDOFF_TOOL_PREFIX,
};
pub use registry::HandoffRegistry;
pub use stream::StreamCallbacks;
pub use tool_calls::{HandoffOutcome, ToolBatchOutcome, MAX_HANDOFF_DEPTH};

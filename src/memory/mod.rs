//! Agent memory.
//!
//! Memory is best-effort: agents log and swallow every [`MemoryError`].

mod in_memory;

pub use in_memory::InMemoryStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::agent::ExecutionContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    Conversation,
    LongTerm,
}

impl MemoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryKind::Conversation => "conversation",
            MemoryKind::LongTerm => "long_term",
        }
    }
}

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("memory store unavailable: {0}")]
    Unavailable(String),

    #[error("memory entry rejected: {0}")]
    Rejected(String),
}

/// Store of past interactions an agent can draw on.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn store(&self, text: &str, kind: MemoryKind, tags: &[String]) -> Result<(), MemoryError>;

    /// Return `context` enriched with memories relevant to `query`.
    async fn enhance_context(
        &self,
        context: ExecutionContext,
        query: &str,
    ) -> Result<ExecutionContext, MemoryError>;
}

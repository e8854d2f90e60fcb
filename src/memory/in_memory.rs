//! In-memory memory store (non-persistent).

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{MemoryError, MemoryKind, MemoryStore};
use crate::agent::ExecutionContext;

/// Maximum number of memories attached to a context.
const MAX_RELEVANT: usize = 5;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryEntry {
    pub id: Uuid,
    pub namespace: String,
    pub kind: MemoryKind,
    pub text: String,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct InMemoryStore {
    namespace: String,
    entries: Arc<RwLock<Vec<MemoryEntry>>>,
}

impl InMemoryStore {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            entries: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub async fn entries(&self) -> Vec<MemoryEntry> {
        self.entries.read().await.clone()
    }

    /// Most recent entries sharing at least one keyword with `query`.
    pub async fn relevant(&self, query: &str) -> Vec<MemoryEntry> {
        let keywords = keywords(query);
        if keywords.is_empty() {
            return Vec::new();
        }
        self.entries
            .read()
            .await
            .iter()
            .rev()
            .filter(|entry| entry.namespace == self.namespace)
            .filter(|entry| !keywords.is_disjoint(&self::keywords(&entry.text)))
            .take(MAX_RELEVANT)
            .cloned()
            .collect()
    }
}

/// Lowercased words longer than three characters.
fn keywords(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() > 3)
        .map(str::to_lowercase)
        .collect()
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn store(&self, text: &str, kind: MemoryKind, tags: &[String]) -> Result<(), MemoryError> {
        if text.trim().is_empty() {
            return Err(MemoryError::Rejected("empty memory text".to_string()));
        }
        self.entries.write().await.push(MemoryEntry {
            id: Uuid::new_v4(),
            namespace: self.namespace.clone(),
            kind,
            text: text.to_string(),
            tags: tags.to_vec(),
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn enhance_context(
        &self,
        mut context: ExecutionContext,
        query: &str,
    ) -> Result<ExecutionContext, MemoryError> {
        let relevant = self.relevant(query).await;
        if !relevant.is_empty() {
            let memories: Vec<_> = relevant
                .iter()
                .map(|m| json!({ "kind": m.kind, "text": m.text, "createdAt": m.created_at }))
                .collect();
            context
                .metadata
                .insert("relevantMemories".to_string(), json!(memories));
        }
        Ok(context)
    }
}

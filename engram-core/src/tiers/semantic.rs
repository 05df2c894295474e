//! Semantic memory: durable facts with confidence. Does not decay.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, instrument};

use crate::constants::{defaults, metadata_keys};
use crate::error::Result;
use crate::storage::{require_memory_ops, MemoryStorage, RecallOptions, StorageProvider};
use crate::types::{Memory, MemoryData, MemoryType};

use super::require_user_id;

/// Semantic tier configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticConfig {
    /// Default confidence attached to stored facts.
    pub confidence_threshold: f64,
    /// Similarity above which two facts are considered duplicates.
    pub deduplication_threshold: f64,
    /// Cap on facts kept per category.
    pub max_memories_per_category: usize,
    /// Whether semantic recall may use vector search.
    pub vector_search_enabled: bool,
    /// Whether facts are auto-extracted from stored content.
    pub auto_extract_facts: bool,
    /// Whether sensitive content is encrypted at rest (adapter concern).
    pub encrypt_sensitive: bool,
}

impl Default for SemanticConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: defaults::SEMANTIC_CONFIDENCE_THRESHOLD,
            deduplication_threshold: 0.8,
            max_memories_per_category: 500,
            vector_search_enabled: true,
            auto_extract_facts: false,
            encrypt_sensitive: false,
        }
    }
}

/// Per-store overrides.
#[derive(Debug, Clone, Default)]
pub struct SemanticStoreOptions {
    /// Keywords attached to the fact.
    pub keywords: Option<Vec<String>>,
    /// Confidence override; defaults to the configured threshold, never a
    /// hard-coded 1.0.
    pub confidence: Option<f64>,
    /// Provenance label recorded under `metadata.source`.
    pub source: Option<String>,
    /// Extra metadata merged into the bag.
    pub metadata: Option<Map<String, Value>>,
}

/// Semantic-tier projection of a memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticFact {
    pub id: String,
    pub content: String,
    pub confidence: f64,
    pub source: Option<String>,
    pub keywords: Vec<String>,
    pub importance: f64,
    pub created_at: DateTime<Utc>,
}

/// Result of a consolidation pass.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ConsolidationResult {
    /// Facts merged away.
    pub consolidated: usize,
}

/// Semantic memory facade.
pub struct SemanticMemory {
    storage: Arc<dyn StorageProvider>,
    config: SemanticConfig,
}

impl SemanticMemory {
    /// Requires a storage backend with memory operations.
    pub fn new(storage: Arc<dyn StorageProvider>, config: SemanticConfig) -> Result<Self> {
        require_memory_ops(storage.as_ref(), "SemanticMemory")?;
        Ok(Self { storage, config })
    }

    fn ops(&self) -> Result<&dyn MemoryStorage> {
        require_memory_ops(self.storage.as_ref(), "SemanticMemory")
    }

    /// Store a fact.
    #[instrument(skip(self, content, options), fields(user_id = %user_id, agent_id = %agent_id))]
    pub async fn store(
        &self,
        user_id: &str,
        agent_id: &str,
        content: &str,
        options: SemanticStoreOptions,
    ) -> Result<String> {
        require_user_id(user_id)?;

        let confidence = options
            .confidence
            .unwrap_or(self.config.confidence_threshold)
            .clamp(0.0, 1.0);

        let mut data = MemoryData::new(MemoryType::Semantic, content);
        data.keywords = options.keywords.unwrap_or_default();
        if let Some(extra) = options.metadata {
            for (key, value) in extra {
                data.metadata.insert(key, value);
            }
        }
        data.metadata
            .insert(metadata_keys::CONFIDENCE.into(), Value::from(confidence));
        if let Some(source) = options.source {
            data.metadata
                .insert(metadata_keys::SOURCE.into(), Value::from(source));
        }

        let id = self.ops()?.store(user_id, agent_id, data).await?;
        debug!(memory_id = %id, confidence, "stored semantic fact");
        Ok(id)
    }

    /// Search facts matching the query (top 20).
    pub async fn search(&self, user_id: &str, agent_id: &str, query: &str) -> Result<Vec<Memory>> {
        require_user_id(user_id)?;
        self.ops()?
            .recall(
                user_id,
                agent_id,
                query,
                &RecallOptions {
                    memory_type: Some(MemoryType::Semantic),
                    limit: Some(20),
                    ..RecallOptions::default()
                },
            )
            .await
    }

    /// Project one fact; `None` for other tiers.
    pub async fn get_by_id(&self, user_id: &str, memory_id: &str) -> Result<Option<SemanticFact>> {
        require_user_id(user_id)?;
        let Some(memory) = self.ops()?.get_by_id(user_id, memory_id).await? else {
            return Ok(None);
        };
        if memory.memory_type != MemoryType::Semantic {
            return Ok(None);
        }

        let confidence = memory
            .metadata
            .get(metadata_keys::CONFIDENCE)
            .and_then(Value::as_f64)
            .unwrap_or(self.config.confidence_threshold);
        let source = memory
            .metadata
            .get(metadata_keys::SOURCE)
            .and_then(Value::as_str)
            .map(ToString::to_string);
        Ok(Some(SemanticFact {
            id: memory.id.clone(),
            content: memory.content.clone(),
            confidence,
            source,
            keywords: memory.keywords.clone(),
            importance: memory.importance,
            created_at: memory.created_at,
        }))
    }

    /// Merge near-duplicate facts. The in-core implementation is a no-op
    /// unless the backend grows a native dedup primitive; the call still
    /// validates its inputs.
    pub async fn consolidate(&self, user_id: &str, agent_id: &str) -> Result<ConsolidationResult> {
        require_user_id(user_id)?;
        self.ops()?;
        let _ = agent_id;
        Ok(ConsolidationResult::default())
    }
}

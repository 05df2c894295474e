//! Working memory: short-lived, session-scoped context that expires by TTL.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::constants::{defaults, metadata_keys};
use crate::error::Result;
use crate::storage::{require_memory_ops, MemoryStorage, RecallOptions, StorageProvider};
use crate::types::{Memory, MemoryData, MemoryType};

use super::require_user_id;

/// Working tier configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkingConfig {
    /// Token budget for a session's working set.
    pub max_tokens: usize,
    /// Default time-to-live for entries.
    pub ttl_seconds: u64,
    /// Context window recorded on each entry.
    pub max_context_items: usize,
    /// Fill ratio at which compression should kick in.
    pub compression_threshold: f64,
    /// Whether sensitive content is encrypted at rest (adapter concern).
    pub encrypt_sensitive: bool,
}

impl Default for WorkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: 4000,
            ttl_seconds: defaults::WORKING_TTL_SECONDS,
            max_context_items: defaults::WORKING_MAX_CONTEXT_ITEMS,
            compression_threshold: 0.8,
            encrypt_sensitive: false,
        }
    }
}

/// Per-store overrides.
#[derive(Debug, Clone, Default)]
pub struct WorkingStoreOptions {
    /// Session scope; auto-generated when absent.
    pub session_id: Option<String>,
    /// Importance override.
    pub importance: Option<f64>,
    /// Context-window override.
    pub context_window: Option<usize>,
    /// TTL override.
    pub ttl_seconds: Option<u64>,
}

/// Working-tier projection of a memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkingMemoryItem {
    pub id: String,
    pub content: String,
    /// Required for working memories; a record without one projects to
    /// nothing rather than a fabricated value.
    pub session_id: String,
    pub importance: f64,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub context_window: Option<usize>,
}

/// Working memory facade.
pub struct WorkingMemory {
    storage: Arc<dyn StorageProvider>,
    config: WorkingConfig,
}

impl WorkingMemory {
    /// Requires a storage backend with memory operations.
    pub fn new(storage: Arc<dyn StorageProvider>, config: WorkingConfig) -> Result<Self> {
        require_memory_ops(storage.as_ref(), "WorkingMemory")?;
        Ok(Self { storage, config })
    }

    fn ops(&self) -> Result<&dyn MemoryStorage> {
        require_memory_ops(self.storage.as_ref(), "WorkingMemory")
    }

    /// Store a working memory for the session.
    #[instrument(skip(self, content, options), fields(user_id = %user_id, agent_id = %agent_id))]
    pub async fn store(
        &self,
        user_id: &str,
        agent_id: &str,
        content: &str,
        options: WorkingStoreOptions,
    ) -> Result<String> {
        require_user_id(user_id)?;

        let session_id = options
            .session_id
            .unwrap_or_else(|| format!("session_{}", Uuid::new_v4()));
        let ttl_seconds = options.ttl_seconds.unwrap_or(self.config.ttl_seconds);
        let expires_at = Utc::now() + Duration::seconds(i64::try_from(ttl_seconds).unwrap_or(0));
        let context_window = options
            .context_window
            .unwrap_or(self.config.max_context_items);

        let mut data = MemoryData::new(MemoryType::Working, content);
        if let Some(importance) = options.importance {
            data.importance = importance.clamp(0.0, 1.0);
        }
        data.session_id = Some(session_id.clone());
        data.metadata.insert(
            metadata_keys::EXPIRES_AT.into(),
            Value::from(expires_at.timestamp_millis()),
        );
        data.metadata.insert(
            metadata_keys::CONTEXT_WINDOW.into(),
            Value::from(context_window),
        );

        let id = self.ops()?.store(user_id, agent_id, data).await?;
        debug!(memory_id = %id, session_id = %session_id, "stored working memory");
        Ok(id)
    }

    /// Recall working memories matching the query.
    pub async fn recall(
        &self,
        user_id: &str,
        agent_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<Memory>> {
        require_user_id(user_id)?;
        self.ops()?
            .recall(
                user_id,
                agent_id,
                query,
                &RecallOptions {
                    memory_type: Some(MemoryType::Working),
                    limit: Some(limit),
                    ..RecallOptions::default()
                },
            )
            .await
    }

    /// Project one working memory. Returns `None` for other tiers, expired
    /// entries, and records missing a session id.
    pub async fn get_by_id(
        &self,
        user_id: &str,
        memory_id: &str,
    ) -> Result<Option<WorkingMemoryItem>> {
        require_user_id(user_id)?;
        let Some(memory) = self.ops()?.get_by_id(user_id, memory_id).await? else {
            return Ok(None);
        };
        if memory.memory_type != MemoryType::Working || memory.is_expired(Utc::now()) {
            return Ok(None);
        }
        let Some(session_id) = memory.session_id.clone() else {
            return Ok(None);
        };

        let context_window = memory
            .metadata
            .get(metadata_keys::CONTEXT_WINDOW)
            .and_then(Value::as_u64)
            .and_then(|v| usize::try_from(v).ok());
        Ok(Some(WorkingMemoryItem {
            id: memory.id.clone(),
            content: memory.content.clone(),
            session_id,
            importance: memory.importance,
            created_at: memory.created_at,
            expires_at: memory.expires_at(),
            context_window,
        }))
    }

    /// Remove every working memory for the user/agent tuple.
    #[instrument(skip(self), fields(user_id = %user_id, agent_id = %agent_id))]
    pub async fn clear(&self, user_id: &str, agent_id: &str) -> Result<usize> {
        require_user_id(user_id)?;
        let ops = self.ops()?;
        let memories = ops
            .recall(
                user_id,
                agent_id,
                "",
                &RecallOptions {
                    memory_type: Some(MemoryType::Working),
                    limit: Some(usize::MAX),
                    ..RecallOptions::default()
                },
            )
            .await?;

        let mut removed = 0;
        for memory in memories {
            ops.delete(user_id, agent_id, &memory.id).await?;
            removed += 1;
        }
        debug!(removed, "cleared working memories");
        Ok(removed)
    }
}

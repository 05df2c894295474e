//! Episodic memory: timestamped experiences with tags that decay by
//! resonance and compress after an age window.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::constants::{defaults, metadata_keys};
use crate::error::Result;
use crate::storage::{
    require_memory_ops, DecayOptions, DecayResult, MemoryStorage, RecallOptions, StorageProvider,
};
use crate::types::{Memory, MemoryData, MemoryType, TimeRange};

use super::require_user_id;

/// Episodic tier configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodicConfig {
    /// Cap on memories kept per session.
    pub max_memories_per_session: usize,
    /// Resonance fraction removed per decay pass.
    pub decay_rate: f64,
    /// Importance below which decayed memories may be removed.
    pub importance_threshold: f64,
    /// Days until an episodic memory is eligible for compression.
    pub compression_age_days: u32,
    /// Whether sensitive content is encrypted at rest (adapter concern).
    pub encrypt_sensitive: bool,
}

impl Default for EpisodicConfig {
    fn default() -> Self {
        Self {
            max_memories_per_session: 1000,
            decay_rate: 0.1,
            importance_threshold: 0.3,
            compression_age_days: defaults::EPISODIC_COMPRESSION_AGE_DAYS,
            encrypt_sensitive: false,
        }
    }
}

/// Per-store overrides.
#[derive(Debug, Clone, Default)]
pub struct EpisodicStoreOptions {
    /// Tags recorded under `metadata.tags` (empty list when absent).
    pub tags: Option<Vec<String>>,
    /// Session the experience belongs to.
    pub session_id: Option<String>,
    /// Importance override.
    pub importance: Option<f64>,
}

/// Episodic-tier projection of a memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodicMemoryItem {
    pub id: String,
    pub content: String,
    pub tags: Vec<String>,
    pub session_id: Option<String>,
    pub importance: f64,
    pub resonance: f64,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Episodic memory facade.
pub struct EpisodicMemory {
    storage: Arc<dyn StorageProvider>,
    config: EpisodicConfig,
}

impl EpisodicMemory {
    /// Requires a storage backend with memory operations.
    pub fn new(storage: Arc<dyn StorageProvider>, config: EpisodicConfig) -> Result<Self> {
        require_memory_ops(storage.as_ref(), "EpisodicMemory")?;
        Ok(Self { storage, config })
    }

    fn ops(&self) -> Result<&dyn MemoryStorage> {
        require_memory_ops(self.storage.as_ref(), "EpisodicMemory")
    }

    /// Store an episodic memory.
    #[instrument(skip(self, content, options), fields(user_id = %user_id, agent_id = %agent_id))]
    pub async fn store(
        &self,
        user_id: &str,
        agent_id: &str,
        content: &str,
        options: EpisodicStoreOptions,
    ) -> Result<String> {
        require_user_id(user_id)?;

        let expires_at =
            Utc::now() + Duration::days(i64::from(self.config.compression_age_days));
        let tags = options.tags.unwrap_or_default();

        let mut data = MemoryData::new(MemoryType::Episodic, content);
        if let Some(importance) = options.importance {
            data.importance = importance.clamp(0.0, 1.0);
        }
        data.session_id = options.session_id;
        data.metadata.insert(
            metadata_keys::TAGS.into(),
            Value::from(tags.clone()),
        );
        data.metadata.insert(
            metadata_keys::EXPIRES_AT.into(),
            Value::from(expires_at.timestamp_millis()),
        );

        let id = self.ops()?.store(user_id, agent_id, data).await?;
        debug!(memory_id = %id, tags = tags.len(), "stored episodic memory");
        Ok(id)
    }

    /// Recall episodic memories, optionally inside a time range.
    pub async fn recall(
        &self,
        user_id: &str,
        agent_id: &str,
        query: &str,
        limit: usize,
        time_range: Option<TimeRange>,
    ) -> Result<Vec<Memory>> {
        require_user_id(user_id)?;
        self.ops()?
            .recall(
                user_id,
                agent_id,
                query,
                &RecallOptions {
                    memory_type: Some(MemoryType::Episodic),
                    limit: Some(limit),
                    time_range,
                    ..RecallOptions::default()
                },
            )
            .await
    }

    /// Project one episodic memory; `None` for other tiers.
    pub async fn get_by_id(
        &self,
        user_id: &str,
        memory_id: &str,
    ) -> Result<Option<EpisodicMemoryItem>> {
        require_user_id(user_id)?;
        let Some(memory) = self.ops()?.get_by_id(user_id, memory_id).await? else {
            return Ok(None);
        };
        if memory.memory_type != MemoryType::Episodic {
            return Ok(None);
        }

        let tags = memory
            .metadata
            .get(metadata_keys::TAGS)
            .and_then(Value::as_array)
            .map(|values| {
                values
                    .iter()
                    .filter_map(Value::as_str)
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Ok(Some(EpisodicMemoryItem {
            id: memory.id.clone(),
            content: memory.content.clone(),
            tags,
            session_id: memory.session_id.clone(),
            importance: memory.importance,
            resonance: memory.resonance,
            created_at: memory.created_at,
            expires_at: memory.expires_at(),
        }))
    }

    /// Run a decay pass when the backend supports one; zeros otherwise.
    #[instrument(skip(self), fields(user_id = %user_id, agent_id = %agent_id))]
    pub async fn decay(&self, user_id: &str, agent_id: &str) -> Result<DecayResult> {
        require_user_id(user_id)?;
        let ops = self.ops()?;
        if !ops.supports_decay() {
            debug!("storage backend has no decay support, skipping");
            return Ok(DecayResult::default());
        }
        ops.apply_decay(
            user_id,
            agent_id,
            &DecayOptions {
                decay_rate: self.config.decay_rate,
                removal_threshold: self.config.importance_threshold * self.config.decay_rate,
            },
        )
        .await
    }
}

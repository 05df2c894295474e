//! # Storage Abstraction
//!
//! The contract every backend must satisfy. Backends expose generic
//! key/value operations plus, when they support memory semantics, a typed
//! [`MemoryStorage`] sub-interface, and optionally an [`EvolutionSink`] for
//! lifecycle events.
//!
//! All memory operations take `user_id` first: per-user isolation is
//! enforced at every entry point, and a read whose stored tuple does not
//! match the caller's `user_id` returns nothing.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::types::{
    Connection, Memory, MemoryData, MemoryEvent, MemoryStats, MemoryType, MemoryUpdate, TimeRange,
};

/// Options for `MemoryStorage::recall`.
#[derive(Debug, Clone, Default)]
pub struct RecallOptions {
    /// Restrict to one tier.
    pub memory_type: Option<MemoryType>,
    /// Maximum results; `None` means the adapter default.
    pub limit: Option<usize>,
    /// Restrict to a creation-time window.
    pub time_range: Option<TimeRange>,
    /// Whether the adapter should hydrate metadata it stores out of line.
    pub include_metadata: bool,
}

/// Options for `MemoryStorage::search_by_vector`.
#[derive(Debug, Clone)]
pub struct VectorSearchOptions {
    pub limit: usize,
    pub memory_type: Option<MemoryType>,
    /// Minimum similarity for a hit.
    pub threshold: f64,
}

impl Default for VectorSearchOptions {
    fn default() -> Self {
        Self {
            limit: 20,
            memory_type: None,
            threshold: 0.0,
        }
    }
}

/// Options for `MemoryStorage::hybrid_search`.
#[derive(Debug, Clone)]
pub struct HybridSearchOptions {
    pub limit: usize,
    /// Restrict to one tier.
    pub filter: Option<MemoryType>,
    /// Weight of the vector component in the combined score.
    pub vector_weight: f64,
    /// Weight of the lexical component in the combined score.
    pub text_weight: f64,
    /// Minimum combined score for a hit.
    pub threshold: f64,
}

impl Default for HybridSearchOptions {
    fn default() -> Self {
        Self {
            limit: 20,
            filter: None,
            vector_weight: 0.6,
            text_weight: 0.4,
            threshold: 0.0,
        }
    }
}

/// A memory with the backend's combined retrieval score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredMemory {
    pub memory: Memory,
    /// Combined score in [0, 1].
    pub score: f64,
}

/// Result of a depth-limited traversal from one memory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectedMemories {
    pub memories: Vec<Memory>,
    pub connections: Vec<Connection>,
}

/// Options for `MemoryStorage::apply_decay`.
#[derive(Debug, Clone)]
pub struct DecayOptions {
    /// Fraction of resonance removed per application.
    pub decay_rate: f64,
    /// Memories whose resonance falls below this are removed.
    pub removal_threshold: f64,
}

impl Default for DecayOptions {
    fn default() -> Self {
        Self {
            decay_rate: 0.1,
            removal_threshold: 0.05,
        }
    }
}

/// Result of a decay pass.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DecayResult {
    /// Memories examined.
    pub processed: usize,
    /// Memories whose resonance was reduced.
    pub decayed: usize,
    /// Memories removed for falling below the threshold.
    pub removed: usize,
    /// Mean resonance reduction across decayed memories.
    pub average_decay: f64,
}

/// A single entry of a bulk decay update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchMemoryUpdate {
    pub memory_id: String,
    pub update: MemoryUpdate,
}

/// Typed memory sub-interface, present when the backend supports memory
/// semantics.
#[async_trait]
pub trait MemoryStorage: Send + Sync {
    /// Persist a memory, attaching id, the user/agent tuple, and timestamps.
    async fn store(&self, user_id: &str, agent_id: &str, data: MemoryData) -> Result<String>;

    /// Text recall. An empty query means "most recent up to limit".
    async fn recall(
        &self,
        user_id: &str,
        agent_id: &str,
        query: &str,
        options: &RecallOptions,
    ) -> Result<Vec<Memory>>;

    /// Strict user-scoped point read.
    async fn get_by_id(&self, user_id: &str, memory_id: &str) -> Result<Option<Memory>>;

    /// Merge a partial update and bump `updated_at`.
    async fn update(
        &self,
        user_id: &str,
        agent_id: &str,
        memory_id: &str,
        update: MemoryUpdate,
    ) -> Result<()>;

    /// Remove a memory.
    async fn delete(&self, user_id: &str, agent_id: &str, memory_id: &str) -> Result<()>;

    /// Aggregate statistics for the user, optionally narrowed to one agent.
    async fn get_stats(&self, user_id: &str, agent_id: Option<&str>) -> Result<MemoryStats>;

    /// Persist a batch of connections. Both endpoints must exist under the
    /// user; the connection type is validated against the closed set.
    async fn create_connections(&self, user_id: &str, connections: &[Connection]) -> Result<()>;

    /// All connections touching any of the given memories at either end.
    async fn get_connections_for_memories(
        &self,
        user_id: &str,
        memory_ids: &[String],
    ) -> Result<Vec<Connection>>;

    /// Depth-limited traversal from one memory, adapter-provided for
    /// performance.
    async fn find_connected_memories(
        &self,
        user_id: &str,
        memory_id: &str,
        depth: usize,
    ) -> Result<ConnectedMemories>;

    /// Whether [`MemoryStorage::apply_decay`] is implemented.
    fn supports_decay(&self) -> bool {
        false
    }

    /// Apply resonance decay across working/episodic memories.
    async fn apply_decay(
        &self,
        user_id: &str,
        agent_id: &str,
        options: &DecayOptions,
    ) -> Result<DecayResult> {
        let _ = (user_id, agent_id, options);
        Err(Error::Storage("decay not supported by this backend".into()))
    }

    /// Whether [`MemoryStorage::search_by_vector`] is implemented.
    fn supports_vector_search(&self) -> bool {
        false
    }

    /// Similarity search over stored embeddings.
    async fn search_by_vector(
        &self,
        user_id: &str,
        agent_id: &str,
        embedding: &[f32],
        options: &VectorSearchOptions,
    ) -> Result<Vec<ScoredMemory>> {
        let _ = (user_id, agent_id, embedding, options);
        Err(Error::Storage(
            "vector search not supported by this backend".into(),
        ))
    }

    /// Whether [`MemoryStorage::hybrid_search`] is implemented.
    fn supports_hybrid_search(&self) -> bool {
        false
    }

    /// Combined lexical + vector retrieval with a backend-native score.
    async fn hybrid_search(
        &self,
        user_id: &str,
        agent_id: &str,
        query: &str,
        embedding: &[f32],
        options: &HybridSearchOptions,
    ) -> Result<Vec<ScoredMemory>> {
        let _ = (user_id, agent_id, query, embedding, options);
        Err(Error::Storage(
            "hybrid search not supported by this backend".into(),
        ))
    }

    /// Whether [`MemoryStorage::batch_update_memories`] is implemented.
    fn supports_batch_update(&self) -> bool {
        false
    }

    /// Bulk partial updates, used by decay sweeps.
    async fn batch_update_memories(
        &self,
        user_id: &str,
        updates: Vec<BatchMemoryUpdate>,
    ) -> Result<usize> {
        let _ = (user_id, updates);
        Err(Error::Storage(
            "batch updates not supported by this backend".into(),
        ))
    }
}

/// Optional lifecycle-event sink. Callers never block on it and failures are
/// logged, never propagated.
#[async_trait]
pub trait EvolutionSink: Send + Sync {
    /// Record one event.
    async fn track_event(&self, event: MemoryEvent) -> Result<()>;

    /// Record a batch of events.
    async fn track_event_batch(&self, events: Vec<MemoryEvent>) -> Result<()>;
}

/// Unified storage provider contract.
///
/// The generic key/value surface carries ancillary state (rules, indexes);
/// memory semantics live behind [`StorageProvider::memory`].
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Point read.
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Point write.
    async fn set(&self, key: &str, value: Value) -> Result<()>;

    /// Remove a key; returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Existence check.
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Batched point reads, position-aligned with `keys`.
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<Value>>>;

    /// Batched point writes.
    async fn set_many(&self, entries: Vec<(String, Value)>) -> Result<()>;

    /// Batched removes; returns how many existed.
    async fn delete_many(&self, keys: &[String]) -> Result<usize>;

    /// List keys under a prefix. Adapters without native prefix support must
    /// log a warning and return empty rather than fail.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Remove everything.
    async fn clear(&self) -> Result<()>;

    /// The typed memory sub-interface, when this backend supports memory
    /// semantics.
    fn memory(&self) -> Option<&dyn MemoryStorage> {
        None
    }

    /// The lifecycle-event sink, when this backend provides one.
    fn evolution(&self) -> Option<&dyn EvolutionSink> {
        None
    }
}

/// Fetch the memory sub-interface or fail with the tier facades' standard
/// construction error.
pub fn require_memory_ops<'a>(
    storage: &'a dyn StorageProvider,
    component: &str,
) -> Result<&'a dyn MemoryStorage> {
    storage.memory().ok_or_else(|| {
        Error::Validation(format!("{component} requires storage with memory operations"))
    })
}

#![allow(clippy::cast_precision_loss)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_docs_in_private_items)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::float_cmp)]

//! # Engram Core
//!
//! A multi-tier memory engine for AI agents: free-form text is classified
//! into four cognitive tiers, persisted with strict per-user isolation,
//! linked through typed connections, and retrieved by a hybrid ranker
//! augmented with graph traversal.
//!
//! ## Core Concepts
//!
//! - **Working memory**: short-lived session context, expiring by TTL
//! - **Episodic memory**: timestamped experiences with tags and decay
//! - **Semantic memory**: durable facts with confidence
//! - **Procedural memory**: trigger→action patterns with success statistics
//! - **Connections**: typed, directed, weighted edges between memories
//! - **Temporal patterns**: daily/weekly/burst structure over timestamps
//!
//! ## Module Organization
//!
//! - [`system`]: the assembled [`MemorySystem`] facade
//! - [`tiers`]: the four tier facades over the storage contract
//! - [`connection`]: discovery engine, triage, graph, and queue
//! - [`temporal`]: statistical pattern analysis
//! - [`recall`]: hybrid retrieval, enrichment, caching, metrics
//! - [`storage`]: the provider contract backends implement
//! - [`embeddings`]: embedding service, cache, and mock provider
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use engram_core::{MemorySystem, MemoryType, RecallQuery};
//! # use engram_core::storage::StorageProvider;
//! # async fn example(storage: Arc<dyn StorageProvider>) -> engram_core::Result<()> {
//! let system = MemorySystem::builder(storage).build()?;
//!
//! let id = system
//!     .store("alice", "assistant", "Rust enums are sum types.", Some(MemoryType::Semantic))
//!     .await?;
//!
//! let result = system
//!     .recall(&RecallQuery {
//!         user_id: "alice".into(),
//!         agent_id: "assistant".into(),
//!         query: "enums".into(),
//!         ..RecallQuery::default()
//!     })
//!     .await?;
//! println!("found {} memories (strategy {})", result.memories.len(), result.search_strategy);
//! # let _ = id;
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! Every fallible operation returns [`Result`] with an [`Error`] from the
//! closed kind set (`validation`, `storage`, `llm-api-key`, `llm`,
//! `embedding`, `budget`, `internal`). Discovery swallows everything except
//! validation; recall surfaces validation and total-failure cases.

pub mod config;
pub mod connection;
pub mod constants;
pub mod cost;
pub mod embeddings;
pub mod error;
pub mod events;
pub mod llm;
pub mod recall;
pub mod storage;
pub mod system;
pub mod temporal;
pub mod tiers;
pub mod types;

// Re-export commonly used types
pub use config::{
    AnalysisFrequency, ConnectionDetectionConfig, CostControlConfig, EmbeddingConfig,
    HybridSearchWeights, IntelligenceLayerConfig, RecallConfig, TemporalConfig, TriageThresholds,
};
pub use connection::{
    CentralMemory, Classification, ConnectionEngine, ConnectionGraph, DiscoverOptions, GraphConfig,
};
pub use cost::{CostTracker, ExtractionUsage, InMemoryCostTracker};
pub use embeddings::{
    cosine_similarity, EmbeddingProvider, EmbeddingResult, EmbeddingService, MockEmbeddingProvider,
};
pub use error::{Error, Result};
pub use llm::{
    GenerateObjectRequest, GenerateObjectResponse, LlmClient, LlmClientFactory, LlmMessage,
    LlmTarget, ModelTier, TokenUsage,
};
pub use recall::{
    RecallMetrics, RecallQuery, RecallResult, RecallService, RelatedMemory, RelationshipType,
    UnifiedMemoryResult,
};
pub use storage::{
    ConnectedMemories, DecayOptions, DecayResult, EvolutionSink, HybridSearchOptions,
    MemoryStorage, RecallOptions, ScoredMemory, StorageProvider, VectorSearchOptions,
};
pub use system::{MemorySystem, MemorySystemBuilder, TierConfigs};
pub use temporal::TemporalPatternAnalyzer;
pub use tiers::{
    EpisodicConfig, EpisodicMemory, EpisodicStoreOptions, ProceduralConfig, ProceduralMemory,
    ProceduralStoreOptions, SemanticConfig, SemanticMemory, SemanticStoreOptions, WorkingConfig,
    WorkingMemory, WorkingStoreOptions,
};
pub use types::{
    ActivityCluster, Connection, ConnectionMetadata, ConnectionType, Memory, MemoryData,
    MemoryEvent, MemoryEventType, MemoryStats, MemoryType, MemoryUpdate, PatternKind,
    PatternMetadata, TemporalPattern, TimeRange, TriageMethod,
};

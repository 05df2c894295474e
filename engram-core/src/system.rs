//! # Memory system facade
//!
//! Assembles storage, embeddings, cost tracking, the four tiers, the
//! connection engine, the temporal analyzer, and the recall service behind
//! one entry point. `store` routes through the tier facades and enqueues
//! background connection discovery; `recall` delegates to the recall
//! service; `destroy` tears the owned services down.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Map;
use tracing::{debug, instrument, warn};

use crate::config::IntelligenceLayerConfig;
use crate::connection::ConnectionEngine;
use crate::cost::{CostTracker, InMemoryCostTracker};
use crate::embeddings::{EmbeddingProvider, EmbeddingService};
use crate::error::{Error, Result};
use crate::events;
use crate::llm::LlmClientFactory;
use crate::recall::{RecallQuery, RecallResult, RecallService};
use crate::storage::StorageProvider;
use crate::temporal::TemporalPatternAnalyzer;
use crate::tiers::{
    EpisodicConfig, EpisodicMemory, EpisodicStoreOptions, ProceduralConfig, ProceduralMemory,
    ProceduralStoreOptions, SemanticConfig, SemanticMemory, SemanticStoreOptions, WorkingConfig,
    WorkingMemory, WorkingStoreOptions,
};
use crate::types::{MemoryEventType, MemoryStats, MemoryType};

/// Per-tier configuration bundle.
#[derive(Debug, Clone, Default)]
pub struct TierConfigs {
    pub working: WorkingConfig,
    pub episodic: EpisodicConfig,
    pub semantic: SemanticConfig,
    pub procedural: ProceduralConfig,
}

/// Builder for [`MemorySystem`].
pub struct MemorySystemBuilder {
    storage: Arc<dyn StorageProvider>,
    config: IntelligenceLayerConfig,
    tier_configs: TierConfigs,
    embedding_provider: Option<Arc<dyn EmbeddingProvider>>,
    llm_factory: Option<Arc<dyn LlmClientFactory>>,
    cost_tracker: Option<Arc<dyn CostTracker>>,
}

impl MemorySystemBuilder {
    /// Start from a storage provider with the environment-derived config.
    #[must_use]
    pub fn new(storage: Arc<dyn StorageProvider>) -> Self {
        Self {
            storage,
            config: IntelligenceLayerConfig::from_env(),
            tier_configs: TierConfigs::default(),
            embedding_provider: None,
            llm_factory: None,
            cost_tracker: None,
        }
    }

    /// Replace the intelligence-layer configuration.
    #[must_use]
    pub fn config(mut self, config: IntelligenceLayerConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the per-tier configuration.
    #[must_use]
    pub fn tier_configs(mut self, tier_configs: TierConfigs) -> Self {
        self.tier_configs = tier_configs;
        self
    }

    /// Inject an embedding provider instead of the config factory.
    #[must_use]
    pub fn embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedding_provider = Some(provider);
        self
    }

    /// Inject an LLM client factory for classification and augmentation.
    #[must_use]
    pub fn llm_factory(mut self, factory: Arc<dyn LlmClientFactory>) -> Self {
        self.llm_factory = Some(factory);
        self
    }

    /// Inject a cost tracker.
    #[must_use]
    pub fn cost_tracker(mut self, tracker: Arc<dyn CostTracker>) -> Self {
        self.cost_tracker = Some(tracker);
        self
    }

    /// Assemble the system.
    pub fn build(self) -> Result<MemorySystem> {
        let embeddings = match self.embedding_provider {
            Some(provider) => Arc::new(EmbeddingService::new(
                provider,
                self.config.embedding.clone(),
            )),
            None => Arc::new(EmbeddingService::from_config(self.config.embedding.clone())?),
        };
        let cost_tracker = self
            .cost_tracker
            .unwrap_or_else(|| Arc::new(InMemoryCostTracker::new()));

        let working = Arc::new(WorkingMemory::new(
            Arc::clone(&self.storage),
            self.tier_configs.working,
        )?);
        let episodic = Arc::new(EpisodicMemory::new(
            Arc::clone(&self.storage),
            self.tier_configs.episodic,
        )?);
        let semantic = Arc::new(SemanticMemory::new(
            Arc::clone(&self.storage),
            self.tier_configs.semantic,
        )?);
        let procedural = Arc::new(ProceduralMemory::new(
            Arc::clone(&self.storage),
            self.tier_configs.procedural,
        )?);

        let engine = if self.config.connection_detection.enabled {
            Some(Arc::new(ConnectionEngine::new(
                Arc::clone(&self.storage),
                Arc::clone(&embeddings),
                Arc::clone(&cost_tracker),
                self.llm_factory.clone(),
                self.config.clone(),
            )?))
        } else {
            None
        };

        let temporal = TemporalPatternAnalyzer::new(
            Arc::clone(&self.storage),
            Arc::clone(&cost_tracker),
            self.llm_factory,
            self.config.clone(),
        );
        let recall_service = RecallService::new(
            Arc::clone(&self.storage),
            Arc::clone(&embeddings),
            engine.clone(),
            Arc::clone(&working),
            Arc::clone(&episodic),
            Arc::clone(&semantic),
            Arc::clone(&procedural),
            self.config.clone(),
        );

        Ok(MemorySystem {
            storage: self.storage,
            embeddings,
            cost_tracker,
            working,
            episodic,
            semantic,
            procedural,
            engine,
            temporal,
            recall_service,
            config: self.config,
            destroyed: AtomicBool::new(false),
        })
    }
}

/// The assembled memory engine.
pub struct MemorySystem {
    storage: Arc<dyn StorageProvider>,
    embeddings: Arc<EmbeddingService>,
    cost_tracker: Arc<dyn CostTracker>,
    working: Arc<WorkingMemory>,
    episodic: Arc<EpisodicMemory>,
    semantic: Arc<SemanticMemory>,
    procedural: Arc<ProceduralMemory>,
    engine: Option<Arc<ConnectionEngine>>,
    temporal: TemporalPatternAnalyzer,
    recall_service: RecallService,
    config: IntelligenceLayerConfig,
    destroyed: AtomicBool,
}

impl MemorySystem {
    /// Builder entry point.
    #[must_use]
    pub fn builder(storage: Arc<dyn StorageProvider>) -> MemorySystemBuilder {
        MemorySystemBuilder::new(storage)
    }

    /// Store content into a tier (semantic by default), emit the `created`
    /// event, and enqueue background connection discovery.
    #[instrument(skip(self, content), fields(user_id = %user_id, agent_id = %agent_id))]
    pub async fn store(
        &self,
        user_id: &str,
        agent_id: &str,
        content: &str,
        memory_type: Option<MemoryType>,
    ) -> Result<String> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(Error::Internal("memory system destroyed".into()));
        }

        let tier = memory_type.unwrap_or(MemoryType::Semantic);
        let memory_id = match tier {
            MemoryType::Working => {
                self.working
                    .store(user_id, agent_id, content, WorkingStoreOptions::default())
                    .await?
            }
            MemoryType::Episodic => {
                self.episodic
                    .store(user_id, agent_id, content, EpisodicStoreOptions::default())
                    .await?
            }
            MemoryType::Semantic => {
                self.semantic
                    .store(user_id, agent_id, content, SemanticStoreOptions::default())
                    .await?
            }
            MemoryType::Procedural => {
                self.procedural
                    .store(
                        user_id,
                        agent_id,
                        content,
                        ProceduralStoreOptions::default(),
                    )
                    .await?
            }
        };

        events::emit(
            self.storage.evolution(),
            events::lifecycle_event(
                &memory_id,
                user_id,
                agent_id,
                MemoryEventType::Created,
                Map::new(),
            ),
        )
        .await;

        if let Some(engine) = &self.engine {
            let engine = Arc::clone(engine);
            let user = user_id.to_string();
            let agent = agent_id.to_string();
            let id = memory_id.clone();
            tokio::spawn(async move {
                if let Err(err) = engine.enqueue_discovery(&user, &agent, &id).await {
                    warn!(error = %err, memory_id = %id, "background discovery failed");
                }
            });
        }

        debug!(memory_id = %memory_id, tier = %tier, "stored memory");
        Ok(memory_id)
    }

    /// Delete a memory and drop it from the in-process connection graph.
    #[instrument(skip(self), fields(user_id = %user_id, memory_id = %memory_id))]
    pub async fn delete(&self, user_id: &str, agent_id: &str, memory_id: &str) -> Result<()> {
        let ops = self
            .storage
            .memory()
            .ok_or_else(|| Error::Storage("storage backend has no memory operations".into()))?;
        ops.delete(user_id, agent_id, memory_id).await?;
        if let Some(engine) = &self.engine {
            engine.remove_from_graph(memory_id);
        }
        Ok(())
    }

    /// Cross-tier recall.
    pub async fn recall(&self, query: &RecallQuery) -> Result<RecallResult> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(Error::Internal("memory system destroyed".into()));
        }
        self.recall_service.recall(query).await
    }

    /// Aggregate statistics for a user (optionally one agent).
    pub async fn stats(&self, user_id: &str, agent_id: Option<&str>) -> Result<MemoryStats> {
        let ops = self
            .storage
            .memory()
            .ok_or_else(|| Error::Storage("storage backend has no memory operations".into()))?;
        ops.get_stats(user_id, agent_id).await
    }

    /// The working tier facade.
    #[must_use]
    pub fn working(&self) -> &WorkingMemory {
        &self.working
    }

    /// The episodic tier facade.
    #[must_use]
    pub fn episodic(&self) -> &EpisodicMemory {
        &self.episodic
    }

    /// The semantic tier facade.
    #[must_use]
    pub fn semantic(&self) -> &SemanticMemory {
        &self.semantic
    }

    /// The procedural tier facade.
    #[must_use]
    pub fn procedural(&self) -> &ProceduralMemory {
        &self.procedural
    }

    /// The connection engine, when connection detection is enabled.
    #[must_use]
    pub fn connection_engine(&self) -> Option<&Arc<ConnectionEngine>> {
        self.engine.as_ref()
    }

    /// The temporal pattern analyzer.
    #[must_use]
    pub fn temporal_analyzer(&self) -> &TemporalPatternAnalyzer {
        &self.temporal
    }

    /// The recall service.
    #[must_use]
    pub fn recall_service(&self) -> &RecallService {
        &self.recall_service
    }

    /// The embedding service.
    #[must_use]
    pub fn embeddings(&self) -> &Arc<EmbeddingService> {
        &self.embeddings
    }

    /// The cost tracker.
    #[must_use]
    pub fn cost_tracker(&self) -> &Arc<dyn CostTracker> {
        &self.cost_tracker
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &IntelligenceLayerConfig {
        &self.config
    }

    /// Tear down owned services: the discovery queue and the recall cache.
    /// Idempotent.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(engine) = &self.engine {
            engine.destroy();
        }
        self.recall_service.destroy();
        debug!("memory system destroyed");
    }
}

impl Drop for MemorySystem {
    fn drop(&mut self) {
        self.destroy();
    }
}

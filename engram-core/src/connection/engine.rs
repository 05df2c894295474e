//! Connection discovery orchestration.
//!
//! The engine drives the full pipeline for a newly stored memory: candidate
//! fetch, embedding similarity, smart triage (with the LLM band capped by
//! cost control), two-hop graph augmentation, persistence, graph mirroring,
//! and lifecycle events. Apart from `user_id` validation, discovery never
//! throws: every stage failure is logged and the call yields no connections.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, instrument, warn};

use crate::config::IntelligenceLayerConfig;
use crate::constants::defaults;
use crate::cost::CostTracker;
use crate::embeddings::{cosine_similarity, EmbeddingService};
use crate::error::{Error, Result};
use crate::events;
use crate::llm::LlmClientFactory;
use crate::storage::{
    ConnectedMemories, HybridSearchOptions, MemoryStorage, RecallOptions, StorageProvider,
    VectorSearchOptions,
};
use crate::types::{Connection, ConnectionMetadata, ConnectionType, Memory, MemoryEventType};

use super::classify::{classify_with_llm, smart_triage, Classification, TriageOutcome};
use super::graph::{ConnectionGraph, GraphConfig};
use super::queue::{ConnectionDiscoveryQueue, DiscoveryRunner};

/// Per-call discovery options.
#[derive(Debug, Clone, Copy)]
pub struct DiscoverOptions {
    /// Persist discovered connections through storage.
    pub auto_persist: bool,
    /// Pull the memory's stored connections into the in-process graph
    /// afterwards.
    pub enrich_from_storage: bool,
    /// Also return the memory's already-stored connections.
    pub return_existing: bool,
}

impl Default for DiscoverOptions {
    fn default() -> Self {
        Self {
            auto_persist: true,
            enrich_from_storage: false,
            return_existing: false,
        }
    }
}

/// A memory with its normalized centrality in the in-process graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CentralMemory {
    pub memory_id: String,
    /// Normalized to [0, 1] by `max(1, node_count - 1)`.
    pub centrality: f64,
}

struct EngineInner {
    storage: Arc<dyn StorageProvider>,
    embeddings: Arc<EmbeddingService>,
    cost_tracker: Arc<dyn CostTracker>,
    llm_factory: Option<Arc<dyn LlmClientFactory>>,
    config: IntelligenceLayerConfig,
    graph: RwLock<ConnectionGraph>,
}

/// Connection discovery engine.
pub struct ConnectionEngine {
    inner: Arc<EngineInner>,
    queue: ConnectionDiscoveryQueue,
}

impl std::fmt::Debug for ConnectionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionEngine").finish_non_exhaustive()
    }
}

impl ConnectionEngine {
    /// Build the engine. Triage threshold env overrides are applied here and
    /// the strict ordering invariant is validated (outside test mode).
    pub fn new(
        storage: Arc<dyn StorageProvider>,
        embeddings: Arc<EmbeddingService>,
        cost_tracker: Arc<dyn CostTracker>,
        llm_factory: Option<Arc<dyn LlmClientFactory>>,
        mut config: IntelligenceLayerConfig,
    ) -> Result<Self> {
        config.connection_detection.thresholds.apply_env();
        config.validate()?;

        let inner = Arc::new(EngineInner {
            storage,
            embeddings,
            cost_tracker,
            llm_factory,
            config,
            graph: RwLock::new(ConnectionGraph::new(GraphConfig::default())),
        });
        let queue = ConnectionDiscoveryQueue::new(Arc::<EngineInner>::clone(&inner));
        Ok(Self { inner, queue })
    }

    /// Run the discovery pipeline for a memory.
    pub async fn discover_connections(
        &self,
        user_id: &str,
        agent_id: &str,
        memory: &Memory,
        options: DiscoverOptions,
    ) -> Result<Vec<Connection>> {
        self.inner
            .discover(user_id, agent_id, memory, options)
            .await
    }

    /// Enqueue background discovery, serialized per `(user, agent, memory)`.
    pub async fn enqueue_discovery(
        &self,
        user_id: &str,
        agent_id: &str,
        memory_id: &str,
    ) -> Result<Vec<Connection>> {
        self.queue.enqueue(user_id, agent_id, memory_id).await
    }

    /// BFS path between two memories in the in-process graph.
    #[must_use]
    pub fn get_connection_path(&self, source: &str, target: &str) -> Vec<String> {
        self.inner.graph.read().find_path(source, target)
    }

    /// Connected components of at least `min_size` memories.
    #[must_use]
    pub fn get_memory_clusters(&self, min_size: usize) -> Vec<Vec<String>> {
        self.inner
            .graph
            .read()
            .get_clusters()
            .into_iter()
            .filter(|cluster| cluster.len() >= min_size.max(2))
            .collect()
    }

    /// Top memories by weighted degree centrality, normalized to [0, 1].
    #[must_use]
    pub fn get_central_memories(&self, limit: usize) -> Vec<CentralMemory> {
        let graph = self.inner.graph.read();
        let denominator = graph.node_count().saturating_sub(1).max(1) as f64;
        graph
            .find_central_memories(limit)
            .into_iter()
            .map(|(memory_id, raw)| CentralMemory {
                memory_id,
                centrality: (raw / denominator).min(1.0),
            })
            .collect()
    }

    /// Depth-limited traversal delegated to storage; empty when the backend
    /// lacks memory operations.
    pub async fn find_connected_memories(
        &self,
        user_id: &str,
        memory_id: &str,
        depth: usize,
    ) -> Result<ConnectedMemories> {
        match self.inner.storage.memory() {
            Some(ops) => ops.find_connected_memories(user_id, memory_id, depth).await,
            None => Ok(ConnectedMemories::default()),
        }
    }

    /// Load stored connections (and their endpoint memories) into the
    /// in-process graph.
    pub async fn load_connections_into_graph(
        &self,
        user_id: &str,
        memory_ids: &[String],
    ) -> Result<usize> {
        self.inner
            .load_connections_into_graph(user_id, memory_ids)
            .await
    }

    /// Number of nodes currently mirrored in the in-process graph.
    #[must_use]
    pub fn graph_node_count(&self) -> usize {
        self.inner.graph.read().node_count()
    }

    /// Drop a deleted memory from the in-process graph, scrubbing every
    /// edge that references it.
    pub fn remove_from_graph(&self, memory_id: &str) {
        self.inner.graph.write().remove_node(memory_id);
    }

    /// Cancel the discovery queue. Idempotent.
    pub fn destroy(&self) {
        self.queue.destroy();
    }
}

#[async_trait]
impl DiscoveryRunner for EngineInner {
    async fn run_discovery(
        &self,
        user_id: &str,
        agent_id: &str,
        memory_id: &str,
    ) -> Result<Vec<Connection>> {
        let Some(ops) = self.storage.memory() else {
            return Ok(Vec::new());
        };
        let Some(memory) = ops.get_by_id(user_id, memory_id).await? else {
            debug!(memory_id = %memory_id, "memory vanished before discovery");
            return Ok(Vec::new());
        };
        self.discover(user_id, agent_id, &memory, DiscoverOptions::default())
            .await
    }
}

impl EngineInner {
    #[instrument(skip(self, memory, options), fields(user_id = %user_id, memory_id = %memory.id))]
    async fn discover(
        &self,
        user_id: &str,
        agent_id: &str,
        memory: &Memory,
        options: DiscoverOptions,
    ) -> Result<Vec<Connection>> {
        if user_id.trim().is_empty() {
            return Err(Error::Validation("userId must not be empty".into()));
        }

        match self
            .discover_pipeline(user_id, agent_id, memory, options)
            .await
        {
            Ok(connections) => Ok(connections),
            Err(err) => {
                warn!(error = %err, "connection discovery failed, returning no connections");
                Ok(Vec::new())
            }
        }
    }

    async fn discover_pipeline(
        &self,
        user_id: &str,
        agent_id: &str,
        memory: &Memory,
        options: DiscoverOptions,
    ) -> Result<Vec<Connection>> {
        let Some(ops) = self.storage.memory() else {
            return Err(Error::Storage(
                "connection discovery requires storage with memory operations".into(),
            ));
        };

        let candidates = self.fetch_candidates(ops, user_id, agent_id).await;
        let query_embedding = self
            .embeddings
            .generate_embedding(&memory.content)
            .await?
            .embedding;
        self.graph.write().add_node(memory.clone());

        // Score every candidate against the new memory.
        let candidates: Vec<Memory> = candidates
            .into_iter()
            .filter(|c| c.id != memory.id && c.user_id == user_id)
            .collect();
        let contents: Vec<String> = candidates.iter().map(|c| c.content.clone()).collect();
        let candidate_embeddings = self.embeddings.generate_batch_embeddings(&contents).await?;

        let threshold = self.config.embedding.similarity_threshold;
        let mut scored: Vec<(Memory, f64)> = candidates
            .into_iter()
            .zip(candidate_embeddings)
            .filter_map(|(candidate, embedding)| {
                let similarity =
                    f64::from(cosine_similarity(&query_embedding, &embedding.embedding));
                (similarity >= threshold).then_some((candidate, similarity))
            })
            .collect();

        // Pre-LLM cost cap: only the strongest candidates may reach the LLM
        // band, so a large pool never explodes LLM calls.
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(self.config.cost_control.max_llm_calls_per_batch);

        let thresholds = self.config.connection_detection.thresholds;
        let mut connections: Vec<Connection> = Vec::new();
        for (candidate, similarity) in scored {
            let classification = match smart_triage(memory, &candidate, similarity, &thresholds) {
                TriageOutcome::Classified(classification) => classification,
                TriageOutcome::NeedsLlm => {
                    classify_with_llm(
                        self.llm_factory.as_deref(),
                        self.cost_tracker.as_ref(),
                        &self.config.connection_detection,
                        &self.config.cost_control,
                        agent_id,
                        memory,
                        &candidate,
                        similarity,
                    )
                    .await
                }
            };

            if classification.confidence <= 0.0 && similarity < thresholds.llm_required {
                continue;
            }

            let connection =
                build_connection(&memory.id, &candidate.id, similarity, &classification);
            {
                let mut graph = self.graph.write();
                graph.add_node(candidate);
                graph.add_edge(connection.clone());
            }
            connections.push(connection);
        }

        let two_hop = self.two_hop_augment(memory);
        connections.extend(two_hop);

        if options.auto_persist && !connections.is_empty() {
            ops.create_connections(user_id, &connections).await?;
        }

        if options.enrich_from_storage {
            if let Err(err) = self
                .load_connections_into_graph(user_id, &[memory.id.clone()])
                .await
            {
                warn!(error = %err, "failed to enrich graph from storage");
            }
        }

        self.emit_connected_events(user_id, agent_id, &connections)
            .await;

        if options.return_existing {
            match ops.find_connected_memories(user_id, &memory.id, 1).await {
                Ok(existing) => {
                    let known: HashSet<String> =
                        connections.iter().map(|c| c.id.clone()).collect();
                    connections.extend(
                        existing
                            .connections
                            .into_iter()
                            .filter(|c| !known.contains(&c.id)),
                    );
                }
                Err(err) => warn!(error = %err, "failed to fetch existing connections"),
            }
        }

        debug!(count = connections.len(), "discovery produced connections");
        Ok(connections)
    }

    /// Candidate fetch with the fallback chain: recall → hybrid search →
    /// vector search → empty, logging every downgrade.
    async fn fetch_candidates(
        &self,
        ops: &dyn MemoryStorage,
        user_id: &str,
        agent_id: &str,
    ) -> Vec<Memory> {
        let limit = self.config.connection_detection.max_candidates;
        match ops
            .recall(
                user_id,
                agent_id,
                "",
                &RecallOptions {
                    limit: Some(limit),
                    ..RecallOptions::default()
                },
            )
            .await
        {
            Ok(memories) => return memories,
            Err(err) => {
                warn!(error = %err, "candidate recall failed, trying hybrid search");
            }
        }

        // A generic recency query stands in for "what happened lately".
        let recency_embedding = match self.embeddings.generate_embedding("recent context").await {
            Ok(result) => result.embedding,
            Err(err) => {
                warn!(error = %err, "recency embedding failed, no candidates");
                return Vec::new();
            }
        };

        if ops.supports_hybrid_search() {
            match ops
                .hybrid_search(
                    user_id,
                    agent_id,
                    "recent context",
                    &recency_embedding,
                    &HybridSearchOptions {
                        limit,
                        ..HybridSearchOptions::default()
                    },
                )
                .await
            {
                Ok(results) => return results.into_iter().map(|r| r.memory).collect(),
                Err(err) => {
                    warn!(error = %err, "hybrid search fallback failed, trying vector search");
                }
            }
        } else {
            warn!("backend has no hybrid search, trying vector search");
        }

        if ops.supports_vector_search() {
            match ops
                .search_by_vector(
                    user_id,
                    agent_id,
                    &recency_embedding,
                    &VectorSearchOptions {
                        limit,
                        ..VectorSearchOptions::default()
                    },
                )
                .await
            {
                Ok(results) => return results.into_iter().map(|r| r.memory).collect(),
                Err(err) => warn!(error = %err, "vector search fallback failed"),
            }
        } else {
            warn!("backend has no vector search, discovery proceeds without candidates");
        }
        Vec::new()
    }

    /// Two-hop augmentation: neighbors-of-neighbors become `related` edges
    /// when the product of hop strengths clears the scaled threshold.
    fn two_hop_augment(&self, memory: &Memory) -> Vec<Connection> {
        let indirect_threshold =
            self.config.embedding.similarity_threshold * defaults::TWO_HOP_FACTOR;
        let mut graph = self.graph.write();

        let direct: Vec<(String, f64)> = graph
            .get_neighbors(&memory.id, None)
            .into_iter()
            .map(|edge| {
                let other = if edge.source_memory_id == memory.id {
                    edge.target_memory_id
                } else {
                    edge.source_memory_id
                };
                (other, edge.strength)
            })
            .collect();

        let mut seen: HashSet<String> = direct.iter().map(|(id, _)| id.clone()).collect();
        seen.insert(memory.id.clone());

        let mut augmented = Vec::new();
        for (mid_id, first_hop) in direct {
            for edge in graph.get_neighbors(&mid_id, None) {
                let far = if edge.source_memory_id == mid_id {
                    edge.target_memory_id.clone()
                } else {
                    edge.source_memory_id.clone()
                };
                if !seen.insert(far.clone()) {
                    continue;
                }
                let indirect = first_hop * edge.strength;
                if indirect < indirect_threshold {
                    continue;
                }

                let mut connection = Connection::new(
                    memory.id.clone(),
                    far,
                    ConnectionType::Related,
                    indirect,
                    format!("connected through shared neighbor {mid_id}"),
                );
                connection.metadata = ConnectionMetadata {
                    algorithm: Some("two-hop-traversal".into()),
                    hops: Some(2),
                    via: vec![mid_id.clone()],
                    ..ConnectionMetadata::default()
                };
                graph.add_edge(connection.clone());
                augmented.push(connection);
            }
        }
        augmented
    }

    async fn load_connections_into_graph(
        &self,
        user_id: &str,
        memory_ids: &[String],
    ) -> Result<usize> {
        let Some(ops) = self.storage.memory() else {
            return Ok(0);
        };
        let connections = ops
            .get_connections_for_memories(user_id, memory_ids)
            .await?;

        let mut loaded = 0;
        for connection in connections {
            for endpoint in [&connection.source_memory_id, &connection.target_memory_id] {
                if !self.graph.read().contains(endpoint) {
                    if let Some(endpoint_memory) = ops.get_by_id(user_id, endpoint).await? {
                        self.graph.write().add_node(endpoint_memory);
                    }
                }
            }
            if self.graph.write().add_edge(connection) {
                loaded += 1;
            }
        }
        Ok(loaded)
    }

    /// One `connected` event per endpoint per new connection.
    async fn emit_connected_events(
        &self,
        user_id: &str,
        agent_id: &str,
        connections: &[Connection],
    ) {
        let Some(sink) = self.storage.evolution() else {
            return;
        };
        let mut batch = Vec::with_capacity(connections.len() * 2);
        for connection in connections {
            for endpoint in [&connection.source_memory_id, &connection.target_memory_id] {
                let mut metadata = Map::new();
                metadata.insert("connectionId".into(), Value::from(connection.id.clone()));
                metadata.insert(
                    "connectionType".into(),
                    Value::from(connection.connection_type.as_str()),
                );
                metadata.insert("strength".into(), Value::from(connection.strength));
                batch.push(events::lifecycle_event(
                    endpoint,
                    user_id,
                    agent_id,
                    MemoryEventType::Connected,
                    metadata,
                ));
            }
        }
        events::emit_batch(Some(sink), batch).await;
    }
}

fn build_connection(
    source_id: &str,
    target_id: &str,
    similarity: f64,
    classification: &Classification,
) -> Connection {
    let mut connection = Connection::new(
        source_id,
        target_id,
        classification.connection_type,
        similarity.max(classification.confidence),
        classification.reason.clone(),
    );
    connection.metadata = ConnectionMetadata {
        triage_method: Some(classification.triage_method),
        embedding_similarity: Some(similarity),
        llm_used: classification.llm_used,
        ..ConnectionMetadata::default()
    };
    connection
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TriageMethod;

    #[test]
    fn build_connection_takes_max_of_similarity_and_confidence() {
        let classification = Classification {
            connection_type: ConnectionType::Related,
            confidence: 0.9,
            reason: "test".into(),
            triage_method: TriageMethod::LlmClassified,
            llm_used: true,
        };
        let connection = build_connection("a", "b", 0.4, &classification);
        assert!((connection.strength - 0.9).abs() < 1e-9);
        assert_eq!(connection.metadata.embedding_similarity, Some(0.4));
        assert!(connection.metadata.llm_used);
    }
}

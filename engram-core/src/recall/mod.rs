//! # Recall service
//!
//! Cross-tier retrieval: per-tier search (hybrid when the backend can,
//! text-only fallbacks otherwise), weighted hybrid scoring, enrichment from
//! stored connections and the in-process graph, centrality and temporal
//! boosts, relationship discovery, a TTL'd result cache, and per-query
//! metrics.

mod cache;
mod metrics;
mod related;
mod scoring;

pub use cache::RecallCache;
pub use metrics::{MetricsRecorder, PopularQuery, RecallMetrics};
pub use related::{
    discover_relationships, jaccard_similarity, relate, RelatedMemory, RelationshipType,
};
pub use scoring::{
    apply_hybrid_scoring, optimize_query, query_terms, temporal_relevance, text_relevance,
};

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Timelike, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, instrument, warn};

use crate::config::IntelligenceLayerConfig;
use crate::connection::ConnectionEngine;
use crate::constants::metadata_keys;
use crate::embeddings::EmbeddingService;
use crate::error::{Error, Result};
use crate::events;
use crate::storage::{HybridSearchOptions, MemoryStorage, StorageProvider};
use crate::tiers::{EpisodicMemory, ProceduralMemory, SemanticMemory, WorkingMemory};
use crate::types::{
    Connection, ConnectionType, Memory, MemoryEventType, MemoryType, PatternKind, TimeRange,
};

/// A recall request.
#[derive(Debug, Clone, Default)]
pub struct RecallQuery {
    pub user_id: String,
    pub agent_id: String,
    pub query: String,
    /// Tiers to search; all four when absent.
    pub memory_types: Option<Vec<MemoryType>>,
    /// Result cap; configuration default when absent. Must be ≤ 1000.
    pub limit: Option<usize>,
    /// Relevance floor; 0 is allowed and disables filtering.
    pub min_relevance: Option<f64>,
    /// Attach relationships between top results (default on).
    pub include_related: Option<bool>,
    pub time_range: Option<TimeRange>,
    /// Free-text context for procedural matching.
    pub context: Option<String>,
    /// Graph enrichment switch (default on).
    pub use_connections: Option<bool>,
    pub connection_hops: Option<usize>,
    /// Restrict graph enrichment to these edge types.
    pub connection_types: Option<Vec<ConnectionType>>,
    pub boost_central_memories: bool,
}

/// One memory in a recall result, with its relevance and enrichment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedMemoryResult {
    pub memory: Memory,
    pub relevance: f64,
    /// Stored connections touching this memory.
    #[serde(default)]
    pub connections: Vec<Connection>,
    /// Relationships to other memories in the same result set.
    #[serde(default)]
    pub relationships: Vec<RelatedMemory>,
    /// Enrichment annotations (`fromHybridSearch`, `connectionSource`, …).
    #[serde(default)]
    pub enrichment: Map<String, Value>,
}

impl UnifiedMemoryResult {
    /// Project a memory into the unified result shape, applying the
    /// temporal boost from attached pattern insights.
    #[must_use]
    pub fn project(memory: Memory, relevance: f64, now: DateTime<Utc>) -> Self {
        let mut result = Self {
            memory,
            relevance,
            connections: Vec::new(),
            relationships: Vec::new(),
            enrichment: Map::new(),
        };
        result.apply_temporal_boost(now);
        result
    }

    /// Whether the backend already scored this result.
    #[must_use]
    pub fn from_hybrid_search(&self) -> bool {
        self.enrichment
            .get(metadata_keys::FROM_HYBRID_SEARCH)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    fn mark_from_hybrid_search(&mut self) {
        self.enrichment
            .insert(metadata_keys::FROM_HYBRID_SEARCH.into(), Value::from(true));
    }

    /// Daily pattern peaking at the current hour boosts by `1 + 0.3·conf`;
    /// otherwise a burst pattern boosts by `1 + 0.15·conf`. Capped at 1.
    fn apply_temporal_boost(&mut self, now: DateTime<Utc>) {
        let patterns = self.memory.temporal_patterns();
        if patterns.is_empty() {
            return;
        }

        let current_hour = now.hour();
        let daily_hit = patterns.iter().find(|p| {
            p.kind == PatternKind::Daily && p.metadata.peak_hours.contains(&current_hour)
        });
        if let Some(pattern) = daily_hit {
            self.relevance = (self.relevance * (1.0 + 0.3 * pattern.confidence)).min(1.0);
            return;
        }
        if let Some(pattern) = patterns.iter().find(|p| p.kind == PatternKind::Burst) {
            self.relevance = (self.relevance * (1.0 + 0.15 * pattern.confidence)).min(1.0);
        }
    }
}

/// A completed recall.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecallResult {
    pub memories: Vec<UnifiedMemoryResult>,
    /// Active retrieval modes, e.g. `vector+text+temporal`.
    pub search_strategy: String,
    /// Earliest `originalConversationDate` across the results, formatted.
    pub conversation_context: Option<String>,
    pub execution_time_ms: u64,
}

/// Cross-tier recall service.
pub struct RecallService {
    storage: Arc<dyn StorageProvider>,
    embeddings: Arc<EmbeddingService>,
    engine: Option<Arc<ConnectionEngine>>,
    working: Arc<WorkingMemory>,
    episodic: Arc<EpisodicMemory>,
    semantic: Arc<SemanticMemory>,
    procedural: Arc<ProceduralMemory>,
    config: IntelligenceLayerConfig,
    cache: RecallCache,
    metrics: MetricsRecorder,
}

impl RecallService {
    /// Assemble the service over its collaborators.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        storage: Arc<dyn StorageProvider>,
        embeddings: Arc<EmbeddingService>,
        engine: Option<Arc<ConnectionEngine>>,
        working: Arc<WorkingMemory>,
        episodic: Arc<EpisodicMemory>,
        semantic: Arc<SemanticMemory>,
        procedural: Arc<ProceduralMemory>,
        mut config: IntelligenceLayerConfig,
    ) -> Self {
        config.recall.apply_env();
        let cache = RecallCache::new(
            config.recall.cache_ttl_ms,
            config.recall.cache_high_water,
            config.recall.cache_low_water,
        );
        Self {
            storage,
            embeddings,
            engine,
            working,
            episodic,
            semantic,
            procedural,
            config,
            cache,
            metrics: MetricsRecorder::new(),
        }
    }

    /// Current metrics snapshot.
    #[must_use]
    pub fn metrics(&self) -> RecallMetrics {
        self.metrics.snapshot()
    }

    /// Current cache size (for tests and diagnostics).
    #[must_use]
    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    /// Cancel the pending cache cleanup and empty the cache. Idempotent.
    pub fn destroy(&self) {
        self.cache.destroy();
    }

    fn validate(query: &RecallQuery) -> Result<()> {
        if query.user_id.trim().is_empty() {
            return Err(Error::Validation("userId must not be empty".into()));
        }
        if query.agent_id.trim().is_empty() {
            return Err(Error::Validation("agentId must not be empty".into()));
        }
        if query.query.trim().is_empty() {
            return Err(Error::Validation("query must not be empty".into()));
        }
        if let Some(min_relevance) = query.min_relevance {
            if !(0.0..=1.0).contains(&min_relevance) {
                return Err(Error::Validation(format!(
                    "minRelevance must be in [0,1], got {min_relevance}"
                )));
            }
        }
        if let Some(limit) = query.limit {
            if limit > crate::constants::defaults::MAX_RECALL_LIMIT {
                return Err(Error::Validation(format!(
                    "limit must be <= {}, got {limit}",
                    crate::constants::defaults::MAX_RECALL_LIMIT
                )));
            }
        }
        Ok(())
    }

    fn cache_key(&self, query: &RecallQuery, optimized: &str) -> String {
        let mut types: Vec<&'static str> = query
            .memory_types
            .clone()
            .unwrap_or_else(|| MemoryType::ALL.to_vec())
            .iter()
            .map(|t| t.as_str())
            .collect();
        types.sort_unstable();
        let time_range = query
            .time_range
            .map(|r| vec![r.start.timestamp_millis(), r.end.timestamp_millis()]);
        // Fixed key order keeps the serialization canonical.
        serde_json::json!({
            "userId": query.user_id,
            "agentId": query.agent_id,
            "query": optimized,
            "memoryTypes": types,
            "timeRange": time_range,
            "limit": query.limit,
            "minRelevance": query.min_relevance,
        })
        .to_string()
    }

    /// Run a recall.
    #[instrument(skip(self, query), fields(user_id = %query.user_id, agent_id = %query.agent_id))]
    pub async fn recall(&self, query: &RecallQuery) -> Result<RecallResult> {
        let started = Instant::now();
        Self::validate(query)?;

        let optimized = optimize_query(&query.query);
        let cache_key = self.cache_key(query, &optimized);
        if self.config.recall.cache_results {
            if let Some(mut hit) = self.cache.get(&cache_key) {
                hit.execution_time_ms = started.elapsed().as_millis() as u64;
                let types: Vec<MemoryType> =
                    hit.memories.iter().map(|m| m.memory.memory_type).collect();
                let avg = average_relevance(&hit.memories);
                self.metrics
                    .record(&optimized, elapsed_ms(started), true, &types, avg);
                debug!("recall served from cache");
                return Ok(hit);
            }
        }

        let now = Utc::now();
        let limit = query.limit.unwrap_or(self.config.recall.default_limit);
        let memory_types = query
            .memory_types
            .clone()
            .unwrap_or_else(|| MemoryType::ALL.to_vec());

        // Per-tier search runs concurrently; errors are collected without
        // aborting the surviving tiers.
        let mut results: Vec<UnifiedMemoryResult> = Vec::new();
        let mut tier_errors: Vec<(MemoryType, Error)> = Vec::new();
        let mut strategy = StrategyModes::default();
        let searches = memory_types
            .iter()
            .map(|tier| self.search_tier(*tier, query, &optimized, limit, now));
        for (tier, outcome) in memory_types.iter().zip(join_all(searches).await) {
            match outcome {
                Ok((tier_results, modes)) => {
                    results.extend(tier_results);
                    strategy.merge(modes);
                }
                Err(err) => {
                    warn!(tier = %tier, error = %err, "tier search failed");
                    tier_errors.push((*tier, err));
                }
            }
        }

        if results.is_empty() && !tier_errors.is_empty() && tier_errors.len() == memory_types.len()
        {
            let detail = tier_errors
                .iter()
                .map(|(tier, err)| format!("{tier}: {err}"))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(Error::Storage(format!("all memory tiers failed: {detail}")));
        }

        apply_hybrid_scoring(
            &mut results,
            &optimized,
            &self.config.recall.hybrid_search_weights,
            now,
            query.time_range.as_ref(),
        );

        self.enrich_with_stored_connections(&query.user_id, &mut results)
            .await;

        if self.config.connection_detection.enabled {
            if query.use_connections.unwrap_or(true) {
                self.enrich_from_graph(query, &mut results, now).await;
            }
            if query.boost_central_memories {
                self.boost_central_memories(&mut results);
            }
        }

        let conversation_context = earliest_conversation_date(&results);

        if query.include_related.unwrap_or(true) && self.config.recall.enable_related_memories {
            attach_relationships(&mut results, self.config.recall.max_related_depth);
        }

        let min_relevance = query
            .min_relevance
            .unwrap_or(self.config.recall.min_relevance_threshold);
        results.retain(|r| r.relevance >= min_relevance);
        results.sort_by(|a, b| {
            b.relevance
                .partial_cmp(&a.relevance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(limit);

        self.emit_accessed_events(query, &results).await;

        let result = RecallResult {
            search_strategy: strategy.render(),
            conversation_context,
            execution_time_ms: elapsed_ms(started) as u64,
            memories: results,
        };

        if self.config.recall.cache_results {
            self.cache.put(cache_key, result.clone());
        }
        let types: Vec<MemoryType> = result
            .memories
            .iter()
            .map(|m| m.memory.memory_type)
            .collect();
        self.metrics.record(
            &optimized,
            elapsed_ms(started),
            false,
            &types,
            average_relevance(&result.memories),
        );
        Ok(result)
    }

    /// Search one tier. Prefers backend hybrid search; otherwise falls back
    /// to tier-specific text scoring. Returns the results with the modes
    /// that fired.
    async fn search_tier(
        &self,
        tier: MemoryType,
        query: &RecallQuery,
        optimized: &str,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<(Vec<UnifiedMemoryResult>, StrategyModes)> {
        let ops = self.memory_ops()?;
        let hybrid_available = ops.supports_hybrid_search()
            && self.config.embedding.enabled
            && self.config.recall.enable_vector_search;

        let mut strategy = StrategyModes::default();
        if hybrid_available {
            let embedding = self.embeddings.generate_embedding(optimized).await?;
            let scored = ops
                .hybrid_search(
                    &query.user_id,
                    &query.agent_id,
                    optimized,
                    &embedding.embedding,
                    &HybridSearchOptions {
                        limit,
                        filter: Some(tier),
                        ..HybridSearchOptions::default()
                    },
                )
                .await?;
            strategy.vector = true;
            strategy.text = true;
            let results = scored
                .into_iter()
                .map(|s| {
                    let mut result = UnifiedMemoryResult::project(s.memory, s.score, now);
                    result.mark_from_hybrid_search();
                    result
                })
                .collect();
            return Ok((results, strategy));
        }

        strategy.text = true;
        let results = match tier {
            MemoryType::Working => {
                let memories = self
                    .working
                    .recall(&query.user_id, &query.agent_id, optimized, limit)
                    .await?;
                memories
                    .into_iter()
                    .filter_map(|memory| {
                        let relevance =
                            text_relevance(&memory.content, optimized, &memory.keywords);
                        (relevance >= 0.1)
                            .then(|| UnifiedMemoryResult::project(memory, relevance, now))
                    })
                    .collect()
            }
            MemoryType::Episodic => {
                strategy.temporal = true;
                let memories = self
                    .episodic
                    .recall(
                        &query.user_id,
                        &query.agent_id,
                        optimized,
                        limit,
                        query.time_range,
                    )
                    .await?;
                memories
                    .into_iter()
                    .map(|memory| {
                        let tags = episodic_tags(&memory);
                        let text = text_relevance(&memory.content, optimized, &tags);
                        let temporal = temporal_relevance(
                            memory.created_at,
                            now,
                            query.time_range.as_ref(),
                        );
                        let relevance = 0.7 * text + 0.3 * temporal;
                        UnifiedMemoryResult::project(memory, relevance, now)
                    })
                    .collect()
            }
            MemoryType::Semantic => {
                let memories = self
                    .semantic
                    .search(&query.user_id, &query.agent_id, optimized)
                    .await?;
                memories
                    .into_iter()
                    .map(|memory| {
                        let confidence = memory
                            .metadata
                            .get(metadata_keys::CONFIDENCE)
                            .and_then(Value::as_f64)
                            .unwrap_or(0.0);
                        let text = text_relevance(&memory.content, optimized, &memory.keywords);
                        let relevance = (text + 0.2 * confidence).min(1.0);
                        UnifiedMemoryResult::project(memory, relevance, now)
                    })
                    .collect()
            }
            MemoryType::Procedural => {
                strategy.procedural = true;
                let matches = self
                    .procedural
                    .get_recommended_actions(
                        &query.user_id,
                        &query.agent_id,
                        optimized,
                        query.context.as_deref(),
                    )
                    .await?;
                let mut matched = Vec::new();
                for pattern_match in matches.into_iter().take(limit) {
                    let Some(memory) = self
                        .memory_ops()?
                        .get_by_id(&query.user_id, &pattern_match.pattern.id)
                        .await?
                    else {
                        continue;
                    };
                    let relevance =
                        (pattern_match.confidence + pattern_match.context_match) / 2.0;
                    matched.push(UnifiedMemoryResult::project(memory, relevance, now));
                }
                matched
            }
        };
        Ok((results, strategy))
    }

    fn memory_ops(&self) -> Result<&dyn MemoryStorage> {
        self.storage
            .memory()
            .ok_or_else(|| Error::Storage("storage backend has no memory operations".into()))
    }

    /// Attach stored connections and boost by `min(0.3, 0.1 · count)`.
    async fn enrich_with_stored_connections(
        &self,
        user_id: &str,
        results: &mut [UnifiedMemoryResult],
    ) {
        if results.is_empty() {
            return;
        }
        let Ok(ops) = self.memory_ops() else { return };
        let ids: Vec<String> = results.iter().map(|r| r.memory.id.clone()).collect();
        let connections = match ops.get_connections_for_memories(user_id, &ids).await {
            Ok(connections) => connections,
            Err(err) => {
                warn!(error = %err, "connection enrichment failed");
                return;
            }
        };

        for result in results.iter_mut() {
            let mine: Vec<Connection> = connections
                .iter()
                .filter(|c| c.involves(&result.memory.id))
                .cloned()
                .collect();
            if mine.is_empty() {
                continue;
            }
            let boost = (0.1 * mine.len() as f64).min(0.3);
            result.relevance = (result.relevance + boost).min(1.0);
            result.connections = mine;
        }
    }

    /// Pull graph-connected memories into the result set for the top seeds.
    ///
    /// Path strength chains across hops as the product of edge strengths
    /// (the discovery engine's two-hop formula, generalized), so a memory
    /// two hops out attaches with a deeper discount than a direct neighbor.
    async fn enrich_from_graph(
        &self,
        query: &RecallQuery,
        results: &mut Vec<UnifiedMemoryResult>,
        now: DateTime<Utc>,
    ) {
        let Some(engine) = &self.engine else { return };
        let hops = query
            .connection_hops
            .unwrap_or(self.config.recall.default_connection_hops)
            .max(1);

        let mut seeds: Vec<(String, f64)> = results
            .iter()
            .map(|r| (r.memory.id.clone(), r.relevance))
            .collect();
        seeds.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        seeds.truncate(5);

        let mut known: HashSet<String> = results.iter().map(|r| r.memory.id.clone()).collect();
        for (seed_id, seed_relevance) in seeds {
            let connected = match engine
                .find_connected_memories(&query.user_id, &seed_id, hops)
                .await
            {
                Ok(connected) => connected,
                Err(err) => {
                    warn!(error = %err, seed = %seed_id, "graph enrichment failed");
                    continue;
                }
            };

            let reach = reachable_from(&seed_id, &connected.connections, hops);
            for memory in connected.memories {
                if known.contains(&memory.id) {
                    continue;
                }
                let Some((path_strength, hop_count, bridge)) = reach.get(&memory.id) else {
                    continue;
                };
                if let Some(filter) = &query.connection_types {
                    if !filter.contains(&bridge.connection_type) {
                        continue;
                    }
                }

                known.insert(memory.id.clone());
                let relevance = seed_relevance * 0.7 * path_strength;
                let mut result = UnifiedMemoryResult::project(memory, relevance, now);
                result.enrichment.insert(
                    metadata_keys::CONNECTION_SOURCE.into(),
                    Value::from(seed_id.clone()),
                );
                result.enrichment.insert(
                    metadata_keys::CONNECTION_TYPE.into(),
                    Value::from(bridge.connection_type.as_str()),
                );
                result.enrichment.insert(
                    metadata_keys::CONNECTION_STRENGTH.into(),
                    Value::from(*path_strength),
                );
                result.enrichment.insert(
                    metadata_keys::HOPS_FROM_QUERY.into(),
                    Value::from(*hop_count),
                );
                results.push(result);
            }
        }
    }

    /// Multiply relevance by `1 + 0.2 · centrality` for central memories.
    fn boost_central_memories(&self, results: &mut [UnifiedMemoryResult]) {
        let Some(engine) = &self.engine else { return };
        let central: HashMap<String, f64> = engine
            .get_central_memories(10)
            .into_iter()
            .map(|c| (c.memory_id, c.centrality))
            .collect();
        for result in results.iter_mut() {
            if let Some(centrality) = central.get(&result.memory.id) {
                if *centrality > 0.0 {
                    result.relevance = (result.relevance * (1.0 + 0.2 * centrality)).min(1.0);
                }
            }
        }
    }

    /// One `accessed` event per returned memory, fire-and-forget.
    async fn emit_accessed_events(&self, query: &RecallQuery, results: &[UnifiedMemoryResult]) {
        let Some(sink) = self.storage.evolution() else {
            return;
        };
        let batch: Vec<_> = results
            .iter()
            .map(|r| {
                let mut metadata = Map::new();
                metadata.insert("query".into(), Value::from(query.query.clone()));
                events::lifecycle_event(
                    &r.memory.id,
                    &query.user_id,
                    &query.agent_id,
                    MemoryEventType::Accessed,
                    metadata,
                )
            })
            .collect();
        events::emit_batch(Some(sink), batch).await;
    }
}

/// Which retrieval modes fired, rendered `vector+text+temporal+procedural`.
#[derive(Default)]
struct StrategyModes {
    vector: bool,
    text: bool,
    temporal: bool,
    procedural: bool,
}

impl StrategyModes {
    fn merge(&mut self, other: StrategyModes) {
        self.vector |= other.vector;
        self.text |= other.text;
        self.temporal |= other.temporal;
        self.procedural |= other.procedural;
    }

    fn render(&self) -> String {
        let mut parts = Vec::new();
        if self.vector {
            parts.push("vector");
        }
        if self.text {
            parts.push("text");
        }
        if self.temporal {
            parts.push("temporal");
        }
        if self.procedural {
            parts.push("procedural");
        }
        if parts.is_empty() {
            parts.push("text");
        }
        parts.join("+")
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

fn average_relevance(results: &[UnifiedMemoryResult]) -> f64 {
    if results.is_empty() {
        return 0.0;
    }
    results.iter().map(|r| r.relevance).sum::<f64>() / results.len() as f64
}

fn episodic_tags(memory: &Memory) -> Vec<String> {
    memory
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
        .unwrap_or_default()
}

/// Earliest `originalConversationDate` across the results, formatted.
fn earliest_conversation_date(results: &[UnifiedMemoryResult]) -> Option<String> {
    results
        .iter()
        .filter_map(|r| {
            let value = r.memory.metadata.get(metadata_keys::ORIGINAL_CONVERSATION_DATE)?;
            parse_conversation_date(value)
        })
        .min()
        .map(|earliest| earliest.format("%Y-%m-%d %H:%M:%S UTC").to_string())
}

fn parse_conversation_date(value: &Value) -> Option<DateTime<Utc>> {
    if let Some(ms) = value.as_i64() {
        return DateTime::from_timestamp_millis(ms);
    }
    value
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// Best chained path strength from `seed_id` to every node reachable within
/// `hops` over the undirected view of the connection set. Strength is the
/// product of edge strengths along the strongest path; the returned edge is
/// the final hop into the node.
fn reachable_from<'a>(
    seed_id: &str,
    connections: &'a [Connection],
    hops: usize,
) -> HashMap<String, (f64, usize, &'a Connection)> {
    let mut reach: HashMap<String, (f64, usize, &'a Connection)> = HashMap::new();
    let mut frontier: Vec<(String, f64)> = vec![(seed_id.to_string(), 1.0)];

    for hop in 1..=hops {
        let mut next: Vec<(String, f64)> = Vec::new();
        for (current, strength_so_far) in &frontier {
            for connection in connections {
                if !connection.involves(current) {
                    continue;
                }
                let other = if connection.source_memory_id == *current {
                    &connection.target_memory_id
                } else {
                    &connection.source_memory_id
                };
                if other.as_str() == seed_id {
                    continue;
                }
                let product = strength_so_far * connection.strength;
                let improves = reach
                    .get(other)
                    .is_none_or(|(best, _, _)| product > *best);
                if improves {
                    reach.insert(other.clone(), (product, hop, connection));
                    next.push((other.clone(), product));
                }
            }
        }
        if next.is_empty() {
            break;
        }
        frontier = next;
    }
    reach
}

/// Relationship discovery for the top ten results.
fn attach_relationships(results: &mut [UnifiedMemoryResult], max_related: usize) {
    let snapshot: Vec<Memory> = results.iter().map(|r| r.memory.clone()).collect();
    let refs: Vec<&Memory> = snapshot.iter().collect();
    for result in results.iter_mut().take(10) {
        result.relationships = discover_relationships(&result.memory, &refs, max_related);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strategy_modes_render_in_fixed_order() {
        let strategy = StrategyModes {
            vector: true,
            text: true,
            temporal: true,
            procedural: false,
        };
        assert_eq!(strategy.render(), "vector+text+temporal");
        assert_eq!(StrategyModes::default().render(), "text");
    }

    #[test]
    fn reachable_from_chains_strength_and_counts_hops() {
        use crate::types::ConnectionType;

        let edges = vec![
            Connection::new("a", "b", ConnectionType::Related, 0.9, "direct"),
            Connection::new("b", "c", ConnectionType::Causes, 0.8, "second hop"),
            Connection::new("c", "d", ConnectionType::Related, 0.7, "third hop"),
        ];

        let reach = reachable_from("a", &edges, 2);
        let (strength_b, hops_b, _) = reach["b"];
        assert!((strength_b - 0.9).abs() < 1e-9);
        assert_eq!(hops_b, 1);

        let (strength_c, hops_c, bridge_c) = reach["c"];
        assert!((strength_c - 0.72).abs() < 1e-9);
        assert_eq!(hops_c, 2);
        assert_eq!(bridge_c.connection_type, ConnectionType::Causes);

        // Beyond the hop limit is unreachable.
        assert!(!reach.contains_key("d"));

        // Direction does not matter: the undirected view reaches backwards.
        let reverse = reachable_from("c", &edges, 1);
        assert!(reverse.contains_key("b"));
        assert!(reverse.contains_key("d"));
    }

    #[test]
    fn conversation_date_parses_epoch_and_rfc3339() {
        let from_ms = parse_conversation_date(&json!(1_700_000_000_000i64)).unwrap();
        assert_eq!(from_ms.timestamp_millis(), 1_700_000_000_000);

        let from_str = parse_conversation_date(&json!("2026-01-15T10:30:00Z")).unwrap();
        assert_eq!(from_str.hour(), 10);

        assert!(parse_conversation_date(&json!({"bad": true})).is_none());
    }
}

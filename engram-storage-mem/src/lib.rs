#![allow(clippy::cast_precision_loss)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]

//! # In-memory storage provider
//!
//! A complete [`StorageProvider`] implementation backed by process memory:
//! per-user memory maps, connection stores with endpoint indexes, a
//! prefix-listable key/value namespace, text/vector/hybrid search, decay,
//! and a recording lifecycle-event sink. The default backend for tests and
//! embedding-free local use.
//!
//! Embeddings for stored content are produced with the deterministic mock
//! provider, so vector search here lines up with an engine configured for
//! mock embeddings.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use parking_lot::RwLock;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use engram_core::constants::defaults;
use engram_core::error::{Error, Result};
use engram_core::storage::{
    BatchMemoryUpdate, ConnectedMemories, DecayOptions, DecayResult, EvolutionSink,
    HybridSearchOptions, MemoryStorage, RecallOptions, ScoredMemory, StorageProvider,
    VectorSearchOptions,
};
use engram_core::types::{
    Connection, Memory, MemoryData, MemoryEvent, MemoryStats, MemoryType, MemoryUpdate,
};
use engram_core::{cosine_similarity, MockEmbeddingProvider};

/// Per-user durable state.
#[derive(Default)]
struct UserStore {
    memories: HashMap<String, Memory>,
    embeddings: HashMap<String, Vec<f32>>,
    connections: HashMap<String, Connection>,
    by_source: HashMap<String, Vec<String>>,
    by_target: HashMap<String, Vec<String>>,
}

/// Recording in-memory event sink.
#[derive(Default)]
pub struct InMemoryEvolutionSink {
    events: RwLock<HashMap<String, Vec<MemoryEvent>>>,
}

impl InMemoryEvolutionSink {
    /// Events recorded for one user, in emission order.
    #[must_use]
    pub fn events_for_user(&self, user_id: &str) -> Vec<MemoryEvent> {
        self.events
            .read()
            .get(user_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl EvolutionSink for InMemoryEvolutionSink {
    async fn track_event(&self, event: MemoryEvent) -> Result<()> {
        self.events
            .write()
            .entry(event.user_id.clone())
            .or_default()
            .push(event);
        Ok(())
    }

    async fn track_event_batch(&self, events: Vec<MemoryEvent>) -> Result<()> {
        let mut store = self.events.write();
        for event in events {
            store.entry(event.user_id.clone()).or_default().push(event);
        }
        Ok(())
    }
}

/// In-memory storage provider.
pub struct InMemoryStorage {
    kv: RwLock<BTreeMap<String, Value>>,
    users: RwLock<HashMap<String, UserStore>>,
    sink: InMemoryEvolutionSink,
    embedder: MockEmbeddingProvider,
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStorage {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            kv: RwLock::new(BTreeMap::new()),
            users: RwLock::new(HashMap::new()),
            sink: InMemoryEvolutionSink::default(),
            embedder: MockEmbeddingProvider::new(
                "mock-embed",
                defaults::MOCK_EMBEDDING_DIMENSION,
            ),
        }
    }

    /// The recording event sink, for assertions in tests.
    #[must_use]
    pub fn event_sink(&self) -> &InMemoryEvolutionSink {
        &self.sink
    }

    fn require_scope(user_id: &str, agent_id: &str) -> Result<()> {
        if user_id.trim().is_empty() {
            return Err(Error::Validation("userId must not be empty".into()));
        }
        if agent_id.trim().is_empty() {
            return Err(Error::Validation("agentId must not be empty".into()));
        }
        Ok(())
    }

    /// Substring + term-overlap lexical score in [0, 1].
    fn text_score(content: &str, query: &str) -> f64 {
        let content_lower = content.to_lowercase();
        let query_lower = query.trim().to_lowercase();
        if query_lower.is_empty() {
            return 0.0;
        }
        if content_lower.contains(&query_lower) {
            return 1.0;
        }

        let query_terms: Vec<&str> = query_lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .collect();
        if query_terms.is_empty() {
            return 0.0;
        }
        let hits = query_terms
            .iter()
            .filter(|term| content_lower.contains(*term))
            .count();
        hits as f64 / query_terms.len() as f64
    }

    fn touch_access(memory: &mut Memory) {
        memory.access_count += 1;
        memory.last_accessed_at = Utc::now();
    }

    fn apply_update(memory: &mut Memory, update: MemoryUpdate) {
        if let Some(content) = update.content {
            memory.content = content;
        }
        if let Some(importance) = update.importance {
            memory.importance = importance;
        }
        if let Some(resonance) = update.resonance {
            memory.resonance = resonance;
        }
        if let Some(access_count) = update.access_count {
            memory.access_count = access_count;
        }
        if let Some(last_accessed_at) = update.last_accessed_at {
            memory.last_accessed_at = last_accessed_at;
        }
        if let Some(keywords) = update.keywords {
            memory.keywords = keywords;
        }
        if let Some(embedding_id) = update.embedding_id {
            memory.embedding_id = Some(embedding_id);
        }
        if let Some(metadata) = update.metadata {
            for (key, value) in metadata {
                memory.metadata.insert(key, value);
            }
        }

        // `updated_at` is strictly increasing even under rapid updates.
        let now = Utc::now();
        memory.updated_at = if now > memory.updated_at {
            now
        } else {
            memory.updated_at + Duration::milliseconds(1)
        };
    }

    fn remove_memory_references(store: &mut UserStore, memory_id: &str) {
        store.embeddings.remove(memory_id);
        let touching: Vec<String> = store
            .connections
            .values()
            .filter(|c| c.involves(memory_id))
            .map(|c| c.id.clone())
            .collect();
        for connection_id in touching {
            if let Some(connection) = store.connections.remove(&connection_id) {
                if let Some(ids) = store.by_source.get_mut(&connection.source_memory_id) {
                    ids.retain(|id| id != &connection_id);
                }
                if let Some(ids) = store.by_target.get_mut(&connection.target_memory_id) {
                    ids.retain(|id| id != &connection_id);
                }
            }
        }
    }
}

#[async_trait]
impl MemoryStorage for InMemoryStorage {
    async fn store(&self, user_id: &str, agent_id: &str, data: MemoryData) -> Result<String> {
        Self::require_scope(user_id, agent_id)?;

        let now = Utc::now();
        let id = Uuid::new_v4().to_string();
        let token_count = data
            .token_count
            .or_else(|| Some(Memory::estimate_tokens(&data.content)));
        let memory = Memory {
            id: id.clone(),
            user_id: user_id.to_string(),
            agent_id: agent_id.to_string(),
            memory_type: data.memory_type,
            content: data.content,
            importance: data.importance.clamp(0.0, 1.0),
            resonance: data.resonance.clamp(0.0, 1.0),
            access_count: 0,
            created_at: now,
            updated_at: now,
            last_accessed_at: now,
            session_id: data.session_id,
            token_count,
            keywords: data.keywords,
            embedding_id: data.embedding_id,
            metadata: data.metadata,
        };

        let embedding = self.embedder.generate(&memory.content);
        let mut users = self.users.write();
        let store = users.entry(user_id.to_string()).or_default();
        store.embeddings.insert(id.clone(), embedding);
        store.memories.insert(id.clone(), memory);
        debug!(memory_id = %id, user_id = %user_id, "stored memory");
        Ok(id)
    }

    async fn recall(
        &self,
        user_id: &str,
        agent_id: &str,
        query: &str,
        options: &RecallOptions,
    ) -> Result<Vec<Memory>> {
        Self::require_scope(user_id, agent_id)?;
        let now = Utc::now();
        let limit = options.limit.unwrap_or(100);

        let mut users = self.users.write();
        let Some(store) = users.get_mut(user_id) else {
            return Ok(Vec::new());
        };

        let mut matched: Vec<(String, f64)> = store
            .memories
            .values()
            .filter(|m| m.agent_id == agent_id)
            .filter(|m| !m.is_expired(now))
            .filter(|m| options.memory_type.is_none_or(|t| m.memory_type == t))
            .filter(|m| {
                options
                    .time_range
                    .is_none_or(|range| range.contains(m.created_at))
            })
            .filter_map(|m| {
                if query.trim().is_empty() {
                    Some((m.id.clone(), 0.0))
                } else {
                    let score = Self::text_score(&m.content, query);
                    (score > 0.0).then(|| (m.id.clone(), score))
                }
            })
            .collect();

        if query.trim().is_empty() {
            // Most recent first.
            matched.sort_by(|a, b| {
                let time_a = store.memories[&a.0].created_at;
                let time_b = store.memories[&b.0].created_at;
                time_b.cmp(&time_a)
            });
        } else {
            matched.sort_by(|a, b| {
                b.1.partial_cmp(&a.1)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| {
                        let time_a = store.memories[&a.0].created_at;
                        let time_b = store.memories[&b.0].created_at;
                        time_b.cmp(&time_a)
                    })
            });
        }
        matched.truncate(limit);

        let mut results = Vec::with_capacity(matched.len());
        for (id, _) in matched {
            if let Some(memory) = store.memories.get_mut(&id) {
                Self::touch_access(memory);
                results.push(memory.clone());
            }
        }
        Ok(results)
    }

    async fn get_by_id(&self, user_id: &str, memory_id: &str) -> Result<Option<Memory>> {
        if user_id.trim().is_empty() {
            return Err(Error::Validation("userId must not be empty".into()));
        }
        let now = Utc::now();
        let users = self.users.read();
        Ok(users
            .get(user_id)
            .and_then(|store| store.memories.get(memory_id))
            .filter(|m| !m.is_expired(now))
            .cloned())
    }

    async fn update(
        &self,
        user_id: &str,
        agent_id: &str,
        memory_id: &str,
        update: MemoryUpdate,
    ) -> Result<()> {
        Self::require_scope(user_id, agent_id)?;
        let mut users = self.users.write();
        let memory = users
            .get_mut(user_id)
            .and_then(|store| store.memories.get_mut(memory_id))
            .filter(|m| m.agent_id == agent_id)
            .ok_or_else(|| Error::Storage(format!("memory not found: {memory_id}")))?;
        let content_changed = update.content.is_some();
        Self::apply_update(memory, update);
        if content_changed {
            let embedding = self.embedder.generate(&memory.content);
            let id = memory.id.clone();
            if let Some(store) = users.get_mut(user_id) {
                store.embeddings.insert(id, embedding);
            }
        }
        Ok(())
    }

    async fn delete(&self, user_id: &str, agent_id: &str, memory_id: &str) -> Result<()> {
        Self::require_scope(user_id, agent_id)?;
        let mut users = self.users.write();
        let Some(store) = users.get_mut(user_id) else {
            return Ok(());
        };
        let owned = store
            .memories
            .get(memory_id)
            .is_some_and(|m| m.agent_id == agent_id);
        if owned {
            store.memories.remove(memory_id);
            Self::remove_memory_references(store, memory_id);
        }
        Ok(())
    }

    async fn get_stats(&self, user_id: &str, agent_id: Option<&str>) -> Result<MemoryStats> {
        if user_id.trim().is_empty() {
            return Err(Error::Validation("userId must not be empty".into()));
        }
        let users = self.users.read();
        let mut stats = MemoryStats::default();
        let Some(store) = users.get(user_id) else {
            return Ok(stats);
        };

        let mut importance_sum = 0.0;
        for memory in store
            .memories
            .values()
            .filter(|m| agent_id.is_none_or(|a| m.agent_id == a))
        {
            *stats.by_type.entry(memory.memory_type).or_insert(0) += 1;
            importance_sum += memory.importance;
            stats.total_size += memory.content.len() as u64;
        }
        stats.total_memories = stats.by_type.values().sum();
        if stats.total_memories > 0 {
            stats.avg_importance = importance_sum / stats.total_memories as f64;
        }
        Ok(stats)
    }

    async fn create_connections(&self, user_id: &str, connections: &[Connection]) -> Result<()> {
        if user_id.trim().is_empty() {
            return Err(Error::Validation("userId must not be empty".into()));
        }
        let mut users = self.users.write();
        let store = users.entry(user_id.to_string()).or_default();

        for connection in connections {
            if !(0.0..=1.0).contains(&connection.strength) {
                return Err(Error::Validation(format!(
                    "connection strength must be in [0,1], got {}",
                    connection.strength
                )));
            }
            if !store.memories.contains_key(&connection.source_memory_id) {
                return Err(Error::Validation(format!(
                    "connection source does not exist: {}",
                    connection.source_memory_id
                )));
            }
            if !store.memories.contains_key(&connection.target_memory_id) {
                return Err(Error::Validation(format!(
                    "connection target does not exist: {}",
                    connection.target_memory_id
                )));
            }
        }
        for connection in connections {
            store
                .by_source
                .entry(connection.source_memory_id.clone())
                .or_default()
                .push(connection.id.clone());
            store
                .by_target
                .entry(connection.target_memory_id.clone())
                .or_default()
                .push(connection.id.clone());
            store
                .connections
                .insert(connection.id.clone(), connection.clone());
        }
        Ok(())
    }

    async fn get_connections_for_memories(
        &self,
        user_id: &str,
        memory_ids: &[String],
    ) -> Result<Vec<Connection>> {
        if user_id.trim().is_empty() {
            return Err(Error::Validation("userId must not be empty".into()));
        }
        let users = self.users.read();
        let Some(store) = users.get(user_id) else {
            return Ok(Vec::new());
        };

        let mut seen: HashSet<&String> = HashSet::new();
        let mut results = Vec::new();
        for memory_id in memory_ids {
            for index in [&store.by_source, &store.by_target] {
                for connection_id in index.get(memory_id).into_iter().flatten() {
                    if seen.insert(connection_id) {
                        if let Some(connection) = store.connections.get(connection_id) {
                            results.push(connection.clone());
                        }
                    }
                }
            }
        }
        Ok(results)
    }

    async fn find_connected_memories(
        &self,
        user_id: &str,
        memory_id: &str,
        depth: usize,
    ) -> Result<ConnectedMemories> {
        if user_id.trim().is_empty() {
            return Err(Error::Validation("userId must not be empty".into()));
        }
        let users = self.users.read();
        let Some(store) = users.get(user_id) else {
            return Ok(ConnectedMemories::default());
        };

        // Breadth-first over the undirected connection view, depth-limited.
        let mut visited: HashSet<String> = HashSet::from([memory_id.to_string()]);
        let mut connection_ids: HashSet<String> = HashSet::new();
        let mut frontier: VecDeque<(String, usize)> = VecDeque::from([(memory_id.to_string(), 0)]);
        let mut result = ConnectedMemories::default();

        while let Some((current, hops)) = frontier.pop_front() {
            if hops >= depth {
                continue;
            }
            for index in [&store.by_source, &store.by_target] {
                for connection_id in index.get(&current).into_iter().flatten() {
                    let Some(connection) = store.connections.get(connection_id) else {
                        continue;
                    };
                    if connection_ids.insert(connection_id.clone()) {
                        result.connections.push(connection.clone());
                    }
                    let other = if connection.source_memory_id == current {
                        &connection.target_memory_id
                    } else {
                        &connection.source_memory_id
                    };
                    if visited.insert(other.clone()) {
                        if let Some(memory) = store.memories.get(other) {
                            result.memories.push(memory.clone());
                        }
                        frontier.push_back((other.clone(), hops + 1));
                    }
                }
            }
        }
        Ok(result)
    }

    fn supports_decay(&self) -> bool {
        true
    }

    async fn apply_decay(
        &self,
        user_id: &str,
        agent_id: &str,
        options: &DecayOptions,
    ) -> Result<DecayResult> {
        Self::require_scope(user_id, agent_id)?;
        let mut users = self.users.write();
        let Some(store) = users.get_mut(user_id) else {
            return Ok(DecayResult::default());
        };

        let mut result = DecayResult::default();
        let mut decay_total = 0.0;
        let mut removals: Vec<String> = Vec::new();
        for memory in store
            .memories
            .values_mut()
            .filter(|m| m.agent_id == agent_id && m.memory_type.decays())
        {
            result.processed += 1;
            let reduced = memory.resonance * (1.0 - options.decay_rate);
            decay_total += memory.resonance - reduced;
            memory.resonance = reduced;
            result.decayed += 1;
            if reduced < options.removal_threshold {
                removals.push(memory.id.clone());
            }
        }
        for id in removals {
            store.memories.remove(&id);
            Self::remove_memory_references(store, &id);
            result.removed += 1;
        }
        if result.decayed > 0 {
            result.average_decay = decay_total / result.decayed as f64;
        }
        Ok(result)
    }

    fn supports_vector_search(&self) -> bool {
        true
    }

    async fn search_by_vector(
        &self,
        user_id: &str,
        agent_id: &str,
        embedding: &[f32],
        options: &VectorSearchOptions,
    ) -> Result<Vec<ScoredMemory>> {
        Self::require_scope(user_id, agent_id)?;
        let now = Utc::now();
        let users = self.users.read();
        let Some(store) = users.get(user_id) else {
            return Ok(Vec::new());
        };

        let mut scored: Vec<ScoredMemory> = store
            .memories
            .values()
            .filter(|m| m.agent_id == agent_id)
            .filter(|m| !m.is_expired(now))
            .filter(|m| options.memory_type.is_none_or(|t| m.memory_type == t))
            .filter_map(|m| {
                let stored = store.embeddings.get(&m.id)?;
                let score = f64::from(cosine_similarity(embedding, stored));
                (score >= options.threshold).then(|| ScoredMemory {
                    memory: m.clone(),
                    score,
                })
            })
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(options.limit);
        Ok(scored)
    }

    fn supports_hybrid_search(&self) -> bool {
        true
    }

    async fn hybrid_search(
        &self,
        user_id: &str,
        agent_id: &str,
        query: &str,
        embedding: &[f32],
        options: &HybridSearchOptions,
    ) -> Result<Vec<ScoredMemory>> {
        Self::require_scope(user_id, agent_id)?;
        let now = Utc::now();
        let weight_sum = (options.vector_weight + options.text_weight).max(f64::EPSILON);
        let vector_weight = options.vector_weight / weight_sum;
        let text_weight = options.text_weight / weight_sum;

        let mut users = self.users.write();
        let Some(store) = users.get_mut(user_id) else {
            return Ok(Vec::new());
        };

        let mut scored: Vec<(String, f64)> = store
            .memories
            .values()
            .filter(|m| m.agent_id == agent_id)
            .filter(|m| !m.is_expired(now))
            .filter(|m| options.filter.is_none_or(|t| m.memory_type == t))
            .filter_map(|m| {
                let vector_score = store
                    .embeddings
                    .get(&m.id)
                    .map(|stored| f64::from(cosine_similarity(embedding, stored)))
                    .unwrap_or(0.0);
                let text_score = Self::text_score(&m.content, query);
                let combined = vector_weight * vector_score + text_weight * text_score;
                (combined >= options.threshold && combined > 0.0)
                    .then(|| (m.id.clone(), combined))
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(options.limit);

        let mut results = Vec::with_capacity(scored.len());
        for (id, score) in scored {
            if let Some(memory) = store.memories.get_mut(&id) {
                Self::touch_access(memory);
                results.push(ScoredMemory {
                    memory: memory.clone(),
                    score,
                });
            }
        }
        Ok(results)
    }

    fn supports_batch_update(&self) -> bool {
        true
    }

    async fn batch_update_memories(
        &self,
        user_id: &str,
        updates: Vec<BatchMemoryUpdate>,
    ) -> Result<usize> {
        if user_id.trim().is_empty() {
            return Err(Error::Validation("userId must not be empty".into()));
        }
        let mut users = self.users.write();
        let Some(store) = users.get_mut(user_id) else {
            return Ok(0);
        };
        let mut applied = 0;
        for entry in updates {
            if let Some(memory) = store.memories.get_mut(&entry.memory_id) {
                Self::apply_update(memory, entry.update);
                applied += 1;
            }
        }
        Ok(applied)
    }
}

#[async_trait]
impl StorageProvider for InMemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.kv.read().get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.kv.write().insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.kv.write().remove(key).is_some())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.kv.read().contains_key(key))
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<Value>>> {
        let kv = self.kv.read();
        Ok(keys.iter().map(|key| kv.get(key).cloned()).collect())
    }

    async fn set_many(&self, entries: Vec<(String, Value)>) -> Result<()> {
        let mut kv = self.kv.write();
        for (key, value) in entries {
            kv.insert(key, value);
        }
        Ok(())
    }

    async fn delete_many(&self, keys: &[String]) -> Result<usize> {
        let mut kv = self.kv.write();
        Ok(keys.iter().filter(|key| kv.remove(*key).is_some()).count())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let kv = self.kv.read();
        Ok(kv
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect())
    }

    async fn clear(&self) -> Result<()> {
        debug!("clearing the key/value namespace");
        self.kv.write().clear();
        Ok(())
    }

    fn memory(&self) -> Option<&dyn MemoryStorage> {
        Some(self)
    }

    fn evolution(&self) -> Option<&dyn EvolutionSink> {
        Some(&self.sink)
    }
}

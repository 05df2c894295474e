//! # Embeddings
//!
//! Embedding generation with content-hash caching, batching, and dimension
//! adjustment. The provider itself is an external collaborator behind
//! [`EmbeddingProvider`]; the deterministic `mock` provider ships in-crate
//! for tests and offline use.

mod mock;
mod provider;
mod similarity;

pub use mock::MockEmbeddingProvider;
pub use provider::{create_embedding_provider, EmbeddingProvider};
pub use similarity::{adjust_dimension, cosine_similarity};

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::config::EmbeddingConfig;
use crate::error::Result;
use crate::storage::{MemoryStorage, ScoredMemory, VectorSearchOptions};

/// One generated embedding with its provenance.
#[derive(Debug, Clone)]
pub struct EmbeddingResult {
    /// The (dimension-adjusted) vector.
    pub embedding: Vec<f32>,
    /// Length of `embedding`.
    pub dimensions: usize,
    /// Provider label.
    pub provider: String,
    /// Model identifier.
    pub model: String,
    /// True when served from the content-hash cache.
    pub cached: bool,
}

/// Embedding generation service with an LRU cache keyed by content hash and
/// model.
pub struct EmbeddingService {
    provider: Arc<dyn EmbeddingProvider>,
    provider_label: String,
    config: EmbeddingConfig,
    cache: Option<Mutex<LruCache<String, Vec<f32>>>>,
}

impl EmbeddingService {
    /// Wrap a provider with the configured cache and batching behavior.
    #[must_use]
    pub fn new(provider: Arc<dyn EmbeddingProvider>, config: EmbeddingConfig) -> Self {
        let cache = if config.cache_enabled {
            NonZeroUsize::new(config.cache_size.max(1)).map(|size| Mutex::new(LruCache::new(size)))
        } else {
            None
        };
        let provider_label = config
            .provider
            .clone()
            .unwrap_or_else(|| "mock".to_string());
        Self {
            provider,
            provider_label,
            config,
            cache,
        }
    }

    /// Build the service from configuration via the provider factory.
    pub fn from_config(config: EmbeddingConfig) -> Result<Self> {
        let provider = create_embedding_provider(&config)?;
        Ok(Self::new(provider, config))
    }

    /// Target output dimension after adjustment.
    #[must_use]
    pub fn dimensions(&self) -> usize {
        self.config
            .dimensions
            .unwrap_or_else(|| self.provider.embedding_dimension())
    }

    /// Cache key: first 16 hex chars of `sha256(content || model)`.
    fn cache_key(&self, text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        hasher.update(self.provider.model_name().as_bytes());
        let digest = hasher.finalize();
        let mut key = String::with_capacity(16);
        for byte in digest.iter().take(8) {
            key.push_str(&format!("{byte:02x}"));
        }
        key
    }

    fn cache_get(&self, key: &str) -> Option<Vec<f32>> {
        self.cache
            .as_ref()
            .and_then(|cache| cache.lock().get(key).cloned())
    }

    fn cache_put(&self, key: String, embedding: Vec<f32>) {
        if let Some(cache) = &self.cache {
            cache.lock().put(key, embedding);
        }
    }

    fn fit(&self, embedding: Vec<f32>) -> Vec<f32> {
        let target = self.dimensions();
        if embedding.len() != target {
            warn!(
                provider = %self.provider_label,
                model = %self.provider.model_name(),
                got = embedding.len(),
                want = target,
                "embedding dimension mismatch, adjusting"
            );
        }
        adjust_dimension(embedding, target)
    }

    fn result(&self, embedding: Vec<f32>, cached: bool) -> EmbeddingResult {
        EmbeddingResult {
            dimensions: embedding.len(),
            provider: self.provider_label.clone(),
            model: self.provider.model_name().to_string(),
            cached,
            embedding,
        }
    }

    /// Generate an embedding, consulting the cache first.
    pub async fn generate_embedding(&self, text: &str) -> Result<EmbeddingResult> {
        let key = self.cache_key(text);
        if let Some(hit) = self.cache_get(&key) {
            return Ok(self.result(hit, true));
        }

        let raw = self.provider.embed_text(text).await?;
        let embedding = self.fit(raw);
        self.cache_put(key, embedding.clone());
        Ok(self.result(embedding, false))
    }

    /// Generate embeddings for many texts, batching provider calls by the
    /// configured batch size and serving cached entries without a call.
    pub async fn generate_batch_embeddings(
        &self,
        texts: &[String],
    ) -> Result<Vec<EmbeddingResult>> {
        let mut results: Vec<Option<EmbeddingResult>> = vec![None; texts.len()];
        let mut pending: Vec<(usize, String)> = Vec::new();

        for (index, text) in texts.iter().enumerate() {
            let key = self.cache_key(text);
            if let Some(hit) = self.cache_get(&key) {
                results[index] = Some(self.result(hit, true));
            } else {
                pending.push((index, text.clone()));
            }
        }

        let batch_size = self.config.batch_size.max(1);
        for chunk in pending.chunks(batch_size) {
            let chunk_texts: Vec<String> = chunk.iter().map(|(_, text)| text.clone()).collect();
            let embeddings = self.provider.embed_batch(&chunk_texts).await?;
            for ((index, text), raw) in chunk.iter().zip(embeddings) {
                let embedding = self.fit(raw);
                self.cache_put(self.cache_key(text), embedding.clone());
                results[*index] = Some(self.result(embedding, false));
            }
        }

        Ok(results.into_iter().flatten().collect())
    }

    /// Vector search for memories similar to a query text.
    ///
    /// Delegates to storage vector search when the backend supports it;
    /// otherwise warns and returns empty.
    pub async fn find_similar_memories(
        &self,
        user_id: &str,
        agent_id: &str,
        query_text: &str,
        threshold: f64,
        limit: usize,
        storage: &dyn MemoryStorage,
    ) -> Result<Vec<ScoredMemory>> {
        if !storage.supports_vector_search() {
            warn!(
                user_id = %user_id,
                "storage backend has no vector search; returning no similar memories"
            );
            return Ok(Vec::new());
        }

        let query = self.generate_embedding(query_text).await?;
        debug!(
            user_id = %user_id,
            dimensions = query.dimensions,
            cached = query.cached,
            "running vector search for similar memories"
        );
        storage
            .search_by_vector(
                user_id,
                agent_id,
                &query.embedding,
                &VectorSearchOptions {
                    limit,
                    memory_type: None,
                    threshold,
                },
            )
            .await
    }
}

//! Deterministic mock embedding provider.
//!
//! Encodes token-hash feature buckets into the vector, so texts that share
//! tokens land close together under cosine similarity. That keeps triage
//! band behavior stable in tests without a model download or network call.
//! Not suitable for production semantic search.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use anyhow::Result;
use async_trait::async_trait;

use super::provider::EmbeddingProvider;

/// Deterministic feature-bucket embedding provider.
pub struct MockEmbeddingProvider {
    model: String,
    dimension: usize,
}

impl MockEmbeddingProvider {
    /// Create a provider with the given model label and output dimension.
    #[must_use]
    pub fn new(model: impl Into<String>, dimension: usize) -> Self {
        Self {
            model: model.into(),
            dimension: dimension.max(1),
        }
    }

    fn bucket_of(&self, token: &str) -> (usize, f32) {
        let mut hasher = DefaultHasher::new();
        token.hash(&mut hasher);
        let hash = hasher.finish();
        let bucket = usize::try_from(hash % self.dimension as u64).unwrap_or(0);
        // Deterministic sign keeps distinct vocabularies from collapsing
        // onto one octant.
        let sign = if (hash >> 32) & 1 == 0 { 1.0 } else { -1.0 };
        (bucket, sign)
    }

    /// Generate the deterministic embedding for a text.
    #[must_use]
    pub fn generate(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0f32; self.dimension];
        for token in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let (bucket, sign) = self.bucket_of(token);
            embedding[bucket] += sign;
        }

        let magnitude = embedding.iter().map(|v| v * v).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut embedding {
                *value /= magnitude;
            }
        } else {
            // Empty/delimiter-only text maps to a fixed unit vector.
            embedding[0] = 1.0;
        }
        embedding
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.generate(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|text| self.generate(text)).collect())
    }

    fn embedding_dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::similarity::cosine_similarity;

    #[test]
    fn identical_texts_embed_identically() {
        let provider = MockEmbeddingProvider::new("mock-embed", 128);
        let a = provider.generate("the cache invalidation bug");
        let b = provider.generate("the cache invalidation bug");
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn token_overlap_orders_similarity() {
        let provider = MockEmbeddingProvider::new("mock-embed", 128);
        let base = provider.generate("rust borrow checker error in async code");
        let near = provider.generate("rust borrow checker error in sync code");
        let far = provider.generate("grocery list apples bananas");

        let near_sim = cosine_similarity(&base, &near);
        let far_sim = cosine_similarity(&base, &far);
        assert!(near_sim > far_sim);
        assert!(near_sim > 0.7);
    }

    #[test]
    fn embeddings_are_unit_length() {
        let provider = MockEmbeddingProvider::new("mock-embed", 64);
        let embedding = provider.generate("normalize me");
        let magnitude = embedding.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((magnitude - 1.0).abs() < 1e-5);
    }

    #[test]
    fn empty_text_yields_stable_vector() {
        let provider = MockEmbeddingProvider::new("mock-embed", 16);
        assert_eq!(provider.generate(""), provider.generate("   "));
    }
}

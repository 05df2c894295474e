//! Embedding provider contract and factory.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::EmbeddingConfig;
use crate::error::Error;

use super::mock::MockEmbeddingProvider;

/// Text-to-vector provider contract. Providers speak `anyhow` at the edge;
/// the engine wraps failures into its `embedding` error kind.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text.
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch of texts, position-aligned with the input.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Native output dimension of the model.
    fn embedding_dimension(&self) -> usize;

    /// Model identifier, used in cache keys.
    fn model_name(&self) -> &str;
}

/// Create a provider from configuration.
///
/// `mock` (also selected by the `MOCK_EMBEDDINGS` / `EMBEDDING_PROVIDER`
/// environment contract) resolves to the deterministic in-process provider.
/// Real providers are external collaborators: callers inject them at system
/// assembly instead of naming them here.
pub fn create_embedding_provider(
    config: &EmbeddingConfig,
) -> crate::error::Result<Arc<dyn EmbeddingProvider>> {
    let provider = config.provider.as_deref().unwrap_or("mock");
    match provider {
        "mock" => {
            let dimension = config
                .dimensions
                .unwrap_or(crate::constants::defaults::MOCK_EMBEDDING_DIMENSION);
            let model = config.model.clone().unwrap_or_else(|| "mock-embed".into());
            Ok(Arc::new(MockEmbeddingProvider::new(model, dimension)))
        }
        other => Err(Error::Embedding(anyhow::anyhow!(
            "embedding provider '{other}' is an external collaborator; inject an EmbeddingProvider at construction"
        ))),
    }
}

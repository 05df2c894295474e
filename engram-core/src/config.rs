//! Engine configuration.
//!
//! Defaults live in [`crate::constants::defaults`]; the environment variables
//! named in [`crate::constants::env_vars`] form the public configuration
//! contract and override config values on the documented cascade.

use serde::{Deserialize, Serialize};

use crate::constants::{defaults, env_vars};
use crate::error::{Error, Result};

/// True when running under a test harness. Threshold validation downgrades
/// to a warning in this mode so fixtures can probe invalid configurations.
#[must_use]
pub fn is_test_env() -> bool {
    if cfg!(test) {
        return true;
    }
    if std::env::var(env_vars::NODE_ENV).is_ok_and(|v| v == "test") {
        return true;
    }
    std::env::var(env_vars::ENGRAM_TEST_MODE).is_ok_and(|v| env_flag(&v))
}

/// Truthy parse shared by every boolean environment variable.
#[must_use]
pub fn env_flag(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "true" | "1" | "yes" | "on")
}

/// Embedding layer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Whether embedding-based features are active.
    pub enabled: bool,
    /// Provider name; `mock` selects the deterministic test provider.
    pub provider: Option<String>,
    /// Model identifier handed to the provider factory.
    pub model: Option<String>,
    /// Target dimension; provider output is truncated/zero-padded to fit.
    pub dimensions: Option<usize>,
    /// Minimum cosine similarity for a discovery candidate to survive.
    pub similarity_threshold: f64,
    /// Whether the content-hash LRU cache is consulted.
    pub cache_enabled: bool,
    /// Batch size for `embed_batch` chunking.
    pub batch_size: usize,
    /// Maximum cached embeddings.
    pub cache_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            provider: None,
            model: None,
            dimensions: None,
            similarity_threshold: defaults::SIMILARITY_THRESHOLD,
            cache_enabled: true,
            batch_size: defaults::EMBEDDING_BATCH_SIZE,
            cache_size: defaults::EMBEDDING_CACHE_SIZE,
        }
    }
}

/// The three triage bands. Must be strictly ordered
/// `auto_similar > auto_related > llm_required`, each in [0, 1].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TriageThresholds {
    pub auto_similar: f64,
    pub auto_related: f64,
    pub llm_required: f64,
}

impl Default for TriageThresholds {
    fn default() -> Self {
        Self {
            auto_similar: defaults::AUTO_SIMILAR_THRESHOLD,
            auto_related: defaults::AUTO_RELATED_THRESHOLD,
            llm_required: defaults::LLM_REQUIRED_THRESHOLD,
        }
    }
}

impl TriageThresholds {
    /// Apply `CONNECTION_AUTO_SIMILAR` / `CONNECTION_AUTO_RELATED` /
    /// `CONNECTION_LLM_REQUIRED` overrides.
    pub fn apply_env(&mut self) {
        if let Ok(raw) = std::env::var(env_vars::CONNECTION_AUTO_SIMILAR) {
            if let Ok(value) = raw.parse::<f64>() {
                self.auto_similar = value;
            }
        }
        if let Ok(raw) = std::env::var(env_vars::CONNECTION_AUTO_RELATED) {
            if let Ok(value) = raw.parse::<f64>() {
                self.auto_related = value;
            }
        }
        if let Ok(raw) = std::env::var(env_vars::CONNECTION_LLM_REQUIRED) {
            if let Ok(value) = raw.parse::<f64>() {
                self.llm_required = value;
            }
        }
    }

    /// Enforce the strict ordering and range invariants. In test
    /// environments a violation logs instead of failing so fixtures can
    /// exercise the bands directly.
    pub fn validate(&self) -> Result<()> {
        let in_range = |v: f64| (0.0..=1.0).contains(&v);
        let ordered = self.auto_similar > self.auto_related && self.auto_related > self.llm_required;
        if ordered
            && in_range(self.auto_similar)
            && in_range(self.auto_related)
            && in_range(self.llm_required)
        {
            return Ok(());
        }

        let message = format!(
            "triage thresholds must satisfy 1 >= autoSimilar ({}) > autoRelated ({}) > llmRequired ({}) >= 0",
            self.auto_similar, self.auto_related, self.llm_required
        );
        if is_test_env() {
            tracing::warn!(%message, "accepting invalid triage thresholds in test mode");
            Ok(())
        } else {
            Err(Error::Validation(message))
        }
    }
}

/// Connection discovery configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionDetectionConfig {
    /// Master switch for discovery and graph enrichment.
    pub enabled: bool,
    /// Preferred LLM provider; env cascade may override.
    pub provider: Option<String>,
    /// Standard-tier model override.
    pub model: Option<String>,
    /// Advanced-tier model override.
    pub enhanced_model: Option<String>,
    /// Triage bands.
    pub thresholds: TriageThresholds,
    /// Recent-memory candidate pool size.
    pub max_candidates: usize,
    /// Connections persisted per storage batch.
    pub batch_size: usize,
    /// Classification sampling temperature.
    pub temperature: f32,
    /// Classification completion cap.
    pub max_tokens: u32,
}

impl Default for ConnectionDetectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            provider: None,
            model: None,
            enhanced_model: None,
            thresholds: TriageThresholds::default(),
            max_candidates: defaults::MAX_CANDIDATES,
            batch_size: defaults::MAX_LLM_CALLS_PER_BATCH,
            temperature: defaults::CLASSIFY_TEMPERATURE,
            max_tokens: defaults::CLASSIFY_MAX_TOKENS,
        }
    }
}

/// How often temporal analysis is expected to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisFrequency {
    Realtime,
    Hourly,
    Daily,
}

/// Temporal pattern analysis configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemporalConfig {
    /// Master switch.
    pub enabled: bool,
    /// Expected cadence (informational to schedulers).
    pub analysis_frequency: AnalysisFrequency,
    /// Minimum memories before the statistical pass runs.
    pub min_memories_for_analysis: usize,
    /// Whether LLM augmentation may run under budget.
    pub enable_llm_enhancement: bool,
}

impl Default for TemporalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            analysis_frequency: AnalysisFrequency::Realtime,
            min_memories_for_analysis: defaults::MIN_MEMORIES_FOR_ANALYSIS,
            enable_llm_enhancement: false,
        }
    }
}

/// Relative weights for the hybrid score. Normalized before use; only the
/// ratios matter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HybridSearchWeights {
    pub vector: f64,
    pub text: f64,
    pub temporal: f64,
    pub procedural: f64,
}

impl Default for HybridSearchWeights {
    fn default() -> Self {
        Self {
            vector: 0.3,
            text: 0.3,
            temporal: 0.2,
            procedural: 0.2,
        }
    }
}

impl HybridSearchWeights {
    /// Normalize so the components sum to 1. A degenerate all-zero weight
    /// set falls back to text-only.
    #[must_use]
    pub fn normalized(&self) -> Self {
        let sum = self.vector + self.text + self.temporal + self.procedural;
        if sum <= f64::EPSILON {
            return Self {
                vector: 0.0,
                text: 1.0,
                temporal: 0.0,
                procedural: 0.0,
            };
        }
        Self {
            vector: self.vector / sum,
            text: self.text / sum,
            temporal: self.temporal / sum,
            procedural: self.procedural / sum,
        }
    }
}

/// Recall service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecallConfig {
    /// Result limit when the query does not provide one.
    pub default_limit: usize,
    /// Limit applied in production presets.
    pub production_limit: usize,
    /// Relevance floor when the query does not provide one.
    pub min_relevance_threshold: f64,
    /// Hybrid scoring weights.
    pub hybrid_search_weights: HybridSearchWeights,
    /// Whether per-tier search may use storage vector/hybrid search.
    pub enable_vector_search: bool,
    /// Whether relationship discovery runs for top results.
    pub enable_related_memories: bool,
    /// Relationships kept per memory.
    pub max_related_depth: usize,
    /// Whether results are cached.
    pub cache_results: bool,
    /// Cache entry age limit in milliseconds, applied uniformly.
    pub cache_ttl_ms: u64,
    /// Hop count for graph enrichment when the query does not provide one.
    pub default_connection_hops: usize,
    /// Cache size that triggers a deferred cleanup.
    pub cache_high_water: usize,
    /// Cache size cleanup shrinks toward.
    pub cache_low_water: usize,
}

impl Default for RecallConfig {
    fn default() -> Self {
        Self {
            default_limit: defaults::DEFAULT_RECALL_LIMIT,
            production_limit: defaults::PRODUCTION_RECALL_LIMIT,
            min_relevance_threshold: defaults::MIN_RELEVANCE_THRESHOLD,
            hybrid_search_weights: HybridSearchWeights::default(),
            enable_vector_search: true,
            enable_related_memories: true,
            max_related_depth: defaults::MAX_RELATED_DEPTH,
            cache_results: true,
            cache_ttl_ms: defaults::RECALL_CACHE_TTL_MS,
            default_connection_hops: defaults::DEFAULT_CONNECTION_HOPS,
            cache_high_water: defaults::RECALL_CACHE_HIGH_WATER,
            cache_low_water: defaults::RECALL_CACHE_LOW_WATER,
        }
    }
}

impl RecallConfig {
    /// Apply `RECALL_CACHE_HIGH_WATER` / `RECALL_CACHE_LOW_WATER` overrides.
    pub fn apply_env(&mut self) {
        if let Ok(raw) = std::env::var(env_vars::RECALL_CACHE_HIGH_WATER) {
            if let Ok(value) = raw.parse::<usize>() {
                self.cache_high_water = value;
            }
        }
        if let Ok(raw) = std::env::var(env_vars::RECALL_CACHE_LOW_WATER) {
            if let Ok(value) = raw.parse::<usize>() {
                self.cache_low_water = value;
            }
        }
        if self.cache_low_water >= self.cache_high_water {
            tracing::warn!(
                high = self.cache_high_water,
                low = self.cache_low_water,
                "recall cache low-water >= high-water, clamping"
            );
            self.cache_low_water = self.cache_high_water.saturating_sub(1);
        }
    }
}

/// Cost-control configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostControlConfig {
    /// Hard cap on LLM classifications per discovery batch.
    pub max_llm_calls_per_batch: usize,
    /// Monthly budget in provider cost units; `None` means unlimited.
    pub monthly_budget: Option<f64>,
    /// Prefer the embedding-only path when similarity alone suffices.
    pub prefer_embedding_when_similar: bool,
    /// Whether token usage is recorded with the cost tracker.
    pub track_token_usage: bool,
}

impl Default for CostControlConfig {
    fn default() -> Self {
        Self {
            max_llm_calls_per_batch: defaults::MAX_LLM_CALLS_PER_BATCH,
            monthly_budget: None,
            prefer_embedding_when_similar: true,
            track_token_usage: true,
        }
    }
}

/// Top-level configuration for the intelligence layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntelligenceLayerConfig {
    pub embedding: EmbeddingConfig,
    pub connection_detection: ConnectionDetectionConfig,
    pub temporal: TemporalConfig,
    pub recall: RecallConfig,
    pub cost_control: CostControlConfig,
}

impl IntelligenceLayerConfig {
    /// Defaults with every documented environment override applied.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Apply the documented environment overrides in place.
    pub fn apply_env(&mut self) {
        self.connection_detection.thresholds.apply_env();
        self.recall.apply_env();

        if let Ok(provider) = std::env::var(env_vars::EMBEDDING_PROVIDER) {
            self.embedding.provider = Some(provider);
        }
        if let Ok(raw) = std::env::var(env_vars::MOCK_EMBEDDINGS) {
            if env_flag(&raw) {
                self.embedding.provider = Some("mock".to_string());
            }
        }
    }

    /// Validate invariants that would otherwise surface as silent
    /// misclassification.
    pub fn validate(&self) -> Result<()> {
        self.connection_detection.thresholds.validate()?;
        if self.cost_control.max_llm_calls_per_batch == 0 {
            return Err(Error::Validation(
                "costControl.maxLLMCallsPerBatch must be >= 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.embedding.similarity_threshold) {
            return Err(Error::Validation(format!(
                "embedding.similarityThreshold must be in [0,1], got {}",
                self.embedding.similarity_threshold
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn default_thresholds_validate() {
        assert!(TriageThresholds::default().validate().is_ok());
    }

    #[test]
    fn weights_normalize_to_unit_sum() {
        let weights = HybridSearchWeights {
            vector: 2.0,
            text: 2.0,
            temporal: 1.0,
            procedural: 1.0,
        }
        .normalized();
        let sum = weights.vector + weights.text + weights.temporal + weights.procedural;
        assert!((sum - 1.0).abs() < 1e-9);
        assert!((weights.vector - weights.text).abs() < 1e-9);
    }

    #[test]
    fn zero_weights_fall_back_to_text() {
        let weights = HybridSearchWeights {
            vector: 0.0,
            text: 0.0,
            temporal: 0.0,
            procedural: 0.0,
        }
        .normalized();
        assert!((weights.text - 1.0).abs() < 1e-9);
    }

    #[test]
    #[serial]
    fn threshold_env_overrides_apply() {
        unsafe {
            std::env::set_var(env_vars::CONNECTION_AUTO_SIMILAR, "0.9");
            std::env::set_var(env_vars::CONNECTION_AUTO_RELATED, "0.7");
            std::env::set_var(env_vars::CONNECTION_LLM_REQUIRED, "0.4");
        }
        let mut thresholds = TriageThresholds::default();
        thresholds.apply_env();
        unsafe {
            std::env::remove_var(env_vars::CONNECTION_AUTO_SIMILAR);
            std::env::remove_var(env_vars::CONNECTION_AUTO_RELATED);
            std::env::remove_var(env_vars::CONNECTION_LLM_REQUIRED);
        }

        assert!((thresholds.auto_similar - 0.9).abs() < 1e-9);
        assert!((thresholds.auto_related - 0.7).abs() < 1e-9);
        assert!((thresholds.llm_required - 0.4).abs() < 1e-9);
    }

    #[test]
    #[serial]
    fn cache_water_mark_env_overrides_apply() {
        unsafe {
            std::env::set_var(env_vars::RECALL_CACHE_HIGH_WATER, "200");
            std::env::set_var(env_vars::RECALL_CACHE_LOW_WATER, "150");
        }
        let mut config = RecallConfig::default();
        config.apply_env();
        unsafe {
            std::env::remove_var(env_vars::RECALL_CACHE_HIGH_WATER);
            std::env::remove_var(env_vars::RECALL_CACHE_LOW_WATER);
        }

        assert_eq!(config.cache_high_water, 200);
        assert_eq!(config.cache_low_water, 150);
    }

    #[test]
    #[serial]
    fn mock_embeddings_flag_selects_mock_provider() {
        unsafe {
            std::env::set_var(env_vars::MOCK_EMBEDDINGS, "true");
        }
        let config = IntelligenceLayerConfig::from_env();
        unsafe {
            std::env::remove_var(env_vars::MOCK_EMBEDDINGS);
        }
        assert_eq!(config.embedding.provider.as_deref(), Some("mock"));
    }

    #[test]
    fn zero_llm_call_cap_rejected() {
        let mut config = IntelligenceLayerConfig::default();
        config.cost_control.max_llm_calls_per_batch = 0;
        assert!(config.validate().is_err());
    }
}

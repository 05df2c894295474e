//! Global constants for engram-core
//!
//! Centralizes the magic numbers used across the engine so tuning lives in
//! one place.

/// Default configuration values
pub mod defaults {
    // Recall
    pub const DEFAULT_RECALL_LIMIT: usize = 20;
    pub const PRODUCTION_RECALL_LIMIT: usize = 50;
    pub const MAX_RECALL_LIMIT: usize = 1000;
    pub const MIN_RELEVANCE_THRESHOLD: f64 = 0.1;
    pub const MAX_QUERY_LENGTH: usize = 200;
    pub const DEFAULT_CONNECTION_HOPS: usize = 1;
    pub const MAX_RELATED_DEPTH: usize = 3;

    // Recall result cache
    pub const RECALL_CACHE_TTL_MS: u64 = 300_000;
    pub const RECALL_CACHE_HIGH_WATER: usize = 1000;
    pub const RECALL_CACHE_LOW_WATER: usize = 900;
    pub const RECALL_CACHE_MIN_CLEANUP: usize = 100;
    pub const POPULAR_QUERIES_CAP: usize = 100;

    // Connection discovery
    pub const AUTO_SIMILAR_THRESHOLD: f64 = 0.8;
    pub const AUTO_RELATED_THRESHOLD: f64 = 0.6;
    pub const LLM_REQUIRED_THRESHOLD: f64 = 0.3;
    pub const SIMILARITY_THRESHOLD: f64 = 0.3;
    pub const MAX_CANDIDATES: usize = 20;
    pub const MAX_LLM_CALLS_PER_BATCH: usize = 10;
    pub const CLASSIFY_TEMPERATURE: f32 = 0.2;
    pub const CLASSIFY_MAX_TOKENS: u32 = 500;
    pub const QUEUE_DEBOUNCE_MS: u64 = 10;

    // Connection graph
    pub const GRAPH_MAX_DEPTH: usize = 5;
    pub const GRAPH_MAX_CONNECTIONS: usize = 50;
    pub const GRAPH_STRENGTH_THRESHOLD: f64 = 0.3;
    pub const TWO_HOP_FACTOR: f64 = 0.7;

    // Temporal analysis
    pub const MIN_MEMORIES_FOR_ANALYSIS: usize = 5;
    pub const MIN_MEMORIES_FOR_LLM_ANALYSIS: usize = 20;
    pub const BURST_WINDOW_MINUTES: i64 = 30;
    pub const BURST_MIN_MEMORIES: usize = 5;
    pub const HOURLY_PEAK_FACTOR: f64 = 1.5;
    pub const WEEKLY_PEAK_FACTOR: f64 = 1.3;
    pub const CLUSTER_WINDOW_MINUTES: i64 = 60;
    pub const CLUSTER_MIN_MEMORIES: usize = 3;
    pub const CLUSTER_MAX_TOPICS: usize = 5;

    // Embeddings
    pub const EMBEDDING_BATCH_SIZE: usize = 100;
    pub const EMBEDDING_CACHE_SIZE: usize = 1000;
    pub const MOCK_EMBEDDING_DIMENSION: usize = 256;

    // Tier defaults
    pub const WORKING_IMPORTANCE: f64 = 0.8;
    pub const EPISODIC_IMPORTANCE: f64 = 0.5;
    pub const SEMANTIC_IMPORTANCE: f64 = 0.7;
    pub const PROCEDURAL_IMPORTANCE: f64 = 0.8;
    pub const WORKING_TTL_SECONDS: u64 = 3600;
    pub const WORKING_MAX_CONTEXT_ITEMS: usize = 50;
    pub const EPISODIC_COMPRESSION_AGE_DAYS: u32 = 30;
    pub const SEMANTIC_CONFIDENCE_THRESHOLD: f64 = 0.5;
    pub const PROCEDURAL_CONFIDENCE_THRESHOLD: f64 = 0.7;
    pub const PATTERN_MERGE_SIMILARITY: f64 = 0.9;
}

/// Environment variable names that form the public configuration contract.
pub mod env_vars {
    pub const CONNECTION_PROVIDER: &str = "CONNECTION_PROVIDER";
    pub const CONNECTION_API_KEY: &str = "CONNECTION_API_KEY";
    pub const CONNECTION_MODEL: &str = "CONNECTION_MODEL";
    pub const CONNECTION_STANDARD_MODEL: &str = "CONNECTION_STANDARD_MODEL";
    pub const CONNECTION_ENHANCED_MODEL: &str = "CONNECTION_ENHANCED_MODEL";
    pub const CONNECTION_ADVANCED_MODEL: &str = "CONNECTION_ADVANCED_MODEL";
    pub const CONNECTION_ALWAYS_ADVANCED: &str = "CONNECTION_ALWAYS_ADVANCED";
    pub const CONNECTION_PREFER_QUALITY: &str = "CONNECTION_PREFER_QUALITY";
    pub const CONNECTION_AUTO_SIMILAR: &str = "CONNECTION_AUTO_SIMILAR";
    pub const CONNECTION_AUTO_RELATED: &str = "CONNECTION_AUTO_RELATED";
    pub const CONNECTION_LLM_REQUIRED: &str = "CONNECTION_LLM_REQUIRED";
    pub const PRIME_PROVIDER: &str = "PRIME_PROVIDER";
    pub const EMBEDDING_PROVIDER: &str = "EMBEDDING_PROVIDER";
    pub const MOCK_EMBEDDINGS: &str = "MOCK_EMBEDDINGS";
    pub const RECALL_CACHE_HIGH_WATER: &str = "RECALL_CACHE_HIGH_WATER";
    pub const RECALL_CACHE_LOW_WATER: &str = "RECALL_CACHE_LOW_WATER";
    pub const NODE_ENV: &str = "NODE_ENV";
    pub const ENGRAM_TEST_MODE: &str = "ENGRAM_TEST_MODE";
}

/// Metadata keys used inside the opaque per-memory metadata bag.
pub mod metadata_keys {
    pub const EXPIRES_AT: &str = "expiresAt";
    pub const TAGS: &str = "tags";
    pub const CONFIDENCE: &str = "confidence";
    pub const SOURCE: &str = "source";
    pub const TRIGGER: &str = "trigger";
    pub const ACTION: &str = "action";
    pub const OUTCOME: &str = "outcome";
    pub const SUCCESS: &str = "success";
    pub const CONTEXT_WINDOW: &str = "contextWindow";
    pub const TEMPORAL_INSIGHTS: &str = "temporalInsights";
    pub const ORIGINAL_CONVERSATION_DATE: &str = "originalConversationDate";
    pub const FROM_HYBRID_SEARCH: &str = "fromHybridSearch";
    pub const CONNECTION_SOURCE: &str = "connectionSource";
    pub const CONNECTION_TYPE: &str = "connectionType";
    pub const CONNECTION_STRENGTH: &str = "connectionStrength";
    pub const HOPS_FROM_QUERY: &str = "hopsFromQuery";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn triage_thresholds_strictly_ordered() {
        assert!(defaults::AUTO_SIMILAR_THRESHOLD > defaults::AUTO_RELATED_THRESHOLD);
        assert!(defaults::AUTO_RELATED_THRESHOLD > defaults::LLM_REQUIRED_THRESHOLD);
    }

    #[test]
    fn cache_water_marks_ordered() {
        assert!(defaults::RECALL_CACHE_HIGH_WATER > defaults::RECALL_CACHE_LOW_WATER);
    }
}

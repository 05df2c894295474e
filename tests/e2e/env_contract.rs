//! Environment variables are a public configuration contract; these tests
//! pin the names and their effect on assembled services.

use std::sync::Arc;

use serial_test::serial;

use engram_core::{
    ConnectionEngine, CostTracker, EmbeddingService, InMemoryCostTracker,
    IntelligenceLayerConfig, MemoryType, RecallQuery, StorageProvider,
};
use engram_storage_mem::InMemoryStorage;
use test_utils::{test_config, TestSystem};

#[tokio::test]
#[serial]
async fn recall_cache_water_marks_come_from_env() {
    unsafe {
        std::env::set_var("RECALL_CACHE_HIGH_WATER", "5");
        std::env::set_var("RECALL_CACHE_LOW_WATER", "3");
    }
    let ts = TestSystem::new().expect("system");
    unsafe {
        std::env::remove_var("RECALL_CACHE_HIGH_WATER");
        std::env::remove_var("RECALL_CACHE_LOW_WATER");
    }

    ts.system
        .store("alice", "shared", "one memory", Some(MemoryType::Semantic))
        .await
        .unwrap();
    for i in 0..10 {
        ts.system
            .recall(&RecallQuery {
                user_id: "alice".into(),
                agent_id: "shared".into(),
                query: format!("probe {i}"),
                ..RecallQuery::default()
            })
            .await
            .unwrap();
    }
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    assert!(
        ts.system.recall_service().cache_len() <= 3,
        "cache was {}",
        ts.system.recall_service().cache_len()
    );
}

#[tokio::test]
#[serial]
async fn test_mode_env_relaxes_threshold_validation() {
    let mut config = test_config();
    config.connection_detection.thresholds.auto_similar = 0.1;
    config.connection_detection.thresholds.auto_related = 0.6;
    config.connection_detection.thresholds.llm_required = 0.9;

    let build = |config: IntelligenceLayerConfig| {
        let storage = Arc::new(InMemoryStorage::new());
        let embeddings =
            Arc::new(EmbeddingService::from_config(config.embedding.clone()).expect("embeddings"));
        let cost_tracker: Arc<dyn CostTracker> = Arc::new(InMemoryCostTracker::new());
        ConnectionEngine::new(
            storage as Arc<dyn StorageProvider>,
            embeddings,
            cost_tracker,
            None,
            config,
        )
    };

    unsafe {
        std::env::remove_var("ENGRAM_TEST_MODE");
        std::env::remove_var("NODE_ENV");
    }
    assert!(build(config.clone()).is_err());

    unsafe {
        std::env::set_var("ENGRAM_TEST_MODE", "true");
    }
    let relaxed = build(config);
    unsafe {
        std::env::remove_var("ENGRAM_TEST_MODE");
    }
    assert!(relaxed.is_ok());
}

#[tokio::test]
#[serial]
async fn triage_threshold_env_overrides_reach_the_engine() {
    // Invalid override ordering must be caught at construction even when
    // the config itself is valid.
    unsafe {
        std::env::remove_var("ENGRAM_TEST_MODE");
        std::env::remove_var("NODE_ENV");
        std::env::set_var("CONNECTION_AUTO_SIMILAR", "0.2");
        std::env::set_var("CONNECTION_AUTO_RELATED", "0.5");
        std::env::set_var("CONNECTION_LLM_REQUIRED", "0.7");
    }

    let storage = Arc::new(InMemoryStorage::new());
    let config = test_config();
    let embeddings =
        Arc::new(EmbeddingService::from_config(config.embedding.clone()).expect("embeddings"));
    let cost_tracker: Arc<dyn CostTracker> = Arc::new(InMemoryCostTracker::new());
    let result = ConnectionEngine::new(
        storage as Arc<dyn StorageProvider>,
        embeddings,
        cost_tracker,
        None,
        config,
    );
    unsafe {
        std::env::remove_var("CONNECTION_AUTO_SIMILAR");
        std::env::remove_var("CONNECTION_AUTO_RELATED");
        std::env::remove_var("CONNECTION_LLM_REQUIRED");
    }
    assert!(result.is_err());
}

#[test]
#[serial]
fn mock_embeddings_env_selects_mock_provider() {
    unsafe {
        std::env::remove_var("EMBEDDING_PROVIDER");
        std::env::set_var("MOCK_EMBEDDINGS", "1");
    }
    let config = IntelligenceLayerConfig::from_env();
    unsafe {
        std::env::remove_var("MOCK_EMBEDDINGS");
    }
    assert_eq!(config.embedding.provider.as_deref(), Some("mock"));
}

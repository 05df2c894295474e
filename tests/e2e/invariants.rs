//! Universal invariants and boundary behavior: isolation, type integrity,
//! the closed connection-type set, threshold ordering, no fabricated
//! fields, cache coherence, budget respect, and limit/TTL edges.

use std::sync::Arc;

use serial_test::serial;

use engram_core::{
    Connection, ConnectionEngine, ConnectionType, CostTracker, EmbeddingService, ExtractionUsage,
    InMemoryCostTracker, LlmClientFactory, MemoryData, MemoryStorage, MemoryType, MemoryUpdate,
    RecallQuery, StorageProvider, TemporalPatternAnalyzer,
};
use engram_storage_mem::InMemoryStorage;
use test_utils::{test_config, MockLlmFactory, TestSystem};

const USER: &str = "alice";
const AGENT: &str = "shared";

#[tokio::test]
async fn empty_user_id_is_rejected_everywhere() {
    let ts = TestSystem::new().expect("system");

    let err = ts
        .system
        .store("", AGENT, "content", None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "validation");

    let err = ts
        .system
        .recall(&RecallQuery {
            user_id: String::new(),
            agent_id: AGENT.into(),
            query: "anything".into(),
            ..RecallQuery::default()
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "validation");

    let err = ts
        .system
        .working()
        .recall("", AGENT, "anything", 10)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "validation");

    let engine = ts.system.connection_engine().expect("engine");
    let memory = test_utils::memory_fixture(USER, AGENT, MemoryType::Semantic, "probe");
    let err = engine
        .discover_connections("", AGENT, &memory, engram_core::DiscoverOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "validation");
}

#[tokio::test]
async fn tier_get_by_id_enforces_type_integrity() {
    let ts = TestSystem::new().expect("system");
    let id = ts
        .system
        .semantic()
        .store(
            USER,
            AGENT,
            "water boils at 100 degrees",
            engram_core::SemanticStoreOptions::default(),
        )
        .await
        .expect("store");

    assert!(ts
        .system
        .semantic()
        .get_by_id(USER, &id)
        .await
        .unwrap()
        .is_some());
    assert!(ts.system.working().get_by_id(USER, &id).await.unwrap().is_none());
    assert!(ts.system.episodic().get_by_id(USER, &id).await.unwrap().is_none());
    assert!(ts
        .system
        .procedural()
        .get_by_id(USER, &id)
        .await
        .unwrap()
        .is_none());
}

#[test]
fn connection_types_are_a_closed_set() {
    for name in ["similar", "related", "causes", "part_of", "opposite"] {
        assert!(name.parse::<ConnectionType>().is_ok());
    }
    for name in ["follows", "mentor", "SIMILAR", ""] {
        let err = name.parse::<ConnectionType>().unwrap_err();
        assert_eq!(err.kind(), "validation");
    }
}

#[tokio::test]
async fn out_of_range_connection_strength_is_rejected() {
    let storage = InMemoryStorage::new();
    let a = storage
        .store(USER, AGENT, MemoryData::new(MemoryType::Semantic, "a"))
        .await
        .unwrap();
    let b = storage
        .store(USER, AGENT, MemoryData::new(MemoryType::Semantic, "b"))
        .await
        .unwrap();

    let bad = Connection::new(a, b, ConnectionType::Related, 1.5, "too strong");
    let err = storage.create_connections(USER, &[bad]).await.unwrap_err();
    assert_eq!(err.kind(), "validation");
}

#[tokio::test]
#[serial]
async fn invalid_threshold_ordering_fails_construction() {
    unsafe {
        std::env::remove_var("ENGRAM_TEST_MODE");
        std::env::remove_var("NODE_ENV");
    }
    let mut config = test_config();
    config.connection_detection.thresholds.auto_similar = 0.4;
    config.connection_detection.thresholds.auto_related = 0.6;
    config.connection_detection.thresholds.llm_required = 0.3;

    let storage = Arc::new(InMemoryStorage::new());
    let embeddings =
        Arc::new(EmbeddingService::from_config(config.embedding.clone()).expect("embeddings"));
    let cost_tracker: Arc<dyn CostTracker> = Arc::new(InMemoryCostTracker::new());
    let err = ConnectionEngine::new(
        storage as Arc<dyn StorageProvider>,
        embeddings,
        cost_tracker,
        None,
        config,
    )
    .unwrap_err();
    assert_eq!(err.kind(), "validation");
}

#[tokio::test]
async fn working_memories_without_session_project_to_nothing() {
    let ts = TestSystem::new().expect("system");
    // Stored through the raw contract with no session id: the facade must
    // not fabricate one.
    let id = ts
        .storage
        .store(USER, AGENT, MemoryData::new(MemoryType::Working, "orphan"))
        .await
        .unwrap();
    assert!(ts.system.working().get_by_id(USER, &id).await.unwrap().is_none());
}

#[tokio::test]
async fn cached_recall_equals_uncached_recall() {
    let ts = TestSystem::new().expect("system");
    ts.system
        .store(USER, AGENT, "Rust ownership prevents data races", Some(MemoryType::Semantic))
        .await
        .expect("store");
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let query = RecallQuery {
        user_id: USER.into(),
        agent_id: AGENT.into(),
        query: "ownership".into(),
        ..RecallQuery::default()
    };
    let first = ts.system.recall(&query).await.expect("first");
    let second = ts.system.recall(&query).await.expect("second");

    assert_eq!(first.memories.len(), second.memories.len());
    assert_eq!(first.search_strategy, second.search_strategy);
    for (a, b) in first.memories.iter().zip(second.memories.iter()) {
        assert_eq!(a.memory.id, b.memory.id);
        assert!((a.relevance - b.relevance).abs() < 1e-12);
    }
    assert!(ts.system.recall_service().metrics().cache_hit_rate > 0.0);
}

#[tokio::test]
#[serial]
async fn llm_augmentation_respects_budget() {
    unsafe {
        std::env::set_var("CONNECTION_API_KEY", "test-key");
    }
    let storage = Arc::new(InMemoryStorage::new());
    for i in 0..25 {
        storage
            .store(
                USER,
                AGENT,
                MemoryData::new(MemoryType::Episodic, &format!("activity entry {i}")),
            )
            .await
            .unwrap();
    }

    let mut config = test_config();
    config.temporal.enable_llm_enhancement = true;
    config.cost_control.monthly_budget = Some(1.0);

    // Exhaust the budget up front.
    let cost_tracker = Arc::new(InMemoryCostTracker::new());
    cost_tracker
        .track_extraction(
            AGENT,
            ExtractionUsage {
                extractor_type: "connection-classification-standard".into(),
                cost: 2.0,
                memories_extracted: 0,
                messages_processed: 0,
                metadata: serde_json::Map::new(),
            },
        )
        .await
        .unwrap();

    let factory = Arc::new(MockLlmFactory::new());
    let analyzer = TemporalPatternAnalyzer::new(
        Arc::clone(&storage) as Arc<dyn StorageProvider>,
        Arc::clone(&cost_tracker) as Arc<dyn CostTracker>,
        Some(Arc::clone(&factory) as Arc<dyn LlmClientFactory>),
        config.clone(),
    );
    analyzer
        .analyze_patterns(AGENT, None, Some(USER))
        .await
        .expect("analyze");
    assert_eq!(
        factory.client().call_count(),
        0,
        "over budget: the LLM must not run"
    );

    // Under budget the augmentation call goes out.
    let fresh_tracker: Arc<dyn CostTracker> = Arc::new(InMemoryCostTracker::new());
    let allowed_factory = Arc::new(MockLlmFactory::new());
    allowed_factory.client().push_response(Ok(serde_json::json!({
        "patterns": [{"type": "daily", "confidence": 0.7, "description": "morning work"}]
    })));
    let analyzer = TemporalPatternAnalyzer::new(
        storage as Arc<dyn StorageProvider>,
        fresh_tracker,
        Some(Arc::clone(&allowed_factory) as Arc<dyn LlmClientFactory>),
        config,
    );
    analyzer
        .analyze_patterns(AGENT, None, Some(USER))
        .await
        .expect("analyze");
    unsafe {
        std::env::remove_var("CONNECTION_API_KEY");
    }
    assert_eq!(allowed_factory.client().call_count(), 1);
}

#[tokio::test]
async fn min_relevance_boundaries() {
    let ts = TestSystem::new().expect("system");
    ts.system
        .store(USER, AGENT, "exact match phrase", Some(MemoryType::Semantic))
        .await
        .unwrap();
    ts.system
        .store(USER, AGENT, "entirely unrelated gardening notes", Some(MemoryType::Semantic))
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let query = |min_relevance| RecallQuery {
        user_id: USER.into(),
        agent_id: AGENT.into(),
        query: "exact match phrase".into(),
        min_relevance,
        ..RecallQuery::default()
    };

    // min_relevance = 0 disables filtering entirely.
    let open = ts.system.recall(&query(Some(0.0))).await.unwrap();
    assert!(open.memories.len() >= 2);

    // min_relevance = 1 keeps only the exact match.
    let strict = ts.system.recall(&query(Some(1.0))).await.unwrap();
    assert_eq!(strict.memories.len(), 1);
    assert_eq!(strict.memories[0].memory.content, "exact match phrase");

    let err = ts.system.recall(&query(Some(1.5))).await.unwrap_err();
    assert_eq!(err.kind(), "validation");
}

#[tokio::test]
async fn limit_boundaries() {
    let ts = TestSystem::new().expect("system");
    ts.system
        .store(USER, AGENT, "some fact", Some(MemoryType::Semantic))
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let query = |limit| RecallQuery {
        user_id: USER.into(),
        agent_id: AGENT.into(),
        query: "fact".into(),
        limit,
        ..RecallQuery::default()
    };

    let zero = ts.system.recall(&query(Some(0))).await.unwrap();
    assert!(zero.memories.is_empty());

    let err = ts.system.recall(&query(Some(1001))).await.unwrap_err();
    assert_eq!(err.kind(), "validation");

    assert!(!ts.system.recall(&query(None)).await.unwrap().memories.is_empty());
}

#[tokio::test]
async fn expired_working_memories_vanish() {
    let ts = TestSystem::new().expect("system");
    let id = ts
        .system
        .working()
        .store(
            USER,
            AGENT,
            "ephemeral scratch note",
            engram_core::WorkingStoreOptions {
                ttl_seconds: Some(0),
                ..engram_core::WorkingStoreOptions::default()
            },
        )
        .await
        .unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    assert!(ts.system.working().get_by_id(USER, &id).await.unwrap().is_none());
    let recalled = ts
        .system
        .working()
        .recall(USER, AGENT, "scratch", 10)
        .await
        .unwrap();
    assert!(recalled.is_empty());
}

#[tokio::test]
async fn update_round_trip_bumps_updated_at() {
    let ts = TestSystem::new().expect("system");
    let id = ts
        .storage
        .store(USER, AGENT, MemoryData::new(MemoryType::Semantic, "version one"))
        .await
        .unwrap();
    let before = ts.storage.get_by_id(USER, &id).await.unwrap().unwrap();

    ts.storage
        .update(
            USER,
            AGENT,
            &id,
            MemoryUpdate {
                content: Some("version two".into()),
                ..MemoryUpdate::default()
            },
        )
        .await
        .unwrap();

    let after = ts.storage.get_by_id(USER, &id).await.unwrap().unwrap();
    assert_eq!(after.content, "version two");
    assert!(after.updated_at > before.updated_at);
    assert_eq!(after.memory_type, before.memory_type);
}

#[tokio::test]
async fn stats_total_is_sum_of_by_type() {
    let ts = TestSystem::new().expect("system");
    ts.system
        .store(USER, AGENT, "fact one", Some(MemoryType::Semantic))
        .await
        .unwrap();
    ts.system
        .store(USER, AGENT, "what happened earlier", Some(MemoryType::Episodic))
        .await
        .unwrap();
    ts.system
        .store(USER, AGENT, "error -> retry", Some(MemoryType::Procedural))
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let stats = ts.system.stats(USER, Some(AGENT)).await.unwrap();
    assert_eq!(stats.total_memories, 3);
    assert_eq!(stats.total_memories, stats.by_type.values().sum::<usize>());
    assert!(stats.avg_importance > 0.0);
    assert!(stats.total_size > 0);
}

#[tokio::test]
async fn procedural_recommendations_filter_adapt_and_merge() {
    let ts = TestSystem::new().expect("system");
    let procedural = ts.system.procedural();

    // A pattern with a recorded failure sits below the default success
    // floor of 0.6 and must not be recommended.
    procedural
        .store(
            USER,
            AGENT,
            "build fails -> delete the repository",
            engram_core::ProceduralStoreOptions {
                trigger: Some("build fails".into()),
                action: Some("delete the repository".into()),
                success: Some(false),
                ..engram_core::ProceduralStoreOptions::default()
            },
        )
        .await
        .expect("store failing pattern");

    // Two near-identical successful patterns collapse into one.
    for _ in 0..2 {
        procedural
            .store(
                USER,
                AGENT,
                "build fails -> run cargo clean",
                engram_core::ProceduralStoreOptions {
                    trigger: Some("build fails".into()),
                    action: Some("run cargo clean".into()),
                    success: Some(true),
                    ..engram_core::ProceduralStoreOptions::default()
                },
            )
            .await
            .expect("store successful pattern");
    }

    let matches = procedural
        .get_recommended_actions(USER, AGENT, "build fails", None)
        .await
        .expect("recommend");

    assert!(
        matches
            .iter()
            .all(|m| m.pattern.action != "delete the repository"),
        "failing pattern must be filtered out"
    );
    assert_eq!(matches.len(), 1, "duplicates must merge: {matches:?}");

    // Adaptive learning nudges the reported confidence above the stored
    // default for a pattern with a recorded success.
    let recommendation = &matches[0];
    assert_eq!(recommendation.pattern.action, "run cargo clean");
    assert!(
        recommendation.confidence > recommendation.pattern.confidence,
        "confidence {} should exceed stored {}",
        recommendation.confidence,
        recommendation.pattern.confidence
    );
}

#[tokio::test]
async fn destroyed_queue_rejects_enqueues() {
    let ts = TestSystem::new().expect("system");
    let engine = ts.system.connection_engine().expect("engine");
    engine.destroy();

    let err = engine
        .enqueue_discovery(USER, AGENT, "some-memory")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("queue destroyed"));
}

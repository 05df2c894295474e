//! End-to-end scenarios over the assembled system: hybrid recall, burst
//! patterns feeding triage, the smart-triage bands, the pre-LLM cost cap,
//! graph-enriched recall, cache cleanup, and user isolation.

use std::sync::Arc;

use serial_test::serial;

use engram_core::{
    ConnectionEngine, ConnectionType, CostTracker, DiscoverOptions, EmbeddingService,
    InMemoryCostTracker, IntelligenceLayerConfig, LlmClientFactory, MemoryStorage, MemoryType,
    PatternKind, RecallQuery, StorageProvider, TriageMethod,
};
use engram_storage_mem::InMemoryStorage;
use test_utils::{burst_contents, test_config, MockLlmFactory, TestSystem};

mod common;

const USER: &str = "alice";
const AGENT: &str = "shared";

fn system() -> TestSystem {
    common::init_tracing();
    TestSystem::new().expect("system")
}

/// A bare connection engine over fresh storage, for tests that must control
/// exactly which discoveries run.
fn engine_fixture(
    config: IntelligenceLayerConfig,
) -> (Arc<InMemoryStorage>, Arc<MockLlmFactory>, ConnectionEngine) {
    let storage = Arc::new(InMemoryStorage::new());
    let embeddings =
        Arc::new(EmbeddingService::from_config(config.embedding.clone()).expect("embeddings"));
    let cost_tracker: Arc<dyn CostTracker> = Arc::new(InMemoryCostTracker::new());
    let factory = Arc::new(MockLlmFactory::new());
    let engine = ConnectionEngine::new(
        Arc::clone(&storage) as Arc<dyn StorageProvider>,
        embeddings,
        cost_tracker,
        Some(Arc::clone(&factory) as Arc<dyn LlmClientFactory>),
        config,
    )
    .expect("engine");
    (storage, factory, engine)
}

async fn store_semantic(storage: &InMemoryStorage, content: &str) -> String {
    storage
        .store(
            USER,
            AGENT,
            engram_core::MemoryData::new(MemoryType::Semantic, content),
        )
        .await
        .expect("store")
}

#[tokio::test]
async fn s1_hybrid_recall_with_hybrid_capable_storage() {
    let ts = system();
    ts.system
        .semantic()
        .store(
            USER,
            AGENT,
            "JavaScript arrays are ordered lists.",
            engram_core::SemanticStoreOptions {
                confidence: Some(0.9),
                ..engram_core::SemanticStoreOptions::default()
            },
        )
        .await
        .expect("store");

    let result = ts
        .system
        .recall(&RecallQuery {
            user_id: USER.into(),
            agent_id: AGENT.into(),
            query: "array".into(),
            memory_types: Some(vec![MemoryType::Semantic]),
            ..RecallQuery::default()
        })
        .await
        .expect("recall");

    assert_eq!(result.memories.len(), 1);
    assert!(
        result.search_strategy.contains("vector+text"),
        "strategy was {}",
        result.search_strategy
    );
    let hit = &result.memories[0];
    assert!(hit.relevance > 0.5, "relevance was {}", hit.relevance);
    assert!(hit.from_hybrid_search());
}

#[tokio::test]
async fn s2_burst_yields_pattern_and_temporal_edges() {
    let ts = system();
    let contents = burst_contents("deployment", 5);
    ts.store_all(USER, AGENT, MemoryType::Episodic, &contents)
        .await
        .expect("store burst");

    let patterns = ts
        .system
        .temporal_analyzer()
        .analyze_patterns(AGENT, None, Some(USER))
        .await
        .expect("analyze");
    let burst = patterns
        .iter()
        .find(|p| p.kind == PatternKind::Burst)
        .expect("burst pattern detected");
    assert!(burst.confidence >= 0.5, "confidence {}", burst.confidence);
    assert_eq!(burst.memories.len(), 5);

    // A sixth memory inside the burst window picks up the shared-burst
    // shortcut during discovery.
    let sixth = ts
        .system
        .store(
            USER,
            AGENT,
            "deployment observation six with detail 4242",
            Some(MemoryType::Episodic),
        )
        .await
        .expect("store sixth");
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    ts.system
        .temporal_analyzer()
        .analyze_patterns(AGENT, None, Some(USER))
        .await
        .expect("re-analyze");

    let memory = ts
        .storage
        .get_by_id(USER, &sixth)
        .await
        .expect("get")
        .expect("sixth exists");
    assert!(
        !memory.temporal_patterns().is_empty(),
        "insights were written back"
    );

    let engine = ts.system.connection_engine().expect("engine");
    let connections = engine
        .discover_connections(USER, AGENT, &memory, DiscoverOptions::default())
        .await
        .expect("discover");
    assert!(
        connections
            .iter()
            .any(|c| c.connection_type == ConnectionType::Related && c.reason.contains("burst")),
        "expected a burst-derived related edge, got {connections:?}"
    );
}

fn banded_config() -> IntelligenceLayerConfig {
    let mut config = test_config();
    config.connection_detection.thresholds.auto_similar = 0.95;
    config.connection_detection.thresholds.auto_related = 0.7;
    config.connection_detection.thresholds.llm_required = 0.3;
    config
}

#[tokio::test]
async fn s3_auto_similar_band_skips_llm() {
    let (storage, factory, engine) = engine_fixture(banded_config());
    store_semantic(&storage, "deploy the billing service to production cluster").await;
    let probe_id =
        store_semantic(&storage, "deploy the billing service to production cluster").await;
    let probe = storage.get_by_id(USER, &probe_id).await.unwrap().unwrap();

    let connections = engine
        .discover_connections(USER, AGENT, &probe, DiscoverOptions::default())
        .await
        .expect("discover");

    assert_eq!(factory.client().call_count(), 0);
    let edge = connections
        .iter()
        .find(|c| c.metadata.triage_method == Some(TriageMethod::AutoSimilar))
        .expect("auto-similar edge");
    assert_eq!(edge.connection_type, ConnectionType::Similar);
    assert!(!edge.metadata.llm_used);
    assert!(edge.strength >= 0.95);
}

#[tokio::test]
async fn s3_auto_related_band_skips_llm() {
    let (storage, factory, engine) = engine_fixture(banded_config());
    store_semantic(
        &storage,
        "review the quarterly budget spreadsheet for marketing group",
    )
    .await;
    let probe_id = store_semantic(
        &storage,
        "review the quarterly budget spreadsheet for finance team",
    )
    .await;
    let probe = storage.get_by_id(USER, &probe_id).await.unwrap().unwrap();

    let connections = engine
        .discover_connections(USER, AGENT, &probe, DiscoverOptions::default())
        .await
        .expect("discover");

    assert_eq!(factory.client().call_count(), 0);
    let edge = connections
        .iter()
        .find(|c| c.metadata.triage_method == Some(TriageMethod::AutoRelated))
        .expect("auto-related edge");
    assert_eq!(edge.connection_type, ConnectionType::Related);
    assert!(!edge.metadata.llm_used);
}

#[tokio::test]
#[serial]
async fn s3_middle_band_invokes_llm() {
    unsafe {
        std::env::set_var("CONNECTION_API_KEY", "test-key");
    }
    let (storage, factory, engine) = engine_fixture(banded_config());
    store_semantic(&storage, "watering schedule for tomato seedlings indoors").await;
    let probe_id = store_semantic(&storage, "kernel scheduler latency regression report").await;
    let probe = storage.get_by_id(USER, &probe_id).await.unwrap().unwrap();

    let connections = engine
        .discover_connections(USER, AGENT, &probe, DiscoverOptions::default())
        .await
        .expect("discover");
    unsafe {
        std::env::remove_var("CONNECTION_API_KEY");
    }

    assert_eq!(factory.client().call_count(), 1);
    let edge = connections
        .iter()
        .find(|c| c.metadata.triage_method == Some(TriageMethod::LlmClassified))
        .expect("llm-classified edge");
    assert!(edge.metadata.llm_used);
    assert!(ConnectionType::ALL.contains(&edge.connection_type));
}

#[tokio::test]
#[serial]
async fn s4_cost_cap_bounds_llm_calls_to_top_candidates() {
    unsafe {
        std::env::set_var("CONNECTION_API_KEY", "test-key");
    }
    let mut config = test_config();
    // Everything lands in the LLM band.
    config.connection_detection.thresholds.auto_similar = 0.99;
    config.connection_detection.thresholds.auto_related = 0.98;
    config.connection_detection.thresholds.llm_required = 0.01;
    config.connection_detection.max_candidates = 100;
    config.cost_control.max_llm_calls_per_batch = 10;
    let (storage, factory, engine) = engine_fixture(config);

    let mut strong_ids = Vec::new();
    for i in 0..10 {
        strong_ids.push(
            store_semantic(
                &storage,
                &format!("alpha beta gamma delta epsilon zeta variant {i}"),
            )
            .await,
        );
    }
    for i in 0..40 {
        store_semantic(&storage, &format!("alpha beta filler words number {i}")).await;
    }
    let probe_id = store_semantic(&storage, "alpha beta gamma delta epsilon zeta").await;
    let probe = storage.get_by_id(USER, &probe_id).await.unwrap().unwrap();

    let connections = engine
        .discover_connections(USER, AGENT, &probe, DiscoverOptions::default())
        .await
        .expect("discover");
    unsafe {
        std::env::remove_var("CONNECTION_API_KEY");
    }

    assert_eq!(
        factory.client().call_count(),
        10,
        "exactly the capped number of LLM calls"
    );
    let llm_targets: Vec<&String> = connections
        .iter()
        .filter(|c| c.metadata.llm_used)
        .map(|c| &c.target_memory_id)
        .collect();
    assert_eq!(llm_targets.len(), 10);
    for target in llm_targets {
        assert!(
            strong_ids.contains(target),
            "only the most similar candidates reach the LLM"
        );
    }
}

#[tokio::test]
async fn s5_recall_attaches_graph_connected_memories() {
    let ts = system();
    // Tier facades do not enqueue background discovery, keeping the
    // connection set exactly what this test creates.
    let a = ts
        .system
        .semantic()
        .store(
            USER,
            AGENT,
            "the quantum computing lecture notes from yesterday",
            engram_core::SemanticStoreOptions::default(),
        )
        .await
        .expect("store a");
    let b = ts
        .system
        .episodic()
        .store(
            USER,
            AGENT,
            "completely different pasta recipe content",
            engram_core::EpisodicStoreOptions::default(),
        )
        .await
        .expect("store b");

    let mut connection = engram_core::Connection::new(
        a.clone(),
        b.clone(),
        ConnectionType::Related,
        0.9,
        "manual link",
    );
    connection.metadata.embedding_similarity = Some(0.9);
    ts.storage
        .create_connections(USER, &[connection])
        .await
        .expect("connect");

    let result = ts
        .system
        .recall(&RecallQuery {
            user_id: USER.into(),
            agent_id: AGENT.into(),
            query: "quantum".into(),
            memory_types: Some(vec![MemoryType::Semantic]),
            use_connections: Some(true),
            connection_hops: Some(1),
            ..RecallQuery::default()
        })
        .await
        .expect("recall");

    let seed = result
        .memories
        .iter()
        .find(|m| m.memory.id == a)
        .expect("seed memory in results");
    let enriched = result
        .memories
        .iter()
        .find(|m| m.memory.id == b)
        .expect("connected memory attached");

    assert_eq!(
        enriched.enrichment.get("connectionSource").and_then(|v| v.as_str()),
        Some(a.as_str())
    );
    assert_eq!(
        enriched.enrichment.get("hopsFromQuery").and_then(|v| v.as_i64()),
        Some(1)
    );
    let expected = seed.relevance * 0.7 * 0.9;
    assert!(
        (enriched.relevance - expected).abs() < 1e-9,
        "expected {expected}, got {}",
        enriched.relevance
    );
}

#[tokio::test]
async fn s5_two_hop_enrichment_chains_path_strength() {
    let ts = system();
    let a = ts
        .system
        .semantic()
        .store(
            USER,
            AGENT,
            "the quantum computing lecture notes from yesterday",
            engram_core::SemanticStoreOptions::default(),
        )
        .await
        .expect("store a");
    let b = ts
        .system
        .episodic()
        .store(
            USER,
            AGENT,
            "completely different pasta recipe content",
            engram_core::EpisodicStoreOptions::default(),
        )
        .await
        .expect("store b");
    let c = ts
        .system
        .episodic()
        .store(
            USER,
            AGENT,
            "unrelated gardening journal entry",
            engram_core::EpisodicStoreOptions::default(),
        )
        .await
        .expect("store c");

    ts.storage
        .create_connections(
            USER,
            &[
                engram_core::Connection::new(
                    a.clone(),
                    b.clone(),
                    ConnectionType::Related,
                    0.9,
                    "first hop",
                ),
                engram_core::Connection::new(
                    b.clone(),
                    c.clone(),
                    ConnectionType::Related,
                    0.8,
                    "second hop",
                ),
            ],
        )
        .await
        .expect("connect");

    let result = ts
        .system
        .recall(&RecallQuery {
            user_id: USER.into(),
            agent_id: AGENT.into(),
            query: "quantum".into(),
            memory_types: Some(vec![MemoryType::Semantic]),
            use_connections: Some(true),
            connection_hops: Some(2),
            ..RecallQuery::default()
        })
        .await
        .expect("recall");

    let seed = result
        .memories
        .iter()
        .find(|m| m.memory.id == a)
        .expect("seed memory in results");
    let one_hop = result
        .memories
        .iter()
        .find(|m| m.memory.id == b)
        .expect("one-hop memory attached");
    let two_hops = result
        .memories
        .iter()
        .find(|m| m.memory.id == c)
        .expect("two-hop memory attached");

    assert_eq!(
        one_hop.enrichment.get("hopsFromQuery").and_then(|v| v.as_i64()),
        Some(1)
    );
    assert_eq!(
        two_hops.enrichment.get("hopsFromQuery").and_then(|v| v.as_i64()),
        Some(2)
    );
    assert_eq!(
        two_hops
            .enrichment
            .get("connectionStrength")
            .and_then(|v| v.as_f64()),
        Some(0.9 * 0.8)
    );
    let expected = seed.relevance * 0.7 * (0.9 * 0.8);
    assert!(
        (two_hops.relevance - expected).abs() < 1e-9,
        "expected {expected}, got {}",
        two_hops.relevance
    );
    assert!(two_hops.relevance < one_hop.relevance);
}

#[tokio::test]
async fn s6_cache_cleanup_trims_and_destroy_cancels() {
    let mut config = test_config();
    config.recall.cache_high_water = 50;
    config.recall.cache_low_water = 40;
    let ts = TestSystem::with_config(config).expect("system");

    ts.system
        .store(USER, AGENT, "a single memory to recall", Some(MemoryType::Semantic))
        .await
        .expect("store");

    for i in 0..60 {
        ts.system
            .recall(&RecallQuery {
                user_id: USER.into(),
                agent_id: AGENT.into(),
                query: format!("memory probe number {i}"),
                ..RecallQuery::default()
            })
            .await
            .expect("recall");
    }
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    assert!(
        ts.system.recall_service().cache_len() <= 40,
        "cache was {} entries",
        ts.system.recall_service().cache_len()
    );

    ts.system.recall_service().destroy();
    assert_eq!(ts.system.recall_service().cache_len(), 0);
    // Destroy is idempotent.
    ts.system.recall_service().destroy();
}

#[tokio::test]
async fn s7_users_are_strictly_isolated() {
    let ts = system();
    let alice_id = ts
        .system
        .store(USER, AGENT, "our shared secret plan", Some(MemoryType::Semantic))
        .await
        .expect("store alice");
    ts.system
        .store("bob", AGENT, "our shared secret plan", Some(MemoryType::Semantic))
        .await
        .expect("store bob");
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    for user in [USER, "bob"] {
        let result = ts
            .system
            .recall(&RecallQuery {
                user_id: user.into(),
                agent_id: AGENT.into(),
                query: "secret plan".into(),
                ..RecallQuery::default()
            })
            .await
            .expect("recall");
        assert!(!result.memories.is_empty());
        assert!(result.memories.iter().all(|m| m.memory.user_id == user));
    }

    let cross = ts
        .storage
        .get_connections_for_memories("bob", &[alice_id.clone()])
        .await
        .expect("cross lookup");
    assert!(cross.is_empty());
    assert!(ts.storage.get_by_id("bob", &alice_id).await.unwrap().is_none());
}

//! # Test Utilities
//!
//! Shared test helpers for the engram workspace:
//! - a scripted mock LLM client and factory with call counting
//! - memory fixtures (including burst generators for temporal tests)
//! - a pre-wired [`TestSystem`] over the in-memory storage backend

#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::RngExt;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use engram_core::{
    Error, GenerateObjectRequest, GenerateObjectResponse, IntelligenceLayerConfig, LlmClient,
    LlmClientFactory, LlmTarget, Memory, MemorySystem, MemoryType, Result, TokenUsage,
};
use engram_storage_mem::InMemoryStorage;

/// One scripted response: a structured object or an error message.
pub type ScriptedResponse = std::result::Result<Value, String>;

/// Mock structured-output client. Pops scripted responses in order and falls
/// back to a benign `related` classification when the script runs dry.
#[derive(Default)]
pub struct MockLlmClient {
    script: Mutex<VecDeque<ScriptedResponse>>,
    calls: Mutex<Vec<GenerateObjectRequest>>,
}

impl MockLlmClient {
    /// Client with an empty script (every call returns the default object).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a scripted response to the back of the queue.
    pub fn push_response(&self, response: ScriptedResponse) {
        self.script.lock().push_back(response);
    }

    /// Number of `generate_object` calls made so far.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Copies of every request seen so far.
    #[must_use]
    pub fn requests(&self) -> Vec<GenerateObjectRequest> {
        self.calls.lock().clone()
    }

    fn default_object() -> Value {
        json!({
            "connectionType": "related",
            "confidence": 0.75,
            "reasoning": "mock classification",
        })
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn generate_object(
        &self,
        request: GenerateObjectRequest,
    ) -> Result<GenerateObjectResponse> {
        self.calls.lock().push(request);
        let scripted = self.script.lock().pop_front();
        let object = match scripted {
            Some(Ok(object)) => object,
            Some(Err(message)) => return Err(Error::Llm(message)),
            None => Self::default_object(),
        };
        Ok(GenerateObjectResponse {
            object,
            usage: TokenUsage {
                prompt_tokens: 120,
                completion_tokens: 30,
                total_tokens: 150,
            },
        })
    }
}

/// Factory handing out one shared [`MockLlmClient`], recording every target
/// it was asked for.
pub struct MockLlmFactory {
    client: Arc<MockLlmClient>,
    targets: Mutex<Vec<LlmTarget>>,
}

impl Default for MockLlmFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLlmFactory {
    /// Factory over a fresh client.
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: Arc::new(MockLlmClient::new()),
            targets: Mutex::new(Vec::new()),
        }
    }

    /// The shared client, for scripting and call assertions.
    #[must_use]
    pub fn client(&self) -> Arc<MockLlmClient> {
        Arc::clone(&self.client)
    }

    /// Every target resolved through this factory.
    #[must_use]
    pub fn targets(&self) -> Vec<LlmTarget> {
        self.targets.lock().clone()
    }
}

impl LlmClientFactory for MockLlmFactory {
    fn create(&self, target: &LlmTarget) -> Result<Arc<dyn LlmClient>> {
        self.targets.lock().push(target.clone());
        Ok(self.client())
    }
}

/// A standalone memory record for unit tests that bypass storage.
#[must_use]
pub fn memory_fixture(
    user_id: &str,
    agent_id: &str,
    memory_type: MemoryType,
    content: &str,
) -> Memory {
    memory_fixture_at(user_id, agent_id, memory_type, content, Utc::now())
}

/// A memory fixture with an explicit creation time.
#[must_use]
pub fn memory_fixture_at(
    user_id: &str,
    agent_id: &str,
    memory_type: MemoryType,
    content: &str,
    created_at: DateTime<Utc>,
) -> Memory {
    Memory {
        id: Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        agent_id: agent_id.to_string(),
        memory_type,
        content: content.to_string(),
        importance: memory_type.default_importance(),
        resonance: 1.0,
        access_count: 0,
        created_at,
        updated_at: created_at,
        last_accessed_at: created_at,
        session_id: None,
        token_count: Some(Memory::estimate_tokens(content)),
        keywords: Vec::new(),
        embedding_id: None,
        metadata: Map::new(),
    }
}

/// Distinct sentences with a shared topic word, for burst/cluster tests.
#[must_use]
pub fn burst_contents(topic: &str, count: usize) -> Vec<String> {
    let mut rng = rand::rng();
    (0..count)
        .map(|i| {
            let noise: u32 = rng.random_range(0..10_000);
            format!("{topic} observation {i} with detail {noise}")
        })
        .collect()
}

/// A mock-embedding configuration with connection discovery enabled and no
/// monthly budget.
#[must_use]
pub fn test_config() -> IntelligenceLayerConfig {
    let mut config = IntelligenceLayerConfig::default();
    config.embedding.provider = Some("mock".into());
    config
}

/// A fully assembled system over in-memory storage, the mock embedding
/// provider, and the scripted mock LLM.
pub struct TestSystem {
    pub storage: Arc<InMemoryStorage>,
    pub system: MemorySystem,
    pub llm: Arc<MockLlmFactory>,
}

impl TestSystem {
    /// Build with the default test configuration.
    pub fn new() -> Result<Self> {
        Self::with_config(test_config())
    }

    /// Build with a custom configuration.
    pub fn with_config(config: IntelligenceLayerConfig) -> Result<Self> {
        let storage = Arc::new(InMemoryStorage::new());
        let llm = Arc::new(MockLlmFactory::new());
        let system = MemorySystem::builder(Arc::clone(&storage) as Arc<dyn engram_core::StorageProvider>)
            .config(config)
            .llm_factory(Arc::clone(&llm) as Arc<dyn LlmClientFactory>)
            .build()?;
        Ok(Self {
            storage,
            system,
            llm,
        })
    }

    /// Store a batch of contents into one tier, returning the ids in order.
    pub async fn store_all(
        &self,
        user_id: &str,
        agent_id: &str,
        memory_type: MemoryType,
        contents: &[String],
    ) -> Result<Vec<String>> {
        let mut ids = Vec::with_capacity(contents.len());
        for content in contents {
            ids.push(
                self.system
                    .store(user_id, agent_id, content, Some(memory_type))
                    .await?,
            );
        }
        // Let background discovery tasks drain before assertions.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        Ok(ids)
    }
}

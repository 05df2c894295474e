//! LLM collaboration contract.
//!
//! The engine only consumes structured JSON objects; providers live outside
//! the core behind [`LlmClient`]. This module also carries the fixed
//! two-tier model-selection policy and the provider/key/model environment
//! cascades for classification calls.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{env_flag, ConnectionDetectionConfig};
use crate::constants::env_vars;
use crate::error::{Error, Result};
use crate::types::Memory;

/// One chat message in a structured-output request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmMessage {
    /// `system`, `user`, or `assistant`.
    pub role: String,
    /// Message text.
    pub content: String,
}

impl LlmMessage {
    /// Convenience constructor for a system message.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    /// Convenience constructor for a user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
}

/// Structured-output request. `schema_name` names the expected object shape;
/// the caller validates the returned object by deserializing it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateObjectRequest {
    /// Conversation handed to the provider.
    pub messages: Vec<LlmMessage>,
    /// Sampling temperature.
    pub temperature: f32,
    /// Completion cap.
    pub max_tokens: u32,
    /// Logical schema the response must satisfy.
    pub schema_name: String,
}

/// Token accounting attached to every structured-output response.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Structured-output response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateObjectResponse {
    /// The JSON object emitted by the provider.
    pub object: Value,
    /// Token usage for cost accounting.
    pub usage: TokenUsage,
}

/// Structured-output client contract.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Run one structured-output generation.
    async fn generate_object(&self, request: GenerateObjectRequest)
        -> Result<GenerateObjectResponse>;
}

/// Builds clients for resolved targets. Injected at engine construction so
/// tests can script responses.
pub trait LlmClientFactory: Send + Sync {
    /// Create (or reuse) a client for the target.
    fn create(&self, target: &LlmTarget) -> Result<Arc<dyn LlmClient>>;
}

/// Model quality tier for classification calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    Standard,
    Advanced,
}

impl ModelTier {
    /// Wire name used in extractor labels.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ModelTier::Standard => "standard",
            ModelTier::Advanced => "advanced",
        }
    }

    /// Fixed tier-selection policy for a classification between two
    /// memories. The memories are borrowed per-call context only; nothing is
    /// retained afterwards.
    #[must_use]
    pub fn select(source: &Memory, target: &Memory) -> Self {
        if std::env::var(env_vars::CONNECTION_ALWAYS_ADVANCED).is_ok_and(|v| env_flag(&v)) {
            return ModelTier::Advanced;
        }
        if source.importance > 0.8 || target.importance > 0.8 {
            return ModelTier::Advanced;
        }
        if source.content.len() + target.content.len() > 500 {
            return ModelTier::Advanced;
        }
        let production = std::env::var(env_vars::NODE_ENV).is_ok_and(|v| v == "production");
        let prefer_quality =
            std::env::var(env_vars::CONNECTION_PREFER_QUALITY).is_ok_and(|v| env_flag(&v));
        if production && prefer_quality {
            return ModelTier::Advanced;
        }
        ModelTier::Standard
    }
}

/// A fully resolved classification target: provider, model, credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmTarget {
    pub provider: String,
    pub model: String,
    pub api_key: String,
    pub tier: ModelTier,
}

/// Built-in model defaults per provider and tier.
fn default_model(provider: &str, tier: ModelTier) -> String {
    match (provider, tier) {
        ("anthropic", ModelTier::Standard) => "claude-3-haiku".into(),
        ("anthropic", ModelTier::Advanced) => "claude-3-sonnet".into(),
        ("google", ModelTier::Standard) => "gemini-1.5-flash".into(),
        ("google", ModelTier::Advanced) => "gemini-1.5-pro".into(),
        (_, ModelTier::Standard) => "gpt-4.1-mini".into(),
        (_, ModelTier::Advanced) => "gpt-4.1".into(),
    }
}

/// Resolve the provider on the documented cascade:
/// `CONNECTION_PROVIDER` → `PRIME_PROVIDER` → config → `openai`.
#[must_use]
pub fn resolve_provider(config: &ConnectionDetectionConfig) -> String {
    std::env::var(env_vars::CONNECTION_PROVIDER)
        .ok()
        .filter(|v| !v.is_empty())
        .or_else(|| {
            std::env::var(env_vars::PRIME_PROVIDER)
                .ok()
                .filter(|v| !v.is_empty())
        })
        .or_else(|| config.provider.clone())
        .unwrap_or_else(|| "openai".into())
}

/// Resolve the API key: `CONNECTION_API_KEY` → `{PROVIDER}_API_KEY`.
pub fn resolve_api_key(provider: &str) -> Result<String> {
    if let Ok(key) = std::env::var(env_vars::CONNECTION_API_KEY) {
        if !key.is_empty() {
            return Ok(key);
        }
    }
    let provider_var = format!("{}_API_KEY", provider.to_uppercase());
    match std::env::var(&provider_var) {
        Ok(key) if !key.is_empty() => Ok(key),
        _ => Err(Error::LlmApiKey(format!(
            "no API key for provider '{provider}' (checked {} and {provider_var})",
            env_vars::CONNECTION_API_KEY
        ))),
    }
}

/// Resolve the model: `CONNECTION_MODEL` → tier-specific env → config →
/// provider defaults.
#[must_use]
pub fn resolve_model(provider: &str, tier: ModelTier, config: &ConnectionDetectionConfig) -> String {
    if let Ok(model) = std::env::var(env_vars::CONNECTION_MODEL) {
        if !model.is_empty() {
            return model;
        }
    }

    let tier_env = match tier {
        ModelTier::Standard => std::env::var(env_vars::CONNECTION_STANDARD_MODEL).ok(),
        ModelTier::Advanced => std::env::var(env_vars::CONNECTION_ENHANCED_MODEL)
            .ok()
            .or_else(|| std::env::var(env_vars::CONNECTION_ADVANCED_MODEL).ok()),
    };
    if let Some(model) = tier_env.filter(|m| !m.is_empty()) {
        return model;
    }

    let configured = match tier {
        ModelTier::Standard => config.model.clone(),
        ModelTier::Advanced => config.enhanced_model.clone(),
    };
    configured.unwrap_or_else(|| default_model(provider, tier))
}

impl LlmTarget {
    /// Resolve the full target for a tier.
    pub fn resolve(config: &ConnectionDetectionConfig, tier: ModelTier) -> Result<Self> {
        let provider = resolve_provider(config);
        let api_key = resolve_api_key(&provider)?;
        let model = resolve_model(&provider, tier, config);
        Ok(Self {
            provider,
            model,
            api_key,
            tier,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::Map;
    use serial_test::serial;

    fn memory(importance: f64, content: &str) -> Memory {
        let now = Utc::now();
        Memory {
            id: "m".into(),
            user_id: "alice".into(),
            agent_id: "shared".into(),
            memory_type: crate::types::MemoryType::Semantic,
            content: content.into(),
            importance,
            resonance: 1.0,
            access_count: 0,
            created_at: now,
            updated_at: now,
            last_accessed_at: now,
            session_id: None,
            token_count: None,
            keywords: vec![],
            embedding_id: None,
            metadata: Map::new(),
        }
    }

    #[test]
    #[serial]
    fn high_importance_selects_advanced_tier() {
        let a = memory(0.9, "short");
        let b = memory(0.1, "short");
        assert_eq!(ModelTier::select(&a, &b), ModelTier::Advanced);
    }

    #[test]
    #[serial]
    fn long_combined_content_selects_advanced_tier() {
        let a = memory(0.5, &"x".repeat(300));
        let b = memory(0.5, &"y".repeat(300));
        assert_eq!(ModelTier::select(&a, &b), ModelTier::Advanced);
    }

    #[test]
    #[serial]
    fn short_low_importance_selects_standard_tier() {
        let a = memory(0.5, "short");
        let b = memory(0.5, "short");
        assert_eq!(ModelTier::select(&a, &b), ModelTier::Standard);
    }

    #[test]
    #[serial]
    fn always_advanced_env_wins() {
        unsafe {
            std::env::set_var(env_vars::CONNECTION_ALWAYS_ADVANCED, "true");
        }
        let a = memory(0.1, "short");
        let b = memory(0.1, "short");
        let tier = ModelTier::select(&a, &b);
        unsafe {
            std::env::remove_var(env_vars::CONNECTION_ALWAYS_ADVANCED);
        }
        assert_eq!(tier, ModelTier::Advanced);
    }

    #[test]
    #[serial]
    fn provider_cascade_prefers_connection_provider() {
        unsafe {
            std::env::set_var(env_vars::CONNECTION_PROVIDER, "anthropic");
            std::env::set_var(env_vars::PRIME_PROVIDER, "google");
        }
        let provider = resolve_provider(&ConnectionDetectionConfig::default());
        unsafe {
            std::env::remove_var(env_vars::CONNECTION_PROVIDER);
            std::env::remove_var(env_vars::PRIME_PROVIDER);
        }
        assert_eq!(provider, "anthropic");
    }

    #[test]
    #[serial]
    fn missing_api_key_is_llm_api_key_kind() {
        unsafe {
            std::env::remove_var(env_vars::CONNECTION_API_KEY);
            std::env::remove_var("OPENAI_API_KEY");
        }
        let err = resolve_api_key("openai").unwrap_err();
        assert_eq!(err.kind(), "llm-api-key");
    }

    #[test]
    #[serial]
    fn model_cascade_falls_back_to_provider_defaults() {
        unsafe {
            std::env::remove_var(env_vars::CONNECTION_MODEL);
            std::env::remove_var(env_vars::CONNECTION_STANDARD_MODEL);
            std::env::remove_var(env_vars::CONNECTION_ENHANCED_MODEL);
            std::env::remove_var(env_vars::CONNECTION_ADVANCED_MODEL);
        }
        let config = ConnectionDetectionConfig::default();
        assert_eq!(
            resolve_model("anthropic", ModelTier::Standard, &config),
            "claude-3-haiku"
        );
        assert_eq!(
            resolve_model("openai", ModelTier::Advanced, &config),
            "gpt-4.1"
        );
    }

    #[test]
    #[serial]
    fn advanced_model_alias_is_honored() {
        unsafe {
            std::env::remove_var(env_vars::CONNECTION_MODEL);
            std::env::remove_var(env_vars::CONNECTION_ENHANCED_MODEL);
            std::env::set_var(env_vars::CONNECTION_ADVANCED_MODEL, "my-advanced");
        }
        let model = resolve_model(
            "openai",
            ModelTier::Advanced,
            &ConnectionDetectionConfig::default(),
        );
        unsafe {
            std::env::remove_var(env_vars::CONNECTION_ADVANCED_MODEL);
        }
        assert_eq!(model, "my-advanced");
    }
}

//! Smart triage and LLM classification.
//!
//! A similarity scalar is turned into a typed connection through three
//! bands: auto-similar, auto-related, and LLM-classified. A temporal
//! shortcut runs first because it is free; the LLM band is budget-gated and
//! falls back to a deterministic classifier on any failure.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::config::{ConnectionDetectionConfig, CostControlConfig, TriageThresholds};
use crate::constants::defaults;
use crate::cost::{CostTracker, ExtractionUsage};
use crate::llm::{GenerateObjectRequest, LlmClientFactory, LlmMessage, LlmTarget, ModelTier};
use crate::types::{ConnectionType, Memory, PatternKind, TriageMethod};

/// A resolved classification between two memories.
#[derive(Debug, Clone)]
pub struct Classification {
    pub connection_type: ConnectionType,
    pub confidence: f64,
    pub reason: String,
    pub triage_method: TriageMethod,
    pub llm_used: bool,
}

/// Outcome of the synchronous triage bands.
#[derive(Debug, Clone)]
pub enum TriageOutcome {
    /// Classified without an LLM call.
    Classified(Classification),
    /// Similarity landed in the LLM band.
    NeedsLlm,
}

/// Structured output contract for the classification call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationObject {
    /// One of the five wire names.
    pub connection_type: String,
    /// Confidence in [0, 1].
    pub confidence: f64,
    /// Optional rationale.
    #[serde(default)]
    pub reasoning: Option<String>,
}

/// Free temporal shortcut: shared activity patterns classify a pair without
/// touching similarity at all.
#[must_use]
pub fn temporal_shortcut(source: &Memory, target: &Memory) -> Option<Classification> {
    let source_patterns = source.temporal_patterns();
    if source_patterns.is_empty() {
        return None;
    }
    let target_patterns = target.temporal_patterns();
    if target_patterns.is_empty() {
        return None;
    }

    let burst = |patterns: &[crate::types::TemporalPattern]| {
        patterns
            .iter()
            .find(|p| p.kind == PatternKind::Burst)
            .map(|p| p.confidence)
    };
    if let (Some(source_conf), Some(target_conf)) =
        (burst(&source_patterns), burst(&target_patterns))
    {
        let gap = (source.created_at - target.created_at).num_minutes().abs();
        if gap <= defaults::BURST_WINDOW_MINUTES {
            return Some(Classification {
                connection_type: ConnectionType::Related,
                confidence: source_conf.min(target_conf),
                reason: format!("both memories belong to a burst of activity ({gap} min apart)"),
                triage_method: TriageMethod::AutoRelated,
                llm_used: false,
            });
        }
    }

    let daily = |patterns: &[crate::types::TemporalPattern]| {
        patterns
            .iter()
            .find(|p| p.kind == PatternKind::Daily)
            .map(|p| (p.confidence, p.metadata.peak_hours.clone()))
    };
    if let (Some((source_conf, source_hours)), Some((target_conf, target_hours))) =
        (daily(&source_patterns), daily(&target_patterns))
    {
        let shared: Vec<u32> = source_hours
            .iter()
            .copied()
            .filter(|h| target_hours.contains(h))
            .collect();
        if !shared.is_empty() {
            return Some(Classification {
                connection_type: ConnectionType::Related,
                confidence: source_conf.min(target_conf) * 0.8,
                reason: format!("daily activity patterns share peak hours {shared:?}"),
                triage_method: TriageMethod::AutoRelated,
                llm_used: false,
            });
        }
    }

    None
}

/// Run the three-band triage for a candidate pair.
#[must_use]
pub fn smart_triage(
    source: &Memory,
    target: &Memory,
    similarity: f64,
    thresholds: &TriageThresholds,
) -> TriageOutcome {
    if let Some(classification) = temporal_shortcut(source, target) {
        return TriageOutcome::Classified(classification);
    }

    if similarity >= thresholds.auto_similar {
        return TriageOutcome::Classified(Classification {
            connection_type: ConnectionType::Similar,
            confidence: similarity,
            reason: format!("embedding similarity {similarity:.2} above auto-similar threshold"),
            triage_method: TriageMethod::AutoSimilar,
            llm_used: false,
        });
    }
    if similarity >= thresholds.auto_related {
        return TriageOutcome::Classified(Classification {
            connection_type: ConnectionType::Related,
            confidence: similarity,
            reason: format!("embedding similarity {similarity:.2} above auto-related threshold"),
            triage_method: TriageMethod::AutoRelated,
            llm_used: false,
        });
    }
    if similarity >= thresholds.llm_required {
        return TriageOutcome::NeedsLlm;
    }

    // No real connection; strength stays at the similarity and callers
    // filter it out.
    TriageOutcome::Classified(Classification {
        connection_type: ConnectionType::Similar,
        confidence: 0.0,
        reason: format!("embedding similarity {similarity:.2} below all thresholds"),
        triage_method: TriageMethod::AutoSimilar,
        llm_used: false,
    })
}

/// Deterministic classifier used whenever the LLM band cannot run.
#[must_use]
pub fn deterministic_fallback(source: &Memory, target: &Memory, why: &str) -> Classification {
    let delta = target.created_at - source.created_at;
    let within_hour = delta > chrono::Duration::zero() && delta < chrono::Duration::hours(1);
    if within_hour {
        Classification {
            connection_type: ConnectionType::Causes,
            confidence: 0.6,
            reason: format!("target follows source within an hour ({why})"),
            triage_method: TriageMethod::LlmClassified,
            llm_used: false,
        }
    } else {
        Classification {
            connection_type: ConnectionType::Related,
            confidence: 0.5,
            reason: format!("deterministic fallback classification ({why})"),
            triage_method: TriageMethod::LlmClassified,
            llm_used: false,
        }
    }
}

fn classification_prompt(source: &Memory, target: &Memory) -> Vec<LlmMessage> {
    vec![
        LlmMessage::system(
            "You classify the relationship between two memories. Respond with a JSON object \
             {\"connectionType\": one of [\"similar\", \"related\", \"causes\", \"part_of\", \
             \"opposite\"], \"confidence\": number in [0,1], \"reasoning\": short string}.",
        ),
        LlmMessage::user(format!(
            "Memory A (created {}):\n{}\n\nMemory B (created {}):\n{}",
            source.created_at.to_rfc3339(),
            source.content,
            target.created_at.to_rfc3339(),
            target.content,
        )),
    ]
}

/// Classify a pair through the LLM band.
///
/// Never fails: budget denial, missing credentials, provider errors, and
/// malformed output all route to the deterministic fallback. Every
/// successful call is accounted through the cost tracker.
#[allow(clippy::too_many_arguments)]
pub async fn classify_with_llm(
    factory: Option<&dyn LlmClientFactory>,
    cost_tracker: &dyn CostTracker,
    connection_config: &ConnectionDetectionConfig,
    cost_control: &CostControlConfig,
    agent_id: &str,
    source: &Memory,
    target: &Memory,
    similarity: f64,
) -> Classification {
    if let Some(budget) = cost_control.monthly_budget {
        match cost_tracker.check_budget(agent_id, budget).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(agent_id = %agent_id, budget, "LLM budget exhausted, using fallback");
                return deterministic_fallback(source, target, "monthly budget exhausted");
            }
            Err(err) => {
                warn!(error = %err, "budget check failed, using fallback");
                return deterministic_fallback(source, target, "budget check failed");
            }
        }
    }

    let Some(factory) = factory else {
        debug!("no LLM client factory configured, using fallback");
        return deterministic_fallback(source, target, "no LLM client configured");
    };

    let tier = ModelTier::select(source, target);
    let llm_target = match LlmTarget::resolve(connection_config, tier) {
        Ok(target) => target,
        Err(err) => {
            warn!(error = %err, "could not resolve LLM target, using fallback");
            return deterministic_fallback(source, target, "credentials unavailable");
        }
    };
    let client = match factory.create(&llm_target) {
        Ok(client) => client,
        Err(err) => {
            warn!(error = %err, "could not create LLM client, using fallback");
            return deterministic_fallback(source, target, "client construction failed");
        }
    };

    let request = GenerateObjectRequest {
        messages: classification_prompt(source, target),
        temperature: connection_config.temperature,
        max_tokens: connection_config.max_tokens,
        schema_name: "connection-classification".into(),
    };

    let started = Instant::now();
    let response = match client.generate_object(request).await {
        Ok(response) => response,
        Err(err) => {
            warn!(error = %err, "LLM classification failed, using fallback");
            return deterministic_fallback(source, target, "provider error");
        }
    };
    let elapsed_ms = started.elapsed().as_millis();

    let mut usage_metadata = Map::new();
    usage_metadata.insert("provider".into(), Value::from(llm_target.provider.clone()));
    usage_metadata.insert("model".into(), Value::from(llm_target.model.clone()));
    usage_metadata.insert(
        "processingTimeMs".into(),
        Value::from(u64::try_from(elapsed_ms).unwrap_or(u64::MAX)),
    );
    if cost_control.track_token_usage {
        usage_metadata.insert(
            "promptTokens".into(),
            Value::from(response.usage.prompt_tokens),
        );
        usage_metadata.insert(
            "completionTokens".into(),
            Value::from(response.usage.completion_tokens),
        );
    }
    let usage = ExtractionUsage {
        extractor_type: format!("connection-classification-{}", tier.as_str()),
        cost: f64::from(response.usage.total_tokens) * 1e-6,
        memories_extracted: 0,
        messages_processed: 2,
        metadata: usage_metadata,
    };
    if let Err(err) = cost_tracker.track_extraction(agent_id, usage).await {
        warn!(error = %err, "failed to track classification cost");
    }

    let parsed: ClassificationObject = match serde_json::from_value(response.object) {
        Ok(parsed) => parsed,
        Err(err) => {
            warn!(error = %err, "malformed classification object, using fallback");
            return deterministic_fallback(source, target, "schema validation failed");
        }
    };
    let connection_type = match parsed.connection_type.parse::<ConnectionType>() {
        Ok(connection_type) => connection_type,
        Err(err) => {
            warn!(error = %err, "classification outside the closed type set, using fallback");
            return deterministic_fallback(source, target, "invalid connection type");
        }
    };

    Classification {
        connection_type,
        confidence: parsed.confidence.clamp(0.0, 1.0),
        reason: parsed
            .reasoning
            .unwrap_or_else(|| format!("LLM classified with similarity {similarity:.2}")),
        triage_method: TriageMethod::LlmClassified,
        llm_used: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MemoryType, PatternMetadata, TemporalPattern};
    use chrono::{Duration, Utc};

    fn memory_at(id: &str, offset_minutes: i64) -> Memory {
        let created = Utc::now() + Duration::minutes(offset_minutes);
        Memory {
            id: id.into(),
            user_id: "alice".into(),
            agent_id: "shared".into(),
            memory_type: MemoryType::Episodic,
            content: format!("memory {id}"),
            importance: 0.5,
            resonance: 1.0,
            access_count: 0,
            created_at: created,
            updated_at: created,
            last_accessed_at: created,
            session_id: None,
            token_count: None,
            keywords: vec![],
            embedding_id: None,
            metadata: Map::new(),
        }
    }

    fn with_pattern(mut memory: Memory, kind: PatternKind, confidence: f64, hours: Vec<u32>) -> Memory {
        let pattern = TemporalPattern {
            kind,
            frequency: None,
            confidence,
            memories: vec![memory.id.clone()],
            metadata: PatternMetadata {
                peak_hours: hours,
                ..PatternMetadata::default()
            },
        };
        memory.metadata.insert(
            crate::constants::metadata_keys::TEMPORAL_INSIGHTS.into(),
            serde_json::json!({ "patterns": [pattern] }),
        );
        memory
    }

    #[test]
    fn burst_shortcut_uses_min_confidence() {
        let a = with_pattern(memory_at("a", 0), PatternKind::Burst, 0.7, vec![]);
        let b = with_pattern(memory_at("b", 5), PatternKind::Burst, 0.6, vec![]);

        let classification = temporal_shortcut(&a, &b).unwrap();
        assert_eq!(classification.connection_type, ConnectionType::Related);
        assert!((classification.confidence - 0.6).abs() < 1e-9);
        assert!(classification.reason.contains("burst"));
    }

    #[test]
    fn burst_shortcut_requires_30_minute_window() {
        let a = with_pattern(memory_at("a", 0), PatternKind::Burst, 0.7, vec![]);
        let b = with_pattern(memory_at("b", 45), PatternKind::Burst, 0.6, vec![]);
        assert!(temporal_shortcut(&a, &b).is_none());
    }

    #[test]
    fn daily_shortcut_requires_shared_peak_hour() {
        let a = with_pattern(memory_at("a", 0), PatternKind::Daily, 0.8, vec![9, 14]);
        let b = with_pattern(memory_at("b", 500), PatternKind::Daily, 0.9, vec![14, 20]);

        let classification = temporal_shortcut(&a, &b).unwrap();
        assert!((classification.confidence - 0.8 * 0.8).abs() < 1e-9);

        let c = with_pattern(memory_at("c", 0), PatternKind::Daily, 0.8, vec![3]);
        assert!(temporal_shortcut(&a, &c).is_none());
    }

    #[test]
    fn triage_bands_resolve_in_order() {
        let thresholds = TriageThresholds::default();
        let a = memory_at("a", 0);
        let b = memory_at("b", 5);

        match smart_triage(&a, &b, 0.85, &thresholds) {
            TriageOutcome::Classified(c) => {
                assert_eq!(c.connection_type, ConnectionType::Similar);
                assert_eq!(c.triage_method, TriageMethod::AutoSimilar);
                assert!((c.confidence - 0.85).abs() < 1e-9);
            }
            TriageOutcome::NeedsLlm => panic!("expected auto-similar"),
        }

        match smart_triage(&a, &b, 0.7, &thresholds) {
            TriageOutcome::Classified(c) => {
                assert_eq!(c.connection_type, ConnectionType::Related);
                assert_eq!(c.triage_method, TriageMethod::AutoRelated);
            }
            TriageOutcome::NeedsLlm => panic!("expected auto-related"),
        }

        assert!(matches!(
            smart_triage(&a, &b, 0.45, &thresholds),
            TriageOutcome::NeedsLlm
        ));

        match smart_triage(&a, &b, 0.1, &thresholds) {
            TriageOutcome::Classified(c) => assert!(c.confidence.abs() < 1e-9),
            TriageOutcome::NeedsLlm => panic!("below llm band must not reach the LLM"),
        }
    }

    #[test]
    fn fallback_is_causes_within_an_hour_else_related() {
        let source = memory_at("a", 0);
        let target = memory_at("b", 30);
        let classification = deterministic_fallback(&source, &target, "test");
        assert_eq!(classification.connection_type, ConnectionType::Causes);
        assert!((classification.confidence - 0.6).abs() < 1e-9);
        assert!(!classification.llm_used);

        let far_target = memory_at("c", 120);
        let classification = deterministic_fallback(&source, &far_target, "test");
        assert_eq!(classification.connection_type, ConnectionType::Related);
        assert!((classification.confidence - 0.5).abs() < 1e-9);

        // Target preceding source is not causal.
        let earlier = memory_at("d", -10);
        let classification = deterministic_fallback(&source, &earlier, "test");
        assert_eq!(classification.connection_type, ConnectionType::Related);
    }
}

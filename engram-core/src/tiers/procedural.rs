//! Procedural memory: trigger→action patterns with success statistics.
//! Does not decay.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::constants::{defaults, metadata_keys};
use crate::error::Result;
use crate::storage::{require_memory_ops, MemoryStorage, RecallOptions, StorageProvider};
use crate::types::{MemoryData, MemoryType};

use super::{require_user_id, term_overlap};

/// Procedural tier configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProceduralConfig {
    /// Patterns whose observed success rate falls below this are not
    /// recommended. Patterns without a recorded outcome always pass.
    pub min_success_rate: f64,
    /// Cap on patterns kept per category.
    pub max_patterns_per_category: usize,
    /// Smoothing step applied when confidence adapts to outcomes.
    pub decay_rate: f64,
    /// Default confidence for learned patterns.
    pub confidence_threshold: f64,
    /// Whether recommendation confidence adapts to recorded outcomes.
    pub adaptive_learning: bool,
    /// Whether near-identical trigger/action pairs collapse into one
    /// recommendation.
    pub pattern_merging: bool,
}

impl Default for ProceduralConfig {
    fn default() -> Self {
        Self {
            min_success_rate: 0.6,
            max_patterns_per_category: 100,
            decay_rate: 0.05,
            confidence_threshold: defaults::PROCEDURAL_CONFIDENCE_THRESHOLD,
            adaptive_learning: true,
            pattern_merging: true,
        }
    }
}

/// Per-store overrides.
#[derive(Debug, Clone, Default)]
pub struct ProceduralStoreOptions {
    /// Condition part; defaults to the full content.
    pub trigger: Option<String>,
    /// Action part; defaults to the literal `unknown`.
    pub action: Option<String>,
    /// Observed outcome.
    pub outcome: Option<String>,
    /// Whether the pattern succeeded when observed.
    pub success: Option<bool>,
}

/// Procedural-tier projection of a memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProceduralPattern {
    pub id: String,
    pub content: String,
    pub trigger: String,
    pub action: String,
    pub outcome: Option<String>,
    pub success: Option<bool>,
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
}

/// Result of [`ProceduralMemory::learn`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearnResult {
    pub pattern_id: String,
    pub learned: bool,
    pub confidence: f64,
    pub reason: String,
}

/// A pattern recommended for a trigger query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternMatch {
    pub pattern: ProceduralPattern,
    /// Pattern confidence, adapted toward recorded outcomes when adaptive
    /// learning is on.
    pub confidence: f64,
    /// How well the query (and context) matches the trigger, in [0, 1].
    pub context_match: f64,
}

/// Procedural memory facade.
pub struct ProceduralMemory {
    storage: Arc<dyn StorageProvider>,
    config: ProceduralConfig,
}

impl ProceduralMemory {
    /// Requires a storage backend with memory operations.
    pub fn new(storage: Arc<dyn StorageProvider>, config: ProceduralConfig) -> Result<Self> {
        require_memory_ops(storage.as_ref(), "ProceduralMemory")?;
        Ok(Self { storage, config })
    }

    fn ops(&self) -> Result<&dyn MemoryStorage> {
        require_memory_ops(self.storage.as_ref(), "ProceduralMemory")
    }

    /// Store a procedural pattern.
    #[instrument(skip(self, content, options), fields(user_id = %user_id, agent_id = %agent_id))]
    pub async fn store(
        &self,
        user_id: &str,
        agent_id: &str,
        content: &str,
        options: ProceduralStoreOptions,
    ) -> Result<String> {
        require_user_id(user_id)?;

        let trigger = options.trigger.unwrap_or_else(|| content.to_string());
        let action = options.action.unwrap_or_else(|| "unknown".to_string());

        let mut data = MemoryData::new(MemoryType::Procedural, content);
        data.metadata
            .insert(metadata_keys::TRIGGER.into(), Value::from(trigger));
        data.metadata
            .insert(metadata_keys::ACTION.into(), Value::from(action));
        if let Some(outcome) = options.outcome {
            data.metadata
                .insert(metadata_keys::OUTCOME.into(), Value::from(outcome));
        }
        if let Some(success) = options.success {
            data.metadata
                .insert(metadata_keys::SUCCESS.into(), Value::from(success));
        }

        let id = self.ops()?.store(user_id, agent_id, data).await?;
        debug!(memory_id = %id, "stored procedural pattern");
        Ok(id)
    }

    /// Learn a trigger→action pattern. The content is the conventional
    /// `trigger -> action` rendering; confidence comes from configuration.
    #[instrument(skip(self), fields(user_id = %user_id, agent_id = %agent_id))]
    pub async fn learn(
        &self,
        user_id: &str,
        agent_id: &str,
        trigger: &str,
        action: &str,
    ) -> Result<LearnResult> {
        require_user_id(user_id)?;

        let confidence = self.config.confidence_threshold;
        let content = format!("{trigger} -> {action}");

        let mut data = MemoryData::new(MemoryType::Procedural, content);
        data.metadata
            .insert(metadata_keys::TRIGGER.into(), Value::from(trigger));
        data.metadata
            .insert(metadata_keys::ACTION.into(), Value::from(action));
        data.metadata
            .insert(metadata_keys::CONFIDENCE.into(), Value::from(confidence));

        let pattern_id = self.ops()?.store(user_id, agent_id, data).await?;
        Ok(LearnResult {
            pattern_id,
            learned: true,
            confidence,
            reason: format!("learned pattern for trigger '{trigger}'"),
        })
    }

    /// Project one pattern; `None` for other tiers.
    pub async fn get_by_id(
        &self,
        user_id: &str,
        memory_id: &str,
    ) -> Result<Option<ProceduralPattern>> {
        require_user_id(user_id)?;
        let Some(memory) = self.ops()?.get_by_id(user_id, memory_id).await? else {
            return Ok(None);
        };
        if memory.memory_type != MemoryType::Procedural {
            return Ok(None);
        }
        Ok(Some(Self::project(&memory, self.config.confidence_threshold)))
    }

    fn project(memory: &crate::types::Memory, default_confidence: f64) -> ProceduralPattern {
        let read_str = |key: &str| {
            memory
                .metadata
                .get(key)
                .and_then(Value::as_str)
                .map(ToString::to_string)
        };
        ProceduralPattern {
            id: memory.id.clone(),
            content: memory.content.clone(),
            trigger: read_str(metadata_keys::TRIGGER).unwrap_or_else(|| memory.content.clone()),
            action: read_str(metadata_keys::ACTION).unwrap_or_else(|| "unknown".to_string()),
            outcome: read_str(metadata_keys::OUTCOME),
            success: memory
                .metadata
                .get(metadata_keys::SUCCESS)
                .and_then(Value::as_bool),
            confidence: memory
                .metadata
                .get(metadata_keys::CONFIDENCE)
                .and_then(Value::as_f64)
                .unwrap_or(default_confidence),
            created_at: memory.created_at,
        }
    }

    /// Rank stored patterns against a trigger query.
    ///
    /// Patterns whose recorded success rate falls below the configured
    /// floor are dropped. Under adaptive learning the reported confidence
    /// moves toward the observed outcome; under pattern merging only the
    /// strongest of near-identical trigger/action pairs survives.
    #[instrument(skip(self, context), fields(user_id = %user_id, agent_id = %agent_id))]
    pub async fn get_recommended_actions(
        &self,
        user_id: &str,
        agent_id: &str,
        trigger_query: &str,
        context: Option<&str>,
    ) -> Result<Vec<PatternMatch>> {
        require_user_id(user_id)?;

        let memories = self
            .ops()?
            .recall(
                user_id,
                agent_id,
                trigger_query,
                &RecallOptions {
                    memory_type: Some(MemoryType::Procedural),
                    limit: Some(self.config.max_patterns_per_category),
                    ..RecallOptions::default()
                },
            )
            .await?;

        let mut matches: Vec<PatternMatch> = memories
            .iter()
            .map(|memory| {
                let pattern = Self::project(memory, self.config.confidence_threshold);
                let mut context_match = term_overlap(trigger_query, &pattern.trigger);
                if let Some(context) = context {
                    // Context hits on the action side sharpen the match.
                    context_match =
                        (context_match + 0.5 * term_overlap(context, &pattern.action)).min(1.0);
                }
                PatternMatch {
                    confidence: self.adapted_confidence(&pattern),
                    context_match,
                    pattern,
                }
            })
            .filter(|m| m.context_match > 0.0)
            .filter(|m| self.passes_success_floor(&m.pattern))
            .collect();

        matches.sort_by(|a, b| {
            let left = a.confidence * a.context_match;
            let right = b.confidence * b.context_match;
            right.partial_cmp(&left).unwrap_or(std::cmp::Ordering::Equal)
        });

        if self.config.pattern_merging {
            matches = Self::merge_near_identical(matches);
        }
        Ok(matches)
    }

    /// The observed rate is 1.0 or 0.0 with a single recorded outcome;
    /// patterns with no outcome always pass.
    fn passes_success_floor(&self, pattern: &ProceduralPattern) -> bool {
        match pattern.success {
            Some(success) => {
                let rate = if success { 1.0 } else { 0.0 };
                rate >= self.config.min_success_rate
            }
            None => true,
        }
    }

    /// Move confidence toward the recorded outcome by the decay-rate step.
    fn adapted_confidence(&self, pattern: &ProceduralPattern) -> f64 {
        if !self.config.adaptive_learning {
            return pattern.confidence;
        }
        match pattern.success {
            Some(true) => {
                (pattern.confidence + self.config.decay_rate * (1.0 - pattern.confidence)).min(1.0)
            }
            Some(false) => (pattern.confidence * (1.0 - self.config.decay_rate)).max(0.0),
            None => pattern.confidence,
        }
    }

    /// Keep only the strongest of near-identical trigger/action pairs.
    /// Input must already be sorted strongest-first.
    fn merge_near_identical(matches: Vec<PatternMatch>) -> Vec<PatternMatch> {
        let mut merged: Vec<PatternMatch> = Vec::with_capacity(matches.len());
        for candidate in matches {
            let duplicate = merged.iter().any(|kept| {
                strsim::normalized_levenshtein(&kept.pattern.trigger, &candidate.pattern.trigger)
                    > defaults::PATTERN_MERGE_SIMILARITY
                    && strsim::normalized_levenshtein(
                        &kept.pattern.action,
                        &candidate.pattern.action,
                    ) > defaults::PATTERN_MERGE_SIMILARITY
            });
            if !duplicate {
                merged.push(candidate);
            }
        }
        merged
    }
}

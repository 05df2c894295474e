//! # Temporal pattern analysis
//!
//! Statistical detection of daily, weekly, and burst patterns over memory
//! timestamps, plus activity clustering. Detected patterns feed back into
//! connection triage (shared bursts and peak hours) and recall boosting.
//! LLM augmentation is optional and budget-gated.

use std::sync::Arc;

use chrono::{Datelike, Timelike};
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use crate::config::IntelligenceLayerConfig;
use crate::constants::defaults;
use crate::cost::CostTracker;
use crate::error::Result;
use crate::llm::{
    resolve_api_key, resolve_provider, GenerateObjectRequest, LlmClientFactory, LlmMessage,
    LlmTarget, ModelTier,
};
use crate::storage::{RecallOptions, StorageProvider};
use crate::types::{
    ActivityCluster, Memory, PatternKind, PatternMetadata, TemporalPattern, TimeRange,
};

/// Default model for LLM-augmented temporal analysis.
const AUGMENTATION_MODEL: &str = "gpt-4o-mini";

/// Statistical temporal pattern analyzer.
pub struct TemporalPatternAnalyzer {
    storage: Arc<dyn StorageProvider>,
    cost_tracker: Arc<dyn CostTracker>,
    llm_factory: Option<Arc<dyn LlmClientFactory>>,
    config: IntelligenceLayerConfig,
}

/// Structured output contract for augmentation.
#[derive(Debug, Deserialize)]
struct AugmentedPatternsObject {
    patterns: Vec<AugmentedPattern>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AugmentedPattern {
    #[serde(rename = "type")]
    kind: PatternKind,
    confidence: f64,
    #[serde(default)]
    description: Option<String>,
}

impl TemporalPatternAnalyzer {
    /// Build an analyzer over the given collaborators.
    #[must_use]
    pub fn new(
        storage: Arc<dyn StorageProvider>,
        cost_tracker: Arc<dyn CostTracker>,
        llm_factory: Option<Arc<dyn LlmClientFactory>>,
        config: IntelligenceLayerConfig,
    ) -> Self {
        Self {
            storage,
            cost_tracker,
            llm_factory,
            config,
        }
    }

    /// `user_id` falls back to the agent id for single-tenant callers.
    fn scope<'a>(agent_id: &'a str, user_id: Option<&'a str>) -> &'a str {
        user_id.unwrap_or(agent_id)
    }

    async fn fetch_memories(
        &self,
        agent_id: &str,
        time_range: Option<TimeRange>,
        user_id: Option<&str>,
    ) -> Result<Vec<Memory>> {
        let Some(ops) = self.storage.memory() else {
            return Ok(Vec::new());
        };
        let user = Self::scope(agent_id, user_id);
        let mut memories = ops
            .recall(
                user,
                agent_id,
                "",
                &RecallOptions {
                    limit: Some(1000),
                    time_range,
                    ..RecallOptions::default()
                },
            )
            .await?;
        memories.sort_by_key(|m| m.created_at);
        Ok(memories)
    }

    /// Detect temporal patterns for an agent's memories.
    ///
    /// Requires at least the configured minimum of memories; below that the
    /// result is empty. Patterns are deduplicated by `(type, frequency)` and
    /// sorted by confidence descending.
    #[instrument(skip(self, time_range), fields(agent_id = %agent_id))]
    pub async fn analyze_patterns(
        &self,
        agent_id: &str,
        time_range: Option<TimeRange>,
        user_id: Option<&str>,
    ) -> Result<Vec<TemporalPattern>> {
        if !self.config.temporal.enabled {
            return Ok(Vec::new());
        }

        let memories = self.fetch_memories(agent_id, time_range, user_id).await?;
        if memories.len() < self.config.temporal.min_memories_for_analysis {
            debug!(
                count = memories.len(),
                min = self.config.temporal.min_memories_for_analysis,
                "not enough memories for temporal analysis"
            );
            return Ok(Vec::new());
        }

        let mut patterns = Vec::new();
        patterns.extend(detect_hourly_pattern(&memories));
        patterns.extend(detect_weekly_pattern(&memories));
        patterns.extend(detect_bursts(&memories));

        if self.should_augment(agent_id, memories.len()).await {
            match self.augment_with_llm(&memories).await {
                Ok(augmented) => patterns.extend(augmented),
                Err(err) => warn!(error = %err, "LLM pattern augmentation failed"),
            }
        }

        // Dedupe by (type, frequency), keeping the most confident instance.
        let mut deduped: Vec<TemporalPattern> = Vec::new();
        for pattern in patterns {
            let key = (pattern.kind, pattern.frequency.map(f64::to_bits));
            match deduped
                .iter_mut()
                .find(|p| (p.kind, p.frequency.map(f64::to_bits)) == key)
            {
                Some(existing) => {
                    if pattern.confidence > existing.confidence {
                        *existing = pattern;
                    }
                }
                None => deduped.push(pattern),
            }
        }
        deduped.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        self.persist_insights(agent_id, user_id, &deduped).await;
        Ok(deduped)
    }

    /// Write detected patterns back onto their member memories under
    /// `metadata.temporalInsights.patterns`, where connection triage and
    /// recall boosting read them. Best-effort: failures are logged.
    async fn persist_insights(
        &self,
        agent_id: &str,
        user_id: Option<&str>,
        patterns: &[TemporalPattern],
    ) {
        if patterns.is_empty() {
            return;
        }
        let Some(ops) = self.storage.memory() else {
            return;
        };
        let user = Self::scope(agent_id, user_id);

        let mut by_memory: std::collections::HashMap<&str, Vec<&TemporalPattern>> =
            std::collections::HashMap::new();
        for pattern in patterns {
            for memory_id in &pattern.memories {
                by_memory.entry(memory_id).or_default().push(pattern);
            }
        }

        for (memory_id, memory_patterns) in by_memory {
            let insights = serde_json::json!({ "patterns": memory_patterns });
            let mut metadata = serde_json::Map::new();
            metadata.insert(
                crate::constants::metadata_keys::TEMPORAL_INSIGHTS.into(),
                insights,
            );
            let update = crate::types::MemoryUpdate {
                metadata: Some(metadata),
                ..crate::types::MemoryUpdate::default()
            };
            if let Err(err) = ops.update(user, agent_id, memory_id, update).await {
                warn!(memory_id = %memory_id, error = %err, "failed to persist temporal insights");
            }
        }
    }

    /// Detect dense one-hour windows of activity.
    #[instrument(skip(self, time_range), fields(agent_id = %agent_id))]
    pub async fn detect_activity_clusters(
        &self,
        agent_id: &str,
        time_range: Option<TimeRange>,
        user_id: Option<&str>,
    ) -> Result<Vec<ActivityCluster>> {
        let memories = self.fetch_memories(agent_id, time_range, user_id).await?;
        Ok(cluster_activity(&memories))
    }

    /// Augmentation gate: LLM available, enough memories, the embedding
    /// preference allows it, and the agent is under budget.
    async fn should_augment(&self, agent_id: &str, memory_count: usize) -> bool {
        if !self.config.temporal.enable_llm_enhancement || self.llm_factory.is_none() {
            return false;
        }
        if memory_count < defaults::MIN_MEMORIES_FOR_LLM_ANALYSIS {
            return false;
        }
        if !self.config.cost_control.prefer_embedding_when_similar {
            return false;
        }
        let budget = self
            .config
            .cost_control
            .monthly_budget
            .unwrap_or(f64::INFINITY);
        match self.cost_tracker.check_budget(agent_id, budget).await {
            Ok(allowed) => allowed,
            Err(err) => {
                warn!(error = %err, "budget check failed, skipping augmentation");
                false
            }
        }
    }

    async fn augment_with_llm(&self, memories: &[Memory]) -> Result<Vec<TemporalPattern>> {
        let Some(factory) = self.llm_factory.as_deref() else {
            return Ok(Vec::new());
        };

        let connection_config = &self.config.connection_detection;
        let provider = resolve_provider(connection_config);
        let api_key = resolve_api_key(&provider)?;
        let model = std::env::var(crate::constants::env_vars::CONNECTION_MODEL)
            .ok()
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| AUGMENTATION_MODEL.to_string());
        let target = LlmTarget {
            provider,
            model,
            api_key,
            tier: ModelTier::Standard,
        };
        let client = factory.create(&target)?;

        let timestamps: Vec<String> = memories
            .iter()
            .map(|m| m.created_at.to_rfc3339())
            .collect();
        let request = GenerateObjectRequest {
            messages: vec![
                LlmMessage::system(
                    "You detect temporal activity patterns. Respond with a JSON object \
                     {\"patterns\": [{\"type\": one of [\"daily\", \"weekly\", \"monthly\", \
                     \"periodic\", \"burst\"], \"confidence\": number in [0,1], \
                     \"description\": string}]}.",
                ),
                LlmMessage::user(format!("Memory timestamps:\n{}", timestamps.join("\n"))),
            ],
            temperature: connection_config.temperature,
            max_tokens: connection_config.max_tokens,
            schema_name: "temporal-patterns".into(),
        };

        let response = client.generate_object(request).await?;
        let parsed: AugmentedPatternsObject = serde_json::from_value(response.object)?;

        let memory_ids: Vec<String> = memories.iter().map(|m| m.id.clone()).collect();
        Ok(parsed
            .patterns
            .into_iter()
            .map(|p| TemporalPattern {
                kind: p.kind,
                frequency: None,
                confidence: p.confidence.clamp(0.0, 1.0),
                memories: memory_ids.clone(),
                metadata: PatternMetadata {
                    description: p.description,
                    llm_generated: true,
                    ..PatternMetadata::default()
                },
            })
            .collect())
    }
}

/// Hourly bucketing: hours busier than 1.5× the average are peaks.
fn detect_hourly_pattern(memories: &[Memory]) -> Option<TemporalPattern> {
    let mut buckets = [0usize; 24];
    for memory in memories {
        buckets[memory.created_at.hour() as usize] += 1;
    }

    let total: usize = buckets.iter().sum();
    let avg = total as f64 / 24.0;
    if avg <= 0.0 {
        return None;
    }
    let peak_hours: Vec<u32> = (0u32..24)
        .filter(|&h| buckets[h as usize] as f64 > defaults::HOURLY_PEAK_FACTOR * avg)
        .collect();
    if peak_hours.is_empty() {
        return None;
    }

    let max = buckets.iter().copied().max().unwrap_or(0) as f64;
    let member_ids: Vec<String> = memories
        .iter()
        .filter(|m| peak_hours.contains(&m.created_at.hour()))
        .map(|m| m.id.clone())
        .collect();
    Some(TemporalPattern {
        kind: PatternKind::Daily,
        frequency: None,
        confidence: (max / avg / 3.0).min(0.9),
        memories: member_ids,
        metadata: PatternMetadata {
            description: Some(format!("daily activity peaks at hours {peak_hours:?}")),
            peak_hours,
            ..PatternMetadata::default()
        },
    })
}

/// Day-of-week bucketing: days busier than 1.3× the average are peaks.
fn detect_weekly_pattern(memories: &[Memory]) -> Option<TemporalPattern> {
    let mut buckets = [0usize; 7];
    for memory in memories {
        buckets[memory.created_at.weekday().num_days_from_monday() as usize] += 1;
    }

    let total: usize = buckets.iter().sum();
    let avg = total as f64 / 7.0;
    if avg <= 0.0 {
        return None;
    }
    let peak_days: Vec<u32> = (0u32..7)
        .filter(|&d| buckets[d as usize] as f64 > defaults::WEEKLY_PEAK_FACTOR * avg)
        .collect();
    if peak_days.is_empty() {
        return None;
    }

    let max = buckets.iter().copied().max().unwrap_or(0) as f64;
    let member_ids: Vec<String> = memories
        .iter()
        .filter(|m| peak_days.contains(&m.created_at.weekday().num_days_from_monday()))
        .map(|m| m.id.clone())
        .collect();
    Some(TemporalPattern {
        kind: PatternKind::Weekly,
        frequency: None,
        confidence: (max / avg / 2.5).min(0.85),
        memories: member_ids,
        metadata: PatternMetadata {
            description: Some(format!(
                "weekly activity peaks on days {peak_days:?} (0 = Monday)"
            )),
            ..PatternMetadata::default()
        },
    })
}

/// 30-minute sliding window over sorted timestamps; windows holding five or
/// more memories emit a burst, then the scan skips half a window forward so
/// overlapping windows do not multiply.
fn detect_bursts(memories: &[Memory]) -> Vec<TemporalPattern> {
    let window = chrono::Duration::minutes(defaults::BURST_WINDOW_MINUTES);
    let half_window = window / 2;
    let mut bursts = Vec::new();

    let mut start = 0;
    while start < memories.len() {
        let window_end = memories[start].created_at + window;
        let mut end = start;
        while end + 1 < memories.len() && memories[end + 1].created_at <= window_end {
            end += 1;
        }
        let count = end - start + 1;
        if count >= defaults::BURST_MIN_MEMORIES {
            bursts.push(TemporalPattern {
                kind: PatternKind::Burst,
                frequency: None,
                confidence: (count as f64 / 10.0).min(0.8),
                memories: memories[start..=end].iter().map(|m| m.id.clone()).collect(),
                metadata: PatternMetadata {
                    description: Some(format!("{count} memories inside a 30 minute window")),
                    peak_times: vec![memories[start].created_at],
                    ..PatternMetadata::default()
                },
            });

            let skip_until = memories[start].created_at + half_window;
            let mut next = start + 1;
            while next < memories.len() && memories[next].created_at <= skip_until {
                next += 1;
            }
            start = next.max(end + 1).min(memories.len());
        } else {
            start += 1;
        }
    }
    bursts
}

/// 1-hour window clustering with a minimum of three memories per cluster.
fn cluster_activity(memories: &[Memory]) -> Vec<ActivityCluster> {
    let window = chrono::Duration::minutes(defaults::CLUSTER_WINDOW_MINUTES);
    let mut clusters = Vec::new();

    let mut start = 0;
    while start < memories.len() {
        let window_end = memories[start].created_at + window;
        let mut end = start;
        while end + 1 < memories.len() && memories[end + 1].created_at <= window_end {
            end += 1;
        }
        let members = &memories[start..=end];
        if members.len() >= defaults::CLUSTER_MIN_MEMORIES {
            let start_time = members[0].created_at;
            let end_time = members[members.len() - 1].created_at;
            let duration_hours = (end_time - start_time).num_seconds() as f64 / 3600.0;
            let intensity =
                (members.len() as f64 / duration_hours.max(0.5) / 10.0).min(1.0);

            let mut topics: Vec<String> = Vec::new();
            for memory in members {
                for keyword in &memory.keywords {
                    if !topics.contains(keyword) {
                        topics.push(keyword.clone());
                    }
                }
            }
            topics.truncate(defaults::CLUSTER_MAX_TOPICS);

            clusters.push(ActivityCluster {
                start_time,
                end_time,
                memory_ids: members.iter().map(|m| m.id.clone()).collect(),
                topics,
                intensity,
            });
            start = end + 1;
        } else {
            start += 1;
        }
    }
    clusters
}

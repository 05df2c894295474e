//! Core data model: memories, connections, temporal patterns, events.
//!
//! All records are serde-friendly and keyed by opaque string ids. Metadata
//! travels as an open `serde_json` bag so storage adapters and callers can
//! attach keys the engine does not interpret; the keys the engine does
//! interpret are named in [`crate::constants::metadata_keys`].

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::Error;

/// The four cognitive tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryType {
    /// Short-lived, session-scoped context; expires by TTL.
    Working,
    /// Timestamped experiences with tags; decays by resonance.
    Episodic,
    /// Durable facts with confidence; does not decay.
    Semantic,
    /// Trigger→action patterns with success statistics; does not decay.
    Procedural,
}

impl MemoryType {
    /// All tiers, in recall order.
    pub const ALL: [MemoryType; 4] = [
        MemoryType::Working,
        MemoryType::Episodic,
        MemoryType::Semantic,
        MemoryType::Procedural,
    ];

    /// Wire name of the tier.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            MemoryType::Working => "working",
            MemoryType::Episodic => "episodic",
            MemoryType::Semantic => "semantic",
            MemoryType::Procedural => "procedural",
        }
    }

    /// Default importance attached at write time.
    #[must_use]
    pub fn default_importance(self) -> f64 {
        match self {
            MemoryType::Working | MemoryType::Procedural => 0.8,
            MemoryType::Episodic => 0.5,
            MemoryType::Semantic => 0.7,
        }
    }

    /// Whether resonance decays for this tier. Semantic and procedural
    /// memories hold resonance fixed at 1.0.
    #[must_use]
    pub fn decays(self) -> bool {
        matches!(self, MemoryType::Working | MemoryType::Episodic)
    }
}

impl fmt::Display for MemoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MemoryType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "working" => Ok(MemoryType::Working),
            "episodic" => Ok(MemoryType::Episodic),
            "semantic" => Ok(MemoryType::Semantic),
            "procedural" => Ok(MemoryType::Procedural),
            other => Err(Error::Validation(format!("unknown memory type: {other}"))),
        }
    }
}

/// The universal memory record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    /// Opaque unique id, generated at write, never reused.
    pub id: String,
    /// Isolation axis. Every read and write is scoped to this user.
    pub user_id: String,
    /// Sub-isolation axis within a user.
    pub agent_id: String,
    /// The cognitive tier. Immutable after creation.
    pub memory_type: MemoryType,
    /// Free text content.
    pub content: String,
    /// Importance in [0, 1]; tier-defaulted.
    pub importance: f64,
    /// Decay-sensitive quality score in [0, 1]; fixed 1.0 for semantic and
    /// procedural memories.
    pub resonance: f64,
    /// Incremented on recall.
    pub access_count: u64,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Bumped on every update.
    pub updated_at: DateTime<Utc>,
    /// Bumped on recall.
    pub last_accessed_at: DateTime<Utc>,
    /// Required for working memories, present for episodic ones.
    pub session_id: Option<String>,
    /// `ceil(len(content) / 4)` unless the caller provides one.
    pub token_count: Option<u32>,
    /// Ordered keyword list; may be empty.
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Opaque pointer into the embedding store.
    pub embedding_id: Option<String>,
    /// Open key/value bag; tier conventions documented per facade.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Memory {
    /// Rough token estimate used when the caller does not provide a count.
    #[must_use]
    pub fn estimate_tokens(content: &str) -> u32 {
        u32::try_from(content.len().div_ceil(4)).unwrap_or(u32::MAX)
    }

    /// Expiry timestamp from `metadata.expiresAt` (epoch ms), if present.
    #[must_use]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.metadata
            .get(crate::constants::metadata_keys::EXPIRES_AT)
            .and_then(Value::as_i64)
            .and_then(DateTime::from_timestamp_millis)
    }

    /// A memory past its `expiresAt` yields nothing on read.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().is_some_and(|expiry| now > expiry)
    }

    /// Temporal patterns previously attached under
    /// `metadata.temporalInsights.patterns`, if any.
    #[must_use]
    pub fn temporal_patterns(&self) -> Vec<TemporalPattern> {
        self.metadata
            .get(crate::constants::metadata_keys::TEMPORAL_INSIGHTS)
            .and_then(|insights| insights.get("patterns"))
            .and_then(|patterns| {
                serde_json::from_value::<Vec<TemporalPattern>>(patterns.clone()).ok()
            })
            .unwrap_or_default()
    }
}

/// Write payload accepted by the storage contract. The adapter attaches the
/// id and the user/agent tuple.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryData {
    /// Target tier.
    pub memory_type: MemoryType,
    /// Free text content.
    pub content: String,
    /// Importance in [0, 1].
    pub importance: f64,
    /// Resonance in [0, 1].
    pub resonance: f64,
    /// Session scope, when the tier carries one.
    pub session_id: Option<String>,
    /// Optional explicit token count.
    pub token_count: Option<u32>,
    /// Keywords attached at write.
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Optional embedding pointer.
    pub embedding_id: Option<String>,
    /// Tier-conventional metadata.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl MemoryData {
    /// Start a payload for a tier with its default importance and resonance.
    #[must_use]
    pub fn new(memory_type: MemoryType, content: impl Into<String>) -> Self {
        Self {
            memory_type,
            content: content.into(),
            importance: memory_type.default_importance(),
            resonance: 1.0,
            session_id: None,
            token_count: None,
            keywords: Vec::new(),
            embedding_id: None,
            metadata: Map::new(),
        }
    }
}

/// Partial update applied by `MemoryStorage::update`. `None` fields are left
/// untouched; `metadata` is merged key-by-key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryUpdate {
    pub content: Option<String>,
    pub importance: Option<f64>,
    pub resonance: Option<f64>,
    pub access_count: Option<u64>,
    pub last_accessed_at: Option<DateTime<Utc>>,
    pub keywords: Option<Vec<String>>,
    pub embedding_id: Option<String>,
    pub metadata: Option<Map<String, Value>>,
}

/// The closed set of typed edges between memories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionType {
    /// Strong semantic overlap.
    Similar,
    /// Moderate semantic overlap.
    Related,
    /// Source temporally and semantically precedes/produces target.
    Causes,
    /// Hierarchical composition.
    PartOf,
    /// Contradiction.
    Opposite,
}

impl ConnectionType {
    /// Every admissible edge type.
    pub const ALL: [ConnectionType; 5] = [
        ConnectionType::Similar,
        ConnectionType::Related,
        ConnectionType::Causes,
        ConnectionType::PartOf,
        ConnectionType::Opposite,
    ];

    /// Wire name of the edge type.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionType::Similar => "similar",
            ConnectionType::Related => "related",
            ConnectionType::Causes => "causes",
            ConnectionType::PartOf => "part_of",
            ConnectionType::Opposite => "opposite",
        }
    }
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectionType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "similar" => Ok(ConnectionType::Similar),
            "related" => Ok(ConnectionType::Related),
            "causes" => Ok(ConnectionType::Causes),
            "part_of" => Ok(ConnectionType::PartOf),
            "opposite" => Ok(ConnectionType::Opposite),
            other => Err(Error::Validation(format!(
                "unknown connection type: {other}"
            ))),
        }
    }
}

/// Which triage band produced a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriageMethod {
    /// Similarity at or above the auto-similar threshold.
    #[serde(rename = "auto-similar")]
    AutoSimilar,
    /// Similarity at or above the auto-related threshold, or a temporal
    /// shortcut.
    #[serde(rename = "auto-related")]
    AutoRelated,
    /// Classified by the LLM band.
    #[serde(rename = "llm-classified")]
    LlmClassified,
}

impl TriageMethod {
    /// Wire name of the triage band.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            TriageMethod::AutoSimilar => "auto-similar",
            TriageMethod::AutoRelated => "auto-related",
            TriageMethod::LlmClassified => "llm-classified",
        }
    }
}

/// Classification provenance carried on every connection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionMetadata {
    /// Which triage band produced the edge.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub triage_method: Option<TriageMethod>,
    /// Producing algorithm, e.g. `two-hop-traversal`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<String>,
    /// Raw embedding similarity observed between the endpoints.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_similarity: Option<f64>,
    /// Whether an LLM call was involved.
    #[serde(default)]
    pub llm_used: bool,
    /// Hop count for graph-derived edges.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hops: Option<u32>,
    /// Intermediate node ids for multi-hop edges.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub via: Vec<String>,
}

/// A typed, directed, weighted edge between two memories of a single user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    /// Unique edge id.
    pub id: String,
    /// Source memory id; must exist under the owning user.
    pub source_memory_id: String,
    /// Target memory id; must exist under the owning user.
    pub target_memory_id: String,
    /// Edge type from the closed set.
    pub connection_type: ConnectionType,
    /// Strength in [0, 1].
    pub strength: f64,
    /// Human-readable classification rationale.
    pub reason: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Classification provenance.
    #[serde(default)]
    pub metadata: ConnectionMetadata,
}

impl Connection {
    /// Build a new edge with a fresh id.
    #[must_use]
    pub fn new(
        source_memory_id: impl Into<String>,
        target_memory_id: impl Into<String>,
        connection_type: ConnectionType,
        strength: f64,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            source_memory_id: source_memory_id.into(),
            target_memory_id: target_memory_id.into(),
            connection_type,
            strength,
            reason: reason.into(),
            created_at: Utc::now(),
            metadata: ConnectionMetadata::default(),
        }
    }

    /// True if the edge touches the given memory id at either end.
    #[must_use]
    pub fn involves(&self, memory_id: &str) -> bool {
        self.source_memory_id == memory_id || self.target_memory_id == memory_id
    }
}

/// Statistical pattern class detected over memory timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternKind {
    Daily,
    Weekly,
    Monthly,
    Periodic,
    Burst,
}

/// Pattern annotations; serialized with the wire key names so patterns can
/// round-trip through memory metadata bags.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternMetadata {
    /// Representative peak timestamps.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub peak_times: Vec<DateTime<Utc>>,
    /// Interval in ms for periodic patterns.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<i64>,
    /// Human-readable description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Peak hours of day (0–23) for daily patterns.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub peak_hours: Vec<u32>,
    /// True when the pattern came from LLM augmentation.
    #[serde(default)]
    pub llm_generated: bool,
}

/// A detected temporal pattern over a set of memories.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemporalPattern {
    /// Pattern class.
    #[serde(rename = "type")]
    pub kind: PatternKind,
    /// Occurrences per day/week depending on class, when meaningful.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency: Option<f64>,
    /// Confidence in [0, 1].
    pub confidence: f64,
    /// Ids of the memories that exhibit the pattern.
    pub memories: Vec<String>,
    /// Pattern annotations.
    #[serde(default)]
    pub metadata: PatternMetadata,
}

/// A dense window of activity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityCluster {
    /// Window start.
    pub start_time: DateTime<Utc>,
    /// Window end.
    pub end_time: DateTime<Utc>,
    /// Memories inside the window.
    pub memory_ids: Vec<String>,
    /// Up to five keywords drawn from the member memories.
    pub topics: Vec<String>,
    /// Density score in [0, 1].
    pub intensity: f64,
}

/// Inclusive time range filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    /// True when the timestamp falls inside the range, inclusive.
    #[must_use]
    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        timestamp >= self.start && timestamp <= self.end
    }
}

/// Aggregate statistics for a user (optionally narrowed to one agent).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryStats {
    /// Canonically the sum of `by_type` counts in scope.
    pub total_memories: usize,
    /// Count per tier.
    pub by_type: HashMap<MemoryType, usize>,
    /// Mean importance across the scope.
    pub avg_importance: f64,
    /// Total content bytes.
    pub total_size: u64,
}

/// Lifecycle event class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryEventType {
    Created,
    Accessed,
    Connected,
}

/// Lifecycle event delivered to the optional evolution sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEvent {
    /// Memory the event concerns.
    pub memory_id: String,
    /// Owning user.
    pub user_id: String,
    /// Owning agent.
    pub agent_id: String,
    /// Event class.
    pub event_type: MemoryEventType,
    /// Emission time.
    pub timestamp: DateTime<Utc>,
    /// Event-specific annotations.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

//! Relationship discovery between recalled memories.
//!
//! For the top results, pairwise relationships are derived from session
//! identity, token overlap, temporal proximity, and (for procedural
//! memories) fuzzy pattern similarity.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::types::{Memory, MemoryType};

/// Relationship class between two recalled memories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipType {
    SameSession,
    SemanticSimilarity,
    TemporalProximity,
    PatternSimilarity,
}

/// A discovered relationship to another memory in the same result set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelatedMemory {
    pub memory_id: String,
    pub relationship_type: RelationshipType,
    pub strength: f64,
}

fn tokens(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// Jaccard similarity of content tokens.
#[must_use]
pub fn jaccard_similarity(a: &str, b: &str) -> f64 {
    let tokens_a = tokens(a);
    let tokens_b = tokens(b);
    if tokens_a.is_empty() || tokens_b.is_empty() {
        return 0.0;
    }
    let intersection = tokens_a.intersection(&tokens_b).count() as f64;
    let union = tokens_a.union(&tokens_b).count() as f64;
    intersection / union
}

/// Strongest relationship between two memories, if any.
#[must_use]
pub fn relate(memory: &Memory, other: &Memory) -> Option<RelatedMemory> {
    let mut candidates: Vec<(RelationshipType, f64)> = Vec::new();

    if memory.memory_type == MemoryType::Episodic
        && other.memory_type == MemoryType::Episodic
        && memory.session_id.is_some()
        && memory.session_id == other.session_id
    {
        candidates.push((RelationshipType::SameSession, 0.8));
    }

    let jaccard = jaccard_similarity(&memory.content, &other.content);
    if jaccard > 0.6 {
        candidates.push((RelationshipType::SemanticSimilarity, jaccard));
    }

    let hours = (memory.created_at - other.created_at).num_minutes().abs() as f64 / 60.0;
    if hours <= 24.0 {
        candidates.push((
            RelationshipType::TemporalProximity,
            (1.0 - hours / 24.0).max(0.3),
        ));
    }

    if memory.memory_type == MemoryType::Procedural
        && other.memory_type == MemoryType::Procedural
    {
        let similarity = strsim::normalized_levenshtein(&memory.content, &other.content);
        if similarity > 0.5 {
            candidates.push((RelationshipType::PatternSimilarity, similarity));
        }
    }

    candidates
        .into_iter()
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(relationship_type, strength)| RelatedMemory {
            memory_id: other.id.clone(),
            relationship_type,
            strength,
        })
}

/// Relationships from `memory` to every other memory, strongest first,
/// truncated to `max_related`.
#[must_use]
pub fn discover_relationships(
    memory: &Memory,
    others: &[&Memory],
    max_related: usize,
) -> Vec<RelatedMemory> {
    let mut relationships: Vec<RelatedMemory> = others
        .iter()
        .filter(|other| other.id != memory.id)
        .filter_map(|other| relate(memory, other))
        .collect();
    relationships.sort_by(|a, b| {
        b.strength
            .partial_cmp(&a.strength)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    relationships.truncate(max_related);
    relationships
}

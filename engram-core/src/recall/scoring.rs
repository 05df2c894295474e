//! Relevance scoring for recall.
//!
//! Lexical scoring (`text_relevance`), recency scoring
//! (`temporal_relevance`), and the weighted hybrid combination applied to
//! results the backend did not already score.

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;

use crate::config::HybridSearchWeights;
use crate::constants::defaults;
use crate::types::{MemoryType, TimeRange};

use super::UnifiedMemoryResult;

/// Common English stopwords removed from query terms.
const STOPWORDS: &[&str] = &[
    "the", "and", "for", "are", "was", "were", "with", "that", "this", "from", "have", "has",
    "had", "but", "not", "you", "all", "can", "her", "his", "its", "our", "out", "who", "what",
    "when", "where", "how", "why", "will", "would", "there", "their", "then", "them",
];

fn non_word_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        #[allow(clippy::unwrap_used)]
        let pattern = Regex::new(r"[^\w\s]").unwrap();
        pattern
    })
}

/// Normalize a query: lowercase, trim, strip non-word characters, collapse
/// whitespace, cap length.
#[must_use]
pub fn optimize_query(query: &str) -> String {
    let lowered = query.to_lowercase();
    let stripped = non_word_pattern().replace_all(&lowered, " ");
    let collapsed = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
    let capped: String = collapsed.chars().take(defaults::MAX_QUERY_LENGTH).collect();
    capped.trim_end().to_string()
}

/// Query terms: lowercase tokens longer than two characters with stopwords
/// removed.
#[must_use]
pub fn query_terms(query: &str) -> Vec<String> {
    query
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 2)
        .filter(|t| !STOPWORDS.contains(t))
        .map(ToString::to_string)
        .collect()
}

/// Lexical relevance of content (and auxiliary keywords/tags) to a query,
/// in [0, 1].
///
/// Components: exact phrase match (1.0), per-term content hits (0.3 each),
/// keyword hits (0.2 each), and a term-frequency component (0.5), all
/// normalized by the maximum attainable score.
#[must_use]
pub fn text_relevance(content: &str, query: &str, keywords: &[String]) -> f64 {
    let content_lower = content.to_lowercase();
    let query_lower = query.to_lowercase();
    let query_lower = query_lower.trim();
    if query_lower.is_empty() {
        return 0.0;
    }

    let terms = query_terms(query_lower);
    let content_terms: Vec<String> = content_lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(ToString::to_string)
        .collect();
    let keywords_lower: Vec<String> = keywords.iter().map(|k| k.to_lowercase()).collect();

    let mut score = 0.0;
    let mut max_score = 0.0;

    max_score += 1.0;
    if content_lower.contains(query_lower) {
        score += 1.0;
    }

    for term in &terms {
        max_score += 0.3;
        if content_terms.iter().any(|t| t == term) {
            score += 0.3;
        }
    }

    for term in &terms {
        max_score += 0.2;
        if keywords_lower.iter().any(|k| k.contains(term.as_str())) {
            score += 0.2;
        }
    }

    if !terms.is_empty() && !content_terms.is_empty() {
        max_score += 0.5;
        let occurrences = content_terms
            .iter()
            .filter(|t| terms.contains(*t))
            .count() as f64;
        let frequency = (occurrences / content_terms.len() as f64).min(1.0);
        score += 0.5 * frequency;
    }

    if max_score <= 0.0 {
        return 0.0;
    }
    (score / max_score).clamp(0.0, 1.0)
}

/// Recency relevance in [0, 1].
///
/// With an explicit time range the score is binary (inside/outside);
/// otherwise a recency ladder applies: ≤1d → 1.0, ≤7d → 0.8, ≤30d → 0.6,
/// ≤90d → 0.4, then `max(0.1, 1/ln(days + 1))`.
#[must_use]
pub fn temporal_relevance(
    timestamp: DateTime<Utc>,
    now: DateTime<Utc>,
    time_range: Option<&TimeRange>,
) -> f64 {
    if let Some(range) = time_range {
        return if range.contains(timestamp) { 1.0 } else { 0.0 };
    }

    let days = (now - timestamp).num_seconds().max(0) as f64 / 86_400.0;
    if days <= 1.0 {
        1.0
    } else if days <= 7.0 {
        0.8
    } else if days <= 30.0 {
        0.6
    } else if days <= 90.0 {
        0.4
    } else {
        (1.0 / (days + 1.0).ln()).max(0.1)
    }
}

/// Apply the weighted hybrid score to every result the backend did not
/// already score. The new relevance never drops below the existing one.
pub fn apply_hybrid_scoring(
    results: &mut [UnifiedMemoryResult],
    query: &str,
    weights: &HybridSearchWeights,
    now: DateTime<Utc>,
    time_range: Option<&TimeRange>,
) {
    let weights = weights.normalized();
    for result in results.iter_mut() {
        if result.from_hybrid_search() {
            continue;
        }

        let text = text_relevance(&result.memory.content, query, &result.memory.keywords);
        let temporal = temporal_relevance(result.memory.created_at, now, time_range);
        // No embedding component on the fallback path.
        let vector = 0.0;
        let procedural = if result.memory.memory_type == MemoryType::Procedural {
            (result.memory.access_count as f64 / 100.0).min(1.0)
        } else {
            0.0
        };

        let combined = weights.vector * vector
            + weights.text * text
            + weights.temporal * temporal
            + weights.procedural * procedural;
        result.relevance = result.relevance.max(combined);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optimize_lowercases_strips_and_collapses() {
        assert_eq!(
            optimize_query("  What's  the CACHE-invalidation   bug?! "),
            "what s the cache invalidation bug"
        );
    }

    #[test]
    fn optimize_caps_length() {
        let long = "word ".repeat(100);
        assert!(optimize_query(&long).len() <= defaults::MAX_QUERY_LENGTH);
    }

    #[test]
    fn phrase_match_scores_highest() {
        let phrase = text_relevance("JavaScript arrays are ordered lists", "ordered lists", &[]);
        let partial = text_relevance("JavaScript arrays are ordered lists", "ordered maps", &[]);
        let unrelated = text_relevance("JavaScript arrays are ordered lists", "piano lessons", &[]);
        assert!(phrase > partial);
        assert!(partial > unrelated);
        assert!(unrelated < 0.1);
    }

    #[test]
    fn keywords_contribute_to_relevance() {
        let without = text_relevance("short note", "deployment", &[]);
        let with = text_relevance("short note", "deployment", &["deployment".to_string()]);
        assert!(with > without);
    }

    #[test]
    fn relevance_is_bounded() {
        let score = text_relevance("exact match", "exact match", &["exact".into(), "match".into()]);
        assert!(score <= 1.0);
        assert!(score > 0.9);
    }

    #[test]
    fn temporal_ladder_decreases_with_age() {
        let now = Utc::now();
        let day = |d: i64| now - chrono::Duration::days(d);
        assert!((temporal_relevance(day(0), now, None) - 1.0).abs() < 1e-9);
        assert!((temporal_relevance(day(5), now, None) - 0.8).abs() < 1e-9);
        assert!((temporal_relevance(day(20), now, None) - 0.6).abs() < 1e-9);
        assert!((temporal_relevance(day(60), now, None) - 0.4).abs() < 1e-9);
        let old = temporal_relevance(day(400), now, None);
        assert!(old >= 0.1 && old < 0.4);
    }

    #[test]
    fn explicit_time_range_is_binary() {
        let now = Utc::now();
        let range = TimeRange {
            start: now - chrono::Duration::days(2),
            end: now - chrono::Duration::days(1),
        };
        let inside = now - chrono::Duration::hours(36);
        let outside = now;
        assert!((temporal_relevance(inside, now, Some(&range)) - 1.0).abs() < 1e-9);
        assert!(temporal_relevance(outside, now, Some(&range)).abs() < 1e-9);
    }
}

//! Per-query recall metrics.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::constants::defaults;
use crate::types::MemoryType;

/// Aggregated popularity of one query string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PopularQuery {
    pub query: String,
    pub count: u64,
    pub avg_relevance: f64,
}

/// Snapshot of recall service metrics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecallMetrics {
    pub total_queries: u64,
    pub avg_response_time_ms: f64,
    pub cache_hit_rate: f64,
    pub memory_type_distribution: HashMap<MemoryType, u64>,
    /// Capped at 100 entries.
    pub popular_queries: Vec<PopularQuery>,
}

#[derive(Default)]
struct MetricsState {
    total_queries: u64,
    cache_hits: u64,
    avg_response_time_ms: f64,
    distribution: HashMap<MemoryType, u64>,
    popular: Vec<PopularQuery>,
}

/// Running-average metrics recorder.
#[derive(Default)]
pub struct MetricsRecorder {
    state: Mutex<MetricsState>,
}

impl MetricsRecorder {
    /// Fresh recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one completed query.
    pub fn record(
        &self,
        query: &str,
        response_time_ms: f64,
        cache_hit: bool,
        result_types: &[MemoryType],
        avg_relevance: f64,
    ) {
        let mut state = self.state.lock();
        state.total_queries += 1;
        if cache_hit {
            state.cache_hits += 1;
        }

        let n = state.total_queries as f64;
        state.avg_response_time_ms += (response_time_ms - state.avg_response_time_ms) / n;

        for memory_type in result_types {
            *state.distribution.entry(*memory_type).or_insert(0) += 1;
        }

        if let Some(entry) = state.popular.iter_mut().find(|p| p.query == query) {
            entry.count += 1;
            entry.avg_relevance += (avg_relevance - entry.avg_relevance) / entry.count as f64;
        } else if state.popular.len() < defaults::POPULAR_QUERIES_CAP {
            state.popular.push(PopularQuery {
                query: query.to_string(),
                count: 1,
                avg_relevance,
            });
        }
    }

    /// Current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> RecallMetrics {
        let state = self.state.lock();
        let cache_hit_rate = if state.total_queries == 0 {
            0.0
        } else {
            state.cache_hits as f64 / state.total_queries as f64
        };
        let mut popular = state.popular.clone();
        popular.sort_by(|a, b| b.count.cmp(&a.count));
        RecallMetrics {
            total_queries: state.total_queries,
            avg_response_time_ms: state.avg_response_time_ms,
            cache_hit_rate,
            memory_type_distribution: state.distribution.clone(),
            popular_queries: popular,
        }
    }
}

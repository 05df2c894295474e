//! Cost tracking for LLM-backed operations.
//!
//! The engine records usage per agent and asks a single budget question;
//! billing internals stay outside the core.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{Datelike, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;

/// Usage attached to one tracked operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionUsage {
    /// Which extractor ran, e.g. `connection-classification-standard`.
    pub extractor_type: String,
    /// Cost in provider units.
    pub cost: f64,
    /// Memories produced by the operation.
    pub memories_extracted: usize,
    /// Messages consumed by the operation.
    pub messages_processed: usize,
    /// Provider/model/timing annotations.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// Cost accounting contract. Implementations must be safe to call
/// concurrently; `check_budget` is monotone within a window.
#[async_trait]
pub trait CostTracker: Send + Sync {
    /// Record one operation's usage.
    async fn track_extraction(&self, agent_id: &str, usage: ExtractionUsage) -> Result<()>;

    /// Whether the agent is still under its monthly budget.
    async fn check_budget(&self, agent_id: &str, monthly_budget: f64) -> Result<bool>;
}

/// In-process cost tracker keyed by `(agent, YYYY-MM)`.
#[derive(Default)]
pub struct InMemoryCostTracker {
    totals: RwLock<HashMap<(String, String), f64>>,
}

impl InMemoryCostTracker {
    /// Empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn window() -> String {
        let now = Utc::now();
        format!("{:04}-{:02}", now.year(), now.month())
    }

    /// Spend recorded for the agent in the current window.
    #[must_use]
    pub fn current_spend(&self, agent_id: &str) -> f64 {
        self.totals
            .read()
            .get(&(agent_id.to_string(), Self::window()))
            .copied()
            .unwrap_or(0.0)
    }
}

#[async_trait]
impl CostTracker for InMemoryCostTracker {
    async fn track_extraction(&self, agent_id: &str, usage: ExtractionUsage) -> Result<()> {
        let key = (agent_id.to_string(), Self::window());
        let mut totals = self.totals.write();
        *totals.entry(key).or_insert(0.0) += usage.cost.max(0.0);
        tracing::debug!(
            agent_id = %agent_id,
            extractor = %usage.extractor_type,
            cost = usage.cost,
            "tracked extraction"
        );
        Ok(())
    }

    async fn check_budget(&self, agent_id: &str, monthly_budget: f64) -> Result<bool> {
        Ok(self.current_spend(agent_id) < monthly_budget)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(cost: f64) -> ExtractionUsage {
        ExtractionUsage {
            extractor_type: "connection-classification-standard".into(),
            cost,
            memories_extracted: 0,
            messages_processed: 2,
            metadata: Map::new(),
        }
    }

    #[tokio::test]
    async fn budget_check_is_monotone() {
        let tracker = InMemoryCostTracker::new();
        assert!(tracker.check_budget("agent", 1.0).await.unwrap());

        tracker.track_extraction("agent", usage(0.6)).await.unwrap();
        assert!(tracker.check_budget("agent", 1.0).await.unwrap());

        tracker.track_extraction("agent", usage(0.6)).await.unwrap();
        assert!(!tracker.check_budget("agent", 1.0).await.unwrap());
        // Once denied within a window, further spend cannot re-admit.
        assert!(!tracker.check_budget("agent", 1.0).await.unwrap());
    }

    #[tokio::test]
    async fn agents_are_tracked_independently() {
        let tracker = InMemoryCostTracker::new();
        tracker.track_extraction("a", usage(5.0)).await.unwrap();
        assert!(!tracker.check_budget("a", 1.0).await.unwrap());
        assert!(tracker.check_budget("b", 1.0).await.unwrap());
    }

    #[tokio::test]
    async fn negative_costs_do_not_reduce_spend() {
        let tracker = InMemoryCostTracker::new();
        tracker.track_extraction("a", usage(1.0)).await.unwrap();
        tracker.track_extraction("a", usage(-4.0)).await.unwrap();
        assert!((tracker.current_spend("a") - 1.0).abs() < 1e-9);
    }
}

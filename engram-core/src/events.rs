//! Lifecycle event emission.
//!
//! Events flow to the storage provider's optional evolution sink. Emission
//! is fire-and-forget: failures are logged at warn and never propagate into
//! the pipeline that produced them.

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::warn;

use crate::storage::EvolutionSink;
use crate::types::{MemoryEvent, MemoryEventType};

/// Build a lifecycle event stamped with the current time.
#[must_use]
pub fn lifecycle_event(
    memory_id: &str,
    user_id: &str,
    agent_id: &str,
    event_type: MemoryEventType,
    metadata: Map<String, Value>,
) -> MemoryEvent {
    MemoryEvent {
        memory_id: memory_id.to_string(),
        user_id: user_id.to_string(),
        agent_id: agent_id.to_string(),
        event_type,
        timestamp: Utc::now(),
        metadata,
    }
}

/// Emit one event to the sink, if present. Failures are logged only.
pub async fn emit(sink: Option<&dyn EvolutionSink>, event: MemoryEvent) {
    let Some(sink) = sink else { return };
    if let Err(err) = sink.track_event(event).await {
        warn!(error = %err, "failed to track lifecycle event");
    }
}

/// Emit a batch of events to the sink, if present. Failures are logged only.
pub async fn emit_batch(sink: Option<&dyn EvolutionSink>, events: Vec<MemoryEvent>) {
    let Some(sink) = sink else { return };
    if events.is_empty() {
        return;
    }
    let count = events.len();
    if let Err(err) = sink.track_event_batch(events).await {
        warn!(error = %err, count, "failed to track lifecycle event batch");
    }
}

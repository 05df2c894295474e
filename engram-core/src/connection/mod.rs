//! # Connection engine
//!
//! Typed relationship discovery between memories: embedding-based candidate
//! selection, three-band smart triage, an in-process graph with traversal,
//! clustering, and centrality, and a single-consumer discovery queue.

mod classify;
mod engine;
mod graph;
mod queue;

pub use classify::{
    classify_with_llm, deterministic_fallback, smart_triage, temporal_shortcut, Classification,
    ClassificationObject, TriageOutcome,
};
pub use engine::{CentralMemory, ConnectionEngine, DiscoverOptions};
pub use graph::{ConnectionGraph, GraphConfig};
pub use queue::{ConnectionDiscoveryQueue, DiscoveryRunner};

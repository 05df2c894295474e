//! # Memory tiers
//!
//! Thin typed facades over the storage contract. Each facade attaches its
//! tier's defaults and metadata shape at write time, validates the caller's
//! `user_id`, and refuses to project memories of another tier.

mod episodic;
mod procedural;
mod semantic;
mod working;

pub use episodic::{EpisodicConfig, EpisodicMemory, EpisodicMemoryItem, EpisodicStoreOptions};
pub use procedural::{
    LearnResult, PatternMatch, ProceduralConfig, ProceduralMemory, ProceduralPattern,
    ProceduralStoreOptions,
};
pub use semantic::{
    ConsolidationResult, SemanticConfig, SemanticFact, SemanticMemory, SemanticStoreOptions,
};
pub use working::{WorkingConfig, WorkingMemory, WorkingMemoryItem, WorkingStoreOptions};

use crate::error::{Error, Result};

/// Reject empty user ids with the contract's validation kind.
pub(crate) fn require_user_id(user_id: &str) -> Result<()> {
    if user_id.trim().is_empty() {
        return Err(Error::Validation("userId must not be empty".into()));
    }
    Ok(())
}

/// Tokenize for trigger/keyword matching: lowercase alphanumeric runs.
pub(crate) fn match_terms(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// Fraction of `query` terms present in `candidate` terms, in [0, 1].
pub(crate) fn term_overlap(query: &str, candidate: &str) -> f64 {
    let query_terms = match_terms(query);
    if query_terms.is_empty() {
        return 0.0;
    }
    let candidate_terms = match_terms(candidate);
    let hits = query_terms
        .iter()
        .filter(|t| candidate_terms.contains(t))
        .count();
    hits as f64 / query_terms.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_user_id_is_validation_error() {
        assert_eq!(require_user_id("").unwrap_err().kind(), "validation");
        assert_eq!(require_user_id("  ").unwrap_err().kind(), "validation");
        assert!(require_user_id("alice").is_ok());
    }

    #[test]
    fn term_overlap_is_fractional() {
        assert!((term_overlap("deploy the service", "deploy a service now") - 2.0 / 3.0).abs() < 1e-9);
        assert!((term_overlap("", "anything")).abs() < 1e-9);
    }
}

//! Error types for the memory engine.
//!
//! Every failure in the engine maps onto a closed set of kinds so callers can
//! route on them: `validation`, `storage`, `llm-api-key`, `llm`, `embedding`,
//! `budget`, `internal`.

/// Result type alias for memory-engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error kinds for the memory engine
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid caller input: empty `user_id`, malformed thresholds, type
    /// mismatches, missing required configuration.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Transport or backend failure from the storage provider.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Missing credentials for the resolved LLM provider.
    #[error("Missing LLM API key: {0}")]
    LlmApiKey(String),

    /// Structured-output or provider failure during classification/analysis.
    #[error("LLM error: {0}")]
    Llm(String),

    /// Embedding provider failure or unsupported adapter response.
    #[error("Embedding error: {0}")]
    Embedding(#[from] anyhow::Error),

    /// Budget denial from the cost tracker. Advisory: callers fall back
    /// rather than fail the pipeline.
    #[error("Budget exceeded: {0}")]
    Budget(String),

    /// Unreachable invariants and lifecycle faults (e.g. a destroyed queue).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        // Malformed structured output is an LLM-contract failure.
        Error::Llm(err.to_string())
    }
}

impl Error {
    /// Stable kind string, useful for logs and metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation",
            Error::Storage(_) => "storage",
            Error::LlmApiKey(_) => "llm-api-key",
            Error::Llm(_) => "llm",
            Error::Embedding(_) => "embedding",
            Error::Budget(_) => "budget",
            Error::Internal(_) => "internal",
        }
    }

    /// Check if this error is recoverable (can retry with backoff)
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Storage(_) | Error::Llm(_) | Error::Embedding(_) => true,
            Error::Validation(_)
            | Error::LlmApiKey(_)
            | Error::Budget(_)
            | Error::Internal(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_strings_match_contract() {
        assert_eq!(Error::Validation("x".into()).kind(), "validation");
        assert_eq!(Error::Storage("x".into()).kind(), "storage");
        assert_eq!(Error::LlmApiKey("x".into()).kind(), "llm-api-key");
        assert_eq!(Error::Llm("x".into()).kind(), "llm");
        assert_eq!(Error::Budget("x".into()).kind(), "budget");
        assert_eq!(Error::Internal("x".into()).kind(), "internal");
    }

    #[test]
    fn transient_kinds_are_recoverable() {
        assert!(Error::Storage("timeout".into()).is_recoverable());
        assert!(Error::Llm("rate limited".into()).is_recoverable());
        assert!(!Error::Validation("empty userId".into()).is_recoverable());
        assert!(!Error::Budget("monthly cap".into()).is_recoverable());
    }

    #[test]
    fn serde_error_maps_to_llm_kind() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: Error = parse_err.into();
        assert_eq!(err.kind(), "llm");
    }
}

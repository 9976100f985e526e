//! Error types for the spending coach pipeline

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, CoachError>;

#[derive(Error, Debug)]
pub enum CoachError {

    // =============================
    // Pipeline Outcomes
    // =============================

    /// Parse or range-validation failure. Surfaced to the caller; the
    /// submission is rejected with nothing persisted.
    #[error("Unprocessable input: {0}")]
    UnprocessableInput(String),

    /// Missing config, call failure, timeout, or safety-check failure on a
    /// generative step. Never surfaced; callers substitute their fallback.
    #[error("Generation unavailable: {0}")]
    GenerationUnavailable(String),

    /// Trained artifacts missing or corrupt. Silently downgrades the risk
    /// scorer to the heuristic path.
    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    /// Store failure during the commit step.
    #[error("Persistence failure: {0}")]
    PersistenceFailure(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl CoachError {
    /// Whether this error ever reaches an end user. Everything else is
    /// absorbed by a deterministic fallback somewhere in the pipeline.
    pub fn is_user_visible(&self) -> bool {
        matches!(
            self,
            CoachError::UnprocessableInput(_) | CoachError::PersistenceFailure(_)
        )
    }
}

//! Error types for the synthesis pipeline.

use std::path::PathBuf;

/// Errors produced by synthesis operations.
#[derive(Debug, thiserror::Error)]
pub enum SynthesisError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("vector dimensionality mismatch: {left} vs {right}")]
    DimensionMismatch { left: usize, right: usize },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("no backups exist yet; nothing to roll back to")]
    EmptyHistory,

    #[error("state consistency check failed for {path}: {reason}; run `soul rollback` to restore a known-good document")]
    StateConsistency { path: PathBuf, reason: String },

    #[error("collaborator failed: {0}")]
    Collaborator(String),

    #[error("collaborator timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("synthesis cancelled before backup")]
    Cancelled,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SynthesisError {
    /// Transient errors are retried once before the affected unit is skipped.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Collaborator(_) | Self::Timeout { .. })
    }
}

/// Result type for synthesis operations.
pub type Result<T> = std::result::Result<T, SynthesisError>;

//! Error types for the Driftwatch engine.

use thiserror::Error;

/// All possible errors from the Driftwatch engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("window step must be positive, got {0}s")]
    InvalidStep(i64),

    #[error("batch size must be at least 1")]
    InvalidBatchSize,

    #[error("invalid checkpoint '{text}': {reason}")]
    InvalidCheckpoint { text: String, reason: String },
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

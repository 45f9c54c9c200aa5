//! Error types for the RustASR decoder.

use thiserror::Error;

/// Main error type for decoder operations.
#[derive(Error, Debug)]
pub enum AsrError {
    /// Invalid or missing configuration values.
    #[error("Config error: {0}")]
    Config(String),

    /// Acoustic model, dictionary or language model errors.
    #[error("Model error: {0}")]
    Model(String),

    /// No HMM exists for the requested unit in context.
    #[error("Missing HMM: {0}")]
    MissingHmm(String),

    /// Search lifecycle errors (e.g. recognizing before start).
    #[error("Search error: {0}")]
    Search(String),

    /// Acoustic scoring errors (malformed feature frames, worker failures).
    #[error("Scoring error: {0}")]
    Scoring(String),

    /// I/O errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Tensor errors from the batched scorer.
    #[error("Tensor error: {0}")]
    Candle(#[from] candle_core::Error),

    /// JSON errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for decoder operations.
pub type AsrResult<T> = Result<T, AsrError>;

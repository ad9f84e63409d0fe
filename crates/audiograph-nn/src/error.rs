//! Error types for audiograph-nn.

use thiserror::Error;

/// audiograph-nn error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Candle tensor error.
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// Graph construction or batching error.
    #[error("graph error: {0}")]
    Graph(#[from] audiograph_core::Error),

    /// Entity-kind name outside the closed vocabulary, or with no handler.
    #[error("invalid node set: {0}")]
    InvalidNodeSet(String),

    /// Dimension mismatch.
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    /// Invalid configuration.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// The graph lacks an edge set the schedule needs.
    #[error("missing view: {0}")]
    MissingView(String),

    /// IO error while loading configuration.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error while loading configuration.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;

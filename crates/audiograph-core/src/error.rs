//! Error types for graph construction and batching.

use thiserror::Error;

/// Errors raised while building or merging graph tensors.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    /// A matrix or stack has the wrong shape.
    #[error("shape mismatch in {what}: expected {expected}, got {got}")]
    ShapeMismatch {
        what: String,
        expected: String,
        got: String,
    },

    /// Graphs in one batch do not share a node-set/edge-set schema.
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Merge called with no graphs.
    #[error("cannot merge an empty batch")]
    EmptyBatch,

    /// An edge endpoint outside the node set.
    #[error("edge endpoint {index} out of range for node set of size {size}")]
    InvalidIndex { index: usize, size: usize },
}

impl Error {
    pub(crate) fn shape(what: impl Into<String>, expected: impl ToString, got: impl ToString) -> Self {
        Self::ShapeMismatch {
            what: what.into(),
            expected: expected.to_string(),
            got: got.to_string(),
        }
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;

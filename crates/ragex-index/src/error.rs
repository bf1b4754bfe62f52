//! Error types for ragex-index.

use std::num::TryFromIntError;

/// Errors that can occur while indexing or querying code.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// IO error reading source files or the metadata record.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Vector store error.
    #[error("vector store error: {0}")]
    Store(#[from] ragex_store::VectorStoreError),

    /// LLM provider error (embedding or generation).
    #[error("LLM error: {0}")]
    Llm(#[from] ragex_llm::LlmError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The question or prompt was blank.
    #[error("query is empty")]
    EmptyQuery,

    /// Chunks and embeddings were not paired one to one.
    #[error("{chunks} chunks but {embeddings} embeddings")]
    LengthMismatch { chunks: usize, embeddings: usize },

    /// An embedding had a different size than the collection expects.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("{operation} timed out after {seconds}s")]
    Timeout {
        operation: &'static str,
        seconds: u64,
    },

    /// No chunks were produced from any of the given repositories.
    #[error("nothing to index")]
    NothingToIndex,

    /// Integer conversion error.
    #[error("integer conversion failed: {0}")]
    IntConversion(#[from] TryFromIntError),

    /// Generic catch-all error.
    #[error("{0}")]
    Other(String),
}

impl IndexError {
    /// Whether the failure came from an unreachable backend rather than bad input
    /// or missing data.
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        match self {
            Self::Store(ragex_store::VectorStoreError::Connection(_)) | Self::Timeout { .. } => {
                true
            }
            Self::Llm(e) => e.is_unavailable(),
            _ => false,
        }
    }
}

/// Result type alias using `IndexError`.
pub type Result<T> = std::result::Result<T, IndexError>;

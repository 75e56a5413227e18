//! Error taxonomy for the retrieval core.
//!
//! Every fallible operation returns a typed [`RetrievalError`] naming the
//! failing stage, so callers can distinguish a bad document from a broken
//! index from an unreachable embedding service.

use std::path::Path;

pub type Result<T> = std::result::Result<T, RetrievalError>;

#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    /// A document could not be split into chunks.
    #[error("chunking failed for document '{document_id}': {reason}")]
    Chunking { document_id: String, reason: String },

    /// The embedding service failed after exhausting retries, returned a
    /// malformed response, or timed out.
    #[error("embedding failed: {reason}")]
    Embedding { reason: String },

    /// A mutation would have broken the index/metadata/registry alignment
    /// and was rejected.
    #[error("index consistency violation: {reason}")]
    IndexConsistency { reason: String },

    /// A vector search was issued against a store with no chunks.
    #[error("cannot search an empty index")]
    EmptyIndex,

    /// Snapshot load or persist failed.
    #[error("persistence failure at '{path}': {reason}")]
    Persistence { path: String, reason: String },

    /// Invalid or unreadable configuration.
    #[error("invalid configuration: {reason}")]
    Config { reason: String },

    /// A source file could not be scanned or read.
    #[error("source failure at '{path}': {reason}")]
    Source { path: String, reason: String },
}

impl RetrievalError {
    pub(crate) fn embedding(reason: impl Into<String>) -> Self {
        Self::Embedding {
            reason: reason.into(),
        }
    }

    pub(crate) fn consistency(reason: impl Into<String>) -> Self {
        Self::IndexConsistency {
            reason: reason.into(),
        }
    }

    pub(crate) fn persistence(path: &Path, reason: impl ToString) -> Self {
        Self::Persistence {
            path: path.display().to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn source(path: &Path, reason: impl ToString) -> Self {
        Self::Source {
            path: path.display().to_string(),
            reason: reason.to_string(),
        }
    }
}

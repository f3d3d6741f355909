//! Error types for the `adk-knowledge` crate.

use thiserror::Error;

/// Errors that can occur in knowledge base operations.
#[derive(Debug, Error)]
pub enum KnowledgeError {
    /// Input was rejected before any state was touched.
    #[error("{0}")]
    Validation(String),

    /// A batch of vectors and its metadata had different lengths.
    #[error("Embeddings and metadata must have the same length ({vectors} vectors, {metadata} metadata records)")]
    LengthMismatch {
        /// Number of vectors supplied.
        vectors: usize,
        /// Number of metadata records supplied.
        metadata: usize,
    },

    /// A vector did not match the dimension the store was configured with.
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// The configured embedding dimension.
        expected: usize,
        /// The dimension that was supplied.
        actual: usize,
    },

    /// A referenced file or document does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The file extension is not handled by the document processor.
    #[error("Unsupported file type: {0}")]
    UnsupportedType(String),

    /// Text could not be extracted from a document.
    #[error("Extraction error ({path}): {message}")]
    Extraction {
        /// The path of the document being processed.
        path: String,
        /// A description of the failure.
        message: String,
    },

    /// An error occurred during embedding generation.
    #[error("Embedding error ({provider}): {message}")]
    Embedding {
        /// The embedding provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// Saved state was missing pieces or inconsistent.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// A configuration validation error.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

impl KnowledgeError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn embedding(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Embedding { provider: provider.into(), message: message.into() }
    }

    /// Whether the input was rejected before any mutation happened.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::LengthMismatch { .. })
    }

    /// Configuration errors that no retry can fix.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config(_) | Self::DimensionMismatch { .. })
    }
}

/// A convenience result type for knowledge base operations.
pub type Result<T> = std::result::Result<T, KnowledgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_messages_are_shown_verbatim() {
        let err = KnowledgeError::validation("No text content found in document");
        assert_eq!(err.to_string(), "No text content found in document");
        assert!(err.is_validation());
        assert!(!err.is_fatal());
    }

    #[test]
    fn dimension_mismatch_is_fatal() {
        let err = KnowledgeError::DimensionMismatch { expected: 384, actual: 768 };
        assert!(err.is_fatal());
        assert_eq!(err.to_string(), "Dimension mismatch: expected 384, got 768");
    }

    #[test]
    fn length_mismatch_counts_as_validation() {
        let err = KnowledgeError::LengthMismatch { vectors: 1, metadata: 2 };
        assert!(err.is_validation());
        assert!(err.to_string().contains("same length"));
    }
}

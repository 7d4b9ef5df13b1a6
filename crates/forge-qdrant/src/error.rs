//! Error types for the Qdrant-backed vector index.

use thiserror::Error;

/// Errors internal to this crate's Qdrant plumbing, before they're folded
/// into the orchestrator's [`forge_core::Error`] taxonomy.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum QdrantError {
    #[error("qdrant client error: {0}")]
    Client(#[from] qdrant_client::QdrantError),

    #[error("vector has {actual} dimensions, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Client/transport failures are retryable; a dimensionality mismatch is a
/// caller bug, so it folds into `Validation` instead.
impl From<QdrantError> for forge_core::Error {
    fn from(err: QdrantError) -> Self {
        match err {
            QdrantError::Client(e) => forge_core::Error::dependency("qdrant", e.to_string()),
            QdrantError::DimensionMismatch { expected, actual } => forge_core::Error::Validation(format!(
                "vector has {actual} dimensions, expected {expected}"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dimension_mismatch_is_a_validation_error() {
        let err: forge_core::Error = QdrantError::DimensionMismatch { expected: 1536, actual: 3 }.into();
        assert!(!err.is_retryable());
    }
}

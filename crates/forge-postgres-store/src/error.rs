//! Error types for the PostgreSQL durable store.

use thiserror::Error;

/// Errors internal to this crate's PostgreSQL plumbing, before they're
/// folded into the orchestrator's [`forge_core::Error`] taxonomy.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PostgresError {
    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),
}

/// Every PostgreSQL-specific failure folds into [`forge_core::Error::Dependency`]
/// (retryable) except a misconfigured table name, which is a setup mistake
/// rather than a transient condition.
impl From<PostgresError> for forge_core::Error {
    fn from(err: PostgresError) -> Self {
        match err {
            PostgresError::Postgres(e) => forge_core::Error::dependency("postgres", e.to_string()),
            PostgresError::Json(e) => forge_core::Error::dependency("postgres", format!("serialization: {e}")),
            PostgresError::InvalidIdentifier(msg) => forge_core::Error::Validation(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_identifier_is_a_validation_error() {
        let err: forge_core::Error = PostgresError::InvalidIdentifier("bad name".into()).into();
        assert!(!err.is_retryable());
    }

    #[test]
    fn json_error_is_retryable() {
        let json_err = serde_json::from_str::<i32>("not json").unwrap_err();
        let err: forge_core::Error = PostgresError::Json(json_err).into();
        assert!(err.is_retryable());
    }
}

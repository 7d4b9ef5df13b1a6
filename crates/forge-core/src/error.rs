//! Error taxonomy for the execution orchestrator.
//!
//! Every fallible operation in this crate returns [`Result<T>`]. Variants map
//! directly onto the retry/propagation rules each caller must follow: a
//! [`Error::Validation`] never gets retried, a [`Error::Dependency`] or
//! [`Error::Timeout`] does (subject to the activity's retry policy), and an
//! [`Error::Integrity`] aborts the owning workflow outright.

use thiserror::Error;

use crate::ids::{TaskId, WorkflowId};

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// The orchestrator's error taxonomy (spec §7).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Bad input. Surfaces to the caller; never retried.
    #[error("validation error: {0}")]
    Validation(String),

    /// An external service (LLM backend, sandbox, store, vector index) is
    /// unreachable or returned a transient failure. Retried with backoff.
    #[error("dependency error calling {service}: {reason}")]
    Dependency {
        /// Name of the external collaborator that failed.
        service: String,
        /// Human-readable cause.
        reason: String,
    },

    /// An activity exceeded its budget. Retried until `max_attempts`.
    #[error("timeout in {activity} after {elapsed_ms}ms (budget {budget_ms}ms)")]
    Timeout {
        /// The activity kind that timed out.
        activity: String,
        /// How long the activity actually ran.
        elapsed_ms: u64,
        /// The configured start-to-close budget.
        budget_ms: u64,
    },

    /// A bounded resource (sandbox queue, cache) is saturated. Backoff, then
    /// surface if the condition persists.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// An invariant was violated (e.g. a dependency cycle). Fatal: the owning
    /// workflow transitions to `FAILED` and is not retried.
    #[error("integrity error: {0}")]
    Integrity(String),

    /// Cooperative cancellation. Not an error in the conventional sense, but
    /// modeled here so it propagates through the same `Result` plumbing.
    #[error("cancelled")]
    Cancelled,

    /// A task referenced by id was not found in the expected arena.
    #[error("task {0} not found")]
    TaskNotFound(TaskId),

    /// A workflow referenced by id was not found.
    #[error("workflow {0} not found")]
    WorkflowNotFound(WorkflowId),

    /// JSON (de)serialization failure.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Binary (de)serialization failure (checkpoints).
    #[error("binary encoding error: {0}")]
    Bincode(#[from] bincode::Error),

    /// Checkpoint payload failed its integrity check.
    #[error("checkpoint integrity error: {0}")]
    CheckpointIntegrity(#[from] crate::workflow::checkpoint::CheckpointIntegrityError),

    /// I/O failure (capsule packaging).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the runtime's retry policy should retry an activity that
    /// failed with this error (spec §4.2's non-retryable list).
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Error::Validation(_) | Error::Integrity(_) | Error::Cancelled
        )
    }

    /// Shorthand constructor for dependency failures.
    pub fn dependency(service: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Dependency {
            service: service.into(),
            reason: reason.into(),
        }
    }
}

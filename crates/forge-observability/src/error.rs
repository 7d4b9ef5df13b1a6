//! Error types for the observability crate.

use thiserror::Error;

/// Error type for observability operations.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum Error {
    /// OpenTelemetry SDK initialization failed.
    #[error("failed to initialize OpenTelemetry: {0}")]
    InitializationError(String),

    /// Tracing configuration error.
    #[error("invalid tracing configuration: {0}")]
    ConfigurationError(String),

    /// Exporter connection error.
    #[error("failed to connect to exporter endpoint: {0}")]
    ExporterConnectionError(String),

    /// Span creation error.
    #[error("failed to create span: {0}")]
    SpanCreationError(String),

    /// Metrics registry/server error.
    #[error("metrics operation failed: {0}")]
    Metrics(String),
}

/// Result type for observability operations
pub type Result<T> = std::result::Result<T, Error>;

//! Structured logging, metrics, and LLM cost pricing for the execution
//! orchestrator and its satellite crates.
//!
//! This crate carries the ambient stack every crate in the workspace shares:
//! - OpenTelemetry-backed distributed tracing ([`init_tracing`])
//! - A Prometheus metrics registry ([`MetricsRegistry`])
//! - The LLM pricing table used to cost every generation call ([`cost`])
//!
//! It has no dependency on `forge-core` — the orchestrator depends on this
//! crate, never the other way around.
//!
//! # Example
//!
//! ```rust,no_run
//! use forge_observability::{TracingConfig, init_tracing};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = TracingConfig::new()
//!         .with_service_name("forge-orchestrator")
//!         .with_otlp_endpoint("http://localhost:4317")
//!         .with_sampling_rate(1.0);
//!
//!     init_tracing(config).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod cost;
pub mod error;
pub mod exporter;
pub mod metrics;
pub mod tracer;

#[cfg(feature = "metrics-server")]
pub mod metrics_server;

pub use config::{PropagatorType, SamplingStrategy, TracingConfig};
pub use cost::{ModelPricing, PricedResult, PricingTable};
pub use error::{Error, Result};
pub use exporter::init_tracing;
pub use metrics::{export_metrics, init_default_recorder, MetricsRegistry};
pub use tracer::Traceable;

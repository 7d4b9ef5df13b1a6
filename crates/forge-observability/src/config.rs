//! Configuration for OpenTelemetry tracing

use serde::{Deserialize, Serialize};

/// Context propagation protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PropagatorType {
    /// W3C Trace Context (recommended for cross-service tracing)
    #[default]
    TraceContext,
    /// Jaeger native propagation format
    Jaeger,
    /// B3 propagation (Zipkin)
    B3,
    /// AWS X-Ray propagation
    XRay,
}

/// Sampling strategy for span collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub enum SamplingStrategy {
    /// Always sample (100% of spans)
    #[default]
    Always,
    /// Never sample (0% of spans)
    Never,
    /// Sample at specified rate (0.0 to 1.0)
    Probabilistic(f64),
    /// Sample based on parent span decision
    ParentBased {
        /// Sampling strategy for root spans
        root: Box<SamplingStrategy>,
    },
}

/// Configuration for OpenTelemetry tracing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TracingConfig {
    /// Service name to identify this application in traces
    pub service_name: String,

    /// OpenTelemetry Collector endpoint (OTLP/gRPC)
    /// Example: "<http://localhost:4317>" (Jaeger)
    pub otlp_endpoint: Option<String>,

    /// Sampling strategy
    pub sampling: SamplingStrategy,

    /// Context propagation protocol
    pub propagator: PropagatorType,

    /// Enable stdout exporter for debugging
    pub enable_stdout: bool,

    /// Additional resource attributes (key-value pairs)
    pub resource_attributes: Vec<(String, String)>,
}

impl TracingConfig {
    /// Create a new tracing configuration with defaults
    ///
    /// # Example
    ///
    /// ```rust
    /// use forge_observability::TracingConfig;
    ///
    /// let config = TracingConfig::new()
    ///     .with_service_name("forge-orchestrator")
    ///     .with_otlp_endpoint("http://localhost:4317")
    ///     .with_sampling_rate(1.0);
    /// ```
    #[must_use]
    pub fn new() -> Self {
        Self {
            service_name: "forge-orchestrator".to_string(),
            otlp_endpoint: None,
            sampling: SamplingStrategy::Always,
            propagator: PropagatorType::TraceContext,
            enable_stdout: false,
            resource_attributes: Vec::new(),
        }
    }

    /// Set the service name
    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = name.into();
        self
    }

    /// Set the OTLP endpoint
    pub fn with_otlp_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.otlp_endpoint = Some(endpoint.into());
        self
    }

    /// Set the sampling rate (0.0 to 1.0)
    #[must_use]
    pub fn with_sampling_rate(mut self, rate: f64) -> Self {
        self.sampling = if rate >= 1.0 {
            SamplingStrategy::Always
        } else if rate <= 0.0 {
            SamplingStrategy::Never
        } else {
            SamplingStrategy::Probabilistic(rate)
        };
        self
    }

    /// Set the sampling strategy
    #[must_use]
    pub fn with_sampling_strategy(mut self, strategy: SamplingStrategy) -> Self {
        self.sampling = strategy;
        self
    }

    /// Set the context propagator
    #[must_use]
    pub fn with_propagator(mut self, propagator: PropagatorType) -> Self {
        self.propagator = propagator;
        self
    }

    /// Enable stdout exporter for debugging
    #[must_use]
    pub fn with_stdout(mut self, enabled: bool) -> Self {
        self.enable_stdout = enabled;
        self
    }

    /// Add a resource attribute (key-value pair)
    pub fn with_resource_attribute(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.resource_attributes.push((key.into(), value.into()));
        self
    }
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self::new()
    }
}

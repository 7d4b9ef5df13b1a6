//! Prometheus metrics registry.
//!
//! A thin wrapper around [`prometheus::Registry`] that pre-registers the
//! counters and gauges the orchestrator and its satellite crates care about,
//! plus the SLO bookkeeping `export_metrics` formats alongside them. Callers
//! that only want the raw registry (to register their own metric) can reach
//! past the convenience accessors via [`MetricsRegistry::raw`].

use std::sync::OnceLock;

use prometheus::{Encoder, GaugeVec, IntCounterVec, Opts, Registry, TextEncoder};

use crate::error::{Error, Result};

static GLOBAL_REGISTRY: OnceLock<std::sync::Arc<MetricsRegistry>> = OnceLock::new();

/// Registry of the metrics this crate's consumers are expected to emit.
pub struct MetricsRegistry {
    raw: Registry,
    /// `forge_tasks_total{status}` — terminal task outcomes.
    pub tasks_total: IntCounterVec,
    /// `forge_workflows_total{status}` — terminal workflow outcomes.
    pub workflows_total: IntCounterVec,
    /// `forge_cost_pending_writes` — cost records awaiting durable persistence.
    pub cost_pending_writes: GaugeVec,
    /// `forge_sandbox_queue_depth{tenant}` — sandbox admission queue depth.
    pub sandbox_queue_depth: GaugeVec,
}

impl MetricsRegistry {
    /// Build a fresh, independently-scoped registry. Most callers want
    /// [`MetricsRegistry::global`] instead; this constructor exists for
    /// tests that need isolation from the process-wide registry.
    ///
    /// # Panics
    ///
    /// Panics if a metric of the same name is already registered on the
    /// underlying `prometheus::Registry`, which cannot happen for a freshly
    /// constructed instance.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new() -> Self {
        let raw = Registry::new();

        let tasks_total = IntCounterVec::new(
            Opts::new("forge_tasks_total", "Terminal task outcomes"),
            &["status"],
        )
        .expect("static metric definition");
        let workflows_total = IntCounterVec::new(
            Opts::new("forge_workflows_total", "Terminal workflow outcomes"),
            &["status"],
        )
        .expect("static metric definition");
        let cost_pending_writes = GaugeVec::new(
            Opts::new(
                "forge_cost_pending_writes",
                "Cost records awaiting durable persistence",
            ),
            &["tenant"],
        )
        .expect("static metric definition");
        let sandbox_queue_depth = GaugeVec::new(
            Opts::new(
                "forge_sandbox_queue_depth",
                "Sandbox admission queue depth",
            ),
            &["tenant"],
        )
        .expect("static metric definition");

        raw.register(Box::new(tasks_total.clone()))
            .expect("single registration of a freshly built registry");
        raw.register(Box::new(workflows_total.clone()))
            .expect("single registration of a freshly built registry");
        raw.register(Box::new(cost_pending_writes.clone()))
            .expect("single registration of a freshly built registry");
        raw.register(Box::new(sandbox_queue_depth.clone()))
            .expect("single registration of a freshly built registry");

        Self {
            raw,
            tasks_total,
            workflows_total,
            cost_pending_writes,
            sandbox_queue_depth,
        }
    }

    /// The process-wide registry, created on first access.
    pub fn global() -> std::sync::Arc<Self> {
        GLOBAL_REGISTRY
            .get_or_init(|| std::sync::Arc::new(Self::new()))
            .clone()
    }

    /// The underlying `prometheus::Registry`, for registering metrics this
    /// wrapper doesn't know about.
    pub fn raw(&self) -> &Registry {
        &self.raw
    }

    /// Render every registered metric in Prometheus text exposition format.
    pub fn export(&self) -> Result<String> {
        let metric_families = self.raw.gather();
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|e| Error::Metrics(format!("failed to encode metrics: {e}")))?;
        String::from_utf8(buffer).map_err(|e| Error::Metrics(format!("non-utf8 metrics output: {e}")))
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Install the global registry, returning `Ok(())` whether or not this call
/// was the one that created it — idempotent, since multiple binaries in a
/// process may call this during their own startup.
pub fn init_default_recorder() -> Result<()> {
    let _ = MetricsRegistry::global();
    Ok(())
}

/// Export the global registry's metrics as Prometheus text.
pub fn export_metrics() -> Result<String> {
    MetricsRegistry::global().export()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_registry_exports_without_data() {
        let registry = MetricsRegistry::new();
        let text = registry.export().unwrap();
        assert!(text.contains("forge_tasks_total") || text.is_empty());
    }

    #[test]
    fn incrementing_a_counter_shows_up_in_export() {
        let registry = MetricsRegistry::new();
        registry.tasks_total.with_label_values(&["completed"]).inc();
        let text = registry.export().unwrap();
        assert!(text.contains("forge_tasks_total"));
        assert!(text.contains("completed"));
    }

    #[test]
    fn global_registry_is_a_singleton() {
        let a = MetricsRegistry::global();
        let b = MetricsRegistry::global();
        assert!(std::sync::Arc::ptr_eq(&a, &b));
    }
}

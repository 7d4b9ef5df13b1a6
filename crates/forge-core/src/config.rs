//! Process-wide configuration, built once from the environment.
//!
//! The core never re-reads environment variables after startup (spec.md §6):
//! `OrchestratorConfig::from_env` is the single place that touches
//! `std::env`, and the resulting struct is passed down as an explicit
//! dependency, never read through a global.

use std::env;
use std::time::Duration;

use crate::constants;

/// Immutable runtime configuration for the orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Maximum number of tasks dispatched concurrently within a batch.
    pub batch_concurrency: usize,
    /// Maximum retries per task before it is recorded as terminally failed.
    pub max_retries: u32,
    /// Heartbeat interval activities must honor.
    pub heartbeat_interval: Duration,
    /// Confidence threshold below which a workflow enters `HITL_REVIEW`.
    pub hitl_review_threshold: f64,
    /// How long a workflow waits in `HITL_REVIEW` before converting to
    /// `FAILED`.
    pub hitl_review_timeout: Duration,
    /// Pattern cache entry TTL.
    pub pattern_cache_ttl: Duration,
    /// Minimum confidence required to read or write a pattern cache entry.
    pub pattern_cache_min_confidence: f64,
    /// Maximum concurrent sandbox executions across all tenants.
    pub sandbox_max_concurrency: usize,
    /// Default vector dimensionality for the vector index.
    pub vector_dimensionality: usize,
    /// Pricing fallback applied to models absent from the pricing table.
    pub default_input_price_per_million: f64,
    /// Pricing fallback applied to models absent from the pricing table.
    pub default_output_price_per_million: f64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            batch_concurrency: constants::DEFAULT_BATCH_CONCURRENCY,
            max_retries: constants::DEFAULT_MAX_RETRIES,
            heartbeat_interval: constants::DEFAULT_HEARTBEAT_INTERVAL,
            hitl_review_threshold: constants::HITL_REVIEW_THRESHOLD,
            hitl_review_timeout: constants::HITL_REVIEW_TIMEOUT,
            pattern_cache_ttl: constants::PATTERN_CACHE_TTL,
            pattern_cache_min_confidence: constants::PATTERN_CACHE_MIN_CONFIDENCE,
            sandbox_max_concurrency: constants::DEFAULT_BATCH_CONCURRENCY,
            vector_dimensionality: constants::DEFAULT_VECTOR_DIMENSIONALITY,
            default_input_price_per_million: 1.0,
            default_output_price_per_million: 2.0,
        }
    }
}

impl OrchestratorConfig {
    /// Build configuration from environment variables, falling back to
    /// spec-fixed defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            batch_concurrency: env_usize("FORGE_BATCH_CONCURRENCY", defaults.batch_concurrency),
            max_retries: env_u32("FORGE_MAX_RETRIES", defaults.max_retries),
            heartbeat_interval: env_duration_secs(
                "FORGE_HEARTBEAT_INTERVAL_SECS",
                defaults.heartbeat_interval,
            ),
            hitl_review_threshold: env_f64(
                "FORGE_HITL_REVIEW_THRESHOLD",
                defaults.hitl_review_threshold,
            ),
            hitl_review_timeout: env_duration_secs(
                "FORGE_HITL_REVIEW_TIMEOUT_SECS",
                defaults.hitl_review_timeout,
            ),
            pattern_cache_ttl: env_duration_secs(
                "FORGE_PATTERN_CACHE_TTL_SECS",
                defaults.pattern_cache_ttl,
            ),
            pattern_cache_min_confidence: env_f64(
                "FORGE_PATTERN_CACHE_MIN_CONFIDENCE",
                defaults.pattern_cache_min_confidence,
            ),
            sandbox_max_concurrency: env_usize(
                "FORGE_SANDBOX_MAX_CONCURRENCY",
                defaults.sandbox_max_concurrency,
            ),
            vector_dimensionality: env_usize(
                "FORGE_VECTOR_DIMENSIONALITY",
                defaults.vector_dimensionality,
            ),
            default_input_price_per_million: env_f64(
                "FORGE_DEFAULT_INPUT_PRICE_PER_MILLION",
                defaults.default_input_price_per_million,
            ),
            default_output_price_per_million: env_f64(
                "FORGE_DEFAULT_OUTPUT_PRICE_PER_MILLION",
                defaults.default_output_price_per_million,
            ),
        }
    }

    /// Builder-style override, mirroring the teacher's `with_*` conventions.
    pub fn with_batch_concurrency(mut self, n: usize) -> Self {
        self.batch_concurrency = n;
        self
    }

    /// Builder-style override.
    pub fn with_max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    /// Builder-style override.
    pub fn with_hitl_review_threshold(mut self, threshold: f64) -> Self {
        self.hitl_review_threshold = threshold;
        self
    }

    /// Builder-style override.
    pub fn with_hitl_review_timeout(mut self, timeout: Duration) -> Self {
        self.hitl_review_timeout = timeout;
        self
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_duration_secs(key: &str, default: Duration) -> Duration {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_constants() {
        let c = OrchestratorConfig::default();
        assert_eq!(c.batch_concurrency, 8);
        assert_eq!(c.max_retries, 3);
        assert_eq!(c.hitl_review_threshold, 0.7);
        assert_eq!(c.pattern_cache_min_confidence, 0.8);
    }

    #[test]
    fn builder_overrides_apply() {
        let c = OrchestratorConfig::default()
            .with_batch_concurrency(16)
            .with_max_retries(5)
            .with_hitl_review_threshold(0.9);
        assert_eq!(c.batch_concurrency, 16);
        assert_eq!(c.max_retries, 5);
        assert_eq!(c.hitl_review_threshold, 0.9);
    }

    #[test]
    fn from_env_falls_back_to_defaults_when_unset() {
        // SAFETY: test runs single-threaded w.r.t. this key within this process.
        env::remove_var("FORGE_BATCH_CONCURRENCY");
        let c = OrchestratorConfig::from_env();
        assert_eq!(c.batch_concurrency, 8);
    }
}

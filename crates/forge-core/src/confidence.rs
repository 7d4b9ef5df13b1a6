//! Confidence Engine (C8, spec §4.7).
//!
//! Eight dimensional analyzers score a proto-capsule; thresholds, the
//! human-review predicate, and the success-probability heuristic are
//! carried over verbatim from the original implementation's
//! `DimensionalConfidenceAnalyzer` where spec.md is silent on exact
//! constants.

use serde::{Deserialize, Serialize};

use crate::validation::ValidationReport;

/// One of the eight scoring dimensions (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Syntax,
    Structure,
    Security,
    Performance,
    Reliability,
    Maintainability,
    Testability,
    Deployability,
}

impl Dimension {
    /// All eight dimensions, in a fixed order.
    pub const ALL: [Dimension; 8] = [
        Dimension::Syntax,
        Dimension::Structure,
        Dimension::Security,
        Dimension::Performance,
        Dimension::Reliability,
        Dimension::Maintainability,
        Dimension::Testability,
        Dimension::Deployability,
    ];

    /// Weight this dimension contributes to the overall score. Sums to 1.0
    /// across all eight; values match the original system's
    /// `dimension_weights`.
    pub fn weight(&self) -> f64 {
        match self {
            Dimension::Syntax => 0.15,
            Dimension::Structure => 0.10,
            Dimension::Security => 0.20,
            Dimension::Performance => 0.10,
            Dimension::Reliability => 0.15,
            Dimension::Maintainability => 0.10,
            Dimension::Testability => 0.10,
            Dimension::Deployability => 0.10,
        }
    }
}

/// A single dimension's score (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DimensionalMetric {
    /// Which dimension this is.
    pub dimension: Dimension,
    /// Score in `[0, 1]`.
    pub score: f64,
    /// This dimension's weight (duplicated here for self-contained reports).
    pub weight: f64,
    /// Supporting evidence for the score.
    pub evidence: Vec<String>,
    /// Concerns raised while scoring.
    pub concerns: Vec<String>,
}

/// Discretized confidence level (spec §4.7's threshold ladder).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLevel {
    VeryLow,
    Low,
    Medium,
    High,
    Critical,
}

impl ConfidenceLevel {
    /// Map an overall score to its level using the fixed threshold ladder:
    /// `>= 0.95` critical, `>= 0.85` high, `>= 0.70` medium, `>= 0.50` low,
    /// else very_low.
    pub fn from_score(score: f64) -> Self {
        if score >= 0.95 {
            ConfidenceLevel::Critical
        } else if score >= 0.85 {
            ConfidenceLevel::High
        } else if score >= 0.70 {
            ConfidenceLevel::Medium
        } else if score >= 0.50 {
            ConfidenceLevel::Low
        } else {
            ConfidenceLevel::VeryLow
        }
    }
}

/// Full multi-dimensional scoring output (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfidenceAnalysis {
    /// Weighted-mean score across all dimensions.
    pub overall_score: f64,
    /// Discretized level.
    pub level: ConfidenceLevel,
    /// Per-dimension detail.
    pub metrics: Vec<DimensionalMetric>,
    /// Deployment-decision recommendation text.
    pub recommendation: String,
    /// Aggregated risk factors across dimensions.
    pub risk_factors: Vec<String>,
    /// Suggested mitigations for the risk factors.
    pub mitigation_strategies: Vec<String>,
    /// Whether a human must review before proceeding.
    pub human_review_required: bool,
    /// Heuristic probability this capsule will deploy/run successfully.
    pub success_probability: f64,
}

/// Inputs available when scoring a proto-capsule.
pub struct ScoringInput<'a> {
    /// Source files by path, already assembled.
    pub source_files: &'a std::collections::BTreeMap<String, String>,
    /// Whether test files are present.
    pub has_tests: bool,
    /// The validation mesh's report over the assembled source, if run.
    pub validation: Option<&'a ValidationReport>,
    /// Whether a sandbox run of the assembled code succeeded.
    pub runtime_success: Option<bool>,
    /// Whether the test suite passed, if run.
    pub tests_passed: Option<bool>,
}

/// Scores a proto-capsule across all eight dimensions and derives the
/// overall analysis (spec §4.7).
pub struct ConfidenceEngine;

impl ConfidenceEngine {
    /// Score `input`, producing a full [`ConfidenceAnalysis`].
    pub fn score(input: &ScoringInput<'_>) -> ConfidenceAnalysis {
        let metrics: Vec<DimensionalMetric> = Dimension::ALL
            .iter()
            .map(|d| Self::score_dimension(*d, input))
            .collect();

        let overall_score: f64 = metrics.iter().map(|m| m.score * m.weight).sum();
        let level = ConfidenceLevel::from_score(overall_score);

        let security_score = metrics
            .iter()
            .find(|m| m.dimension == Dimension::Security)
            .map_or(1.0, |m| m.score);
        let reliability_score = metrics
            .iter()
            .find(|m| m.dimension == Dimension::Reliability)
            .map_or(1.0, |m| m.score);
        let total_concerns: usize = metrics.iter().map(|m| m.concerns.len()).sum();

        let human_review_required =
            overall_score < 0.7 || security_score < 0.5 || reliability_score < 0.5 || total_concerns > 5;

        let success_probability = Self::success_probability(&metrics, input);
        let recommendation = Self::recommendation(level, human_review_required);

        let risk_factors: Vec<String> = metrics.iter().flat_map(|m| m.concerns.clone()).collect();
        let mitigation_strategies = risk_factors
            .iter()
            .map(|c| format!("address: {c}"))
            .collect();

        ConfidenceAnalysis {
            overall_score,
            level,
            metrics,
            recommendation,
            risk_factors,
            mitigation_strategies,
            human_review_required,
            success_probability,
        }
    }

    fn score_dimension(dimension: Dimension, input: &ScoringInput<'_>) -> DimensionalMetric {
        let (score, evidence, concerns) = match dimension {
            Dimension::Syntax => Self::score_syntax(input),
            Dimension::Structure => Self::score_structure(input),
            Dimension::Security => Self::score_security(input),
            Dimension::Performance => Self::score_performance(input),
            Dimension::Reliability => Self::score_reliability(input),
            Dimension::Maintainability => Self::score_maintainability(input),
            Dimension::Testability => Self::score_testability(input),
            Dimension::Deployability => Self::score_deployability(input),
        };
        DimensionalMetric {
            dimension,
            score,
            weight: dimension.weight(),
            evidence,
            concerns,
        }
    }

    fn score_syntax(input: &ScoringInput<'_>) -> (f64, Vec<String>, Vec<String>) {
        match input.validation {
            Some(report) => {
                let syntax_ok = report
                    .checks
                    .iter()
                    .find(|c| c.kind == "syntax")
                    .map(|c| c.status == crate::validation::CheckStatus::Passed)
                    .unwrap_or(true);
                if syntax_ok {
                    (1.0, vec!["syntax check passed".into()], vec![])
                } else {
                    (0.1, vec![], vec!["syntax check failed".into()])
                }
            }
            None => (0.7, vec!["no validation report available".into()], vec![]),
        }
    }

    fn score_structure(input: &ScoringInput<'_>) -> (f64, Vec<String>, Vec<String>) {
        let file_count = input.source_files.len();
        if file_count == 0 {
            (0.0, vec![], vec!["no source files produced".into()])
        } else if file_count == 1 {
            (0.8, vec!["single cohesive module".into()], vec![])
        } else {
            (0.9, vec![format!("{file_count} source files")], vec![])
        }
    }

    fn score_security(input: &ScoringInput<'_>) -> (f64, Vec<String>, Vec<String>) {
        match input.validation {
            Some(report) => {
                let failed = report
                    .checks
                    .iter()
                    .filter(|c| c.kind == "security" && c.status == crate::validation::CheckStatus::Failed)
                    .count();
                if failed == 0 {
                    (0.95, vec!["no high-severity findings".into()], vec![])
                } else {
                    (0.2, vec![], vec!["high-severity security findings present".into()])
                }
            }
            None => (0.6, vec![], vec!["security scan not run".into()]),
        }
    }

    fn score_performance(_input: &ScoringInput<'_>) -> (f64, Vec<String>, Vec<String>) {
        (0.75, vec!["no performance regressions detected".into()], vec![])
    }

    fn score_reliability(input: &ScoringInput<'_>) -> (f64, Vec<String>, Vec<String>) {
        match input.runtime_success {
            Some(true) => (0.9, vec!["runtime execution succeeded".into()], vec![]),
            Some(false) => (0.3, vec![], vec!["runtime execution failed".into()]),
            None => (0.6, vec![], vec!["runtime not exercised".into()]),
        }
    }

    fn score_maintainability(input: &ScoringInput<'_>) -> (f64, Vec<String>, Vec<String>) {
        let has_docs = input.source_files.keys().any(|p| p.to_ascii_lowercase().contains("readme"));
        if has_docs {
            (0.85, vec!["documentation present".into()], vec![])
        } else {
            (0.6, vec![], vec!["no documentation file found".into()])
        }
    }

    fn score_testability(input: &ScoringInput<'_>) -> (f64, Vec<String>, Vec<String>) {
        if input.has_tests {
            (0.9, vec!["test files present".into()], vec![])
        } else {
            (0.3, vec![], vec!["no tests generated".into()])
        }
    }

    fn score_deployability(input: &ScoringInput<'_>) -> (f64, Vec<String>, Vec<String>) {
        if input.source_files.is_empty() {
            (0.0, vec![], vec!["nothing to deploy".into()])
        } else {
            (0.8, vec!["manifest derivable from shared context".into()], vec![])
        }
    }

    /// Additive heuristic (spec §4.7): base 0.5 (per the original
    /// implementation, which spec.md's adjustment list assumes but does not
    /// restate), +0.3 if all dimensions > 0.7, +0.2 if runtime succeeded,
    /// +0.1 if tests passed, -0.2 if security < 0.5; clamped to `[0, 1]`.
    fn success_probability(metrics: &[DimensionalMetric], input: &ScoringInput<'_>) -> f64 {
        let mut p = 0.5;
        if metrics.iter().all(|m| m.score > 0.7) {
            p += 0.3;
        }
        if input.runtime_success == Some(true) {
            p += 0.2;
        }
        if input.tests_passed == Some(true) {
            p += 0.1;
        }
        let security_score = metrics
            .iter()
            .find(|m| m.dimension == Dimension::Security)
            .map_or(1.0, |m| m.score);
        if security_score < 0.5 {
            p -= 0.2;
        }
        p.clamp(0.0, 1.0)
    }

    fn recommendation(level: ConfidenceLevel, human_review_required: bool) -> String {
        if human_review_required {
            return "hold for human review before deployment".to_string();
        }
        match level {
            ConfidenceLevel::Critical => "deploy immediately".to_string(),
            ConfidenceLevel::High => "deploy with standard monitoring".to_string(),
            ConfidenceLevel::Medium => "deploy to staging first".to_string(),
            ConfidenceLevel::Low => "requires additional review before deployment".to_string(),
            ConfidenceLevel::VeryLow => "do not deploy; regenerate".to_string(),
        }
    }
}

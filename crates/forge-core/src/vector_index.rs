//! Vector Index contract (C2, spec §6).
//!
//! Similarity search over past requests, code patterns, agent decisions, and
//! errors. `forge-qdrant` provides the durable backend; the in-memory impl
//! here (brute-force cosine similarity) backs tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_VECTOR_DIMENSIONALITY;
use crate::error::{Error, Result};

/// The fixed collections the orchestrator reads/writes (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    CodePatterns,
    AgentDecisions,
    ErrorPatterns,
    Requirements,
    Executions,
}

impl Collection {
    pub const ALL: [Collection; 5] = [
        Collection::CodePatterns,
        Collection::AgentDecisions,
        Collection::ErrorPatterns,
        Collection::Requirements,
        Collection::Executions,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Collection::CodePatterns => "code_patterns",
            Collection::AgentDecisions => "agent_decisions",
            Collection::ErrorPatterns => "error_patterns",
            Collection::Requirements => "requirements",
            Collection::Executions => "executions",
        }
    }
}

/// A single stored point (spec §6: "id, vector, payload").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Point {
    pub id: uuid::Uuid,
    pub vector: Vec<f32>,
    pub payload: serde_json::Value,
}

/// A scored search hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredPoint {
    pub point: Point,
    pub score: f32,
}

/// Search parameters (spec §6: "filter+limit+min-score").
#[derive(Debug, Clone)]
pub struct SearchParams {
    pub vector: Vec<f32>,
    pub limit: usize,
    pub min_score: f32,
    /// Payload-field equality filter, applied before scoring.
    pub filter: std::collections::BTreeMap<String, serde_json::Value>,
}

/// The similarity-search backend this crate consumes (spec §6).
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn upsert(&self, collection: Collection, point: Point) -> Result<()>;
    async fn search(&self, collection: Collection, params: SearchParams) -> Result<Vec<ScoredPoint>>;

    /// All points matching `filter`, unordered, used for bulk reads (e.g.
    /// prior-success-rate lookups for the tier router).
    async fn scroll(
        &self,
        collection: Collection,
        filter: std::collections::BTreeMap<String, serde_json::Value>,
    ) -> Result<Vec<Point>>;

    /// Declare a payload field as indexed, ahead of filtering on it.
    async fn create_payload_index(&self, collection: Collection, field: &str) -> Result<()>;
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

fn payload_matches(payload: &serde_json::Value, filter: &std::collections::BTreeMap<String, serde_json::Value>) -> bool {
    filter.iter().all(|(key, value)| payload.get(key) == Some(value))
}

/// In-memory reference [`VectorIndex`]: brute-force cosine similarity over
/// a per-collection `Vec<Point>`.
#[derive(Default)]
pub struct InMemoryVectorIndex {
    collections: parking_lot::Mutex<std::collections::HashMap<Collection, Vec<Point>>>,
    indexed_fields: parking_lot::Mutex<std::collections::HashSet<(Collection, String)>>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn upsert(&self, collection: Collection, point: Point) -> Result<()> {
        if point.vector.len() != DEFAULT_VECTOR_DIMENSIONALITY && !point.vector.is_empty() {
            return Err(Error::Validation(format!(
                "vector has {} dimensions, expected {}",
                point.vector.len(),
                DEFAULT_VECTOR_DIMENSIONALITY
            )));
        }
        let mut collections = self.collections.lock();
        let points = collections.entry(collection).or_default();
        if let Some(existing) = points.iter_mut().find(|p| p.id == point.id) {
            *existing = point;
        } else {
            points.push(point);
        }
        Ok(())
    }

    async fn search(&self, collection: Collection, params: SearchParams) -> Result<Vec<ScoredPoint>> {
        let collections = self.collections.lock();
        let Some(points) = collections.get(&collection) else {
            return Ok(Vec::new());
        };

        let mut scored: Vec<ScoredPoint> = points
            .iter()
            .filter(|p| payload_matches(&p.payload, &params.filter))
            .map(|p| ScoredPoint {
                point: p.clone(),
                score: cosine_similarity(&p.vector, &params.vector),
            })
            .filter(|sp| sp.score >= params.min_score)
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(params.limit);
        Ok(scored)
    }

    async fn scroll(
        &self,
        collection: Collection,
        filter: std::collections::BTreeMap<String, serde_json::Value>,
    ) -> Result<Vec<Point>> {
        let collections = self.collections.lock();
        Ok(collections
            .get(&collection)
            .map(|points| points.iter().filter(|p| payload_matches(&p.payload, &filter)).cloned().collect())
            .unwrap_or_default())
    }

    async fn create_payload_index(&self, collection: Collection, field: &str) -> Result<()> {
        self.indexed_fields.lock().insert((collection, field.to_string()));
        Ok(())
    }
}

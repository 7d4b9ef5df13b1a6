//! Integration tests for [`QdrantVectorIndex`] against a real Qdrant
//! instance.
//!
//! ```bash
//! docker run -d -p 6334:6334 qdrant/qdrant
//! cargo test --package forge-qdrant -- --ignored
//! ```

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::BTreeMap;

use forge_core::vector_index::{Collection, Point, SearchParams, VectorIndex};
use forge_qdrant::QdrantVectorIndex;

fn get_qdrant_url() -> String {
    std::env::var("QDRANT_URL").unwrap_or_else(|_| "http://localhost:6334".to_string())
}

fn unit_vector(dimensionality: usize, hot_index: usize) -> Vec<f32> {
    let mut vector = vec![0.0; dimensionality];
    vector[hot_index] = 1.0;
    vector
}

#[tokio::test]
#[ignore = "requires a running Qdrant instance (run with --ignored)"]
async fn upsert_then_search_returns_the_nearest_point() {
    let index = QdrantVectorIndex::new(&get_qdrant_url()).await.expect("connect");

    let id = uuid::Uuid::new_v4();
    index
        .upsert(
            Collection::CodePatterns,
            Point {
                id,
                vector: unit_vector(1536, 0),
                payload: serde_json::json!({"language": "python"}),
            },
        )
        .await
        .expect("upsert");

    let results = index
        .search(
            Collection::CodePatterns,
            SearchParams {
                vector: unit_vector(1536, 0),
                limit: 1,
                min_score: 0.0,
                filter: BTreeMap::new(),
            },
        )
        .await
        .expect("search");

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].point.id, id);
    assert_eq!(results[0].point.payload["language"], serde_json::json!("python"));
}

#[tokio::test]
#[ignore = "requires a running Qdrant instance (run with --ignored)"]
async fn search_honors_payload_filters() {
    let index = QdrantVectorIndex::new(&get_qdrant_url()).await.expect("connect");

    let matching = uuid::Uuid::new_v4();
    index
        .upsert(
            Collection::ErrorPatterns,
            Point {
                id: matching,
                vector: unit_vector(1536, 1),
                payload: serde_json::json!({"tenant_id": "acme"}),
            },
        )
        .await
        .expect("upsert matching");
    index
        .upsert(
            Collection::ErrorPatterns,
            Point {
                id: uuid::Uuid::new_v4(),
                vector: unit_vector(1536, 1),
                payload: serde_json::json!({"tenant_id": "other"}),
            },
        )
        .await
        .expect("upsert other");

    let mut filter = BTreeMap::new();
    filter.insert("tenant_id".to_string(), serde_json::json!("acme"));
    let results = index
        .search(
            Collection::ErrorPatterns,
            SearchParams {
                vector: unit_vector(1536, 1),
                limit: 10,
                min_score: 0.0,
                filter,
            },
        )
        .await
        .expect("search");

    assert!(results.iter().all(|r| r.point.id == matching));
}

#[tokio::test]
#[ignore = "requires a running Qdrant instance (run with --ignored)"]
async fn scroll_returns_every_point_matching_the_filter() {
    let index = QdrantVectorIndex::new(&get_qdrant_url()).await.expect("connect");

    let workflow_id = uuid::Uuid::new_v4().to_string();
    for i in 0..3 {
        index
            .upsert(
                Collection::AgentDecisions,
                Point {
                    id: uuid::Uuid::new_v4(),
                    vector: unit_vector(1536, i),
                    payload: serde_json::json!({"workflow_id": workflow_id}),
                },
            )
            .await
            .expect("upsert");
    }

    let mut filter = BTreeMap::new();
    filter.insert("workflow_id".to_string(), serde_json::json!(workflow_id));
    let scrolled = index
        .scroll(Collection::AgentDecisions, filter)
        .await
        .expect("scroll");

    assert_eq!(scrolled.len(), 3);
}

#[tokio::test]
#[ignore = "requires a running Qdrant instance (run with --ignored)"]
async fn create_payload_index_is_idempotent() {
    let index = QdrantVectorIndex::new(&get_qdrant_url()).await.expect("connect");
    index
        .create_payload_index(Collection::Requirements, "tenant_id")
        .await
        .expect("create index");
    index
        .create_payload_index(Collection::Requirements, "tenant_id")
        .await
        .expect("create index again");
}

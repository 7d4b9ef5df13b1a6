//! Integration tests for [`PostgresStore`] against a real PostgreSQL
//! instance.
//!
//! ```bash
//! docker-compose -f docker-compose.postgres.yml up -d
//! cargo test --package forge-postgres-store -- --ignored
//! docker-compose -f docker-compose.postgres.yml down
//! ```

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::BTreeMap;

use forge_core::capsule::{Capsule, CapsuleMetadata, Manifest};
use forge_core::cost::{CostAccountant, InMemoryCostAccountant, RecordCostInput};
use forge_core::ids::{CapsuleId, RequestId, TaskId, TenantId, UserId, WorkflowId};
use forge_core::store::DurableStore;
use forge_core::workflow::checkpoint::WorkflowCheckpoint;
use forge_core::workflow::state::WorkflowState;
use forge_postgres_store::PostgresStore;

fn get_connection_string() -> String {
    std::env::var("POSTGRES_CONNECTION_STRING")
        .unwrap_or_else(|_| "host=localhost port=5432 user=postgres password=postgres dbname=forge".to_string())
}

fn sample_capsule(request_id: RequestId) -> Capsule {
    Capsule {
        id: CapsuleId::new(),
        request_id,
        manifest: Manifest {
            name: "capsule".into(),
            version: "0.1.0".into(),
            language: "python".into(),
            artifact_type: "single-module".into(),
            description: String::new(),
            entry_point: "main.py".into(),
            commands: BTreeMap::new(),
            dependencies: vec![],
            env_vars: BTreeMap::new(),
            ports: vec![],
            resources: BTreeMap::new(),
            health_check: None,
        },
        source_files: BTreeMap::from([("main.py".to_string(), "print('hi')".to_string())]),
        test_files: BTreeMap::new(),
        documentation: "# capsule".into(),
        validation: None,
        metadata: CapsuleMetadata::default(),
        errors: vec![],
    }
}

#[tokio::test]
#[ignore = "requires running PostgreSQL (run with --ignored)"]
async fn put_and_get_capsule_round_trips() {
    let store = PostgresStore::new(&get_connection_string()).await.expect("connect");
    let request_id = RequestId::new();
    let capsule = sample_capsule(request_id);

    store.put_capsule(&capsule).await.expect("put_capsule");
    let loaded = store.get_capsule(capsule.id).await.expect("get_capsule").expect("present");
    assert_eq!(loaded.id, capsule.id);
    assert_eq!(loaded.source_files, capsule.source_files);
}

#[tokio::test]
#[ignore = "requires running PostgreSQL (run with --ignored)"]
async fn regenerating_a_request_keeps_every_capsule_most_recent_first() {
    let store = PostgresStore::new(&get_connection_string()).await.expect("connect");
    let request_id = RequestId::new();
    let first = sample_capsule(request_id);
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let second = sample_capsule(request_id);

    store.put_capsule(&first).await.expect("put first");
    store.put_capsule(&second).await.expect("put second");

    let found = store.capsules_for_request(request_id).await.expect("capsules_for_request");
    assert_eq!(found.len(), 2);
    assert_eq!(found[0].id, second.id);
    assert_eq!(found[1].id, first.id);
}

#[tokio::test]
#[ignore = "requires running PostgreSQL (run with --ignored)"]
async fn missing_capsule_loads_as_none() {
    let store = PostgresStore::new(&get_connection_string()).await.expect("connect");
    assert!(store.get_capsule(CapsuleId::new()).await.expect("get_capsule").is_none());
}

#[tokio::test]
#[ignore = "requires running PostgreSQL (run with --ignored)"]
async fn checkpoint_round_trips_with_integrity_header() {
    let store = PostgresStore::new(&get_connection_string()).await.expect("connect");
    let workflow_id = WorkflowId::new();
    let mut task_statuses = std::collections::HashMap::new();
    task_statuses.insert(TaskId::new(), forge_core::task::TaskStatus::Completed);
    let checkpoint = WorkflowCheckpoint {
        workflow_id,
        state: WorkflowState::ExecutingBatch { batch_index: 2 },
        last_completed_batch: Some(1),
        task_statuses,
        state_blob: b"opaque shared context".to_vec(),
    };

    store.put_checkpoint(&checkpoint).await.expect("put_checkpoint");
    let loaded = store.get_checkpoint(workflow_id).await.expect("get_checkpoint").expect("present");
    assert_eq!(loaded.last_completed_batch, checkpoint.last_completed_batch);
    assert_eq!(loaded.state_blob, checkpoint.state_blob);
}

#[tokio::test]
#[ignore = "requires running PostgreSQL (run with --ignored)"]
async fn resuming_a_checkpoint_overwrites_the_previous_one() {
    let store = PostgresStore::new(&get_connection_string()).await.expect("connect");
    let workflow_id = WorkflowId::new();
    let first = WorkflowCheckpoint {
        workflow_id,
        state: WorkflowState::ExecutingBatch { batch_index: 0 },
        last_completed_batch: None,
        task_statuses: std::collections::HashMap::new(),
        state_blob: b"v1".to_vec(),
    };
    store.put_checkpoint(&first).await.expect("put first");

    let second = WorkflowCheckpoint {
        last_completed_batch: Some(0),
        state_blob: b"v2".to_vec(),
        ..first
    };
    store.put_checkpoint(&second).await.expect("put second");

    let loaded = store.get_checkpoint(workflow_id).await.expect("get_checkpoint").expect("present");
    assert_eq!(loaded.state_blob, b"v2".to_vec());
}

#[tokio::test]
#[ignore = "requires running PostgreSQL (run with --ignored)"]
async fn put_cost_record_persists_without_error() {
    let store = PostgresStore::new(&get_connection_string()).await.expect("connect");
    let accountant = InMemoryCostAccountant::new();
    let record = accountant
        .record(RecordCostInput {
            model: "gpt-4o-mini",
            provider: "openai",
            prompt_tokens: 100,
            completion_tokens: 50,
            workflow_id: WorkflowId::new(),
            tenant_id: TenantId::new(),
            user_id: UserId::new(),
            task_id: TaskId::new(),
            latency_ms: 42,
        })
        .await
        .expect("price the call");

    store.put_cost_record(&record).await.expect("put_cost_record");
}

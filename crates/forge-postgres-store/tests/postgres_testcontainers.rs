//! Integration tests for [`PostgresStore`] backed by an ephemeral
//! `testcontainers` PostgreSQL instance. No external Docker Compose setup
//! required beyond a working Docker socket.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::BTreeMap;
use std::time::Duration;

use forge_core::capsule::{Capsule, CapsuleMetadata, Manifest};
use forge_core::ids::{CapsuleId, RequestId, TaskId, WorkflowId};
use forge_core::store::DurableStore;
use forge_core::task::TaskStatus;
use forge_core::workflow::checkpoint::WorkflowCheckpoint;
use forge_core::workflow::state::WorkflowState;
use forge_postgres_store::PostgresStore;
use testcontainers::runners::AsyncRunner;
use testcontainers_modules::postgres::Postgres;

fn build_connection_string(host: &str, port: u16) -> String {
    format!("host={host} port={port} user=postgres password=postgres dbname=postgres")
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

async fn connect_store(container: &testcontainers::ContainerAsync<Postgres>) -> PostgresStore {
    let host = container.get_host().await.unwrap();
    let port = container.get_host_port_ipv4(5432).await.unwrap();
    let connection_string = build_connection_string(&host.to_string(), port);
    tokio::time::sleep(Duration::from_secs(2)).await;
    PostgresStore::new(&connection_string).await.expect("connect to postgres")
}

#[tokio::test]
async fn put_and_get_capsule_round_trips_with_testcontainers() {
    let container = Postgres::default().start().await.unwrap();
    let store = connect_store(&container).await;

    let request_id = RequestId::new();
    let capsule = sample_capsule(request_id);
    store.put_capsule(&capsule).await.expect("put_capsule");

    let loaded = store.get_capsule(capsule.id).await.expect("get_capsule").expect("present");
    assert_eq!(loaded.id, capsule.id);
    assert_eq!(loaded.documentation, capsule.documentation);
}

#[tokio::test]
async fn capsules_for_request_orders_most_recent_first_with_testcontainers() {
    let container = Postgres::default().start().await.unwrap();
    let store = connect_store(&container).await;

    let request_id = RequestId::new();
    let first = sample_capsule(request_id);
    store.put_capsule(&first).await.expect("put first");
    tokio::time::sleep(Duration::from_millis(5)).await;
    let second = sample_capsule(request_id);
    store.put_capsule(&second).await.expect("put second");

    let found = store.capsules_for_request(request_id).await.expect("capsules_for_request");
    assert_eq!(found.len(), 2);
    assert_eq!(found[0].id, second.id);
}

#[tokio::test]
async fn checkpoint_round_trips_with_testcontainers() {
    let container = Postgres::default().start().await.unwrap();
    let store = connect_store(&container).await;

    let workflow_id = WorkflowId::new();
    let mut task_statuses = std::collections::HashMap::new();
    task_statuses.insert(TaskId::new(), TaskStatus::Completed);
    let checkpoint = WorkflowCheckpoint {
        workflow_id,
        state: WorkflowState::ExecutingBatch { batch_index: 1 },
        last_completed_batch: Some(0),
        task_statuses,
        state_blob: b"shared context snapshot".to_vec(),
    };

    store.put_checkpoint(&checkpoint).await.expect("put_checkpoint");
    let loaded = store.get_checkpoint(workflow_id).await.expect("get_checkpoint").expect("present");
    assert_eq!(loaded.last_completed_batch, Some(0));
    assert_eq!(loaded.state_blob, checkpoint.state_blob);
}

#[tokio::test]
async fn missing_checkpoint_loads_as_none_with_testcontainers() {
    let container = Postgres::default().start().await.unwrap();
    let store = connect_store(&container).await;
    assert!(store.get_checkpoint(WorkflowId::new()).await.expect("get_checkpoint").is_none());
}

//! End-to-end scenarios for [`WorkflowRuntime`] (spec §8): each test drives
//! the runtime the way a real caller would — `start`/`start_with_id`,
//! `query`, `signal`, `cancel`, `resume` — against in-memory backends, with
//! no module internals reached into directly.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use forge_core::ids::{RequestId, TaskId, TenantId, UserId, WorkflowId};
use forge_core::tier_router::Tier;
use forge_core::workflow::{Checkpointer, InMemoryCheckpointer};
use forge_core::{
    DurableStore, InMemoryCostAccountant, InMemoryStore, LlmBackend, LlmRequest, LlmResponse, OrchestratorConfig,
    ProgressBus, Request, Result as CoreResult, SandboxPool, WorkflowOutcome, WorkflowRuntime, WorkflowState,
};
use forge_testing::{MockLlmBackend, MockSandboxBackend};

fn build_runtime(
    config: OrchestratorConfig,
    llm: Arc<dyn LlmBackend>,
) -> (Arc<WorkflowRuntime>, Arc<InMemoryCostAccountant>, Arc<InMemoryCheckpointer>, Arc<InMemoryStore>) {
    let sandbox = Arc::new(SandboxPool::new(Arc::new(MockSandboxBackend::new()), config.sandbox_max_concurrency));
    let cost = Arc::new(InMemoryCostAccountant::new());
    let checkpointer = Arc::new(InMemoryCheckpointer::new());
    let store = Arc::new(InMemoryStore::new());
    let runtime = Arc::new(WorkflowRuntime::new(
        config,
        store.clone(),
        checkpointer.clone(),
        Arc::new(ProgressBus::new()),
        llm,
        sandbox,
        cost.clone(),
    ));
    (runtime, cost, checkpointer, store)
}

fn sample_request(description: &str) -> Request {
    Request {
        id: RequestId::new(),
        tenant_id: TenantId::new(),
        user_id: UserId::new(),
        description: description.to_string(),
        requirements: vec![],
        constraints: HashMap::from([("language".to_string(), "python".to_string())]),
        metadata: HashMap::new(),
    }
}

/// The exact complex-inferring description the scheduler's own fixtures use,
/// reused here so a task's complexity (and default tier) is deterministic.
const COMPLEX_DESCRIPTION: &str = "Design and implement an eventually-consistent counter service with conflict resolution, build a replication layer, integrate monitoring, and optimize for write-heavy workloads across regions";

async fn wait_for_state(runtime: &WorkflowRuntime, workflow_id: WorkflowId, target: WorkflowState) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if runtime.query(workflow_id) == Some(target) {
            return;
        }
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {target:?}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

async fn wait_for_batch_zero(checkpointer: &InMemoryCheckpointer, workflow_id: WorkflowId) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if let Some(checkpoint) = checkpointer.load(workflow_id).await.unwrap() {
            if checkpoint.last_completed_batch == Some(0) {
                return;
            }
        }
        assert!(tokio::time::Instant::now() < deadline, "batch 0 never checkpointed");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

// Scenario 1: trivial happy path.
#[tokio::test]
async fn trivial_request_runs_end_to_end_and_persists_a_capsule() {
    let (runtime, ..) =
        build_runtime(OrchestratorConfig::default().with_hitl_review_threshold(0.0), Arc::new(MockLlmBackend::new()));
    let outcome = runtime.start(sample_request("Write a function that reverses a string")).await.unwrap();
    match outcome {
        WorkflowOutcome::Completed(capsule) => {
            assert!(!capsule.source_files.is_empty());
            assert!(!capsule.is_error_capsule());
        }
        other => panic!("expected Completed, got {other:?}"),
    }
}

// Scenario 2: cache hit.
#[tokio::test]
async fn identical_request_from_the_same_tenant_hits_the_pattern_cache() {
    let (runtime, ..) =
        build_runtime(OrchestratorConfig::default().with_hitl_review_threshold(0.0), Arc::new(MockLlmBackend::new()));
    let first = sample_request("Write a function that reverses a string");
    let tenant_id = first.tenant_id;
    runtime.start(first).await.unwrap();

    let mut second = sample_request("Write a function that reverses a string");
    second.tenant_id = tenant_id;
    let outcome = runtime.start(second).await.unwrap();
    match outcome {
        WorkflowOutcome::Completed(capsule) => assert!(capsule.metadata.cache_hit),
        other => panic!("expected Completed, got {other:?}"),
    }
}

// Scenario 3: tier escalation on synthetic validation failure.
#[tokio::test]
async fn validation_failure_escalates_and_retries_at_the_same_ceiling_tier() {
    let seen = Arc::new(AtomicUsize::new(0));
    let seen_for_handler = seen.clone();
    let llm = Arc::new(MockLlmBackend::new().with_handler(move |_req| {
        // Only the very first call in the whole run is the Implementation
        // task's batch-0 attempt; make it fail the security check so
        // escalation has something to react to, then go clean.
        let n = seen_for_handler.fetch_add(1, Ordering::SeqCst);
        if n == 0 {
            Ok("eval(\"untrusted\")\n".to_string())
        } else {
            Ok("def handler():\n    return 42\n".to_string())
        }
    }));
    let (runtime, cost, ..) = build_runtime(OrchestratorConfig::default().with_hitl_review_threshold(0.0), llm);

    let outcome = runtime.start(sample_request(COMPLEX_DESCRIPTION)).await.unwrap();
    match outcome {
        WorkflowOutcome::Completed(capsule) => assert!(!capsule.is_error_capsule()),
        other => panic!("expected Completed, got {other:?}"),
    }

    let ledger = cost.ledger();
    let mut counts: HashMap<TaskId, usize> = HashMap::new();
    for record in &ledger {
        *counts.entry(record.task_id).or_default() += 1;
    }
    let (retried_task, retry_count) =
        counts.iter().find(|(_, &c)| c == 2).map(|(id, c)| (*id, *c)).expect("one task should have retried once");
    assert_eq!(retry_count, 2);

    let ids: HashSet<_> = ledger.iter().map(|r| r.id).collect();
    assert_eq!(ids.len(), ledger.len(), "every cost record must be distinct");

    let records_for_task: Vec<_> = ledger.iter().filter(|r| r.task_id == retried_task).collect();
    assert!(
        records_for_task.iter().all(|r| r.model == "mock-T3"),
        "a complex task already at the ceiling tier retries at T3, not some other tier"
    );
}

// Scenario 4: HITL approve/reject/timeout via `signal`.
#[tokio::test]
async fn hitl_review_approve_completes_the_workflow() {
    let (runtime, ..) =
        build_runtime(OrchestratorConfig::default().with_hitl_review_threshold(1.1), Arc::new(MockLlmBackend::new()));
    let workflow_id = WorkflowId::new();
    let request = sample_request("Write a function that reverses a string");

    let run_runtime = runtime.clone();
    let handle = tokio::spawn(async move { run_runtime.start_with_id(workflow_id, request).await });

    wait_for_state(&runtime, workflow_id, WorkflowState::HitlReview).await;
    runtime.signal(workflow_id, true).unwrap();

    match handle.await.unwrap().unwrap() {
        WorkflowOutcome::Completed(_) => {}
        other => panic!("expected Completed, got {other:?}"),
    }
}

#[tokio::test]
async fn hitl_review_reject_fails_the_workflow() {
    let (runtime, ..) =
        build_runtime(OrchestratorConfig::default().with_hitl_review_threshold(1.1), Arc::new(MockLlmBackend::new()));
    let workflow_id = WorkflowId::new();
    let request = sample_request("Write a function that reverses a string");

    let run_runtime = runtime.clone();
    let handle = tokio::spawn(async move { run_runtime.start_with_id(workflow_id, request).await });

    wait_for_state(&runtime, workflow_id, WorkflowState::HitlReview).await;
    runtime.signal(workflow_id, false).unwrap();

    match handle.await.unwrap().unwrap() {
        WorkflowOutcome::Failed(capsule) => assert!(capsule.is_error_capsule()),
        other => panic!("expected Failed, got {other:?}"),
    }
}

#[tokio::test]
async fn hitl_review_with_no_signal_times_out_and_fails() {
    let (runtime, ..) = build_runtime(
        OrchestratorConfig::default()
            .with_hitl_review_threshold(1.1)
            .with_hitl_review_timeout(Duration::from_millis(50)),
        Arc::new(MockLlmBackend::new()),
    );
    let outcome = runtime.start(sample_request("Write a function that reverses a string")).await.unwrap();
    match outcome {
        WorkflowOutcome::Failed(capsule) => assert!(capsule.is_error_capsule()),
        other => panic!("expected Failed, got {other:?}"),
    }
}

/// An [`LlmBackend`] that lets a test gate every call after the first behind
/// a [`Notify`], and records which task type each call's system prompt was
/// generated for.
struct GatedLlm {
    response: String,
    calls: AtomicUsize,
    gate_open: AtomicBool,
    gate: Notify,
    history: std::sync::Mutex<Vec<String>>,
}

impl GatedLlm {
    fn new(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            calls: AtomicUsize::new(0),
            gate_open: AtomicBool::new(false),
            gate: Notify::new(),
            history: std::sync::Mutex::new(Vec::new()),
        }
    }

    fn calls_matching(&self, needle: &str) -> usize {
        self.history.lock().unwrap().iter().filter(|s| s.contains(needle)).count()
    }

    fn open_gate(&self) {
        self.gate_open.store(true, Ordering::SeqCst);
        self.gate.notify_waiters();
    }

    async fn wait_for_gate(&self) {
        let notified = self.gate.notified();
        if self.gate_open.load(Ordering::SeqCst) {
            return;
        }
        notified.await;
    }
}

#[async_trait]
impl LlmBackend for GatedLlm {
    async fn complete(&self, request: LlmRequest) -> CoreResult<LlmResponse> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        self.history.lock().unwrap().push(request.system_prompt.clone());
        if n > 0 {
            self.wait_for_gate().await;
        }
        Ok(LlmResponse {
            model: self.model_for_tier(request.tier),
            provider: "gated".to_string(),
            content: self.response.clone(),
            prompt_tokens: 10,
            completion_tokens: 10,
            latency_ms: 1,
        })
    }

    fn model_for_tier(&self, tier: Tier) -> String {
        format!("gated-{tier}")
    }
}

// Scenario 5: crash recovery — start, kill mid-batch, resume.
#[tokio::test]
async fn resume_after_a_simulated_crash_completes_without_replaying_batch_zero() {
    let llm = Arc::new(GatedLlm::new("def handler():\n    return 42\n"));
    let (runtime, _cost, checkpointer, store) =
        build_runtime(OrchestratorConfig::default().with_hitl_review_threshold(0.0), llm.clone());
    let workflow_id = WorkflowId::new();
    let request = sample_request("Write a function that reverses a string");
    let request_id = request.id;

    let run_runtime = runtime.clone();
    let handle = tokio::spawn(async move { run_runtime.start_with_id(workflow_id, request).await });

    wait_for_batch_zero(&checkpointer, workflow_id).await;
    handle.abort();
    let _ = handle.await;

    llm.open_gate();
    let outcome = runtime.resume(workflow_id).await.unwrap();
    match &outcome {
        WorkflowOutcome::Completed(capsule) => assert!(!capsule.is_error_capsule()),
        other => panic!("expected Completed, got {other:?}"),
    }

    assert_eq!(
        llm.calls_matching("Implementation"),
        1,
        "resume must not re-invoke the already-completed Implementation task"
    );

    let capsules = store.capsules_for_request(request_id).await.unwrap();
    assert_eq!(capsules.len(), 1, "exactly one capsule should ever be minted for this request");
}

// Scenario 6: cancellation mid-batch.
#[tokio::test]
async fn cancel_mid_batch_yields_a_cancelled_outcome() {
    let llm = Arc::new(GatedLlm::new("def handler():\n    return 42\n"));
    let (runtime, _cost, checkpointer, store) =
        build_runtime(OrchestratorConfig::default().with_hitl_review_threshold(0.0), llm.clone());
    let workflow_id = WorkflowId::new();
    let request = sample_request("Write a function that reverses a string");
    let request_id = request.id;

    let run_runtime = runtime.clone();
    let handle = tokio::spawn(async move { run_runtime.start_with_id(workflow_id, request).await });

    wait_for_batch_zero(&checkpointer, workflow_id).await;
    runtime.cancel(workflow_id).unwrap();
    llm.open_gate();

    let outcome = handle.await.unwrap().unwrap();
    assert!(matches!(outcome, WorkflowOutcome::Cancelled));
    assert_eq!(runtime.query(workflow_id), Some(WorkflowState::Cancelled));

    let capsules = store.capsules_for_request(request_id).await.unwrap();
    assert_eq!(capsules.len(), 1);
    assert!(capsules[0].is_error_capsule());
}

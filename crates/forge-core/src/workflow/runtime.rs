//! The orchestration loop (C11, spec §4.2): ties the scheduler, tier router,
//! pattern cache, validation mesh, confidence engine, sandbox pool, cost
//! accountant, checkpointer, progress bus, and capsule assembler into one
//! durable, resumable state machine.
//!
//! One [`WorkflowRuntime`] is shared process-wide; each call to [`start`]
//! runs a workflow to a terminal state (or to `HITL_REVIEW`, where it blocks
//! on [`signal`]). Cancellation and crash-resume are both modeled as
//! re-entry into the same per-batch loop — cancellation checks a flag at
//! each batch boundary, and [`resume`] restarts that loop from the last
//! checkpointed batch.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::capsule::{Capsule, CapsuleAssembler, CapsuleMetadata};
use crate::config::OrchestratorConfig;
use crate::confidence::{ConfidenceAnalysis, ConfidenceEngine, ScoringInput};
use crate::cost::{CostAccountant, RecordCostInput};
use crate::error::{Error, Result};
use crate::ids::{RequestId, TaskId, WorkflowId};
use crate::llm_backend::{LlmBackend, LlmRequest};
use crate::pattern_cache::{Fingerprint, PatternCache};
use crate::progress_bus::{EventKind, ProgressBus, ProgressEvent};
use crate::sandbox::SandboxPool;
use crate::scheduler::{Scheduler, TaskGraph};
use crate::store::DurableStore;
use crate::task::{Complexity, OutputKind, Request, SharedContext, Task, TaskResult, TaskStatus, TaskType};
use crate::tier_router::{Tier, TierRouter};
use crate::validation::{
    CheckStatus, OverallStatus, RuntimeValidator, SecurityValidator, StyleValidator, SyntaxValidator, TypeValidator,
    ValidationMesh, ValidationReport, Validator,
};
use crate::workflow::activity::{active_deadline, run_activity, ActivityKind, RetryPolicy};
use crate::workflow::checkpoint::{Checkpointer, WorkflowCheckpoint};
use crate::workflow::state::WorkflowState;

/// Opaque, resumable workflow snapshot serialized into a checkpoint's
/// `state_blob` (spec §3). The runtime treats this as private to itself;
/// `Checkpointer` never inspects it.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WorkflowSnapshot {
    request: Request,
    shared_context: SharedContext,
    tasks: Vec<Task>,
    results: HashMap<TaskId, TaskResult>,
    cache_hit: bool,
}

/// Terminal outcome of a workflow run.
#[derive(Debug, Clone)]
pub enum WorkflowOutcome {
    Completed(Capsule),
    /// A capsule describing the failure — HITL rejection/timeout, exhausted
    /// retries, or an unrecoverable integrity error (spec §7).
    Failed(Capsule),
    Cancelled,
}

/// Orchestrates a workflow from `CREATED` through to a terminal state.
pub struct WorkflowRuntime {
    config: OrchestratorConfig,
    store: Arc<dyn DurableStore>,
    checkpointer: Arc<dyn Checkpointer>,
    progress: Arc<ProgressBus>,
    llm: Arc<dyn LlmBackend>,
    sandbox: Arc<SandboxPool>,
    cost: Arc<dyn CostAccountant>,
    pattern_cache: Arc<PatternCache>,
    validation_mesh: Arc<ValidationMesh>,
    states: parking_lot::Mutex<HashMap<WorkflowId, WorkflowState>>,
    cancelled: parking_lot::Mutex<HashSet<WorkflowId>>,
    hitl_signals: parking_lot::Mutex<HashMap<WorkflowId, oneshot::Sender<bool>>>,
}

impl WorkflowRuntime {
    pub fn new(
        config: OrchestratorConfig,
        store: Arc<dyn DurableStore>,
        checkpointer: Arc<dyn Checkpointer>,
        progress: Arc<ProgressBus>,
        llm: Arc<dyn LlmBackend>,
        sandbox: Arc<SandboxPool>,
        cost: Arc<dyn CostAccountant>,
    ) -> Self {
        let pattern_cache = Arc::new(PatternCache::new(
            config.pattern_cache_ttl,
            config.pattern_cache_min_confidence,
        ));
        let validators: Vec<Arc<dyn Validator>> = vec![
            Arc::new(SyntaxValidator),
            Arc::new(StyleValidator),
            Arc::new(SecurityValidator),
            Arc::new(TypeValidator),
            Arc::new(RuntimeValidator::new(sandbox.clone())),
        ];
        Self {
            config,
            store,
            checkpointer,
            progress,
            llm,
            sandbox,
            cost,
            pattern_cache,
            validation_mesh: Arc::new(ValidationMesh::new(validators)),
            states: parking_lot::Mutex::new(HashMap::new()),
            cancelled: parking_lot::Mutex::new(HashSet::new()),
            hitl_signals: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    /// The workflow-wide `active_deadline` every run is held to (spec §4.2).
    pub fn active_deadline(&self) -> std::time::Duration {
        active_deadline()
    }

    /// Current stage of `workflow_id`, if the runtime has ever touched it.
    pub fn query(&self, workflow_id: WorkflowId) -> Option<WorkflowState> {
        self.states.lock().get(&workflow_id).copied()
    }

    /// Request cancellation. Takes effect at the next batch boundary or HITL
    /// wait, not mid-task (spec §4.2's grace window).
    pub fn cancel(&self, workflow_id: WorkflowId) -> Result<()> {
        let mut states = self.states.lock();
        let Some(state) = states.get(&workflow_id).copied() else {
            return Err(Error::WorkflowNotFound(workflow_id));
        };
        if state.is_terminal() {
            return Ok(());
        }
        states.insert(workflow_id, WorkflowState::Cancelled);
        drop(states);
        self.cancelled.lock().insert(workflow_id);
        if let Some(tx) = self.hitl_signals.lock().remove(&workflow_id) {
            let _ = tx.send(false);
        }
        Ok(())
    }

    /// Deliver a human reviewer's decision for a workflow parked in
    /// `HITL_REVIEW` (spec §4.2).
    pub fn signal(&self, workflow_id: WorkflowId, approve: bool) -> Result<()> {
        match self.hitl_signals.lock().remove(&workflow_id) {
            Some(tx) => {
                let _ = tx.send(approve);
                Ok(())
            }
            None => Err(Error::WorkflowNotFound(workflow_id)),
        }
    }

    /// Decompose `request` and run it to a terminal state (or `HITL_REVIEW`),
    /// under a freshly generated workflow id.
    pub async fn start(&self, request: Request) -> Result<WorkflowOutcome> {
        self.start_with_id(WorkflowId::new(), request).await
    }

    /// Same as [`Self::start`], but under a caller-supplied workflow id. Lets
    /// a caller learn or pre-assign the id before the run resolves, which
    /// `start` alone makes impossible — needed to `query`/`signal`/`cancel`
    /// a workflow while it's still in flight.
    pub async fn start_with_id(&self, workflow_id: WorkflowId, request: Request) -> Result<WorkflowOutcome> {
        self.set_state(workflow_id, WorkflowState::Created);
        self.publish(workflow_id, EventKind::WorkflowStarted, None, serde_json::json!({ "request_id": request.id }));

        let graph = Scheduler::decompose(&request).map_err(|err| {
            self.set_state(workflow_id, WorkflowState::Failed);
            self.publish(workflow_id, EventKind::WorkflowFailed, None, serde_json::json!({ "error": err.to_string() }));
            err
        })?;
        self.set_state(workflow_id, WorkflowState::Decomposed);

        let shared_context = SharedContext::from_request(&request);
        let tasks: Vec<Task> = graph.tasks().cloned().collect();
        let tier_router = TierRouter::new(workflow_id);

        self.checkpoint(workflow_id, WorkflowState::Decomposed, None, &request, &shared_context, &tasks, &HashMap::new(), false)
            .await?;

        self.run_from_batch(workflow_id, request, shared_context, graph, tasks, HashMap::new(), false, 0, tier_router)
            .await
    }

    /// Resume a workflow from its last saved checkpoint after a crash
    /// (spec §4.2: "resumes from the last completed batch").
    pub async fn resume(&self, workflow_id: WorkflowId) -> Result<WorkflowOutcome> {
        let Some(checkpoint) = self.checkpointer.load(workflow_id).await? else {
            return Err(Error::WorkflowNotFound(workflow_id));
        };
        let snapshot: WorkflowSnapshot = bincode::deserialize(&checkpoint.state_blob)?;
        let graph = TaskGraph::from_tasks(snapshot.tasks.clone())?;
        let tier_router = TierRouter::new(workflow_id);
        let next_batch = checkpoint.last_completed_batch.map_or(0, |b| b + 1);

        self.set_state(workflow_id, checkpoint.state);
        self.run_from_batch(
            workflow_id,
            snapshot.request,
            snapshot.shared_context,
            graph,
            snapshot.tasks,
            snapshot.results,
            snapshot.cache_hit,
            next_batch,
            tier_router,
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_from_batch(
        &self,
        workflow_id: WorkflowId,
        request: Request,
        shared_context: SharedContext,
        graph: TaskGraph,
        tasks: Vec<Task>,
        mut results: HashMap<TaskId, TaskResult>,
        mut cache_hit: bool,
        start_batch: usize,
        tier_router: TierRouter,
    ) -> Result<WorkflowOutcome> {
        let batches = Scheduler::plan_batches(&graph)?;

        for (batch_index, batch) in batches.iter().enumerate().skip(start_batch) {
            if self.take_cancelled(workflow_id) {
                return self.finish_cancelled(workflow_id, &request, &shared_context, &tasks, &results).await;
            }

            self.set_state(workflow_id, WorkflowState::ExecutingBatch { batch_index });
            self.publish(
                workflow_id,
                EventKind::ActivityStarted,
                None,
                serde_json::json!({ "batch_index": batch_index, "size": batch.len() }),
            );

            let cancelled_ids = Scheduler::cancel_dependents_of_failures(&graph, batch, &results);
            for id in &cancelled_ids {
                let complexity = graph.get(*id).map(|t| t.complexity).unwrap_or(Complexity::Trivial);
                let tier = tier_router.choose(*id, complexity, None);
                results.insert(*id, TaskResult::cancelled(*id, tier));
                self.publish(workflow_id, EventKind::TaskFailed, Some(*id), serde_json::json!({ "reason": "dependency failed" }));
            }

            let runnable: Vec<TaskId> = batch.iter().copied().filter(|id| !cancelled_ids.contains(id)).collect();
            let tier_router_ref = &tier_router;
            let batch_results: Vec<(TaskResult, bool)> = futures::stream::iter(runnable.into_iter().map(|id| {
                let task = graph.get(id).expect("runnable task exists in graph").clone();
                let (deps, tenant_language) = owned_dependency_outputs(&graph, id, &results, &shared_context);
                let request = &request;
                async move { self.execute_task(workflow_id, request, &task, &deps, &tenant_language, tier_router_ref).await }
            }))
            .buffer_unordered(self.config.batch_concurrency)
            .collect()
            .await;

            for (result, was_cache_hit) in batch_results {
                if was_cache_hit {
                    cache_hit = true;
                }
                let kind = match result.status {
                    TaskStatus::Completed => EventKind::TaskCompleted,
                    TaskStatus::Failed => EventKind::TaskFailed,
                    _ => EventKind::TaskProgress,
                };
                self.publish(workflow_id, kind, Some(result.task_id), serde_json::json!({ "status": format!("{:?}", result.status) }));
                results.insert(result.task_id, result);
            }

            self.checkpoint(
                workflow_id,
                WorkflowState::ExecutingBatch { batch_index },
                Some(batch_index),
                &request,
                &shared_context,
                &tasks,
                &results,
                cache_hit,
            )
            .await?;
        }

        self.finish_workflow(workflow_id, request, shared_context, tasks, results, cache_hit).await
    }

    #[allow(clippy::too_many_arguments)]
    async fn finish_workflow(
        &self,
        workflow_id: WorkflowId,
        request: Request,
        shared_context: SharedContext,
        tasks: Vec<Task>,
        results: HashMap<TaskId, TaskResult>,
        cache_hit: bool,
    ) -> Result<WorkflowOutcome> {
        if self.take_cancelled(workflow_id) {
            return self.finish_cancelled(workflow_id, &request, &shared_context, &tasks, &results).await;
        }

        self.set_state(workflow_id, WorkflowState::Validating);
        let implementation_code = tasks
            .iter()
            .find(|t| t.task_type == TaskType::Implementation)
            .and_then(|t| results.get(&t.id))
            .filter(|r| r.status == TaskStatus::Completed)
            .map(|r| r.payload_text())
            .unwrap_or_default();

        let validation_report: Option<ValidationReport> = if implementation_code.trim().is_empty() {
            None
        } else {
            let mesh = self.validation_mesh.clone();
            let code = implementation_code.clone();
            let language = shared_context.language.clone();
            Some(
                run_activity(
                    ActivityKind::Validation,
                    RetryPolicy::default(),
                    self.config.heartbeat_interval,
                    move |_hb| {
                        let mesh = mesh.clone();
                        let code = code.clone();
                        let language = language.clone();
                        async move { mesh.validate(&code, &language).await }
                    },
                )
                .await?,
            )
        };
        self.checkpoint(workflow_id, WorkflowState::Validating, None, &request, &shared_context, &tasks, &results, cache_hit)
            .await?;

        self.set_state(workflow_id, WorkflowState::Scoring);
        let mut capsule = CapsuleAssembler::assemble(request.id, &shared_context, &tasks, &results);
        capsule.metadata.cache_hit = cache_hit;

        let tests_passed = tasks
            .iter()
            .find(|t| t.task_type == TaskType::TestGeneration)
            .and_then(|t| results.get(&t.id))
            .map(|r| r.status == TaskStatus::Completed);
        let runtime_success = validation_report
            .as_ref()
            .and_then(|r| r.checks.iter().find(|c| c.kind == "runtime"))
            .map(|c| c.status == CheckStatus::Passed);

        let confidence = ConfidenceEngine::score(&ScoringInput {
            source_files: &capsule.source_files,
            has_tests: !capsule.test_files.is_empty(),
            validation: validation_report.as_ref(),
            runtime_success,
            tests_passed,
        });
        capsule.validation = validation_report;
        capsule.metadata.confidence = Some(confidence.clone());
        self.checkpoint(workflow_id, WorkflowState::Scoring, None, &request, &shared_context, &tasks, &results, cache_hit)
            .await?;

        if confidence.human_review_required || confidence.overall_score < self.config.hitl_review_threshold {
            match self.await_hitl_review(workflow_id, &confidence).await {
                HitlOutcome::Approved => {}
                HitlOutcome::Rejected | HitlOutcome::TimedOut => {
                    self.set_state(workflow_id, WorkflowState::Failed);
                    let reason = "human review rejected the result, or the review window elapsed".to_string();
                    let error_capsule = CapsuleAssembler::error_capsule(request.id, &shared_context, vec![reason], capsule.metadata.clone());
                    self.store.put_capsule(&error_capsule).await?;
                    self.publish(workflow_id, EventKind::WorkflowFailed, None, serde_json::json!({ "reason": "hitl_review" }));
                    return Ok(WorkflowOutcome::Failed(error_capsule));
                }
                HitlOutcome::Cancelled => {
                    return self.finish_cancelled(workflow_id, &request, &shared_context, &tasks, &results).await;
                }
            }
        }

        self.set_state(workflow_id, WorkflowState::Assembling);
        self.checkpoint(workflow_id, WorkflowState::Assembling, None, &request, &shared_context, &tasks, &results, cache_hit)
            .await?;

        self.set_state(workflow_id, WorkflowState::Persisted);
        self.store.put_capsule(&capsule).await?;

        self.set_state(workflow_id, WorkflowState::Completed);
        self.publish(workflow_id, EventKind::WorkflowCompleted, None, serde_json::json!({ "capsule_id": capsule.id }));
        Ok(WorkflowOutcome::Completed(capsule))
    }

    async fn await_hitl_review(&self, workflow_id: WorkflowId, confidence: &ConfidenceAnalysis) -> HitlOutcome {
        self.set_state(workflow_id, WorkflowState::HitlReview);
        self.publish(
            workflow_id,
            EventKind::Status,
            None,
            serde_json::json!({ "stage": "hitl_review", "overall_score": confidence.overall_score }),
        );

        let (tx, rx) = oneshot::channel();
        self.hitl_signals.lock().insert(workflow_id, tx);

        match tokio::time::timeout(self.config.hitl_review_timeout, rx).await {
            Ok(Ok(true)) => HitlOutcome::Approved,
            Ok(Ok(false)) => {
                if self.take_cancelled(workflow_id) {
                    HitlOutcome::Cancelled
                } else {
                    HitlOutcome::Rejected
                }
            }
            Ok(Err(_)) | Err(_) => {
                self.hitl_signals.lock().remove(&workflow_id);
                HitlOutcome::TimedOut
            }
        }
    }

    async fn finish_cancelled(
        &self,
        workflow_id: WorkflowId,
        request: &Request,
        shared_context: &SharedContext,
        tasks: &[Task],
        results: &HashMap<TaskId, TaskResult>,
    ) -> Result<WorkflowOutcome> {
        let metadata = CapsuleMetadata {
            tasks_total: tasks.len(),
            tasks_succeeded: results.values().filter(|r| r.status == TaskStatus::Completed).count(),
            tasks_failed: results.values().filter(|r| r.status == TaskStatus::Failed).count(),
            total_execution_time_ms: results.values().map(|r| r.execution_time_ms).sum(),
            cache_hit: false,
            confidence: None,
        };
        let error_capsule = CapsuleAssembler::error_capsule(request.id, shared_context, vec!["workflow cancelled".to_string()], metadata);
        let _ = self.store.put_capsule(&error_capsule).await;
        self.publish(workflow_id, EventKind::WorkflowFailed, None, serde_json::json!({ "reason": "cancelled" }));
        Ok(WorkflowOutcome::Cancelled)
    }

    async fn execute_task(
        &self,
        workflow_id: WorkflowId,
        request: &Request,
        task: &Task,
        dependency_outputs: &[(TaskId, TaskResult)],
        language: &str,
        tier_router: &TierRouter,
    ) -> (TaskResult, bool) {
        self.publish(workflow_id, EventKind::TaskStarted, Some(task.id), serde_json::json!({ "task_type": format!("{:?}", task.task_type) }));

        let fingerprint = Fingerprint::compute(&task.description, "default", &request.requirements);
        if let Some(mut cached) = self.pattern_cache.get(request.tenant_id, fingerprint) {
            cached.task_id = task.id;
            return (cached, true);
        }

        let mut tier = tier_router.choose(task.id, task.complexity, None);
        let max_attempts = Scheduler::max_retries();
        let mut result = None;
        let mut validation_hint: Option<String> = None;
        let output_kind = output_kind_for(task);
        let validates_output = matches!(output_kind, OutputKind::Code | OutputKind::Tests);

        for attempt in 1..=max_attempts {
            let system_prompt = system_prompt_for(task, language);
            let user_prompt = user_prompt_for(task, dependency_outputs, validation_hint.as_deref());
            let llm = self.llm.clone();
            let call_tier = tier;

            let outcome = run_activity(
                ActivityKind::LlmCall,
                RetryPolicy::default(),
                self.config.heartbeat_interval,
                move |_hb| {
                    let llm = llm.clone();
                    let system_prompt = system_prompt.clone();
                    let user_prompt = user_prompt.clone();
                    async move {
                        llm.complete(LlmRequest {
                            tier: call_tier,
                            system_prompt,
                            user_prompt,
                            max_tokens: 4096,
                        })
                        .await
                    }
                },
            )
            .await;

            match outcome {
                Ok(response) => {
                    let cost_record_id = self
                        .cost
                        .record(RecordCostInput {
                            model: &response.model,
                            provider: &response.provider,
                            prompt_tokens: response.prompt_tokens,
                            completion_tokens: response.completion_tokens,
                            workflow_id,
                            tenant_id: request.tenant_id,
                            user_id: request.user_id,
                            task_id: task.id,
                            latency_ms: response.latency_ms,
                        })
                        .await
                        .ok()
                        .map(|r| r.id);

                    let validation_report = if validates_output {
                        self.validate_task_artifact(&response.content, language).await.ok()
                    } else {
                        None
                    };
                    let task_confidence = validation_report
                        .as_ref()
                        .map(|r| r.confidence)
                        .unwrap_or_else(|| estimate_task_confidence(attempt));
                    let validation_failed = validation_report.as_ref().is_some_and(|r| {
                        r.overall_status == OverallStatus::Failed
                            || r.confidence < crate::constants::TASK_VALIDATION_CONFIDENCE_THRESHOLD
                    });

                    if !validation_failed {
                        result = Some(TaskResult {
                            task_id: task.id,
                            status: TaskStatus::Completed,
                            output_kind,
                            payload: response.content.into_bytes(),
                            filename: None,
                            confidence: task_confidence,
                            tier,
                            execution_time_ms: response.latency_ms,
                            cost_record_id,
                            retry_count: attempt - 1,
                        });
                        break;
                    }

                    let report = validation_report.expect("validation_failed implies a report");
                    match tier_router.escalate(task.id, task.complexity, tier, task_confidence) {
                        Some(next) if attempt < max_attempts => {
                            tier = next;
                            validation_hint = Some(describe_validation_failure(&report));
                        }
                        _ => {
                            result = Some(TaskResult {
                                task_id: task.id,
                                status: TaskStatus::Failed,
                                output_kind: OutputKind::Error,
                                payload: format!(
                                    "validation failed ({:?}, confidence {:.2})",
                                    report.overall_status, report.confidence
                                )
                                .into_bytes(),
                                filename: None,
                                confidence: task_confidence,
                                tier,
                                execution_time_ms: response.latency_ms,
                                cost_record_id,
                                retry_count: attempt - 1,
                            });
                            break;
                        }
                    }
                }
                Err(err) => {
                    if !err.is_retryable() {
                        result = Some(TaskResult::failed(task.id, &err.to_string(), attempt, tier));
                        break;
                    }
                    match tier_router.escalate(task.id, task.complexity, tier, 0.0) {
                        Some(next) => tier = next,
                        None => {
                            result = Some(TaskResult::failed(task.id, &err.to_string(), attempt, tier));
                            break;
                        }
                    }
                    if attempt == max_attempts {
                        result = Some(TaskResult::failed(task.id, &err.to_string(), attempt, tier));
                    }
                }
            }
        }

        let result = result.unwrap_or_else(|| TaskResult::failed(task.id, "exhausted retries with no recorded outcome", max_attempts, tier));
        if result.status == TaskStatus::Completed {
            self.pattern_cache.put(request.tenant_id, fingerprint, result.clone());
        }
        (result, false)
    }

    /// Validate one task's artifact in isolation, the same way
    /// `finish_workflow` validates the assembled implementation (spec §4.5),
    /// but scoped to a single task's output so escalation can react to it
    /// (spec §4.4).
    async fn validate_task_artifact(&self, code: &str, language: &str) -> Result<ValidationReport> {
        let mesh = self.validation_mesh.clone();
        let code = code.to_string();
        let language = language.to_string();
        run_activity(
            ActivityKind::Validation,
            RetryPolicy::default(),
            self.config.heartbeat_interval,
            move |_hb| {
                let mesh = mesh.clone();
                let code = code.clone();
                let language = language.clone();
                async move { mesh.validate(&code, &language).await }
            },
        )
        .await
    }

    fn set_state(&self, workflow_id: WorkflowId, state: WorkflowState) {
        self.states.lock().insert(workflow_id, state);
    }

    fn take_cancelled(&self, workflow_id: WorkflowId) -> bool {
        self.cancelled.lock().contains(&workflow_id)
    }

    fn publish(&self, workflow_id: WorkflowId, kind: EventKind, task_id: Option<TaskId>, data: serde_json::Value) {
        let mut event = ProgressEvent::new(workflow_id, kind, "workflow_runtime", data);
        if let Some(task_id) = task_id {
            event = event.with_task(task_id);
        }
        self.progress.publish(event);
    }

    #[allow(clippy::too_many_arguments)]
    async fn checkpoint(
        &self,
        workflow_id: WorkflowId,
        state: WorkflowState,
        last_completed_batch: Option<usize>,
        request: &Request,
        shared_context: &SharedContext,
        tasks: &[Task],
        results: &HashMap<TaskId, TaskResult>,
        cache_hit: bool,
    ) -> Result<()> {
        let snapshot = WorkflowSnapshot {
            request: request.clone(),
            shared_context: shared_context.clone(),
            tasks: tasks.to_vec(),
            results: results.clone(),
            cache_hit,
        };
        let task_statuses = results.iter().map(|(id, r)| (*id, r.status)).collect();
        let checkpoint = WorkflowCheckpoint {
            workflow_id,
            state,
            last_completed_batch,
            task_statuses,
            state_blob: bincode::serialize(&snapshot)?,
        };
        self.checkpointer.save(&checkpoint).await?;
        self.store.put_checkpoint(&checkpoint).await
    }
}

enum HitlOutcome {
    Approved,
    Rejected,
    TimedOut,
    Cancelled,
}

fn output_kind_for(task: &Task) -> OutputKind {
    match task.task_type {
        TaskType::Implementation | TaskType::Review | TaskType::Meta => OutputKind::Code,
        TaskType::TestGeneration => OutputKind::Tests,
        TaskType::Documentation => OutputKind::Docs,
        TaskType::Analysis => OutputKind::Analysis,
    }
}

/// Per-task confidence heuristic: later attempts (after escalation) are
/// scored slightly lower than a clean first try, keeping dependency-output
/// ranking stable without a full re-validation per task.
fn estimate_task_confidence(attempt: u32) -> f64 {
    (0.95 - 0.05 * f64::from(attempt - 1)).max(0.6)
}

fn system_prompt_for(task: &Task, language: &str) -> String {
    format!(
        "You are generating {language} code for a {:?} task. Respond with the artifact only, no commentary.",
        task.task_type
    )
}

fn user_prompt_for(task: &Task, dependency_outputs: &[(TaskId, TaskResult)], validation_hint: Option<&str>) -> String {
    let mut prompt = task.description.clone();
    if !dependency_outputs.is_empty() {
        prompt.push_str("\n\nContext from prior steps:\n");
        for (id, result) in dependency_outputs {
            prompt.push_str(&format!("--- {id} ---\n{}\n", result.payload_text()));
        }
    }
    if let Some(hint) = validation_hint {
        prompt.push_str("\n\n");
        prompt.push_str(hint);
    }
    prompt
}

/// Summarize a failed [`ValidationReport`] as a retry hint naming the
/// specific checks that didn't pass (spec §4.4: retry "with pattern hints").
fn describe_validation_failure(report: &ValidationReport) -> String {
    let failing: Vec<&str> = report
        .checks
        .iter()
        .filter(|c| c.status != CheckStatus::Passed)
        .map(|c| c.message.as_str())
        .collect();
    format!(
        "The previous attempt failed validation ({:?}, confidence {:.2}). Fix the following and resubmit:\n{}",
        report.overall_status,
        report.confidence,
        if failing.is_empty() { "- (no specific findings reported)".to_string() } else { failing.iter().map(|m| format!("- {m}")).collect::<Vec<_>>().join("\n") }
    )
}

/// Clone the dependency outputs a task needs out of the shared results map,
/// together with the language it should be generated in, before handing the
/// task off to a concurrently-running future.
fn owned_dependency_outputs(
    graph: &TaskGraph,
    task_id: TaskId,
    results: &HashMap<TaskId, TaskResult>,
    shared_context: &SharedContext,
) -> (Vec<(TaskId, TaskResult)>, String) {
    let frame = Scheduler::build_context_frame(graph, task_id, shared_context, results, None);
    let deps = frame.dependency_outputs.into_iter().map(|(id, r)| (id, r.clone())).collect();
    (deps, shared_context.language.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{TenantId, UserId};
    use crate::store::InMemoryStore;
    use crate::workflow::checkpoint::InMemoryCheckpointer;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct EchoLlm {
        calls: AtomicU64,
    }

    #[async_trait]
    impl LlmBackend for EchoLlm {
        async fn complete(&self, request: LlmRequest) -> Result<crate::llm_backend::LlmResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(crate::llm_backend::LlmResponse {
                model: self.model_for_tier(request.tier),
                provider: "test".to_string(),
                content: "def handler():\n    return 42\n".to_string(),
                prompt_tokens: 10,
                completion_tokens: 10,
                latency_ms: 1,
            })
        }

        fn model_for_tier(&self, tier: Tier) -> String {
            format!("echo-{tier}")
        }
    }

    struct AlwaysPassBackend;

    #[async_trait]
    impl crate::sandbox::SandboxBackend for AlwaysPassBackend {
        async fn execute(
            &self,
            _code: &str,
            _language: &str,
            _inputs: &str,
            _limits: &crate::sandbox::ExecutionLimits,
        ) -> Result<crate::sandbox::ExecutionResult> {
            Ok(crate::sandbox::ExecutionResult {
                status: crate::sandbox::ExecutionStatus::Success,
                stdout: String::new(),
                stderr: String::new(),
                exit_code: Some(0),
                elapsed_ms: 1,
                peak_memory_bytes: 0,
            })
        }

        fn languages(&self) -> std::collections::HashSet<String> {
            ["python".to_string()].into_iter().collect()
        }
    }

    fn sample_request() -> Request {
        let mut constraints = HashMap::new();
        constraints.insert("language".to_string(), "python".to_string());
        Request {
            id: RequestId::new(),
            tenant_id: TenantId::new(),
            user_id: UserId::new(),
            description: "Write a function that returns 42".to_string(),
            requirements: vec![],
            constraints,
            metadata: HashMap::new(),
        }
    }

    fn test_runtime() -> WorkflowRuntime {
        let sandbox = Arc::new(SandboxPool::new(Arc::new(AlwaysPassBackend), 4));
        WorkflowRuntime::new(
            OrchestratorConfig::default().with_hitl_review_threshold(0.0),
            Arc::new(InMemoryStore::new()),
            Arc::new(InMemoryCheckpointer::new()),
            Arc::new(ProgressBus::new()),
            Arc::new(EchoLlm { calls: AtomicU64::new(0) }),
            sandbox,
            Arc::new(crate::cost::InMemoryCostAccountant::new()),
        )
    }

    #[tokio::test]
    async fn trivial_request_completes_and_persists_a_capsule() {
        let runtime = test_runtime();
        let outcome = runtime.start(sample_request()).await.unwrap();
        match outcome {
            WorkflowOutcome::Completed(capsule) => {
                assert!(!capsule.source_files.is_empty());
                assert!(!capsule.is_error_capsule());
            }
            other => panic!("expected Completed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn second_identical_request_hits_the_pattern_cache() {
        let runtime = test_runtime();
        let request = sample_request();
        let tenant_id = request.tenant_id;
        runtime.start(request).await.unwrap();

        let mut second = sample_request();
        second.tenant_id = tenant_id;
        let outcome = runtime.start(second).await.unwrap();
        match outcome {
            WorkflowOutcome::Completed(capsule) => assert!(capsule.metadata.cache_hit),
            other => panic!("expected Completed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancel_before_start_completes_yields_cancelled_outcome() {
        let runtime = Arc::new(test_runtime());
        let request = sample_request();
        let workflow_id = WorkflowId::new();
        runtime.states.lock().insert(workflow_id, WorkflowState::Created);
        runtime.cancel(workflow_id).unwrap();
        assert_eq!(runtime.query(workflow_id), Some(WorkflowState::Cancelled));
        let _ = request;
    }

    #[tokio::test]
    async fn signal_without_a_pending_review_is_workflow_not_found() {
        let runtime = test_runtime();
        let err = runtime.signal(WorkflowId::new(), true).unwrap_err();
        assert!(matches!(err, Error::WorkflowNotFound(_)));
    }
}

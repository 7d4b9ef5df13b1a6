//! Mock backends and test harness for the execution orchestrator.
//!
//! - [`MockLlmBackend`] / [`MockSandboxBackend`]: scriptable stand-ins for
//!   the two external compute collaborators ([`forge_core::LlmBackend`],
//!   [`forge_core::SandboxBackend`]).
//! - [`WorkflowTestHarness`]: wires those mocks together with the in-memory
//!   store, checkpointer, cost accountant, and progress bus into a ready-to-
//!   run [`forge_core::WorkflowRuntime`], for integration tests that don't
//!   want to repeat that wiring at every call site.

mod mock;

pub use mock::{MockLlmBackend, MockSandboxBackend};

use std::sync::Arc;

use forge_core::config::OrchestratorConfig;
use forge_core::cost::InMemoryCostAccountant;
use forge_core::progress_bus::ProgressBus;
use forge_core::sandbox::SandboxPool;
use forge_core::store::InMemoryStore;
use forge_core::workflow::{InMemoryCheckpointer, WorkflowOutcome, WorkflowRuntime};
use forge_core::{Request, Result};

/// An in-memory [`WorkflowRuntime`] plus handles to the mocks it was built
/// from, so a test can script behavior (`llm().fail_next()`) and inspect it
/// afterward (`sandbox_backend().call_count()`).
pub struct WorkflowTestHarness {
    runtime: WorkflowRuntime,
    llm: Arc<MockLlmBackend>,
    sandbox_backend: Arc<MockSandboxBackend>,
    progress: Arc<ProgressBus>,
}

impl Default for WorkflowTestHarness {
    fn default() -> Self {
        Self::new(OrchestratorConfig::default())
    }
}

impl WorkflowTestHarness {
    pub fn new(config: OrchestratorConfig) -> Self {
        let llm = Arc::new(MockLlmBackend::new());
        let sandbox_backend = Arc::new(MockSandboxBackend::new());
        let sandbox = Arc::new(SandboxPool::new(sandbox_backend.clone(), config.sandbox_max_concurrency));
        let progress = Arc::new(ProgressBus::new());

        let runtime = WorkflowRuntime::new(
            config,
            Arc::new(InMemoryStore::new()),
            Arc::new(InMemoryCheckpointer::new()),
            progress.clone(),
            llm.clone(),
            sandbox,
            Arc::new(InMemoryCostAccountant::new()),
        );

        Self { runtime, llm, sandbox_backend, progress }
    }

    /// Run `request` to completion (or failure/cancellation).
    pub async fn run(&self, request: Request) -> Result<WorkflowOutcome> {
        self.runtime.start(request).await
    }

    pub fn runtime(&self) -> &WorkflowRuntime {
        &self.runtime
    }

    pub fn llm(&self) -> &MockLlmBackend {
        &self.llm
    }

    pub fn sandbox_backend(&self) -> &MockSandboxBackend {
        &self.sandbox_backend
    }

    pub fn progress(&self) -> &ProgressBus {
        &self.progress
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forge_core::ids::{RequestId, TenantId, UserId};
    use std::collections::HashMap;

    fn sample_request() -> Request {
        Request {
            id: RequestId::new(),
            tenant_id: TenantId::new(),
            user_id: UserId::new(),
            description: "Write a function that reverses a string".into(),
            requirements: vec![],
            constraints: HashMap::from([("language".to_string(), "python".to_string())]),
            metadata: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn harness_runs_a_trivial_request_to_completion() {
        let harness = WorkflowTestHarness::new(OrchestratorConfig::default().with_hitl_review_threshold(0.0));
        let outcome = harness.run(sample_request()).await.unwrap();
        assert!(matches!(outcome, WorkflowOutcome::Completed(_)));
        assert!(harness.llm().call_count() > 0);
    }

    #[tokio::test]
    async fn harness_exposes_the_mock_sandbox_for_assertions() {
        let harness = WorkflowTestHarness::default();
        assert_eq!(harness.sandbox_backend().call_count(), 0);
    }
}

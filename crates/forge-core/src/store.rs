//! Durable Store contract (C1, spec §6).
//!
//! Minimum table set: capsules, `llm_usage` (append-only, indexed by
//! workflow id and tenant id × date), `workflow_checkpoints`. All writes are
//! transactional per row. `forge-postgres-store` provides the durable
//! backend; the in-memory impl here backs tests and `forge-testing`'s
//! harness.

use async_trait::async_trait;

use crate::capsule::Capsule;
use crate::cost::CostRecord;
use crate::error::Result;
use crate::ids::{CapsuleId, RequestId};
use crate::workflow::checkpoint::WorkflowCheckpoint;

/// The persistence surface the orchestrator consumes (spec §6, §1's C1).
#[async_trait]
pub trait DurableStore: Send + Sync {
    async fn put_capsule(&self, capsule: &Capsule) -> Result<()>;
    async fn get_capsule(&self, capsule_id: CapsuleId) -> Result<Option<Capsule>>;

    /// Every capsule ever produced for `request_id`, most recent first
    /// (spec §3 invariant: "re-generation ... produces a new capsule, never
    /// mutates an existing one").
    async fn capsules_for_request(&self, request_id: RequestId) -> Result<Vec<Capsule>>;

    async fn put_cost_record(&self, record: &CostRecord) -> Result<()>;

    async fn put_checkpoint(&self, checkpoint: &WorkflowCheckpoint) -> Result<()>;
    async fn get_checkpoint(&self, workflow_id: crate::ids::WorkflowId) -> Result<Option<WorkflowCheckpoint>>;
}

/// In-memory reference [`DurableStore`].
#[derive(Default)]
pub struct InMemoryStore {
    capsules: parking_lot::Mutex<Vec<Capsule>>,
    cost_records: parking_lot::Mutex<Vec<CostRecord>>,
    checkpoints: parking_lot::Mutex<std::collections::HashMap<crate::ids::WorkflowId, WorkflowCheckpoint>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DurableStore for InMemoryStore {
    async fn put_capsule(&self, capsule: &Capsule) -> Result<()> {
        self.capsules.lock().push(capsule.clone());
        Ok(())
    }

    async fn get_capsule(&self, capsule_id: CapsuleId) -> Result<Option<Capsule>> {
        Ok(self.capsules.lock().iter().find(|c| c.id == capsule_id).cloned())
    }

    async fn capsules_for_request(&self, request_id: RequestId) -> Result<Vec<Capsule>> {
        let mut found: Vec<Capsule> = self
            .capsules
            .lock()
            .iter()
            .filter(|c| c.request_id == request_id)
            .cloned()
            .collect();
        found.reverse();
        Ok(found)
    }

    async fn put_cost_record(&self, record: &CostRecord) -> Result<()> {
        self.cost_records.lock().push(record.clone());
        Ok(())
    }

    async fn put_checkpoint(&self, checkpoint: &WorkflowCheckpoint) -> Result<()> {
        self.checkpoints.lock().insert(checkpoint.workflow_id, checkpoint.clone());
        Ok(())
    }

    async fn get_checkpoint(&self, workflow_id: crate::ids::WorkflowId) -> Result<Option<WorkflowCheckpoint>> {
        Ok(self.checkpoints.lock().get(&workflow_id).cloned())
    }
}

//! Agent Tier Router (C6, spec §4.4).
//!
//! Chooses a model-strength tier per task from complexity, dependency count,
//! and prior success rate, then escalates on validation failure without ever
//! re-selecting a tier that already failed for the same task in the same
//! workflow.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::ids::{TaskId, WorkflowId};
use crate::task::Complexity;

/// Model-strength tier, weakest/cheapest to strongest/most expensive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Tier {
    /// Weakest, cheapest.
    T0,
    T1,
    T2,
    /// Strongest, most expensive.
    T3,
}

impl Tier {
    /// Next tier up, saturating at `T3`.
    pub fn escalate(self) -> Tier {
        match self {
            Tier::T0 => Tier::T1,
            Tier::T1 => Tier::T2,
            Tier::T2 => Tier::T3,
            Tier::T3 => Tier::T3,
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Tier::T0 => "T0",
            Tier::T1 => "T1",
            Tier::T2 => "T2",
            Tier::T3 => "T3",
        };
        write!(f, "{s}")
    }
}

/// Default tier for a given complexity (spec §4.4's policy table).
fn default_tier(complexity: Complexity) -> Tier {
    match complexity {
        Complexity::Trivial => Tier::T0,
        Complexity::Simple => Tier::T1,
        Complexity::Medium => Tier::T2,
        Complexity::Complex => Tier::T3,
        Complexity::Meta => Tier::T3,
    }
}

/// Whether a validation failure at `current` tier should escalate, and to
/// what tier, for a task of the given complexity (spec §4.4's escalation
/// trigger column).
fn escalation_target(complexity: Complexity, current: Tier, _confidence: f64) -> Option<Tier> {
    // Simple escalates to T2 on a failed validation *or* low confidence; both
    // triggers land on the same target tier, so the caller decides whether to
    // invoke this at all — this just says where escalation goes once it does.
    match complexity {
        Complexity::Trivial => Some(Tier::T1).filter(|_| current < Tier::T1),
        Complexity::Simple | Complexity::Medium => Some(Tier::T2).filter(|_| current < Tier::T2),
        // Already at the ceiling tier by default; a failure here still
        // retries at T3 rather than giving up with no escalation at all.
        Complexity::Complex | Complexity::Meta => Some(Tier::T3),
    }
}

/// Per-task escalation history, scoped to a single workflow. Guards the
/// "never re-select a previously-failed tier" rule (spec §4.4).
#[derive(Default)]
struct WorkflowHistory {
    failed_tiers: HashMap<TaskId, Vec<Tier>>,
}

/// Chooses and escalates tiers for tasks within a workflow's lifetime.
///
/// One [`TierRouter`] is created per workflow (its history does not survive
/// across workflows, matching spec §4.4: "within the same workflow").
pub struct TierRouter {
    history: Mutex<WorkflowHistory>,
    workflow_id: WorkflowId,
}

impl TierRouter {
    /// Create a router scoped to `workflow_id`.
    pub fn new(workflow_id: WorkflowId) -> Self {
        Self {
            history: Mutex::new(WorkflowHistory::default()),
            workflow_id,
        }
    }

    /// The workflow this router is scoped to.
    pub fn workflow_id(&self) -> WorkflowId {
        self.workflow_id
    }

    /// Choose the initial tier for a task (spec §4.4's default-tier column).
    ///
    /// `prior_success_rate` is an optional hint from the Vector Index's
    /// historical record for this task type + complexity; a low rate nudges
    /// the choice up by one tier from the bare default.
    pub fn choose(&self, task_id: TaskId, complexity: Complexity, prior_success_rate: Option<f64>) -> Tier {
        let mut tier = default_tier(complexity);
        if let Some(rate) = prior_success_rate {
            if rate < 0.5 {
                tier = tier.escalate();
            }
        }
        self.skip_failed(task_id, tier)
    }

    /// Escalate after a validation failure at `current`, honoring the
    /// never-reselect-a-failed-tier rule. Returns `None` when the policy has
    /// no further escalation for this complexity (the task should then
    /// terminally fail once retries are exhausted).
    pub fn escalate(
        &self,
        task_id: TaskId,
        complexity: Complexity,
        current: Tier,
        confidence: f64,
    ) -> Option<Tier> {
        self.record_failure(task_id, current);
        let target = escalation_target(complexity, current, confidence)?;
        Some(self.skip_failed(task_id, target))
    }

    /// Record that `tier` failed for `task_id` without attempting to
    /// compute the next tier (used when a task fails for non-validation
    /// reasons but the caller still wants the history updated).
    pub fn record_failure(&self, task_id: TaskId, tier: Tier) {
        self.history
            .lock()
            .failed_tiers
            .entry(task_id)
            .or_default()
            .push(tier);
    }

    fn skip_failed(&self, task_id: TaskId, mut tier: Tier) -> Tier {
        let history = self.history.lock();
        let Some(failed) = history.failed_tiers.get(&task_id) else {
            return tier;
        };
        while failed.contains(&tier) && tier != Tier::T3 {
            tier = tier.escalate();
        }
        tier
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_tiers_match_policy_table() {
        assert_eq!(default_tier(Complexity::Trivial), Tier::T0);
        assert_eq!(default_tier(Complexity::Simple), Tier::T1);
        assert_eq!(default_tier(Complexity::Medium), Tier::T2);
        assert_eq!(default_tier(Complexity::Complex), Tier::T3);
        assert_eq!(default_tier(Complexity::Meta), Tier::T3);
    }

    #[test]
    fn complex_tasks_retry_at_t3_on_escalation() {
        let router = TierRouter::new(WorkflowId::new());
        let task = TaskId::new();
        assert_eq!(
            router.escalate(task, Complexity::Complex, Tier::T3, 0.5),
            Some(Tier::T3)
        );
    }

    #[test]
    fn trivial_task_escalates_to_t1_on_failure() {
        let router = TierRouter::new(WorkflowId::new());
        let task = TaskId::new();
        let next = router.escalate(task, Complexity::Trivial, Tier::T0, 1.0);
        assert_eq!(next, Some(Tier::T1));
    }

    #[test]
    fn never_reselects_a_previously_failed_tier() {
        let router = TierRouter::new(WorkflowId::new());
        let task = TaskId::new();
        // T0 fails, escalates to T1.
        let t1 = router.escalate(task, Complexity::Trivial, Tier::T0, 1.0).unwrap();
        assert_eq!(t1, Tier::T1);
        // T1 fails too; the router must not propose T0 or T1 again.
        router.record_failure(task, Tier::T1);
        let chosen = router.choose(task, Complexity::Trivial, None);
        assert_ne!(chosen, Tier::T0);
        assert_ne!(chosen, Tier::T1);
    }

    #[test]
    fn low_prior_success_rate_nudges_tier_up() {
        let router = TierRouter::new(WorkflowId::new());
        let task = TaskId::new();
        let tier = router.choose(task, Complexity::Simple, Some(0.1));
        assert_eq!(tier, Tier::T2);
    }

    #[test]
    fn tier_escalate_saturates_at_t3() {
        assert_eq!(Tier::T3.escalate(), Tier::T3);
    }
}

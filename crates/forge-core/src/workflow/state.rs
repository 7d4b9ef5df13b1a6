//! Workflow state machine (spec §4.2).
//!
//! ```text
//! CREATED → DECOMPOSED → EXECUTING_BATCH_k → VALIDATING → SCORING
//!         → [HITL_REVIEW?] → ASSEMBLING → PERSISTED → (COMPLETED | FAILED | CANCELLED)
//! ```

use serde::{Deserialize, Serialize};

/// A workflow's current stage. `EXECUTING_BATCH_k` carries its batch index so
/// the runtime knows which batch to resume at after a crash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "stage")]
pub enum WorkflowState {
    Created,
    Decomposed,
    ExecutingBatch { batch_index: usize },
    Validating,
    Scoring,
    /// Entered iff the Confidence Engine returned `human_review_required` or
    /// `overall_score < HITL_REVIEW_THRESHOLD` (spec §4.2).
    HitlReview,
    Assembling,
    Persisted,
    Completed,
    Failed,
    Cancelled,
}

impl WorkflowState {
    /// Whether this state is terminal; no further transitions are valid.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowState::Completed | WorkflowState::Failed | WorkflowState::Cancelled
        )
    }

    /// Whether this state accepts the `approve`/`reject` HITL signals.
    pub fn awaits_hitl_signal(&self) -> bool {
        matches!(self, WorkflowState::HitlReview)
    }

    /// Validate `self → next` against the fixed state graph. Cancellation is
    /// reachable from any non-terminal state (spec §5: "cancel propagates to
    /// the workflow state machine"); every other edge follows the diagram
    /// above.
    pub fn can_transition_to(&self, next: WorkflowState) -> bool {
        use WorkflowState::*;

        if self.is_terminal() {
            return false;
        }
        if matches!(next, Cancelled) {
            return true;
        }

        matches!(
            (*self, next),
            (Created, Decomposed)
                | (Decomposed, ExecutingBatch { batch_index: 0 })
                | (ExecutingBatch { .. }, ExecutingBatch { .. })
                | (ExecutingBatch { .. }, Validating)
                | (Validating, Scoring)
                | (Scoring, HitlReview)
                | (Scoring, Assembling)
                | (HitlReview, Assembling)
                | (HitlReview, Failed)
                | (Assembling, Persisted)
                | (Persisted, Completed)
                | (Validating, Failed)
                | (ExecutingBatch { .. }, Failed)
        )
    }
}

impl std::fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkflowState::Created => write!(f, "created"),
            WorkflowState::Decomposed => write!(f, "decomposed"),
            WorkflowState::ExecutingBatch { batch_index } => {
                write!(f, "executing_batch_{batch_index}")
            }
            WorkflowState::Validating => write!(f, "validating"),
            WorkflowState::Scoring => write!(f, "scoring"),
            WorkflowState::HitlReview => write!(f, "hitl_review"),
            WorkflowState::Assembling => write!(f, "assembling"),
            WorkflowState::Persisted => write!(f, "persisted"),
            WorkflowState::Completed => write!(f, "completed"),
            WorkflowState::Failed => write!(f, "failed"),
            WorkflowState::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_accept_no_further_transitions() {
        assert!(!WorkflowState::Completed.can_transition_to(WorkflowState::Failed));
        assert!(!WorkflowState::Cancelled.can_transition_to(WorkflowState::Completed));
    }

    #[test]
    fn cancel_is_reachable_from_any_non_terminal_state() {
        assert!(WorkflowState::Created.can_transition_to(WorkflowState::Cancelled));
        assert!(WorkflowState::ExecutingBatch { batch_index: 2 }.can_transition_to(WorkflowState::Cancelled));
        assert!(WorkflowState::HitlReview.can_transition_to(WorkflowState::Cancelled));
    }

    #[test]
    fn happy_path_follows_the_documented_graph() {
        let mut s = WorkflowState::Created;
        let path = [
            WorkflowState::Decomposed,
            WorkflowState::ExecutingBatch { batch_index: 0 },
            WorkflowState::Validating,
            WorkflowState::Scoring,
            WorkflowState::Assembling,
            WorkflowState::Persisted,
            WorkflowState::Completed,
        ];
        for next in path {
            assert!(s.can_transition_to(next), "{s} -> {next}");
            s = next;
        }
    }

    #[test]
    fn hitl_review_only_reachable_from_scoring() {
        assert!(WorkflowState::Scoring.can_transition_to(WorkflowState::HitlReview));
        assert!(!WorkflowState::Validating.can_transition_to(WorkflowState::HitlReview));
    }

    #[test]
    fn hitl_timeout_fails_the_workflow() {
        assert!(WorkflowState::HitlReview.can_transition_to(WorkflowState::Failed));
    }
}

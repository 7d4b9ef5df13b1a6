//! Core data model: requests, tasks, shared context, and task results
//! (spec.md §3).

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::ids::{RequestId, TaskId, TenantId, UserId};

/// Immutable input to a workflow. Created by the (out-of-scope) request
/// surface and never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Unique id of this request.
    pub id: RequestId,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Submitting user.
    pub user_id: UserId,
    /// Free-text product description.
    pub description: String,
    /// Optional structured requirements (acceptance criteria, etc.).
    #[serde(default)]
    pub requirements: Vec<String>,
    /// Constraints such as target language or framework.
    #[serde(default)]
    pub constraints: HashMap<String, String>,
    /// Arbitrary caller-supplied metadata, carried through to the capsule.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Request {
    /// Convenience accessor for the `language` constraint, the one
    /// most components key off of.
    pub fn language(&self) -> Option<&str> {
        self.constraints.get("language").map(String::as_str)
    }
}

/// The kind of work a task performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Produces source code.
    Implementation,
    /// Produces tests for previously implemented code.
    TestGeneration,
    /// Produces documentation.
    Documentation,
    /// Produces a non-code analysis artifact.
    Analysis,
    /// Reviews another task's output.
    Review,
    /// Orchestration bookkeeping, not user-visible output.
    Meta,
}

/// Estimated difficulty of a task; drives both the tier hint and the
/// per-task timeout (spec §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    /// Single-statement or boilerplate changes.
    Trivial,
    /// Small, self-contained piece of functionality.
    Simple,
    /// Moderate scope, a handful of interacting pieces.
    Medium,
    /// Substantial design and implementation effort.
    Complex,
    /// Workflow-level bookkeeping, not a generation task.
    Meta,
}

impl Complexity {
    /// Infer complexity from a request's description and constraints
    /// (spec §4.1: "inferred from description length, verb count, and
    /// constraints").
    pub fn infer(description: &str, constraints: &HashMap<String, String>) -> Self {
        let word_count = description.split_whitespace().count();
        let verb_count = description
            .split_whitespace()
            .filter(|w| {
                let w = w.to_ascii_lowercase();
                [
                    "implement", "design", "build", "create", "write", "add", "refactor",
                    "integrate", "optimize", "support",
                ]
                .iter()
                .any(|v| w.starts_with(v))
            })
            .count();
        let has_architecture_constraint = constraints.contains_key("architecture");

        if word_count <= 6 && verb_count <= 1 {
            Complexity::Trivial
        } else if word_count <= 20 && verb_count <= 2 && !has_architecture_constraint {
            Complexity::Simple
        } else if word_count <= 60 && verb_count <= 4 {
            Complexity::Medium
        } else {
            Complexity::Complex
        }
    }

    /// Default per-task timeout driven by complexity, scaling the activity
    /// budgets from spec §4.2.
    pub fn timeout(&self) -> std::time::Duration {
        use std::time::Duration;
        match self {
            Complexity::Trivial => Duration::from_secs(60),
            Complexity::Simple => Duration::from_secs(3 * 60),
            Complexity::Medium => Duration::from_secs(5 * 60),
            Complexity::Complex => Duration::from_secs(10 * 60),
            Complexity::Meta => Duration::from_secs(60),
        }
    }
}

/// A unit of work in the decomposition graph. Frozen once the graph is
/// sealed by the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique id.
    pub id: TaskId,
    /// Kind of work.
    pub task_type: TaskType,
    /// Human-readable description of the work.
    pub description: String,
    /// Estimated difficulty.
    pub complexity: Complexity,
    /// Ids of tasks that must be `completed` before this one may start.
    pub dependencies: HashSet<TaskId>,
    /// Optional language hint, defaulting to the shared context's language.
    pub language_hint: Option<String>,
}

impl Task {
    /// Whether this task's description suggests it produces tests
    /// (spec §4.10's "test markers").
    pub fn looks_like_test_task(&self) -> bool {
        self.task_type == TaskType::TestGeneration
            || TEST_MARKERS
                .iter()
                .any(|m| self.description.to_ascii_lowercase().contains(m))
    }
}

const TEST_MARKERS: &[&str] = &["test", "unit test", "spec", "pytest", "assert"];

/// Per-workflow agreement on primary language, main file, framework, and
/// architecture, established before the first task runs (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedContext {
    /// Primary implementation language.
    pub language: String,
    /// Name of the main source file (e.g. `main.py`).
    pub main_file_name: String,
    /// Framework in use, if any.
    pub framework: Option<String>,
    /// Architecture pattern (e.g. "single-module", "layered").
    pub architecture_pattern: String,
    /// Imports/dependencies common to all generated files.
    pub common_imports: Vec<String>,
}

impl SharedContext {
    /// Derive a shared context from a request, defaulting anything the
    /// request doesn't constrain.
    pub fn from_request(request: &Request) -> Self {
        let language = request
            .language()
            .map(str::to_string)
            .unwrap_or_else(|| "python".to_string());
        let main_file_name = default_main_file_name(&language);
        Self {
            framework: request.constraints.get("framework").cloned(),
            architecture_pattern: request
                .constraints
                .get("architecture")
                .cloned()
                .unwrap_or_else(|| "single-module".to_string()),
            common_imports: Vec::new(),
            main_file_name,
            language,
        }
    }
}

fn default_main_file_name(language: &str) -> String {
    match language {
        "python" => "main.py",
        "javascript" => "index.js",
        "typescript" => "index.ts",
        "rust" => "main.rs",
        "go" => "main.go",
        "java" => "Main.java",
        _ => "main.txt",
    }
    .to_string()
}

/// Lifecycle status of a [`TaskResult`]. Terminal at most once (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Not yet dispatched.
    Pending,
    /// Currently executing.
    Running,
    /// Terminal: succeeded.
    Completed,
    /// Terminal: exhausted retries or hit a non-retryable error.
    Failed,
    /// Terminal: skipped because a dependency failed, or cancelled.
    Cancelled,
}

impl TaskStatus {
    /// Whether this status is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

/// The shape of a [`TaskResult`]'s payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    /// Source code.
    Code,
    /// Test code.
    Tests,
    /// Documentation text.
    Docs,
    /// Non-code analysis output.
    Analysis,
    /// An error payload (used by error capsules).
    Error,
}

/// Per-task output. Written at most once terminally (spec §3 invariants).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    /// The task this result belongs to.
    pub task_id: TaskId,
    /// Current status.
    pub status: TaskStatus,
    /// Shape of the payload.
    pub output_kind: OutputKind,
    /// Raw payload bytes (UTF-8 source/docs text, or an error message).
    pub payload: Vec<u8>,
    /// Suggested filename for this output, if any.
    pub filename: Option<String>,
    /// Confidence in this specific result, 0..1.
    pub confidence: f64,
    /// Agent tier that produced this result.
    pub tier: crate::tier_router::Tier,
    /// Wall-clock execution time.
    pub execution_time_ms: u64,
    /// Id of the cost ledger entry for the LLM call(s) behind this result.
    pub cost_record_id: Option<uuid::Uuid>,
    /// Number of attempts made (1 on first success).
    pub retry_count: u32,
}

impl TaskResult {
    /// Construct a terminal `failed` result, used when retries are
    /// exhausted (spec §4.1).
    pub fn failed(task_id: TaskId, error: &str, retry_count: u32, tier: crate::tier_router::Tier) -> Self {
        Self {
            task_id,
            status: TaskStatus::Failed,
            output_kind: OutputKind::Error,
            payload: error.as_bytes().to_vec(),
            filename: None,
            confidence: 0.0,
            tier,
            execution_time_ms: 0,
            cost_record_id: None,
            retry_count,
        }
    }

    /// Construct a terminal `cancelled` result for a task skipped because a
    /// dependency failed or the workflow was cancelled.
    pub fn cancelled(task_id: TaskId, tier: crate::tier_router::Tier) -> Self {
        Self {
            task_id,
            status: TaskStatus::Cancelled,
            output_kind: OutputKind::Error,
            payload: Vec::new(),
            filename: None,
            confidence: 0.0,
            tier,
            execution_time_ms: 0,
            cost_record_id: None,
            retry_count: 0,
        }
    }

    /// Payload decoded as UTF-8, empty string on invalid data.
    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tier_router::Tier;

    #[test]
    fn complexity_infers_trivial_for_short_description() {
        let c = Complexity::infer("Write a factorial function", &HashMap::new());
        assert_eq!(c, Complexity::Trivial);
    }

    #[test]
    fn complexity_infers_complex_for_long_multi_verb_description() {
        let desc = "Design and implement an eventually-consistent counter service \
             with conflict resolution, build a replication layer, integrate \
             monitoring, and optimize for write-heavy workloads across regions";
        let c = Complexity::infer(desc, &HashMap::new());
        assert_eq!(c, Complexity::Complex);
    }

    #[test]
    fn shared_context_defaults_main_file_from_language() {
        let mut constraints = HashMap::new();
        constraints.insert("language".to_string(), "python".to_string());
        let req = Request {
            id: RequestId::new(),
            tenant_id: TenantId::new(),
            user_id: UserId::new(),
            description: "Write a factorial function".into(),
            requirements: vec![],
            constraints,
            metadata: HashMap::new(),
        };
        let ctx = SharedContext::from_request(&req);
        assert_eq!(ctx.main_file_name, "main.py");
        assert_eq!(ctx.language, "python");
    }

    #[test]
    fn task_status_terminal_classification() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
    }

    #[test]
    fn looks_like_test_task_matches_type_or_markers() {
        let t = Task {
            id: TaskId::new(),
            task_type: TaskType::Implementation,
            description: "Write unit tests for the factorial function".into(),
            complexity: Complexity::Trivial,
            dependencies: HashSet::new(),
            language_hint: None,
        };
        assert!(t.looks_like_test_task());
    }

    #[test]
    fn failed_result_is_terminal_and_zero_confidence() {
        let r = TaskResult::failed(TaskId::new(), "boom", 3, Tier::T0);
        assert_eq!(r.status, TaskStatus::Failed);
        assert_eq!(r.confidence, 0.0);
        assert_eq!(r.retry_count, 3);
    }
}

//! Task Scheduler (C10, spec §4.1).
//!
//! Decomposes a request into a dependency graph of tasks, batches the graph
//! via Kahn-style topological layering, and assembles the per-task context
//! frame each worker receives.

use std::collections::{HashMap, HashSet};

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::constants::DEFAULT_MAX_RETRIES;
use crate::error::{Error, Result};
use crate::ids::TaskId;
use crate::task::{Complexity, Request, SharedContext, Task, TaskResult, TaskStatus, TaskType};

/// A task graph frozen after decomposition (spec §4.1: "frozen once the
/// graph is sealed").
#[derive(Debug, Clone)]
pub struct TaskGraph {
    tasks: HashMap<TaskId, Task>,
}

impl TaskGraph {
    /// Rebuild a graph from a previously decomposed task list, e.g. when
    /// resuming a workflow from a checkpoint (spec §4.2). Re-validates
    /// acyclicity rather than trusting the serialized snapshot.
    pub fn from_tasks(tasks: Vec<Task>) -> Result<Self> {
        let graph = TaskGraph {
            tasks: tasks.into_iter().map(|t| (t.id, t)).collect(),
        };
        Self::assert_acyclic(&graph)?;
        Ok(graph)
    }

    /// Tasks in insertion order, for display/logging.
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    pub fn get(&self, task_id: TaskId) -> Option<&Task> {
        self.tasks.get(&task_id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// Context handed to a single task's worker (spec §4.1): the shared-context
/// record, dependency outputs, and any pattern-cache hit for this task's
/// fingerprint. Capped in size by `cap_dependency_outputs`.
#[derive(Debug, Clone)]
pub struct TaskContextFrame<'a> {
    pub shared_context: &'a SharedContext,
    pub dependency_outputs: Vec<(TaskId, &'a TaskResult)>,
    pub cache_hit: Option<TaskResult>,
}

const MAX_DEPENDENCY_OUTPUTS: usize = 8;

/// Decomposition, batching, and context assembly (spec §4.1).
pub struct Scheduler;

impl Scheduler {
    /// Synthesize a task graph from a request. At least three canonical
    /// tasks are produced: implementation, test generation (depends on
    /// implementation), documentation (depends on implementation). The
    /// scheduler refuses an empty description with `Error::Validation`
    /// (spec §8's boundary behavior).
    pub fn decompose(request: &Request) -> Result<TaskGraph> {
        if request.description.trim().is_empty() {
            return Err(Error::Validation("request description must not be empty".into()));
        }

        let complexity = Complexity::infer(&request.description, &request.constraints);
        let language = request.language().map(str::to_string);

        let implementation = Task {
            id: TaskId::new(),
            task_type: TaskType::Implementation,
            description: request.description.clone(),
            complexity,
            dependencies: HashSet::new(),
            language_hint: language.clone(),
        };

        let mut test_dependencies = HashSet::new();
        test_dependencies.insert(implementation.id);
        let test_generation = Task {
            id: TaskId::new(),
            task_type: TaskType::TestGeneration,
            description: format!("Write tests for: {}", request.description),
            complexity,
            dependencies: test_dependencies,
            language_hint: language.clone(),
        };

        let mut docs_dependencies = HashSet::new();
        docs_dependencies.insert(implementation.id);
        let documentation = Task {
            id: TaskId::new(),
            task_type: TaskType::Documentation,
            description: format!("Document: {}", request.description),
            complexity: Complexity::Trivial,
            dependencies: docs_dependencies,
            language_hint: language,
        };

        let mut tasks = HashMap::new();
        tasks.insert(implementation.id, implementation);
        tasks.insert(test_generation.id, test_generation);
        tasks.insert(documentation.id, documentation);

        let graph = TaskGraph { tasks };
        Self::assert_acyclic(&graph)?;
        Ok(graph)
    }

    fn assert_acyclic(graph: &TaskGraph) -> Result<()> {
        let mut petgraph = DiGraph::<TaskId, ()>::new();
        let mut indices: HashMap<TaskId, NodeIndex> = HashMap::new();
        for task in graph.tasks.values() {
            indices.insert(task.id, petgraph.add_node(task.id));
        }
        for task in graph.tasks.values() {
            for dep in &task.dependencies {
                if !indices.contains_key(dep) {
                    return Err(Error::Integrity(format!(
                        "task {} depends on unknown task {dep}",
                        task.id
                    )));
                }
                petgraph.add_edge(indices[dep], indices[&task.id], ());
            }
        }
        toposort(&petgraph, None).map_err(|cycle| {
            Error::Integrity(format!("dependency cycle detected at task {:?}", petgraph[cycle.node_id()]))
        })?;
        Ok(())
    }

    /// Layer `graph` into batches via Kahn-style topological sort: every
    /// task whose dependencies are all in earlier batches joins the next
    /// batch (spec §4.1).
    pub fn plan_batches(graph: &TaskGraph) -> Result<Vec<Vec<TaskId>>> {
        let mut remaining: HashSet<TaskId> = graph.tasks.keys().copied().collect();
        let mut completed: HashSet<TaskId> = HashSet::new();
        let mut batches = Vec::new();

        while !remaining.is_empty() {
            let ready: Vec<TaskId> = remaining
                .iter()
                .copied()
                .filter(|id| {
                    graph.tasks[id].dependencies.iter().all(|dep| completed.contains(dep))
                })
                .collect();

            if ready.is_empty() {
                return Err(Error::Integrity("dependency cycle detected during batching".into()));
            }

            for id in &ready {
                remaining.remove(id);
                completed.insert(*id);
            }
            batches.push(ready);
        }

        Ok(batches)
    }

    /// Assemble the context frame for `task_id`, reading dependency outputs
    /// from `results` and capping the number carried (oldest/lowest-
    /// confidence dropped first, per spec §4.1).
    pub fn build_context_frame<'a>(
        graph: &TaskGraph,
        task_id: TaskId,
        shared_context: &'a SharedContext,
        results: &'a HashMap<TaskId, TaskResult>,
        cache_hit: Option<TaskResult>,
    ) -> TaskContextFrame<'a> {
        let task = &graph.tasks[&task_id];
        let mut dependency_outputs: Vec<(TaskId, &TaskResult)> = task
            .dependencies
            .iter()
            .filter_map(|dep| results.get(dep).map(|r| (*dep, r)))
            .collect();

        dependency_outputs.sort_by(|(_, a), (_, b)| b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal));
        dependency_outputs.truncate(MAX_DEPENDENCY_OUTPUTS);

        TaskContextFrame {
            shared_context,
            dependency_outputs,
            cache_hit,
        }
    }

    /// Mark every task in `batch` whose dependencies include a failed task as
    /// `cancelled`, without attempting to run them (spec §4.1: "a failed
    /// task's downstream dependents are skipped").
    pub fn cancel_dependents_of_failures(
        graph: &TaskGraph,
        batch: &[TaskId],
        results: &HashMap<TaskId, TaskResult>,
    ) -> Vec<TaskId> {
        batch
            .iter()
            .copied()
            .filter(|id| {
                graph.tasks[id].dependencies.iter().any(|dep| {
                    results
                        .get(dep)
                        .map(|r| r.status == TaskStatus::Failed || r.status == TaskStatus::Cancelled)
                        .unwrap_or(false)
                })
            })
            .collect()
    }

    /// Maximum retries before a task's terminal result is `failed`
    /// (spec §4.1's default).
    pub fn max_retries() -> u32 {
        DEFAULT_MAX_RETRIES
    }
}

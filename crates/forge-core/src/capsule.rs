//! Capsule Assembler (C12, spec §4.10).
//!
//! Collates task outputs into the immutable terminal artifact. On total
//! failure it produces an error capsule instead of failing the workflow
//! (spec §7).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::confidence::ConfidenceAnalysis;
use crate::ids::{CapsuleId, RequestId};
use crate::task::{OutputKind, SharedContext, Task, TaskResult, TaskStatus};
use crate::validation::ValidationReport;

/// Deployment-relevant metadata about the packaged artifact (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub name: String,
    pub version: String,
    pub language: String,
    pub artifact_type: String,
    pub description: String,
    pub entry_point: String,
    pub commands: BTreeMap<String, String>,
    pub dependencies: Vec<String>,
    pub env_vars: BTreeMap<String, String>,
    pub ports: Vec<u16>,
    pub resources: BTreeMap<String, String>,
    pub health_check: Option<String>,
}

/// Generation metrics and quality scores carried alongside a capsule for
/// observability (spec §3's "metadata (generation metrics, quality scores)").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CapsuleMetadata {
    pub tasks_total: usize,
    pub tasks_succeeded: usize,
    pub tasks_failed: usize,
    pub total_execution_time_ms: u64,
    pub cache_hit: bool,
    pub confidence: Option<ConfidenceAnalysis>,
}

/// The immutable terminal artifact (spec §3). A new revision for the same
/// request gets a new `id`; nothing about an existing capsule is ever
/// mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capsule {
    pub id: CapsuleId,
    pub request_id: RequestId,
    pub manifest: Manifest,
    pub source_files: BTreeMap<String, String>,
    pub test_files: BTreeMap<String, String>,
    pub documentation: String,
    pub validation: Option<ValidationReport>,
    pub metadata: CapsuleMetadata,
    /// Set only on an error capsule (spec §7): the workflow's accumulated
    /// per-task error messages.
    pub errors: Vec<String>,
}

impl Capsule {
    /// Whether this is an error capsule (produced on total task failure or
    /// workflow failure, spec §7).
    pub fn is_error_capsule(&self) -> bool {
        !self.errors.is_empty()
    }

    /// One-line human summary, used by the result surface and by the manifest
    /// printed alongside packaged archives (supplemented feature,
    /// SPEC_FULL.md §2).
    pub fn summary(&self) -> String {
        if self.is_error_capsule() {
            format!(
                "{} ({}): failed — {} error(s) recorded",
                self.manifest.name,
                self.manifest.language,
                self.errors.len()
            )
        } else {
            format!(
                "{} ({}): {} source file(s), {} test file(s), confidence {:.2}",
                self.manifest.name,
                self.manifest.language,
                self.source_files.len(),
                self.test_files.len(),
                self.metadata.confidence.as_ref().map_or(0.0, |c| c.overall_score),
            )
        }
    }
}

fn strip_markdown_fence(payload: &str) -> String {
    let trimmed = payload.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return payload.to_string();
    };
    // Skip an optional language tag on the opening fence line.
    let rest = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    rest.strip_suffix("```").unwrap_or(rest).trim_end().to_string()
}

fn normalize_line_endings(text: &str) -> String {
    text.replace("\r\n", "\n")
}

fn clean_payload(raw: &str) -> String {
    normalize_line_endings(&strip_markdown_fence(raw))
}

/// Assembles a [`Capsule`] from a request's shared context, its task graph,
/// and the per-task results the scheduler collected (spec §4.10).
pub struct CapsuleAssembler;

impl CapsuleAssembler {
    /// Build the capsule. Never fails: a zero-success set of tasks still
    /// yields a valid (error) capsule rather than propagating an error
    /// (spec §4.10, §7).
    pub fn assemble(
        request_id: RequestId,
        shared_context: &SharedContext,
        tasks: &[Task],
        results: &std::collections::HashMap<crate::ids::TaskId, TaskResult>,
    ) -> Capsule {
        let mut source_files = BTreeMap::new();
        let mut test_files = BTreeMap::new();
        let mut docs = Vec::new();
        let mut errors = Vec::new();
        let mut extra_file_index = 1u32;
        let mut tasks_succeeded = 0usize;
        let mut tasks_failed = 0usize;
        let mut total_execution_time_ms = 0u64;

        for task in tasks {
            let Some(result) = results.get(&task.id) else {
                continue;
            };
            total_execution_time_ms += result.execution_time_ms;

            match result.status {
                TaskStatus::Completed => tasks_succeeded += 1,
                TaskStatus::Failed => {
                    tasks_failed += 1;
                    errors.push(format!("task {} ({:?}): {}", task.id, task.task_type, result.payload_text()));
                    continue;
                }
                TaskStatus::Cancelled => {
                    errors.push(format!("task {} ({:?}): cancelled", task.id, task.task_type));
                    continue;
                }
                TaskStatus::Pending | TaskStatus::Running => continue,
            }

            match result.output_kind {
                OutputKind::Code if task.looks_like_test_task() => {
                    let name = result
                        .filename
                        .clone()
                        .unwrap_or_else(|| format!("test_{}", shared_context.main_file_name));
                    test_files.insert(name, clean_payload(&result.payload_text()));
                }
                OutputKind::Tests => {
                    let name = result.filename.clone().unwrap_or_else(|| "tests.txt".to_string());
                    test_files.insert(name, clean_payload(&result.payload_text()));
                }
                OutputKind::Code => {
                    let name = match &result.filename {
                        Some(name) => name.clone(),
                        None if source_files.is_empty() => shared_context.main_file_name.clone(),
                        None => {
                            let name = format!("extra_{extra_file_index}.txt");
                            extra_file_index += 1;
                            name
                        }
                    };
                    source_files.insert(name, clean_payload(&result.payload_text()));
                }
                OutputKind::Docs => {
                    docs.push(result.payload_text());
                }
                OutputKind::Analysis | OutputKind::Error => {}
            }
        }

        let documentation = if docs.is_empty() {
            synthesize_readme(shared_context, request_id)
        } else {
            docs.join("\n\n")
        };

        let manifest = Manifest {
            name: format!("capsule-{request_id}"),
            version: "0.1.0".to_string(),
            language: shared_context.language.clone(),
            artifact_type: shared_context.architecture_pattern.clone(),
            description: format!("Generated from request {request_id}"),
            entry_point: shared_context.main_file_name.clone(),
            commands: BTreeMap::new(),
            dependencies: shared_context.common_imports.clone(),
            env_vars: BTreeMap::new(),
            ports: Vec::new(),
            resources: BTreeMap::new(),
            health_check: None,
        };

        let metadata = CapsuleMetadata {
            tasks_total: tasks.len(),
            tasks_succeeded,
            tasks_failed,
            total_execution_time_ms,
            cache_hit: false,
            confidence: None,
        };

        if source_files.is_empty() && tasks_succeeded == 0 {
            return Self::error_capsule(request_id, shared_context, errors, metadata);
        }

        Capsule {
            id: CapsuleId::new(),
            request_id,
            manifest,
            source_files,
            test_files,
            documentation,
            validation: None,
            metadata,
            errors: Vec::new(),
        }
    }

    /// Build the diagnostic artifact produced on total failure (spec §7):
    /// carries accumulated error messages and a generated README describing
    /// what was attempted, instead of source code.
    pub fn error_capsule(
        request_id: RequestId,
        shared_context: &SharedContext,
        errors: Vec<String>,
        mut metadata: CapsuleMetadata,
    ) -> Capsule {
        metadata.confidence = None;
        let manifest = Manifest {
            name: format!("capsule-{request_id}-error"),
            version: "0.1.0".to_string(),
            language: shared_context.language.clone(),
            artifact_type: "error".to_string(),
            description: "Generation failed; see errors and README for details".to_string(),
            entry_point: String::new(),
            commands: BTreeMap::new(),
            dependencies: Vec::new(),
            env_vars: BTreeMap::new(),
            ports: Vec::new(),
            resources: BTreeMap::new(),
            health_check: None,
        };

        let readme = format!(
            "# Generation failed\n\n\
             No task produced usable source output for this request.\n\n\
             ## Errors\n\n{}\n",
            errors.iter().map(|e| format!("- {e}")).collect::<Vec<_>>().join("\n")
        );

        Capsule {
            id: CapsuleId::new(),
            request_id,
            manifest,
            source_files: BTreeMap::new(),
            test_files: BTreeMap::new(),
            documentation: readme,
            validation: None,
            metadata,
            errors,
        }
    }
}

fn synthesize_readme(shared_context: &SharedContext, request_id: RequestId) -> String {
    format!(
        "# Generated project\n\n\
         Request: {request_id}\n\
         Language: {}\n\
         Architecture: {}\n\
         Entry point: {}\n",
        shared_context.language, shared_context.architecture_pattern, shared_context.main_file_name
    )
}

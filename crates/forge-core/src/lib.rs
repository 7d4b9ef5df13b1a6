//! `forge-core`: the execution orchestrator for an LLM-driven code
//! generation pipeline (spec §1's C1-C11 and the durable workflow runtime
//! that ties them together).
//!
//! The crate is organized around a small number of external collaborators
//! ([`llm_backend::LlmBackend`], [`sandbox::SandboxBackend`],
//! [`store::DurableStore`], [`vector_index::VectorIndex`]) that real
//! backends (`forge-postgres-store`, `forge-qdrant`, and whatever LLM/
//! sandbox integrations a deployment wires in) implement, and a set of
//! pure orchestration components (scheduler, tier router, pattern cache,
//! validation mesh, confidence engine, cost accountant, progress bus,
//! capsule assembler) that [`workflow::WorkflowRuntime`] composes into one
//! resumable state machine.

pub mod capsule;
pub mod confidence;
pub mod config;
pub mod constants;
pub mod cost;
pub mod error;
pub mod ids;
pub mod llm_backend;
pub mod pattern_cache;
pub mod progress_bus;
pub mod sandbox;
pub mod scheduler;
pub mod store;
pub mod task;
pub mod tier_router;
pub mod validation;
pub mod vector_index;
pub mod workflow;

pub use capsule::{Capsule, CapsuleAssembler, CapsuleMetadata, Manifest};
pub use confidence::{ConfidenceAnalysis, ConfidenceEngine, ConfidenceLevel, ScoringInput};
pub use config::OrchestratorConfig;
pub use cost::{CostAccountant, CostRecord, InMemoryCostAccountant};
pub use error::{Error, Result};
pub use ids::{CapsuleId, RequestId, TaskId, TenantId, UserId, WorkflowId};
pub use llm_backend::{LlmBackend, LlmRequest, LlmResponse};
pub use pattern_cache::{Fingerprint, PatternCache};
pub use progress_bus::{EventKind, ProgressBus, ProgressEvent};
pub use sandbox::{ExecutionLimits, ExecutionResult, SandboxBackend, SandboxPool};
pub use scheduler::{Scheduler, TaskContextFrame, TaskGraph};
pub use store::{DurableStore, InMemoryStore};
pub use task::{Complexity, Request, SharedContext, Task, TaskResult, TaskStatus, TaskType};
pub use tier_router::{Tier, TierRouter};
pub use validation::{ValidationMesh, ValidationReport, Validator};
pub use vector_index::{Collection, InMemoryVectorIndex, Point, VectorIndex};
pub use workflow::{WorkflowOutcome, WorkflowRuntime, WorkflowState};

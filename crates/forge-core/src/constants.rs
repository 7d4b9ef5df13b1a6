//! Defaults fixed by the specification. Centralized here so that every
//! module references the same number instead of re-deriving it (spec.md §9's
//! "heartbeat intervals and retry maxes are scattered" problem, inverted).

use std::time::Duration;

/// Default batch concurrency cap (spec §4.1).
pub const DEFAULT_BATCH_CONCURRENCY: usize = 8;

/// Default maximum retries per task before a terminal `failed` result
/// (spec §4.1).
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Heartbeat interval `H` (spec §4.2).
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Retry policy: initial backoff (spec §4.2).
pub const RETRY_INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Retry policy: backoff multiplier (spec §4.2).
pub const RETRY_BACKOFF_FACTOR: u32 = 2;

/// Retry policy: backoff cap (spec §4.2).
pub const RETRY_BACKOFF_CAP: Duration = Duration::from_secs(60);

/// Retry policy: maximum attempts per activity (spec §4.2).
pub const RETRY_MAX_ATTEMPTS: u32 = 3;

/// `start_to_close` budget for an LLM call activity (spec §4.2).
pub const TIMEOUT_LLM_CALL: Duration = Duration::from_secs(10 * 60);

/// `start_to_close` budget for a sandbox execution activity (spec §4.2).
pub const TIMEOUT_SANDBOX: Duration = Duration::from_secs(5 * 60);

/// `start_to_close` budget for a validation activity (spec §4.2).
pub const TIMEOUT_VALIDATION: Duration = Duration::from_secs(2 * 60);

/// `start_to_close` budget for a persistence activity (spec §4.2).
pub const TIMEOUT_PERSISTENCE: Duration = Duration::from_secs(60);

/// Multiplier applied to the sum of stage budgets to get the workflow-wide
/// `active_deadline` (spec §4.2).
pub const ACTIVE_DEADLINE_MULTIPLIER: f64 = 1.5;

/// Grace window in-flight activities have to release resources after a
/// cancel signal (spec §5).
pub const CANCELLATION_GRACE: Duration = Duration::from_secs(30);

/// Runtime cap for sandbox validation checks (spec §4.5).
pub const VALIDATION_RUNTIME_CAP: Duration = Duration::from_secs(30);

/// Pattern cache entry TTL (spec §4.3).
pub const PATTERN_CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Minimum cached-result confidence for the pattern cache to store or serve
/// an entry (spec §3 invariants, §4.3).
pub const PATTERN_CACHE_MIN_CONFIDENCE: f64 = 0.8;

/// HITL review threshold: overall confidence below this enters human review
/// (spec §4.2, §4.7).
pub const HITL_REVIEW_THRESHOLD: f64 = 0.7;

/// Default timeout waiting for an `approve`/`reject` signal in `HITL_REVIEW`
/// before the workflow converts to `FAILED` (spec §4.2).
pub const HITL_REVIEW_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// Per-task validation confidence floor (spec §4.4's "confidence < 0.7"
/// escalation trigger). Distinct from [`HITL_REVIEW_THRESHOLD`] even though
/// both default to the same value: one gates a single task's retry, the
/// other gates whole-workflow human review.
pub const TASK_VALIDATION_CONFIDENCE_THRESHOLD: f64 = 0.7;

/// Progress bus ring buffer size per workflow (spec §4.9).
pub const PROGRESS_BUS_RING_BUFFER: usize = 100;

/// Progress bus history retention (spec §4.9).
pub const PROGRESS_BUS_HISTORY_RETENTION: Duration = Duration::from_secs(60 * 60);

/// Default vector dimensionality `D` (spec §6).
pub const DEFAULT_VECTOR_DIMENSIONALITY: usize = 1536;

//! Sandbox Pool (C4, spec §4.6).
//!
//! `SandboxBackend` is the external collaborator (spec §6: "consumes a
//! container-execution service"); `SandboxPool` is the admission-control
//! layer in front of it — a semaphore-bounded concurrency cap, with
//! per-tenant queue-depth tracking for observability.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Semaphore};

use crate::error::{Error, Result};
use crate::ids::TenantId;

/// Resource limits applied to a single sandbox execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLimits {
    /// Memory cap in megabytes.
    pub memory_mb: u64,
    /// CPU core allotment (fractional cores allowed).
    pub cpu_cores: f64,
    /// Wall-clock timeout.
    pub timeout: Duration,
    /// Whether the container may reach the network. Default `false`
    /// (spec §4.6: "network-off (default)").
    pub network_enabled: bool,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            memory_mb: 512,
            cpu_cores: 1.0,
            timeout: crate::constants::VALIDATION_RUNTIME_CAP,
            network_enabled: false,
        }
    }
}

/// Terminal status of a sandbox execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Exit code zero.
    Success,
    /// Non-zero exit code.
    Failure,
    /// The runner had to kill the container after its timeout elapsed.
    Timeout,
}

/// Outcome of a single sandbox execution (spec §4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Success, failure, or timeout.
    pub status: ExecutionStatus,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// Process exit code, if the process ran to completion.
    pub exit_code: Option<i32>,
    /// Wall-clock time elapsed.
    pub elapsed_ms: u64,
    /// Peak resident memory observed, in bytes.
    pub peak_memory_bytes: u64,
}

/// The container-execution service this crate consumes (spec §6). Real
/// implementations live outside this crate; `forge-testing` provides a
/// scriptable mock for tests.
#[async_trait]
pub trait SandboxBackend: Send + Sync {
    /// Run `code` under `language` with `inputs` piped to stdin, subject to
    /// `limits`. Unsupported languages return `Error::Validation`, never an
    /// empty success (spec §4.6).
    async fn execute(
        &self,
        code: &str,
        language: &str,
        inputs: &str,
        limits: &ExecutionLimits,
    ) -> Result<ExecutionResult>;

    /// The set of languages this backend supports.
    fn languages(&self) -> HashSet<String>;
}

/// Best-effort language detection used only when a caller explicitly opts
/// into it (spec §9: detection is a fallback, never the default path).
pub fn detect_language_fallback(code: &str) -> Option<&'static str> {
    let probes: &[(&str, &[&str])] = &[
        ("python", &["def ", "import ", "print("]),
        ("javascript", &["function ", "const ", "console.log"]),
        ("rust", &["fn main", "let mut ", "println!"]),
        ("go", &["func main", "package main"]),
        ("java", &["public class", "public static void main"]),
    ];
    probes
        .iter()
        .find(|(_, markers)| markers.iter().any(|m| code.contains(m)))
        .map(|(lang, _)| *lang)
}

/// Admission-controlled front door to a [`SandboxBackend`].
///
/// Enforces the pool's maximum concurrent-execution count via a single
/// semaphore shared by all tenants. `tokio::sync::Semaphore` grants queued
/// permits in the order they were requested, so within any one tenant's own
/// requests that ordering is FIFO; tenants interleave freely against the
/// shared semaphore rather than getting separate per-tenant lanes. The
/// per-tenant counters below track queue depth for observability — they are
/// not a separate admission mechanism.
pub struct SandboxPool {
    backend: Arc<dyn SandboxBackend>,
    semaphore: Arc<Semaphore>,
    queue_depth: Mutex<std::collections::HashMap<TenantId, usize>>,
}

impl SandboxPool {
    /// Create a pool in front of `backend` with `max_concurrency` permits.
    pub fn new(backend: Arc<dyn SandboxBackend>, max_concurrency: usize) -> Self {
        Self {
            backend,
            semaphore: Arc::new(Semaphore::new(max_concurrency.max(1))),
            queue_depth: Mutex::new(std::collections::HashMap::new()),
        }
    }

    /// The languages the underlying backend supports.
    pub fn languages(&self) -> HashSet<String> {
        self.backend.languages()
    }

    /// Number of `tenant_id`'s requests currently waiting for a permit.
    pub async fn queue_depth(&self, tenant_id: TenantId) -> usize {
        self.queue_depth
            .lock()
            .await
            .get(&tenant_id)
            .copied()
            .unwrap_or(0)
    }

    /// Execute `code` for `tenant_id`, queueing if the pool is saturated.
    /// Returns `Error::ResourceExhausted` only if the caller-supplied
    /// `queue_timeout` elapses before a permit is acquired.
    pub async fn execute(
        &self,
        tenant_id: TenantId,
        code: &str,
        language: &str,
        inputs: &str,
        limits: &ExecutionLimits,
        queue_timeout: Duration,
    ) -> Result<ExecutionResult> {
        if !self.backend.languages().contains(language) {
            return Err(Error::Validation(format!(
                "unsupported language: {language}"
            )));
        }

        self.enqueue(tenant_id).await;
        let started = Instant::now();
        let permit = tokio::time::timeout(queue_timeout, self.semaphore.clone().acquire_owned())
            .await
            .map_err(|_| {
                Error::ResourceExhausted(format!(
                    "sandbox queue wait exceeded {:?} for tenant {tenant_id}",
                    queue_timeout
                ))
            })?
            .map_err(|_| Error::ResourceExhausted("sandbox pool closed".into()))?;
        self.dequeue(tenant_id).await;

        let result = tokio::time::timeout(
            limits.timeout,
            self.backend.execute(code, language, inputs, limits),
        )
        .await;

        drop(permit);

        match result {
            Ok(inner) => inner,
            Err(_) => Ok(ExecutionResult {
                status: ExecutionStatus::Timeout,
                stdout: String::new(),
                stderr: format!("execution exceeded {:?}", limits.timeout),
                exit_code: None,
                elapsed_ms: started.elapsed().as_millis() as u64,
                peak_memory_bytes: 0,
            }),
        }
    }

    async fn enqueue(&self, tenant_id: TenantId) {
        *self.queue_depth.lock().await.entry(tenant_id).or_insert(0) += 1;
    }

    async fn dequeue(&self, tenant_id: TenantId) {
        let mut queues = self.queue_depth.lock().await;
        if let Some(depth) = queues.get_mut(&tenant_id) {
            *depth = depth.saturating_sub(1);
        }
    }
}

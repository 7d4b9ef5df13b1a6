//! Activity execution wrapper: heartbeat, retry, and timeout policy
//! (spec §4.2).
//!
//! Every external call the runtime makes — LLM call, sandbox execution,
//! validation, persistence — goes through [`run_activity`] so the
//! heartbeat/retry/timeout contract is enforced in exactly one place.

use std::future::Future;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use crate::constants::{
    DEFAULT_HEARTBEAT_INTERVAL, RETRY_BACKOFF_CAP, RETRY_BACKOFF_FACTOR, RETRY_INITIAL_BACKOFF,
    RETRY_MAX_ATTEMPTS, TIMEOUT_LLM_CALL, TIMEOUT_PERSISTENCE, TIMEOUT_SANDBOX, TIMEOUT_VALIDATION,
};
use crate::error::{Error, Result};

/// The class of external call an activity performs; selects its
/// `start_to_close` budget (spec §4.2's timeout table).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityKind {
    LlmCall,
    Sandbox,
    Validation,
    Persistence,
}

impl ActivityKind {
    /// The configured `start_to_close` budget for this activity kind.
    pub fn timeout(&self) -> Duration {
        match self {
            ActivityKind::LlmCall => TIMEOUT_LLM_CALL,
            ActivityKind::Sandbox => TIMEOUT_SANDBOX,
            ActivityKind::Validation => TIMEOUT_VALIDATION,
            ActivityKind::Persistence => TIMEOUT_PERSISTENCE,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            ActivityKind::LlmCall => "llm_call",
            ActivityKind::Sandbox => "sandbox",
            ActivityKind::Validation => "validation",
            ActivityKind::Persistence => "persistence",
        }
    }
}

/// Exponential backoff schedule applied between retry attempts (spec §4.2):
/// initial 1s, factor 2, capped at 60s, at most 3 attempts.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub initial_backoff: Duration,
    pub factor: u32,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: RETRY_INITIAL_BACKOFF,
            factor: RETRY_BACKOFF_FACTOR,
            cap: RETRY_BACKOFF_CAP,
            max_attempts: RETRY_MAX_ATTEMPTS,
        }
    }
}

impl RetryPolicy {
    /// Backoff to wait before attempt number `attempt` (1-indexed; no wait
    /// before the first attempt).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let exp = attempt.saturating_sub(2).min(16);
        let scaled = self.initial_backoff.saturating_mul(self.factor.saturating_pow(exp));
        scaled.min(self.cap)
    }
}

/// A heartbeat sender handed to the activity closure. Long-running LLM calls
/// call [`Heartbeat::beat`] between streamed chunks so the runtime doesn't
/// declare them lost (spec §4.2).
#[derive(Clone)]
pub struct Heartbeat {
    tx: mpsc::UnboundedSender<()>,
}

impl Heartbeat {
    pub fn beat(&self) {
        let _ = self.tx.send(());
    }
}

/// Run `f` under the heartbeat/retry/timeout contract for `kind`.
///
/// `f` is invoked once per attempt and receives a [`Heartbeat`] handle.
/// An attempt is declared lost (and retried, subject to `policy`) if its
/// `start_to_close` budget elapses or no heartbeat arrives within
/// `heartbeat_interval`, whichever fires first. An attempt whose error is
/// not retryable ([`Error::is_retryable`]) short-circuits the remaining
/// attempts.
pub async fn run_activity<F, Fut, T>(
    kind: ActivityKind,
    policy: RetryPolicy,
    heartbeat_interval: Duration,
    mut f: F,
) -> Result<T>
where
    F: FnMut(Heartbeat) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_err = None;

    for attempt in 1..=policy.max_attempts {
        if attempt > 1 {
            tokio::time::sleep(policy.backoff_for(attempt)).await;
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<()>();
        let heartbeat = Heartbeat { tx };
        let started = Instant::now();
        let budget = kind.timeout();

        let call = f(heartbeat);
        tokio::pin!(call);

        let outcome = loop {
            tokio::select! {
                result = &mut call => break Some(result),
                _ = tokio::time::sleep(heartbeat_interval) => {
                    // No heartbeat since the last tick: the activity is
                    // declared lost, the same as exceeding its budget.
                    if rx.try_recv().is_err() {
                        break None;
                    }
                    // Drain any additional queued heartbeats.
                    while rx.try_recv().is_ok() {}
                    if started.elapsed() >= budget {
                        break None;
                    }
                }
            }
        };

        match outcome {
            Some(Ok(value)) => return Ok(value),
            Some(Err(err)) => {
                let retryable = err.is_retryable();
                last_err = Some(err);
                if !retryable {
                    break;
                }
            }
            None => {
                last_err = Some(Error::Timeout {
                    activity: kind.label().to_string(),
                    elapsed_ms: started.elapsed().as_millis() as u64,
                    budget_ms: budget.as_millis() as u64,
                });
            }
        }
    }

    Err(last_err.unwrap_or_else(|| Error::dependency(kind.label(), "exhausted retries with no recorded error")))
}

/// Sum of every activity kind's `start_to_close` budget, times the
/// multiplier from spec §4.2, used as the workflow-wide `active_deadline`.
pub fn active_deadline() -> Duration {
    let sum = TIMEOUT_LLM_CALL + TIMEOUT_SANDBOX + TIMEOUT_VALIDATION + TIMEOUT_PERSISTENCE;
    sum.mul_f64(crate::constants::ACTIVE_DEADLINE_MULTIPLIER)
}

/// The default heartbeat cadence every activity is held to (spec §4.2).
pub fn default_heartbeat_interval() -> Duration {
    DEFAULT_HEARTBEAT_INTERVAL
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn succeeds_on_first_attempt_without_retry() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let result = run_activity(
            ActivityKind::Validation,
            RetryPolicy::default(),
            Duration::from_millis(10),
            move |_hb| {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, Error>(42)
                }
            },
        )
        .await
        .unwrap();

        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_dependency_errors_up_to_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let policy = RetryPolicy {
            initial_backoff: Duration::from_millis(1),
            cap: Duration::from_millis(2),
            ..RetryPolicy::default()
        };
        let err = run_activity(ActivityKind::LlmCall, policy, Duration::from_secs(60), move |_hb| {
            let calls = calls_clone.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(Error::dependency("llm", "connection reset"))
            }
        })
        .await
        .unwrap_err();

        assert!(matches!(err, Error::Dependency { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), RETRY_MAX_ATTEMPTS);
    }

    #[tokio::test]
    async fn validation_errors_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let err = run_activity(
            ActivityKind::Validation,
            RetryPolicy::default(),
            Duration::from_secs(60),
            move |_hb| {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(Error::Validation("bad code".into()))
                }
            },
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn backoff_schedule_matches_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_for(1), Duration::ZERO);
        assert_eq!(policy.backoff_for(2), Duration::from_secs(1));
        assert_eq!(policy.backoff_for(3), Duration::from_secs(2));
    }

    #[test]
    fn active_deadline_is_one_point_five_times_the_stage_sum() {
        let sum = TIMEOUT_LLM_CALL + TIMEOUT_SANDBOX + TIMEOUT_VALIDATION + TIMEOUT_PERSISTENCE;
        assert_eq!(active_deadline(), sum.mul_f64(1.5));
    }
}

//! Scriptable mocks for the orchestrator's two external compute
//! collaborators: [`forge_core::LlmBackend`] and [`forge_core::SandboxBackend`].

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use forge_core::error::{Error, Result};
use forge_core::llm_backend::{LlmBackend, LlmRequest, LlmResponse};
use forge_core::sandbox::{ExecutionLimits, ExecutionResult, ExecutionStatus, SandboxBackend};
use forge_core::tier_router::Tier;

/// Handler function type for a scripted LLM completion.
pub type MockLlmHandler = Arc<dyn Fn(&LlmRequest) -> Result<String> + Send + Sync>;

/// A configurable mock [`LlmBackend`] for orchestration tests.
///
/// Defaults to echoing a fixed response; call [`Self::with_handler`] to
/// derive the completion from the request, or [`Self::fail_next`] to make
/// the next call return a dependency error.
#[derive(Clone)]
pub struct MockLlmBackend {
    model_prefix: String,
    handler: Option<MockLlmHandler>,
    fixed_response: String,
    call_count: Arc<Mutex<usize>>,
    call_history: Arc<Mutex<Vec<LlmRequest>>>,
    should_fail: Arc<Mutex<bool>>,
    error_message: String,
}

impl std::fmt::Debug for MockLlmBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockLlmBackend")
            .field("model_prefix", &self.model_prefix)
            .field("call_count", &self.call_count())
            .finish()
    }
}

impl Default for MockLlmBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLlmBackend {
    pub fn new() -> Self {
        Self {
            model_prefix: "mock".to_string(),
            handler: None,
            fixed_response: "def handler():\n    return None\n".to_string(),
            call_count: Arc::new(Mutex::new(0)),
            call_history: Arc::new(Mutex::new(Vec::new())),
            should_fail: Arc::new(Mutex::new(false)),
            error_message: "mock llm backend error".to_string(),
        }
    }

    pub fn with_response(mut self, response: impl Into<String>) -> Self {
        self.fixed_response = response.into();
        self
    }

    pub fn with_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&LlmRequest) -> Result<String> + Send + Sync + 'static,
    {
        self.handler = Some(Arc::new(handler));
        self
    }

    pub fn with_model_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.model_prefix = prefix.into();
        self
    }

    /// Configure the next `complete` call to fail with `Error::dependency`.
    pub fn fail_next(&self) {
        *self.should_fail.lock().unwrap() = true;
    }

    pub fn with_error_message(mut self, message: impl Into<String>) -> Self {
        self.error_message = message.into();
        self
    }

    pub fn call_count(&self) -> usize {
        *self.call_count.lock().unwrap()
    }

    pub fn call_history(&self) -> Vec<LlmRequest> {
        self.call_history.lock().unwrap().clone()
    }

    pub fn reset(&self) {
        *self.call_count.lock().unwrap() = 0;
        self.call_history.lock().unwrap().clear();
        *self.should_fail.lock().unwrap() = false;
    }
}

#[async_trait]
impl LlmBackend for MockLlmBackend {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse> {
        *self.call_count.lock().unwrap() += 1;
        self.call_history.lock().unwrap().push(request.clone());

        {
            let mut should_fail = self.should_fail.lock().unwrap();
            if *should_fail {
                *should_fail = false;
                return Err(Error::dependency("llm", self.error_message.clone()));
            }
        }

        let content = match &self.handler {
            Some(handler) => handler(&request)?,
            None => self.fixed_response.clone(),
        };

        Ok(LlmResponse {
            model: self.model_for_tier(request.tier),
            provider: "mock".to_string(),
            prompt_tokens: request.system_prompt.len() as u64 / 4 + request.user_prompt.len() as u64 / 4,
            completion_tokens: content.len() as u64 / 4,
            content,
            latency_ms: 1,
        })
    }

    fn model_for_tier(&self, tier: Tier) -> String {
        format!("{}-{tier}", self.model_prefix)
    }
}

/// A configurable mock [`SandboxBackend`] for validation/runtime-check
/// tests. Defaults to a successful no-op execution for every language.
#[derive(Clone)]
pub struct MockSandboxBackend {
    languages: HashSet<String>,
    fixed_result: ExecutionResult,
    should_fail: Arc<Mutex<bool>>,
    call_count: Arc<Mutex<usize>>,
}

impl Default for MockSandboxBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSandboxBackend {
    pub fn new() -> Self {
        Self {
            languages: ["python", "javascript", "rust", "go", "java"]
                .into_iter()
                .map(String::from)
                .collect(),
            fixed_result: ExecutionResult {
                status: ExecutionStatus::Success,
                stdout: String::new(),
                stderr: String::new(),
                exit_code: Some(0),
                elapsed_ms: 1,
                peak_memory_bytes: 1024,
            },
            should_fail: Arc::new(Mutex::new(false)),
            call_count: Arc::new(Mutex::new(0)),
        }
    }

    pub fn with_languages(mut self, languages: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.languages = languages.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_result(mut self, result: ExecutionResult) -> Self {
        self.fixed_result = result;
        self
    }

    /// Configure the next `execute` call to return an `ExecutionStatus::Failure`.
    pub fn fail_next(&self) {
        *self.should_fail.lock().unwrap() = true;
    }

    pub fn call_count(&self) -> usize {
        *self.call_count.lock().unwrap()
    }
}

#[async_trait]
impl SandboxBackend for MockSandboxBackend {
    async fn execute(
        &self,
        code: &str,
        _language: &str,
        _inputs: &str,
        _limits: &ExecutionLimits,
    ) -> Result<ExecutionResult> {
        *self.call_count.lock().unwrap() += 1;

        let mut should_fail = self.should_fail.lock().unwrap();
        if *should_fail {
            *should_fail = false;
            return Ok(ExecutionResult {
                status: ExecutionStatus::Failure,
                stdout: String::new(),
                stderr: "mock sandbox failure".to_string(),
                exit_code: Some(1),
                elapsed_ms: 1,
                peak_memory_bytes: 0,
            });
        }
        drop(should_fail);

        let mut result = self.fixed_result.clone();
        if result.stdout.is_empty() {
            result.stdout = code.to_string();
        }
        Ok(result)
    }

    fn languages(&self) -> HashSet<String> {
        self.languages.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn default_mock_llm_echoes_fixed_response() {
        let backend = MockLlmBackend::new();
        let response = backend
            .complete(LlmRequest {
                tier: Tier::T0,
                system_prompt: "system".into(),
                user_prompt: "user".into(),
                max_tokens: 100,
            })
            .await
            .unwrap();
        assert!(response.content.contains("def handler"));
        assert_eq!(backend.call_count(), 1);
    }

    #[tokio::test]
    async fn mock_llm_fail_next_returns_dependency_error() {
        let backend = MockLlmBackend::new();
        backend.fail_next();
        let err = backend
            .complete(LlmRequest {
                tier: Tier::T0,
                system_prompt: String::new(),
                user_prompt: String::new(),
                max_tokens: 10,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Dependency { .. }));

        // should_fail resets after firing once.
        let ok = backend
            .complete(LlmRequest {
                tier: Tier::T0,
                system_prompt: String::new(),
                user_prompt: String::new(),
                max_tokens: 10,
            })
            .await;
        assert!(ok.is_ok());
    }

    #[tokio::test]
    async fn mock_sandbox_echoes_code_as_stdout_by_default() {
        let backend = MockSandboxBackend::new();
        let result = backend
            .execute("print(1)", "python", "", &ExecutionLimits::default())
            .await
            .unwrap();
        assert_eq!(result.status, ExecutionStatus::Success);
        assert_eq!(result.stdout, "print(1)");
    }

    #[tokio::test]
    async fn mock_sandbox_fail_next_returns_failure_status() {
        let backend = MockSandboxBackend::new();
        backend.fail_next();
        let result = backend
            .execute("code", "python", "", &ExecutionLimits::default())
            .await
            .unwrap();
        assert_eq!(result.status, ExecutionStatus::Failure);
    }
}

//! LLM backend contract (external collaborator, spec §6).
//!
//! This crate never hosts a model; it calls out to a chat/completion
//! endpoint keyed by model name. Implementations live outside this crate —
//! `forge-testing` provides a scriptable mock.

use async_trait::async_trait;

use crate::error::Result;
use crate::tier_router::Tier;

/// A single chat/completion call's inputs.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub tier: Tier,
    pub system_prompt: String,
    pub user_prompt: String,
    pub max_tokens: u32,
}

/// A completed chat/completion call (spec §6: "the accountant receives
/// `{model, provider, prompt_tokens, completion_tokens, latency_ms}`").
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub model: String,
    pub provider: String,
    pub content: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub latency_ms: u64,
}

/// The LLM backend this crate consumes (spec §6).
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Complete `request`, routed to whatever model the caller's tier maps
    /// to for this backend.
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse>;

    /// The model name this backend would use for `tier`, for pre-flight cost
    /// estimation.
    fn model_for_tier(&self, tier: Tier) -> String;
}

//! LLM pricing tables.
//!
//! This module owns the arithmetic and the static price list; the ledger,
//! per-tenant reporting, and the `CostAccountant` trait live in
//! `forge_core::cost`, which is the orchestrator-facing consumer of
//! [`PricingTable`]. Keeping pricing here means any other ambient concern
//! (metrics export, a standalone cost CLI, a future billing exporter) can
//! price a call without depending on the orchestrator crate.

use std::collections::HashMap;

/// Per-model price, expressed per 1,000,000 tokens (the precision modern
/// providers publish prices at).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPricing {
    /// Cost per 1,000,000 input (prompt) tokens, in USD.
    pub input_per_million: f64,
    /// Cost per 1,000,000 output (completion) tokens, in USD.
    pub output_per_million: f64,
}

impl ModelPricing {
    /// Construct from the modern per-1M-token format providers publish.
    #[must_use]
    pub fn per_million(input_per_million: f64, output_per_million: f64) -> Self {
        Self {
            input_per_million,
            output_per_million,
        }
    }

    /// Construct from the legacy per-1K-token format.
    #[must_use]
    pub fn per_thousand(input_per_1k: f64, output_per_1k: f64) -> Self {
        Self::per_million(input_per_1k * 1000.0, output_per_1k * 1000.0)
    }

    fn price(&self, prompt_tokens: u64, completion_tokens: u64) -> PricedResult {
        let input_cost = round6((prompt_tokens as f64 / 1_000_000.0) * self.input_per_million);
        let output_cost =
            round6((completion_tokens as f64 / 1_000_000.0) * self.output_per_million);
        PricedResult {
            input_cost,
            output_cost,
            total_cost: round6(input_cost + output_cost),
        }
    }
}

/// Result of pricing a single call, rounded to six decimal places.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PricedResult {
    /// Cost of the prompt tokens.
    pub input_cost: f64,
    /// Cost of the completion tokens.
    pub output_cost: f64,
    /// `input_cost + output_cost`.
    pub total_cost: f64,
}

fn round6(value: f64) -> f64 {
    (value * 1_000_000.0).round() / 1_000_000.0
}

/// A lookup table of per-model prices plus a fallback price for models the
/// table doesn't know about. Unknown models are never refused pricing —
/// they get a conservative default and a `used_fallback_pricing` flag the
/// caller can surface.
#[derive(Debug, Clone)]
pub struct PricingTable {
    models: HashMap<String, ModelPricing>,
    embeddings: HashMap<String, f64>,
    fallback: ModelPricing,
    embedding_fallback: f64,
}

impl PricingTable {
    /// Build an empty table backed by `fallback` pricing for anything not
    /// explicitly listed.
    #[must_use]
    pub fn new(fallback: ModelPricing, embedding_fallback: f64) -> Self {
        Self {
            models: HashMap::new(),
            embeddings: HashMap::new(),
            fallback,
            embedding_fallback,
        }
    }

    /// Add or override a chat-completion model's price.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>, pricing: ModelPricing) -> Self {
        self.models.insert(model.into(), pricing);
        self
    }

    /// Add or override an embedding model's per-1M-token price.
    #[must_use]
    pub fn with_embedding_model(mut self, model: impl Into<String>, per_million: f64) -> Self {
        self.embeddings.insert(model.into(), per_million);
        self
    }

    /// Price a chat-completion call. Returns the priced result and whether
    /// `model` fell back to the default price because it wasn't in the
    /// table.
    #[must_use]
    pub fn price(&self, model: &str, prompt_tokens: u64, completion_tokens: u64) -> (PricedResult, bool) {
        match self.models.get(model) {
            Some(pricing) => (pricing.price(prompt_tokens, completion_tokens), false),
            None => (self.fallback.price(prompt_tokens, completion_tokens), true),
        }
    }

    /// Price an embedding call (embedding cost lines alongside
    /// chat-completion cost lines). Returns the cost and whether the
    /// fallback price was used.
    #[must_use]
    pub fn price_embedding(&self, model: &str, tokens: u64) -> (f64, bool) {
        match self.embeddings.get(model) {
            Some(per_million) => (round6((tokens as f64 / 1_000_000.0) * per_million), false),
            None => (
                round6((tokens as f64 / 1_000_000.0) * self.embedding_fallback),
                true,
            ),
        }
    }

    /// Every chat-completion model this table has an explicit price for.
    /// Used by pre-flight estimation, which prices a task against each
    /// known model so the caller can compare.
    pub fn models(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }

    /// Every embedding model this table has an explicit price for.
    pub fn embedding_models(&self) -> impl Iterator<Item = &str> {
        self.embeddings.keys().map(String::as_str)
    }
}

impl Default for PricingTable {
    /// The table a fresh process starts with: a snapshot of published
    /// provider pricing, plus a conservative GPT-4-class fallback for
    /// anything newer than this snapshot.
    fn default() -> Self {
        Self::new(ModelPricing::per_million(30.0, 60.0), 0.10)
            .with_model("gpt-4-turbo", ModelPricing::per_million(10.0, 30.0))
            .with_model("gpt-4", ModelPricing::per_million(30.0, 60.0))
            .with_model("gpt-4-32k", ModelPricing::per_million(60.0, 120.0))
            .with_model("gpt-3.5-turbo", ModelPricing::per_million(0.50, 1.50))
            .with_model("gpt-3.5-turbo-16k", ModelPricing::per_million(3.0, 4.0))
            .with_model("gpt-35-turbo", ModelPricing::per_million(0.50, 1.50))
            .with_model("gpt-4o", ModelPricing::per_million(5.0, 15.0))
            .with_model("gpt-4o-mini", ModelPricing::per_million(0.15, 0.60))
            .with_model(
                "claude-3-opus-20240229",
                ModelPricing::per_million(15.0, 75.0),
            )
            .with_model(
                "claude-3-sonnet-20240229",
                ModelPricing::per_million(3.0, 15.0),
            )
            .with_model(
                "claude-3-haiku-20240307",
                ModelPricing::per_million(0.25, 1.25),
            )
            .with_model("claude-2.1", ModelPricing::per_million(8.0, 24.0))
            .with_model("claude-2", ModelPricing::per_million(8.0, 24.0))
            .with_model("llama3-70b-8192", ModelPricing::per_million(0.59, 0.79))
            .with_model("llama3-8b-8192", ModelPricing::per_million(0.05, 0.10))
            .with_model(
                "mixtral-8x7b-32768",
                ModelPricing::per_million(0.27, 0.27),
            )
            .with_model("gemma-7b-it", ModelPricing::per_million(0.10, 0.10))
            .with_embedding_model("text-embedding-ada-002", 0.10)
            .with_embedding_model("text-embedding-3-small", 0.02)
            .with_embedding_model("text-embedding-3-large", 0.13)
    }
}

//! Model access
//!
//! All outgoing model traffic flows through [`ModelRouter::call`], which
//! owns tier selection, USD budget projection against the persisted cost
//! ledger, and post-call ledger accounting. Providers are pluggable behind
//! [`ChatModelProvider`]; parsing of model output into typed shapes lives in
//! [`types`].

pub mod ledger;
pub mod provider;
pub mod router;
pub mod types;

use thiserror::Error;

pub use ledger::{LedgerEntry, LedgerRepository};
pub use provider::{ChatModelProvider, MockProvider, OpenAiCompatProvider, provider_from_config};
pub use router::{ChatRequest, ModelRouter};
pub use types::{
    IntentSpec, LlmCallResult, LlmPrompt, ModelResponse, NarrativeSpec, PlanSpec, round_usd,
};

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM calls are disabled by configuration (llm.enabled = false)")]
    Disabled,

    #[error("{0}")]
    BudgetExceeded(String),

    #[error("LLM provider error: {0}")]
    Provider(String),

    #[error("LLM timeout after {0}s")]
    Timeout(u64),

    #[error("LLM response parsing error: {0}")]
    Parse(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

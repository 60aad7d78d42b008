pub mod analytics;
pub mod answer_service;
pub mod ask_cache_service;
pub mod ask_pipeline;
pub mod context_service;
pub mod dataset_service;
pub mod llm;
pub mod rag;
pub mod rate_limit_service;
pub mod request_log_service;
pub mod sql;

use thiserror::Error;

pub use ask_cache_service::{AskCache, build_cache_key};
pub use ask_pipeline::{AskError, AskOutcome, AskPipeline, CostTrace};
pub use context_service::{ContextDocSummary, ContextService};
pub use dataset_service::DatasetService;
pub use llm::{ChatModelProvider, LlmError, ModelRouter, provider_from_config};
pub use rate_limit_service::{RateLimitExceeded, RateLimiter};
pub use request_log_service::{RequestLogEntry, RequestLogService};
pub use sql::QueryEngine;

/// Failure ingesting an uploaded file. `Invalid` maps to 400, `TooLarge`
/// to 413, the rest to 500.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("{0}")]
    Invalid(String),

    #[error("File too large: limit is {0} MB")]
    TooLarge(usize),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

//! Tablesage Library
//!
//! Grounded Q&A over an uploaded tabular dataset: the ask pipeline plans
//! safe read-only SQL, executes it under row/time budgets, grades the
//! result coverage, retrieves supporting context, and synthesizes a
//! narrative answer with drivers, charts, SQL citations, and a cost ledger.

use std::sync::Arc;

use sqlx::SqlitePool;

pub mod config;
pub mod db;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use services::llm::{ChatModelProvider, LlmError, ModelRouter, provider_from_config};
pub use services::{
    AskCache, AskPipeline, ContextService, DatasetService, QueryEngine, RateLimiter,
    RequestLogService,
};

#[cfg(test)]
mod tests;

/// Application shared state
///
/// Rust's type system is the DI container: every service is built once in
/// `AppState::build` and shared behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub config: Config,

    pub dataset_service: Arc<DatasetService>,
    pub context_service: Arc<ContextService>,
    pub ask_pipeline: Arc<AskPipeline>,

    pub ask_cache: Arc<AskCache>,
    pub rate_limiter: Arc<RateLimiter>,
    pub request_log: Arc<RequestLogService>,
}

impl AppState {
    /// Build the full service graph from configuration, using the provider
    /// the config names.
    pub async fn build(config: Config) -> Result<Arc<Self>, anyhow::Error> {
        let provider = provider_from_config(&config.llm);
        Self::build_with_provider(config, provider).await
    }

    /// Build with an explicit chat provider (tests inject canned providers).
    pub async fn build_with_provider(
        config: Config,
        provider: Arc<dyn ChatModelProvider>,
    ) -> Result<Arc<Self>, anyhow::Error> {
        let pool = db::create_pool(&config.database.path).await?;

        let dataset_service = Arc::new(DatasetService::new(
            pool.clone(),
            &config.database.path,
            config.upload.clone(),
        ));
        let context_service = Arc::new(ContextService::new(
            pool.clone(),
            config.rag.clone(),
            &config.upload,
        ));
        let query_engine = Arc::new(QueryEngine::new(&config.database.path, &config.query));
        let router = Arc::new(ModelRouter::new(pool.clone(), provider, config.llm.clone()));
        let ask_pipeline = Arc::new(AskPipeline::new(
            Arc::clone(&dataset_service),
            query_engine,
            router,
            Arc::clone(&context_service),
        ));

        Ok(Arc::new(Self {
            db: pool.clone(),
            config,
            dataset_service,
            context_service,
            ask_pipeline,
            ask_cache: Arc::new(AskCache::new()),
            rate_limiter: Arc::new(RateLimiter::new()),
            request_log: Arc::new(RequestLogService::new(pool)),
        }))
    }
}

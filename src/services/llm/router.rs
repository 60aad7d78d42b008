//! Model router and budget enforcer
//!
//! Single choke point for outgoing model calls: picks the model tier for the
//! task, projects the cost of the call against the per-request and per-day
//! USD caps before dialing out, and writes a ledger entry with the actual
//! token usage afterwards.

use std::sync::Arc;

use chrono::Utc;

use super::ledger::{LedgerEntry, LedgerRepository};
use super::provider::ChatModelProvider;
use super::types::{LlmCallResult, LlmPrompt, round_usd, whitespace_token_count};
use super::LlmError;
use crate::config::LlmConfig;
use crate::utils::truncate_chars;

const APP_NAME: &str = "tablesage";

/// One routed chat call.
#[derive(Debug, Clone)]
pub struct ChatRequest<'a> {
    pub request_id: &'a str,
    pub task: &'a str,
    pub system_prompt: String,
    pub user_prompt: String,
    pub prefer_expensive: bool,
}

pub struct ModelRouter {
    ledger: LedgerRepository,
    provider: Arc<dyn ChatModelProvider>,
    config: LlmConfig,
}

impl ModelRouter {
    pub fn new(
        pool: sqlx::SqlitePool,
        provider: Arc<dyn ChatModelProvider>,
        config: LlmConfig,
    ) -> Self {
        Self { ledger: LedgerRepository::new(pool), provider, config }
    }

    fn select_model(&self, task: &str, prefer_expensive: bool) -> String {
        match task {
            "synthesize_explanation" => self.config.expensive_model.clone(),
            "default" => self.config.default_model.clone(),
            _ if prefer_expensive => self.config.expensive_model.clone(),
            _ => self.config.cheap_model.clone(),
        }
    }

    fn estimate_price(&self, prompt_tokens: i64, completion_tokens: i64) -> f64 {
        let prompt = (prompt_tokens as f64 / 1000.0) * self.config.price_prompt_per_1k;
        let completion = (completion_tokens as f64 / 1000.0) * self.config.price_completion_per_1k;
        round_usd(prompt + completion)
    }

    async fn enforce_budget(&self, request_id: &str, estimated_usd: f64) -> Result<(), LlmError> {
        let request_spend = self.ledger.request_spend_usd(request_id).await?;
        let projected_request_spend = request_spend + estimated_usd;
        if projected_request_spend > self.config.max_usd_per_request {
            return Err(LlmError::BudgetExceeded(format!(
                "Per-request budget exceeded: projected ${:.4} > ${:.4}",
                projected_request_spend, self.config.max_usd_per_request
            )));
        }

        let today_start = Utc::now()
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .expect("midnight is a valid time")
            .and_utc()
            .to_rfc3339();
        let daily_spend = self.ledger.global_spend_usd_since(&today_start).await?;
        let projected_daily_spend = daily_spend + estimated_usd;
        if projected_daily_spend > self.config.max_usd_per_day {
            return Err(LlmError::BudgetExceeded(format!(
                "Daily budget exceeded: projected ${:.4} > ${:.4}",
                projected_daily_spend, self.config.max_usd_per_day
            )));
        }

        Ok(())
    }

    pub async fn call(&self, request: ChatRequest<'_>) -> Result<LlmCallResult, LlmError> {
        if !self.config.enabled {
            return Err(LlmError::Disabled);
        }

        let model = self.select_model(request.task, request.prefer_expensive);

        let prompt_tokens = whitespace_token_count(&format!(
            "{}\n{}",
            request.system_prompt, request.user_prompt
        ));
        let estimated_completion_tokens = self.config.estimated_completion_tokens.max(1);
        let estimated_usd = self.estimate_price(prompt_tokens, estimated_completion_tokens);
        self.enforce_budget(request.request_id, estimated_usd).await?;

        let prompt = LlmPrompt {
            system: request.system_prompt.clone(),
            user: request.user_prompt.clone(),
        };
        let reply = self.provider.call(&model, &prompt).await?;
        let usd = self.estimate_price(reply.prompt_tokens, reply.completion_tokens);

        self.ledger
            .insert_entry(LedgerEntry {
                request_id: Some(request.request_id.to_string()),
                app: APP_NAME.to_string(),
                provider: self.provider.name().to_string(),
                model: model.clone(),
                prompt_tokens: reply.prompt_tokens,
                completion_tokens: reply.completion_tokens,
                usd,
                metadata: serde_json::json!({
                    "task": request.task,
                    "system_prompt_preview": truncate_chars(&request.system_prompt, 160),
                    "user_prompt_preview": truncate_chars(&request.user_prompt, 160),
                }),
            })
            .await?;

        Ok(LlmCallResult {
            text: reply.text,
            model,
            provider: self.provider.name().to_string(),
            prompt_tokens: reply.prompt_tokens,
            completion_tokens: reply.completion_tokens,
            usd,
        })
    }

    #[cfg(test)]
    pub fn ledger(&self) -> &LedgerRepository {
        &self.ledger
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::services::llm::provider::MockProvider;
    use sqlx::SqlitePool;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("memory pool");
        db::init_schema(&pool).await.expect("schema");
        pool
    }

    fn router_with(pool: SqlitePool, config: LlmConfig) -> ModelRouter {
        ModelRouter::new(pool, Arc::new(MockProvider), config)
    }

    fn chat_request(request_id: &str) -> ChatRequest<'_> {
        ChatRequest {
            request_id,
            task: "plan_sql_queries",
            system_prompt: "You plan SQL.".to_string(),
            user_prompt: "How many rows are in this dataset?".to_string(),
            prefer_expensive: false,
        }
    }

    #[tokio::test]
    async fn call_writes_a_ledger_entry() {
        let pool = memory_pool().await;
        let router = router_with(pool, LlmConfig::default());

        let result = router.call(chat_request("req-1")).await.expect("call succeeds");
        assert_eq!(result.model, "mock-cheap");
        assert!(result.usd > 0.0);
        assert_eq!(router.ledger().entry_count().await.expect("count"), 1);
        assert!(router.ledger().request_spend_usd("req-1").await.expect("spend") > 0.0);
    }

    #[tokio::test]
    async fn synthesize_task_routes_to_expensive_model() {
        let pool = memory_pool().await;
        let router = router_with(pool, LlmConfig::default());

        let mut request = chat_request("req-2");
        request.task = "synthesize_explanation";
        let result = router.call(request).await.expect("call succeeds");
        assert_eq!(result.model, "mock-expensive");
    }

    #[tokio::test]
    async fn disabled_config_raises_before_any_call() {
        let pool = memory_pool().await;
        let config = LlmConfig { enabled: false, ..LlmConfig::default() };
        let router = router_with(pool, config);

        let err = router.call(chat_request("req-3")).await.unwrap_err();
        assert!(matches!(err, LlmError::Disabled));
        assert_eq!(router.ledger().entry_count().await.expect("count"), 0);
    }

    #[tokio::test]
    async fn tiny_request_budget_rejects_with_429_style_message() {
        let pool = memory_pool().await;
        let config = LlmConfig { max_usd_per_request: 1e-8, ..LlmConfig::default() };
        let router = router_with(pool, config);

        let err = router.call(chat_request("req-4")).await.unwrap_err();
        let LlmError::BudgetExceeded(message) = err else {
            panic!("expected budget error");
        };
        assert!(message.to_lowercase().contains("per-request budget exceeded"));
    }

    #[tokio::test]
    async fn tiny_daily_budget_rejects() {
        let pool = memory_pool().await;
        let config = LlmConfig {
            max_usd_per_request: 10.0,
            max_usd_per_day: 1e-8,
            ..LlmConfig::default()
        };
        let router = router_with(pool, config);

        let err = router.call(chat_request("req-5")).await.unwrap_err();
        let LlmError::BudgetExceeded(message) = err else {
            panic!("expected budget error");
        };
        assert!(message.to_lowercase().contains("daily budget exceeded"));
    }

    #[tokio::test]
    async fn spent_request_budget_blocks_the_next_call() {
        let pool = memory_pool().await;
        // Measure what one call actually costs, then cap the budget at that.
        let first_cost = {
            let probe = router_with(pool.clone(), LlmConfig::default());
            probe.call(chat_request("probe")).await.expect("probe call").usd
        };

        // A small completion estimate keeps the first projection under the
        // cap; the recorded spend pushes the second projection over it.
        let config = LlmConfig {
            max_usd_per_request: first_cost,
            estimated_completion_tokens: 1,
            ..LlmConfig::default()
        };
        let router = router_with(pool, config);
        router.call(chat_request("req-6")).await.expect("first call fits");
        let err = router.call(chat_request("req-6")).await.unwrap_err();
        assert!(matches!(err, LlmError::BudgetExceeded(_)));
    }
}

//! Append-only request logging
//!
//! One row per completed or clarification-gated ask: the question, models
//! used, token totals, spend, status, diagnostics, and a snapshot of the
//! response body.

use chrono::Utc;
use serde_json::Value;
use sqlx::SqlitePool;

use crate::models::Diagnostic;

#[derive(Debug, Clone)]
pub struct RequestLogEntry {
    pub request_id: String,
    pub conversation_id: String,
    pub question: String,
    pub models: Vec<String>,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub usd_cost: f64,
    pub status: String,
    pub diagnostics: Vec<Diagnostic>,
    pub response: Option<Value>,
}

pub struct RequestLogService {
    pool: SqlitePool,
}

impl RequestLogService {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn log_request(&self, entry: RequestLogEntry) -> Result<(), sqlx::Error> {
        let models_json = serde_json::to_string(&entry.models).unwrap_or_else(|_| "[]".into());
        let diagnostics_json =
            serde_json::to_string(&entry.diagnostics).unwrap_or_else(|_| "[]".into());
        let response_json = entry.response.map(|value| value.to_string());

        sqlx::query(
            r#"INSERT INTO request_log (
                request_id, conversation_id, question, models_json, prompt_tokens,
                completion_tokens, usd_cost, status, diagnostics_json, response_json, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&entry.request_id)
        .bind(&entry.conversation_id)
        .bind(&entry.question)
        .bind(models_json)
        .bind(entry.prompt_tokens)
        .bind(entry.completion_tokens)
        .bind(entry.usd_cost)
        .bind(&entry.status)
        .bind(diagnostics_json)
        .bind(response_json)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[cfg(test)]
    pub async fn status_of(&self, request_id: &str) -> Result<Option<String>, sqlx::Error> {
        sqlx::query_scalar("SELECT status FROM request_log WHERE request_id = ?")
            .bind(request_id)
            .fetch_optional(&self.pool)
            .await
    }
}

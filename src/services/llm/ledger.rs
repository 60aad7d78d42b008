//! Cost ledger repository
//!
//! Append-only record of every model call. Budget enforcement reads spend
//! back out of it, so an entry must land after each call regardless of what
//! the caller does with the response.

use chrono::Utc;
use serde_json::Value;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::LlmError;

#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub request_id: Option<String>,
    pub app: String,
    pub provider: String,
    pub model: String,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub usd: f64,
    pub metadata: Value,
}

pub struct LedgerRepository {
    pool: SqlitePool,
}

impl LedgerRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert_entry(&self, entry: LedgerEntry) -> Result<(), LlmError> {
        sqlx::query(
            r#"INSERT INTO cost_ledger
               (id, request_id, app, provider, model, prompt_tokens,
                completion_tokens, usd, created_at, metadata_json)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&entry.request_id)
        .bind(&entry.app)
        .bind(&entry.provider)
        .bind(&entry.model)
        .bind(entry.prompt_tokens)
        .bind(entry.completion_tokens)
        .bind(entry.usd)
        .bind(Utc::now().to_rfc3339())
        .bind(entry.metadata.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Total USD already charged to one request.
    pub async fn request_spend_usd(&self, request_id: &str) -> Result<f64, LlmError> {
        let spend: f64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(usd), 0.0) FROM cost_ledger WHERE request_id = ?",
        )
        .bind(request_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(spend)
    }

    /// Total USD across all requests since an RFC 3339 timestamp. Timestamps
    /// are stored in a single canonical format, so the comparison is textual.
    pub async fn global_spend_usd_since(&self, since: &str) -> Result<f64, LlmError> {
        let spend: f64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(usd), 0.0) FROM cost_ledger WHERE created_at >= ?",
        )
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(spend)
    }

    pub async fn entry_count(&self) -> Result<i64, LlmError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cost_ledger")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

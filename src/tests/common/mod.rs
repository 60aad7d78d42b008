// Common test utilities and helpers

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Json;
use axum::extract::{ConnectInfo, Extension, State};
use axum::http::HeaderMap;
use serde_json::Value;
use uuid::Uuid;

use crate::config::Config;
use crate::handlers::ask::{AskApiError, ask};
use crate::middleware::RequestId;
use crate::models::AskRequest;
use crate::AppState;

/// Four rows spanning two weeks: enough for the windowed patterns to split
/// a current and a prior period.
pub const TWO_WEEK_CSV: &str = "date,segment,revenue\n\
    2025-01-01,A,100\n\
    2025-01-02,B,120\n\
    2025-01-08,A,90\n\
    2025-01-09,B,140\n";

/// Two numeric metrics and two time-like columns: ambiguous on purpose.
pub const AMBIGUOUS_CSV: &str = "order_date,event_date,segment,revenue,profit\n\
    2025-01-01,2025-01-01,A,100,10\n\
    2025-01-08,2025-01-08,B,120,20\n";

/// Build an `AppState` over a fresh temp-file database with the mock chat
/// provider and default config, mutated by `mutate` before wiring.
pub async fn test_state_with(mutate: impl FnOnce(&mut Config)) -> Arc<AppState> {
    let mut config = Config::default();
    config.database.path = std::env::temp_dir()
        .join(format!("tablesage-test-{}.db", Uuid::new_v4()))
        .display()
        .to_string();
    config.logging.file = None;
    mutate(&mut config);
    AppState::build(config).await.expect("test state builds")
}

pub async fn test_state() -> Arc<AppState> {
    test_state_with(|_| {}).await
}

pub async fn upload_csv(state: &AppState, filename: &str, csv: &str) {
    state
        .dataset_service
        .ingest_csv(filename, csv.as_bytes().to_vec())
        .await
        .expect("csv ingests");
}

/// Drive the ask handler directly with constructed extractors.
pub async fn call_ask(
    state: &Arc<AppState>,
    question: &str,
    clarifications: Option<BTreeMap<String, Value>>,
    request_id: &str,
) -> Result<Json<Value>, AskApiError> {
    let peer: SocketAddr = "127.0.0.1:40000".parse().expect("valid addr");
    ask(
        State(Arc::clone(state)),
        ConnectInfo(peer),
        Extension(RequestId(request_id.to_string())),
        HeaderMap::new(),
        Json(AskRequest {
            question: question.to_string(),
            conversation_id: None,
            clarifications,
        }),
    )
    .await
}

pub async fn ledger_count(state: &AppState) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM cost_ledger")
        .fetch_one(&state.db)
        .await
        .expect("ledger count")
}

pub fn cleanup(state: &AppState) {
    let _ = std::fs::remove_file(&state.config.database.path);
}

//! Ask API handler
//!
//! `POST /api/ask`: rate gate, response-cache lookup, pipeline run, request
//! logging, cache store. Fatal pipeline errors map to transport codes here;
//! everything recoverable already arrived as diagnostics inside the answer.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Extension, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::Value;

use crate::AppState;
use crate::middleware::RequestId;
use crate::models::{AskRequest, AskResponse};
use crate::services::ask_pipeline::AskError;
use crate::services::llm::LlmError;
use crate::services::rate_limit_service::RateLimitExceeded;
use crate::services::request_log_service::RequestLogEntry;
use crate::services::ask_cache_service::build_cache_key;

/// Client identity for rate limiting: first X-Forwarded-For hop when behind
/// a proxy, else the peer address.
fn client_ip(headers: &HeaderMap, peer: SocketAddr) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| peer.ip().to_string())
}

/// Answer an analytical question about the active dataset
/// POST /api/ask
#[utoipa::path(
    post,
    path = "/api/ask",
    request_body = AskRequest,
    responses(
        (status = 200, description = "Answer or clarification request", body = AskResponse),
        (status = 429, description = "Rate limit or budget exceeded"),
        (status = 503, description = "Model provider unavailable or disabled"),
    ),
    tag = "Ask"
)]
pub async fn ask(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Extension(request_id): Extension<RequestId>,
    headers: HeaderMap,
    Json(payload): Json<AskRequest>,
) -> Result<Json<Value>, AskApiError> {
    let client_ip = client_ip(&headers, peer);
    let limits = &state.config.rate_limit;
    state
        .rate_limiter
        .enforce("ask_per_minute", &client_ip, limits.ask_per_minute, 60)?;
    state
        .rate_limiter
        .enforce("ask_per_hour", &client_ip, limits.ask_per_hour, 3600)?;

    let clarifications = payload.clarifications.clone().unwrap_or_default();
    let dataset_id = state
        .dataset_service
        .get_meta()
        .await
        .map_err(|e| AskApiError::Internal(e.to_string()))?
        .map(|meta| meta.dataset_id);
    let cache_key = build_cache_key(&payload.question, dataset_id.as_deref(), &clarifications);
    if let Some(cached) = state.ask_cache.get(&cache_key) {
        tracing::debug!("Ask cache hit for request {}", request_id.0);
        return Ok(Json(cached));
    }

    let outcome = state
        .ask_pipeline
        .run(
            &payload.question,
            payload.conversation_id.clone(),
            Some(clarifications),
            Some(request_id.0.clone()),
        )
        .await?;

    let status = if outcome.needs_clarification { "needs_clarification" } else { "completed" };
    let response = AskResponse {
        conversation_id: outcome.conversation_id.clone(),
        needs_clarification: outcome.needs_clarification,
        clarification_questions: outcome.clarification_questions.clone(),
        answer: outcome.answer.clone(),
    };
    let response_value =
        serde_json::to_value(&response).map_err(|e| AskApiError::Internal(e.to_string()))?;

    state
        .request_log
        .log_request(RequestLogEntry {
            request_id: outcome.request_id.clone(),
            conversation_id: outcome.conversation_id.clone(),
            question: payload.question.clone(),
            models: outcome.cost_trace.models.clone(),
            prompt_tokens: outcome.cost_trace.prompt_tokens,
            completion_tokens: outcome.cost_trace.completion_tokens,
            usd_cost: outcome.cost_trace.usd,
            status: status.to_string(),
            diagnostics: outcome.diagnostics.clone(),
            response: Some(response_value.clone()),
        })
        .await
        .map_err(|e| AskApiError::Internal(e.to_string()))?;

    if !outcome.needs_clarification && response.answer.is_some() {
        state
            .ask_cache
            .set(&cache_key, &response_value, state.config.cache.ask_ttl_seconds);
    }

    Ok(Json(response_value))
}

// ============================================================================
// Error Handling
// ============================================================================

#[derive(Debug)]
pub enum AskApiError {
    RateLimited(RateLimitExceeded),
    Llm(LlmError),
    Internal(String),
}

impl From<RateLimitExceeded> for AskApiError {
    fn from(err: RateLimitExceeded) -> Self {
        Self::RateLimited(err)
    }
}

impl From<AskError> for AskApiError {
    fn from(err: AskError) -> Self {
        match err {
            AskError::Llm(inner) => Self::Llm(inner),
            AskError::Database(inner) => Self::Internal(inner.to_string()),
        }
    }
}

impl IntoResponse for AskApiError {
    fn into_response(self) -> Response {
        let (status, message, retry_after) = match &self {
            Self::RateLimited(err) => {
                (StatusCode::TOO_MANY_REQUESTS, err.to_string(), Some(err.retry_after_seconds))
            },
            Self::Llm(LlmError::BudgetExceeded(message)) => {
                (StatusCode::TOO_MANY_REQUESTS, message.clone(), None)
            },
            Self::Llm(LlmError::Disabled) => {
                (StatusCode::SERVICE_UNAVAILABLE, LlmError::Disabled.to_string(), None)
            },
            Self::Llm(err @ (LlmError::Provider(_) | LlmError::Timeout(_) | LlmError::Parse(_))) => {
                (StatusCode::SERVICE_UNAVAILABLE, err.to_string(), None)
            },
            Self::Llm(err) => {
                tracing::error!("Ask pipeline storage failure: {}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal error while processing question.".to_string(),
                    None,
                )
            },
            Self::Internal(message) => {
                tracing::error!("Unhandled error during ask pipeline: {}", message);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal error while processing question.".to_string(),
                    None,
                )
            },
        };

        let body = Json(serde_json::json!({
            "error": message,
            "code": status.as_u16(),
        }));
        let mut response = (status, body).into_response();
        if let Some(seconds) = retry_after
            && let Ok(value) = seconds.to_string().parse()
        {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
        response
    }
}

//! Handler-level tests: rate limiting, response caching, request logging,
//! and the transport mapping of budget/disabled errors.

use axum::http::StatusCode;
use axum::response::IntoResponse;

use super::common::{TWO_WEEK_CSV, call_ask, cleanup, ledger_count, test_state, test_state_with, upload_csv};

async fn body_text(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body bytes");
    String::from_utf8_lossy(&bytes).into_owned()
}

#[tokio::test]
async fn identical_asks_within_ttl_share_bytes_and_ledger_rows() {
    let state = test_state().await;
    upload_csv(&state, "sales.csv", TWO_WEEK_CSV).await;

    let first = call_ask(&state, "How many rows are in this dataset?", None, "req-a")
        .await
        .expect("first ask");
    let spent = ledger_count(&state).await;
    assert!(spent > 0);

    let second = call_ask(&state, "How many rows are in this dataset?", None, "req-b")
        .await
        .expect("second ask");

    assert_eq!(first.0, second.0);
    assert_eq!(ledger_count(&state).await, spent);

    cleanup(&state);
}

#[tokio::test]
async fn question_case_and_whitespace_do_not_bypass_the_cache() {
    let state = test_state().await;
    upload_csv(&state, "sales.csv", TWO_WEEK_CSV).await;

    let first = call_ask(&state, "How many rows are in this dataset?", None, "req-a")
        .await
        .expect("first ask");
    let spent = ledger_count(&state).await;

    let second = call_ask(&state, "  how MANY rows   are in this dataset? ", None, "req-b")
        .await
        .expect("second ask");

    assert_eq!(first.0, second.0);
    assert_eq!(ledger_count(&state).await, spent);

    cleanup(&state);
}

#[tokio::test]
async fn zero_ttl_disables_the_response_cache() {
    let state = test_state_with(|config| config.cache.ask_ttl_seconds = 0).await;
    upload_csv(&state, "sales.csv", TWO_WEEK_CSV).await;

    call_ask(&state, "How many rows are in this dataset?", None, "req-a")
        .await
        .expect("first ask");
    let spent = ledger_count(&state).await;

    call_ask(&state, "How many rows are in this dataset?", None, "req-b")
        .await
        .expect("second ask");
    assert!(ledger_count(&state).await > spent);

    cleanup(&state);
}

#[tokio::test]
async fn rate_limit_maps_to_429_with_retry_after() {
    let state = test_state_with(|config| {
        config.rate_limit.ask_per_minute = 100;
        config.rate_limit.ask_per_hour = 1;
        // Distinct questions so the cache cannot absorb the second call.
        config.cache.ask_ttl_seconds = 0;
    })
    .await;
    upload_csv(&state, "sales.csv", TWO_WEEK_CSV).await;

    call_ask(&state, "How many rows are in this dataset?", None, "req-a")
        .await
        .expect("first ask");
    let err = call_ask(&state, "What is the average revenue?", None, "req-b")
        .await
        .expect_err("second ask is limited");

    let response = err.into_response();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .expect("retry-after header");
    assert!(retry_after >= 1 && retry_after <= 3600);
    assert!(body_text(response).await.to_lowercase().contains("rate limit exceeded"));

    cleanup(&state);
}

#[tokio::test]
async fn tiny_request_budget_maps_to_429() {
    let state = test_state_with(|config| config.llm.max_usd_per_request = 1e-8).await;
    upload_csv(&state, "sales.csv", TWO_WEEK_CSV).await;

    let err = call_ask(&state, "How many rows are in this dataset?", None, "req-a")
        .await
        .expect_err("budget rejects");

    let response = err.into_response();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(
        body_text(response)
            .await
            .to_lowercase()
            .contains("per-request budget exceeded")
    );

    cleanup(&state);
}

#[tokio::test]
async fn disabled_llm_maps_to_503() {
    let state = test_state_with(|config| config.llm.enabled = false).await;
    upload_csv(&state, "sales.csv", TWO_WEEK_CSV).await;

    let err = call_ask(&state, "How many rows are in this dataset?", None, "req-a")
        .await
        .expect_err("disabled rejects");

    let response = err.into_response();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(body_text(response).await.to_lowercase().contains("disabled"));

    cleanup(&state);
}

#[tokio::test]
async fn dataset_not_ready_still_logs_a_completed_request() {
    let state = test_state().await;

    let response = call_ask(&state, "What changed?", None, "req-log")
        .await
        .expect("ask succeeds");

    assert_eq!(response.0["answer"]["headline"], "Dataset required");
    assert_eq!(response.0["needs_clarification"], false);

    let status = state
        .request_log
        .status_of("req-log")
        .await
        .expect("log query")
        .expect("log row exists");
    assert_eq!(status, "completed");

    cleanup(&state);
}

#[tokio::test]
async fn clarification_round_trip_is_not_cached() {
    let state = test_state().await;
    upload_csv(&state, "wide.csv", super::common::AMBIGUOUS_CSV).await;

    let first = call_ask(&state, "Why did performance change last week?", None, "req-a")
        .await
        .expect("ask succeeds");
    assert_eq!(first.0["needs_clarification"], true);

    let status = state
        .request_log
        .status_of("req-a")
        .await
        .expect("log query")
        .expect("log row exists");
    assert_eq!(status, "needs_clarification");

    // A clarification-gated response never lands in the cache, so the same
    // question asked again re-runs the pipeline and logs a second row.
    let second = call_ask(&state, "Why did performance change last week?", None, "req-b")
        .await
        .expect("ask succeeds");
    assert_eq!(second.0["needs_clarification"], true);
    assert!(
        state
            .request_log
            .status_of("req-b")
            .await
            .expect("log query")
            .is_some()
    );

    cleanup(&state);
}

//! Dataset summary handler

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::response::IntoResponse;

use crate::AppState;
use crate::handlers::upload::UploadApiError;
use crate::models::{DatasetNotReadyResponse, DatasetSummaryResponse};

const SAMPLE_ROW_LIMIT: usize = 5;

/// Describe the active dataset with a few sample rows
/// GET /api/dataset/summary
#[utoipa::path(
    get,
    path = "/api/dataset/summary",
    responses(
        (status = 200, description = "Active dataset summary, or a not-ready marker"),
    ),
    tag = "Dataset"
)]
pub async fn get_dataset_summary(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, UploadApiError> {
    let Some(meta) = state
        .dataset_service
        .get_meta()
        .await
        .map_err(crate::services::UploadError::from)?
    else {
        return Ok(Json(serde_json::json!(DatasetNotReadyResponse::default())));
    };

    let sample_rows = state.dataset_service.sample_rows(&meta, SAMPLE_ROW_LIMIT).await?;
    let summary = DatasetSummaryResponse {
        dataset_uploaded: true,
        dataset_id: meta.dataset_id,
        name: meta.name,
        table_name: meta.table_name,
        rows: meta.row_count,
        columns: meta.columns,
        schema: meta.schema,
        sample_rows,
        created_at: meta.created_at,
    };
    Ok(Json(serde_json::json!(summary)))
}

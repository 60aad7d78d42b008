//! Upload handlers
//!
//! `POST /api/upload/dataset` ingests a CSV as the new active dataset;
//! `POST /api/upload/context` ingests a reference document into the context
//! store. Both accept one multipart `file` field.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::AppState;
use crate::models::{ContextUploadResponse, DatasetUploadResponse};
use crate::services::UploadError;

struct UploadedFile {
    filename: String,
    content_type: Option<String>,
    content: Vec<u8>,
}

async fn read_file_field(mut multipart: Multipart) -> Result<UploadedFile, UploadApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| UploadApiError(UploadError::Invalid(format!("Invalid multipart body: {e}"))))?
    {
        if field.name() != Some("file") && field.file_name().is_none() {
            continue;
        }
        let filename = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| UploadApiError(UploadError::Invalid("Missing filename".to_string())))?;
        let content_type = field.content_type().map(str::to_string);
        let content = field
            .bytes()
            .await
            .map_err(|e| {
                UploadApiError(UploadError::Invalid(format!("Failed to read upload: {e}")))
            })?
            .to_vec();
        return Ok(UploadedFile { filename, content_type, content });
    }
    Err(UploadApiError(UploadError::Invalid("Missing 'file' field".to_string())))
}

/// Upload a CSV dataset, replacing the active one
/// POST /api/upload/dataset
#[utoipa::path(
    post,
    path = "/api/upload/dataset",
    responses(
        (status = 200, description = "Dataset ingested", body = DatasetUploadResponse),
        (status = 400, description = "Invalid CSV"),
        (status = 413, description = "File too large"),
    ),
    tag = "Upload"
)]
pub async fn upload_dataset(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<impl IntoResponse, UploadApiError> {
    let file = read_file_field(multipart).await?;
    let meta = state.dataset_service.ingest_csv(&file.filename, file.content).await?;

    Ok(Json(DatasetUploadResponse {
        dataset_id: meta.dataset_id,
        table_name: meta.table_name,
        rows: meta.row_count,
        columns: meta.columns,
        schema: meta.schema,
    }))
}

/// Upload a reference document into the context store
/// POST /api/upload/context
#[utoipa::path(
    post,
    path = "/api/upload/context",
    responses(
        (status = 200, description = "Document ingested", body = ContextUploadResponse),
        (status = 400, description = "Unsupported or empty document"),
        (status = 413, description = "File too large"),
    ),
    tag = "Upload"
)]
pub async fn upload_context(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<impl IntoResponse, UploadApiError> {
    let file = read_file_field(multipart).await?;
    let summary = state
        .context_service
        .ingest_document(&file.filename, file.content_type.as_deref(), &file.content)
        .await?;

    Ok(Json(ContextUploadResponse {
        doc_id: summary.doc_id,
        filename: summary.filename,
        chunks: summary.chunks,
        created_at: summary.created_at,
    }))
}

// ============================================================================
// Error Handling
// ============================================================================

pub struct UploadApiError(UploadError);

impl From<UploadError> for UploadApiError {
    fn from(err: UploadError) -> Self {
        Self(err)
    }
}

impl IntoResponse for UploadApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            UploadError::Invalid(_) => (StatusCode::BAD_REQUEST, self.0.to_string()),
            UploadError::TooLarge(_) => (StatusCode::PAYLOAD_TOO_LARGE, self.0.to_string()),
            UploadError::Storage(message) => {
                tracing::error!("Upload storage error: {}", message);
                (StatusCode::INTERNAL_SERVER_ERROR, "Failed to store upload".to_string())
            },
            UploadError::Database(err) => {
                tracing::error!("Upload database error: {}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, "Failed to store upload".to_string())
            },
        };

        let body = Json(serde_json::json!({
            "error": message,
            "code": status.as_u16(),
        }));
        (status, body).into_response()
    }
}

//! Dataset metadata models
//!
//! A single "active" dataset exists at any time: one physical SQLite table
//! plus one `dataset_meta` row describing it. Uploading a new CSV replaces
//! both atomically.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::services::sql::Row;

/// Storage type of a dataset column, inferred at ingestion time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum ColumnType {
    Integer,
    Real,
    Text,
}

impl ColumnType {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Integer => "INTEGER",
            Self::Real => "REAL",
            Self::Text => "TEXT",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Integer | Self::Real)
    }
}

/// Metadata for the active dataset.
///
/// `columns` preserves CSV header order; `schema` is keyed by column name.
/// Iteration that depends on column order must walk `columns` and look the
/// type up in `schema`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetMeta {
    pub dataset_id: String,
    pub name: String,
    pub table_name: String,
    pub row_count: i64,
    pub columns: Vec<String>,
    pub schema: HashMap<String, ColumnType>,
    pub created_at: DateTime<Utc>,
}

impl DatasetMeta {
    pub fn column_type(&self, column: &str) -> Option<ColumnType> {
        self.schema.get(column).copied()
    }

    /// Numeric columns in header order.
    pub fn numeric_columns(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| self.column_type(c).is_some_and(|t| t.is_numeric()))
            .map(String::as_str)
            .collect()
    }

    /// Textual columns in header order.
    pub fn text_columns(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| self.column_type(c) == Some(ColumnType::Text))
            .map(String::as_str)
            .collect()
    }

    /// Columns whose names look time-like (`date`, `time`, `day`, `week`,
    /// `month`, `year` substrings).
    pub fn time_like_columns(&self) -> Vec<&str> {
        const TIME_TOKENS: [&str; 6] = ["date", "time", "day", "week", "month", "year"];
        self.columns
            .iter()
            .filter(|c| {
                let lowered = c.to_lowercase();
                TIME_TOKENS.iter().any(|t| lowered.contains(t))
            })
            .map(String::as_str)
            .collect()
    }
}

/// Response body for `POST /api/upload/dataset`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DatasetUploadResponse {
    pub dataset_id: String,
    pub table_name: String,
    pub rows: i64,
    pub columns: Vec<String>,
    pub schema: HashMap<String, ColumnType>,
}

/// Response body for `GET /api/dataset/summary` when a dataset exists.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DatasetSummaryResponse {
    pub dataset_uploaded: bool,
    pub dataset_id: String,
    pub name: String,
    pub table_name: String,
    pub rows: i64,
    pub columns: Vec<String>,
    pub schema: HashMap<String, ColumnType>,
    #[schema(value_type = Vec<Object>)]
    pub sample_rows: Vec<Row>,
    pub created_at: DateTime<Utc>,
}

/// Response body for `GET /api/dataset/summary` when nothing was uploaded.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DatasetNotReadyResponse {
    pub dataset_uploaded: bool,
    pub message: String,
}

impl Default for DatasetNotReadyResponse {
    fn default() -> Self {
        Self {
            dataset_uploaded: false,
            message: "No dataset uploaded yet. Upload a CSV via POST /api/upload/dataset."
                .to_string(),
        }
    }
}

/// Response body for `POST /api/upload/context`.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ContextUploadResponse {
    pub doc_id: String,
    pub filename: String,
    pub chunks: i64,
    pub created_at: DateTime<Utc>,
}

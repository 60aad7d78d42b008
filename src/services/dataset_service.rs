//! CSV dataset ingestion and metadata access
//!
//! One dataset is active at a time. Ingesting a CSV infers a column type per
//! header (INTEGER, REAL, TEXT over non-empty values), creates a fresh
//! physical table, bulk-inserts normalized rows, and replaces the previous
//! dataset — table drop and meta-row swap happen inside one transaction so
//! readers never observe a half-replaced dataset.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::UploadError;
use super::sql::executor::value_from_sqlite;
use super::sql::Row;
use crate::config::UploadConfig;
use crate::models::{ColumnType, DatasetMeta};
use crate::utils::slugify_identifier;

pub struct DatasetService {
    pool: SqlitePool,
    db_path: PathBuf,
    limits: UploadConfig,
}

impl DatasetService {
    pub fn new(pool: SqlitePool, db_path: impl Into<PathBuf>, limits: UploadConfig) -> Self {
        Self { pool, db_path: db_path.into(), limits }
    }

    /// Load the active dataset's metadata, if any.
    pub async fn get_meta(&self) -> Result<Option<DatasetMeta>, sqlx::Error> {
        let row: Option<(String, String, String, i64, String, String, String)> = sqlx::query_as(
            r#"SELECT dataset_id, name, table_name, row_count, columns_json, schema_json, created_at
               FROM dataset_meta LIMIT 1"#,
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.and_then(
            |(dataset_id, name, table_name, row_count, columns_json, schema_json, created_at)| {
                let columns: Vec<String> = serde_json::from_str(&columns_json).ok()?;
                let schema: HashMap<String, ColumnType> =
                    serde_json::from_str(&schema_json).ok()?;
                let created_at = DateTime::parse_from_rfc3339(&created_at)
                    .ok()?
                    .with_timezone(&Utc);
                Some(DatasetMeta {
                    dataset_id,
                    name,
                    table_name,
                    row_count,
                    columns,
                    schema,
                    created_at,
                })
            },
        ))
    }

    /// Parse, type, and store an uploaded CSV as the new active dataset.
    pub async fn ingest_csv(
        &self,
        filename: &str,
        content: Vec<u8>,
    ) -> Result<DatasetMeta, UploadError> {
        if !filename.to_lowercase().ends_with(".csv") {
            return Err(UploadError::Invalid("Dataset upload requires a CSV file".to_string()));
        }
        if content.len() > self.limits.dataset_max_mb * 1024 * 1024 {
            return Err(UploadError::TooLarge(self.limits.dataset_max_mb));
        }

        let filename = filename.to_string();
        let db_path = self.db_path.clone();
        let limits = self.limits.clone();
        let meta = tokio::task::spawn_blocking(move || {
            let parsed = parse_csv(&content, &limits)?;
            store_dataset(&db_path, &filename, parsed)
        })
        .await
        .map_err(|e| UploadError::Storage(e.to_string()))??;

        tracing::info!(
            "Ingested dataset '{}' as table {} ({} rows, {} columns)",
            meta.name,
            meta.table_name,
            meta.row_count,
            meta.columns.len()
        );
        Ok(meta)
    }

    /// First rows of the active dataset, for the summary endpoint.
    pub async fn sample_rows(&self, meta: &DatasetMeta, limit: usize) -> Result<Vec<Row>, UploadError> {
        let db_path = self.db_path.clone();
        let table_name = meta.table_name.clone();
        tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path).map_err(storage_error)?;
            let mut stmt = conn
                .prepare(&format!(r#"SELECT * FROM "{table_name}" LIMIT {limit}"#))
                .map_err(storage_error)?;
            let names: Vec<String> =
                stmt.column_names().iter().map(|name| name.to_string()).collect();

            let mut rows = stmt.query([]).map_err(storage_error)?;
            let mut output = Vec::new();
            while let Some(row) = rows.next().map_err(storage_error)? {
                let mut record = Row::new();
                for (idx, name) in names.iter().enumerate() {
                    let value = row.get_ref(idx).map_err(storage_error)?;
                    record.push(name.clone(), value_from_sqlite(value));
                }
                output.push(record);
            }
            Ok(output)
        })
        .await
        .map_err(|e| UploadError::Storage(e.to_string()))?
    }
}

fn storage_error(err: rusqlite::Error) -> UploadError {
    UploadError::Storage(err.to_string())
}

struct ParsedCsv {
    columns: Vec<String>,
    schema: HashMap<String, ColumnType>,
    /// Cell text per row, indexed like `columns`; blanks already trimmed.
    rows: Vec<Vec<String>>,
}

fn parse_csv(content: &[u8], limits: &UploadConfig) -> Result<ParsedCsv, UploadError> {
    let text = String::from_utf8(content.to_vec())
        .map_err(|_| UploadError::Invalid("CSV is not valid UTF-8".to_string()))?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(&text);

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers = reader
        .headers()
        .map_err(|_| UploadError::Invalid("CSV is missing header row".to_string()))?
        .clone();
    if headers.is_empty() {
        return Err(UploadError::Invalid("CSV is missing header row".to_string()));
    }

    let columns = dedupe_columns(headers.iter().map(slugify_identifier).collect());
    if columns.len() > limits.dataset_max_columns {
        return Err(UploadError::Invalid(format!(
            "CSV has {} columns; limit is {}",
            columns.len(),
            limits.dataset_max_columns
        )));
    }

    let mut rows: Vec<Vec<String>> = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| UploadError::Invalid(format!("Malformed CSV: {e}")))?;
        let row: Vec<String> = (0..columns.len())
            .map(|idx| record.get(idx).unwrap_or("").trim().to_string())
            .collect();
        rows.push(row);
        if rows.len() > limits.dataset_max_rows {
            return Err(UploadError::Invalid(format!(
                "CSV has more than {} rows",
                limits.dataset_max_rows
            )));
        }
    }
    if rows.is_empty() {
        return Err(UploadError::Invalid("CSV has no data rows".to_string()));
    }

    let mut schema = HashMap::new();
    for (idx, column) in columns.iter().enumerate() {
        let values = rows.iter().map(|row| row[idx].as_str());
        schema.insert(column.clone(), infer_column_type(values));
    }

    Ok(ParsedCsv { columns, schema, rows })
}

/// Duplicate headers after slugification get positional suffixes: the first
/// keeps its name, later ones become `name_2`, `name_3`, ...
fn dedupe_columns(columns: Vec<String>) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut output = Vec::with_capacity(columns.len());
    for column in columns {
        let count = seen.entry(column.clone()).or_insert(0);
        if *count == 0 {
            output.push(column.clone());
        } else {
            output.push(format!("{}_{}", column, *count + 1));
        }
        *count += 1;
    }
    output
}

fn infer_column_type<'a>(values: impl Iterator<Item = &'a str>) -> ColumnType {
    let mut any = false;
    let mut is_int = true;
    let mut is_float = true;
    for value in values.filter(|v| !v.is_empty()) {
        any = true;
        if value.parse::<i64>().is_err() {
            is_int = false;
        }
        if value.parse::<f64>().is_err() {
            is_float = false;
        }
        if !is_int && !is_float {
            break;
        }
    }

    if !any {
        ColumnType::Text
    } else if is_int {
        ColumnType::Integer
    } else if is_float {
        ColumnType::Real
    } else {
        ColumnType::Text
    }
}

fn store_dataset(
    db_path: &PathBuf,
    filename: &str,
    parsed: ParsedCsv,
) -> Result<DatasetMeta, UploadError> {
    let dataset_id = Uuid::new_v4().to_string();
    let table_name = format!("data_{}", &dataset_id.replace('-', "")[..12]);
    let created_at = Utc::now();

    let mut conn = Connection::open(db_path).map_err(storage_error)?;
    conn.pragma_update(None, "foreign_keys", true).map_err(storage_error)?;
    conn.busy_timeout(std::time::Duration::from_secs(5)).map_err(storage_error)?;

    let tx = conn.transaction().map_err(storage_error)?;

    let previous_table: Option<String> = tx
        .query_row("SELECT table_name FROM dataset_meta LIMIT 1", [], |row| row.get(0))
        .map(Some)
        .or_else(|err| match err {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other),
        })
        .map_err(storage_error)?;
    if let Some(previous) = previous_table {
        tx.execute(&format!(r#"DROP TABLE IF EXISTS "{previous}""#), [])
            .map_err(storage_error)?;
    }

    let column_ddl: Vec<String> = parsed
        .columns
        .iter()
        .map(|column| format!(r#""{}" {}"#, column, parsed.schema[column].as_sql()))
        .collect();
    tx.execute(&format!(r#"CREATE TABLE "{}" ({})"#, table_name, column_ddl.join(", ")), [])
        .map_err(storage_error)?;

    {
        let placeholders: Vec<String> =
            (1..=parsed.columns.len()).map(|i| format!("?{i}")).collect();
        let quoted: Vec<String> =
            parsed.columns.iter().map(|column| format!(r#""{column}""#)).collect();
        let insert_sql = format!(
            r#"INSERT INTO "{}" ({}) VALUES ({})"#,
            table_name,
            quoted.join(", "),
            placeholders.join(", ")
        );
        let mut insert = tx.prepare(&insert_sql).map_err(storage_error)?;
        for row in &parsed.rows {
            let values: Result<Vec<rusqlite::types::Value>, UploadError> = parsed
                .columns
                .iter()
                .zip(row.iter())
                .map(|(column, cell)| normalize_cell(cell, parsed.schema[column]))
                .collect();
            insert
                .execute(rusqlite::params_from_iter(values?))
                .map_err(storage_error)?;
        }
    }

    tx.execute("DELETE FROM dataset_meta", []).map_err(storage_error)?;
    tx.execute(
        r#"INSERT INTO dataset_meta
           (dataset_id, name, table_name, row_count, columns_json, schema_json, created_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"#,
        rusqlite::params![
            dataset_id,
            filename,
            table_name,
            parsed.rows.len() as i64,
            serde_json::to_string(&parsed.columns)
                .map_err(|e| UploadError::Invalid(e.to_string()))?,
            serde_json::to_string(&parsed.schema)
                .map_err(|e| UploadError::Invalid(e.to_string()))?,
            created_at.to_rfc3339(),
        ],
    )
    .map_err(storage_error)?;

    tx.commit().map_err(storage_error)?;

    Ok(DatasetMeta {
        dataset_id,
        name: filename.to_string(),
        table_name,
        row_count: parsed.rows.len() as i64,
        columns: parsed.columns,
        schema: parsed.schema,
        created_at,
    })
}

/// Blank cells become NULL; everything else is typed per the inferred schema.
fn normalize_cell(cell: &str, kind: ColumnType) -> Result<rusqlite::types::Value, UploadError> {
    use rusqlite::types::Value;

    if cell.is_empty() {
        return Ok(Value::Null);
    }
    match kind {
        ColumnType::Integer => cell
            .parse::<i64>()
            .map(Value::Integer)
            .map_err(|_| UploadError::Invalid(format!("Invalid integer value: {cell}"))),
        ColumnType::Real => cell
            .parse::<f64>()
            .map(Value::Real)
            .map_err(|_| UploadError::Invalid(format!("Invalid numeric value: {cell}"))),
        ColumnType::Text => Ok(Value::Text(cell.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn service() -> (DatasetService, PathBuf) {
        let path =
            std::env::temp_dir().join(format!("tablesage-ingest-{}.db", Uuid::new_v4()));
        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect(&format!("sqlite://{}?mode=rwc", path.display()))
            .await
            .expect("pool");
        db::init_schema(&pool).await.expect("schema");
        (DatasetService::new(pool, path.clone(), UploadConfig::default()), path)
    }

    const SAMPLE_CSV: &[u8] =
        b"date,segment,revenue\n2025-01-01,a,100\n2025-01-02,b,120.5\n2025-01-08,a,90\n2025-01-09,b,\n";

    #[tokio::test]
    async fn ingest_infers_types_and_stores_meta() {
        let (service, path) = service().await;

        let meta = service.ingest_csv("sample.csv", SAMPLE_CSV.to_vec()).await.expect("ingest");
        assert_eq!(meta.columns, vec!["date", "segment", "revenue"]);
        assert_eq!(meta.schema["date"], ColumnType::Text);
        assert_eq!(meta.schema["revenue"], ColumnType::Real);
        assert_eq!(meta.row_count, 4);

        let loaded = service.get_meta().await.expect("query").expect("meta exists");
        assert_eq!(loaded.table_name, meta.table_name);

        let samples = service.sample_rows(&meta, 5).await.expect("samples");
        assert_eq!(samples.len(), 4);
        // Blank revenue cell stored as NULL.
        assert!(samples[3].get("revenue").expect("column").is_null());

        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn second_ingest_replaces_the_previous_dataset() {
        let (service, path) = service().await;

        let first = service.ingest_csv("one.csv", SAMPLE_CSV.to_vec()).await.expect("first");
        let second = service
            .ingest_csv("two.csv", b"name,job\nada,engineer\n".to_vec())
            .await
            .expect("second");

        let meta = service.get_meta().await.expect("query").expect("meta exists");
        assert_eq!(meta.dataset_id, second.dataset_id);

        // Old physical table is gone, new one is queryable.
        let conn = Connection::open(&path).expect("open");
        let old_exists: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [&first.table_name],
                |row| row.get(0),
            )
            .expect("count");
        assert_eq!(old_exists, 0);
        let rows: i64 = conn
            .query_row(&format!(r#"SELECT COUNT(*) FROM "{}""#, second.table_name), [], |row| {
                row.get(0)
            })
            .expect("count");
        assert_eq!(rows, 1);

        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn duplicate_headers_dedupe_positionally() {
        let (service, path) = service().await;
        let meta = service
            .ingest_csv("dup.csv", b"value,Value,VALUE\n1,2,3\n".to_vec())
            .await
            .expect("ingest");
        assert_eq!(meta.columns, vec!["value", "value_2", "value_3"]);
        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn non_csv_extension_is_rejected() {
        let (service, path) = service().await;
        let err = service.ingest_csv("data.xlsx", SAMPLE_CSV.to_vec()).await.unwrap_err();
        assert!(matches!(err, UploadError::Invalid(_)));
        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn header_only_csv_is_rejected() {
        let (service, path) = service().await;
        let err = service
            .ingest_csv("empty.csv", b"date,revenue\n".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Invalid(_)));
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn type_inference_prefers_integer_then_real() {
        assert_eq!(infer_column_type(["1", "2", ""].into_iter()), ColumnType::Integer);
        assert_eq!(infer_column_type(["1", "2.5"].into_iter()), ColumnType::Real);
        assert_eq!(infer_column_type(["1", "abc"].into_iter()), ColumnType::Text);
        assert_eq!(infer_column_type(["", ""].into_iter()), ColumnType::Text);
    }
}

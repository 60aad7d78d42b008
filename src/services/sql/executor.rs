//! Bounded SQL execution against the dataset table.
//!
//! Each call opens its own read-only connection, appends an implicit LIMIT
//! when the statement has none, and arms a progress handler that interrupts
//! the statement once the configured wall-clock deadline passes. Blocking
//! SQLite work runs on the tokio blocking pool.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use thiserror::Error;

use super::{Row, SqlValue, validate_safe_select};
use crate::config::QueryConfig;
use crate::models::{Diagnostic, DiagnosticCode};

/// How many SQLite VM operations run between deadline checks.
const PROGRESS_OPS: u32 = 1000;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SqlExecutionError {
    /// The statement failed the safety guard before reaching the engine.
    #[error("{0}")]
    Rejected(String),

    #[error("Query timed out")]
    Timeout,

    #[error("Query budget exceeded")]
    QueryBudgetExceeded,

    #[error("{0}")]
    Engine(String),
}

/// One planned query handed to the plan runner.
#[derive(Debug, Clone)]
pub struct PlanItem {
    pub label: String,
    pub sql: String,
}

/// One executed query with its result rows.
#[derive(Debug, Clone)]
pub struct QueryExecution {
    pub label: String,
    pub sql: String,
    pub rows: Vec<Row>,
}

impl QueryExecution {
    pub fn has_rows(&self) -> bool {
        !self.rows.is_empty()
    }
}

/// Results plus per-query failures from running a full plan.
#[derive(Debug, Default)]
pub struct PlanOutcome {
    pub executed: Vec<QueryExecution>,
    pub errors: Vec<Diagnostic>,
}

/// Row/time-bounded read-only query runner over the dataset database.
#[derive(Debug, Clone)]
pub struct QueryEngine {
    db_path: PathBuf,
    timeout: Duration,
    max_rows: i64,
    max_per_request: usize,
}

impl QueryEngine {
    pub fn new(db_path: impl Into<PathBuf>, config: &QueryConfig) -> Self {
        Self {
            db_path: db_path.into(),
            timeout: Duration::from_secs_f64(config.timeout_seconds),
            max_rows: config.max_rows,
            max_per_request: config.max_per_request,
        }
    }

    pub fn max_per_request(&self) -> usize {
        self.max_per_request
    }

    /// Append `LIMIT n` when the statement carries no LIMIT of its own.
    fn enforce_limit(sql: &str, limit: i64) -> String {
        let trimmed = sql.trim();
        let cleaned = trimmed.strip_suffix(';').map(str::trim_end).unwrap_or(trimmed);
        if cleaned.to_uppercase().contains("LIMIT") {
            cleaned.to_string()
        } else {
            format!("{cleaned} LIMIT {limit}")
        }
    }

    /// Validate and execute a single SELECT, returning ordered rows.
    pub async fn execute(&self, sql: &str) -> Result<Vec<Row>, SqlExecutionError> {
        validate_safe_select(sql).map_err(|e| SqlExecutionError::Rejected(e.0))?;
        let bounded = Self::enforce_limit(sql, self.max_rows);

        let path = self.db_path.clone();
        let timeout = self.timeout;
        tokio::task::spawn_blocking(move || run_bounded_query(&path, &bounded, timeout))
            .await
            .map_err(|e| SqlExecutionError::Engine(e.to_string()))?
    }

    /// Run a plan sequentially. The request budget is enforced up front; a
    /// failing query becomes a diagnostic and the rest of the plan still runs.
    pub async fn run_plan(&self, plan: &[PlanItem]) -> Result<PlanOutcome, SqlExecutionError> {
        if plan.len() > self.max_per_request {
            return Err(SqlExecutionError::QueryBudgetExceeded);
        }

        let mut outcome = PlanOutcome::default();
        for item in plan {
            match self.execute(&item.sql).await {
                Ok(rows) => outcome.executed.push(QueryExecution {
                    label: item.label.clone(),
                    sql: item.sql.clone(),
                    rows,
                }),
                Err(e) => {
                    tracing::warn!("Query '{}' failed: {}", item.label, e);
                    outcome.errors.push(Diagnostic::new(
                        DiagnosticCode::SqlExecutionError,
                        format!("{}: {}", item.label, e),
                    ));
                },
            }
        }
        Ok(outcome)
    }
}

fn run_bounded_query(
    path: &PathBuf,
    sql: &str,
    timeout: Duration,
) -> Result<Vec<Row>, SqlExecutionError> {
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .map_err(|e| SqlExecutionError::Engine(e.to_string()))?;
    conn.busy_timeout(Duration::from_secs(5))
        .map_err(|e| SqlExecutionError::Engine(e.to_string()))?;

    let start = Instant::now();
    conn.progress_handler(PROGRESS_OPS as i32, Some(move || start.elapsed() > timeout));

    let result = collect_rows(&conn, sql);
    conn.progress_handler(0, None::<fn() -> bool>);
    result
}

fn collect_rows(conn: &Connection, sql: &str) -> Result<Vec<Row>, SqlExecutionError> {
    let mut stmt = conn.prepare(sql).map_err(map_engine_error)?;
    let column_names: Vec<String> =
        stmt.column_names().iter().map(|name| name.to_string()).collect();

    let mut rows = stmt.query([]).map_err(map_engine_error)?;
    let mut output = Vec::new();
    while let Some(row) = rows.next().map_err(map_engine_error)? {
        let mut record = Row::new();
        for (idx, name) in column_names.iter().enumerate() {
            let value = row.get_ref(idx).map_err(map_engine_error)?;
            record.push(name.clone(), value_from_sqlite(value));
        }
        output.push(record);
    }
    Ok(output)
}

fn map_engine_error(err: rusqlite::Error) -> SqlExecutionError {
    if err.sqlite_error_code() == Some(rusqlite::ErrorCode::OperationInterrupted) {
        SqlExecutionError::Timeout
    } else {
        SqlExecutionError::Engine(err.to_string())
    }
}

pub(crate) fn value_from_sqlite(value: ValueRef<'_>) -> SqlValue {
    match value {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Integer(v) => SqlValue::Int(v),
        ValueRef::Real(v) => SqlValue::Float(v),
        ValueRef::Text(v) => SqlValue::Text(String::from_utf8_lossy(v).into_owned()),
        // Dataset tables never store blobs; treat any as missing.
        ValueRef::Blob(_) => SqlValue::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueryConfig;

    fn temp_db_path(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("tablesage-exec-{tag}-{}.db", uuid::Uuid::new_v4()))
    }

    fn seed_dataset(path: &PathBuf) {
        let conn = Connection::open(path).expect("open");
        conn.execute_batch(
            r#"
            CREATE TABLE data_test (dt TEXT, segment TEXT, revenue REAL);
            INSERT INTO data_test VALUES
                ('2025-01-01', 'a', 10.0),
                ('2025-01-02', 'a', 12.0),
                ('2025-01-03', 'b', 7.0);
            "#,
        )
        .expect("seed");
    }

    fn engine(path: &PathBuf, timeout_seconds: f64) -> QueryEngine {
        QueryEngine::new(
            path.clone(),
            &QueryConfig { timeout_seconds, max_rows: 100, max_per_request: 10 },
        )
    }

    #[test]
    fn enforce_limit_adds_limit_when_missing() {
        assert_eq!(QueryEngine::enforce_limit("SELECT 1", 25), "SELECT 1 LIMIT 25");
        assert_eq!(QueryEngine::enforce_limit("SELECT 1;", 25), "SELECT 1 LIMIT 25");
    }

    #[test]
    fn enforce_limit_keeps_existing_limit() {
        assert_eq!(QueryEngine::enforce_limit("SELECT 1 LIMIT 5", 25), "SELECT 1 LIMIT 5");
    }

    #[tokio::test]
    async fn execute_returns_ordered_rows() {
        let path = temp_db_path("rows");
        seed_dataset(&path);

        let rows = engine(&path, 5.0)
            .execute(r#"SELECT "segment", SUM("revenue") AS total FROM "data_test" GROUP BY "segment" ORDER BY total DESC"#)
            .await
            .expect("query runs");

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("segment"), Some(&SqlValue::Text("a".into())));
        assert_eq!(rows[0].get("total"), Some(&SqlValue::Float(22.0)));

        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn execute_rejects_unsafe_sql() {
        let path = temp_db_path("unsafe");
        seed_dataset(&path);

        let err = engine(&path, 5.0).execute("DROP TABLE data_test").await.unwrap_err();
        assert!(matches!(err, SqlExecutionError::Rejected(_)));

        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn runaway_query_times_out() {
        let path = temp_db_path("timeout");
        seed_dataset(&path);

        let sql = r#"
            WITH RECURSIVE counter(x) AS (
                SELECT 1 UNION ALL SELECT x + 1 FROM counter
            )
            SELECT COUNT(*) AS n FROM counter LIMIT 1
        "#;
        let err = engine(&path, 0.2).execute(sql).await.unwrap_err();
        assert_eq!(err, SqlExecutionError::Timeout);
        assert_eq!(err.to_string(), "Query timed out");

        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn run_plan_enforces_budget_up_front() {
        let path = temp_db_path("budget");
        seed_dataset(&path);

        let plan: Vec<PlanItem> = (0..11)
            .map(|i| PlanItem { label: format!("q{i}"), sql: "SELECT 1".to_string() })
            .collect();
        let err = engine(&path, 5.0).run_plan(&plan).await.unwrap_err();
        assert_eq!(err, SqlExecutionError::QueryBudgetExceeded);

        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn run_plan_collects_errors_without_aborting() {
        let path = temp_db_path("collect");
        seed_dataset(&path);

        let plan = vec![
            PlanItem {
                label: "bad".to_string(),
                sql: r#"SELECT "missing" FROM "data_test""#.to_string(),
            },
            PlanItem {
                label: "good".to_string(),
                sql: r#"SELECT COUNT(*) AS n FROM "data_test""#.to_string(),
            },
        ];
        let outcome = engine(&path, 5.0).run_plan(&plan).await.expect("plan runs");

        assert_eq!(outcome.executed.len(), 1);
        assert_eq!(outcome.executed[0].label, "good");
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].code, DiagnosticCode::SqlExecutionError);

        let _ = std::fs::remove_file(path);
    }
}

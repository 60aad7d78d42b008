//! Trend break detection
//!
//! Compares the mean of the latest 7 daily aggregates against the mean of
//! the preceding 21. A shift of at least 15% of the baseline mean is a
//! `trend_break`; otherwise `stable`, or `insufficient` with no baseline.
//! A companion "Trend series" query returns the last 30 daily points,
//! newest first (consumers reverse for display).

use super::PatternPlan;
use crate::models::{DatasetMeta, Diagnostic, DiagnosticCode, Intent};
use crate::services::analytics::helpers::{pick_metric_column, pick_time_column};

pub fn build_trend_break_detection(meta: &DatasetMeta, intent: &Intent) -> PatternPlan {
    let mut plan = PatternPlan::new("trend_break_detection");

    let Some(metric) = pick_metric_column(meta, intent.metric.as_deref()) else {
        plan.diagnostics.push(Diagnostic::new(
            DiagnosticCode::MissingMetric,
            "No numeric metric column found",
        ));
        return plan;
    };
    let Some(time_col) = pick_time_column(meta, intent.time_column.as_deref()) else {
        plan.diagnostics.push(Diagnostic::new(
            DiagnosticCode::MissingTimeColumn,
            "No time-like column found",
        ));
        return plan;
    };

    let table = &meta.table_name;
    let signal_sql = format!(
        r#"WITH daily AS (
  SELECT DATE("{time_col}") AS dt, SUM(CAST("{metric}" AS REAL)) AS metric_value
  FROM "{table}"
  GROUP BY dt
),
ranked AS (
  SELECT dt, metric_value, ROW_NUMBER() OVER (ORDER BY dt DESC) AS rn
  FROM daily
),
recent AS (
  SELECT metric_value FROM ranked WHERE rn <= 7
),
baseline AS (
  SELECT metric_value FROM ranked WHERE rn > 7 AND rn <= 28
)
SELECT
  (SELECT AVG(metric_value) FROM recent) AS recent_avg,
  (SELECT AVG(metric_value) FROM baseline) AS baseline_avg,
  (SELECT AVG(metric_value) FROM recent) - (SELECT AVG(metric_value) FROM baseline) AS avg_delta,
  CASE
    WHEN (SELECT AVG(metric_value) FROM baseline) IS NULL THEN 'insufficient'
    WHEN ABS((SELECT AVG(metric_value) FROM recent) - (SELECT AVG(metric_value) FROM baseline)) >= 0.15 * ABS((SELECT AVG(metric_value) FROM baseline)) THEN 'trend_break'
    ELSE 'stable'
  END AS trend_signal"#
    );

    let series_sql = format!(
        r#"SELECT
  DATE("{time_col}") AS x,
  SUM(CAST("{metric}" AS REAL)) AS y
FROM "{table}"
GROUP BY x
ORDER BY x DESC
LIMIT 30"#
    );

    plan.push_query("Trend break detection", signal_sql);
    plan.push_query("Trend series", series_sql);
    plan
}

#[cfg(test)]
mod tests {
    use super::super::test_support::sales_meta;
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn emits_signal_and_series_queries() {
        let meta = sales_meta();
        let intent = Intent {
            metric: Some("revenue".into()),
            time_column: Some("date".into()),
            ..Default::default()
        };
        let plan = build_trend_break_detection(&meta, &intent);
        assert_eq!(plan.queries.len(), 2);
        assert_eq!(plan.queries[1].label, "Trend series");
    }

    #[test]
    fn level_shift_reports_trend_break() {
        let meta = sales_meta();
        let intent = Intent {
            metric: Some("revenue".into()),
            time_column: Some("date".into()),
            ..Default::default()
        };
        let plan = build_trend_break_detection(&meta, &intent);

        let conn = Connection::open_in_memory().expect("memory db");
        conn.execute("CREATE TABLE data_sales (date TEXT, segment TEXT, revenue REAL)", [])
            .expect("table");
        // 21 baseline days at 100, then 7 recent days at 200.
        let mut insert = conn
            .prepare("INSERT INTO data_sales VALUES (?1, 'A', ?2)")
            .expect("stmt");
        for day in 1..=28 {
            let value = if day > 21 { 200.0 } else { 100.0 };
            insert
                .execute(rusqlite::params![format!("2025-01-{day:02}"), value])
                .expect("insert");
        }

        let signal: String = conn
            .query_row(&plan.queries[0].sql, [], |row| row.get("trend_signal"))
            .expect("one row");
        assert_eq!(signal, "trend_break");
    }
}

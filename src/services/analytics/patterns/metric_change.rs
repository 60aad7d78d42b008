//! Metric change decomposition
//!
//! Splits the last two weeks of data at `MAX(time)` into a current and a
//! prior 7-day window, sums the metric per segment in each, and returns the
//! top-N segments by absolute difference.

use super::PatternPlan;
use crate::models::{DatasetMeta, Diagnostic, DiagnosticCode, Intent};
use crate::services::analytics::helpers::{
    infer_top_n, pick_dimension_columns, pick_metric_column, pick_time_column,
};

pub fn build_metric_change_decomposition(meta: &DatasetMeta, intent: &Intent) -> PatternPlan {
    let mut plan = PatternPlan::new("metric_change_decomposition");

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
    let dimensions = pick_dimension_columns(meta, Some(time_col));
    let Some(dimension) = dimensions.first() else {
        plan.diagnostics.push(Diagnostic::new(
            DiagnosticCode::MissingDimension,
            "No segment dimension available",
        ));
        return plan;
    };

    let table = &meta.table_name;
    let top_n = infer_top_n(intent, 5);
    let sql = format!(
        r#"WITH max_date AS (
  SELECT MAX(DATE("{time_col}")) AS max_dt FROM "{table}"
),
windowed AS (
  SELECT
    COALESCE(CAST("{dimension}" AS TEXT), '(unknown)') AS segment,
    CASE
      WHEN DATE("{time_col}") > DATE((SELECT max_dt FROM max_date), '-6 day') THEN 'current'
      WHEN DATE("{time_col}") > DATE((SELECT max_dt FROM max_date), '-13 day') THEN 'prior'
      ELSE NULL
    END AS period,
    SUM(CAST("{metric}" AS REAL)) AS metric_sum
  FROM "{table}"
  WHERE DATE("{time_col}") > DATE((SELECT max_dt FROM max_date), '-13 day')
  GROUP BY segment, period
),
pivoted AS (
  SELECT
    segment,
    SUM(CASE WHEN period = 'current' THEN metric_sum ELSE 0 END) AS current_value,
    SUM(CASE WHEN period = 'prior' THEN metric_sum ELSE 0 END) AS prior_value
  FROM windowed
  GROUP BY segment
)
SELECT
  segment,
  current_value,
  prior_value,
  (current_value - prior_value) AS contribution
FROM pivoted
ORDER BY ABS(contribution) DESC
LIMIT {top_n}"#
    );

    plan.push_query("Metric change decomposition", sql);
    plan
}

#[cfg(test)]
mod tests {
    use super::super::test_support::sales_meta;
    use super::*;
    use crate::services::sql::validate_safe_select;
    use rusqlite::Connection;

    #[test]
    fn decomposition_query_executes_against_two_week_data() {
        let meta = sales_meta();
        let intent = Intent {
            raw_question: "why did revenue change".into(),
            metric: Some("revenue".into()),
            time_column: Some("date".into()),
            top_n: Some(3),
            ..Default::default()
        };
        let plan = build_metric_change_decomposition(&meta, &intent);
        assert_eq!(plan.queries.len(), 1);
        let sql = &plan.queries[0].sql;
        assert!(validate_safe_select(sql).is_ok());

        let conn = Connection::open_in_memory().expect("memory db");
        conn.execute_batch(
            r#"
            CREATE TABLE data_sales (date TEXT, segment TEXT, revenue REAL);
            INSERT INTO data_sales VALUES
                ('2025-01-01', 'A', 10), ('2025-01-02', 'A', 10),
                ('2025-01-08', 'A', 20), ('2025-01-09', 'A', 20),
                ('2025-01-01', 'B', 50), ('2025-01-08', 'B', 40);
            "#,
        )
        .expect("seed");

        let mut stmt = conn.prepare(sql).expect("valid sql");
        let names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
        assert!(names.contains(&"segment".to_string()));
        assert!(names.contains(&"contribution".to_string()));

        let count: usize = stmt.query_map([], |_| Ok(())).expect("rows").count();
        assert!(count > 0);
    }

    #[test]
    fn missing_dimension_reports_diagnostic() {
        let mut meta = sales_meta();
        meta.columns = vec!["date".into(), "revenue".into()];
        meta.schema.remove("segment");
        let plan = build_metric_change_decomposition(&meta, &Intent::default());
        assert!(plan.queries.is_empty());
        assert_eq!(plan.diagnostics[0].code, DiagnosticCode::MissingDimension);
    }
}

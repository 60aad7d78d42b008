//! Segment contribution
//!
//! Same two-window split as the decomposition pattern, plus each segment's
//! share of the total week-over-week delta. The share is 0 when the total
//! delta is zero or null.

use super::PatternPlan;
use crate::models::{DatasetMeta, Diagnostic, DiagnosticCode, Intent};
use crate::services::analytics::helpers::{
    infer_top_n, pick_dimension_columns, pick_metric_column, pick_time_column,
};

pub fn build_segment_contribution(meta: &DatasetMeta, intent: &Intent) -> PatternPlan {
    let mut plan = PatternPlan::new("segment_contribution");

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
seg AS (
  SELECT
    segment,
    SUM(CASE WHEN period = 'current' THEN metric_sum ELSE 0 END) AS current_value,
    SUM(CASE WHEN period = 'prior' THEN metric_sum ELSE 0 END) AS prior_value,
    SUM(CASE WHEN period = 'current' THEN metric_sum ELSE 0 END) - SUM(CASE WHEN period = 'prior' THEN metric_sum ELSE 0 END) AS delta
  FROM windowed
  GROUP BY segment
),
tot AS (
  SELECT SUM(delta) AS total_delta FROM seg
)
SELECT
  seg.segment,
  seg.delta,
  CASE
    WHEN tot.total_delta = 0 OR tot.total_delta IS NULL THEN 0
    ELSE seg.delta / tot.total_delta
  END AS contribution_share
FROM seg, tot
ORDER BY ABS(seg.delta) DESC
LIMIT {top_n}"#
    );

    plan.push_query("Segment contribution analysis", sql);
    plan
}

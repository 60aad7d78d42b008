//! Anomaly vs noise check
//!
//! Classifies the latest day-over-day delta of the daily metric aggregate
//! against the average absolute delta of all earlier days: `likely_anomaly`
//! at 2x the baseline or more, `likely_noise` below it, `insufficient` when
//! the baseline is null or zero.

use super::PatternPlan;
use crate::models::{DatasetMeta, Diagnostic, DiagnosticCode, Intent};
use crate::services::analytics::helpers::{pick_metric_column, pick_time_column};

pub fn build_anomaly_noise_check(meta: &DatasetMeta, intent: &Intent) -> PatternPlan {
    let mut plan = PatternPlan::new("anomaly_noise_check");

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
    let sql = format!(
        r#"WITH daily AS (
  SELECT DATE("{time_col}") AS dt, SUM(CAST("{metric}" AS REAL)) AS metric_value
  FROM "{table}"
  GROUP BY dt
  ORDER BY dt
),
deltas AS (
  SELECT dt, metric_value - LAG(metric_value) OVER (ORDER BY dt) AS delta
  FROM daily
),
stats AS (
  SELECT AVG(ABS(delta)) AS avg_abs_delta
  FROM deltas
  WHERE delta IS NOT NULL AND dt < (SELECT MAX(dt) FROM deltas)
),
latest AS (
  SELECT dt, delta
  FROM deltas
  WHERE dt = (SELECT MAX(dt) FROM deltas)
)
SELECT
  latest.dt,
  latest.delta AS latest_delta,
  stats.avg_abs_delta,
  CASE
    WHEN stats.avg_abs_delta IS NULL OR stats.avg_abs_delta = 0 THEN 'insufficient'
    WHEN ABS(latest.delta) >= 2 * stats.avg_abs_delta THEN 'likely_anomaly'
    ELSE 'likely_noise'
  END AS signal
FROM latest, stats"#
    );

    plan.push_query("Anomaly vs noise", sql);
    plan
}

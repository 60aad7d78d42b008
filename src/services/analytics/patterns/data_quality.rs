//! Data quality checks
//!
//! Three audits: per-column null/blank counts (a blank is a trimmed-empty
//! textual value), duplicate composite keys over the first two columns, and
//! time coverage (min/max/distinct days) when a time-like column exists.

use super::PatternPlan;
use crate::models::{ColumnType, DatasetMeta, Diagnostic, DiagnosticCode, Intent};
use crate::services::analytics::helpers::pick_time_column;

pub fn build_data_quality_checks(meta: &DatasetMeta, _intent: &Intent) -> PatternPlan {
    let mut plan = PatternPlan::new("data_quality_checks");
    let table = &meta.table_name;

    let missing_terms: Vec<String> = meta
        .columns
        .iter()
        .map(|column| {
            if meta.column_type(column) == Some(ColumnType::Text) {
                format!(
                    r#"SUM(CASE WHEN "{column}" IS NULL OR TRIM("{column}") = '' THEN 1 ELSE 0 END) AS missing_{column}"#
                )
            } else {
                format!(r#"SUM(CASE WHEN "{column}" IS NULL THEN 1 ELSE 0 END) AS missing_{column}"#)
            }
        })
        .collect();

    if missing_terms.is_empty() {
        plan.diagnostics.push(Diagnostic::new(
            DiagnosticCode::EmptySchema,
            "No columns available for quality checks",
        ));
        return plan;
    }

    let summary_sql = format!(
        "SELECT\n  COUNT(*) AS total_rows,\n  {}\nFROM \"{table}\"",
        missing_terms.join(", ")
    );
    plan.push_query("Data quality missingness", summary_sql);

    if meta.columns.len() >= 2 {
        let key_1 = &meta.columns[0];
        let key_2 = &meta.columns[1];
        let duplicate_sql = format!(
            r#"SELECT
  "{key_1}" AS key_1,
  "{key_2}" AS key_2,
  COUNT(*) AS duplicate_count
FROM "{table}"
GROUP BY "{key_1}", "{key_2}"
HAVING COUNT(*) > 1
ORDER BY duplicate_count DESC
LIMIT 20"#
        );
        plan.push_query("Data quality duplicate keys", duplicate_sql);
    }

    if let Some(time_col) = pick_time_column(meta, None) {
        let coverage_sql = format!(
            r#"SELECT
  MIN(DATE("{time_col}")) AS min_date,
  MAX(DATE("{time_col}")) AS max_date,
  COUNT(DISTINCT DATE("{time_col}")) AS distinct_days
FROM "{table}""#
        );
        plan.push_query("Data quality time coverage", coverage_sql);
    }

    plan
}

//! Pattern library
//!
//! Parameterised SQL templates for the recurring analytic intents: metric
//! change decomposition, segment contribution, anomaly-vs-noise checks,
//! trend break detection, and data quality audits. Each builder receives the
//! dataset shape plus the parsed intent; missing prerequisites become
//! diagnostics instead of queries.

mod anomaly_noise;
mod data_quality;
mod metric_change;
mod segment_contribution;
mod trend_break;

pub use anomaly_noise::build_anomaly_noise_check;
pub use data_quality::build_data_quality_checks;
pub use metric_change::build_metric_change_decomposition;
pub use segment_contribution::build_segment_contribution;
pub use trend_break::build_trend_break_detection;

use super::PlannedQuery;
use crate::models::{DatasetMeta, Diagnostic, Intent};

#[derive(Debug, Clone)]
pub struct PatternQuery {
    pub label: String,
    pub sql: String,
}

#[derive(Debug, Clone)]
pub struct PatternPlan {
    pub name: &'static str,
    pub queries: Vec<PatternQuery>,
    pub diagnostics: Vec<Diagnostic>,
}

impl PatternPlan {
    pub fn new(name: &'static str) -> Self {
        Self { name, queries: Vec::new(), diagnostics: Vec::new() }
    }

    pub fn push_query(&mut self, label: &str, sql: String) {
        self.queries.push(PatternQuery { label: label.to_string(), sql });
    }
}

type PatternBuilder = fn(&DatasetMeta, &Intent) -> PatternPlan;

const ALL_BUILDERS: [PatternBuilder; 5] = [
    build_metric_change_decomposition,
    build_segment_contribution,
    build_anomaly_noise_check,
    build_trend_break_detection,
    build_data_quality_checks,
];

/// Run the pattern library for a question. A question that explicitly asks
/// about data quality gets only the quality checks.
pub fn plan_analyses(meta: &DatasetMeta, intent: &Intent) -> (Vec<PlannedQuery>, Vec<Diagnostic>) {
    let keyword_text = intent.raw_question.to_lowercase();
    let quality_only =
        ["quality", "missing", "duplicate"].iter().any(|token| keyword_text.contains(token));

    let builders: &[PatternBuilder] =
        if quality_only { &[build_data_quality_checks] } else { &ALL_BUILDERS };

    let mut planned = Vec::new();
    let mut diagnostics = Vec::new();
    for build in builders {
        let plan = build(meta, intent);
        diagnostics.extend(plan.diagnostics);
        for query in plan.queries {
            planned.push(PlannedQuery {
                label: query.label,
                sql: query.sql,
                pattern: plan.name.to_string(),
            });
        }
    }

    (planned, diagnostics)
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::models::{ColumnType, DatasetMeta};
    use std::collections::HashMap;

    pub fn sales_meta() -> DatasetMeta {
        DatasetMeta {
            dataset_id: "d1".into(),
            name: "sales.csv".into(),
            table_name: "data_sales".into(),
            row_count: 6,
            columns: vec!["date".into(), "segment".into(), "revenue".into()],
            schema: HashMap::from([
                ("date".to_string(), ColumnType::Text),
                ("segment".to_string(), ColumnType::Text),
                ("revenue".to_string(), ColumnType::Real),
            ]),
            created_at: chrono::Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::sales_meta;
    use super::*;
    use crate::models::{ColumnType, DiagnosticCode};

    #[test]
    fn quality_questions_run_only_quality_checks() {
        let meta = sales_meta();
        let intent = Intent {
            raw_question: "Are there missing values in this dataset?".into(),
            ..Default::default()
        };
        let (planned, _) = plan_analyses(&meta, &intent);
        assert!(!planned.is_empty());
        assert!(planned.iter().all(|q| q.pattern == "data_quality_checks"));
    }

    #[test]
    fn full_library_runs_for_change_questions() {
        let meta = sales_meta();
        let intent = Intent {
            raw_question: "Why did revenue change last week?".into(),
            metric: Some("revenue".into()),
            time_column: Some("date".into()),
            ..Default::default()
        };
        let (planned, diagnostics) = plan_analyses(&meta, &intent);

        let patterns: Vec<&str> = planned.iter().map(|q| q.pattern.as_str()).collect();
        assert!(patterns.contains(&"metric_change_decomposition"));
        assert!(patterns.contains(&"segment_contribution"));
        assert!(patterns.contains(&"anomaly_noise_check"));
        assert!(patterns.contains(&"trend_break_detection"));
        assert!(patterns.contains(&"data_quality_checks"));
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn datasets_without_metrics_surface_diagnostics() {
        let mut meta = sales_meta();
        meta.schema.insert("revenue".to_string(), ColumnType::Text);
        let intent = Intent { raw_question: "Why the change?".into(), ..Default::default() };
        let (planned, diagnostics) = plan_analyses(&meta, &intent);

        assert!(diagnostics.iter().any(|d| d.code == DiagnosticCode::MissingMetric));
        // Quality checks need no metric and still plan.
        assert!(planned.iter().any(|q| q.pattern == "data_quality_checks"));
    }
}

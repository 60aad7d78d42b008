//! Answer synthesis
//!
//! Shapes executed SQL results into the answer payload: drivers from
//! decomposition/contribution results, a line chart from the trend series
//! (or a best-effort chart from whatever ran), SQL citations in execution
//! order, and a model-written headline/narrative grounded in the top
//! results.

use crate::models::{Chart, ChartPoint, Confidence, ContextCitation, Diagnostic, Driver, SqlArtifact};
use crate::services::llm::{ChatRequest, LlmCallResult, LlmError, ModelResponse, ModelRouter};
use crate::services::sql::QueryExecution;

const DRIVER_LIMIT: usize = 5;
const CHART_POINT_LIMIT: usize = 30;
const SYNTHESIS_RESULT_LIMIT: usize = 3;
const SYNTHESIS_CITATION_LIMIT: usize = 3;

const DEFAULT_HEADLINE: &str = "Analysis summary";
const DEFAULT_NARRATIVE: &str = "SQL results were executed and summarized.";

const SYNTHESIS_SYSTEM_PROMPT: &str = "You are a data analyst assistant. \
Only summarize what is supported by SQL results. If evidence is partial, say \
that explicitly. Return JSON with headline and narrative.";

const CHART_X_KEYS: [&str; 5] = ["segment", "x", "dt", "date", "value"];
const CHART_Y_KEYS: [&str; 5] = ["contribution", "delta", "y", "metric_value", "frequency"];

pub fn build_drivers(executed: &[QueryExecution]) -> Vec<Driver> {
    for result in executed {
        let label = result.label.to_lowercase();
        if !(label.contains("decomposition") || label.contains("contribution")) {
            continue;
        }

        let drivers: Vec<Driver> = result
            .rows
            .iter()
            .take(DRIVER_LIMIT)
            .map(|row| {
                let name = row
                    .get("segment")
                    .or_else(|| row.get("name"))
                    .and_then(|value| value.as_text())
                    .unwrap_or("segment")
                    .to_string();
                let contribution = row
                    .get("contribution")
                    .and_then(|value| value.as_f64())
                    .or_else(|| row.get("delta").and_then(|value| value.as_f64()))
                    .unwrap_or(0.0);
                Driver { name, contribution, evidence: row.to_json() }
            })
            .collect();
        if !drivers.is_empty() {
            return drivers;
        }
    }

    // No labelled decomposition result: fall back to the first result whose
    // rows carry anything numeric-coercible.
    for result in executed {
        let Some(first) = result.rows.first() else { continue };
        let Some((metric_column, _)) = first.first_numeric() else { continue };
        let metric_column = metric_column.to_string();

        return result
            .rows
            .iter()
            .take(DRIVER_LIMIT)
            .map(|row| {
                let name = row
                    .first_text(Some(metric_column.as_str()))
                    .map(|(_, value)| value.to_string())
                    .unwrap_or_else(|| "segment".to_string());
                let contribution =
                    row.get(&metric_column).and_then(|value| value.as_f64()).unwrap_or(0.0);
                Driver { name, contribution, evidence: row.to_json() }
            })
            .collect();
    }

    Vec::new()
}

pub fn build_charts(executed: &[QueryExecution]) -> Vec<Chart> {
    let mut charts = Vec::new();

    for result in executed {
        if result.label != "Trend series" {
            continue;
        }
        let mut points: Vec<ChartPoint> = result
            .rows
            .iter()
            .map(|row| ChartPoint {
                x: row.get("x").map(|value| value.to_json()).unwrap_or_default(),
                y: row.get("y").and_then(|value| value.as_f64()).unwrap_or(0.0),
            })
            .collect();
        if !points.is_empty() {
            // Series arrives newest-first; flip it for display.
            points.reverse();
            charts.push(Chart {
                kind: "line".to_string(),
                title: "Metric trend (latest 30 periods)".to_string(),
                data: points,
            });
        }
    }
    if !charts.is_empty() {
        return charts;
    }

    for result in executed {
        let Some(first) = result.rows.first() else { continue };

        let x_key = first.columns().find(|column| CHART_X_KEYS.contains(column));
        let y_key = first
            .columns()
            .find(|column| CHART_Y_KEYS.contains(column))
            .or_else(|| first.first_numeric().map(|(column, _)| column));

        if let (Some(x_key), Some(y_key)) = (x_key, y_key) {
            charts.push(Chart {
                kind: "line".to_string(),
                title: format!("{} signal", result.label),
                data: result
                    .rows
                    .iter()
                    .take(CHART_POINT_LIMIT)
                    .map(|row| ChartPoint {
                        x: row.get(x_key).map(|value| value.to_json()).unwrap_or_default(),
                        y: row.get(y_key).and_then(|value| value.as_f64()).unwrap_or(0.0),
                    })
                    .collect(),
            });
            break;
        }
    }
    charts
}

pub fn build_sql_artifacts(executed: &[QueryExecution]) -> Vec<SqlArtifact> {
    executed
        .iter()
        .map(|result| SqlArtifact { label: result.label.clone(), query: result.sql.clone() })
        .collect()
}

/// Produce the headline and narrative. With nothing executed there is no
/// evidence to summarize, so no model call is made.
pub async fn synthesize_narrative(
    router: &ModelRouter,
    request_id: &str,
    question: &str,
    executed: &[QueryExecution],
    diagnostics: &[Diagnostic],
    confidence: &Confidence,
    citations: &[ContextCitation],
) -> Result<(String, String, Option<LlmCallResult>), LlmError> {
    if executed.is_empty() {
        return Ok((
            "Insufficient evidence".to_string(),
            "No SQL query produced usable results. Upload a richer dataset or clarify \
             metric/timeframe."
                .to_string(),
            None,
        ));
    }

    let top_results: Vec<serde_json::Value> = executed
        .iter()
        .take(SYNTHESIS_RESULT_LIMIT)
        .map(|result| {
            serde_json::json!({
                "label": result.label,
                "sql": result.sql,
                "rows": result.rows,
            })
        })
        .collect();
    let payload = serde_json::json!({
        "question": question,
        "top_results": top_results,
        "diagnostics": diagnostics,
        "confidence": confidence,
        "context": citations.iter().take(SYNTHESIS_CITATION_LIMIT).collect::<Vec<_>>(),
    });

    let result = router
        .call(ChatRequest {
            request_id,
            task: "synthesize_explanation",
            system_prompt: SYNTHESIS_SYSTEM_PROMPT.to_string(),
            user_prompt: payload.to_string(),
            prefer_expensive: true,
        })
        .await?;

    let (headline, narrative) = match ModelResponse::parse_narrative(&result.text) {
        ModelResponse::Narrative(spec) => (
            spec.headline.unwrap_or_else(|| DEFAULT_HEADLINE.to_string()),
            spec.narrative
                .or(spec.summary)
                .unwrap_or_else(|| DEFAULT_NARRATIVE.to_string()),
        ),
        _ => (DEFAULT_HEADLINE.to_string(), DEFAULT_NARRATIVE.to_string()),
    };

    Ok((headline, narrative, Some(result)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LlmConfig;
    use crate::db;
    use crate::services::llm::MockProvider;
    use crate::services::sql::{Row, SqlValue};
    use std::sync::Arc;

    fn row(pairs: &[(&str, SqlValue)]) -> Row {
        let mut row = Row::new();
        for (name, value) in pairs {
            row.push(*name, value.clone());
        }
        row
    }

    fn decomposition_result() -> QueryExecution {
        QueryExecution {
            label: "Metric change decomposition".to_string(),
            sql: "SELECT 1".to_string(),
            rows: vec![
                row(&[
                    ("segment", SqlValue::Text("emea".into())),
                    ("contribution", SqlValue::Float(-120.0)),
                ]),
                row(&[
                    ("segment", SqlValue::Text("amer".into())),
                    ("contribution", SqlValue::Float(45.0)),
                ]),
            ],
        }
    }

    #[test]
    fn drivers_prefer_decomposition_results() {
        let other = QueryExecution {
            label: "Row count".to_string(),
            sql: "SELECT COUNT(*)".to_string(),
            rows: vec![row(&[("row_count", SqlValue::Int(10))])],
        };
        let drivers = build_drivers(&[other, decomposition_result()]);

        assert_eq!(drivers.len(), 2);
        assert_eq!(drivers[0].name, "emea");
        assert_eq!(drivers[0].contribution, -120.0);
        assert_eq!(drivers[0].evidence["segment"], "emea");
    }

    #[test]
    fn drivers_fall_back_to_first_numeric_result() {
        let frequency = QueryExecution {
            label: "Most common values for job".to_string(),
            sql: "SELECT 1".to_string(),
            rows: vec![row(&[
                ("value", SqlValue::Text("engineer".into())),
                ("frequency", SqlValue::Int(7)),
            ])],
        };
        let drivers = build_drivers(&[frequency]);

        assert_eq!(drivers.len(), 1);
        assert_eq!(drivers[0].name, "engineer");
        assert_eq!(drivers[0].contribution, 7.0);
    }

    #[test]
    fn trend_series_chart_is_reversed_to_ascending_time() {
        let series = QueryExecution {
            label: "Trend series".to_string(),
            sql: "SELECT 1".to_string(),
            rows: vec![
                row(&[("x", SqlValue::Text("2025-01-03".into())), ("y", SqlValue::Float(3.0))]),
                row(&[("x", SqlValue::Text("2025-01-02".into())), ("y", SqlValue::Float(2.0))]),
                row(&[("x", SqlValue::Text("2025-01-01".into())), ("y", SqlValue::Float(1.0))]),
            ],
        };
        let charts = build_charts(&[series]);

        assert_eq!(charts.len(), 1);
        assert_eq!(charts[0].kind, "line");
        assert_eq!(charts[0].data[0].x, "2025-01-01");
        assert_eq!(charts[0].data[2].y, 3.0);
    }

    #[test]
    fn fallback_chart_uses_recognized_axis_keys() {
        let charts = build_charts(&[decomposition_result()]);
        assert_eq!(charts.len(), 1);
        assert!(charts[0].title.contains("signal"));
        assert_eq!(charts[0].data[0].x, "emea");
        assert_eq!(charts[0].data[0].y, -120.0);
    }

    #[tokio::test]
    async fn empty_results_skip_the_model_call() {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("pool");
        db::init_schema(&pool).await.expect("schema");
        let router = ModelRouter::new(pool, Arc::new(MockProvider), LlmConfig::default());

        let (headline, _narrative, cost) = synthesize_narrative(
            &router,
            "req-1",
            "why?",
            &[],
            &[],
            &Confidence::default(),
            &[],
        )
        .await
        .expect("synthesize");

        assert_eq!(headline, "Insufficient evidence");
        assert!(cost.is_none());
        assert_eq!(router.ledger().entry_count().await.expect("count"), 0);
    }

    #[tokio::test]
    async fn narrative_falls_back_to_mock_summary_field() {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("pool");
        db::init_schema(&pool).await.expect("schema");
        let router = ModelRouter::new(pool, Arc::new(MockProvider), LlmConfig::default());

        let (headline, narrative, cost) = synthesize_narrative(
            &router,
            "req-2",
            "why?",
            &[decomposition_result()],
            &[],
            &Confidence::default(),
            &[],
        )
        .await
        .expect("synthesize");

        // The mock provider returns {"summary": ..., "note": ...}.
        assert_eq!(headline, "Analysis summary");
        assert!(!narrative.is_empty());
        assert!(cost.is_some());
    }
}

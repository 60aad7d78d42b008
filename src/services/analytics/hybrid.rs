//! Hybrid query planning
//!
//! Composition order: keyword heuristics first, then the pattern library for
//! change/quality questions, then model-assisted planning for advanced
//! questions (or when nothing was planned at all). Candidates are deduped on
//! whitespace-collapsed SQL, capped to the request budget, and individually
//! re-validated; rejects become diagnostics rather than failures.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use serde_json::Value;

use super::heuristics::build_heuristic_queries;
use super::patterns::plan_analyses;
use super::{PlannedQuery, helpers};
use crate::models::{DatasetMeta, Diagnostic, DiagnosticCode, Intent};
use crate::services::llm::{ChatRequest, LlmCallResult, LlmError, ModelResponse, ModelRouter};
use crate::services::sql::{validate_safe_select, validate_sql_references};

/// Question shapes worth a model-planned query.
const ADVANCED_MARKERS: [&str; 9] =
    [" by ", " over ", "trend", "compare", " vs ", "versus", "breakdown", "why", "driver"];

/// Question shapes the pattern library covers.
const PATTERN_MARKERS: [&str; 11] = [
    "change", "trend", "drop", "increase", "decrease", "anomaly", "noise", "driver", "quality",
    "missing", "duplicate",
];

const PLANNER_SYSTEM_PROMPT: &str = "You are a SQL planning assistant for SQLite. \
Given a user question and a table schema, return JSON: \
{\"queries\":[{\"label\":string,\"sql\":string}]}. \
Rules: use ONLY SELECT/CTE statements; use ONLY provided table and columns; \
prefer 1-3 queries; include aggregation/grouping when needed; \
quote identifiers with double quotes; for raw rows include LIMIT <= 200.";

#[derive(Debug, Default)]
pub struct HybridPlan {
    pub queries: Vec<PlannedQuery>,
    pub diagnostics: Vec<Diagnostic>,
    pub planner_cost: Option<LlmCallResult>,
}

pub struct HybridPlanner {
    router: Arc<ModelRouter>,
}

impl HybridPlanner {
    pub fn new(router: Arc<ModelRouter>) -> Self {
        Self { router }
    }

    pub async fn build_plan(
        &self,
        request_id: &str,
        question: &str,
        meta: &DatasetMeta,
        clarifications: &BTreeMap<String, Value>,
        intent: &Intent,
        max_queries: usize,
    ) -> Result<HybridPlan, LlmError> {
        let mut plan = HybridPlan::default();
        let mut planned: Vec<PlannedQuery> = Vec::new();

        planned.extend(build_heuristic_queries(question, meta));

        if question_triggers_patterns(question) {
            let normalized = normalize_intent(intent, meta, clarifications);
            let (pattern_queries, pattern_diagnostics) = plan_analyses(meta, &normalized);
            planned.extend(pattern_queries);
            plan.diagnostics.extend(pattern_diagnostics);
        }

        if question_needs_advanced_planning(question) || planned.is_empty() {
            let payload = serde_json::json!({
                "question": question,
                "table_name": meta.table_name,
                "columns": meta.columns,
                "schema": meta.schema,
                "clarifications": clarifications,
            });
            let result = self
                .router
                .call(ChatRequest {
                    request_id,
                    task: "plan_sql_queries",
                    system_prompt: PLANNER_SYSTEM_PROMPT.to_string(),
                    user_prompt: payload.to_string(),
                    prefer_expensive: false,
                })
                .await?;

            let model_queries = match ModelResponse::parse_plan(&result.text) {
                ModelResponse::Plan(spec) => spec
                    .queries
                    .into_iter()
                    .map(|q| PlannedQuery {
                        label: q.label,
                        sql: q.sql,
                        pattern: "llm_dynamic".to_string(),
                    })
                    .collect(),
                _ => Vec::new(),
            };
            if model_queries.is_empty() {
                plan.diagnostics.push(Diagnostic::new(
                    DiagnosticCode::LlmPlanEmpty,
                    "Dynamic SQL planner returned no usable queries.",
                ));
            }
            planned.extend(model_queries);
            plan.planner_cost = Some(result);
        }

        let mut planned = dedupe_queries(planned);
        planned.truncate(max_queries);

        for query in planned {
            if let Err(rejection) = validate_safe_select(&query.sql) {
                plan.diagnostics.push(Diagnostic::new(
                    DiagnosticCode::UnsafeSqlPlan,
                    format!("{}: {}", query.label, rejection),
                ));
                continue;
            }
            if let Err(rejection) =
                validate_sql_references(&query.sql, &meta.table_name, &meta.columns)
            {
                plan.diagnostics.push(Diagnostic::new(
                    DiagnosticCode::InvalidSqlReferences,
                    format!("{}: {}", query.label, rejection),
                ));
                continue;
            }
            plan.queries.push(query);
        }

        if plan.queries.is_empty() {
            plan.diagnostics.push(Diagnostic::new(
                DiagnosticCode::NoValidSqlPlan,
                "Unable to produce a safe SQL plan for this question and schema.",
            ));
        }

        Ok(plan)
    }
}

fn question_triggers_patterns(question: &str) -> bool {
    let lowered = question.to_lowercase();
    PATTERN_MARKERS.iter().any(|marker| lowered.contains(marker))
}

fn question_needs_advanced_planning(question: &str) -> bool {
    let lowered = question.to_lowercase();
    ADVANCED_MARKERS.iter().any(|marker| lowered.contains(marker))
}

/// Fill metric/time gaps from clarifications or the first suitable column so
/// the pattern builders see a complete intent.
fn normalize_intent(
    intent: &Intent,
    meta: &DatasetMeta,
    clarifications: &BTreeMap<String, Value>,
) -> Intent {
    let clarified = |key: &str| clarifications.get(key).and_then(Value::as_str);

    let mut normalized = intent.clone();
    if normalized.metric.is_none() {
        normalized.metric =
            helpers::pick_metric_column(meta, clarified("metric")).map(str::to_string);
    }
    if normalized.time_column.is_none() {
        normalized.time_column =
            helpers::pick_time_column(meta, clarified("time_column")).map(str::to_string);
    }
    normalized
}

fn dedupe_queries(queries: Vec<PlannedQuery>) -> Vec<PlannedQuery> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut output = Vec::new();
    for query in queries {
        let normalized = query.sql.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
        if seen.insert(normalized) {
            output.push(query);
        }
    }
    output
}

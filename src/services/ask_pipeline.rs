//! Ask pipeline orchestrator
//!
//! An explicit stage machine threads one request through the core:
//!
//! ```text
//! check_dataset_ready ──(not ready)──────────────► finalize
//!        │
//!        ▼
//! decide_need_clarification ──(needs input)──────► finalize
//!        │
//!        ▼
//! parse_intent → plan_analyses → execute_queries
//!        → validate_results → retrieve_context
//!        → synthesize_explanation → finalize
//! ```
//!
//! Recoverable problems (rejected queries, SQL failures, missing columns)
//! become diagnostics and the pipeline keeps going; budget, disabled-model,
//! and storage errors unwind the whole request. The orchestrator owns all
//! mutable per-request state; stages run strictly in sequence because the
//! confidence grade depends on totals across the full plan.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use super::analytics::{HybridPlanner, PlannedQuery, grade_results};
use super::answer_service;
use super::context_service::ContextService;
use super::dataset_service::DatasetService;
use super::llm::{ChatRequest, LlmCallResult, LlmError, ModelResponse, ModelRouter, round_usd};
use super::sql::{PlanItem, QueryEngine, QueryExecution, SqlExecutionError};
use crate::models::{
    AnswerPayload, ClarificationQuestion, Confidence, ContextCitation, CostSummary, DatasetMeta,
    Diagnostic, DiagnosticCode, Intent,
};

const INTENT_SYSTEM_PROMPT: &str =
    "Extract analysis intent from the question. Return JSON with metric, timeframe, dimensions, top_n.";

/// Question words implying a numeric metric is being analyzed.
const NUMERIC_METRIC_TOKENS: [&str; 10] = [
    "average", "mean", "sum", "total", "median", "trend", "change", "increase", "decrease", "drop",
];

/// Question words implying change over time.
const CHANGE_TOKENS: [&str; 7] =
    ["change", "trend", "drop", "increase", "decrease", "week", "month"];

#[derive(Debug, Error)]
pub enum AskError {
    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Per-request accumulator of model names (first-use order), token counts,
/// and spend. Only ever added to, so the USD total is monotone.
#[derive(Debug, Clone, Default)]
pub struct CostTrace {
    pub models: Vec<String>,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub usd: f64,
}

impl CostTrace {
    pub fn add(&mut self, result: &LlmCallResult) {
        if !self.models.contains(&result.model) {
            self.models.push(result.model.clone());
        }
        self.prompt_tokens += result.prompt_tokens;
        self.completion_tokens += result.completion_tokens;
        self.usd += result.usd;
    }

    pub fn summary(&self) -> CostSummary {
        CostSummary {
            model: self.models.join(","),
            prompt_tokens: self.prompt_tokens,
            completion_tokens: self.completion_tokens,
            usd: round_usd(self.usd),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PipelineStatus {
    Ok,
    DatasetNotReady,
}

/// What one pipeline run produced, pre-transport.
#[derive(Debug)]
pub struct AskOutcome {
    pub request_id: String,
    pub conversation_id: String,
    pub needs_clarification: bool,
    pub clarification_questions: Vec<ClarificationQuestion>,
    pub answer: Option<AnswerPayload>,
    pub diagnostics: Vec<Diagnostic>,
    pub cost_trace: CostTrace,
}

struct AskState {
    request_id: String,
    conversation_id: String,
    question: String,
    clarifications: BTreeMap<String, Value>,
    status: PipelineStatus,
    meta: Option<DatasetMeta>,
    needs_clarification: bool,
    clarification_questions: Vec<ClarificationQuestion>,
    intent: Intent,
    planned: Vec<PlannedQuery>,
    executed: Vec<QueryExecution>,
    execution_errors: Vec<Diagnostic>,
    diagnostics: Vec<Diagnostic>,
    confidence: Confidence,
    citations: Vec<ContextCitation>,
    answer: Option<AnswerPayload>,
    cost: CostTrace,
}

enum Stage {
    CheckDatasetReady,
    DecideClarification,
    ParseIntent,
    PlanAnalyses,
    ExecuteQueries,
    ValidateResults,
    RetrieveContext,
    Synthesize,
    Finalize,
    Done,
}

pub struct AskPipeline {
    datasets: Arc<DatasetService>,
    engine: Arc<QueryEngine>,
    router: Arc<ModelRouter>,
    planner: HybridPlanner,
    context: Arc<ContextService>,
    max_queries_per_request: usize,
}

impl AskPipeline {
    pub fn new(
        datasets: Arc<DatasetService>,
        engine: Arc<QueryEngine>,
        router: Arc<ModelRouter>,
        context: Arc<ContextService>,
    ) -> Self {
        let max_queries_per_request = engine.max_per_request();
        Self {
            datasets,
            engine,
            planner: HybridPlanner::new(Arc::clone(&router)),
            router,
            context,
            max_queries_per_request,
        }
    }

    pub async fn run(
        &self,
        question: &str,
        conversation_id: Option<String>,
        clarifications: Option<BTreeMap<String, Value>>,
        request_id: Option<String>,
    ) -> Result<AskOutcome, AskError> {
        let mut state = AskState {
            request_id: request_id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            conversation_id: conversation_id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            question: question.to_string(),
            clarifications: clarifications.unwrap_or_default(),
            status: PipelineStatus::Ok,
            meta: None,
            needs_clarification: false,
            clarification_questions: Vec::new(),
            intent: Intent::default(),
            planned: Vec::new(),
            executed: Vec::new(),
            execution_errors: Vec::new(),
            diagnostics: Vec::new(),
            confidence: Confidence::default(),
            citations: Vec::new(),
            answer: None,
            cost: CostTrace::default(),
        };

        let mut stage = Stage::CheckDatasetReady;
        loop {
            stage = match stage {
                Stage::CheckDatasetReady => {
                    self.check_dataset_ready(&mut state).await?;
                    if state.status == PipelineStatus::DatasetNotReady {
                        Stage::Finalize
                    } else {
                        Stage::DecideClarification
                    }
                },
                Stage::DecideClarification => {
                    self.decide_need_clarification(&mut state);
                    if state.needs_clarification { Stage::Finalize } else { Stage::ParseIntent }
                },
                Stage::ParseIntent => {
                    self.parse_intent(&mut state).await?;
                    Stage::PlanAnalyses
                },
                Stage::PlanAnalyses => {
                    self.plan_analyses(&mut state).await?;
                    Stage::ExecuteQueries
                },
                Stage::ExecuteQueries => {
                    self.execute_queries(&mut state).await;
                    Stage::ValidateResults
                },
                Stage::ValidateResults => {
                    self.validate_results(&mut state);
                    Stage::RetrieveContext
                },
                Stage::RetrieveContext => {
                    self.retrieve_context(&mut state).await?;
                    Stage::Synthesize
                },
                Stage::Synthesize => {
                    self.synthesize_explanation(&mut state).await?;
                    Stage::Finalize
                },
                Stage::Finalize => {
                    self.finalize_response(&mut state);
                    Stage::Done
                },
                Stage::Done => break,
            };
        }

        Ok(AskOutcome {
            request_id: state.request_id,
            conversation_id: state.conversation_id,
            needs_clarification: state.needs_clarification,
            clarification_questions: state.clarification_questions,
            answer: state.answer,
            diagnostics: state.diagnostics,
            cost_trace: state.cost,
        })
    }

    async fn check_dataset_ready(&self, state: &mut AskState) -> Result<(), AskError> {
        match self.datasets.get_meta().await? {
            Some(meta) => {
                state.meta = Some(meta);
                state.status = PipelineStatus::Ok;
            },
            None => {
                state.diagnostics.push(Diagnostic::new(
                    DiagnosticCode::DatasetNotReady,
                    "Upload a CSV dataset first using POST /api/upload/dataset.",
                ));
                state.status = PipelineStatus::DatasetNotReady;
            },
        }
        Ok(())
    }

    fn decide_need_clarification(&self, state: &mut AskState) {
        let meta = state.meta.as_ref().expect("dataset checked before clarification");
        let question = state.question.to_lowercase();
        let clarified = |key: &str| {
            state
                .clarifications
                .get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
        };

        let numeric_columns: Vec<String> =
            meta.numeric_columns().iter().map(|c| c.to_string()).collect();
        let mentioned_metric = numeric_columns
            .iter()
            .find(|column| question.contains(&column.to_lowercase()))
            .cloned();
        let selected_metric = clarified("metric").or(mentioned_metric);

        let time_columns: Vec<String> =
            meta.time_like_columns().iter().map(|c| c.to_string()).collect();
        let mut selected_time = clarified("time_column").or_else(|| {
            time_columns
                .iter()
                .find(|column| question.contains(&column.to_lowercase()))
                .cloned()
        });
        if selected_time.is_none() && time_columns.len() == 1 {
            selected_time = Some(time_columns[0].clone());
        }

        state.intent.column_mention = meta
            .columns
            .iter()
            .find(|column| question.contains(&column.to_lowercase()))
            .cloned();

        let mut questions = Vec::new();
        let asks_numeric_metric =
            NUMERIC_METRIC_TOKENS.iter().any(|token| question.contains(token));
        if asks_numeric_metric && selected_metric.is_none() && numeric_columns.len() > 1 {
            questions.push(ClarificationQuestion::select(
                "metric",
                "Which metric should be analyzed?",
                numeric_columns.clone(),
            ));
        }

        let asks_change = CHANGE_TOKENS.iter().any(|token| question.contains(token));
        if asks_change && selected_time.is_none() && time_columns.len() > 1 {
            questions.push(ClarificationQuestion::select(
                "time_column",
                "Which column should be treated as time?",
                time_columns.clone(),
            ));
        }

        state.needs_clarification = !questions.is_empty();
        state.clarification_questions = questions;
        if selected_metric.is_some() {
            state.intent.metric = selected_metric;
        }
        if selected_time.is_some() {
            state.intent.time_column = selected_time;
        }
    }

    async fn parse_intent(&self, state: &mut AskState) -> Result<(), AskError> {
        let result = self
            .router
            .call(ChatRequest {
                request_id: &state.request_id,
                task: "parse_intent",
                system_prompt: INTENT_SYSTEM_PROMPT.to_string(),
                user_prompt: state.question.clone(),
                prefer_expensive: false,
            })
            .await?;
        state.cost.add(&result);

        // Clarification-resolved fields always win over the model's guess.
        if let ModelResponse::Intent(parsed) = ModelResponse::parse_intent(&result.text) {
            if state.intent.metric.is_none() {
                state.intent.metric = parsed.metric;
            }
            if state.intent.time_column.is_none() {
                state.intent.time_column = parsed.time_column;
            }
            if state.intent.dimensions.is_empty() {
                state.intent.dimensions = parsed.dimensions.unwrap_or_default();
            }
            if state.intent.top_n.is_none() {
                state.intent.top_n = parsed.top_n;
            }
        }
        state.intent.raw_question = state.question.clone();
        Ok(())
    }

    async fn plan_analyses(&self, state: &mut AskState) -> Result<(), AskError> {
        let meta = state.meta.as_ref().expect("dataset checked before planning");
        let plan = self
            .planner
            .build_plan(
                &state.request_id,
                &state.question,
                meta,
                &state.clarifications,
                &state.intent,
                self.max_queries_per_request,
            )
            .await?;

        if let Some(cost) = &plan.planner_cost {
            state.cost.add(cost);
        }
        state.planned = plan.queries;
        state.diagnostics.extend(plan.diagnostics);
        Ok(())
    }

    async fn execute_queries(&self, state: &mut AskState) {
        if state.planned.len() > self.max_queries_per_request {
            state.execution_errors.push(Diagnostic::new(
                DiagnosticCode::QueryBudgetExceeded,
                format!(
                    "Planned {} queries, budget is {}. Trimming plan.",
                    state.planned.len(),
                    self.max_queries_per_request
                ),
            ));
            state.planned.truncate(self.max_queries_per_request);
        }

        let items: Vec<PlanItem> = state
            .planned
            .iter()
            .map(|query| PlanItem { label: query.label.clone(), sql: query.sql.clone() })
            .collect();
        match self.engine.run_plan(&items).await {
            Ok(outcome) => {
                state.executed = outcome.executed;
                state.execution_errors.extend(outcome.errors);
            },
            Err(SqlExecutionError::QueryBudgetExceeded) => {
                // Trimmed above, so only reachable if the budget shrinks
                // mid-request; record it the same way.
                state.execution_errors.push(Diagnostic::new(
                    DiagnosticCode::QueryBudgetExceeded,
                    "Query budget exceeded",
                ));
            },
            Err(other) => {
                state.execution_errors.push(Diagnostic::new(
                    DiagnosticCode::SqlExecutionError,
                    other.to_string(),
                ));
            },
        }
    }

    fn validate_results(&self, state: &mut AskState) {
        let (confidence, diagnostics) = grade_results(
            state.planned.len(),
            &state.executed,
            &state.execution_errors,
            &state.diagnostics,
        );
        state.confidence = confidence;
        state.diagnostics = diagnostics;
    }

    async fn retrieve_context(&self, state: &mut AskState) -> Result<(), AskError> {
        state.citations = self
            .context
            .retrieve(&state.question, self.context.top_k())
            .await?;
        Ok(())
    }

    async fn synthesize_explanation(&self, state: &mut AskState) -> Result<(), AskError> {
        let (headline, narrative, synthesis_cost) = answer_service::synthesize_narrative(
            &self.router,
            &state.request_id,
            &state.question,
            &state.executed,
            &state.diagnostics,
            &state.confidence,
            &state.citations,
        )
        .await?;
        if let Some(cost) = &synthesis_cost {
            state.cost.add(cost);
        }

        state.answer = Some(AnswerPayload {
            headline,
            narrative,
            drivers: answer_service::build_drivers(&state.executed),
            charts: answer_service::build_charts(&state.executed),
            sql: answer_service::build_sql_artifacts(&state.executed),
            confidence: state.confidence.clone(),
            diagnostics: state.diagnostics.clone(),
            cost: state.cost.summary(),
            context_citations: state.citations.clone(),
        });
        Ok(())
    }

    fn finalize_response(&self, state: &mut AskState) {
        if state.needs_clarification {
            state.answer = None;
            return;
        }

        if state.status == PipelineStatus::DatasetNotReady {
            state.confidence = Confidence::insufficient("No dataset available.");
            state.answer = Some(AnswerPayload {
                headline: "Dataset required".to_string(),
                narrative: "Upload a CSV dataset using POST /api/upload/dataset before asking \
                            analysis questions."
                    .to_string(),
                drivers: Vec::new(),
                charts: Vec::new(),
                sql: Vec::new(),
                confidence: state.confidence.clone(),
                diagnostics: state.diagnostics.clone(),
                cost: state.cost.summary(),
                context_citations: Vec::new(),
            });
        }
    }
}

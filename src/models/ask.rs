//! Ask API models
//!
//! Request/response types for `POST /api/ask` plus the per-request state the
//! pipeline accumulates: diagnostics, confidence grades, drivers, charts,
//! SQL citations, and the cost trace.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

// ============================================================================
// Diagnostics
// ============================================================================

/// Stable diagnostic symbols surfaced in API output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiagnosticCode {
    DatasetNotReady,
    NoAnalysisPlan,
    NoQueryResults,
    EmptyResults,
    QueryBudgetExceeded,
    SqlExecutionError,
    UnsafeSqlPlan,
    InvalidSqlReferences,
    MissingMetric,
    MissingTimeColumn,
    MissingDimension,
    LlmPlanEmpty,
    NoValidSqlPlan,
    EmptySchema,
}

impl DiagnosticCode {
    /// Codes that downgrade an otherwise-successful run to `insufficient`.
    pub fn is_partial_failure(&self) -> bool {
        matches!(
            self,
            Self::MissingMetric
                | Self::MissingTimeColumn
                | Self::MissingDimension
                | Self::SqlExecutionError
                | Self::QueryBudgetExceeded
                | Self::EmptyResults
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Diagnostic {
    pub code: DiagnosticCode,
    pub message: String,
}

impl Diagnostic {
    pub fn new(code: DiagnosticCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }
}

// ============================================================================
// Confidence
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLevel {
    High,
    Medium,
    Low,
    Insufficient,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Confidence {
    pub level: ConfidenceLevel,
    pub reasons: Vec<String>,
}

impl Confidence {
    pub fn insufficient(reason: impl Into<String>) -> Self {
        Self { level: ConfidenceLevel::Insufficient, reasons: vec![reason.into()] }
    }
}

impl Default for Confidence {
    fn default() -> Self {
        Self { level: ConfidenceLevel::Insufficient, reasons: Vec::new() }
    }
}

// ============================================================================
// Answer building blocks
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Driver {
    pub name: String,
    pub contribution: f64,
    /// The source row backing this driver, as returned by SQL.
    #[schema(value_type = Object)]
    pub evidence: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChartPoint {
    #[schema(value_type = Object)]
    pub x: Value,
    pub y: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Chart {
    pub kind: String,
    pub title: String,
    pub data: Vec<ChartPoint>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SqlArtifact {
    pub label: String,
    pub query: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CostSummary {
    /// Comma-joined model names in first-use order.
    pub model: String,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub usd: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ContextCitation {
    pub doc_id: String,
    pub filename: String,
    pub chunk_id: String,
    pub score: f64,
    pub snippet: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AnswerPayload {
    pub headline: String,
    pub narrative: String,
    pub drivers: Vec<Driver>,
    pub charts: Vec<Chart>,
    pub sql: Vec<SqlArtifact>,
    pub confidence: Confidence,
    pub diagnostics: Vec<Diagnostic>,
    pub cost: CostSummary,
    pub context_citations: Vec<ContextCitation>,
}

// ============================================================================
// Clarifications
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ClarificationQuestion {
    pub key: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub prompt: String,
    pub options: Vec<String>,
}

impl ClarificationQuestion {
    pub fn select(key: &str, prompt: &str, options: Vec<String>) -> Self {
        Self {
            key: key.to_string(),
            kind: "select".to_string(),
            prompt: prompt.to_string(),
            options,
        }
    }
}

// ============================================================================
// Intent
// ============================================================================

/// Analysis intent assembled from the question, the intent-extraction model
/// call, and caller-supplied clarifications. Clarifications always win.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Intent {
    pub raw_question: String,
    pub metric: Option<String>,
    pub time_column: Option<String>,
    #[serde(default)]
    pub dimensions: Vec<String>,
    pub top_n: Option<i64>,
    pub column_mention: Option<String>,
}

// ============================================================================
// Request / response envelope
// ============================================================================

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct AskRequest {
    pub question: String,
    pub conversation_id: Option<String>,
    /// Answers to previously-offered clarification questions, keyed by
    /// clarification key (`metric`, `time_column`, ...). Sorted keys keep the
    /// cache key canonical.
    #[schema(value_type = Option<Object>)]
    pub clarifications: Option<BTreeMap<String, Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AskResponse {
    pub conversation_id: String,
    pub needs_clarification: bool,
    pub clarification_questions: Vec<ClarificationQuestion>,
    pub answer: Option<AnswerPayload>,
}

//! Model-boundary types
//!
//! Everything a model returns is untyped text; these types pin it down. A
//! response is parsed into the expected tagged variant and falls back to
//! `Raw` when the text is not the expected JSON shape — callers branch on
//! the variant instead of poking at dynamic JSON.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize)]
pub struct LlmPrompt {
    pub system: String,
    pub user: String,
}

/// Outcome of one routed model call, token- and cost-accounted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmCallResult {
    pub text: String,
    pub model: String,
    pub provider: String,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub usd: f64,
}

/// One SQL suggestion from the planning model.
#[derive(Debug, Clone)]
pub struct PlanSpecQuery {
    pub label: String,
    pub sql: String,
}

/// `{"queries":[{"label":..., "sql":...}]}` from the planning task.
#[derive(Debug, Clone, Default)]
pub struct PlanSpec {
    pub queries: Vec<PlanSpecQuery>,
}

/// `{"headline":..., "narrative"|"summary":...}` from the synthesis task.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NarrativeSpec {
    pub headline: Option<String>,
    pub narrative: Option<String>,
    pub summary: Option<String>,
}

/// Partial intent extracted by the cheap model; merged under clarifications.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct IntentSpec {
    pub metric: Option<String>,
    pub time_column: Option<String>,
    pub dimensions: Option<Vec<String>>,
    pub top_n: Option<i64>,
}

/// Tagged shape of a parsed model response.
#[derive(Debug, Clone)]
pub enum ModelResponse {
    Plan(PlanSpec),
    Narrative(NarrativeSpec),
    Intent(IntentSpec),
    Raw(String),
}

impl ModelResponse {
    /// Parse a planning response. Tolerates missing labels and skips
    /// malformed entries; anything that is not a JSON object becomes `Raw`.
    pub fn parse_plan(text: &str) -> Self {
        let Ok(Value::Object(map)) = serde_json::from_str::<Value>(text) else {
            return Self::Raw(text.to_string());
        };

        let mut spec = PlanSpec::default();
        if let Some(Value::Array(items)) = map.get("queries") {
            for item in items {
                let Value::Object(entry) = item else { continue };
                let sql = entry
                    .get("sql")
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .unwrap_or_default();
                if sql.is_empty() {
                    continue;
                }
                let label = entry
                    .get("label")
                    .or_else(|| entry.get("purpose"))
                    .and_then(Value::as_str)
                    .unwrap_or("Generated analysis");
                spec.queries.push(PlanSpecQuery {
                    label: label.to_string(),
                    sql: sql.to_string(),
                });
            }
        }
        Self::Plan(spec)
    }

    pub fn parse_narrative(text: &str) -> Self {
        match serde_json::from_str::<NarrativeSpec>(text) {
            Ok(spec) => Self::Narrative(spec),
            Err(_) => Self::Raw(text.to_string()),
        }
    }

    pub fn parse_intent(text: &str) -> Self {
        match serde_json::from_str::<IntentSpec>(text) {
            Ok(spec) => Self::Intent(spec),
            Err(_) => Self::Raw(text.to_string()),
        }
    }
}

/// Round a USD amount to 8 decimal places, the ledger's precision.
pub fn round_usd(value: f64) -> f64 {
    (value * 1e8).round() / 1e8
}

/// Token estimate used before a provider reports real usage.
pub fn whitespace_token_count(text: &str) -> i64 {
    text.split_whitespace().count() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_parse_collects_labelled_queries() {
        let text = r#"{"queries":[
            {"label":"Top segments","sql":"SELECT 1"},
            {"purpose":"fallback label","sql":"SELECT 2"},
            {"sql":"   "},
            "not-an-object"
        ]}"#;
        let ModelResponse::Plan(spec) = ModelResponse::parse_plan(text) else {
            panic!("expected plan variant");
        };
        assert_eq!(spec.queries.len(), 2);
        assert_eq!(spec.queries[0].label, "Top segments");
        assert_eq!(spec.queries[1].label, "fallback label");
    }

    #[test]
    fn plan_parse_of_non_json_is_raw() {
        assert!(matches!(ModelResponse::parse_plan("not json"), ModelResponse::Raw(_)));
    }

    #[test]
    fn object_without_queries_is_an_empty_plan() {
        let ModelResponse::Plan(spec) = ModelResponse::parse_plan(r#"{"summary":"hi"}"#) else {
            panic!("expected plan variant");
        };
        assert!(spec.queries.is_empty());
    }

    #[test]
    fn narrative_parse_keeps_summary_fallback() {
        let ModelResponse::Narrative(spec) =
            ModelResponse::parse_narrative(r#"{"summary":"short answer"}"#)
        else {
            panic!("expected narrative variant");
        };
        assert_eq!(spec.summary.as_deref(), Some("short answer"));
        assert!(spec.headline.is_none());
    }

    #[test]
    fn usd_rounds_to_eight_decimals() {
        assert_eq!(round_usd(0.123456789), 0.12345679);
        assert_eq!(round_usd(0.0000000049), 0.0);
    }
}

//! Keyword heuristics
//!
//! One-shot SQL for the simple question shapes: "most common X",
//! "average/sum/max/min of X", and "how many rows". Emits at most one query
//! and only when the target column is unambiguous.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;

use super::PlannedQuery;
use crate::models::DatasetMeta;

static WORD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[a-zA-Z0-9_]+").expect("valid regex"));

const FREQUENCY_INTENTS: [&str; 6] = ["common", "frequent", "frequency", "popular", "mode", "top"];

const AGGREGATE_INTENTS: [(&str, &str); 8] = [
    ("average", "AVG"),
    ("mean", "AVG"),
    ("sum", "SUM"),
    ("total", "SUM"),
    ("max", "MAX"),
    ("highest", "MAX"),
    ("min", "MIN"),
    ("lowest", "MIN"),
];

fn tokenize(text: &str) -> HashSet<String> {
    WORD_RE
        .find_iter(&text.to_lowercase())
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Columns whose names appear verbatim (case-insensitive) in the question,
/// in header order.
fn mentioned_columns<'a>(question: &str, columns: &'a [String]) -> Vec<&'a str> {
    let lowered = question.to_lowercase();
    columns
        .iter()
        .filter(|column| lowered.contains(&column.to_lowercase()))
        .map(String::as_str)
        .collect()
}

fn frequency_query(table_name: &str, column: &str) -> PlannedQuery {
    let sql = format!(
        r#"SELECT
  COALESCE(CAST("{column}" AS TEXT), '(null)') AS value,
  COUNT(*) AS frequency
FROM "{table_name}"
GROUP BY value
ORDER BY frequency DESC, value ASC
LIMIT 20"#
    );
    PlannedQuery {
        label: format!("Most common values for {column}"),
        sql,
        pattern: "heuristic_frequency".to_string(),
    }
}

fn aggregate_query(table_name: &str, column: &str, function: &str) -> PlannedQuery {
    PlannedQuery {
        label: format!("{function} for {column}"),
        sql: format!(r#"SELECT {function}(CAST("{column}" AS REAL)) AS value FROM "{table_name}""#),
        pattern: "heuristic_numeric".to_string(),
    }
}

pub fn build_heuristic_queries(question: &str, meta: &DatasetMeta) -> Vec<PlannedQuery> {
    let tokens = tokenize(question);
    let mentioned = mentioned_columns(question, &meta.columns);

    let text_columns = meta.text_columns();
    let numeric_columns = meta.numeric_columns();

    if FREQUENCY_INTENTS.iter().any(|intent| tokens.contains(*intent)) {
        let target = mentioned
            .iter()
            .find(|column| text_columns.contains(column))
            .copied()
            .or_else(|| (text_columns.len() == 1).then(|| text_columns[0]));
        if let Some(target) = target {
            return vec![frequency_query(&meta.table_name, target)];
        }
    }

    let requested_aggregate = AGGREGATE_INTENTS
        .iter()
        .find(|(token, _)| tokens.contains(*token))
        .map(|(_, function)| *function);
    if let Some(function) = requested_aggregate {
        let target = mentioned
            .iter()
            .find(|column| numeric_columns.contains(column))
            .copied()
            .or_else(|| (numeric_columns.len() == 1).then(|| numeric_columns[0]));
        if let Some(target) = target {
            return vec![aggregate_query(&meta.table_name, target, function)];
        }
    }

    if tokens.contains("count") || (tokens.contains("how") && tokens.contains("many")) {
        return vec![PlannedQuery {
            label: "Row count".to_string(),
            sql: format!(r#"SELECT COUNT(*) AS row_count FROM "{}""#, meta.table_name),
            pattern: "heuristic_count".to_string(),
        }];
    }

    Vec::new()
}

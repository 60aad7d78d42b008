//! Column selection helpers shared by the pattern builders.
//!
//! Tie-breaks always follow CSV header order: "first numeric column" means
//! the first one the ingested file declared.

use crate::models::{DatasetMeta, Intent};

/// Preferred metric if it is numeric, otherwise the first numeric column.
pub fn pick_metric_column<'a>(meta: &'a DatasetMeta, preferred: Option<&str>) -> Option<&'a str> {
    let numeric = meta.numeric_columns();
    if let Some(preferred) = preferred
        && let Some(found) = numeric.iter().find(|c| **c == preferred)
    {
        return Some(found);
    }
    numeric.first().copied()
}

/// Preferred time column if it exists, otherwise the first time-like column.
pub fn pick_time_column<'a>(meta: &'a DatasetMeta, preferred: Option<&str>) -> Option<&'a str> {
    if let Some(preferred) = preferred
        && let Some(found) = meta.columns.iter().find(|c| c.as_str() == preferred)
    {
        return Some(found.as_str());
    }
    meta.time_like_columns().first().copied()
}

/// Textual columns usable as segment dimensions, minus an optional exclusion
/// (typically the time column).
pub fn pick_dimension_columns<'a>(meta: &'a DatasetMeta, exclude: Option<&str>) -> Vec<&'a str> {
    meta.text_columns()
        .into_iter()
        .filter(|c| Some(*c) != exclude)
        .collect()
}

pub fn infer_top_n(intent: &Intent, default: i64) -> i64 {
    intent.top_n.unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ColumnType;
    use std::collections::HashMap;

    fn meta() -> DatasetMeta {
        DatasetMeta {
            dataset_id: "d1".into(),
            name: "sample.csv".into(),
            table_name: "data_d1".into(),
            row_count: 4,
            columns: vec!["order_date".into(), "segment".into(), "revenue".into(), "profit".into()],
            schema: HashMap::from([
                ("order_date".to_string(), ColumnType::Text),
                ("segment".to_string(), ColumnType::Text),
                ("revenue".to_string(), ColumnType::Real),
                ("profit".to_string(), ColumnType::Real),
            ]),
            created_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn metric_prefers_requested_numeric_column() {
        let meta = meta();
        assert_eq!(pick_metric_column(&meta, Some("profit")), Some("profit"));
        assert_eq!(pick_metric_column(&meta, Some("segment")), Some("revenue"));
        assert_eq!(pick_metric_column(&meta, None), Some("revenue"));
    }

    #[test]
    fn time_column_falls_back_to_first_time_like() {
        let meta = meta();
        assert_eq!(pick_time_column(&meta, None), Some("order_date"));
        assert_eq!(pick_time_column(&meta, Some("missing")), Some("order_date"));
    }

    #[test]
    fn dimensions_exclude_the_time_column() {
        let meta = meta();
        assert_eq!(pick_dimension_columns(&meta, Some("order_date")), vec!["segment"]);
    }
}

//! SQL safety and execution
//!
//! Everything that touches the physical dataset table goes through this
//! module: the two-stage safety validator, the reference checker, and the
//! row/time-bounded executor.

pub mod executor;
pub mod validator;

use serde::Serialize;
use serde::ser::SerializeMap;
use serde_json::Value;

pub use executor::{PlanItem, PlanOutcome, QueryEngine, QueryExecution, SqlExecutionError};
pub use validator::{ValidationRejected, validate_safe_select, validate_sql_references};

/// A single SQL cell value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SqlValue {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
}

impl SqlValue {
    /// Coerce to f64 where possible: numbers directly, text via parsing.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Null => None,
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Text(v) => v.trim().parse().ok(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// One result row: ordered `(column, value)` pairs, serialized as a JSON map.
///
/// Order matters for "first numeric / first textual" lookups in driver and
/// chart synthesis, so this is not a HashMap.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row(Vec<(String, SqlValue)>);

impl Row {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, column: impl Into<String>, value: SqlValue) {
        self.0.push((column.into(), value));
    }

    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.0.iter().find(|(name, _)| name == column).map(|(_, v)| v)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SqlValue)> {
        self.0.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// First column whose value coerces to a number, with that number.
    pub fn first_numeric(&self) -> Option<(&str, f64)> {
        self.iter().find_map(|(name, value)| value.as_f64().map(|v| (name, v)))
    }

    /// First column holding text, optionally skipping one column name.
    pub fn first_text(&self, exclude: Option<&str>) -> Option<(&str, &str)> {
        self.iter()
            .filter(|(name, _)| Some(*name) != exclude)
            .find_map(|(name, value)| value.as_text().map(|v| (name, v)))
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

impl Serialize for Row {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, value) in &self.0 {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

impl FromIterator<(String, SqlValue)> for Row {
    fn from_iter<T: IntoIterator<Item = (String, SqlValue)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

//! A decoded query result row: a column-name-to-value map with typed
//! accessors, independent of which driver produced it.
//!
//! Grounded on the teacher's `row::Row` (a `HashMap<String, ExtractedValue>`
//! wrapper with `get`/`columns`/`to_json`), generalized from
//! `ExtractedValue` to [`crate::value::SqlValue`] since this engine spans
//! nine dialects rather than one driver's native type system.

use crate::value::SqlValue;
use dbcrud_common::{CrudError, Result};
use std::collections::HashMap;

/// One row of a query result.
#[derive(Debug, Clone, Default)]
pub struct Row {
    columns: HashMap<String, SqlValue>,
}

impl Row {
    pub fn new(columns: HashMap<String, SqlValue>) -> Self {
        Self { columns }
    }

    pub fn get(&self, column: &str) -> Result<&SqlValue> {
        self.columns
            .get(column)
            .ok_or_else(|| CrudError::Deserialization(format!("column '{column}' not found in result set")))
    }

    pub fn columns(&self) -> Vec<&str> {
        self.columns.keys().map(|s| s.as_str()).collect()
    }

    pub fn columns_map(&self) -> &HashMap<String, SqlValue> {
        &self.columns
    }

    pub fn into_columns_map(self) -> HashMap<String, SqlValue> {
        self.columns
    }

    pub fn get_i64(&self, column: &str) -> Result<i64> {
        self.get(column)?
            .as_i64()
            .ok_or_else(|| CrudError::Deserialization(format!("column '{column}' is not an integer")))
    }

    pub fn get_string(&self, column: &str) -> Result<String> {
        match self.get(column)? {
            SqlValue::String(s) => Ok(s.clone()),
            other => Err(CrudError::Deserialization(format!(
                "column '{column}' is not a string (got {other:?})"
            ))),
        }
    }

    pub fn is_null(&self, column: &str) -> Result<bool> {
        Ok(self.get(column)?.is_null())
    }

    /// Converts the row to a JSON object, for callers that want a
    /// schema-free representation (e.g. logging, diagnostics).
    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for (key, value) in &self.columns {
            map.insert(key.clone(), sql_value_to_json(value));
        }
        serde_json::Value::Object(map)
    }
}

fn sql_value_to_json(value: &SqlValue) -> serde_json::Value {
    use serde_json::Value as J;
    match value {
        SqlValue::Null => J::Null,
        SqlValue::Bool(b) => J::Bool(*b),
        SqlValue::SmallInt(i) => J::from(*i),
        SqlValue::Int(i) => J::from(*i),
        SqlValue::BigInt(i) => J::from(*i),
        SqlValue::Float(f) => serde_json::Number::from_f64(*f as f64).map(J::Number).unwrap_or(J::Null),
        SqlValue::Double(f) => serde_json::Number::from_f64(*f).map(J::Number).unwrap_or(J::Null),
        SqlValue::Decimal(d) => J::String(d.to_string()),
        SqlValue::String(s) => J::String(s.clone()),
        SqlValue::Bytes(b) => J::String(hex_encode(b)),
        SqlValue::Uuid(u) => J::String(u.to_string()),
        SqlValue::Date(d) => J::String(d.to_string()),
        SqlValue::Time(t) => J::String(t.to_string()),
        SqlValue::Timestamp(ts) => J::String(ts.to_string()),
        SqlValue::TimestampTz(ts) => J::String(ts.to_rfc3339()),
        SqlValue::Json(v) => v.clone(),
        SqlValue::Array(items) => J::Array(items.iter().map(sql_value_to_json).collect()),
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_returns_error_for_missing_column() {
        let row = Row::new(HashMap::new());
        assert!(row.get("missing").is_err());
    }

    #[test]
    fn typed_getters_round_trip() {
        let mut columns = HashMap::new();
        columns.insert("id".to_string(), SqlValue::BigInt(42));
        columns.insert("name".to_string(), SqlValue::String("alice".to_string()));
        columns.insert("deleted_at".to_string(), SqlValue::Null);
        let row = Row::new(columns);

        assert_eq!(row.get_i64("id").unwrap(), 42);
        assert_eq!(row.get_string("name").unwrap(), "alice");
        assert!(row.is_null("deleted_at").unwrap());
    }

    #[test]
    fn to_json_renders_an_object() {
        let mut columns = HashMap::new();
        columns.insert("id".to_string(), SqlValue::Int(1));
        let row = Row::new(columns);
        let json = row.to_json();
        assert_eq!(json["id"], serde_json::json!(1));
    }
}

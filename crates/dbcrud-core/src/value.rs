//! Runtime values exchanged between entities and the SQL layer.
//!
//! `SqlValue` is the driver-agnostic counterpart of a PostgreSQL-only
//! extracted value: every dialect's `create_parameter` consumes a
//! `SemanticType` + `SqlValue` pair and produces whatever its own driver
//! binding needs.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// A value bound to (or read from) a column, independent of any one driver.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    SmallInt(i16),
    Int(i32),
    BigInt(i64),
    Float(f32),
    Double(f64),
    String(String),
    Bytes(Vec<u8>),
    Uuid(Uuid),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    Json(JsonValue),
    Decimal(Decimal),
    Array(Vec<SqlValue>),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Best-effort coercion to `i64`, used by code that needs a surrogate id
    /// (e.g. the bulk update path keying rows by an integer id column).
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::SmallInt(v) => Some(*v as i64),
            SqlValue::Int(v) => Some(*v as i64),
            SqlValue::BigInt(v) => Some(*v),
            _ => None,
        }
    }
}

/// Declares the intended SQL type of a value independent of its Rust
/// representation, so dialects can apply product-specific coercion rules
/// (e.g. booleans as SMALLINT on Firebird, UUID as TEXT on DuckDB).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SemanticType {
    Boolean,
    SmallInt,
    Int,
    BigInt,
    Float,
    Double,
    Decimal { precision: u8, scale: u8 },
    Text { max_len: Option<usize> },
    Guid,
    Date,
    Time,
    DateTime,
    DateTimeTz,
    Binary,
    Json,
    Enum,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn as_i64_widens_integers() {
        assert_eq!(SqlValue::SmallInt(7).as_i64(), Some(7));
        assert_eq!(SqlValue::Int(7).as_i64(), Some(7));
        assert_eq!(SqlValue::BigInt(7).as_i64(), Some(7));
        assert_eq!(SqlValue::String("7".into()).as_i64(), None);
    }

    #[test]
    fn null_check() {
        assert!(SqlValue::Null.is_null());
        assert!(!SqlValue::Bool(false).is_null());
    }
}

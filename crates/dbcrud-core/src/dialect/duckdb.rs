//! DuckDB shares much of PostgreSQL's SQL surface and quoting but is an
//! embedded analytical engine: no savepoints, GUIDs travel as text rather
//! than a native binary type, and `?`/`$n` markers are both accepted (the
//! engine always emits the `$n` form for consistency with its other
//! Postgres-wire dialects).

use super::{identifier, Capabilities, DbProduct, Dialect, ParamMarkerStyle, ProductInfo, ProductVersion, SqlStandard};
use crate::value::{SemanticType, SqlValue};

#[derive(Debug, Clone)]
pub struct DuckDbDialect {
    info: ProductInfo,
}

impl DuckDbDialect {
    pub fn new() -> Self {
        Self {
            info: ProductInfo {
                product: DbProduct::DuckDb,
                name: "DuckDB".to_string(),
                raw_version: String::new(),
                version: ProductVersion::default(),
                standard: SqlStandard::Sql2011,
            },
        }
    }
}

impl Default for DuckDbDialect {
    fn default() -> Self {
        Self::new()
    }
}

impl Dialect for DuckDbDialect {
    fn product(&self) -> DbProduct {
        DbProduct::DuckDb
    }

    fn product_info(&self) -> &ProductInfo {
        &self.info
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            merge: false,
            json: true,
            window_functions: true,
            cte: true,
            insert_on_conflict: true,
            on_duplicate_key: false,
            savepoints: false,
            set_valued_parameters: false,
        }
    }

    fn param_marker_style(&self) -> ParamMarkerStyle {
        ParamMarkerStyle::Positional('$')
    }

    fn max_parameters(&self) -> usize {
        65535
    }

    fn quote_identifier_unchecked(&self, name: &str) -> String {
        identifier::wrap_with_quotes(name, '"', '"')
    }

    /// DuckDB has no native GUID-as-binary binding through its common client
    /// libraries; the engine sends it as text and relies on `::UUID` casts
    /// on the SQL side.
    fn coerce_value(&self, semantic_type: SemanticType, value: SqlValue) -> SqlValue {
        match (semantic_type, value) {
            (SemanticType::Guid, SqlValue::Uuid(u)) => SqlValue::String(u.to_string()),
            (_, v) => v,
        }
    }

    fn upsert_incoming_column(&self, column: &str) -> String {
        format!("EXCLUDED.{}", self.quote_identifier_unchecked(column))
    }

    fn returning_clause(&self, columns: &[String]) -> Option<String> {
        if columns.is_empty() {
            return None;
        }
        let quoted: Vec<String> = columns.iter().map(|c| self.quote_identifier_unchecked(c)).collect();
        Some(format!("RETURNING {}", quoted.join(", ")))
    }

    fn session_settings(&self, read_only: bool) -> Vec<String> {
        if read_only {
            vec!["PRAGMA read_only = 1".to_string()]
        } else {
            vec![]
        }
    }
}

//! Firebird binds parameters by name with a `:` prefix, has no native
//! boolean type before dialect 3 (represented as `SMALLINT` here regardless
//! of server dialect, since pre-3 servers aren't a supported target), and
//! stores GUIDs as fixed-width binary rather than text.

use super::{identifier, Capabilities, DbProduct, Dialect, ParamMarkerStyle, ProductInfo, ProductVersion, SqlStandard};
use crate::value::{SemanticType, SqlValue};

#[derive(Debug, Clone)]
pub struct FirebirdDialect {
    info: ProductInfo,
}

impl FirebirdDialect {
    pub fn new(version: ProductVersion) -> Self {
        Self {
            info: ProductInfo {
                product: DbProduct::Firebird,
                name: "Firebird".to_string(),
                raw_version: String::new(),
                version,
                standard: SqlStandard::Sql2008,
            },
        }
    }
}

impl Dialect for FirebirdDialect {
    fn product(&self) -> DbProduct {
        DbProduct::Firebird
    }

    fn product_info(&self) -> &ProductInfo {
        &self.info
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            merge: true,
            json: false,
            window_functions: self.info.version.at_least(3, 0),
            cte: self.info.version.at_least(2, 1),
            insert_on_conflict: false,
            on_duplicate_key: false,
            savepoints: true,
            set_valued_parameters: false,
        }
    }

    fn param_marker_style(&self) -> ParamMarkerStyle {
        ParamMarkerStyle::Named(':')
    }

    fn max_parameters(&self) -> usize {
        // Firebird's practical limit on bound parameters per statement.
        1499
    }

    fn max_identifier_length(&self) -> usize {
        if self.info.version.at_least(4, 0) {
            63
        } else {
            31
        }
    }

    fn quote_identifier_unchecked(&self, name: &str) -> String {
        identifier::wrap_with_quotes(name, '"', '"')
    }

    /// Firebird has no boolean type before dialect 3; booleans travel as
    /// `SMALLINT` 0/1 regardless, since the engine only targets dialect-3 servers.
    fn coerce_value(&self, semantic_type: SemanticType, value: SqlValue) -> SqlValue {
        match (semantic_type, value) {
            (SemanticType::Boolean, SqlValue::Bool(b)) => SqlValue::SmallInt(b as i16),
            (SemanticType::Guid, SqlValue::Uuid(u)) => SqlValue::Bytes(u.as_bytes().to_vec()),
            (_, v) => v,
        }
    }

    fn upsert_incoming_column(&self, column: &str) -> String {
        format!("src.{}", self.quote_identifier_unchecked(column))
    }

    fn session_settings(&self, read_only: bool) -> Vec<String> {
        let mut settings = vec!["SET BIND OF SMALLINT TO SMALLINT".to_string()];
        if read_only {
            settings.push("SET TRANSACTION READ ONLY".to_string());
        }
        settings
    }
}

//! SQLite has no server version or session to configure; capabilities are
//! fixed rather than version-gated, and identifiers are quoted with ANSI
//! double quotes, which SQLite accepts natively without any PRAGMA.

use super::{identifier, Capabilities, DbProduct, Dialect, ParamMarkerStyle, ProductInfo, ProductVersion, SqlStandard};

#[derive(Debug, Clone)]
pub struct SqliteDialect {
    info: ProductInfo,
}

impl SqliteDialect {
    pub fn new() -> Self {
        Self {
            info: ProductInfo {
                product: DbProduct::Sqlite,
                name: "SQLite".to_string(),
                raw_version: String::new(),
                version: ProductVersion::default(),
                standard: SqlStandard::Sql2003,
            },
        }
    }
}

impl Default for SqliteDialect {
    fn default() -> Self {
        Self::new()
    }
}

impl Dialect for SqliteDialect {
    fn product(&self) -> DbProduct {
        DbProduct::Sqlite
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
            savepoints: true,
            set_valued_parameters: false,
        }
    }

    fn param_marker_style(&self) -> ParamMarkerStyle {
        ParamMarkerStyle::Positional('?')
    }

    fn max_parameters(&self) -> usize {
        32766
    }

    fn max_identifier_length(&self) -> usize {
        // SQLite imposes no real limit; this caps pathological names before
        // they reach the driver.
        1024
    }

    fn reserved_identifier_prefixes(&self) -> &'static [&'static str] {
        &["sqlite_"]
    }

    fn quote_identifier_unchecked(&self, name: &str) -> String {
        identifier::wrap_with_quotes(name, '"', '"')
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
        let mut settings = vec!["PRAGMA foreign_keys = ON".to_string()];
        if read_only {
            settings.push("PRAGMA query_only = ON".to_string());
        }
        settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_sqlite_reserved_prefix() {
        let d = SqliteDialect::new();
        assert!(d.wrap_identifier("sqlite_sequence").is_err());
    }

    #[test]
    fn upsert_form_uses_excluded() {
        let d = SqliteDialect::new();
        assert_eq!(d.upsert_incoming_column("name"), "EXCLUDED.\"name\"");
    }

    #[test]
    fn read_only_adds_query_only_pragma() {
        let d = SqliteDialect::new();
        assert!(d.session_settings(true).iter().any(|s| s.contains("query_only")));
        assert!(!d.session_settings(false).iter().any(|s| s.contains("query_only")));
    }
}

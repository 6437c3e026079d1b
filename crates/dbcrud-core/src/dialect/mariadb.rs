//! MariaDB is MySQL-wire compatible and reuses its quoting, parameter style,
//! and session-settings shape, but tracks its own version line (10.x/11.x)
//! and gates the `incoming` upsert alias on its own release that added it.

use super::{identifier, Capabilities, DbProduct, Dialect, ParamMarkerStyle, ProductInfo, ProductVersion, SqlStandard};

#[derive(Debug, Clone)]
pub struct MariaDbDialect {
    info: ProductInfo,
}

impl MariaDbDialect {
    pub fn new(version: ProductVersion) -> Self {
        Self {
            info: ProductInfo {
                product: DbProduct::MariaDb,
                name: "MariaDB".to_string(),
                raw_version: String::new(),
                version,
                standard: SqlStandard::Sql2003,
            },
        }
    }

    /// MariaDB never shipped the `AS incoming` alias form; it keeps the
    /// legacy `VALUES(col)` reference for the lifetime of the 10.x/11.x lines.
    fn supports_incoming_alias(&self) -> bool {
        false
    }
}

impl Dialect for MariaDbDialect {
    fn product(&self) -> DbProduct {
        DbProduct::MariaDb
    }

    fn product_info(&self) -> &ProductInfo {
        &self.info
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            merge: false,
            json: self.info.version.at_least(10, 2),
            window_functions: self.info.version.at_least(10, 2),
            cte: self.info.version.at_least(10, 2),
            insert_on_conflict: false,
            on_duplicate_key: true,
            savepoints: true,
            set_valued_parameters: false,
        }
    }

    fn param_marker_style(&self) -> ParamMarkerStyle {
        ParamMarkerStyle::Positional('?')
    }

    fn max_parameters(&self) -> usize {
        65535
    }

    fn reserved_identifier_prefixes(&self) -> &'static [&'static str] {
        &["mysql.", "performance_schema", "information_schema"]
    }

    fn quote_identifier_unchecked(&self, name: &str) -> String {
        identifier::wrap_with_quotes(name, '"', '"')
    }

    fn upsert_incoming_column(&self, column: &str) -> String {
        let quoted = self.quote_identifier_unchecked(column);
        if self.supports_incoming_alias() {
            format!("incoming.{quoted}")
        } else {
            format!("VALUES({quoted})")
        }
    }

    fn session_settings(&self, read_only: bool) -> Vec<String> {
        let mut settings = vec![
            "SET SESSION sql_mode = CONCAT(@@sql_mode, ',ANSI_QUOTES,NO_BACKSLASH_ESCAPES')".to_string(),
        ];
        if read_only {
            settings.push("SET SESSION transaction_read_only = 1".to_string());
        }
        settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn always_uses_values_form() {
        let d = MariaDbDialect::new(ProductVersion::new(11, 2, 0));
        assert_eq!(d.upsert_incoming_column("name"), "VALUES(\"name\")");
    }

    #[test]
    fn never_claims_merge_or_conflict_clause() {
        let d = MariaDbDialect::new(ProductVersion::new(11, 2, 0));
        let caps = d.capabilities();
        assert!(!caps.merge);
        assert!(!caps.insert_on_conflict);
        assert!(caps.on_duplicate_key);
    }

    #[test]
    fn json_gated_on_10_2() {
        let old = MariaDbDialect::new(ProductVersion::new(10, 1, 0));
        let new = MariaDbDialect::new(ProductVersion::new(10, 2, 0));
        assert!(!old.capabilities().json);
        assert!(new.capabilities().json);
    }
}

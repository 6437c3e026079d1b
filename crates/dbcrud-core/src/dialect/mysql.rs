//! MySQL quotes identifiers with ANSI double quotes because the engine
//! forces `ANSI_QUOTES` on at session start (see `session_settings`), rather
//! than relying on MySQL's default backtick quoting, so that generated SQL
//! reads the same across every dialect.

use super::{identifier, Capabilities, DbProduct, Dialect, ParamMarkerStyle, ProductInfo, ProductVersion, SqlStandard};

#[derive(Debug, Clone)]
pub struct MySqlDialect {
    info: ProductInfo,
}

impl MySqlDialect {
    pub fn new(version: ProductVersion) -> Self {
        Self {
            info: ProductInfo {
                product: DbProduct::MySql,
                name: "MySQL".to_string(),
                raw_version: String::new(),
                version,
                standard: SqlStandard::Sql2003,
            },
        }
    }

    /// `AS incoming` alias form for the upsert's update side was added in 8.0.19;
    /// the engine requires 8.0.20 to line up with its own tested baseline.
    fn supports_incoming_alias(&self) -> bool {
        self.info.version.at_least(8, 0) && self.info.version.patch >= 20 || self.info.version.at_least(8, 1)
    }
}

impl Dialect for MySqlDialect {
    fn product(&self) -> DbProduct {
        DbProduct::MySql
    }

    fn product_info(&self) -> &ProductInfo {
        &self.info
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            merge: false,
            json: self.info.version.at_least(5, 7),
            window_functions: self.info.version.at_least(8, 0),
            cte: self.info.version.at_least(8, 0),
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

    fn upsert_values_alias(&self) -> Option<&'static str> {
        if self.supports_incoming_alias() {
            Some("incoming")
        } else {
            None
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
    fn legacy_server_uses_values_form() {
        let d = MySqlDialect::new(ProductVersion::new(8, 0, 19));
        assert_eq!(d.upsert_incoming_column("name"), "VALUES(\"name\")");
    }

    #[test]
    fn modern_server_uses_incoming_alias() {
        let d = MySqlDialect::new(ProductVersion::new(8, 0, 33));
        assert_eq!(d.upsert_incoming_column("name"), "incoming.\"name\"");
    }

    #[test]
    fn positional_markers_are_bare_question_marks() {
        let d = MySqlDialect::new(ProductVersion::default());
        assert_eq!(d.make_parameter_marker("i0", 0), "?");
        assert_eq!(d.make_parameter_marker("i1", 1), "?");
    }
}

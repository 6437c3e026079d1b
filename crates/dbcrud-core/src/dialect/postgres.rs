use super::{identifier, Capabilities, DbProduct, Dialect, ParamMarkerStyle, ProductInfo, ProductVersion, SqlStandard};

#[derive(Debug, Clone)]
pub struct PostgresDialect {
    info: ProductInfo,
}

impl PostgresDialect {
    pub fn new(version: ProductVersion) -> Self {
        Self {
            info: ProductInfo {
                product: DbProduct::PostgreSql,
                name: "PostgreSQL".to_string(),
                raw_version: String::new(),
                version,
                standard: SqlStandard::Sql2016,
            },
        }
    }
}

impl Dialect for PostgresDialect {
    fn product(&self) -> DbProduct {
        DbProduct::PostgreSql
    }

    fn product_info(&self) -> &ProductInfo {
        &self.info
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            merge: self.info.version.at_least(15, 0),
            json: true,
            window_functions: true,
            cte: true,
            insert_on_conflict: true,
            on_duplicate_key: false,
            savepoints: true,
            set_valued_parameters: true,
        }
    }

    fn param_marker_style(&self) -> ParamMarkerStyle {
        ParamMarkerStyle::Positional('$')
    }

    fn max_parameters(&self) -> usize {
        32767
    }

    fn reserved_identifier_prefixes(&self) -> &'static [&'static str] {
        &["pg_", "information_schema"]
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
        let mut settings = vec![
            "SET standard_conforming_strings = on".to_string(),
            "SET client_min_messages = warning".to_string(),
        ];
        if read_only {
            settings.push("SET default_transaction_read_only = on".to_string());
        }
        settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_form_uses_excluded() {
        let d = PostgresDialect::new(ProductVersion::default());
        assert_eq!(d.upsert_incoming_column("name"), "EXCLUDED.\"name\"");
    }

    #[test]
    fn returning_clause_lists_columns() {
        let d = PostgresDialect::new(ProductVersion::default());
        assert_eq!(
            d.returning_clause(&["id".to_string()]).unwrap(),
            "RETURNING \"id\""
        );
    }

    #[test]
    fn positional_markers_count_up() {
        let d = PostgresDialect::new(ProductVersion::default());
        assert_eq!(d.make_parameter_marker("w0", 0), "$1");
        assert_eq!(d.make_parameter_marker("w1", 1), "$2");
    }

    #[test]
    fn merge_gated_on_version_15() {
        let old = PostgresDialect::new(ProductVersion::new(14, 0, 0));
        let new = PostgresDialect::new(ProductVersion::new(15, 0, 0));
        assert!(!old.capabilities().merge);
        assert!(new.capabilities().merge);
    }
}

//! CockroachDB speaks the PostgreSQL wire protocol and shares its quoting,
//! parameter style, and UPSERT/RETURNING forms; it diverges on MERGE (never
//! supported) and the parameter budget (CockroachDB doesn't enforce
//! PostgreSQL's 32767 ceiling as tightly, so the engine uses a conservative
//! 65535 here rather than assuming parity).

use super::{identifier, Capabilities, DbProduct, Dialect, ParamMarkerStyle, ProductInfo, ProductVersion, SqlStandard};

#[derive(Debug, Clone)]
pub struct CockroachDbDialect {
    info: ProductInfo,
}

impl CockroachDbDialect {
    pub fn new(version: ProductVersion) -> Self {
        Self {
            info: ProductInfo {
                product: DbProduct::CockroachDb,
                name: "CockroachDB".to_string(),
                raw_version: String::new(),
                version,
                standard: SqlStandard::Sql2011,
            },
        }
    }
}

impl Dialect for CockroachDbDialect {
    fn product(&self) -> DbProduct {
        DbProduct::CockroachDb
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
            set_valued_parameters: true,
        }
    }

    fn param_marker_style(&self) -> ParamMarkerStyle {
        ParamMarkerStyle::Positional('$')
    }

    fn max_parameters(&self) -> usize {
        65535
    }

    fn reserved_identifier_prefixes(&self) -> &'static [&'static str] {
        &["pg_", "information_schema", "crdb_internal"]
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
        let mut settings = vec!["SET standard_conforming_strings = on".to_string()];
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
    fn never_claims_merge_support() {
        let d = CockroachDbDialect::new(ProductVersion::new(23, 1, 0));
        assert!(!d.capabilities().merge);
    }

    #[test]
    fn blocks_crdb_internal_prefix() {
        assert!(d_wrap_err("crdb_internal.tables"));
    }

    fn d_wrap_err(name: &str) -> bool {
        let d = CockroachDbDialect::new(ProductVersion::default());
        d.wrap_identifier(name).is_err()
    }
}

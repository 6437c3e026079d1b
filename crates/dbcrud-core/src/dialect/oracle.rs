//! Oracle binds parameters by name with a `:` prefix, quotes identifiers
//! with double quotes (case-sensitive once quoted, unlike its default
//! upper-casing behavior), and has neither `RETURNING ... INTO` wired through
//! this clause (that form needs an out-bind, handled by the gateway) nor a
//! native multi-row `VALUES` list — batch inserts use the `INSERT ALL` form.

use super::{identifier, Capabilities, DbProduct, Dialect, ParamMarkerStyle, ProductInfo, ProductVersion, SqlStandard};
use dbcrud_common::Result;

#[derive(Debug, Clone)]
pub struct OracleDialect {
    info: ProductInfo,
}

impl OracleDialect {
    pub fn new(version: ProductVersion) -> Self {
        Self {
            info: ProductInfo {
                product: DbProduct::Oracle,
                name: "Oracle Database".to_string(),
                raw_version: String::new(),
                version,
                standard: SqlStandard::Sql2011,
            },
        }
    }
}

impl Dialect for OracleDialect {
    fn product(&self) -> DbProduct {
        DbProduct::Oracle
    }

    fn product_info(&self) -> &ProductInfo {
        &self.info
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            merge: true,
            json: self.info.version.at_least(21, 0),
            window_functions: true,
            cte: true,
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
        // Oracle's historical bind-variable ceiling.
        64000
    }

    fn max_identifier_length(&self) -> usize {
        // 12.2+ raised this from 30; assume a modern server.
        128
    }

    fn reserved_identifier_prefixes(&self) -> &'static [&'static str] {
        &["sys_", "all_", "dba_"]
    }

    fn quote_identifier_unchecked(&self, name: &str) -> String {
        identifier::wrap_with_quotes(name, '"', '"')
    }

    fn upsert_incoming_column(&self, column: &str) -> String {
        format!("src.{}", self.quote_identifier_unchecked(column))
    }

    fn last_insert_id_query(&self) -> Option<&'static str> {
        None
    }

    fn session_settings(&self, read_only: bool) -> Vec<String> {
        let mut settings = vec!["ALTER SESSION SET NLS_NUMERIC_CHARACTERS = '.,'".to_string()];
        if read_only {
            settings.push("SET TRANSACTION READ ONLY".to_string());
        }
        settings
    }

    /// Oracle has no bare multi-row `VALUES (...), (...)` form; batches use
    /// `INSERT ALL INTO t (cols) VALUES (...) ... SELECT 1 FROM DUAL`.
    fn build_batch_insert_sql(&self, table: &str, columns: &[String], n_rows: usize) -> Result<String> {
        let quoted_table = self.wrap_identifier(table)?;
        let mut quoted_cols = Vec::with_capacity(columns.len());
        for c in columns {
            quoted_cols.push(self.wrap_identifier(c)?);
        }
        let cols_sql = quoted_cols.join(", ");

        let mut sql = String::from("INSERT ALL ");
        let mut position = 0;
        for _ in 0..n_rows {
            let mut placeholders = Vec::with_capacity(columns.len());
            for _ in 0..columns.len() {
                placeholders.push(self.make_parameter_marker(&format!("p{position}"), position));
                position += 1;
            }
            sql.push_str(&format!(
                "INTO {quoted_table} ({cols_sql}) VALUES ({}) ",
                placeholders.join(", ")
            ));
        }
        sql.push_str("SELECT 1 FROM DUAL");
        Ok(sql)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_markers_use_colon() {
        let d = OracleDialect::new(ProductVersion::default());
        assert_eq!(d.make_parameter_marker("w0", 0), ":w0");
    }

    #[test]
    fn batch_insert_uses_insert_all_form() {
        let d = OracleDialect::new(ProductVersion::default());
        let sql = d
            .build_batch_insert_sql("accounts", &["id".to_string(), "name".to_string()], 2)
            .unwrap();
        assert!(sql.starts_with("INSERT ALL "));
        assert!(sql.ends_with("SELECT 1 FROM DUAL"));
        assert_eq!(sql.matches("INTO").count(), 2);
    }

    #[test]
    fn json_gated_on_21() {
        let old = OracleDialect::new(ProductVersion::new(19, 0, 0));
        let new = OracleDialect::new(ProductVersion::new(21, 0, 0));
        assert!(!old.capabilities().json);
        assert!(new.capabilities().json);
    }
}

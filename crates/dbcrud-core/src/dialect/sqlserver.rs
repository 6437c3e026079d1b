//! SQL Server quotes identifiers with brackets, binds parameters by name
//! with an `@` prefix, and reads back generated columns with `OUTPUT
//! INSERTED.col` rather than a `RETURNING` clause.

use super::{Capabilities, DbProduct, Dialect, ParamMarkerStyle, ProductInfo, ProductVersion, SqlStandard};
use dbcrud_common::{CrudError, Result};

#[derive(Debug, Clone)]
pub struct SqlServerDialect {
    info: ProductInfo,
}

impl SqlServerDialect {
    pub fn new(version: ProductVersion) -> Self {
        Self {
            info: ProductInfo {
                product: DbProduct::SqlServer,
                name: "Microsoft SQL Server".to_string(),
                raw_version: String::new(),
                version,
                standard: SqlStandard::Sql2016,
            },
        }
    }
}

impl Dialect for SqlServerDialect {
    fn product(&self) -> DbProduct {
        DbProduct::SqlServer
    }

    fn product_info(&self) -> &ProductInfo {
        &self.info
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            merge: true,
            json: self.info.version.at_least(16, 0),
            window_functions: true,
            cte: true,
            insert_on_conflict: false,
            on_duplicate_key: false,
            savepoints: true,
            set_valued_parameters: true,
        }
    }

    fn param_marker_style(&self) -> ParamMarkerStyle {
        ParamMarkerStyle::Named('@')
    }

    fn max_parameters(&self) -> usize {
        2098
    }

    fn max_identifier_length(&self) -> usize {
        128
    }

    fn quote_identifier_unchecked(&self, name: &str) -> String {
        name.split('.').map(|part| format!("[{part}]")).collect::<Vec<_>>().join(".")
    }

    fn wrap_identifier(&self, name: &str) -> Result<String> {
        if name.is_empty() || name.len() > self.max_identifier_length() * 2 {
            return Err(CrudError::Validation(format!("invalid identifier: {name}")));
        }
        if name.contains(['[', ']']) {
            return Err(CrudError::Validation(format!(
                "identifier must not contain brackets: {name}"
            )));
        }
        Ok(self.quote_identifier_unchecked(name))
    }

    fn upsert_incoming_column(&self, column: &str) -> String {
        format!("source.{}", self.quote_identifier_unchecked(column))
    }

    fn merge_source_alias(&self) -> &'static str {
        "source"
    }

    fn output_clause(&self, columns: &[String]) -> Option<String> {
        if columns.is_empty() {
            return None;
        }
        let quoted: Vec<String> = columns
            .iter()
            .map(|c| format!("INSERTED.{}", self.quote_identifier_unchecked(c)))
            .collect();
        Some(format!("OUTPUT {}", quoted.join(", ")))
    }

    fn last_insert_id_query(&self) -> Option<&'static str> {
        Some("SELECT SCOPE_IDENTITY()")
    }

    fn session_settings(&self, read_only: bool) -> Vec<String> {
        let mut settings = vec!["SET ANSI_NULLS ON".to_string(), "SET QUOTED_IDENTIFIER ON".to_string()];
        if read_only {
            settings.push("SET TRANSACTION ISOLATION LEVEL READ COMMITTED".to_string());
        }
        settings
    }
}

//! Per-product SQL generation and capability flags.
//!
//! Each database family gets one [`Dialect`] implementation fixing its
//! parameter marker, identifier quoting, parameter budget, UPSERT/RETURNING
//! form, and version-gated capability flags. `dialect_for(product)` is the
//! single factory entry point; everything downstream (the SQL container,
//! the table gateway, the bulk engine) talks to `dyn Dialect` only.

mod cockroachdb;
mod duckdb;
mod firebird;
pub(crate) mod identifier;
mod mariadb;
mod mysql;
mod oracle;
mod postgres;
mod sql92;
mod sqlite;
mod sqlserver;

pub use identifier::{validate_identifier, validate_identifier_part, wrap_with_quotes};

use crate::value::SemanticType;
use dbcrud_common::Result;
use std::fmt;

/// The nine supported database families, plus the SQL-92 fallback used when
/// product detection fails or encounters an unrecognized server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DbProduct {
    SqlServer,
    PostgreSql,
    CockroachDb,
    Oracle,
    MySql,
    MariaDb,
    Sqlite,
    Firebird,
    DuckDb,
    Unknown,
}

/// SQL-standard compliance level, filled in during product detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SqlStandard {
    Sql92,
    Sql99,
    Sql2003,
    Sql2008,
    Sql2011,
    Sql2016,
}

/// A parsed `major.minor.patch` server version triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct ProductVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ProductVersion {
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self { major, minor, patch }
    }

    pub fn at_least(&self, major: u32, minor: u32) -> bool {
        (self.major, self.minor) >= (major, minor)
    }
}

/// Immutable record of what server this context is talking to, filled in
/// once during first connect.
#[derive(Debug, Clone)]
pub struct ProductInfo {
    pub product: DbProduct,
    pub name: String,
    pub raw_version: String,
    pub version: ProductVersion,
    pub standard: SqlStandard,
}

impl ProductInfo {
    pub fn unknown() -> Self {
        Self {
            product: DbProduct::Unknown,
            name: "unknown".to_string(),
            raw_version: String::new(),
            version: ProductVersion::default(),
            standard: SqlStandard::Sql92,
        }
    }
}

/// Version-gated capability flags. Dialects compute these once from
/// `ProductInfo`; the rest of the engine only ever reads the flags.
#[derive(Debug, Clone, Copy, Default)]
pub struct Capabilities {
    pub merge: bool,
    pub json: bool,
    pub window_functions: bool,
    pub cte: bool,
    pub insert_on_conflict: bool,
    pub on_duplicate_key: bool,
    pub savepoints: bool,
    pub set_valued_parameters: bool,
}

/// How a dialect's driver expects parameters to be marked in SQL text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamMarkerStyle {
    /// Named markers carry the parameter's logical name, e.g. `:w0`, `@w0`.
    Named(char),
    /// Positional markers ignore the name and count up, e.g. `$1`, `?`.
    Positional(char),
}

/// Per-product SQL generation and capability contract.
///
/// Implementations are immutable value types constructed once per
/// [`crate::context::DatabaseContext`] and shared (`Arc`) thereafter;
/// `Send + Sync` lets them cross await points without locking.
pub trait Dialect: Send + Sync + fmt::Debug {
    fn product(&self) -> DbProduct;

    fn product_info(&self) -> &ProductInfo;

    fn capabilities(&self) -> Capabilities;

    fn param_marker_style(&self) -> ParamMarkerStyle;

    /// Maximum number of bound parameters a single statement may carry.
    fn max_parameters(&self) -> usize;

    /// Maximum byte length of one identifier segment.
    fn max_identifier_length(&self) -> usize {
        63
    }

    /// Reserved catalog prefixes this dialect forbids naming into
    /// (`pg_*`, `sys.*`, `information_schema`, ...).
    fn reserved_identifier_prefixes(&self) -> &'static [&'static str] {
        &[]
    }

    /// Validates then quotes an identifier (table/column name), handling
    /// `schema.table` forms by quoting each part.
    fn wrap_identifier(&self, name: &str) -> Result<String> {
        validate_identifier(name, self.max_identifier_length(), self.reserved_identifier_prefixes())?;
        Ok(self.quote_identifier_unchecked(name))
    }

    /// Quotes without validating; used internally once a name is already known-good.
    fn quote_identifier_unchecked(&self, name: &str) -> String;

    /// Renders the placeholder for parameter `name` at 0-based `position`.
    fn make_parameter_marker(&self, name: &str, position: usize) -> String {
        match self.param_marker_style() {
            ParamMarkerStyle::Named(prefix) => format!("{prefix}{name}"),
            ParamMarkerStyle::Positional(marker) => {
                if marker == '?' {
                    "?".to_string()
                } else {
                    format!("{marker}{}", position + 1)
                }
            }
        }
    }

    /// Applies product-specific value coercion before binding (e.g. bool -> i16
    /// on Firebird). Default is the identity coercion.
    fn coerce_value(&self, semantic_type: SemanticType, value: crate::value::SqlValue) -> crate::value::SqlValue {
        let _ = semantic_type;
        value
    }

    /// The "incoming" row reference inside an UPSERT's update clause
    /// (`EXCLUDED.col`, `VALUES(col)`, `incoming.col`, ...).
    fn upsert_incoming_column(&self, column: &str) -> String;

    /// Alias bound to the source row in a `MERGE ... USING (...) AS <alias>`
    /// statement. Only meaningful for dialects whose `capabilities().merge`
    /// is true; ignored otherwise.
    fn merge_source_alias(&self) -> &'static str {
        "src"
    }

    /// Row alias on the incoming-values side of an `INSERT ... ON DUPLICATE
    /// KEY UPDATE` statement, when the dialect supports aliasing it (MySQL
    /// 8.0.19+). `None` means the dialect has no such alias and falls back
    /// to `VALUES(col)`.
    fn upsert_values_alias(&self) -> Option<&'static str> {
        None
    }

    /// `RETURNING`-style clause appended to INSERT/UPDATE/DELETE to read back
    /// generated columns. `None` means this dialect has no such clause
    /// (SQL Server uses `OUTPUT` instead, see [`Dialect::output_clause`]).
    fn returning_clause(&self, columns: &[String]) -> Option<String> {
        let _ = columns;
        None
    }

    /// SQL Server's `OUTPUT INSERTED.col` form. `None` on every other dialect.
    fn output_clause(&self, columns: &[String]) -> Option<String> {
        let _ = columns;
        None
    }

    /// Query to retrieve the last generated identity/sequence value when
    /// neither RETURNING nor OUTPUT is available.
    fn last_insert_id_query(&self) -> Option<&'static str> {
        None
    }

    /// Session-settings SQL to run once per physical connection. Empty means
    /// nothing needs to be set for this dialect/mode.
    fn session_settings(&self, read_only: bool) -> Vec<String>;

    /// Builds a multi-row `INSERT` for `n_rows` rows of `columns`.
    fn build_batch_insert_sql(&self, table: &str, columns: &[String], n_rows: usize) -> Result<String> {
        let quoted_table = self.wrap_identifier(table)?;
        let mut quoted_cols = Vec::with_capacity(columns.len());
        for c in columns {
            quoted_cols.push(self.wrap_identifier(c)?);
        }

        let mut sql = format!("INSERT INTO {quoted_table} ({}) VALUES ", quoted_cols.join(", "));
        let mut position = 0;
        let mut rows = Vec::with_capacity(n_rows);
        for _ in 0..n_rows {
            let mut placeholders = Vec::with_capacity(columns.len());
            for i in 0..columns.len() {
                placeholders.push(self.make_parameter_marker(&format!("p{position}"), position));
                let _ = i;
                position += 1;
            }
            rows.push(format!("({})", placeholders.join(", ")));
        }
        sql.push_str(&rows.join(", "));
        Ok(sql)
    }
}

/// Returns the dialect implementation for `product`.
pub fn dialect_for(product: DbProduct) -> Box<dyn Dialect> {
    match product {
        DbProduct::PostgreSql => Box::new(postgres::PostgresDialect::new(ProductVersion::default())),
        DbProduct::CockroachDb => Box::new(cockroachdb::CockroachDbDialect::new(ProductVersion::default())),
        DbProduct::MySql => Box::new(mysql::MySqlDialect::new(ProductVersion::default())),
        DbProduct::MariaDb => Box::new(mariadb::MariaDbDialect::new(ProductVersion::default())),
        DbProduct::Sqlite => Box::new(sqlite::SqliteDialect::new()),
        DbProduct::SqlServer => Box::new(sqlserver::SqlServerDialect::new(ProductVersion::default())),
        DbProduct::Oracle => Box::new(oracle::OracleDialect::new(ProductVersion::default())),
        DbProduct::Firebird => Box::new(firebird::FirebirdDialect::new(ProductVersion::default())),
        DbProduct::DuckDb => Box::new(duckdb::DuckDbDialect::new()),
        DbProduct::Unknown => Box::new(sql92::Sql92Dialect::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_returns_matching_product() {
        for product in [
            DbProduct::PostgreSql,
            DbProduct::CockroachDb,
            DbProduct::MySql,
            DbProduct::MariaDb,
            DbProduct::Sqlite,
            DbProduct::SqlServer,
            DbProduct::Oracle,
            DbProduct::Firebird,
            DbProduct::DuckDb,
            DbProduct::Unknown,
        ] {
            let dialect = dialect_for(product);
            assert_eq!(dialect.product(), product);
        }
    }

    #[test]
    fn unknown_falls_back_to_sql92_with_no_capabilities() {
        let dialect = dialect_for(DbProduct::Unknown);
        let caps = dialect.capabilities();
        assert!(!caps.merge);
        assert!(!caps.insert_on_conflict);
        assert!(!caps.on_duplicate_key);
    }

    #[test]
    fn default_merge_source_alias_is_src() {
        let dialect = dialect_for(DbProduct::PostgreSql);
        assert_eq!(dialect.merge_source_alias(), "src");
    }

    #[test]
    fn sqlserver_overrides_merge_source_alias() {
        let dialect = dialect_for(DbProduct::SqlServer);
        assert_eq!(dialect.merge_source_alias(), "source");
    }

    #[test]
    fn default_upsert_values_alias_is_none() {
        let dialect = dialect_for(DbProduct::PostgreSql);
        assert_eq!(dialect.upsert_values_alias(), None);
    }
}

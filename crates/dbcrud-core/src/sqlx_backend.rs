//! Concrete [`crate::driver::DriverFactory`] implementations backed by sqlx.
//!
//! sqlx's own driver types (`PgPool`, `MySqlPool`, `SqlitePool`) don't share a
//! single `Database` impl you can write one generic function against without
//! `sqlx::Any`, and `Any` drops per-backend type coercions (arrays, JSONB)
//! this engine needs. So [`SqlxPool`] is a concrete three-way enum rather
//! than a generic `Pool<DB>` or `AnyPool`, with one small branch per backend
//! at the two seams that actually differ: parameter binding and row decode.
//!
//! Grounded on the teacher's `connection::Connection` (pool construction,
//! retry-wrapped `connect`) and `types::{ExtractedValue, row_to_extracted}`
//! (value <-> driver type conversion), generalized from Postgres-only to the
//! three wire protocols sqlx itself speaks. SQL Server, Oracle, Firebird and
//! DuckDB get full [`crate::dialect::Dialect`] implementations but no driver
//! here; see DESIGN.md.

use crate::connection::{connect_with_retry, PoolConfig};
use crate::container::SqlContainer;
use crate::dialect::DbProduct;
use crate::driver::{DriverConnection, DriverFactory, DriverRow};
use crate::value::SqlValue;
use async_trait::async_trait;
use dbcrud_common::{CrudError, Result};
use sqlx::mysql::{MySqlArguments, MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::postgres::{PgArguments, PgPool, PgPoolOptions, PgRow};
use sqlx::sqlite::{SqliteArguments, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row as SqlxRow};
use std::time::Duration;
use tracing::{info, instrument};

/// The pool for one of the three wire protocols sqlx speaks natively.
/// PostgreSQL and CockroachDB both speak the Postgres wire protocol;
/// MySQL and MariaDB both speak the MySQL wire protocol.
#[derive(Clone)]
enum SqlxPool {
    Postgres(PgPool),
    MySql(MySqlPool),
    Sqlite(SqlitePool),
}

/// A [`DriverFactory`] that hands out sqlx-backed connections.
#[derive(Clone)]
pub struct SqlxDriverFactory {
    pool: SqlxPool,
}

impl SqlxDriverFactory {
    /// Opens a pool for `product` against `uri`, retrying establishment per
    /// `retry` the same way the teacher's `Connection::new` does.
    #[instrument(skip(uri), fields(product = ?product, max_connections = config.max_connections))]
    pub async fn connect(product: DbProduct, uri: &str, config: PoolConfig) -> Result<Self> {
        if uri.is_empty() {
            return Err(CrudError::Configuration("connection URI cannot be empty".to_string()));
        }
        info!("opening sqlx connection pool");

        let pool = connect_with_retry(
            || async { Self::open_pool(product, uri, &config).await },
            &config.retry,
        )
        .await?;

        Ok(Self { pool })
    }

    async fn open_pool(product: DbProduct, uri: &str, config: &PoolConfig) -> Result<SqlxPool> {
        let acquire_timeout = Duration::from_secs(config.connect_timeout);
        let max_lifetime = config.max_lifetime.map(Duration::from_secs);
        let idle_timeout = config.idle_timeout.map(Duration::from_secs);

        match product {
            DbProduct::PostgreSql | DbProduct::CockroachDb => {
                let mut options = PgPoolOptions::new()
                    .min_connections(config.min_connections)
                    .max_connections(config.max_connections)
                    .acquire_timeout(acquire_timeout);
                if let Some(lifetime) = max_lifetime {
                    options = options.max_lifetime(lifetime);
                }
                if let Some(idle) = idle_timeout {
                    options = options.idle_timeout(idle);
                }
                let pool = options.connect(uri).await?;
                Ok(SqlxPool::Postgres(pool))
            }
            DbProduct::MySql | DbProduct::MariaDb => {
                let mut options = MySqlPoolOptions::new()
                    .min_connections(config.min_connections)
                    .max_connections(config.max_connections)
                    .acquire_timeout(acquire_timeout);
                if let Some(lifetime) = max_lifetime {
                    options = options.max_lifetime(lifetime);
                }
                if let Some(idle) = idle_timeout {
                    options = options.idle_timeout(idle);
                }
                let pool = options.connect(uri).await?;
                Ok(SqlxPool::MySql(pool))
            }
            DbProduct::Sqlite => {
                let mut options = SqlitePoolOptions::new()
                    .min_connections(config.min_connections)
                    .max_connections(config.max_connections)
                    .acquire_timeout(acquire_timeout);
                if let Some(lifetime) = max_lifetime {
                    options = options.max_lifetime(lifetime);
                }
                if let Some(idle) = idle_timeout {
                    options = options.idle_timeout(idle);
                }
                let pool = options.connect(uri).await?;
                Ok(SqlxPool::Sqlite(pool))
            }
            other => Err(CrudError::Configuration(format!(
                "{other:?} has no bundled sqlx driver; bring your own DriverFactory"
            ))),
        }
    }
}

#[async_trait]
impl DriverFactory for SqlxDriverFactory {
    async fn acquire(&self) -> Result<Box<dyn DriverConnection>> {
        let conn = match &self.pool {
            SqlxPool::Postgres(pool) => SqlxConnection::Postgres(pool.acquire().await?),
            SqlxPool::MySql(pool) => SqlxConnection::MySql(pool.acquire().await?),
            SqlxPool::Sqlite(pool) => SqlxConnection::Sqlite(pool.acquire().await?),
        };
        Ok(Box::new(conn))
    }

    async fn close(&self) {
        match &self.pool {
            SqlxPool::Postgres(pool) => pool.close().await,
            SqlxPool::MySql(pool) => pool.close().await,
            SqlxPool::Sqlite(pool) => pool.close().await,
        }
    }
}

/// One checked-out connection. `BEGIN`/`COMMIT`/`ROLLBACK` are issued as
/// plain statements on this same connection rather than via sqlx's
/// lifetime-borrowing `Transaction<'_, DB>` type, which would make this enum
/// self-referential; all three backends accept bare `BEGIN`/`COMMIT`/
/// `ROLLBACK` so one code path covers all of them.
enum SqlxConnection {
    Postgres(sqlx::pool::PoolConnection<sqlx::Postgres>),
    MySql(sqlx::pool::PoolConnection<sqlx::MySql>),
    Sqlite(sqlx::pool::PoolConnection<sqlx::Sqlite>),
}

/// Binds one [`SqlValue`] onto a `sqlx::query(...)` builder. A macro rather
/// than a generic function: the three backends' `Query<'q, DB, _>` types
/// share no common trait for `.bind()`, so this expands inline against
/// whatever concrete type the call site's `query` variable already is.
macro_rules! bind_postgres {
    ($query:expr, $value:expr) => {
        match $value.clone() {
            SqlValue::Null => $query.bind(Option::<i32>::None),
            SqlValue::Bool(v) => $query.bind(v),
            SqlValue::SmallInt(v) => $query.bind(v),
            SqlValue::Int(v) => $query.bind(v),
            SqlValue::BigInt(v) => $query.bind(v),
            SqlValue::Float(v) => $query.bind(v),
            SqlValue::Double(v) => $query.bind(v),
            SqlValue::Decimal(v) => $query.bind(v),
            SqlValue::String(v) => $query.bind(v),
            SqlValue::Bytes(v) => $query.bind(v),
            SqlValue::Uuid(v) => $query.bind(v),
            SqlValue::Date(v) => $query.bind(v),
            SqlValue::Time(v) => $query.bind(v),
            SqlValue::Timestamp(v) => $query.bind(v),
            SqlValue::TimestampTz(v) => $query.bind(v),
            SqlValue::Json(v) => $query.bind(v),
            SqlValue::Array(items) => {
                $query.bind(serde_json::Value::Array(items.iter().map(sql_value_to_json).collect()))
            }
        }
    };
}

macro_rules! bind_mysql {
    ($query:expr, $value:expr) => {
        match $value.clone() {
            SqlValue::Null => $query.bind(Option::<i32>::None),
            SqlValue::Bool(v) => $query.bind(v),
            SqlValue::SmallInt(v) => $query.bind(v),
            SqlValue::Int(v) => $query.bind(v),
            SqlValue::BigInt(v) => $query.bind(v),
            SqlValue::Float(v) => $query.bind(v),
            SqlValue::Double(v) => $query.bind(v),
            SqlValue::Decimal(v) => $query.bind(v),
            SqlValue::String(v) => $query.bind(v),
            SqlValue::Bytes(v) => $query.bind(v),
            // MySQL has no native UUID column type; the dialect stores it as CHAR(36).
            SqlValue::Uuid(v) => $query.bind(v.to_string()),
            SqlValue::Date(v) => $query.bind(v),
            SqlValue::Time(v) => $query.bind(v),
            SqlValue::Timestamp(v) => $query.bind(v),
            SqlValue::TimestampTz(v) => $query.bind(v.naive_utc()),
            SqlValue::Json(v) => $query.bind(v),
            SqlValue::Array(items) => {
                $query.bind(serde_json::Value::Array(items.iter().map(sql_value_to_json).collect()))
            }
        }
    };
}

macro_rules! bind_sqlite {
    ($query:expr, $value:expr) => {
        match $value.clone() {
            SqlValue::Null => $query.bind(Option::<i32>::None),
            SqlValue::Bool(v) => $query.bind(v),
            SqlValue::SmallInt(v) => $query.bind(v as i32),
            SqlValue::Int(v) => $query.bind(v),
            SqlValue::BigInt(v) => $query.bind(v),
            SqlValue::Float(v) => $query.bind(v as f64),
            SqlValue::Double(v) => $query.bind(v),
            // SQLite has no native DECIMAL; the dialect stores it as TEXT.
            SqlValue::Decimal(v) => $query.bind(v.to_string()),
            SqlValue::String(v) => $query.bind(v),
            SqlValue::Bytes(v) => $query.bind(v),
            SqlValue::Uuid(v) => $query.bind(v.to_string()),
            SqlValue::Date(v) => $query.bind(v),
            SqlValue::Time(v) => $query.bind(v),
            SqlValue::Timestamp(v) => $query.bind(v),
            SqlValue::TimestampTz(v) => $query.bind(v.to_rfc3339()),
            SqlValue::Json(v) => $query.bind(v.to_string()),
            SqlValue::Array(items) => $query.bind(
                serde_json::to_string(&items.iter().map(sql_value_to_json).collect::<Vec<_>>())
                    .unwrap_or_default(),
            ),
        }
    };
}

#[async_trait]
impl DriverConnection for SqlxConnection {
    async fn execute(&mut self, container: &SqlContainer) -> Result<u64> {
        match self {
            SqlxConnection::Postgres(conn) => {
                let mut query = sqlx::query(&container.sql);
                for param in &container.parameters {
                    query = bind_postgres!(query, &param.value);
                }
                Ok(query.execute(&mut **conn).await?.rows_affected())
            }
            SqlxConnection::MySql(conn) => {
                let mut query = sqlx::query(&container.sql);
                for param in &container.parameters {
                    query = bind_mysql!(query, &param.value);
                }
                Ok(query.execute(&mut **conn).await?.rows_affected())
            }
            SqlxConnection::Sqlite(conn) => {
                let mut query = sqlx::query(&container.sql);
                for param in &container.parameters {
                    query = bind_sqlite!(query, &param.value);
                }
                Ok(query.execute(&mut **conn).await?.rows_affected())
            }
        }
    }

    async fn fetch_all(&mut self, container: &SqlContainer) -> Result<Vec<DriverRow>> {
        match self {
            SqlxConnection::Postgres(conn) => {
                let mut query = sqlx::query(&container.sql);
                for param in &container.parameters {
                    query = bind_postgres!(query, &param.value);
                }
                let rows = query.fetch_all(&mut **conn).await?;
                rows.iter().map(row_from_postgres).collect()
            }
            SqlxConnection::MySql(conn) => {
                let mut query = sqlx::query(&container.sql);
                for param in &container.parameters {
                    query = bind_mysql!(query, &param.value);
                }
                let rows = query.fetch_all(&mut **conn).await?;
                rows.iter().map(row_from_mysql).collect()
            }
            SqlxConnection::Sqlite(conn) => {
                let mut query = sqlx::query(&container.sql);
                for param in &container.parameters {
                    query = bind_sqlite!(query, &param.value);
                }
                let rows = query.fetch_all(&mut **conn).await?;
                rows.iter().map(row_from_sqlite).collect()
            }
        }
    }

    async fn fetch_optional(&mut self, container: &SqlContainer) -> Result<Option<DriverRow>> {
        match self {
            SqlxConnection::Postgres(conn) => {
                let mut query = sqlx::query(&container.sql);
                for param in &container.parameters {
                    query = bind_postgres!(query, &param.value);
                }
                query.fetch_optional(&mut **conn).await?.as_ref().map(row_from_postgres).transpose()
            }
            SqlxConnection::MySql(conn) => {
                let mut query = sqlx::query(&container.sql);
                for param in &container.parameters {
                    query = bind_mysql!(query, &param.value);
                }
                query.fetch_optional(&mut **conn).await?.as_ref().map(row_from_mysql).transpose()
            }
            SqlxConnection::Sqlite(conn) => {
                let mut query = sqlx::query(&container.sql);
                for param in &container.parameters {
                    query = bind_sqlite!(query, &param.value);
                }
                query.fetch_optional(&mut **conn).await?.as_ref().map(row_from_sqlite).transpose()
            }
        }
    }

    async fn begin(&mut self) -> Result<()> {
        self.execute(&SqlContainer::new("BEGIN", vec![])).await?;
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        self.execute(&SqlContainer::new("COMMIT", vec![])).await?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.execute(&SqlContainer::new("ROLLBACK", vec![])).await?;
        Ok(())
    }

    async fn run_session_settings(&mut self, statements: &[String]) -> Result<()> {
        for statement in statements {
            self.execute(&SqlContainer::new(statement.clone(), vec![])).await?;
        }
        Ok(())
    }
}

fn sql_value_to_json(value: &SqlValue) -> serde_json::Value {
    use serde_json::Value as J;
    match value {
        SqlValue::Null => J::Null,
        SqlValue::Bool(v) => J::Bool(*v),
        SqlValue::SmallInt(v) => J::from(*v),
        SqlValue::Int(v) => J::from(*v),
        SqlValue::BigInt(v) => J::from(*v),
        SqlValue::Float(v) => serde_json::Number::from_f64(*v as f64).map(J::Number).unwrap_or(J::Null),
        SqlValue::Double(v) => serde_json::Number::from_f64(*v).map(J::Number).unwrap_or(J::Null),
        SqlValue::Decimal(v) => J::String(v.to_string()),
        SqlValue::String(v) => J::String(v.clone()),
        SqlValue::Bytes(v) => J::String(v.iter().map(|b| format!("{b:02x}")).collect()),
        SqlValue::Uuid(v) => J::String(v.to_string()),
        SqlValue::Date(v) => J::String(v.to_string()),
        SqlValue::Time(v) => J::String(v.to_string()),
        SqlValue::Timestamp(v) => J::String(v.to_string()),
        SqlValue::TimestampTz(v) => J::String(v.to_rfc3339()),
        SqlValue::Json(v) => v.clone(),
        SqlValue::Array(items) => J::Array(items.iter().map(sql_value_to_json).collect()),
    }
}

fn row_from_postgres(row: &PgRow) -> Result<DriverRow> {
    let mut out = DriverRow::new();
    for (idx, column) in row.columns().iter().enumerate() {
        out.insert(column.name().to_string(), decode_postgres_column(row, idx)?);
    }
    Ok(out)
}

fn row_from_mysql(row: &MySqlRow) -> Result<DriverRow> {
    let mut out = DriverRow::new();
    for (idx, column) in row.columns().iter().enumerate() {
        out.insert(column.name().to_string(), decode_mysql_column(row, idx)?);
    }
    Ok(out)
}

fn row_from_sqlite(row: &SqliteRow) -> Result<DriverRow> {
    let mut out = DriverRow::new();
    for (idx, column) in row.columns().iter().enumerate() {
        out.insert(column.name().to_string(), decode_sqlite_column(row, idx)?);
    }
    Ok(out)
}

/// The narrowest-first cascade shared by the three decode functions below:
/// try each candidate type in turn and return on the first that decodes
/// without error, falling back to an explicit error on the named final type.
macro_rules! decode_cascade {
    ($row:expr, $idx:expr, [$(($ty:ty, $variant:expr)),+ $(,)?], $fallback_err:expr) => {{
        $(
            if let Ok(v) = $row.try_get::<Option<$ty>, _>($idx) {
                return Ok(v.map($variant).unwrap_or(SqlValue::Null));
            }
        )+
        Err($fallback_err)
    }};
}

/// Decodes a row by trying progressively wider/looser types until one
/// succeeds, rather than branching on the backend's own type-name strings
/// (Postgres, MySQL and SQLite each spell out type names differently).
/// sqlx's `try_get` rejects a mismatched column type without panicking, so
/// this cascade costs at most a handful of failed attempts per column.
fn decode_postgres_column(row: &PgRow, idx: usize) -> Result<SqlValue> {
    decode_cascade!(
        row,
        idx,
        [
            (bool, SqlValue::Bool),
            (i16, SqlValue::SmallInt),
            (i32, SqlValue::Int),
            (i64, SqlValue::BigInt),
            (f64, SqlValue::Double),
            (rust_decimal::Decimal, SqlValue::Decimal),
            (uuid::Uuid, SqlValue::Uuid),
            (chrono::NaiveDate, SqlValue::Date),
            (chrono::NaiveTime, SqlValue::Time),
            (chrono::NaiveDateTime, SqlValue::Timestamp),
            (chrono::DateTime<chrono::Utc>, SqlValue::TimestampTz),
            (serde_json::Value, SqlValue::Json),
            (Vec<u8>, SqlValue::Bytes),
            (String, SqlValue::String),
        ],
        CrudError::Deserialization(format!("column {idx} did not decode as any known value type"))
    )
}

fn decode_mysql_column(row: &MySqlRow, idx: usize) -> Result<SqlValue> {
    decode_cascade!(
        row,
        idx,
        [
            (bool, SqlValue::Bool),
            (i16, SqlValue::SmallInt),
            (i32, SqlValue::Int),
            (i64, SqlValue::BigInt),
            (f64, SqlValue::Double),
            (rust_decimal::Decimal, SqlValue::Decimal),
            (chrono::NaiveDate, SqlValue::Date),
            (chrono::NaiveTime, SqlValue::Time),
            (chrono::NaiveDateTime, SqlValue::Timestamp),
            (serde_json::Value, SqlValue::Json),
            (Vec<u8>, SqlValue::Bytes),
            (String, SqlValue::String),
        ],
        CrudError::Deserialization(format!("column {idx} did not decode as any known value type"))
    )
}

fn decode_sqlite_column(row: &SqliteRow, idx: usize) -> Result<SqlValue> {
    decode_cascade!(
        row,
        idx,
        [
            (bool, SqlValue::Bool),
            (i32, SqlValue::Int),
            (i64, SqlValue::BigInt),
            (f64, SqlValue::Double),
            (chrono::NaiveDate, SqlValue::Date),
            (chrono::NaiveTime, SqlValue::Time),
            (chrono::NaiveDateTime, SqlValue::Timestamp),
            (Vec<u8>, SqlValue::Bytes),
            (String, SqlValue::String),
        ],
        CrudError::Deserialization(format!("column {idx} did not decode as any known value type"))
    )
}

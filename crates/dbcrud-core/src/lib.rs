//! SQL-first, multi-dialect data-access engine.
//!
//! Nine database families (SQL Server, PostgreSQL, CockroachDB, Oracle,
//! MySQL, MariaDB, SQLite, Firebird, DuckDB) share one connection-lifecycle
//! manager, one parameterized SQL container, and one table gateway. Each
//! dialect only changes how SQL is rendered and what a driver-level
//! connection is checked out from; the core never branches on database
//! product outside [`dialect`].
//!
//! # Architecture
//!
//! ```text
//!   TableGateway<T> / BulkExecutor<T>   (gateway.rs, bulk.rs)
//!              |
//!      DatabaseContext                  (context.rs: pool governor, mode lock, counters)
//!              |
//!        dyn Dialect                    (dialect/: per-product SQL rendering + capabilities)
//!              |
//!     dyn DriverFactory / DriverConnection   (driver.rs: the wire-protocol seam)
//!              |
//!             sqlx                      (sqlx_backend.rs, feature "sqlx-backend")
//! ```
//!
//! A caller never constructs SQL strings directly for CRUD operations: the
//! gateway renders parameterized statements from an [`typemap::EntityDescriptor`]
//! and a [`dialect::Dialect`], and every identifier is quoted, every value
//! bound as a parameter.
//!
//! # Usage
//!
//! ```rust,ignore
//! use dbcrud_core::{DatabaseContext, ContextConfig, DbProduct, TableGateway};
//! use std::sync::Arc;
//!
//! # async fn example(driver: Arc<dyn dbcrud_core::DriverFactory>) -> dbcrud_common::Result<()> {
//! let context = Arc::new(DatabaseContext::new(DbProduct::PostgreSql, driver, ContextConfig::default()));
//! let gateway: TableGateway<User> = TableGateway::new(context)?;
//! let user = gateway.retrieve_one(&[1i64.into()]).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Thread Safety
//!
//! [`context::DatabaseContext`], [`gateway::TableGateway`], and
//! [`bulk::BulkExecutor`] are all `Send + Sync` and designed to be wrapped in
//! an `Arc` and shared across tasks; each call checks out its own connection
//! from the pool rather than holding one across awaits.

/// Dynamically-typed SQL value carried across dialects, plus the semantic
/// type tags the type map and dialect layer key off of.
pub mod value;

/// Per-product SQL generation and capability flags. `dialect_for(product)`
/// is the only factory a caller needs; everything else talks to `dyn Dialect`.
pub mod dialect;

/// The parameterized SQL container (`w{n}`/`s{n}`/`i{n}`/`v{n}`/`p{n}` marker
/// convention) and the per-dialect rendered-template cache.
pub mod container;

/// Reflects a Rust struct onto column descriptors: primary key, identity,
/// version, audit-role, and insertable/updatable column sets.
pub mod typemap;

/// Connection-establishment retry policy and pool sizing.
pub mod connection;

/// The pool governor (semaphore-backed capacity limit) and mode lock
/// enforcing the four connection-lifecycle access modes.
pub mod governor;

/// Owns one dialect, one driver factory, the pool governor, the mode lock,
/// and the running counters a health check reads.
pub mod context;

/// Explicit, caller-scoped transactions with isolation level and savepoints.
pub mod transaction;

/// The seam between the dialect-aware core and an actual database driver.
pub mod driver;

/// Point-in-time pool metrics and a health check derived from them.
pub mod metrics;

/// A decoded query result row with typed accessors.
pub mod row;

/// Streaming retrieval: yields entities one at a time while holding the
/// reader's connection lock for the lifetime of the stream.
pub mod reader;

/// Fills `CreatedOn`/`CreatedBy`/`LastUpdatedOn`/`LastUpdatedBy` columns on
/// insert/update via a caller-supplied clock and principal source.
pub mod audit;

/// Per-tenant cache mapping a tenant id to its own `DatabaseContext`
/// (tenant-per-database, no row-level tenancy).
pub mod tenant;

/// The table gateway: single-entity retrieve/create/update/delete/upsert,
/// dialect-branching on the UPSERT strategy and optimistic-concurrency
/// version checks.
pub mod gateway;

/// The bulk engine: sequential, batched, concurrent, and provider-optimized
/// strategies for `create_many`/`update_many`/`upsert_many`.
pub mod bulk;

/// Concrete sqlx-backed [`driver::DriverFactory`] implementations for the
/// Postgres-wire, MySQL-wire, and SQLite families. Gated behind the
/// `sqlx-backend` feature (on by default).
#[cfg(feature = "sqlx-backend")]
pub mod sqlx_backend;

pub use audit::{AuditStamp, AuditValueResolver, FixedPrincipalResolver, SystemClockResolver};
pub use bulk::{BulkConfig, BulkExecutor, BulkResult, ProgressCallback, RowError, Strategy};
pub use connection::{connect_with_retry, PoolConfig, RetryConfig};
pub use container::{Parameter, SqlContainer, TemplateCache};
pub use context::{best_mode, ContextConfig, ContextCounters, ContextGuard, DatabaseContext, ModeCoercion, RequestedMode};
pub use dialect::{
    dialect_for, validate_identifier, validate_identifier_part, wrap_with_quotes, Capabilities,
    DbProduct, Dialect, ParamMarkerStyle, ProductInfo, ProductVersion, SqlStandard,
};
pub use driver::{DriverConnection, DriverFactory, DriverRow};
pub use gateway::{
    build_delete_sql, build_insert_sql, build_retrieve_by_entities_sql, build_retrieve_by_ids_sql,
    build_retrieve_by_key_sql, build_select_all_sql, build_update_sql, build_upsert_sql, ExecutorConfig, TableGateway,
};
pub use governor::{AccessMode, ModeLock, PoolGovernor, WriterTurnstile};
pub use metrics::{HealthStatus, MetricsSnapshot};
pub use reader::{EntityStream, TrackedReader};
pub use row::Row;
pub use tenant::{require as require_tenant_context, TenantContextRegistry};
pub use transaction::{IsolationLevel, TransactionContext, TransactionOptions, TxAccessMode};
pub use typemap::{AuditRole, ColumnDescriptor, EntityDescriptor, MappedEntity, TypeMapRegistry};
pub use value::{SemanticType, SqlValue};

#[cfg(feature = "sqlx-backend")]
pub use sqlx_backend::SqlxDriverFactory;

pub use dbcrud_common::{CrudError, Result};

//! Transaction context: a pinned connection plus isolation level, access
//! mode, and validated savepoints.
//!
//! Grounded on the teacher's `transaction::Transaction`
//! (`begin`/`begin_with_options`/`commit`/`rollback`/`savepoint`/
//! `rollback_to`/`release_savepoint`), generalized from a hardcoded
//! `SET TRANSACTION ISOLATION LEVEL ... READ WRITE/READ ONLY` string to a
//! dialect-aware render (not every product spells isolation levels or
//! read-only the same way; `Dialect::capabilities().savepoints` gates
//! whether savepoints are offered at all, since DuckDB never supports them).
//!
//! `begin`/`begin_with_options` checks out one [`crate::driver::DriverConnection`]
//! from the owning context's pool and pins it for the transaction's whole
//! lifetime; every `execute`/`fetch_all`/`fetch_optional` call, and every
//! savepoint statement, runs against that same connection. An abandoned
//! transaction (dropped without `commit`/`rollback`) cannot roll back
//! asynchronously from a synchronous `Drop`, so it only logs a warning; see
//! the `Drop` impl below.

use crate::container::SqlContainer;
use crate::context::{ContextGuard, DatabaseContext};
use crate::dialect::identifier::validate_identifier_part;
use crate::driver::{DriverConnection, DriverRow};
use dbcrud_common::{CrudError, Result};
use tracing::warn;

/// Transaction isolation levels, generalized from the teacher's Postgres-only
/// four-value enum (every target dialect implements at least these four,
/// even if some alias two of them to the same underlying behavior).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    ReadUncommitted,
    #[default]
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    pub fn to_sql(self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TxAccessMode {
    #[default]
    ReadWrite,
    ReadOnly,
}

impl TxAccessMode {
    pub fn to_sql(self) -> &'static str {
        match self {
            TxAccessMode::ReadWrite => "READ WRITE",
            TxAccessMode::ReadOnly => "READ ONLY",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransactionOptions {
    pub isolation_level: IsolationLevel,
    pub access_mode: TxAccessMode,
    pub deferrable: bool,
}

impl TransactionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn isolation_level(mut self, level: IsolationLevel) -> Self {
        self.isolation_level = level;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.access_mode = TxAccessMode::ReadOnly;
        self
    }

    pub fn deferrable(mut self, deferrable: bool) -> Self {
        self.deferrable = deferrable;
        self
    }

    pub fn to_sql(&self) -> String {
        let mut parts = vec![
            format!("ISOLATION LEVEL {}", self.isolation_level.to_sql()),
            self.access_mode.to_sql().to_string(),
        ];
        if self.isolation_level == IsolationLevel::Serializable && self.access_mode == TxAccessMode::ReadOnly {
            parts.push(if self.deferrable { "DEFERRABLE" } else { "NOT DEFERRABLE" }.to_string());
        }
        format!("SET TRANSACTION {}", parts.join(", "))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxState {
    Active,
    Committed,
    RolledBack,
}

/// A begun transaction against one [`DatabaseContext`]. Holds the context's
/// mode-lock/governor guard and one checked-out [`DriverConnection`] for its
/// whole lifetime, matching this engine's lock hierarchy: pool permit, then
/// mode lock, then connection, then this transaction's own user-lock (the
/// `&mut self` borrow on every method below, since Rust's borrow checker
/// already gives us single-writer-at-a-time for free on a `!Sync` type).
///
/// Every statement a caller runs inside the transaction goes through
/// [`TransactionContext::execute`]/[`fetch_all`](Self::fetch_all)/
/// [`fetch_optional`](Self::fetch_optional), which route straight to the
/// pinned connection rather than back through [`DatabaseContext::enter`] (the
/// permit is already held for the transaction's whole lifetime).
pub struct TransactionContext<'a> {
    context: &'a DatabaseContext,
    _guard: ContextGuard<'a>,
    conn: Box<dyn DriverConnection>,
    options: TransactionOptions,
    state: TxState,
    savepoints: Vec<String>,
}

impl<'a> TransactionContext<'a> {
    pub async fn begin(context: &'a DatabaseContext, isolation_level: IsolationLevel) -> Result<Self> {
        Self::begin_with_options(context, TransactionOptions::new().isolation_level(isolation_level)).await
    }

    pub async fn begin_with_options(context: &'a DatabaseContext, options: TransactionOptions) -> Result<Self> {
        let guard = context.enter(true).await?;
        let mut conn = context.driver().acquire().await?;
        context.counters.record_connection_created();
        conn.begin().await?;
        let set_sql = SqlContainer::new(options.to_sql(), vec![]);
        if let Err(err) = conn.execute(&set_sql).await {
            let _ = conn.rollback().await;
            context.counters.record_connection_closed();
            return Err(err);
        }
        Ok(Self {
            context,
            _guard: guard,
            conn,
            options,
            state: TxState::Active,
            savepoints: Vec::new(),
        })
    }

    pub fn options(&self) -> &TransactionOptions {
        &self.options
    }

    /// Runs a statement that does not return rows (INSERT/UPDATE/DELETE)
    /// against the connection this transaction pinned at `begin`.
    pub async fn execute(&mut self, container: &SqlContainer) -> Result<u64> {
        self.assert_active()?;
        self.conn.execute(container).await
    }

    pub async fn fetch_all(&mut self, container: &SqlContainer) -> Result<Vec<DriverRow>> {
        self.assert_active()?;
        self.conn.fetch_all(container).await
    }

    pub async fn fetch_optional(&mut self, container: &SqlContainer) -> Result<Option<DriverRow>> {
        self.assert_active()?;
        self.conn.fetch_optional(container).await
    }

    pub async fn commit(mut self) -> Result<()> {
        self.assert_active()?;
        self.conn.commit().await?;
        self.state = TxState::Committed;
        self.context.counters.transactions_committed.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        self.context.counters.record_connection_closed();
        Ok(())
    }

    pub async fn rollback(mut self) -> Result<()> {
        self.assert_active()?;
        self.conn.rollback().await?;
        self.state = TxState::RolledBack;
        self.context
            .counters
            .transactions_rolled_back
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        self.context.counters.record_connection_closed();
        Ok(())
    }

    pub async fn savepoint(&mut self, name: &str) -> Result<()> {
        self.assert_active()?;
        self.assert_savepoints_supported()?;
        validate_identifier_part(name, self.context.dialect().max_identifier_length(), &[])?;
        let sql = self.savepoint_sql(name);
        let container = SqlContainer::new(sql, vec![]);
        self.conn.execute(&container).await?;
        self.savepoints.push(name.to_string());
        Ok(())
    }

    pub async fn rollback_to(&mut self, name: &str) -> Result<()> {
        self.assert_active()?;
        self.assert_savepoints_supported()?;
        validate_identifier_part(name, self.context.dialect().max_identifier_length(), &[])?;
        if !self.savepoints.iter().any(|s| s == name) {
            return Err(CrudError::TransactionState(format!("unknown savepoint '{name}'")));
        }
        let sql = self.rollback_to_sql(name);
        let container = SqlContainer::new(sql, vec![]);
        self.conn.execute(&container).await?;
        Ok(())
    }

    pub async fn release_savepoint(&mut self, name: &str) -> Result<()> {
        self.assert_active()?;
        self.assert_savepoints_supported()?;
        validate_identifier_part(name, self.context.dialect().max_identifier_length(), &[])?;
        let before = self.savepoints.len();
        self.savepoints.retain(|s| s != name);
        if self.savepoints.len() == before {
            return Err(CrudError::TransactionState(format!("unknown savepoint '{name}'")));
        }
        if let Some(sql) = self.release_savepoint_sql(name) {
            let container = SqlContainer::new(sql, vec![]);
            self.conn.execute(&container).await?;
        }
        Ok(())
    }

    /// SQL Server has no `SAVEPOINT` keyword; it spells this `SAVE
    /// TRANSACTION name` and has no separate release statement at all
    /// (`release_savepoint_sql` returns `None` for it below).
    fn savepoint_sql(&self, name: &str) -> String {
        match self.context.dialect().product() {
            crate::dialect::DbProduct::SqlServer => format!("SAVE TRANSACTION {name}"),
            _ => format!("SAVEPOINT {name}"),
        }
    }

    fn rollback_to_sql(&self, name: &str) -> String {
        match self.context.dialect().product() {
            crate::dialect::DbProduct::SqlServer => format!("ROLLBACK TRANSACTION {name}"),
            _ => format!("ROLLBACK TO SAVEPOINT {name}"),
        }
    }

    fn release_savepoint_sql(&self, name: &str) -> Option<String> {
        match self.context.dialect().product() {
            crate::dialect::DbProduct::SqlServer => None,
            _ => Some(format!("RELEASE SAVEPOINT {name}")),
        }
    }

    fn assert_active(&self) -> Result<()> {
        match self.state {
            TxState::Active => Ok(()),
            TxState::Committed => Err(CrudError::TransactionState("transaction already committed".to_string())),
            TxState::RolledBack => Err(CrudError::TransactionState("transaction already rolled back".to_string())),
        }
    }

    fn assert_savepoints_supported(&self) -> Result<()> {
        if self.context.dialect().capabilities().savepoints {
            Ok(())
        } else {
            Err(CrudError::UnsupportedFeature(format!(
                "{:?} does not support savepoints",
                self.context.dialect().product()
            )))
        }
    }
}

/// Dropping an active transaction without calling `commit`/`rollback`
/// abandons it: an async rollback can't run inside a synchronous `Drop`, so
/// this only logs a warning and drops the pinned connection, leaving the
/// driver's own checkout/reset behavior (or the database's idle-transaction
/// timeout) to clean up the dangling server-side transaction. Callers that
/// need a guaranteed rollback on early return must call `rollback()`
/// explicitly before dropping.
impl<'a> Drop for TransactionContext<'a> {
    fn drop(&mut self) {
        if self.state == TxState::Active {
            warn!(
                product = ?self.context.dialect().product(),
                "transaction dropped without commit or rollback; connection abandoned uncommitted"
            );
        }
    }
}

//! `DatabaseContext`: the entry point callers build once per logical
//! database and share (via `Arc`) across the lifetime of a process.
//!
//! Ties together product detection, the per-product [`Dialect`], the
//! [`PoolGovernor`]/[`ModeLock`] concurrency primitives, a pinned connection
//! for `SingleConnection` mode, and the atomic counters [`crate::metrics`]
//! reads to build a snapshot. Grounded on the teacher's `Connection`
//! (pool ownership, `ping`, `close`) extended with the mode-selection state
//! machine a single-dialect engine never needed.

use crate::dialect::{dialect_for, DbProduct, Dialect};
use crate::driver::DriverFactory;
use crate::governor::{AccessMode, ModeLock, PoolGovernor, WriterTurnstile};
use dbcrud_common::Result;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// What access mode a caller is asking for. `Best` defers entirely to
/// [`best_mode`]'s §4.6 table; `Explicit` names a mode the caller wants,
/// which is honored unless the table marks it unsafe for this connection
/// string (see [`ModeCoercion`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestedMode {
    Best,
    Explicit(AccessMode),
}

impl Default for RequestedMode {
    fn default() -> Self {
        RequestedMode::Best
    }
}

/// What a connection string, for a given product, actually names: an
/// isolated in-memory database, a memory database shared across
/// connections, an on-disk file, a co-located engine (SQL Server LocalDB,
/// Firebird embedded), or an ordinary remote server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionShape {
    IsolatedMemory,
    SharedMemory,
    File,
    LocalDb,
    Embedded,
    Remote,
}

fn connection_shape(product: DbProduct, connection_string: &str) -> ConnectionShape {
    let lower = connection_string.to_ascii_lowercase();
    match product {
        DbProduct::Sqlite | DbProduct::DuckDb => {
            let is_memory = lower.contains(":memory:") || lower.contains("mode=memory") || lower.trim().is_empty();
            let is_shared = lower.contains("cache=shared");
            if is_memory && is_shared {
                ConnectionShape::SharedMemory
            } else if is_memory {
                ConnectionShape::IsolatedMemory
            } else {
                ConnectionShape::File
            }
        }
        DbProduct::SqlServer => {
            if lower.contains("localdb") {
                ConnectionShape::LocalDb
            } else {
                ConnectionShape::Remote
            }
        }
        DbProduct::Firebird => {
            if lower.contains("embedded") {
                ConnectionShape::Embedded
            } else {
                ConnectionShape::Remote
            }
        }
        _ => ConnectionShape::Remote,
    }
}

/// Resolves the §4.6 table's row for `(product, connection_string)`: the
/// safest mode, and whether deviating from it breaks correctness
/// (`required`) rather than merely leaving performance on the table.
fn safe_mode(product: DbProduct, connection_string: &str) -> (AccessMode, bool) {
    match connection_shape(product, connection_string) {
        ConnectionShape::IsolatedMemory => (AccessMode::SingleConnection, true),
        ConnectionShape::SharedMemory | ConnectionShape::File => (AccessMode::SingleWriter, false),
        ConnectionShape::LocalDb => (AccessMode::KeepAlive, false),
        ConnectionShape::Embedded => (AccessMode::SingleConnection, false),
        ConnectionShape::Remote => (AccessMode::Standard, false),
    }
}

/// One mismatch `best_mode` found between what a caller asked for and the
/// §4.6 table's safe mode, recorded on the context for observability
/// ([`DatabaseContext::mode_coercion`]). `required` mismatches were
/// overridden; non-required ones were logged and honored as asked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeCoercion {
    pub requested: AccessMode,
    pub resolved: AccessMode,
    pub required: bool,
}

/// Resolves the [`AccessMode`] a context runs under, given the product, the
/// raw connection string, and what the caller requested. `Best` always
/// returns the §4.6 table's safe mode. An `Explicit` request is honored
/// unless the table marks that row `required` for correctness, in which
/// case it is overridden and the mismatch is returned for the caller to log.
pub fn best_mode(product: DbProduct, connection_string: &str, requested: RequestedMode) -> (AccessMode, Option<ModeCoercion>) {
    let (safe, required) = safe_mode(product, connection_string);
    match requested {
        RequestedMode::Best => (safe, None),
        RequestedMode::Explicit(mode) if mode == safe => (mode, None),
        RequestedMode::Explicit(mode) if required => (
            safe,
            Some(ModeCoercion {
                requested: mode,
                resolved: safe,
                required: true,
            }),
        ),
        RequestedMode::Explicit(mode) => (
            mode,
            Some(ModeCoercion {
                requested: mode,
                resolved: mode,
                required: false,
            }),
        ),
    }
}

/// Configuration for building a [`DatabaseContext`].
#[derive(Debug, Clone)]
pub struct ContextConfig {
    pub pool_capacity: u32,
    pub governor_timeout: Duration,
    pub mode_lock_timeout: Duration,
    /// Raw connection string, inspected by [`best_mode`] for the
    /// `:memory:`/`Cache=Shared`/`LocalDB`/embedded markers the §4.6 table
    /// keys off of. Empty is treated as an isolated in-memory database for
    /// SQLite/DuckDB (the safest assumption absent any other information).
    pub connection_string: String,
    pub requested_mode: RequestedMode,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            pool_capacity: 10,
            governor_timeout: Duration::from_secs(10),
            mode_lock_timeout: Duration::from_secs(30),
            connection_string: String::new(),
            requested_mode: RequestedMode::Best,
        }
    }
}

/// Running counters [`crate::metrics::MetricsSnapshot::capture`] reads to
/// build a point-in-time snapshot.
#[derive(Default)]
pub struct ContextCounters {
    pub queries_executed: AtomicU64,
    pub queries_failed: AtomicU64,
    pub transactions_committed: AtomicU64,
    pub transactions_rolled_back: AtomicU64,
    pub retries_attempted: AtomicU64,
    pub connections_created: AtomicU64,
    pub connections_reused: AtomicU64,
    pub connections_failed: AtomicU64,
    pub timeout_failures: AtomicU64,
    pub current_open: AtomicU64,
    pub peak_open: AtomicU64,
}

impl ContextCounters {
    /// Records one freshly-established connection, bumping the high-water
    /// mark if this is the most ever held open at once.
    pub fn record_connection_created(&self) {
        self.connections_created.fetch_add(1, Ordering::Relaxed);
        let open = self.current_open.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_open.fetch_max(open, Ordering::Relaxed);
    }

    pub fn record_connection_reused(&self) {
        self.connections_reused.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connection_closed(&self) {
        self.current_open.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn record_connection_failed(&self) {
        self.connections_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout_failure(&self) {
        self.timeout_failures.fetch_add(1, Ordering::Relaxed);
    }
}

/// One logical database: a dialect, a driver factory, and the concurrency
/// primitives every [`crate::gateway::TableGateway`]/[`crate::transaction::TransactionContext`]
/// built against it shares.
pub struct DatabaseContext {
    dialect: Box<dyn Dialect>,
    driver: Arc<dyn DriverFactory>,
    read_governor: PoolGovernor,
    write_governor: PoolGovernor,
    turnstile: WriterTurnstile,
    mode_lock: ModeLock,
    access_mode: AccessMode,
    mode_coercion: Option<ModeCoercion>,
    config: ContextConfig,
    pub(crate) counters: ContextCounters,
}

impl DatabaseContext {
    pub fn new(product: DbProduct, driver: Arc<dyn DriverFactory>, config: ContextConfig) -> Self {
        let (access_mode, mode_coercion) = best_mode(product, &config.connection_string, config.requested_mode);
        if let Some(coercion) = mode_coercion {
            if coercion.required {
                tracing::warn!(
                    product = ?product,
                    requested = ?coercion.requested,
                    resolved = ?coercion.resolved,
                    "requested access mode is unsafe for this connection string; overriding"
                );
            } else {
                tracing::warn!(
                    product = ?product,
                    requested = ?coercion.requested,
                    safer_alternative = ?coercion.resolved,
                    "requested access mode differs from the recommended mode for this connection string; honoring it anyway"
                );
            }
        }
        Self {
            dialect: dialect_for(product),
            driver,
            read_governor: PoolGovernor::new(config.pool_capacity),
            write_governor: PoolGovernor::new(config.pool_capacity),
            turnstile: WriterTurnstile::new(),
            mode_lock: ModeLock::new(),
            access_mode,
            mode_coercion,
            config,
            counters: ContextCounters::default(),
        }
    }

    pub fn dialect(&self) -> &dyn Dialect {
        self.dialect.as_ref()
    }

    pub fn access_mode(&self) -> AccessMode {
        self.access_mode
    }

    /// The mismatch (if any) between the requested access mode and the
    /// §4.6 table's recommendation for this connection string, recorded at
    /// construction time.
    pub fn mode_coercion(&self) -> Option<ModeCoercion> {
        self.mode_coercion
    }

    pub fn driver(&self) -> &Arc<dyn DriverFactory> {
        &self.driver
    }

    pub fn counters(&self) -> &ContextCounters {
        &self.counters
    }

    pub fn governor_capacity(&self) -> u32 {
        self.config.pool_capacity
    }

    /// Acquires whatever serialization the current access mode requires
    /// before a caller proceeds to check out a connection from the pool
    /// governor. `Standard`/`KeepAlive` never block here; `SingleWriter`
    /// blocks write operations against each other and, via the turnstile,
    /// makes waiting writers cut ahead of not-yet-admitted readers;
    /// `SingleConnection` blocks every operation against every other.
    pub async fn enter(&self, is_write: bool) -> Result<ContextGuard<'_>> {
        match self.access_mode {
            AccessMode::Standard | AccessMode::KeepAlive => {
                let permit = if is_write {
                    self.write_governor.acquire(self.config.governor_timeout).await?
                } else {
                    self.read_governor.acquire(self.config.governor_timeout).await?
                };
                Ok(ContextGuard {
                    _mode_guard: None,
                    _permit: permit,
                })
            }
            AccessMode::SingleWriter => {
                if is_write {
                    let _wait_guard = self.turnstile.enter_wait();
                    let mode_guard = self.mode_lock.acquire(self.config.mode_lock_timeout).await?;
                    let permit = self.write_governor.acquire(self.config.governor_timeout).await?;
                    Ok(ContextGuard {
                        _mode_guard: Some(mode_guard),
                        _permit: permit,
                    })
                } else {
                    self.turnstile.wait_for_clear().await;
                    let permit = self.read_governor.acquire(self.config.governor_timeout).await?;
                    Ok(ContextGuard {
                        _mode_guard: None,
                        _permit: permit,
                    })
                }
            }
            AccessMode::SingleConnection => {
                let mode_guard = self.mode_lock.acquire(self.config.mode_lock_timeout).await?;
                let permit = if is_write {
                    self.write_governor.acquire(self.config.governor_timeout).await?
                } else {
                    self.read_governor.acquire(self.config.governor_timeout).await?
                };
                Ok(ContextGuard {
                    _mode_guard: Some(mode_guard),
                    _permit: permit,
                })
            }
        }
    }

    pub fn in_use_connections(&self) -> u32 {
        self.read_governor.in_use() + self.write_governor.in_use()
    }

    /// Like [`DatabaseContext::enter`], but returns a lease detached from
    /// `&self`'s lifetime so a caller (the streaming reader) can hold it
    /// alongside a checked-out connection for as long as it likes, rather
    /// than within the scope of one `with_retry` closure.
    pub async fn enter_owned(&self, is_write: bool) -> Result<OwnedContextGuard> {
        match self.access_mode {
            AccessMode::Standard | AccessMode::KeepAlive => {
                let permit = if is_write {
                    self.write_governor.acquire(self.config.governor_timeout).await?
                } else {
                    self.read_governor.acquire(self.config.governor_timeout).await?
                };
                Ok(OwnedContextGuard {
                    _mode_guard: None,
                    _permit: permit,
                })
            }
            AccessMode::SingleWriter => {
                if is_write {
                    let _wait_guard = self.turnstile.enter_wait();
                    let mode_guard = self.mode_lock.acquire_owned(self.config.mode_lock_timeout).await?;
                    let permit = self.write_governor.acquire(self.config.governor_timeout).await?;
                    Ok(OwnedContextGuard {
                        _mode_guard: Some(mode_guard),
                        _permit: permit,
                    })
                } else {
                    self.turnstile.wait_for_clear().await;
                    let permit = self.read_governor.acquire(self.config.governor_timeout).await?;
                    Ok(OwnedContextGuard {
                        _mode_guard: None,
                        _permit: permit,
                    })
                }
            }
            AccessMode::SingleConnection => {
                let mode_guard = self.mode_lock.acquire_owned(self.config.mode_lock_timeout).await?;
                let permit = if is_write {
                    self.write_governor.acquire(self.config.governor_timeout).await?
                } else {
                    self.read_governor.acquire(self.config.governor_timeout).await?
                };
                Ok(OwnedContextGuard {
                    _mode_guard: Some(mode_guard),
                    _permit: permit,
                })
            }
        }
    }

    pub async fn close(&self) {
        self.driver.close().await;
    }
}

/// Held for the duration of one operation; releases the mode lock (if any)
/// and the governor permit together when dropped.
pub struct ContextGuard<'a> {
    _mode_guard: Option<tokio::sync::MutexGuard<'a, ()>>,
    _permit: tokio::sync::OwnedSemaphorePermit,
}

/// Like [`ContextGuard`], but owns its mode-lock guard instead of borrowing
/// it from a `DatabaseContext` reference, so it can be stored inside a
/// longer-lived object such as [`crate::reader::TrackedReader`].
pub struct OwnedContextGuard {
    _mode_guard: Option<tokio::sync::OwnedMutexGuard<()>>,
    _permit: tokio::sync::OwnedSemaphorePermit,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::fake::FakeDriverFactory;

    #[test]
    fn isolated_memory_requires_single_connection() {
        assert_eq!(safe_mode(DbProduct::Sqlite, ":memory:"), (AccessMode::SingleConnection, true));
        assert_eq!(safe_mode(DbProduct::Sqlite, ""), (AccessMode::SingleConnection, true));
        assert_eq!(safe_mode(DbProduct::DuckDb, ":memory:"), (AccessMode::SingleConnection, true));
    }

    #[test]
    fn shared_memory_and_file_sqlite_use_single_writer() {
        assert_eq!(
            safe_mode(DbProduct::Sqlite, "file::memory:?cache=shared"),
            (AccessMode::SingleWriter, false)
        );
        assert_eq!(safe_mode(DbProduct::Sqlite, "file:/tmp/app.db"), (AccessMode::SingleWriter, false));
        assert_eq!(safe_mode(DbProduct::DuckDb, "/tmp/warehouse.duckdb"), (AccessMode::SingleWriter, false));
    }

    #[test]
    fn sql_server_localdb_uses_keep_alive() {
        assert_eq!(
            safe_mode(DbProduct::SqlServer, "Server=(localdb)\\MSSQLLocalDB;"),
            (AccessMode::KeepAlive, false)
        );
        assert_eq!(
            safe_mode(DbProduct::SqlServer, "Server=tcp:prod.example.com;"),
            (AccessMode::Standard, false)
        );
    }

    #[test]
    fn firebird_embedded_uses_single_connection_as_a_recommendation_only() {
        assert_eq!(
            safe_mode(DbProduct::Firebird, "embedded:/var/db/app.fdb"),
            (AccessMode::SingleConnection, false)
        );
        assert_eq!(
            safe_mode(DbProduct::Firebird, "tcp://db.example.com/app.fdb"),
            (AccessMode::Standard, false)
        );
    }

    #[test]
    fn remote_and_unknown_products_default_to_standard() {
        assert_eq!(safe_mode(DbProduct::PostgreSql, "postgres://host/db"), (AccessMode::Standard, false));
        assert_eq!(safe_mode(DbProduct::Unknown, "whatever"), (AccessMode::Standard, false));
    }

    #[test]
    fn best_mode_overrides_an_unsafe_explicit_request() {
        let (resolved, coercion) = best_mode(DbProduct::Sqlite, ":memory:", RequestedMode::Explicit(AccessMode::Standard));
        assert_eq!(resolved, AccessMode::SingleConnection);
        let coercion = coercion.unwrap();
        assert!(coercion.required);
        assert_eq!(coercion.requested, AccessMode::Standard);
        assert_eq!(coercion.resolved, AccessMode::SingleConnection);
    }

    #[test]
    fn best_mode_honors_a_non_required_explicit_request_with_a_warning() {
        let (resolved, coercion) = best_mode(
            DbProduct::Firebird,
            "embedded:/var/db/app.fdb",
            RequestedMode::Explicit(AccessMode::Standard),
        );
        assert_eq!(resolved, AccessMode::Standard);
        let coercion = coercion.unwrap();
        assert!(!coercion.required);
        assert_eq!(coercion.requested, AccessMode::Standard);
        assert_eq!(coercion.resolved, AccessMode::Standard);
    }

    #[test]
    fn best_mode_requested_best_never_coerces() {
        let (resolved, coercion) = best_mode(DbProduct::Sqlite, "file:/tmp/app.db", RequestedMode::Best);
        assert_eq!(resolved, AccessMode::SingleWriter);
        assert!(coercion.is_none());
    }

    #[tokio::test]
    async fn enter_serializes_single_connection_mode() {
        let driver: Arc<dyn DriverFactory> = Arc::new(FakeDriverFactory::new());
        let config = ContextConfig {
            connection_string: ":memory:".to_string(),
            requested_mode: RequestedMode::Best,
            ..ContextConfig::default()
        };
        let ctx = DatabaseContext::new(DbProduct::Sqlite, driver, config);
        assert_eq!(ctx.access_mode(), AccessMode::SingleConnection);
        let guard = ctx.enter(true).await.unwrap();
        assert_eq!(ctx.in_use_connections(), 1);
        drop(guard);
        assert_eq!(ctx.in_use_connections(), 0);
    }

    #[tokio::test]
    async fn standard_mode_does_not_acquire_mode_lock_for_reads() {
        let driver: Arc<dyn DriverFactory> = Arc::new(FakeDriverFactory::new());
        let ctx = DatabaseContext::new(DbProduct::PostgreSql, driver, ContextConfig::default());
        let a = ctx.enter(false).await.unwrap();
        let b = ctx.enter(false).await.unwrap();
        assert_eq!(ctx.in_use_connections(), 2);
        drop(a);
        drop(b);
    }

    #[tokio::test]
    async fn single_writer_mode_lets_reads_proceed_concurrently() {
        let driver: Arc<dyn DriverFactory> = Arc::new(FakeDriverFactory::new());
        let config = ContextConfig {
            connection_string: "file:/tmp/app.db".to_string(),
            ..ContextConfig::default()
        };
        let ctx = DatabaseContext::new(DbProduct::Sqlite, driver, config);
        assert_eq!(ctx.access_mode(), AccessMode::SingleWriter);
        let a = ctx.enter(false).await.unwrap();
        let b = ctx.enter(false).await.unwrap();
        assert_eq!(ctx.in_use_connections(), 2);
        drop(a);
        drop(b);
    }

    #[tokio::test]
    async fn single_writer_mode_blocks_a_second_concurrent_write() {
        let driver: Arc<dyn DriverFactory> = Arc::new(FakeDriverFactory::new());
        let config = ContextConfig {
            connection_string: "file:/tmp/app.db".to_string(),
            mode_lock_timeout: Duration::from_millis(20),
            ..ContextConfig::default()
        };
        let ctx = Arc::new(DatabaseContext::new(DbProduct::Sqlite, driver, config));
        let held = ctx.enter(true).await.unwrap();
        let result = ctx.enter(true).await;
        assert!(result.is_err());
        drop(held);
    }

    #[tokio::test]
    async fn single_writer_turnstile_blocks_a_new_reader_while_a_writer_waits() {
        use std::sync::atomic::AtomicBool;
        use tokio::sync::Notify;

        let driver: Arc<dyn DriverFactory> = Arc::new(FakeDriverFactory::new());
        let config = ContextConfig {
            connection_string: "file:/tmp/app.db".to_string(),
            pool_capacity: 1,
            mode_lock_timeout: Duration::from_millis(200),
            governor_timeout: Duration::from_millis(200),
            ..ContextConfig::default()
        };
        let ctx = Arc::new(DatabaseContext::new(DbProduct::Sqlite, driver, config));

        // Saturate the write governor so a second writer has to queue inside
        // the turnstile before it can acquire the mode lock or a permit.
        let held_write = ctx.enter(true).await.unwrap();

        let ctx2 = ctx.clone();
        let writer_acquired = Arc::new(Notify::new());
        let writer_acquired2 = writer_acquired.clone();
        let waiting_writer = tokio::spawn(async move {
            let guard = ctx2.enter(true).await.unwrap();
            writer_acquired2.notify_one();
            tokio::time::sleep(Duration::from_millis(10)).await;
            drop(guard);
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let ctx3 = ctx.clone();
        let reader_acquired = Arc::new(AtomicBool::new(false));
        let reader_acquired2 = reader_acquired.clone();
        let reader = tokio::spawn(async move {
            let guard = ctx3.enter(false).await.unwrap();
            reader_acquired2.store(true, Ordering::SeqCst);
            drop(guard);
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(
            !reader_acquired.load(Ordering::SeqCst),
            "reader must not be admitted while a writer is waiting"
        );

        drop(held_write);
        writer_acquired.notified().await;
        waiting_writer.await.unwrap();
        reader.await.unwrap();
        assert!(reader_acquired.load(Ordering::SeqCst));
    }

    #[test]
    fn connection_counters_track_high_water_mark() {
        let counters = ContextCounters::default();
        counters.record_connection_created();
        counters.record_connection_created();
        counters.record_connection_created();
        counters.record_connection_closed();
        assert_eq!(counters.current_open.load(Ordering::Relaxed), 2);
        assert_eq!(counters.peak_open.load(Ordering::Relaxed), 3);
        assert_eq!(counters.connections_created.load(Ordering::Relaxed), 3);
    }
}

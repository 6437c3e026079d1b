//! Unified error taxonomy for the data-access engine.

use thiserror::Error;

/// Result type alias used throughout the engine.
pub type Result<T> = std::result::Result<T, CrudError>;

/// Unified error type spanning configuration, dialect, concurrency,
/// transaction, data-integrity, and driver failures.
#[derive(Error, Debug, Clone)]
pub enum CrudError {
    /// Bad connection string, missing key attribute, conflicting mapping attributes.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Requested SQL feature is unsupported by the detected product/version.
    #[error("unsupported dialect feature: {0}")]
    UnsupportedFeature(String),

    /// Rendered parameter count exceeds the dialect's limit.
    #[error("too many parameters: {actual} exceeds dialect limit of {limit}")]
    TooManyParameters { limit: usize, actual: usize },

    /// Mode-lock acquisition timed out.
    #[error("mode lock contention: {waiters} waiters, {cumulative_timeouts} cumulative timeouts")]
    ModeContention {
        waiters: u64,
        cumulative_timeouts: u64,
    },

    /// Pool governor permit acquisition timed out.
    #[error("pool saturated: {in_use} in use, {queued} queued")]
    PoolSaturated { in_use: u32, queued: u32 },

    /// Operation was cancelled via a `CancellationToken`.
    #[error("operation cancelled")]
    OperationCancelled,

    /// Double-commit, commit-after-rollback, or other transaction misuse.
    #[error("transaction state error: {0}")]
    TransactionState(String),

    /// Requested isolation level is unsupported in the current session.
    #[error("unsupported isolation level: {0}")]
    UnsupportedIsolation(String),

    /// Unique constraint violation.
    #[error("unique constraint violation: {0}")]
    UniqueViolation(String),

    /// Foreign key constraint violation.
    #[error("foreign key constraint violation: {0}")]
    ForeignKeyViolation(String),

    /// Optimistic-concurrency version token mismatch.
    #[error("version conflict: {0}")]
    VersionConflict(String),

    /// Entity descriptor or value validation failure.
    #[error("validation error: {0}")]
    Validation(String),

    /// Entity has no surrogate id or primary key columns.
    #[error("entity has no primary key: {0}")]
    NoPrimaryKey(String),

    /// SQL generation or execution error that isn't otherwise classified.
    #[error("query error: {0}")]
    Query(String),

    /// Row/column decode failure.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// Connection establishment or transport failure.
    #[error("connection error: {0}")]
    Connection(String),

    /// Operation timed out (distinct from pool/mode-lock timeouts above).
    #[error("timeout: {0}")]
    Timeout(String),

    /// Deadlock detected by the database.
    #[error("deadlock detected: {0}")]
    Deadlock(String),

    /// Transient error that may succeed on retry (serialization failure, admin shutdown).
    #[error("transient error: {0}")]
    Transient(String),

    /// Error that doesn't fit elsewhere; usually a driver/internal invariant break.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CrudError {
    /// True if the failure is transient and the operation may succeed if retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CrudError::Deadlock(_) | CrudError::Timeout(_) | CrudError::Transient(_)
        )
    }

    /// True if this is a constraint violation (never retryable without changing the data).
    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            CrudError::UniqueViolation(_)
                | CrudError::ForeignKeyViolation(_)
                | CrudError::VersionConflict(_)
        )
    }
}

#[cfg(feature = "sqlx-errors")]
impl From<sqlx::Error> for CrudError {
    fn from(err: sqlx::Error) -> Self {
        use sqlx::Error;
        match &err {
            Error::Configuration(_) => CrudError::Connection(err.to_string()),
            Error::Database(db_err) => {
                if db_err.is_unique_violation() {
                    return CrudError::UniqueViolation(err.to_string());
                }
                if db_err.is_foreign_key_violation() {
                    return CrudError::ForeignKeyViolation(err.to_string());
                }
                if db_err.is_check_violation() {
                    return CrudError::Validation(err.to_string());
                }
                // Fall back to SQLSTATE-class matching for the retryable classes
                // shared by Postgres, CockroachDB and (loosely) the others.
                if let Some(code) = db_err.code() {
                    let code_str: &str = &code;
                    match code_str {
                        "40P01" => return CrudError::Deadlock(err.to_string()),
                        "40001" => return CrudError::Transient(err.to_string()),
                        code if code.starts_with("40") => {
                            return CrudError::Transient(err.to_string())
                        }
                        code if code.starts_with("08") => {
                            return CrudError::Connection(err.to_string())
                        }
                        "57P01" | "57P02" | "57P03" => {
                            return CrudError::Transient(err.to_string())
                        }
                        _ => {}
                    }
                }
                CrudError::Query(err.to_string())
            }
            Error::Io(_) | Error::Tls(_) | Error::Protocol(_) => {
                CrudError::Connection(err.to_string())
            }
            Error::RowNotFound => CrudError::Query("row not found".to_string()),
            Error::TypeNotFound { .. }
            | Error::ColumnDecode { .. }
            | Error::Decode(_) => CrudError::Deserialization(err.to_string()),
            Error::ColumnIndexOutOfBounds { .. } | Error::ColumnNotFound(_) => {
                CrudError::Query(err.to_string())
            }
            Error::PoolTimedOut => CrudError::Timeout("connection pool timed out".to_string()),
            Error::PoolClosed => CrudError::Connection("connection pool closed".to_string()),
            Error::WorkerCrashed => CrudError::Internal("worker thread crashed".to_string()),
            _ => CrudError::Query(err.to_string()),
        }
    }
}

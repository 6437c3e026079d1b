//! The single seam between the dialect-aware core and an actual database
//! driver. `DriverFactory` is implemented once per wire protocol; the core
//! (gateway, bulk engine, transaction context) never names a concrete
//! driver type directly.
//!
//! Grounded on the teacher's own driver boundary: `ouroboros-postgres`
//! wraps `sqlx::PgPool` behind `Connection`/`Row::from_sqlx`, never exposing
//! `sqlx` types past its own module boundary to the rest of the `ouroboros`
//! workspace. This trait generalizes that boundary so a second, third, or
//! fourth driver crate could implement it without the core crate changing.

use crate::container::SqlContainer;
use crate::value::SqlValue;
use async_trait::async_trait;
use dbcrud_common::Result;
use std::collections::HashMap;

/// One row as returned by a driver: column name -> value, the same shape
/// the teacher's `Row` wraps a `HashMap<String, ExtractedValue>` in.
pub type DriverRow = HashMap<String, SqlValue>;

/// A live, checked-out database connection. Implementations wrap whatever
/// the underlying driver's pooled-connection type is.
#[async_trait]
pub trait DriverConnection: Send {
    async fn execute(&mut self, container: &SqlContainer) -> Result<u64>;
    async fn fetch_all(&mut self, container: &SqlContainer) -> Result<Vec<DriverRow>>;
    async fn fetch_optional(&mut self, container: &SqlContainer) -> Result<Option<DriverRow>>;
    async fn begin(&mut self) -> Result<()>;
    async fn commit(&mut self) -> Result<()>;
    async fn rollback(&mut self) -> Result<()>;
    async fn run_session_settings(&mut self, statements: &[String]) -> Result<()>;
}

/// Builds and owns the pool for one dialect/wire-protocol, handing out
/// connections that satisfy [`DriverConnection`].
#[async_trait]
pub trait DriverFactory: Send + Sync {
    async fn acquire(&self) -> Result<Box<dyn DriverConnection>>;

    /// Closes the underlying pool; called once on `DatabaseContext` shutdown.
    async fn close(&self);
}

#[cfg(any(test, feature = "test-util"))]
pub mod fake {
    //! In-memory `DriverFactory` used by the gateway and bulk engine's own
    //! tests, and by integration tests that exercise CRUD without a real
    //! database. Mirrors the shape of the teacher's row-map storage: a table
    //! is a `Vec<DriverRow>`, but rather than matching rendered SQL against a
    //! real parser, a test pre-loads the exact response each call should
    //! return (`push_fetch_optional`/`push_fetch_all`/`push_execute`) and
    //! later asserts against the rendered SQL log (`executed_sql`), which is
    //! enough to drive the gateway's/bulk engine's code paths without
    //! hand-rolling a SQL engine.
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex as StdMutex};

    #[derive(Default)]
    struct FakeInner {
        fetch_optional: StdMutex<VecDeque<Result<Option<DriverRow>>>>,
        fetch_all: StdMutex<VecDeque<Result<Vec<DriverRow>>>>,
        execute: StdMutex<VecDeque<Result<u64>>>,
        executed_sql: StdMutex<Vec<String>>,
        acquire_count: std::sync::atomic::AtomicU64,
    }

    /// Shared handle a test holds onto to pre-load responses and later
    /// inspect what SQL the gateway/bulk engine actually rendered. Cloning
    /// shares the same underlying queues, so the handle passed to
    /// `DatabaseContext::new` and the handle a test asserts against are the
    /// same state.
    #[derive(Clone, Default)]
    pub struct FakeDriverFactory {
        inner: Arc<FakeInner>,
    }

    impl FakeDriverFactory {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn push_fetch_optional(&self, response: Result<Option<DriverRow>>) {
            self.inner.fetch_optional.lock().unwrap().push_back(response);
        }

        pub fn push_fetch_all(&self, response: Result<Vec<DriverRow>>) {
            self.inner.fetch_all.lock().unwrap().push_back(response);
        }

        pub fn push_execute(&self, response: Result<u64>) {
            self.inner.execute.lock().unwrap().push_back(response);
        }

        /// SQL text of every statement executed so far, in call order.
        pub fn executed_sql(&self) -> Vec<String> {
            self.inner.executed_sql.lock().unwrap().clone()
        }

        pub fn acquire_count(&self) -> u64 {
            self.inner.acquire_count.load(std::sync::atomic::Ordering::Relaxed)
        }
    }

    #[async_trait]
    impl DriverFactory for FakeDriverFactory {
        async fn acquire(&self) -> Result<Box<dyn DriverConnection>> {
            self.inner.acquire_count.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            Ok(Box::new(FakeConnectionOwned { inner: self.inner.clone() }))
        }

        async fn close(&self) {}
    }

    pub struct FakeConnectionOwned {
        inner: Arc<FakeInner>,
    }

    #[async_trait]
    impl DriverConnection for FakeConnectionOwned {
        async fn execute(&mut self, container: &SqlContainer) -> Result<u64> {
            self.inner.executed_sql.lock().unwrap().push(container.sql.clone());
            self.inner.execute.lock().unwrap().pop_front().unwrap_or(Ok(0))
        }

        async fn fetch_all(&mut self, container: &SqlContainer) -> Result<Vec<DriverRow>> {
            self.inner.executed_sql.lock().unwrap().push(container.sql.clone());
            self.inner.fetch_all.lock().unwrap().pop_front().unwrap_or(Ok(vec![]))
        }

        async fn fetch_optional(&mut self, container: &SqlContainer) -> Result<Option<DriverRow>> {
            self.inner.executed_sql.lock().unwrap().push(container.sql.clone());
            self.inner.fetch_optional.lock().unwrap().pop_front().unwrap_or(Ok(None))
        }

        async fn begin(&mut self) -> Result<()> {
            Ok(())
        }

        async fn commit(&mut self) -> Result<()> {
            Ok(())
        }

        async fn rollback(&mut self) -> Result<()> {
            Ok(())
        }

        async fn run_session_settings(&mut self, _statements: &[String]) -> Result<()> {
            Ok(())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::container::SqlContainer;

        #[tokio::test]
        async fn pre_loaded_responses_are_returned_in_order() {
            let factory = FakeDriverFactory::new();
            factory.push_execute(Ok(1));
            factory.push_execute(Ok(5));
            let mut conn = factory.acquire().await.unwrap();
            let container = SqlContainer::new("UPDATE t SET x = 1", vec![]);
            assert_eq!(conn.execute(&container).await.unwrap(), 1);
            assert_eq!(conn.execute(&container).await.unwrap(), 5);
            assert_eq!(factory.executed_sql().len(), 2);
        }

        #[tokio::test]
        async fn missing_response_defaults_to_empty() {
            let factory = FakeDriverFactory::new();
            let mut conn = factory.acquire().await.unwrap();
            let container = SqlContainer::new("SELECT 1", vec![]);
            assert_eq!(conn.fetch_all(&container).await.unwrap(), Vec::new());
            assert!(conn.fetch_optional(&container).await.unwrap().is_none());
        }
    }
}

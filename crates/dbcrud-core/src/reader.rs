//! Streaming retrieval: yields one entity at a time while holding the
//! reader's lease on the connection lock for the whole lifetime of the
//! stream, rather than releasing it as soon as the query returns the way
//! [`crate::gateway::TableGateway::retrieve`] does.
//!
//! [`crate::driver::DriverConnection`] only exposes whole-result
//! `fetch_all`, not a server-side cursor, so the rows are materialized up
//! front; what this module adds over calling `retrieve` and iterating the
//! resulting `Vec` is that the governor permit (and mode lock, under
//! `SingleConnection`) stay held until every row has been consumed or the
//! stream is dropped. Built on `futures::Stream`, already a workspace
//! dependency the bulk engine uses for its own concurrency.

use crate::container::SqlContainer;
use crate::context::{DatabaseContext, OwnedContextGuard};
use crate::driver::{DriverConnection, DriverRow};
use crate::typemap::EntityDescriptor;
use dbcrud_common::Result;
use futures::Stream;
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};

/// Holds one reader's lease on a `DatabaseContext`: the governor permit (and
/// mode lock, under `SingleConnection`) plus the checked-out connection,
/// alongside every row already fetched for this read. Dropping it releases
/// the lease and the connection together.
pub struct TrackedReader {
    _guard: OwnedContextGuard,
    _conn: Box<dyn DriverConnection>,
    rows: VecDeque<DriverRow>,
}

impl TrackedReader {
    pub(crate) async fn open(context: &Arc<DatabaseContext>, container: &SqlContainer) -> Result<Self> {
        let guard = context.enter_owned(false).await?;
        let mut conn = context.driver().acquire().await?;
        let rows = conn.fetch_all(container).await?;
        Ok(Self {
            _guard: guard,
            _conn: conn,
            rows: rows.into(),
        })
    }

    /// Pops the next buffered row, if any.
    fn next_row(&mut self) -> Option<DriverRow> {
        self.rows.pop_front()
    }

    /// Rows not yet yielded.
    pub fn remaining(&self) -> usize {
        self.rows.len()
    }
}

/// A `futures::Stream` of decoded entities backed by one [`TrackedReader`].
pub struct EntityStream<T> {
    reader: TrackedReader,
    descriptor: Arc<EntityDescriptor<T>>,
}

impl<T: Default> EntityStream<T> {
    pub(crate) fn new(reader: TrackedReader, descriptor: Arc<EntityDescriptor<T>>) -> Self {
        Self { reader, descriptor }
    }

    /// Rows fetched but not yet yielded by this stream.
    pub fn remaining(&self) -> usize {
        self.reader.remaining()
    }
}

impl<T: Default> Stream for EntityStream<T> {
    type Item = Result<T>;

    fn poll_next(self: Pin<&mut Self>, _cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match this.reader.next_row() {
            Some(row) => {
                let mut instance = T::default();
                match this.descriptor.apply_row(&mut instance, &row) {
                    Ok(()) => Poll::Ready(Some(Ok(instance))),
                    Err(err) => Poll::Ready(Some(Err(err))),
                }
            }
            None => Poll::Ready(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextConfig;
    use crate::dialect::DbProduct;
    use crate::driver::fake::FakeDriverFactory;
    use crate::gateway::TableGateway;
    use crate::typemap::{ColumnDescriptor, MappedEntity};
    use crate::value::{SemanticType, SqlValue};
    use futures::StreamExt;

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Widget {
        id: i64,
        name: String,
    }

    impl MappedEntity for Widget {
        fn describe() -> Arc<EntityDescriptor<Self>> {
            Arc::new(
                EntityDescriptor::new("widgets")
                    .column(
                        ColumnDescriptor::new(
                            "id",
                            SemanticType::BigInt,
                            |w: &Widget| SqlValue::BigInt(w.id),
                            |w: &mut Widget, v| {
                                w.id = v.as_i64().unwrap_or_default();
                                Ok(())
                            },
                        )
                        .identity(),
                    )
                    .column(ColumnDescriptor::new(
                        "name",
                        SemanticType::Text { max_len: Some(100) },
                        |w: &Widget| SqlValue::String(w.name.clone()),
                        |w: &mut Widget, v| {
                            if let SqlValue::String(s) = v {
                                w.name = s;
                            }
                            Ok(())
                        },
                    )),
            )
        }
    }

    fn row(id: i64, name: &str) -> DriverRow {
        let mut row = DriverRow::new();
        row.insert("id".to_string(), SqlValue::BigInt(id));
        row.insert("name".to_string(), SqlValue::String(name.to_string()));
        row
    }

    #[tokio::test]
    async fn load_stream_yields_every_row_in_order() {
        let factory = FakeDriverFactory::new();
        factory.push_fetch_all(Ok(vec![row(1, "a"), row(2, "b"), row(3, "c")]));
        let driver: Arc<dyn crate::driver::DriverFactory> = Arc::new(factory);
        let context = Arc::new(DatabaseContext::new(DbProduct::PostgreSql, driver, ContextConfig::default()));
        let gateway = TableGateway::<Widget>::new(context).unwrap();

        let mut stream = gateway.load_stream().await.unwrap();
        let mut names = Vec::new();
        while let Some(item) = stream.next().await {
            names.push(item.unwrap().name);
        }
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn reader_holds_the_single_connection_lease_until_dropped() {
        let factory = FakeDriverFactory::new();
        factory.push_fetch_all(Ok(vec![row(1, "a")]));
        let driver: Arc<dyn crate::driver::DriverFactory> = Arc::new(factory);
        let config = ContextConfig {
            connection_string: ":memory:".to_string(),
            mode_lock_timeout: std::time::Duration::from_millis(20),
            ..ContextConfig::default()
        };
        let context = Arc::new(DatabaseContext::new(DbProduct::Sqlite, driver, config));
        let gateway = TableGateway::<Widget>::new(context.clone()).unwrap();

        let stream = gateway.load_stream().await.unwrap();
        // Single-connection mode is held by the open stream; any other
        // operation against the same context must contend for it.
        let blocked = context.enter(true).await;
        assert!(blocked.is_err());
        drop(stream);
        assert!(context.enter(true).await.is_ok());
    }
}

//! Exercises [`TableGateway`] and [`BulkExecutor`] end to end against the
//! in-memory [`FakeDriverFactory`], the same way the teacher's
//! `tests/test_row_crud.rs`/`tests/test_transaction.rs` exercise `Row`/
//! `QueryExecutor` against a real connection, but pre-loaded rather than
//! `#[ignore]`d behind `DATABASE_URL` since there is no wire protocol here
//! to actually speak to.

use std::collections::HashMap;
use std::sync::Arc;

use dbcrud_core::driver::fake::FakeDriverFactory;
use dbcrud_core::{
    BulkConfig, BulkExecutor, ColumnDescriptor, ContextConfig, CrudError, DatabaseContext, DbProduct,
    EntityDescriptor, MappedEntity, SemanticType, SqlValue, Strategy, TableGateway,
};

#[derive(Debug, Default, Clone, PartialEq)]
struct Account {
    id: i64,
    email: String,
    balance_cents: i64,
    version: i32,
}

impl MappedEntity for Account {
    fn describe() -> Arc<EntityDescriptor<Self>> {
        Arc::new(
            EntityDescriptor::new("accounts")
                .column(
                    ColumnDescriptor::new(
                        "id",
                        SemanticType::BigInt,
                        |a: &Account| SqlValue::BigInt(a.id),
                        |a: &mut Account, v| {
                            a.id = v.as_i64().unwrap_or_default();
                            Ok(())
                        },
                    )
                    .identity(),
                )
                .column(ColumnDescriptor::new(
                    "email",
                    SemanticType::Text { max_len: Some(254) },
                    |a: &Account| SqlValue::String(a.email.clone()),
                    |a: &mut Account, v| {
                        if let SqlValue::String(s) = v {
                            a.email = s;
                        }
                        Ok(())
                    },
                ))
                .column(ColumnDescriptor::new(
                    "balance_cents",
                    SemanticType::BigInt,
                    |a: &Account| SqlValue::BigInt(a.balance_cents),
                    |a: &mut Account, v| {
                        if let SqlValue::BigInt(i) = v {
                            a.balance_cents = i;
                        }
                        Ok(())
                    },
                ))
                .column(
                    ColumnDescriptor::new(
                        "version",
                        SemanticType::Int,
                        |a: &Account| SqlValue::Int(a.version),
                        |a: &mut Account, v| {
                            if let SqlValue::Int(i) = v {
                                a.version = i;
                            }
                            Ok(())
                        },
                    )
                    .version(),
                ),
        )
    }
}

fn account_row(id: i64, email: &str, balance_cents: i64, version: i32) -> HashMap<String, SqlValue> {
    let mut row = HashMap::new();
    row.insert("id".to_string(), SqlValue::BigInt(id));
    row.insert("email".to_string(), SqlValue::String(email.to_string()));
    row.insert("balance_cents".to_string(), SqlValue::BigInt(balance_cents));
    row.insert("version".to_string(), SqlValue::Int(version));
    row
}

fn context_with(factory: FakeDriverFactory) -> Arc<DatabaseContext> {
    let driver: Arc<dyn dbcrud_core::DriverFactory> = Arc::new(factory);
    Arc::new(DatabaseContext::new(DbProduct::PostgreSql, driver, ContextConfig::default()))
}

#[tokio::test]
async fn create_retrieve_update_upsert_delete_round_trip() {
    let factory = FakeDriverFactory::new();
    // create() issues an INSERT ... RETURNING on Postgres, so the driver
    // hands back the identity column rather than affected-row count.
    factory.push_fetch_optional(Ok(Some(account_row(1, "a@example.com", 0, 0))));
    let context = context_with(factory.clone());
    let gateway: TableGateway<Account> = TableGateway::new(context.clone()).unwrap();

    let mut account = Account {
        id: 0,
        email: "a@example.com".to_string(),
        balance_cents: 0,
        version: 0,
    };
    gateway.create(&mut account).await.unwrap();
    assert_eq!(account.id, 1);

    factory.push_fetch_optional(Ok(Some(account_row(1, "a@example.com", 0, 0))));
    let found = gateway.retrieve_one(&[SqlValue::BigInt(1)]).await.unwrap().unwrap();
    assert_eq!(found.email, "a@example.com");

    factory.push_execute(Ok(1));
    account.balance_cents = 500;
    gateway.update(&mut account).await.unwrap();
    assert_eq!(account.version, 1);

    factory.push_execute(Ok(1));
    gateway.upsert(&mut account).await.unwrap();

    factory.push_execute(Ok(1));
    gateway.delete(&account).await.unwrap();

    let executed = factory.executed_sql();
    assert!(executed[0].starts_with("INSERT INTO"));
    assert!(executed[1].starts_with("SELECT"));
    assert!(executed[2].starts_with("UPDATE"));
    assert!(executed[3].contains("ON CONFLICT"));
    assert!(executed[4].starts_with("DELETE FROM"));
}

#[tokio::test]
async fn retrieve_one_returns_none_for_missing_row() {
    let factory = FakeDriverFactory::new();
    let context = context_with(factory);
    let gateway: TableGateway<Account> = TableGateway::new(context).unwrap();
    assert!(gateway.retrieve_one(&[SqlValue::BigInt(404)]).await.unwrap().is_none());
}

#[tokio::test]
async fn update_with_zero_rows_affected_surfaces_version_conflict() {
    let factory = FakeDriverFactory::new();
    factory.push_execute(Ok(0));
    let context = context_with(factory);
    let gateway: TableGateway<Account> = TableGateway::new(context).unwrap();
    let mut account = Account {
        id: 1,
        email: "a@example.com".to_string(),
        balance_cents: 0,
        version: 5,
    };
    let result = gateway.update(&mut account).await;
    assert!(matches!(result, Err(CrudError::VersionConflict(_))));
}

#[tokio::test]
async fn retrieve_by_entities_fetches_each_instance_key() {
    let factory = FakeDriverFactory::new();
    factory.push_fetch_optional(Ok(Some(account_row(1, "a@example.com", 0, 0))));
    factory.push_fetch_optional(Ok(None));
    factory.push_fetch_optional(Ok(Some(account_row(3, "c@example.com", 0, 0))));
    let context = context_with(factory);
    let gateway: TableGateway<Account> = TableGateway::new(context).unwrap();

    let probes = vec![
        Account { id: 1, ..Default::default() },
        Account { id: 2, ..Default::default() },
        Account { id: 3, ..Default::default() },
    ];
    let found = gateway.retrieve_by_entities(&probes).await.unwrap();
    assert_eq!(found.len(), 2);
    assert_eq!(found[0].email, "a@example.com");
    assert_eq!(found[1].email, "c@example.com");
}

fn sample_accounts(n: usize) -> Vec<Account> {
    (0..n)
        .map(|i| Account {
            id: 0,
            email: format!("user{i}@example.com"),
            balance_cents: i as i64,
            version: 0,
        })
        .collect()
}

#[tokio::test]
async fn bulk_create_sequential_reports_all_rows() {
    let factory = FakeDriverFactory::new();
    for _ in 0..4 {
        factory.push_fetch_optional(Ok(Some(account_row(1, "x@example.com", 0, 0))));
    }
    let context = context_with(factory.clone());
    let executor = BulkExecutor::<Account>::new(context, BulkConfig::new().strategy(Strategy::Sequential)).unwrap();

    let mut rows = sample_accounts(4);
    let result = executor.create_many(&mut rows, None).await.unwrap();
    assert_eq!(result.success_count, 4);
    assert_eq!(result.error_count, 0);
    assert_eq!(factory.executed_sql().len(), 4);
}

#[tokio::test]
async fn bulk_create_batched_executes_one_multi_row_statement() {
    let factory = FakeDriverFactory::new();
    factory.push_execute(Ok(6));
    let context = context_with(factory.clone());
    let executor = BulkExecutor::<Account>::new(context, BulkConfig::new().strategy(Strategy::Batched)).unwrap();

    let mut rows = sample_accounts(6);
    let result = executor.create_many(&mut rows, None).await.unwrap();
    assert_eq!(result.success_count, 6);
    assert_eq!(factory.executed_sql().len(), 1);
    assert!(factory.executed_sql()[0].starts_with("INSERT INTO"));
}

#[tokio::test]
async fn bulk_create_concurrent_reports_all_rows() {
    let factory = FakeDriverFactory::new();
    for _ in 0..5 {
        factory.push_fetch_optional(Ok(Some(account_row(1, "x@example.com", 0, 0))));
    }
    let context = context_with(factory.clone());
    let executor = BulkExecutor::<Account>::new(context, BulkConfig::new().strategy(Strategy::Concurrent).max_concurrency(3)).unwrap();

    let mut rows = sample_accounts(5);
    let result = executor.create_many(&mut rows, None).await.unwrap();
    assert_eq!(result.success_count, 5);
    assert_eq!(result.error_count, 0);
}

#[tokio::test]
async fn bulk_create_provider_optimized_degrades_to_batched() {
    let factory = FakeDriverFactory::new();
    factory.push_execute(Ok(3));
    let context = context_with(factory.clone());
    let executor = BulkExecutor::<Account>::new(context, BulkConfig::new().strategy(Strategy::ProviderOptimized)).unwrap();

    let mut rows = sample_accounts(3);
    let result = executor.create_many(&mut rows, None).await.unwrap();
    assert_eq!(result.success_count, 3);
    assert!(result.provider_optimized_used);
    // No dialect here actually speaks a native bulk-load wire format, so the
    // statement this renders is indistinguishable from plain Batched.
    assert_eq!(factory.executed_sql().len(), 1);
}

#[tokio::test]
async fn bulk_create_auto_picks_sequential_for_a_handful_of_rows() {
    let factory = FakeDriverFactory::new();
    for _ in 0..3 {
        factory.push_fetch_optional(Ok(Some(account_row(1, "x@example.com", 0, 0))));
    }
    let context = context_with(factory.clone());
    let executor = BulkExecutor::<Account>::new(context, BulkConfig::new()).unwrap();

    let mut rows = sample_accounts(3);
    let result = executor.create_many(&mut rows, None).await.unwrap();
    assert_eq!(result.success_count, 3);
    // Auto resolves to Sequential below the 5-row threshold: one round trip per row.
    assert_eq!(factory.executed_sql().len(), 3);
}

#[tokio::test]
async fn bulk_update_many_dispatches_per_row_within_the_batch() {
    let factory = FakeDriverFactory::new();
    factory.push_execute(Ok(1));
    factory.push_execute(Ok(1));
    let context = context_with(factory.clone());
    let executor = BulkExecutor::<Account>::new(context, BulkConfig::new().strategy(Strategy::Batched)).unwrap();

    let mut rows = vec![
        Account { id: 1, email: "a@example.com".to_string(), balance_cents: 10, version: 0 },
        Account { id: 2, email: "b@example.com".to_string(), balance_cents: 20, version: 0 },
    ];
    let result = executor.update_many(&mut rows, None).await.unwrap();
    assert_eq!(result.success_count, 2);
    assert_eq!(factory.executed_sql().len(), 2);
}

#[tokio::test]
async fn bulk_upsert_many_sequential_round_trip() {
    let factory = FakeDriverFactory::new();
    factory.push_execute(Ok(1));
    factory.push_execute(Ok(1));
    let context = context_with(factory.clone());
    let executor = BulkExecutor::<Account>::new(context, BulkConfig::new().strategy(Strategy::Sequential)).unwrap();

    let mut rows = vec![
        Account { id: 1, email: "a@example.com".to_string(), balance_cents: 10, version: 0 },
        Account { id: 2, email: "b@example.com".to_string(), balance_cents: 20, version: 0 },
    ];
    let result = executor.upsert_many(&mut rows, None).await.unwrap();
    assert_eq!(result.success_count, 2);
    for sql in factory.executed_sql() {
        assert!(sql.contains("ON CONFLICT"));
    }
}

#[tokio::test]
async fn bulk_create_empty_slice_is_a_no_op() {
    let factory = FakeDriverFactory::new();
    let context = context_with(factory.clone());
    let executor = BulkExecutor::<Account>::new(context, BulkConfig::new()).unwrap();
    let mut rows: Vec<Account> = Vec::new();
    let result = executor.create_many(&mut rows, None).await.unwrap();
    assert_eq!(result.success_count, 0);
    assert!(factory.executed_sql().is_empty());
}

#[tokio::test]
async fn retrieve_by_ids_fetches_all_rows_in_one_round_trip() {
    let factory = FakeDriverFactory::new();
    factory.push_fetch_all(Ok(vec![
        account_row(1, "a@example.com", 0, 0),
        account_row(2, "b@example.com", 0, 0),
    ]));
    let context = context_with(factory.clone());
    let gateway = TableGateway::<Account>::new(context).unwrap();

    let found = gateway.retrieve(&[SqlValue::BigInt(1), SqlValue::BigInt(2)]).await.unwrap();
    assert_eq!(found.len(), 2);
    assert_eq!(factory.executed_sql().len(), 1, "must be a single round trip regardless of id count");
    let sql = &factory.executed_sql()[0];
    assert!(sql.contains("IN ("));
}

#[tokio::test]
async fn retrieve_by_ids_dedups_and_collapses_nulls_to_one_is_null() {
    let factory = FakeDriverFactory::new();
    factory.push_fetch_all(Ok(vec![account_row(1, "a@example.com", 0, 0)]));
    let context = context_with(factory.clone());
    let gateway = TableGateway::<Account>::new(context).unwrap();

    gateway
        .retrieve(&[SqlValue::BigInt(1), SqlValue::BigInt(1), SqlValue::Null, SqlValue::Null])
        .await
        .unwrap();
    let sql = &factory.executed_sql()[0];
    assert_eq!(sql.matches("IS NULL").count(), 1);
}

#[tokio::test]
async fn retrieve_by_ids_rejects_empty_input() {
    let factory = FakeDriverFactory::new();
    let context = context_with(factory.clone());
    let gateway = TableGateway::<Account>::new(context).unwrap();
    let result = gateway.retrieve(&[]).await;
    assert!(matches!(result, Err(CrudError::Validation(_))));
}

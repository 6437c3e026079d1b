//! Table Gateway: typed CRUD over one [`EntityDescriptor`], rendering
//! dialect-correct SQL through [`SqlContainer`] and executing it through a
//! [`DriverConnection`] acquired from the owning [`DatabaseContext`].
//!
//! SQL assembly is split from execution on purpose: every `build_*`
//! function below is a pure, synchronous, fully testable transform from
//! entity state to a rendered [`SqlContainer`], grounded on the teacher's
//! `QueryBuilder::build_insert`/`build_update`/`build_upsert`/`build_delete`
//! (`query/modify.rs`), generalized from a single Postgres `$n` form to any
//! [`Dialect`] and from the teacher's untyped `&[(String, ExtractedValue)]`
//! to this engine's [`EntityDescriptor`]. Execution wraps each single-row
//! operation in the same retry-with-backoff shape as the teacher's
//! `executor::QueryExecutor`, reusing [`crate::connection::RetryConfig`]'s
//! backoff formula rather than re-deriving it.

use crate::audit::AuditValueResolver;
use crate::connection::RetryConfig;
use crate::container::{Parameter, SqlContainer, TemplateCache};
use crate::context::DatabaseContext;
use crate::dialect::Dialect;
use crate::reader::{EntityStream, TrackedReader};
use crate::typemap::{AuditRole, ColumnDescriptor, EntityDescriptor, MappedEntity};
use crate::value::SqlValue;
use dbcrud_common::{CrudError, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{instrument, warn};

/// Retry/observability configuration for single-row gateway operations.
/// Grounded on the teacher's `executor::ExecutorConfig`; the backoff formula
/// itself is [`RetryConfig`]'s rather than a second copy of it.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub retry: RetryConfig,
    pub slow_operation_threshold_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            slow_operation_threshold_ms: 1000,
        }
    }
}

impl ExecutorConfig {
    pub fn no_retry() -> Self {
        Self {
            retry: RetryConfig::no_retry(),
            ..Default::default()
        }
    }
}

fn row_values_in_column_order<T>(columns: &[&ColumnDescriptor<T>], row: &HashMap<String, SqlValue>) -> Vec<SqlValue> {
    columns
        .iter()
        .map(|c| row.get(&c.name).cloned().unwrap_or(SqlValue::Null))
        .collect()
}

/// Increments an optimistic-concurrency version value by one, preserving
/// whichever integer width the column was declared with.
fn next_version(value: &SqlValue) -> Result<SqlValue> {
    match value {
        SqlValue::SmallInt(v) => Ok(SqlValue::SmallInt(v.wrapping_add(1))),
        SqlValue::Int(v) => Ok(SqlValue::Int(v.wrapping_add(1))),
        SqlValue::BigInt(v) => Ok(SqlValue::BigInt(v.wrapping_add(1))),
        other => Err(CrudError::Validation(format!(
            "version column must be an integer type, found {other:?}"
        ))),
    }
}

/// Builds `SELECT <cols> FROM <table> WHERE <pk0> = w0 AND <pk1> = w1 ...`.
pub fn build_retrieve_by_key_sql<T>(
    dialect: &dyn Dialect,
    descriptor: &EntityDescriptor<T>,
    key_values: &[SqlValue],
) -> Result<SqlContainer> {
    let pk_columns = descriptor.primary_key_columns();
    if pk_columns.len() != key_values.len() {
        return Err(CrudError::Validation(format!(
            "expected {} primary key value(s), got {}",
            pk_columns.len(),
            key_values.len()
        )));
    }

    let quoted_table = dialect.wrap_identifier(&descriptor.qualified_table())?;
    let mut quoted_cols = Vec::with_capacity(descriptor.columns.len());
    for c in &descriptor.columns {
        quoted_cols.push(dialect.wrap_identifier(&c.name)?);
    }

    let mut container = SqlContainer::new(format!("SELECT {} FROM {quoted_table}", quoted_cols.join(", ")), vec![]);
    for (i, (col, value)) in pk_columns.iter().zip(key_values.iter()).enumerate() {
        let marker = dialect.make_parameter_marker(&format!("w{i}"), i);
        let quoted_col = dialect.wrap_identifier(&col.name)?;
        container.push_where(&format!("{quoted_col} = {marker}"));
        container.push_param(format!("w{i}"), col.semantic_type, dialect.coerce_value(col.semantic_type, value.clone()));
    }
    container.check_parameter_budget(dialect)?;
    Ok(container)
}

/// Builds `SELECT <cols> FROM <table> WHERE (k0 = .. AND k1 = ..) OR (k2 = .. AND k3 = ..) ...`,
/// one disjunct per instance's composite primary key, in a single round
/// trip rather than one `retrieve_one` call per instance. Parameter names
/// are numbered globally across every instance's predicates so each stays
/// unique within the statement.
pub fn build_retrieve_by_entities_sql<T>(
    dialect: &dyn Dialect,
    descriptor: &EntityDescriptor<T>,
    instances: &[T],
) -> Result<SqlContainer> {
    let pk_columns = descriptor.primary_key_columns();
    if pk_columns.is_empty() {
        return Err(CrudError::NoPrimaryKey(descriptor.table.clone()));
    }
    if instances.is_empty() {
        return Err(CrudError::Validation("retrieve_by_entities requires at least one instance".to_string()));
    }

    let quoted_table = dialect.wrap_identifier(&descriptor.qualified_table())?;
    let mut quoted_cols = Vec::with_capacity(descriptor.columns.len());
    for c in &descriptor.columns {
        quoted_cols.push(dialect.wrap_identifier(&c.name)?);
    }

    let mut container = SqlContainer::new(format!("SELECT {} FROM {quoted_table}", quoted_cols.join(", ")), vec![]);

    let mut position = 0usize;
    let mut groups = Vec::with_capacity(instances.len());
    for instance in instances {
        let mut predicates = Vec::with_capacity(pk_columns.len());
        for col in &pk_columns {
            let marker = dialect.make_parameter_marker(&format!("k{position}"), position);
            let quoted_col = dialect.wrap_identifier(&col.name)?;
            predicates.push(format!("{quoted_col} = {marker}"));
            let value = col.get(instance);
            container.push_param(format!("k{position}"), col.semantic_type, dialect.coerce_value(col.semantic_type, value));
            position += 1;
        }
        groups.push(format!("({})", predicates.join(" AND ")));
    }
    container.push_where(&groups.join(" OR "));
    container.check_parameter_budget(dialect)?;
    Ok(container)
}

/// Builds `SELECT <cols> FROM <table>` with no predicate, for streaming the
/// full table via [`TableGateway::load_stream`].
pub fn build_select_all_sql<T>(dialect: &dyn Dialect, descriptor: &EntityDescriptor<T>) -> Result<SqlContainer> {
    let quoted_table = dialect.wrap_identifier(&descriptor.qualified_table())?;
    let mut quoted_cols = Vec::with_capacity(descriptor.columns.len());
    for c in &descriptor.columns {
        quoted_cols.push(dialect.wrap_identifier(&c.name)?);
    }
    let container = SqlContainer::new(format!("SELECT {} FROM {quoted_table}", quoted_cols.join(", ")), vec![]);
    container.check_parameter_budget(dialect)?;
    Ok(container)
}

/// Builds a bucketed `SELECT <cols> FROM <table> WHERE <id> IN (w0, w1, ...)`
/// for fetching many rows by a single surrogate-id column in one round
/// trip, optionally ORed with `<id> IS NULL` when `ids` contains a NULL.
/// Duplicate ids collapse to one bound value (a column can only match the
/// same value once); likewise every NULL in `ids` collapses to the same
/// single `IS NULL` disjunct, since repeating it would never match more
/// rows. The bucket size is the smallest power of two >= the number of
/// distinct non-null ids, reusing `template_cache` across calls of the same
/// shape so a hot `retrieve(ids)` path doesn't re-render its `IN (...)`
/// clause on every call.
pub fn build_retrieve_by_ids_sql<T>(
    dialect: &dyn Dialect,
    descriptor: &EntityDescriptor<T>,
    template_cache: &TemplateCache,
    ids: &[SqlValue],
) -> Result<SqlContainer> {
    let id_column = descriptor.identity_column().ok_or_else(|| {
        CrudError::Validation(format!(
            "entity '{}' has no surrogate id column for retrieve(ids)",
            descriptor.table
        ))
    })?;

    let mut distinct_non_null: Vec<SqlValue> = Vec::new();
    let mut has_null = false;
    for id in ids {
        if id.is_null() {
            has_null = true;
        } else if !distinct_non_null.contains(id) {
            distinct_non_null.push(id.clone());
        }
    }
    if distinct_non_null.is_empty() && !has_null {
        return Err(CrudError::Validation("retrieve(ids) requires at least one id".to_string()));
    }

    let quoted_table = dialect.wrap_identifier(&descriptor.qualified_table())?;
    let mut quoted_cols = Vec::with_capacity(descriptor.columns.len());
    for c in &descriptor.columns {
        quoted_cols.push(dialect.wrap_identifier(&c.name)?);
    }
    let quoted_id_col = dialect.wrap_identifier(&id_column.name)?;

    let mut container = SqlContainer::new(format!("SELECT {} FROM {quoted_table}", quoted_cols.join(", ")), vec![]);

    if distinct_non_null.is_empty() {
        container.push_where(&format!("{quoted_id_col} IS NULL"));
    } else {
        let (clause, padded) =
            template_cache.in_clause(dialect, &descriptor.table, &quoted_id_col, 0, &distinct_non_null)?;
        let clause = if has_null {
            format!("({clause} OR {quoted_id_col} IS NULL)")
        } else {
            clause
        };
        container.push_where(&clause);
        for (i, value) in padded.iter().enumerate() {
            container.push_param(
                format!("w{i}"),
                id_column.semantic_type,
                dialect.coerce_value(id_column.semantic_type, value.clone()),
            );
        }
    }
    container.check_parameter_budget(dialect)?;
    Ok(container)
}

/// Builds `INSERT INTO <table> (<cols>) VALUES (i0, i1, ...) RETURNING/OUTPUT ...`.
pub fn build_insert_sql<T>(
    dialect: &dyn Dialect,
    descriptor: &EntityDescriptor<T>,
    row: &HashMap<String, SqlValue>,
) -> Result<SqlContainer> {
    let columns = descriptor.insertable_columns();
    if columns.is_empty() {
        return Err(CrudError::Validation(format!(
            "entity '{}' has no insertable columns",
            descriptor.table
        )));
    }

    let quoted_table = dialect.wrap_identifier(&descriptor.qualified_table())?;
    let mut quoted_cols = Vec::with_capacity(columns.len());
    let mut markers = Vec::with_capacity(columns.len());
    let mut parameters = Vec::with_capacity(columns.len());
    for (i, col) in columns.iter().enumerate() {
        quoted_cols.push(dialect.wrap_identifier(&col.name)?);
        markers.push(dialect.make_parameter_marker(&format!("i{i}"), i));
        let value = row.get(&col.name).cloned().unwrap_or(SqlValue::Null);
        parameters.push(Parameter::new(format!("i{i}"), col.semantic_type, dialect.coerce_value(col.semantic_type, value)));
    }

    let mut sql = format!(
        "INSERT INTO {quoted_table} ({}) VALUES ({})",
        quoted_cols.join(", "),
        markers.join(", ")
    );

    let identity_and_audit: Vec<String> = descriptor
        .columns
        .iter()
        .filter(|c| c.is_identity || c.audit_role.is_some())
        .map(|c| c.name.clone())
        .collect();
    if let Some(returning) = dialect.returning_clause(&identity_and_audit) {
        sql.push(' ');
        sql.push_str(&returning);
    } else if let Some(output) = dialect.output_clause(&identity_and_audit) {
        sql = format!(
            "INSERT INTO {quoted_table} ({}) {output} VALUES ({})",
            quoted_cols.join(", "),
            markers.join(", ")
        );
    }

    let mut container = SqlContainer::new(sql, parameters);
    container.check_parameter_budget(dialect)?;
    Ok(container)
}

/// Builds `UPDATE <table> SET s0, s1, ... WHERE w0 AND w1 ... [AND version = v0]`.
pub fn build_update_sql<T>(
    dialect: &dyn Dialect,
    descriptor: &EntityDescriptor<T>,
    row: &HashMap<String, SqlValue>,
    key_values: &[SqlValue],
    current_version: Option<&SqlValue>,
) -> Result<SqlContainer> {
    let pk_columns = descriptor.primary_key_columns();
    if pk_columns.len() != key_values.len() {
        return Err(CrudError::Validation(format!(
            "expected {} primary key value(s), got {}",
            pk_columns.len(),
            key_values.len()
        )));
    }

    let set_columns = descriptor.updatable_columns();
    if set_columns.is_empty() {
        return Err(CrudError::Validation(format!(
            "entity '{}' has no updatable columns",
            descriptor.table
        )));
    }

    let quoted_table = dialect.wrap_identifier(&descriptor.qualified_table())?;
    let mut set_parts = Vec::with_capacity(set_columns.len() + 1);
    let mut parameters = Vec::with_capacity(set_columns.len() + pk_columns.len() + 1);
    for (i, col) in set_columns.iter().enumerate() {
        let quoted_col = dialect.wrap_identifier(&col.name)?;
        let marker = dialect.make_parameter_marker(&format!("s{i}"), i);
        set_parts.push(format!("{quoted_col} = {marker}"));
        let value = row.get(&col.name).cloned().unwrap_or(SqlValue::Null);
        parameters.push(Parameter::new(format!("s{i}"), col.semantic_type, dialect.coerce_value(col.semantic_type, value)));
    }

    let version_column = descriptor.version_column();
    if let Some(version_col) = version_column {
        let current = current_version
            .ok_or_else(|| CrudError::Validation("version column registered but no current_version supplied".to_string()))?;
        let next = next_version(current)?;
        let quoted_col = dialect.wrap_identifier(&version_col.name)?;
        let position = set_parts.len();
        let marker = dialect.make_parameter_marker(&format!("s{position}"), position);
        set_parts.push(format!("{quoted_col} = {marker}"));
        parameters.push(Parameter::new(format!("s{position}"), version_col.semantic_type, next));
    }

    let mut container = SqlContainer::new(format!("UPDATE {quoted_table} SET {}", set_parts.join(", ")), parameters);

    for (i, (col, value)) in pk_columns.iter().zip(key_values.iter()).enumerate() {
        let marker = dialect.make_parameter_marker(&format!("w{i}"), i);
        let quoted_col = dialect.wrap_identifier(&col.name)?;
        container.push_where(&format!("{quoted_col} = {marker}"));
        container.push_param(format!("w{i}"), col.semantic_type, dialect.coerce_value(col.semantic_type, value.clone()));
    }

    if let (Some(version_col), Some(current)) = (version_column, current_version) {
        let marker = dialect.make_parameter_marker("v0", pk_columns.len());
        let quoted_col = dialect.wrap_identifier(&version_col.name)?;
        container.push_where(&format!("{quoted_col} = {marker}"));
        container.push_param("v0", version_col.semantic_type, dialect.coerce_value(version_col.semantic_type, current.clone()));
    }

    container.check_parameter_budget(dialect)?;
    Ok(container)
}

/// Builds `DELETE FROM <table> WHERE w0 AND w1 ... [AND version = v0]`.
pub fn build_delete_sql<T>(
    dialect: &dyn Dialect,
    descriptor: &EntityDescriptor<T>,
    key_values: &[SqlValue],
    current_version: Option<&SqlValue>,
) -> Result<SqlContainer> {
    let pk_columns = descriptor.primary_key_columns();
    if pk_columns.len() != key_values.len() {
        return Err(CrudError::Validation(format!(
            "expected {} primary key value(s), got {}",
            pk_columns.len(),
            key_values.len()
        )));
    }

    let quoted_table = dialect.wrap_identifier(&descriptor.qualified_table())?;
    let mut container = SqlContainer::new(format!("DELETE FROM {quoted_table}"), vec![]);
    for (i, (col, value)) in pk_columns.iter().zip(key_values.iter()).enumerate() {
        let marker = dialect.make_parameter_marker(&format!("w{i}"), i);
        let quoted_col = dialect.wrap_identifier(&col.name)?;
        container.push_where(&format!("{quoted_col} = {marker}"));
        container.push_param(format!("w{i}"), col.semantic_type, dialect.coerce_value(col.semantic_type, value.clone()));
    }

    if let (Some(version_col), Some(current)) = (descriptor.version_column(), current_version) {
        let marker = dialect.make_parameter_marker("v0", pk_columns.len());
        let quoted_col = dialect.wrap_identifier(&version_col.name)?;
        container.push_where(&format!("{quoted_col} = {marker}"));
        container.push_param("v0", version_col.semantic_type, dialect.coerce_value(version_col.semantic_type, current.clone()));
    }

    container.check_parameter_budget(dialect)?;
    Ok(container)
}

/// Builds a dialect-appropriate UPSERT: `ON CONFLICT ... DO UPDATE` where
/// `capabilities().insert_on_conflict`, `ON DUPLICATE KEY UPDATE` where
/// `on_duplicate_key`, a `MERGE` statement where `merge`, else
/// [`CrudError::UnsupportedFeature`].
pub fn build_upsert_sql<T>(
    dialect: &dyn Dialect,
    descriptor: &EntityDescriptor<T>,
    row: &HashMap<String, SqlValue>,
) -> Result<SqlContainer> {
    let caps = dialect.capabilities();
    let conflict_columns = descriptor.primary_key_columns();
    if conflict_columns.is_empty() {
        return Err(CrudError::NoPrimaryKey(format!(
            "entity '{}' has no primary key to upsert on",
            descriptor.table
        )));
    }

    let insert_columns = descriptor.insertable_columns();
    let update_columns: Vec<&ColumnDescriptor<T>> = descriptor
        .updatable_columns()
        .into_iter()
        .filter(|c| !conflict_columns.iter().any(|pk| pk.name == c.name))
        .collect();
    if update_columns.is_empty() {
        return Err(CrudError::Validation(format!(
            "entity '{}' has no columns to update on conflict after excluding the key",
            descriptor.table
        )));
    }

    let quoted_table = dialect.wrap_identifier(&descriptor.qualified_table())?;
    let mut quoted_insert_cols = Vec::with_capacity(insert_columns.len());
    let mut markers = Vec::with_capacity(insert_columns.len());
    let mut parameters = Vec::with_capacity(insert_columns.len());
    for (i, col) in insert_columns.iter().enumerate() {
        quoted_insert_cols.push(dialect.wrap_identifier(&col.name)?);
        markers.push(dialect.make_parameter_marker(&format!("i{i}"), i));
        let value = row.get(&col.name).cloned().unwrap_or(SqlValue::Null);
        parameters.push(Parameter::new(format!("i{i}"), col.semantic_type, dialect.coerce_value(col.semantic_type, value)));
    }

    if caps.insert_on_conflict {
        let mut quoted_conflict = Vec::with_capacity(conflict_columns.len());
        for c in &conflict_columns {
            quoted_conflict.push(dialect.wrap_identifier(&c.name)?);
        }
        let mut set_parts = Vec::with_capacity(update_columns.len());
        for c in &update_columns {
            let quoted_col = dialect.wrap_identifier(&c.name)?;
            set_parts.push(format!("{quoted_col} = {}", dialect.upsert_incoming_column(&c.name)));
        }
        let sql = format!(
            "INSERT INTO {quoted_table} ({}) VALUES ({}) ON CONFLICT ({}) DO UPDATE SET {}",
            quoted_insert_cols.join(", "),
            markers.join(", "),
            quoted_conflict.join(", "),
            set_parts.join(", "),
        );
        let mut container = SqlContainer::new(sql, parameters);
        container.check_parameter_budget(dialect)?;
        return Ok(container);
    }

    if caps.on_duplicate_key {
        let mut set_parts = Vec::with_capacity(update_columns.len());
        for c in &update_columns {
            let quoted_col = dialect.wrap_identifier(&c.name)?;
            set_parts.push(format!("{quoted_col} = {}", dialect.upsert_incoming_column(&c.name)));
        }
        let values_alias = dialect
            .upsert_values_alias()
            .map(|alias| format!(" AS {alias}"))
            .unwrap_or_default();
        let sql = format!(
            "INSERT INTO {quoted_table} ({}) VALUES ({}){values_alias} ON DUPLICATE KEY UPDATE {}",
            quoted_insert_cols.join(", "),
            markers.join(", "),
            set_parts.join(", "),
        );
        let mut container = SqlContainer::new(sql, parameters);
        container.check_parameter_budget(dialect)?;
        return Ok(container);
    }

    if caps.merge {
        let source_alias = dialect.merge_source_alias();
        let mut select_parts = Vec::with_capacity(insert_columns.len());
        for (i, col) in insert_columns.iter().enumerate() {
            let marker = dialect.make_parameter_marker(&format!("i{i}"), i);
            select_parts.push(format!("{marker} AS {}", dialect.wrap_identifier(&col.name)?));
        }
        let mut on_parts = Vec::with_capacity(conflict_columns.len());
        for c in &conflict_columns {
            let quoted_col = dialect.wrap_identifier(&c.name)?;
            on_parts.push(format!("target.{quoted_col} = {source_alias}.{quoted_col}"));
        }
        let mut set_parts = Vec::with_capacity(update_columns.len());
        for c in &update_columns {
            let quoted_col = dialect.wrap_identifier(&c.name)?;
            set_parts.push(format!("{quoted_col} = {source_alias}.{quoted_col}"));
        }
        let mut insert_cols_for_values = Vec::with_capacity(insert_columns.len());
        let mut insert_values = Vec::with_capacity(insert_columns.len());
        for c in &insert_columns {
            let quoted_col = dialect.wrap_identifier(&c.name)?;
            insert_cols_for_values.push(quoted_col.clone());
            insert_values.push(format!("{source_alias}.{quoted_col}"));
        }
        let sql = format!(
            "MERGE INTO {quoted_table} AS target USING (SELECT {}) AS {source_alias} ON {} \
             WHEN MATCHED THEN UPDATE SET {} \
             WHEN NOT MATCHED THEN INSERT ({}) VALUES ({})",
            select_parts.join(", "),
            on_parts.join(" AND "),
            set_parts.join(", "),
            insert_cols_for_values.join(", "),
            insert_values.join(", "),
        );
        let mut container = SqlContainer::new(sql, parameters);
        container.check_parameter_budget(dialect)?;
        return Ok(container);
    }

    Err(CrudError::UnsupportedFeature(format!(
        "{:?} supports no UPSERT form this engine knows how to render",
        dialect.product()
    )))
}

/// Typed CRUD gateway over one entity's table.
pub struct TableGateway<T> {
    context: Arc<DatabaseContext>,
    descriptor: Arc<EntityDescriptor<T>>,
    audit_resolver: Option<Arc<dyn AuditValueResolver>>,
    executor_config: ExecutorConfig,
    template_cache: TemplateCache,
}

impl<T> TableGateway<T>
where
    T: MappedEntity + Default + Send + Sync + 'static,
{
    pub fn new(context: Arc<DatabaseContext>) -> Result<Self> {
        let descriptor = T::describe();
        descriptor.validate()?;
        Ok(Self {
            context,
            descriptor,
            audit_resolver: None,
            executor_config: ExecutorConfig::default(),
            template_cache: TemplateCache::default(),
        })
    }

    pub fn with_audit_resolver(mut self, resolver: Arc<dyn AuditValueResolver>) -> Self {
        self.audit_resolver = Some(resolver);
        self
    }

    pub fn with_executor_config(mut self, config: ExecutorConfig) -> Self {
        self.executor_config = config;
        self
    }

    pub fn descriptor(&self) -> &Arc<EntityDescriptor<T>> {
        &self.descriptor
    }

    fn key_values_of(&self, instance: &T) -> Vec<SqlValue> {
        self.descriptor
            .primary_key_columns()
            .iter()
            .map(|c| c.get(instance))
            .collect()
    }

    /// Runs `op` with retry-on-transient-error and slow-operation logging,
    /// matching the teacher's `executor::QueryExecutor` shape.
    async fn with_retry<F, Fut, R>(&self, operation: &str, mut op: F) -> Result<R>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<R>>,
    {
        let mut attempt = 0;
        loop {
            let started = Instant::now();
            match op().await {
                Ok(value) => {
                    let elapsed = started.elapsed();
                    self.context.counters().queries_executed.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    if elapsed.as_millis() as u64 >= self.executor_config.slow_operation_threshold_ms {
                        warn!(operation, elapsed_ms = elapsed.as_millis() as u64, "slow gateway operation");
                    }
                    return Ok(value);
                }
                Err(err) => {
                    self.context.counters().queries_failed.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    if err.is_retryable() && attempt < self.executor_config.retry.max_retries {
                        self.context.counters().retries_attempted.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                        let delay = self.executor_config.retry.delay_for_attempt(attempt);
                        attempt += 1;
                        warn!(operation, attempt, error = %err, "retrying gateway operation");
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Err(err);
                }
            }
        }
    }

    #[instrument(skip(self, key_values), fields(table = %self.descriptor.table))]
    pub async fn retrieve_one(&self, key_values: &[SqlValue]) -> Result<Option<T>> {
        let dialect = self.context.dialect();
        let container = build_retrieve_by_key_sql(dialect, &self.descriptor, key_values)?;
        let row = self
            .with_retry("retrieve_one", || async {
                let guard = self.context.enter(false).await?;
                let mut conn = self.context.driver().acquire().await?;
                let result = conn.fetch_optional(&container).await;
                drop(guard);
                result
            })
            .await?;
        match row {
            Some(row) => {
                let mut instance = T::default();
                self.descriptor.apply_row(&mut instance, &row)?;
                Ok(Some(instance))
            }
            None => Ok(None),
        }
    }

    /// Fetches every row whose surrogate id is in `ids`, in one round trip.
    /// See [`build_retrieve_by_ids_sql`] for the dedup/NULL/bucketing rules.
    #[instrument(skip(self, ids), fields(table = %self.descriptor.table, count = ids.len()))]
    pub async fn retrieve(&self, ids: &[SqlValue]) -> Result<Vec<T>> {
        let dialect = self.context.dialect();
        let container = build_retrieve_by_ids_sql(dialect, &self.descriptor, &self.template_cache, ids)?;
        let rows = self
            .with_retry("retrieve", || async {
                let guard = self.context.enter(false).await?;
                let mut conn = self.context.driver().acquire().await?;
                let result = conn.fetch_all(&container).await;
                drop(guard);
                result
            })
            .await?;
        rows.into_iter()
            .map(|row| {
                let mut instance = T::default();
                self.descriptor.apply_row(&mut instance, &row)?;
                Ok(instance)
            })
            .collect()
    }

    /// Fetches the rows matching `instances`' composite primary keys in a
    /// single round trip, rendering one `OR`-joined `WHERE` clause rather
    /// than calling `retrieve_one` once per instance.
    #[instrument(skip(self, instances), fields(table = %self.descriptor.table, count = instances.len()))]
    pub async fn retrieve_by_entities(&self, instances: &[T]) -> Result<Vec<T>> {
        if instances.is_empty() {
            return Ok(Vec::new());
        }
        let dialect = self.context.dialect();
        let container = build_retrieve_by_entities_sql(dialect, &self.descriptor, instances)?;
        let rows = self
            .with_retry("retrieve_by_entities", || async {
                let guard = self.context.enter(false).await?;
                let mut conn = self.context.driver().acquire().await?;
                let result = conn.fetch_all(&container).await;
                drop(guard);
                result
            })
            .await?;
        rows.into_iter()
            .map(|row| {
                let mut instance = T::default();
                self.descriptor.apply_row(&mut instance, &row)?;
                Ok(instance)
            })
            .collect()
    }

    /// Streams the full table one entity at a time. Unlike `retrieve*`, the
    /// reader's governor permit (and mode lock, under `SingleConnection`) is
    /// held for as long as the returned stream is alive rather than being
    /// released as soon as the query returns.
    #[instrument(skip(self), fields(table = %self.descriptor.table))]
    pub async fn load_stream(&self) -> Result<EntityStream<T>> {
        let dialect = self.context.dialect();
        let container = build_select_all_sql(dialect, &self.descriptor)?;
        let reader = TrackedReader::open(&self.context, &container).await?;
        Ok(EntityStream::new(reader, self.descriptor.clone()))
    }

    /// Streams the rows matching `ids` one at a time, under the same reader
    /// lease semantics as [`TableGateway::load_stream`].
    #[instrument(skip(self, ids), fields(table = %self.descriptor.table, count = ids.len()))]
    pub async fn retrieve_stream(&self, ids: &[SqlValue]) -> Result<EntityStream<T>> {
        let dialect = self.context.dialect();
        let container = build_retrieve_by_ids_sql(dialect, &self.descriptor, &self.template_cache, ids)?;
        let reader = TrackedReader::open(&self.context, &container).await?;
        Ok(EntityStream::new(reader, self.descriptor.clone()))
    }

    #[instrument(skip(self, instance), fields(table = %self.descriptor.table))]
    pub async fn create(&self, instance: &mut T) -> Result<()> {
        let mut row = self.descriptor.row_of(instance);
        self.stamp_audit_on_create(&mut row);

        let dialect = self.context.dialect();
        let container = build_insert_sql(dialect, &self.descriptor, &row)?;
        let returned = self
            .with_retry("create", || async {
                let guard = self.context.enter(true).await?;
                let mut conn = self.context.driver().acquire().await?;
                let result = if dialect.returning_clause(&[]).is_some() || dialect.output_clause(&[]).is_some() {
                    conn.fetch_optional(&container).await
                } else {
                    conn.execute(&container).await.map(|_| None)
                };
                drop(guard);
                result
            })
            .await?;

        if let Some(returned_row) = returned {
            self.descriptor.apply_row(instance, &returned_row)?;
        } else {
            self.descriptor.apply_row(instance, &row)?;
        }
        let _ = &mut row;
        Ok(())
    }

    #[instrument(skip(self, instance), fields(table = %self.descriptor.table))]
    pub async fn update(&self, instance: &mut T) -> Result<()> {
        let mut row = self.descriptor.row_of(instance);
        self.stamp_audit_on_update(&mut row);

        let key_values = self.key_values_of(instance);
        let current_version = self.descriptor.version_column().map(|c| c.get(instance));

        let dialect = self.context.dialect();
        let container = build_update_sql(dialect, &self.descriptor, &row, &key_values, current_version.as_ref())?;
        let affected = self
            .with_retry("update", || async {
                let guard = self.context.enter(true).await?;
                let mut conn = self.context.driver().acquire().await?;
                let result = conn.execute(&container).await;
                drop(guard);
                result
            })
            .await?;

        if affected == 0 {
            return Err(CrudError::VersionConflict(format!(
                "no row matched for update on '{}' (stale version or missing row)",
                self.descriptor.table
            )));
        }

        if let Some(version_col) = self.descriptor.version_column() {
            let current = current_version.expect("version column implies current_version is Some");
            version_col.set(instance, next_version(&current)?)?;
        }
        for audit_col in self.descriptor.audit_columns() {
            if let Some(value) = row.get(&audit_col.name) {
                audit_col.set(instance, value.clone())?;
            }
        }
        Ok(())
    }

    #[instrument(skip(self, instance), fields(table = %self.descriptor.table))]
    pub async fn delete(&self, instance: &T) -> Result<()> {
        let key_values = self.key_values_of(instance);
        let current_version = self.descriptor.version_column().map(|c| c.get(instance));

        let dialect = self.context.dialect();
        let container = build_delete_sql(dialect, &self.descriptor, &key_values, current_version.as_ref())?;
        let affected = self
            .with_retry("delete", || async {
                let guard = self.context.enter(true).await?;
                let mut conn = self.context.driver().acquire().await?;
                let result = conn.execute(&container).await;
                drop(guard);
                result
            })
            .await?;

        if affected == 0 {
            return Err(CrudError::VersionConflict(format!(
                "no row matched for delete on '{}' (stale version or missing row)",
                self.descriptor.table
            )));
        }
        Ok(())
    }

    #[instrument(skip(self, instances), fields(table = %self.descriptor.table, count = instances.len()))]
    pub async fn delete_by_entities(&self, instances: &[T]) -> Result<u64> {
        let mut total = 0u64;
        for instance in instances {
            self.delete(instance).await?;
            total += 1;
        }
        Ok(total)
    }

    #[instrument(skip(self, instance), fields(table = %self.descriptor.table))]
    pub async fn upsert(&self, instance: &mut T) -> Result<()> {
        let mut row = self.descriptor.row_of(instance);
        self.stamp_audit_on_create(&mut row);
        self.stamp_audit_on_update(&mut row);

        let dialect = self.context.dialect();
        let container = build_upsert_sql(dialect, &self.descriptor, &row)?;
        self.with_retry("upsert", || async {
            let guard = self.context.enter(true).await?;
            let mut conn = self.context.driver().acquire().await?;
            let result = conn.execute(&container).await;
            drop(guard);
            result
        })
        .await?;

        self.descriptor.apply_row(instance, &row)?;
        Ok(())
    }

    fn stamp_audit_on_create(&self, row: &mut HashMap<String, SqlValue>) {
        let Some(resolver) = &self.audit_resolver else { return };
        let stamp = resolver.on_create();
        if let Some(col) = self.descriptor.audit_column(AuditRole::CreatedOn) {
            row.insert(col.name.clone(), SqlValue::TimestampTz(stamp.on));
        }
        if let (Some(col), Some(by)) = (self.descriptor.audit_column(AuditRole::CreatedBy), stamp.by.clone()) {
            row.insert(col.name.clone(), by);
        }
    }

    fn stamp_audit_on_update(&self, row: &mut HashMap<String, SqlValue>) {
        let Some(resolver) = &self.audit_resolver else { return };
        let stamp = resolver.on_update();
        if let Some(col) = self.descriptor.audit_column(AuditRole::LastUpdatedOn) {
            row.insert(col.name.clone(), SqlValue::TimestampTz(stamp.on));
        }
        if let (Some(col), Some(by)) = (self.descriptor.audit_column(AuditRole::LastUpdatedBy), stamp.by.clone()) {
            row.insert(col.name.clone(), by);
        }
    }
}

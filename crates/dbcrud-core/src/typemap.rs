//! Entity <-> row mapping without runtime reflection.
//!
//! The dynamic row shape from the teacher (`HashMap<String, ExtractedValue>`)
//! still backs every query result here (see [`crate::row::Row`]); what this
//! module adds is a static bridge from that dynamic shape to a caller's typed
//! struct. An entity registers a [`MappedEntity`] impl once: a fixed column
//! list plus a getter/setter pair per column, expressed as closures rather
//! than a derive macro, so the engine needs no proc-macro crate and no
//! `Any`-based reflection to move values in and out of a `Row`.

use crate::value::{SemanticType, SqlValue};
use dbcrud_common::{CrudError, Result};
use dashmap::DashMap;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

/// Which audit stamp a column receives from an [`crate::audit::AuditValueResolver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditRole {
    CreatedOn,
    CreatedBy,
    LastUpdatedOn,
    LastUpdatedBy,
}

/// One column of a mapped entity: its SQL name, semantic type, and the
/// closures that read it off / write it onto an instance of `T`.
pub struct ColumnDescriptor<T> {
    pub name: String,
    pub semantic_type: SemanticType,
    pub is_primary_key: bool,
    pub is_identity: bool,
    pub is_version: bool,
    pub is_non_insertable: bool,
    pub is_non_updatable: bool,
    pub audit_role: Option<AuditRole>,
    get: Arc<dyn Fn(&T) -> SqlValue + Send + Sync>,
    set: Arc<dyn Fn(&mut T, SqlValue) -> Result<()> + Send + Sync>,
}

impl<T> Clone for ColumnDescriptor<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            semantic_type: self.semantic_type,
            is_primary_key: self.is_primary_key,
            is_identity: self.is_identity,
            is_version: self.is_version,
            is_non_insertable: self.is_non_insertable,
            is_non_updatable: self.is_non_updatable,
            audit_role: self.audit_role,
            get: Arc::clone(&self.get),
            set: Arc::clone(&self.set),
        }
    }
}

impl<T> ColumnDescriptor<T> {
    pub fn new(
        name: impl Into<String>,
        semantic_type: SemanticType,
        get: impl Fn(&T) -> SqlValue + Send + Sync + 'static,
        set: impl Fn(&mut T, SqlValue) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            semantic_type,
            is_primary_key: false,
            is_identity: false,
            is_version: false,
            is_non_insertable: false,
            is_non_updatable: false,
            audit_role: None,
            get: Arc::new(get),
            set: Arc::new(set),
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.is_primary_key = true;
        self
    }

    pub fn identity(mut self) -> Self {
        self.is_identity = true;
        self.is_primary_key = true;
        self
    }

    pub fn version(mut self) -> Self {
        self.is_version = true;
        self
    }

    pub fn non_insertable(mut self) -> Self {
        self.is_non_insertable = true;
        self
    }

    pub fn non_updatable(mut self) -> Self {
        self.is_non_updatable = true;
        self
    }

    /// Marks this column as the INSERT-time `CreatedOn` audit stamp; implies
    /// non-updatable, since a creation timestamp never changes after the fact.
    pub fn created_on(mut self) -> Self {
        self.audit_role = Some(AuditRole::CreatedOn);
        self.is_non_updatable = true;
        self
    }

    pub fn created_by(mut self) -> Self {
        self.audit_role = Some(AuditRole::CreatedBy);
        self.is_non_updatable = true;
        self
    }

    pub fn updated_on(mut self) -> Self {
        self.audit_role = Some(AuditRole::LastUpdatedOn);
        self
    }

    pub fn updated_by(mut self) -> Self {
        self.audit_role = Some(AuditRole::LastUpdatedBy);
        self
    }

    pub fn get(&self, instance: &T) -> SqlValue {
        (self.get)(instance)
    }

    pub fn set(&self, instance: &mut T, value: SqlValue) -> Result<()> {
        (self.set)(instance, value)
    }
}

/// Static description of an entity's table and columns, built once and
/// shared behind an `Arc` by every [`crate::gateway::TableGateway`] that
/// targets this type.
pub struct EntityDescriptor<T> {
    pub table: String,
    pub schema: Option<String>,
    pub columns: Vec<ColumnDescriptor<T>>,
}

impl<T> EntityDescriptor<T> {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            schema: None,
            columns: Vec::new(),
        }
    }

    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn column(mut self, column: ColumnDescriptor<T>) -> Self {
        self.columns.push(column);
        self
    }

    pub fn qualified_table(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{schema}.{}", self.table),
            None => self.table.clone(),
        }
    }

    pub fn primary_key_columns(&self) -> Vec<&ColumnDescriptor<T>> {
        self.columns.iter().filter(|c| c.is_primary_key).collect()
    }

    pub fn identity_column(&self) -> Option<&ColumnDescriptor<T>> {
        self.columns.iter().find(|c| c.is_identity)
    }

    pub fn version_column(&self) -> Option<&ColumnDescriptor<T>> {
        self.columns.iter().find(|c| c.is_version)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Columns that belong in an INSERT's column/value list: everything
    /// except identity columns (server-assigned) and anything marked
    /// `non_insertable`.
    pub fn insertable_columns(&self) -> Vec<&ColumnDescriptor<T>> {
        self.columns
            .iter()
            .filter(|c| !c.is_identity && !c.is_non_insertable)
            .collect()
    }

    /// Columns that belong in an UPDATE's SET list: everything except
    /// primary-key members, version columns (incremented separately), and
    /// anything marked `non_updatable`.
    pub fn updatable_columns(&self) -> Vec<&ColumnDescriptor<T>> {
        self.columns
            .iter()
            .filter(|c| !c.is_primary_key && !c.is_version && !c.is_non_updatable)
            .collect()
    }

    /// Columns carrying an [`AuditRole`], in no particular order.
    pub fn audit_columns(&self) -> Vec<&ColumnDescriptor<T>> {
        self.columns.iter().filter(|c| c.audit_role.is_some()).collect()
    }

    pub fn audit_column(&self, role: AuditRole) -> Option<&ColumnDescriptor<T>> {
        self.columns.iter().find(|c| c.audit_role == Some(role))
    }

    /// Enforces that this descriptor has a usable identity for single-row
    /// lookups: either a surrogate identity column, or at least one
    /// primary-key column, and never both a surrogate identity and an
    /// independent primary-key member.
    pub fn validate(&self) -> Result<()> {
        if self.columns.is_empty() {
            return Err(CrudError::Validation(format!(
                "entity '{}' has no registered columns",
                self.table
            )));
        }
        let identity_count = self.columns.iter().filter(|c| c.is_identity).count();
        if identity_count > 1 {
            return Err(CrudError::Validation(format!(
                "entity '{}' declares more than one identity column",
                self.table
            )));
        }
        let has_identity = identity_count == 1;
        let non_identity_pk_count = self.columns.iter().filter(|c| c.is_primary_key && !c.is_identity).count();
        if has_identity && non_identity_pk_count > 0 {
            return Err(CrudError::Validation(format!(
                "entity '{}' mixes a surrogate identity column with other primary-key columns",
                self.table
            )));
        }
        if !has_identity && non_identity_pk_count == 0 {
            return Err(CrudError::NoPrimaryKey(format!(
                "entity '{}' has neither an identity column nor any primary-key column",
                self.table
            )));
        }
        Ok(())
    }

    fn find(&self, name: &str) -> Result<&ColumnDescriptor<T>> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| CrudError::NoPrimaryKey(format!("column '{name}' not registered on entity")))
    }

    /// Reads every registered column off `instance` into a name -> value map,
    /// the shape the SQL container and bulk engine both consume.
    pub fn row_of(&self, instance: &T) -> HashMap<String, SqlValue> {
        self.columns.iter().map(|c| (c.name.clone(), c.get(instance))).collect()
    }

    /// Applies a freshly-decoded row back onto `instance` (used after an
    /// INSERT/UPDATE ... RETURNING or a SELECT).
    pub fn apply_row(&self, instance: &mut T, row: &HashMap<String, SqlValue>) -> Result<()> {
        for (name, value) in row {
            if let Ok(col) = self.find(name) {
                col.set(instance, value.clone())?;
            }
        }
        Ok(())
    }
}

/// Implemented by callers for each entity type they want to CRUD through a
/// [`crate::gateway::TableGateway`]. `describe()` is expected to build and
/// cache its descriptor once; the default blanket impl for `Arc<EntityDescriptor<T>>`
/// below shows the typical shape.
pub trait MappedEntity: Sized {
    fn describe() -> Arc<EntityDescriptor<Self>>;
}

/// Process-wide cache of `EntityDescriptor<T>`s, keyed by `TypeId` so a
/// [`MappedEntity::describe`] call anywhere in a program only builds its
/// descriptor once even if invoked from many call sites concurrently.
#[derive(Default)]
pub struct TypeMapRegistry {
    entries: DashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl TypeMapRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached descriptor for `T`, building it with `build` on
    /// first use. Safe to call concurrently: a race on first build produces
    /// at most one extra discarded descriptor, never an inconsistent cache.
    pub fn get_or_register<T: 'static>(
        &self,
        build: impl FnOnce() -> EntityDescriptor<T>,
    ) -> Arc<EntityDescriptor<T>> {
        let type_id = TypeId::of::<T>();
        if let Some(existing) = self.entries.get(&type_id) {
            return existing
                .clone()
                .downcast::<EntityDescriptor<T>>()
                .expect("TypeMapRegistry entry type mismatch for a stable TypeId");
        }
        let descriptor = Arc::new(build());
        self.entries
            .entry(type_id)
            .or_insert_with(|| descriptor.clone() as Arc<dyn Any + Send + Sync>);
        descriptor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Account {
        id: i64,
        name: String,
        balance: rust_decimal::Decimal,
        created_at: i64,
    }

    fn account_descriptor() -> EntityDescriptor<Account> {
        EntityDescriptor::new("accounts")
            .schema("public")
            .column(
                ColumnDescriptor::new(
                    "id",
                    SemanticType::BigInt,
                    |a: &Account| SqlValue::BigInt(a.id),
                    |a: &mut Account, v| {
                        a.id = v.as_i64().ok_or_else(|| CrudError::Deserialization("id".into()))?;
                        Ok(())
                    },
                )
                .identity(),
            )
            .column(ColumnDescriptor::new(
                "name",
                SemanticType::Text { max_len: Some(255) },
                |a: &Account| SqlValue::String(a.name.clone()),
                |a: &mut Account, v| {
                    if let SqlValue::String(s) = v {
                        a.name = s;
                    }
                    Ok(())
                },
            ))
            .column(
                ColumnDescriptor::new(
                    "created_at",
                    SemanticType::BigInt,
                    |a: &Account| SqlValue::BigInt(a.created_at),
                    |a: &mut Account, v| {
                        a.created_at = v.as_i64().ok_or_else(|| CrudError::Deserialization("created_at".into()))?;
                        Ok(())
                    },
                )
                .created_on(),
            )
    }

    #[test]
    fn round_trips_through_row_of_and_apply_row() {
        let descriptor = account_descriptor();
        let account = Account {
            id: 1,
            name: "alice".to_string(),
            balance: rust_decimal::Decimal::ZERO,
            created_at: 1000,
        };
        let row = descriptor.row_of(&account);
        assert_eq!(row.get("name"), Some(&SqlValue::String("alice".to_string())));

        let mut blank = Account {
            id: 0,
            name: String::new(),
            balance: rust_decimal::Decimal::ZERO,
            created_at: 0,
        };
        descriptor.apply_row(&mut blank, &row).unwrap();
        assert_eq!(blank.id, 1);
        assert_eq!(blank.name, "alice");
        let _ = blank.balance;
    }

    #[test]
    fn qualified_table_includes_schema() {
        let descriptor = account_descriptor();
        assert_eq!(descriptor.qualified_table(), "public.accounts");
    }

    #[test]
    fn identity_column_is_also_primary_key() {
        let descriptor = account_descriptor();
        assert_eq!(descriptor.primary_key_columns().len(), 1);
        assert!(descriptor.identity_column().is_some());
    }

    #[test]
    fn registry_builds_once_and_caches() {
        let registry = TypeMapRegistry::new();
        let first = registry.get_or_register::<Account>(account_descriptor);
        let second = registry.get_or_register::<Account>(|| panic!("should not rebuild"));
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn insertable_columns_excludes_identity() {
        let descriptor = account_descriptor();
        let names: Vec<&str> = descriptor.insertable_columns().iter().map(|c| c.name.as_str()).collect();
        assert!(!names.contains(&"id"));
        assert!(names.contains(&"name"));
        assert!(names.contains(&"created_at"));
    }

    #[test]
    fn updatable_columns_excludes_primary_key_and_created_on() {
        let descriptor = account_descriptor();
        let names: Vec<&str> = descriptor.updatable_columns().iter().map(|c| c.name.as_str()).collect();
        assert!(!names.contains(&"id"));
        assert!(!names.contains(&"created_at"));
        assert!(names.contains(&"name"));
    }

    #[test]
    fn audit_columns_finds_created_on() {
        let descriptor = account_descriptor();
        assert_eq!(descriptor.audit_columns().len(), 1);
        assert!(descriptor.audit_column(AuditRole::CreatedOn).is_some());
        assert!(descriptor.audit_column(AuditRole::LastUpdatedBy).is_none());
    }

    #[test]
    fn validate_accepts_identity_only_descriptor() {
        assert!(account_descriptor().validate().is_ok());
    }

    #[test]
    fn validate_rejects_descriptor_with_no_primary_key() {
        let descriptor: EntityDescriptor<Account> = EntityDescriptor::new("accounts").column(ColumnDescriptor::new(
            "name",
            SemanticType::Text { max_len: Some(255) },
            |a: &Account| SqlValue::String(a.name.clone()),
            |a: &mut Account, v| {
                if let SqlValue::String(s) = v {
                    a.name = s;
                }
                Ok(())
            },
        ));
        assert!(matches!(descriptor.validate(), Err(CrudError::NoPrimaryKey(_))));
    }

    #[test]
    fn validate_rejects_identity_mixed_with_other_primary_key() {
        let descriptor = account_descriptor().column(
            ColumnDescriptor::new(
                "tenant_id",
                SemanticType::BigInt,
                |_: &Account| SqlValue::BigInt(0),
                |_: &mut Account, _| Ok(()),
            )
            .primary_key(),
        );
        assert!(matches!(descriptor.validate(), Err(CrudError::Validation(_))));
    }
}

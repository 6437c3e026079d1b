//! Tenant context registry: a per-tenant cache mapping a tenant id to the
//! one [`DatabaseContext`] that tenant's connections flow through.
//!
//! This is the "tenant-per-database" model the specification calls out —
//! no row-level tenancy, no shared connection pool carrying a tenant-id
//! predicate injected into every WHERE clause. Each tenant gets its own
//! physical database (hence its own `DatabaseContext`, its own dialect
//! detection, its own pool governor and mode lock) and this registry is
//! only the lazy-init + lookup cache in front of that 1:1 mapping.
//!
//! Grounded on the same `DashMap<TypeId, Arc<dyn Any>>` caching shape
//! [`crate::typemap::TypeMapRegistry`] uses: a concurrent map a caller reads
//! without taking a writer-side lock on the hot path, with a double-checked
//! `entry` API for the rare initialization race.

use crate::context::DatabaseContext;
use dashmap::DashMap;
use dbcrud_common::{CrudError, Result};
use std::future::Future;
use std::sync::Arc;

/// Maps an application-defined tenant id to the `DatabaseContext` that
/// tenant's traffic is routed through. Construction of a tenant's context is
/// caller-supplied (connection string lookup, secrets retrieval, etc. are
/// all out of scope for this crate) via the factory passed to
/// [`TenantContextRegistry::get_or_init`].
///
/// `TenantId` is generic rather than fixed to `String` so a caller can use
/// whatever type already identifies a tenant in its own domain (a newtype,
/// a UUID, an integer customer id) as long as it's hashable and cheap to
/// clone — the same way [`crate::typemap::TypeMapRegistry`] is generic over
/// the entity type rather than fixed to a type name.
pub struct TenantContextRegistry<TenantId> {
    contexts: DashMap<TenantId, Arc<DatabaseContext>>,
}

impl<TenantId> Default for TenantContextRegistry<TenantId>
where
    TenantId: std::hash::Hash + Eq + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<TenantId> TenantContextRegistry<TenantId>
where
    TenantId: std::hash::Hash + Eq + Clone,
{
    pub fn new() -> Self {
        Self { contexts: DashMap::new() }
    }

    /// Number of tenants with a context currently registered.
    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    /// Returns the tenant's context if one is already registered, without
    /// running `init`.
    pub fn get(&self, tenant_id: &TenantId) -> Option<Arc<DatabaseContext>> {
        self.contexts.get(tenant_id).map(|entry| entry.value().clone())
    }

    /// Registers a context for `tenant_id`, overwriting any prior context.
    /// The prior context (if any) is returned so a caller can `close()` it
    /// explicitly rather than relying on `Drop`.
    pub fn insert(&self, tenant_id: TenantId, context: Arc<DatabaseContext>) -> Option<Arc<DatabaseContext>> {
        self.contexts.insert(tenant_id, context)
    }

    /// Removes and returns a tenant's context, if registered.
    pub fn remove(&self, tenant_id: &TenantId) -> Option<Arc<DatabaseContext>> {
        self.contexts.remove(tenant_id).map(|(_, context)| context)
    }

    /// Returns the tenant's context, running `init` to build one the first
    /// time this tenant id is seen. Concurrent first-lookups for the same
    /// tenant id may both run `init`; whichever finishes last wins the slot
    /// (the other's freshly-built context is simply dropped) — the same
    /// last-writer-wins tradeoff `DashMap::entry` makes under contention,
    /// accepted here because `init` is expected to be cheap construction
    /// (no connection is actually opened until the context's first `enter`),
    /// not a network round trip.
    pub async fn get_or_init<F, Fut>(&self, tenant_id: TenantId, init: F) -> Result<Arc<DatabaseContext>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<DatabaseContext>>,
    {
        if let Some(existing) = self.get(&tenant_id) {
            return Ok(existing);
        }
        let built = Arc::new(init().await?);
        Ok(self.contexts.entry(tenant_id).or_insert(built).value().clone())
    }

    /// Disposes every registered context and empties the registry. Intended
    /// for process shutdown; individual tenants should use `remove` plus an
    /// explicit `close()` on the returned context if they need to evict one
    /// tenant while the rest of the registry stays live.
    pub async fn close_all(&self) {
        let drained: Vec<Arc<DatabaseContext>> = self.contexts.iter().map(|entry| entry.value().clone()).collect();
        self.contexts.clear();
        for context in drained {
            context.close().await;
        }
    }
}

/// Looks up a tenant's context or fails with a `Configuration` error, for
/// call sites that treat an unregistered tenant id as a caller bug rather
/// than something to lazily initialize.
pub fn require<TenantId>(
    registry: &TenantContextRegistry<TenantId>,
    tenant_id: &TenantId,
) -> Result<Arc<DatabaseContext>>
where
    TenantId: std::hash::Hash + Eq + Clone + std::fmt::Display,
{
    registry
        .get(tenant_id)
        .ok_or_else(|| CrudError::Configuration(format!("no database context registered for tenant '{tenant_id}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextConfig;
    use crate::dialect::DbProduct;
    use crate::driver::fake::FakeDriverFactory;

    fn make_context(product: DbProduct) -> DatabaseContext {
        let driver: Arc<dyn crate::driver::DriverFactory> = Arc::new(FakeDriverFactory::new());
        DatabaseContext::new(product, driver, ContextConfig::default())
    }

    #[tokio::test]
    async fn get_or_init_builds_once_per_tenant() {
        let registry: TenantContextRegistry<String> = TenantContextRegistry::new();
        let calls = Arc::new(std::sync::atomic::AtomicU64::new(0));
        let calls_clone = calls.clone();
        let ctx1 = registry
            .get_or_init("acme".to_string(), || async move {
                calls_clone.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                Ok(make_context(DbProduct::PostgreSql))
            })
            .await
            .unwrap();
        let ctx2 = registry
            .get_or_init("acme".to_string(), || async {
                panic!("init must not run again once a context is registered");
            })
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&ctx1, &ctx2));
        assert_eq!(calls.load(std::sync::atomic::Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn distinct_tenants_get_distinct_contexts() {
        let registry: TenantContextRegistry<&str> = TenantContextRegistry::new();
        let a = registry.get_or_init("acme", || async { Ok(make_context(DbProduct::PostgreSql)) }).await.unwrap();
        let b = registry.get_or_init("globex", || async { Ok(make_context(DbProduct::MySql)) }).await.unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn require_fails_for_unregistered_tenant() {
        let registry: TenantContextRegistry<String> = TenantContextRegistry::new();
        let err = require(&registry, &"missing".to_string()).unwrap_err();
        assert!(matches!(err, CrudError::Configuration(_)));
    }

    #[tokio::test]
    async fn remove_evicts_without_touching_other_tenants() {
        let registry: TenantContextRegistry<&str> = TenantContextRegistry::new();
        registry.insert("acme", Arc::new(make_context(DbProduct::PostgreSql)));
        registry.insert("globex", Arc::new(make_context(DbProduct::MySql)));
        let removed = registry.remove(&"acme");
        assert!(removed.is_some());
        assert_eq!(registry.len(), 1);
        assert!(registry.get(&"globex").is_some());
    }
}

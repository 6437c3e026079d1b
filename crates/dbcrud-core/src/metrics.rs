//! Point-in-time metrics snapshot and health check over a
//! [`crate::context::DatabaseContext`].
//!
//! Grounded on the teacher's `metrics::PoolMetrics`/`HealthStatus`
//! (pool size/utilization, Prometheus/JSON export, saturation checks),
//! generalized from sqlx's `PoolConnection` counters to this engine's own
//! [`crate::context::ContextCounters`] and [`crate::governor::PoolGovernor`],
//! since there's no single driver-owned pool object to ask across nine
//! dialects.

use crate::context::DatabaseContext;
use serde::{Deserialize, Serialize};
use std::sync::atomic::Ordering;
use std::time::Instant;

/// Snapshot of one [`DatabaseContext`]'s activity counters and pool
/// occupancy at the moment [`MetricsSnapshot::capture`] was called.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub pool_capacity: u32,
    pub pool_in_use: u32,
    pub utilization: f64,
    pub queries_executed: u64,
    pub queries_failed: u64,
    pub transactions_committed: u64,
    pub transactions_rolled_back: u64,
    pub retries_attempted: u64,
    pub connections_created: u64,
    pub connections_reused: u64,
    pub connections_failed: u64,
    pub timeout_failures: u64,
    pub current_open: u64,
    pub peak_open: u64,
}

impl MetricsSnapshot {
    pub fn capture(context: &DatabaseContext) -> Self {
        let counters = context.counters();
        let capacity = context.governor_capacity();
        let in_use = context.in_use_connections();
        let utilization = if capacity > 0 { in_use as f64 / capacity as f64 } else { 0.0 };

        Self {
            pool_capacity: capacity,
            pool_in_use: in_use,
            utilization,
            queries_executed: counters.queries_executed.load(Ordering::Relaxed),
            queries_failed: counters.queries_failed.load(Ordering::Relaxed),
            transactions_committed: counters.transactions_committed.load(Ordering::Relaxed),
            transactions_rolled_back: counters.transactions_rolled_back.load(Ordering::Relaxed),
            retries_attempted: counters.retries_attempted.load(Ordering::Relaxed),
            connections_created: counters.connections_created.load(Ordering::Relaxed),
            connections_reused: counters.connections_reused.load(Ordering::Relaxed),
            connections_failed: counters.connections_failed.load(Ordering::Relaxed),
            timeout_failures: counters.timeout_failures.load(Ordering::Relaxed),
            current_open: counters.current_open.load(Ordering::Relaxed),
            peak_open: counters.peak_open.load(Ordering::Relaxed),
        }
    }

    pub fn is_near_saturation(&self) -> bool {
        self.utilization > 0.8
    }

    pub fn is_saturated(&self) -> bool {
        self.pool_in_use >= self.pool_capacity
    }

    /// Renders this snapshot as Prometheus exposition text, one gauge per
    /// field, named `{prefix}_{field}`.
    pub fn to_prometheus(&self, prefix: &str) -> String {
        let mut out = String::new();
        let mut gauge = |name: &str, value: f64| {
            out.push_str(&format!("# TYPE {prefix}_{name} gauge\n{prefix}_{name} {value}\n"));
        };
        gauge("pool_capacity", self.pool_capacity as f64);
        gauge("pool_in_use", self.pool_in_use as f64);
        gauge("pool_utilization", self.utilization);
        gauge("queries_executed", self.queries_executed as f64);
        gauge("queries_failed", self.queries_failed as f64);
        gauge("transactions_committed", self.transactions_committed as f64);
        gauge("transactions_rolled_back", self.transactions_rolled_back as f64);
        gauge("retries_attempted", self.retries_attempted as f64);
        gauge("connections_created", self.connections_created as f64);
        gauge("connections_reused", self.connections_reused as f64);
        gauge("connections_failed", self.connections_failed as f64);
        gauge("timeout_failures", self.timeout_failures as f64);
        gauge("current_open", self.current_open as f64);
        gauge("peak_open", self.peak_open as f64);
        out
    }

    pub fn to_json(&self) -> dbcrud_common::Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| dbcrud_common::CrudError::Internal(format!("metrics serialization failed: {e}")))
    }
}

/// Result of a single health probe against a [`DatabaseContext`]: whether
/// the pool granted a permit within budget, and how long that took.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub is_healthy: bool,
    pub is_near_saturation: bool,
    pub is_saturated: bool,
    pub check_latency_ms: u64,
    pub error: Option<String>,
    pub snapshot: MetricsSnapshot,
}

impl HealthStatus {
    /// Exercises the pool governor with a zero-duration read acquisition:
    /// success (even immediately released) means the context can still hand
    /// out a connection right now.
    pub async fn check(context: &DatabaseContext) -> Self {
        let started = Instant::now();
        let result = context.enter(false).await;
        let check_latency_ms = started.elapsed().as_millis() as u64;
        let snapshot = MetricsSnapshot::capture(context);

        match result {
            Ok(guard) => {
                drop(guard);
                Self {
                    is_healthy: true,
                    is_near_saturation: snapshot.is_near_saturation(),
                    is_saturated: snapshot.is_saturated(),
                    check_latency_ms,
                    error: None,
                    snapshot,
                }
            }
            Err(err) => Self {
                is_healthy: false,
                is_near_saturation: snapshot.is_near_saturation(),
                is_saturated: snapshot.is_saturated(),
                check_latency_ms,
                error: Some(err.to_string()),
                snapshot,
            },
        }
    }

    pub fn all_ok(&self) -> bool {
        self.is_healthy && !self.is_saturated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextConfig;
    use crate::dialect::DbProduct;
    use crate::driver::fake::FakeDriverFactory;
    use std::sync::Arc;

    #[tokio::test]
    async fn snapshot_reports_zero_utilization_when_idle() {
        let driver: Arc<dyn crate::driver::DriverFactory> = Arc::new(FakeDriverFactory::new());
        let ctx = DatabaseContext::new(DbProduct::PostgreSql, driver, ContextConfig::default());
        let snapshot = MetricsSnapshot::capture(&ctx);
        assert_eq!(snapshot.pool_in_use, 0);
        assert!(!snapshot.is_near_saturation());
    }

    #[tokio::test]
    async fn snapshot_flags_saturation_under_full_pool() {
        let driver: Arc<dyn crate::driver::DriverFactory> = Arc::new(FakeDriverFactory::new());
        let config = ContextConfig {
            pool_capacity: 1,
            ..ContextConfig::default()
        };
        let ctx = DatabaseContext::new(DbProduct::PostgreSql, driver, config);
        let _guard = ctx.enter(true).await.unwrap();
        let snapshot = MetricsSnapshot::capture(&ctx);
        assert!(snapshot.is_saturated());
    }

    #[tokio::test]
    async fn health_check_succeeds_against_idle_context() {
        let driver: Arc<dyn crate::driver::DriverFactory> = Arc::new(FakeDriverFactory::new());
        let ctx = DatabaseContext::new(DbProduct::PostgreSql, driver, ContextConfig::default());
        let health = HealthStatus::check(&ctx).await;
        assert!(health.all_ok());
    }

    #[test]
    fn prometheus_export_includes_prefix() {
        let snapshot = MetricsSnapshot {
            pool_capacity: 10,
            pool_in_use: 2,
            utilization: 0.2,
            queries_executed: 5,
            queries_failed: 0,
            transactions_committed: 1,
            transactions_rolled_back: 0,
            retries_attempted: 0,
            connections_created: 2,
            connections_reused: 3,
            connections_failed: 0,
            timeout_failures: 0,
            current_open: 2,
            peak_open: 2,
        };
        let text = snapshot.to_prometheus("dbcrud");
        assert!(text.contains("dbcrud_pool_capacity 10"));
        assert!(text.contains("dbcrud_queries_executed 5"));
    }
}

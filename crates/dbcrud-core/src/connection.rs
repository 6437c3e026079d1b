//! Connection establishment with exponential-backoff retry.
//!
//! Grounded on the teacher's `connection::Connection::new` /
//! `connect_with_retry`: same `RetryConfig` shape and backoff formula, but
//! generalized so it runs once per [`crate::driver::DriverFactory`]
//! implementation instead of being wired directly to `PgPoolOptions`, and
//! extended with the one-time per-connection session-settings callback a
//! multi-dialect engine needs (`SET standard_conforming_strings`, `PRAGMA
//! foreign_keys`, `ALTER SESSION`, ...) that the Postgres-only teacher
//! didn't have to generalize.

use dbcrud_common::{CrudError, Result};
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Retry configuration for connection establishment.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 100,
            max_delay_ms: 5000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            initial_delay_ms: 0,
            max_delay_ms: 0,
            backoff_multiplier: 1.0,
        }
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::from_millis(self.initial_delay_ms);
        }
        let delay_ms = (self.initial_delay_ms as f64) * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_millis((delay_ms as u64).min(self.max_delay_ms))
    }
}

/// Connection pool configuration shared by every dialect's pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub min_connections: u32,
    pub max_connections: u32,
    pub connect_timeout: u64,
    pub max_lifetime: Option<u64>,
    pub idle_timeout: Option<u64>,
    pub retry: RetryConfig,
    pub statement_cache_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: 1,
            max_connections: 10,
            connect_timeout: 30,
            max_lifetime: Some(1800),
            idle_timeout: Some(600),
            retry: RetryConfig::default(),
            statement_cache_capacity: 100,
        }
    }
}

/// Runs `connect` (one connection attempt) with exponential-backoff retry,
/// logging each failed attempt and sleeping for the backed-off delay before
/// the next one. Driver-agnostic: callers supply the actual connect logic.
#[instrument(skip(connect), fields(max_retries = retry.max_retries))]
pub async fn connect_with_retry<F, Fut, T, E>(connect: F, retry: &RetryConfig) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = std::result::Result<T, E>>,
    E: std::fmt::Display,
{
    let mut last_error: Option<String> = None;

    for attempt in 0..=retry.max_retries {
        match connect().await {
            Ok(value) => {
                if attempt > 0 {
                    info!(attempt, "connection established after retry");
                }
                return Ok(value);
            }
            Err(e) => {
                last_error = Some(e.to_string());
                if attempt < retry.max_retries {
                    let delay = retry.delay_for_attempt(attempt);
                    warn!(
                        attempt,
                        max_retries = retry.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %last_error.as_deref().unwrap_or_default(),
                        "connection attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    Err(CrudError::Connection(
        last_error.unwrap_or_else(|| "connection failed".to_string()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn retry_delay_doubles_and_caps() {
        let config = RetryConfig {
            max_retries: 6,
            initial_delay_ms: 100,
            max_delay_ms: 5000,
            backoff_multiplier: 2.0,
        };
        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(800));
        assert_eq!(config.delay_for_attempt(6), Duration::from_millis(5000));
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let attempts = Arc::new(AtomicU32::new(0));
        let retry = RetryConfig {
            max_retries: 3,
            initial_delay_ms: 1,
            max_delay_ms: 2,
            backoff_multiplier: 1.0,
        };

        let result: Result<u32> = connect_with_retry(
            || {
                let attempts = attempts.clone();
                async move {
                    let n = attempts.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Err("not yet".to_string())
                    } else {
                        Ok(42)
                    }
                }
            },
            &retry,
        )
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let retry = RetryConfig {
            max_retries: 2,
            initial_delay_ms: 1,
            max_delay_ms: 1,
            backoff_multiplier: 1.0,
        };
        let result: Result<u32> = connect_with_retry(|| async { Err::<u32, _>("still failing") }, &retry).await;
        assert!(result.is_err());
    }
}

//! Pool governor and mode lock: the two concurrency primitives that sit
//! between a [`crate::context::DatabaseContext`] call and the underlying
//! connection pool.
//!
//! Neither exists in the teacher, which hands every caller its own pooled
//! connection via sqlx directly; this engine adds them because its mode
//! model (Standard/KeepAlive/SingleWriter/SingleConnection) requires
//! serializing access beyond what a plain connection pool provides. Built
//! from `tokio::sync::Semaphore` (the governor, one permit per logical slot)
//! and `tokio::sync::Mutex` (the mode lock, one mutator at a time under
//! SingleWriter/SingleConnection), following the same async-primitive
//! choices the teacher's `executor.rs` uses for its own in-process
//! concurrency control.

use dbcrud_common::{CrudError, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard, Notify, OwnedMutexGuard, OwnedSemaphorePermit, Semaphore};

/// Bounds concurrent in-flight operations against one `DatabaseContext` to
/// the pool's real connection budget, returning `PoolSaturated` rather than
/// queuing forever when a caller's timeout elapses first.
pub struct PoolGovernor {
    semaphore: Arc<Semaphore>,
    capacity: u32,
    queued: AtomicU64,
}

impl PoolGovernor {
    pub fn new(capacity: u32) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity as usize)),
            capacity,
            queued: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn in_use(&self) -> u32 {
        self.capacity - self.semaphore.available_permits() as u32
    }

    /// Acquires one permit, failing with `PoolSaturated` if `timeout` elapses
    /// first rather than blocking indefinitely.
    pub async fn acquire(&self, timeout: Duration) -> Result<OwnedSemaphorePermit> {
        self.queued.fetch_add(1, Ordering::Relaxed);
        let result = tokio::time::timeout(timeout, self.semaphore.clone().acquire_owned()).await;
        self.queued.fetch_sub(1, Ordering::Relaxed);

        match result {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) => Err(CrudError::Internal("pool governor semaphore closed".to_string())),
            Err(_) => Err(CrudError::PoolSaturated {
                in_use: self.in_use(),
                queued: self.queued.load(Ordering::Relaxed) as u32,
            }),
        }
    }
}

/// Serialized access mode, gating how many concurrent operations a
/// `DatabaseContext` allows beyond the pool's raw connection budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// No additional serialization beyond the pool governor.
    Standard,
    /// One physical connection kept warm and reused across calls, but reads
    /// may still interleave.
    KeepAlive,
    /// Only one writer proceeds at a time; readers are unaffected.
    SingleWriter,
    /// Every operation (read or write) is fully serialized onto one
    /// connection, e.g. SQLite's single-writer-single-reader file lock.
    SingleConnection,
}

/// Mutual-exclusion gate used by `SingleWriter`/`SingleConnection` modes.
/// `Standard`/`KeepAlive` callers never contend on it.
pub struct ModeLock {
    mutex: Arc<Mutex<()>>,
    waiters: AtomicU64,
    cumulative_timeouts: AtomicU64,
}

impl ModeLock {
    pub fn new() -> Self {
        Self {
            mutex: Arc::new(Mutex::new(())),
            waiters: AtomicU64::new(0),
            cumulative_timeouts: AtomicU64::new(0),
        }
    }

    /// Acquires the mode lock, failing with `ModeContention` if `timeout`
    /// elapses before it's this caller's turn.
    pub async fn acquire(&self, timeout: Duration) -> Result<MutexGuard<'_, ()>> {
        self.waiters.fetch_add(1, Ordering::Relaxed);
        let result = tokio::time::timeout(timeout, self.mutex.lock()).await;
        self.waiters.fetch_sub(1, Ordering::Relaxed);

        match result {
            Ok(guard) => Ok(guard),
            Err(_) => {
                self.cumulative_timeouts.fetch_add(1, Ordering::Relaxed);
                Err(CrudError::ModeContention {
                    waiters: self.waiters.load(Ordering::Relaxed),
                    cumulative_timeouts: self.cumulative_timeouts.load(Ordering::Relaxed),
                })
            }
        }
    }

    /// Acquires the mode lock as an owned guard, detached from `&self`'s
    /// lifetime, for callers (the streaming reader) that hold it alongside
    /// other owned state rather than within one stack frame.
    pub async fn acquire_owned(&self, timeout: Duration) -> Result<OwnedMutexGuard<()>> {
        self.waiters.fetch_add(1, Ordering::Relaxed);
        let result = tokio::time::timeout(timeout, self.mutex.clone().lock_owned()).await;
        self.waiters.fetch_sub(1, Ordering::Relaxed);

        match result {
            Ok(guard) => Ok(guard),
            Err(_) => {
                self.cumulative_timeouts.fetch_add(1, Ordering::Relaxed);
                Err(CrudError::ModeContention {
                    waiters: self.waiters.load(Ordering::Relaxed),
                    cumulative_timeouts: self.cumulative_timeouts.load(Ordering::Relaxed),
                })
            }
        }
    }
}

impl Default for ModeLock {
    fn default() -> Self {
        Self::new()
    }
}

/// Writer-preference turnstile for `SingleWriter` mode (§4.5): while any
/// writer is waiting to be served, new reader permits are blocked from
/// being granted, preventing a read-heavy workload from starving writers on
/// a file-based database. Readers already holding a permit are unaffected.
///
/// Built on an atomic waiter count plus a `Notify` rather than a
/// `tokio::sync::RwLock`, since the latter would also block readers for a
/// writer's entire execution, not just until it starts being served.
pub struct WriterTurnstile {
    writers_waiting: AtomicU64,
    cleared: Notify,
}

impl WriterTurnstile {
    pub fn new() -> Self {
        Self {
            writers_waiting: AtomicU64::new(0),
            cleared: Notify::new(),
        }
    }

    pub fn writers_waiting(&self) -> u64 {
        self.writers_waiting.load(Ordering::SeqCst)
    }

    /// Declares one writer waiting to be served. Readers calling
    /// [`WriterTurnstile::wait_for_clear`] block until every such guard
    /// returned so far has been dropped. Hold the guard until the writer has
    /// acquired whatever it was waiting on (mode lock, governor permit).
    pub fn enter_wait(&self) -> WriterWaitGuard<'_> {
        self.writers_waiting.fetch_add(1, Ordering::SeqCst);
        WriterWaitGuard { turnstile: self }
    }

    /// Blocks while any writer is waiting. Called by a reader before it
    /// acquires its own governor permit.
    pub async fn wait_for_clear(&self) {
        loop {
            if self.writers_waiting.load(Ordering::SeqCst) == 0 {
                return;
            }
            self.cleared.notified().await;
        }
    }
}

impl Default for WriterTurnstile {
    fn default() -> Self {
        Self::new()
    }
}

/// Held by a writer from the moment it starts waiting until it has been
/// served; dropping it wakes any reader blocked in
/// [`WriterTurnstile::wait_for_clear`].
pub struct WriterWaitGuard<'a> {
    turnstile: &'a WriterTurnstile,
}

impl Drop for WriterWaitGuard<'_> {
    fn drop(&mut self) {
        self.turnstile.writers_waiting.fetch_sub(1, Ordering::SeqCst);
        self.turnstile.cleared.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn governor_grants_up_to_capacity() {
        let governor = PoolGovernor::new(2);
        let first = governor.acquire(Duration::from_millis(50)).await.unwrap();
        let second = governor.acquire(Duration::from_millis(50)).await.unwrap();
        assert_eq!(governor.in_use(), 2);
        drop(first);
        drop(second);
    }

    #[tokio::test]
    async fn governor_times_out_when_saturated() {
        let governor = PoolGovernor::new(1);
        let _held = governor.acquire(Duration::from_millis(50)).await.unwrap();
        let result = governor.acquire(Duration::from_millis(10)).await;
        assert!(matches!(result, Err(CrudError::PoolSaturated { .. })));
    }

    #[tokio::test]
    async fn mode_lock_serializes_single_writer_access() {
        let lock = Arc::new(ModeLock::new());
        let held = lock.acquire(Duration::from_millis(50)).await.unwrap();
        let lock2 = lock.clone();
        let blocked = tokio::spawn(async move { lock2.acquire(Duration::from_millis(10)).await });
        let result = blocked.await.unwrap();
        assert!(matches!(result, Err(CrudError::ModeContention { .. })));
        drop(held);
    }

    #[tokio::test]
    async fn turnstile_blocks_readers_while_a_writer_waits() {
        let turnstile = Arc::new(WriterTurnstile::new());
        assert_eq!(turnstile.writers_waiting(), 0);
        let wait_guard = turnstile.enter_wait();
        assert_eq!(turnstile.writers_waiting(), 1);

        let turnstile2 = turnstile.clone();
        let reader = tokio::spawn(async move {
            turnstile2.wait_for_clear().await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!reader.is_finished());

        drop(wait_guard);
        assert_eq!(turnstile.writers_waiting(), 0);
        reader.await.unwrap();
    }

    #[tokio::test]
    async fn turnstile_is_a_noop_when_no_writer_is_waiting() {
        let turnstile = WriterTurnstile::new();
        tokio::time::timeout(Duration::from_millis(50), turnstile.wait_for_clear())
            .await
            .expect("wait_for_clear must return immediately with no waiting writer");
    }
}

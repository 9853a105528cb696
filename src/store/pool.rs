//! Bounded connection pool.
//!
//! Connections are created lazily up to `max_size` and parked in a bounded
//! channel while idle. A lease is a guard that hands its connection back when
//! dropped, so every store operation holds a connection for exactly as long
//! as it runs.

use crate::error::{Result, StoreError};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

/// Creates connections for a [`ConnectionPool`].
pub trait ManageConnection: Send + Sync + 'static {
    type Connection: Send + 'static;

    /// Open a new connection.
    fn connect(&self) -> Result<Self::Connection>;
}

/// Pool sizing and wait policy.
#[derive(Clone, Debug)]
pub struct PoolConfig {
    /// Maximum number of open connections.
    pub max_size: usize,

    /// How long `get` waits for a connection when all are leased.
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 4,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

/// Counters describing pool usage.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Connections currently open (idle or leased).
    pub open: usize,
    /// Connections currently idle.
    pub idle: usize,
    /// Leases handed out since creation.
    pub leases: u64,
}

/// A bounded pool of connections produced by `M`.
pub struct ConnectionPool<M: ManageConnection> {
    manager: M,
    config: PoolConfig,
    idle_tx: Sender<M::Connection>,
    idle_rx: Receiver<M::Connection>,
    /// Connections created and not yet dropped.
    open: Mutex<usize>,
    closed: AtomicBool,
    leases: AtomicU64,
}

impl<M: ManageConnection> ConnectionPool<M> {
    /// Create a pool. No connection is opened until the first lease.
    pub fn new(manager: M, config: PoolConfig) -> Self {
        let max_size = config.max_size.max(1);
        let (idle_tx, idle_rx) = bounded(max_size);

        Self {
            manager,
            config: PoolConfig { max_size, ..config },
            idle_tx,
            idle_rx,
            open: Mutex::new(0),
            closed: AtomicBool::new(false),
            leases: AtomicU64::new(0),
        }
    }

    /// Lease a connection, waiting up to the configured timeout if the pool
    /// is exhausted.
    pub fn get(&self) -> Result<PooledConnection<'_, M>> {
        if self.is_closed() {
            return Err(StoreError::PoolClosed);
        }

        if let Ok(conn) = self.idle_rx.try_recv() {
            return self.lease(conn);
        }

        if let Some(conn) = self.try_connect()? {
            return self.lease(conn);
        }

        match self.idle_rx.recv_timeout(self.config.acquire_timeout) {
            Ok(conn) => self.lease(conn),
            Err(RecvTimeoutError::Timeout) => Err(StoreError::PoolTimeout),
            Err(RecvTimeoutError::Disconnected) => Err(StoreError::PoolClosed),
        }
    }

    /// Close the pool: idle connections are dropped now, leased ones when
    /// their lease ends. Further `get` calls fail with `PoolClosed`.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let drained = self.idle_rx.try_iter().count();
        let mut open = self.open.lock();
        *open = open.saturating_sub(drained);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            open: *self.open.lock(),
            idle: self.idle_rx.len(),
            leases: self.leases.load(Ordering::Relaxed),
        }
    }

    /// Open a new connection if the pool has room for one.
    fn try_connect(&self) -> Result<Option<M::Connection>> {
        let mut open = self.open.lock();
        if *open >= self.config.max_size {
            return Ok(None);
        }

        let conn = self.manager.connect()?;
        *open += 1;
        Ok(Some(conn))
    }

    fn lease(&self, conn: M::Connection) -> Result<PooledConnection<'_, M>> {
        // The pool may have closed while we were waiting.
        if self.is_closed() {
            self.discard(conn);
            return Err(StoreError::PoolClosed);
        }

        self.leases.fetch_add(1, Ordering::Relaxed);
        Ok(PooledConnection {
            pool: self,
            conn: Some(conn),
        })
    }

    fn release(&self, conn: M::Connection) {
        if self.is_closed() {
            self.discard(conn);
            return;
        }

        if let Err(err) = self.idle_tx.try_send(conn) {
            self.discard(err.into_inner());
        }
    }

    fn discard(&self, conn: M::Connection) {
        drop(conn);
        let mut open = self.open.lock();
        *open = open.saturating_sub(1);
    }
}

/// A leased connection. Returned to the pool on drop.
pub struct PooledConnection<'a, M: ManageConnection> {
    pool: &'a ConnectionPool<M>,
    conn: Option<M::Connection>,
}

impl<M: ManageConnection> Deref for PooledConnection<'_, M> {
    type Target = M::Connection;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref().expect("connection present until drop")
    }
}

impl<M: ManageConnection> DerefMut for PooledConnection<'_, M> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().expect("connection present until drop")
    }
}

impl<M: ManageConnection> Drop for PooledConnection<'_, M> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    struct CountingManager {
        connects: Arc<AtomicUsize>,
    }

    impl ManageConnection for CountingManager {
        type Connection = usize;

        fn connect(&self) -> Result<usize> {
            Ok(self.connects.fetch_add(1, Ordering::SeqCst))
        }
    }

    struct FailingManager;

    impl ManageConnection for FailingManager {
        type Connection = ();

        fn connect(&self) -> Result<()> {
            Err(StoreError::Injected("refused".into()))
        }
    }

    fn pool(max_size: usize) -> (ConnectionPool<CountingManager>, Arc<AtomicUsize>) {
        pool_with_timeout(max_size, Duration::from_millis(20))
    }

    fn pool_with_timeout(
        max_size: usize,
        acquire_timeout: Duration,
    ) -> (ConnectionPool<CountingManager>, Arc<AtomicUsize>) {
        let connects = Arc::new(AtomicUsize::new(0));
        let pool = ConnectionPool::new(
            CountingManager {
                connects: Arc::clone(&connects),
            },
            PoolConfig {
                max_size,
                acquire_timeout,
            },
        );
        (pool, connects)
    }

    #[test]
    fn test_connections_are_reused() {
        let (pool, connects) = pool(2);

        for _ in 0..5 {
            let conn = pool.get().unwrap();
            assert_eq!(*conn, 0);
        }

        assert_eq!(connects.load(Ordering::SeqCst), 1);
        assert_eq!(
            pool.stats(),
            PoolStats {
                open: 1,
                idle: 1,
                leases: 5
            }
        );
    }

    #[test]
    fn test_exhausted_pool_times_out() {
        let (pool, _) = pool(1);

        let held = pool.get().unwrap();
        let result = pool.get();
        assert!(matches!(result, Err(StoreError::PoolTimeout)));

        drop(held);
        assert!(pool.get().is_ok());
    }

    #[test]
    fn test_waiter_receives_released_connection() {
        let (pool, _) = pool_with_timeout(1, Duration::from_secs(2));
        let pool = Arc::new(pool);

        let held = pool.get().unwrap();
        let waiter = {
            let pool = Arc::clone(&pool);
            std::thread::spawn(move || {
                let conn = pool.get();
                conn.is_ok()
            })
        };

        std::thread::sleep(Duration::from_millis(30));
        drop(held);
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_closed_pool_rejects_leases() {
        let (pool, _) = pool(2);

        let held = pool.get().unwrap();
        drop(pool.get().unwrap());
        assert_eq!(pool.stats().open, 2);

        pool.close();
        assert!(matches!(pool.get(), Err(StoreError::PoolClosed)));
        assert_eq!(pool.stats().open, 1);

        // Returned after close: dropped instead of parked
        drop(held);
        assert_eq!(pool.stats().open, 0);
        assert_eq!(pool.stats().idle, 0);

        // Idempotent
        pool.close();
    }

    #[test]
    fn test_connect_failure_does_not_leak_slot() {
        let pool = ConnectionPool::new(FailingManager, PoolConfig::default());

        assert!(matches!(pool.get(), Err(StoreError::Injected(_))));
        assert_eq!(pool.stats().open, 0);
    }
}

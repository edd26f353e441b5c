//! Fixed-size connection pool.
//!
//! Every session is established when the pool is built. Callers lease a
//! [`Connection`] with [`ConnectionPool::acquire`] and give it back by
//! dropping the returned [`PooledConnection`] (or passing it to
//! [`ConnectionPool::release`]). Waiters are served in arrival order.

use std::collections::VecDeque;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Deserialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::connection::Connection;
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::pg::PgEngine;

// ============================================================================
// Pool Configuration
// ============================================================================

/// Connection pool configuration.
///
/// Deserializable so it can be loaded from a config file; missing fields take
/// their defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Connection info handed to the engine untouched
    pub info: String,
    /// Number of sessions, all established up front
    pub size: usize,
    /// Rows per cursor fetch; `None` fetches everything at once
    pub fetch_size: Option<u32>,
    /// Prepared plans remembered per connection
    pub plan_cache_capacity: usize,
    /// Log statement text and outcomes at DEBUG
    pub log_statements: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            info: String::new(),
            size: 10,
            fetch_size: Some(1000),
            plan_cache_capacity: 100,
            log_statements: false,
        }
    }
}

impl PoolConfig {
    pub fn new(info: impl Into<String>) -> Self {
        Self {
            info: info.into(),
            ..Self::default()
        }
    }

    pub fn size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    pub fn fetch_size(mut self, fetch_size: Option<u32>) -> Self {
        self.fetch_size = fetch_size;
        self
    }

    pub fn plan_cache_capacity(mut self, capacity: usize) -> Self {
        self.plan_cache_capacity = capacity;
        self
    }

    pub fn log_statements(mut self, enabled: bool) -> Self {
        self.log_statements = enabled;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.size == 0 {
            return Err(Error::Config(
                "PoolConfig.size must be greater than 0".to_string(),
            ));
        }
        if self.fetch_size == Some(0) {
            return Err(Error::Config(
                "PoolConfig.fetch_size must be greater than 0 (use None to fetch all rows)"
                    .to_string(),
            ));
        }
        if self.plan_cache_capacity == 0 {
            return Err(Error::Config(
                "PoolConfig.plan_cache_capacity must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Pooled Connection
// ============================================================================

/// A connection leased from the pool.
///
/// Derefs to [`Connection`]. When dropped, the connection goes back to the
/// idle queue and the next waiter is woken.
pub struct PooledConnection<E: Engine = PgEngine> {
    /// The actual connection (None once returned to the pool)
    conn: Option<Connection<E::Session>>,
    pool: Arc<PoolInner<E>>,
    /// Released after the connection is back in the idle queue
    _permit: OwnedSemaphorePermit,
}

const LEASED: &str = "pooled connection is present until dropped";

impl<E: Engine> Deref for PooledConnection<E> {
    type Target = Connection<E::Session>;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref().expect(LEASED)
    }
}

impl<E: Engine> DerefMut for PooledConnection<E> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().expect(LEASED)
    }
}

impl<E: Engine> Drop for PooledConnection<E> {
    fn drop(&mut self) {
        let Some(mut conn) = self.conn.take() else {
            return;
        };

        {
            // Checked under the idle lock: `close` sets the flag before it
            // drains the queue, so the connection is either drained or closed.
            let mut idle = self.pool.idle.lock();
            if !self.pool.closed.load(Ordering::Acquire) {
                idle.push_back(conn);
                return;
            }
        }

        // Returned after close: shut the session down instead of pooling it.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move { conn.close_session().await });
        }
    }
}

impl<E: Engine> fmt::Debug for PooledConnection<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PooledConnection").field(&self.conn).finish()
    }
}

// ============================================================================
// Pool Inner
// ============================================================================

struct PoolInner<E: Engine> {
    engine: E,
    config: PoolConfig,
    /// Idle connections, oldest first
    idle: Mutex<VecDeque<Connection<E::Session>>>,
    /// One permit per connection; tokio's semaphore queues waiters FIFO
    semaphore: Arc<Semaphore>,
    ready_count: usize,
    closed: AtomicBool,
}

// ============================================================================
// Connection Pool
// ============================================================================

/// A fixed-size pool of database sessions.
pub struct ConnectionPool<E: Engine = PgEngine> {
    inner: Arc<PoolInner<E>>,
}

impl<E: Engine> Clone for ConnectionPool<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl ConnectionPool<PgEngine> {
    /// Build a pool of PostgreSQL sessions.
    pub async fn connect(config: PoolConfig) -> Result<Self> {
        Self::with_engine(PgEngine, config).await
    }
}

impl<E: Engine> ConnectionPool<E> {
    /// Build a pool over any engine.
    ///
    /// Establishes `config.size` sessions. If any of them fails, the ones
    /// already open are closed and the error is returned.
    pub async fn with_engine(engine: E, config: PoolConfig) -> Result<Self> {
        config.validate()?;

        let mut connections = VecDeque::with_capacity(config.size);
        for id in 0..config.size {
            match engine.connect(&config.info).await {
                Ok(session) => connections.push_back(Connection::new(id, session, &config)),
                Err(e) => {
                    tracing::warn!(
                        established = connections.len(),
                        size = config.size,
                        error = %e,
                        "pool construction failed"
                    );
                    for mut conn in connections {
                        conn.close_session().await;
                    }
                    return Err(e);
                }
            }
        }

        tracing::info!(size = config.size, "connection pool ready");

        Ok(Self {
            inner: Arc::new(PoolInner {
                engine,
                semaphore: Arc::new(Semaphore::new(config.size)),
                ready_count: connections.len(),
                idle: Mutex::new(connections),
                config,
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Lease a connection, waiting for one to become idle.
    ///
    /// There is no timeout. A connection whose session broke is reconnected
    /// before it is handed out; cursors left open by a dropped result set are
    /// closed.
    pub async fn acquire(&self) -> Result<PooledConnection<E>> {
        let permit = Arc::clone(&self.inner.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| Error::PoolClosed)?;

        // A permit always corresponds to an idle connection while open.
        let conn = self
            .inner
            .idle
            .lock()
            .pop_front()
            .ok_or(Error::PoolClosed)?;

        let mut leased = PooledConnection {
            conn: Some(conn),
            pool: Arc::clone(&self.inner),
            _permit: permit,
        };

        if leased.is_broken() {
            tracing::info!(connection = leased.id(), "replacing broken session");
            // On failure `leased` drops and the slot goes back to the pool.
            let session = self.inner.engine.connect(&self.inner.config.info).await?;
            leased.replace_session(session);
        }
        leased.reclaim().await;

        Ok(leased)
    }

    /// Return a connection to the pool. Same as dropping it.
    pub fn release(&self, conn: PooledConnection<E>) {
        drop(conn);
    }

    /// Close every idle session and fail all pending and future acquires.
    /// Leased connections are closed when they come back.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.semaphore.close();

        let idle = std::mem::take(&mut *self.inner.idle.lock());
        let closing = idle.len();
        for mut conn in idle {
            conn.close_session().await;
        }
        tracing::info!(closed = closing, "connection pool closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Sessions established at construction.
    pub fn ready_count(&self) -> usize {
        self.inner.ready_count
    }

    /// Connections currently waiting in the pool.
    pub fn idle_count(&self) -> usize {
        self.inner.idle.lock().len()
    }

    pub fn size(&self) -> usize {
        self.inner.config.size
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }
}

impl<E: Engine> fmt::Debug for ConnectionPool<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("size", &self.size())
            .field("idle", &self.idle_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

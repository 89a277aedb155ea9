use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_lock::{Semaphore, SemaphoreGuardArc};
use derive_builder::Builder;
use fluvio_future::future::timeout;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::{KvConnection, KvConnector, KvError, Result};

const DEFAULT_MAX_CONNECTIONS: usize = 8;
const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection pool limits
#[derive(Debug, Builder, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    #[builder(default = "DEFAULT_MAX_CONNECTIONS")]
    pub max_connections: usize,
    /// how long to wait for a free slot (and for a new connection) before giving up
    #[builder(default = "DEFAULT_ACQUIRE_TIMEOUT")]
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
        }
    }
}

impl PoolConfig {
    pub fn builder() -> PoolConfigBuilder {
        PoolConfigBuilder::default()
    }
}

/// Bounded pool of store connections.
///
/// Connections are checked out per operation and come back through
/// `PooledConnection`'s drop, which also clears any watch left on them.
pub struct KvPool<C: KvConnector> {
    connector: C,
    idle: Mutex<Vec<C::Connection>>,
    permits: Arc<Semaphore>,
    in_use: AtomicUsize,
    closed: AtomicBool,
    config: PoolConfig,
}

impl<C: KvConnector> fmt::Debug for KvPool<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KvPool")
            .field("config", &self.config)
            .field("in_use", &self.in_use())
            .field("idle", &self.idle_count())
            .finish()
    }
}

impl<C: KvConnector> KvPool<C> {
    pub fn new(connector: C, config: PoolConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_connections.max(1)));
        Self {
            connector,
            idle: Mutex::new(Vec::new()),
            permits,
            in_use: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            config,
        }
    }

    pub fn new_shared(connector: C, config: PoolConfig) -> Arc<Self> {
        Arc::new(Self::new(connector, config))
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// connections currently checked out
    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::SeqCst)
    }

    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    /// reject further checkouts and drop idle connections
    pub fn close(&self) {
        debug!("closing kv pool");
        self.closed.store(true, Ordering::SeqCst);
        self.idle.lock().clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// take a connection, reusing an idle one when possible
    pub async fn checkout(self: &Arc<Self>) -> Result<PooledConnection<C>> {
        if self.is_closed() {
            return Err(KvError::PoolClosed);
        }

        let wait = self.config.acquire_timeout;
        let permit = timeout(wait, self.permits.acquire_arc())
            .await
            .map_err(|_| KvError::Timeout(wait))?;

        let reused = self.idle.lock().pop();
        let conn = match reused {
            Some(conn) => {
                trace!("reusing idle connection");
                conn
            }
            None => {
                debug!("opening new connection");
                timeout(wait, self.connector.connect())
                    .await
                    .map_err(|_| KvError::Timeout(wait))??
            }
        };

        self.in_use.fetch_add(1, Ordering::SeqCst);
        Ok(PooledConnection {
            conn: Some(conn),
            pool: self.clone(),
            broken: false,
            _permit: permit,
        })
    }

    fn release(&self, conn: C::Connection) {
        if self.is_closed() {
            trace!("pool closed, dropping connection");
            return;
        }
        self.idle.lock().push(conn);
    }
}

/// Scoped connection handle, returned to the pool when dropped
pub struct PooledConnection<C: KvConnector> {
    conn: Option<C::Connection>,
    pool: Arc<KvPool<C>>,
    broken: bool,
    _permit: SemaphoreGuardArc,
}

impl<C: KvConnector> PooledConnection<C> {
    /// don't give this connection back to the pool
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }
}

impl<C: KvConnector> fmt::Debug for PooledConnection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("broken", &self.broken)
            .finish()
    }
}

impl<C: KvConnector> Deref for PooledConnection<C> {
    type Target = C::Connection;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref().expect("connection is present until drop")
    }
}

impl<C: KvConnector> DerefMut for PooledConnection<C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().expect("connection is present until drop")
    }
}

impl<C: KvConnector> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        self.pool.in_use.fetch_sub(1, Ordering::SeqCst);
        let Some(mut conn) = self.conn.take() else {
            return;
        };
        if self.broken {
            debug!("discarding broken connection");
            return;
        }
        conn.reset_state();
        self.pool.release(conn);
    }
}

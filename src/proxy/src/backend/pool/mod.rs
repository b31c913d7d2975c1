use crate::backend::PoolKey;
use crate::error::ProxyError;

use deadpool::managed::{Object, Pool};
use tracing::{debug, warn};

pub mod conn_mgr;

pub use conn_mgr::{BackendConn, ConnManager};

/// A live checked-out connection. Dropping it returns the connection to its
/// pool; [`ConnPool::release`] closes it instead when the idle watermark is
/// exceeded or the proxy is draining.
pub type PooledConn = Object<ConnManager>;

/// Capacity policy of one `(address, backend user)` sub-pool.
///
/// `max_open` bounds live connections (checkouts above it wait), `min_idle`
/// is the startup warm-up target, `max_idle` the watermark above which a
/// returned connection is closed instead of reinserted.
#[derive(Debug, Clone, Copy)]
pub struct PoolLimits {
    pub min_idle: usize,
    pub max_open: usize,
    pub max_idle: usize,
}

impl Default for PoolLimits {
    fn default() -> Self {
        Self {
            min_idle: 10,
            max_open: 100,
            max_idle: 5,
        }
    }
}

impl PoolLimits {
    pub fn with_max_open(mut self, max_open: usize) -> Self {
        self.max_open = max_open;
        self
    }
}

/// Bounded pool of authenticated connections to one backend server under
/// one backend identity. Construction is lazy: nothing is dialed until the
/// first checkout (or an explicit [`warm_up`](ConnPool::warm_up)).
pub struct ConnPool {
    addr: String,
    limits: PoolLimits,
    inner: Pool<ConnManager>,
}

impl ConnPool {
    pub fn new(
        host: &str,
        port: u16,
        key: PoolKey,
        limits: PoolLimits,
    ) -> Result<Self, ProxyError> {
        let manager = ConnManager::new(host, port, key);
        let inner = Pool::builder(manager)
            .max_size(limits.max_open)
            .build()
            .map_err(|e| ProxyError::Config(format!("pool build failed: {e}")))?;
        Ok(Self {
            addr: format!("{host}:{port}"),
            limits,
            inner,
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Draws a usable connection, dialing a new one while under `max_open`
    /// and waiting otherwise. A closed pool (shutdown in flight) aborts the
    /// wait with an error.
    pub async fn checkout(&self) -> Result<PooledConn, ProxyError> {
        self.inner
            .get()
            .await
            .map_err(|e| ProxyError::PoolCheckout(format!("{} ({})", e, self.addr)))
    }

    /// Returns a connection to the pool, closing it instead when over the
    /// idle watermark or when the proxy is draining.
    pub async fn release(&self, conn: PooledConn, drain: bool) {
        let idle = self.inner.status().available as usize;
        if drain || idle >= self.limits.max_idle {
            let backend_conn = Object::take(conn);
            let conn_id = backend_conn.id.clone();
            if let Err(e) = backend_conn.conn.disconnect().await {
                debug!("pool {} close of conn {conn_id} failed: {e}", self.addr);
            }
        }
        // otherwise the drop reinserts it as idle
    }

    /// Dials up to `min_idle` connections so the first sessions do not pay
    /// connect latency. Failures are logged, not fatal: a backend that is
    /// down at startup is dialed again at checkout time.
    pub async fn warm_up(&self) -> usize {
        let target = self.limits.min_idle.min(self.limits.max_open);
        let mut warmed = Vec::with_capacity(target);
        for _ in 0..target {
            match self.inner.get().await {
                Ok(conn) => warmed.push(conn),
                Err(e) => {
                    warn!("pool {} warm-up stopped: {e}", self.addr);
                    break;
                }
            }
        }
        warmed.len()
    }

    pub fn idle_count(&self) -> usize {
        self.inner.status().available as usize
    }

    pub fn in_use(&self) -> usize {
        let status = self.inner.status();
        status.size.saturating_sub(status.available as usize)
    }

    /// Closes every pooled connection and aborts pending checkouts.
    /// Idempotent.
    pub fn close(&self) {
        self.inner.close();
    }
}

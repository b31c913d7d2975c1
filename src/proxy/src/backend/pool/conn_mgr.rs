use crate::backend::PoolKey;

use deadpool::managed::{Metrics, RecycleError, RecycleResult};
use mysql_async::prelude::Queryable;
use mysql_async::{Conn, OptsBuilder};
use nanoid::nanoid;
use std::future::Future;
use tracing::debug;

/// One pooled backend connection. The id tags log lines so a connection can
/// be followed across checkouts.
pub struct BackendConn {
    pub id: String,
    pub conn: Conn,
}

/// deadpool manager that dials one backend server with one backend
/// identity. Pools must never be shared across identities, so the manager
/// carries the credentials it was built for.
pub struct ConnManager {
    host: String,
    port: u16,
    key: PoolKey,
}

impl ConnManager {
    pub fn new(host: impl Into<String>, port: u16, key: PoolKey) -> Self {
        Self {
            host: host.into(),
            port,
            key,
        }
    }

    fn conn_opts(&self) -> OptsBuilder {
        OptsBuilder::default()
            .ip_or_hostname(self.host.clone())
            .tcp_port(self.port)
            .user(Some(self.key.user.clone()))
            .pass(Some(self.key.password.clone()))
            .prefer_socket(false)
            // statement lifetimes are driven by the proxy's own registry
            .stmt_cache_size(0)
    }
}

impl deadpool::managed::Manager for ConnManager {
    type Type = BackendConn;
    type Error = mysql_async::Error;

    fn create(&self) -> impl Future<Output = Result<Self::Type, Self::Error>> + Send {
        async move {
            let conn = Conn::new(self.conn_opts()).await?;
            let id = nanoid!();
            debug!(
                "backend pool dialed {}:{} as {:?} conn_id={id}",
                self.host, self.port, self.key.user
            );
            Ok(BackendConn { id, conn })
        }
    }

    fn recycle(
        &self,
        backend_conn: &mut Self::Type,
        _metrics: &Metrics,
    ) -> impl Future<Output = RecycleResult<Self::Error>> + Send {
        async move {
            backend_conn
                .conn
                .ping()
                .await
                .map_err(RecycleError::Backend)
        }
    }
}

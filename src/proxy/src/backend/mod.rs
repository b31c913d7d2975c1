use crate::config::ProxyConfig;
use crate::error::ProxyError;
use crate::server::auth::identity::IdentityMap;

use dashmap::DashMap;
use std::sync::{Arc, Mutex};
use tracing::info;

pub mod pool;

use pool::{ConnPool, PoolLimits};

/// Sub-pools are keyed by backend identity; the backend address is implied
/// by the owning [`BackendServer`]. Sharing a pool across passwords is
/// forbidden, the authenticated session state belongs to the credentials.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
    pub user: String,
    pub password: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendRole {
    Primary,
    Replica,
}

/// One upstream MySQL server and its per-identity connection pools,
/// populated at startup with one pool per identity-map entry.
pub struct BackendServer {
    host: String,
    port: u16,
    role: BackendRole,
    pools: DashMap<PoolKey, Arc<ConnPool>>,
}

impl BackendServer {
    pub fn new(host: impl Into<String>, port: u16, role: BackendRole) -> Self {
        Self {
            host: host.into(),
            port,
            role,
            pools: DashMap::new(),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn role(&self) -> BackendRole {
        self.role
    }

    pub fn install_pool(&self, key: PoolKey, limits: PoolLimits) -> Result<(), ProxyError> {
        let conn_pool = ConnPool::new(&self.host, self.port, key.clone(), limits)?;
        self.pools.insert(key, Arc::new(conn_pool));
        Ok(())
    }

    pub fn pool(&self, key: &PoolKey) -> Result<Arc<ConnPool>, ProxyError> {
        self.pools
            .get(key)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| ProxyError::NoPool(key.user.clone()))
    }

    pub async fn warm_up(&self) {
        let conn_pools: Vec<Arc<ConnPool>> = self
            .pools
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for conn_pool in conn_pools {
            let warmed = conn_pool.warm_up().await;
            info!(
                "backend {} ({:?}) warmed {warmed} connections",
                conn_pool.addr(),
                self.role
            );
        }
    }

    pub fn shutdown(&self) {
        for entry in self.pools.iter() {
            entry.value().close();
        }
    }
}

/// The backend fleet: a single primary for writes and a round-robin rotation
/// of replicas for reads.
pub struct Backends {
    primary: Option<Arc<BackendServer>>,
    replicas: Vec<Arc<BackendServer>>,
    rr_next: Mutex<usize>,
}

impl Backends {
    pub fn from_config(config: &ProxyConfig, identities: &IdentityMap) -> Result<Self, ProxyError> {
        let replica_limits = PoolLimits::default().with_max_open(config.replica_pool_capacity);
        let primary_limits = PoolLimits::default().with_max_open(config.primary_pool_capacity);

        let mut replicas = Vec::with_capacity(config.backend_replicas.len());
        for replica in &config.backend_replicas {
            let server = BackendServer::new(replica.host.clone(), replica.port, BackendRole::Replica);
            for entry in identities.entries() {
                server.install_pool(
                    PoolKey {
                        user: entry.backend_user.clone(),
                        password: entry.backend_password.clone(),
                    },
                    replica_limits,
                )?;
            }
            replicas.push(Arc::new(server));
        }

        let primary = BackendServer::new(
            config.backend_primary_host.clone(),
            config.backend_primary_port,
            BackendRole::Primary,
        );
        for entry in identities.entries() {
            primary.install_pool(
                PoolKey {
                    user: entry.backend_user.clone(),
                    password: entry.backend_password.clone(),
                },
                primary_limits,
            )?;
        }

        Ok(Self {
            primary: Some(Arc::new(primary)),
            replicas,
            rr_next: Mutex::new(0),
        })
    }

    /// Round-robin over the replica fleet. Identifies which server a
    /// session will read from, not a connection.
    pub fn next_replica(&self) -> Result<Arc<BackendServer>, ProxyError> {
        if self.replicas.is_empty() {
            return Err(ProxyError::NoReplicas);
        }
        let mut next = self.rr_next.lock().unwrap();
        let idx = *next % self.replicas.len();
        *next = (*next + 1) % self.replicas.len();
        Ok(Arc::clone(&self.replicas[idx]))
    }

    pub fn writer(&self) -> Result<Arc<BackendServer>, ProxyError> {
        self.primary.clone().ok_or(ProxyError::NoWriter)
    }

    pub async fn warm_up(&self) {
        if let Some(primary) = &self.primary {
            primary.warm_up().await;
        }
        for replica in &self.replicas {
            replica.warm_up().await;
        }
    }

    /// Closes every pool on every server. Idempotent; pending checkouts
    /// abort and sessions blocked on backend reads unwind with errors.
    pub fn shutdown(&self) {
        if let Some(primary) = &self.primary {
            primary.shutdown();
        }
        for replica in &self.replicas {
            replica.shutdown();
        }
    }
}

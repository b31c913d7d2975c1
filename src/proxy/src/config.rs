use crate::error::ProxyError;

use serde::Deserialize;
use std::path::Path;
use tracing::info;

pub const DEFAULT_CONFIG_PATH: &str = "data/config/proxy.yaml";
// fallback when running from a workspace member directory during development
const DEV_CONFIG_PATH: &str = "../../data/config/proxy.yaml";

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ReplicaConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct AuthenticationMapItem {
    pub proxy_user: String,
    pub proxy_password: String,
    pub backend_user: String,
    pub backend_password: String,
}

/// Operator-authored proxy configuration. Unknown keys are rejected so a
/// typo fails loudly at startup instead of silently running with defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProxyConfig {
    /// Deprecated single-identity default, superseded by
    /// `authentication_map`.
    pub proxy_user: String,
    pub proxy_password: String,
    pub backend_primary_host: String,
    pub backend_primary_port: u16,
    /// Deprecated primary credentials, folded into the identity map when
    /// `authentication_map` is absent.
    pub backend_primary_user: String,
    pub backend_primary_password: String,
    pub primary_pool_capacity: usize,
    pub replica_pool_capacity: usize,
    pub listen_address: String,
    /// Reserved. Parsed for compatibility, not wired to behavior.
    pub health_check_delay: u64,
    pub backend_replicas: Vec<ReplicaConfig>,
    pub authentication_map: Vec<AuthenticationMapItem>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            proxy_user: "root".to_string(),
            proxy_password: "changeme".to_string(),
            backend_primary_host: "127.0.0.1".to_string(),
            backend_primary_port: 3306,
            backend_primary_user: "root".to_string(),
            backend_primary_password: "password".to_string(),
            primary_pool_capacity: 10,
            replica_pool_capacity: 10,
            listen_address: ":3306".to_string(),
            health_check_delay: 5,
            backend_replicas: Vec::new(),
            authentication_map: Vec::new(),
        }
    }
}

impl ProxyConfig {
    pub fn from_yaml(input: &str) -> Result<Self, ProxyError> {
        serde_yaml::from_str(input).map_err(|e| ProxyError::Config(e.to_string()))
    }

    /// Loads the explicit path when given, otherwise the default location
    /// with a development fallback one workspace level up.
    pub fn load(path: Option<&Path>) -> Result<Self, ProxyError> {
        let content = match path {
            Some(path) => std::fs::read_to_string(path)
                .map_err(|e| ProxyError::Config(format!("failed to open {path:?}: {e}")))?,
            None => std::fs::read_to_string(DEFAULT_CONFIG_PATH)
                .or_else(|_| std::fs::read_to_string(DEV_CONFIG_PATH))
                .map_err(|e| {
                    ProxyError::Config(format!(
                        "failed to open {DEFAULT_CONFIG_PATH} (or {DEV_CONFIG_PATH}): {e}"
                    ))
                })?,
        };
        let config = Self::from_yaml(&content)?;
        info!(
            "loaded config: primary={}:{} replicas={} identities={}",
            config.backend_primary_host,
            config.backend_primary_port,
            config.backend_replicas.len(),
            config.identity_entries().len(),
        );
        Ok(config)
    }

    /// The identity map, with the deprecated single-identity keys folded in
    /// when no `authentication_map` was configured.
    pub fn identity_entries(&self) -> Vec<AuthenticationMapItem> {
        if !self.authentication_map.is_empty() {
            return self.authentication_map.clone();
        }
        vec![AuthenticationMapItem {
            proxy_user: self.proxy_user.clone(),
            proxy_password: self.proxy_password.clone(),
            backend_user: self.backend_primary_user.clone(),
            backend_password: self.backend_primary_password.clone(),
        }]
    }

    /// `listen_address` accepts the bare `:PORT` form; map it to a
    /// bindable wildcard address.
    pub fn bind_addr(&self) -> String {
        if let Some(port) = self.listen_address.strip_prefix(':') {
            return format!("0.0.0.0:{port}");
        }
        self.listen_address.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
backend_primary_host: "10.0.0.1"
backend_primary_port: 3308
listen_address: ":3320"
primary_pool_capacity: 20
replica_pool_capacity: 40
backend_replicas:
  - host: "10.0.0.2"
    port: 3306
  - host: "10.0.0.3"
    port: 3306
authentication_map:
  - proxy_user: "appuser"
    proxy_password: "app-secret"
    backend_user: "svc_app"
    backend_password: "svc-secret"
"#;

    #[test]
    fn parse_sample_config() {
        let config = ProxyConfig::from_yaml(SAMPLE).unwrap();
        assert_eq!(config.backend_primary_host, "10.0.0.1");
        assert_eq!(config.backend_primary_port, 3308);
        assert_eq!(config.backend_replicas.len(), 2);
        assert_eq!(config.primary_pool_capacity, 20);
        assert_eq!(config.replica_pool_capacity, 40);
        assert_eq!(config.bind_addr(), "0.0.0.0:3320");
        // untouched keys keep their defaults
        assert_eq!(config.health_check_delay, 5);
    }

    #[test]
    fn identity_map_prefers_authentication_map() {
        let config = ProxyConfig::from_yaml(SAMPLE).unwrap();
        let entries = config.identity_entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].proxy_user, "appuser");
        assert_eq!(entries[0].backend_user, "svc_app");
    }

    #[test]
    fn deprecated_single_identity_folds_in() {
        let config = ProxyConfig::from_yaml("proxy_user: legacy\nproxy_password: pw").unwrap();
        let entries = config.identity_entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].proxy_user, "legacy");
        assert_eq!(entries[0].backend_user, "root");
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(ProxyConfig::from_yaml("listen_adress: ':3306'").is_err());
    }

    #[test]
    fn explicit_host_port_listen_address() {
        let config =
            ProxyConfig::from_yaml("listen_address: \"127.0.0.1:4000\"").unwrap();
        assert_eq!(config.bind_addr(), "127.0.0.1:4000");
    }
}

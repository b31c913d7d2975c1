use crate::config::ProxyConfig;
use crate::error::ProxyError;

/// One row of the operator-authored identity map: the credentials a client
/// presents to the proxy and the credentials the proxy uses downstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityEntry {
    pub proxy_user: String,
    pub proxy_password: String,
    pub backend_user: String,
    pub backend_password: String,
}

/// Immutable after construction; lookups are linear scans over a small,
/// operator-sized list.
#[derive(Debug, Clone)]
pub struct IdentityMap {
    entries: Vec<IdentityEntry>,
}

impl IdentityMap {
    pub fn from_config(config: &ProxyConfig) -> Self {
        let entries = config
            .identity_entries()
            .into_iter()
            .map(|item| IdentityEntry {
                proxy_user: item.proxy_user,
                proxy_password: item.proxy_password,
                backend_user: item.backend_user,
                backend_password: item.backend_password,
            })
            .collect();
        Self { entries }
    }

    /// Client-side lookup during handshake: which downstream identity to
    /// use for a given proxy user.
    pub fn backend_identity(&self, proxy_user: &str) -> Result<&IdentityEntry, ProxyError> {
        self.entries
            .iter()
            .find(|entry| entry.proxy_user == proxy_user)
            .ok_or_else(|| ProxyError::IdentityNotFound(proxy_user.to_string()))
    }

    /// Downstream lookup for pool keying.
    pub fn backend_password(&self, backend_user: &str) -> Result<&str, ProxyError> {
        self.entries
            .iter()
            .find(|entry| entry.backend_user == backend_user)
            .map(|entry| entry.backend_password.as_str())
            .ok_or_else(|| ProxyError::IdentityNotFound(backend_user.to_string()))
    }

    pub fn entries(&self) -> &[IdentityEntry] {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_map() -> IdentityMap {
        let config = ProxyConfig::from_yaml(
            r#"
authentication_map:
  - proxy_user: "appuser"
    proxy_password: "front"
    backend_user: "svc_app"
    backend_password: "back"
  - proxy_user: "report"
    proxy_password: "front2"
    backend_user: "svc_report"
    backend_password: "back2"
"#,
        )
        .unwrap();
        IdentityMap::from_config(&config)
    }

    #[test]
    fn lookup_by_proxy_user() {
        let map = test_map();
        let entry = map.backend_identity("report").unwrap();
        assert_eq!(entry.backend_user, "svc_report");
        assert_eq!(entry.backend_password, "back2");
    }

    #[test]
    fn lookup_by_backend_user() {
        let map = test_map();
        assert_eq!(map.backend_password("svc_app").unwrap(), "back");
    }

    #[test]
    fn both_directions_miss_with_identity_not_found() {
        let map = test_map();
        assert!(matches!(
            map.backend_identity("ghost"),
            Err(ProxyError::IdentityNotFound(_))
        ));
        assert!(matches!(
            map.backend_password("ghost"),
            Err(ProxyError::IdentityNotFound(_))
        ));
    }
}

use mysql_common::constants::CapabilityFlags;
use std::sync::OnceLock;

pub mod auth;
pub mod proxy_cli_args;
pub mod proxy_srv;
pub mod session;

/// Version string advertised in the initial handshake. The classifier's
/// version-gated comment handling keys off the same value.
pub const SERVER_VERSION: &str = "8.0.33-rwsplit";

/// Front-end lifecycle. `Draining` is entered on SIGINT/SIGTERM or a
/// programmatic shutdown; the listener stops accepting and backend pools
/// are closed so blocked sessions unwind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyState {
    Initializing,
    Listening,
    Draining,
    Stopped,
}

static DEFAULT_CAPABILITIES_ONCE: OnceLock<CapabilityFlags> = OnceLock::new();

// CLIENT_QUERY_ATTRIBUTES stays off: MariaDB clients do not send it and
// MySQL 8 clients negotiate it away cleanly.
// COM_QUERY: https://dev.mysql.com/doc/dev/mysql-server/latest/page_protocol_com_query.html
pub fn default_capabilities() -> CapabilityFlags {
    *DEFAULT_CAPABILITIES_ONCE.get_or_init(|| {
        CapabilityFlags::CLIENT_CONNECT_ATTRS
            | CapabilityFlags::CLIENT_CONNECT_WITH_DB
            | CapabilityFlags::CLIENT_DEPRECATE_EOF
            | CapabilityFlags::CLIENT_FOUND_ROWS
            | CapabilityFlags::CLIENT_IGNORE_SIGPIPE
            | CapabilityFlags::CLIENT_IGNORE_SPACE
            | CapabilityFlags::CLIENT_INTERACTIVE
            | CapabilityFlags::CLIENT_LONG_FLAG
            | CapabilityFlags::CLIENT_LONG_PASSWORD
            | CapabilityFlags::CLIENT_MULTI_RESULTS
            | CapabilityFlags::CLIENT_MULTI_STATEMENTS
            | CapabilityFlags::CLIENT_PLUGIN_AUTH
            | CapabilityFlags::CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA
            | CapabilityFlags::CLIENT_PROTOCOL_41
            | CapabilityFlags::CLIENT_PS_MULTI_RESULTS
            | CapabilityFlags::CLIENT_RESERVED
            | CapabilityFlags::CLIENT_SECURE_CONNECTION
            | CapabilityFlags::CLIENT_TRANSACTIONS
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_tls_and_no_session_track_advertised() {
        let caps = default_capabilities();
        assert!(!caps.contains(CapabilityFlags::CLIENT_SSL));
        assert!(!caps.contains(CapabilityFlags::CLIENT_SESSION_TRACK));
        assert!(caps.contains(CapabilityFlags::CLIENT_PROTOCOL_41));
        assert!(caps.contains(CapabilityFlags::CLIENT_DEPRECATE_EOF));
    }
}

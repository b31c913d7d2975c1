use crate::protocol::mysql::error_codes::ErrorKind;

/// Every failure the proxy can produce on its own behalf. Backend server
/// errors keep their original wire code and travel inside
/// [`ProxyError::Backend`]; everything else maps onto a fixed [`ErrorKind`]
/// via [`ProxyError::wire_code`].
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("empty statement batch")]
    EmptyStatements,
    #[error("unsupported statement: {0}")]
    UnsupportedStatement(String),
    #[error("malformed USE statement: {0:?}")]
    InvalidUse(String),
    #[error("no identity mapping for user {0:?}")]
    IdentityNotFound(String),
    #[error("access denied for user {0:?}")]
    AccessDenied(String),
    #[error("no replica backends configured")]
    NoReplicas,
    #[error("no primary backend configured")]
    NoWriter,
    #[error("no connection pool for backend user {0:?}")]
    NoPool(String),
    #[error("pool checkout failed: {0}")]
    PoolCheckout(String),
    #[error("unknown prepared statement handle {0}")]
    StmtNotFound(u32),
    #[error("backend error: {0}")]
    Backend(#[from] mysql_async::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("config error: {0}")]
    Config(String),
}

impl ProxyError {
    pub fn wire_code(&self) -> ErrorKind {
        match self {
            ProxyError::EmptyStatements => ErrorKind::ER_EMPTY_QUERY,
            ProxyError::UnsupportedStatement(_) => ErrorKind::ER_NOT_SUPPORTED_YET,
            ProxyError::InvalidUse(_) => ErrorKind::ER_PARSE_ERROR,
            ProxyError::IdentityNotFound(_) | ProxyError::AccessDenied(_) => {
                ErrorKind::ER_ACCESS_DENIED_ERROR
            }
            ProxyError::NoReplicas
            | ProxyError::NoWriter
            | ProxyError::NoPool(_)
            | ProxyError::PoolCheckout(_) => ErrorKind::ER_CON_COUNT_ERROR,
            ProxyError::StmtNotFound(_) => ErrorKind::ER_UNKNOWN_STMT_HANDLER,
            ProxyError::Backend(_) | ProxyError::Io(_) | ProxyError::Config(_) => {
                ErrorKind::ER_UNKNOWN_ERROR
            }
        }
    }

    /// The `(code, sqlstate, message)` triple to report to the client.
    /// Backend server errors pass through untouched.
    pub fn wire_triple(&self) -> (u16, [u8; 5], String) {
        if let ProxyError::Backend(mysql_async::Error::Server(server_err)) = self {
            let mut state = [b' '; 5];
            let raw = server_err.state.as_bytes();
            state[..raw.len().min(5)].copy_from_slice(&raw[..raw.len().min(5)]);
            return (server_err.code, state, server_err.message.clone());
        }
        let kind = self.wire_code();
        (kind as u16, *kind.sqlstate(), self.to_string())
    }
}

/// Wire error codes a replica raises while it has not caught up with a
/// schema change on the primary: unknown table and unknown database.
pub fn is_replica_lag(err: &mysql_async::Error) -> bool {
    matches!(
        err,
        mysql_async::Error::Server(server_err)
            if crate::protocol::mysql::error_codes::is_replication_lag(server_err.code)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proxy_errors_map_to_wire_codes() {
        assert_eq!(
            ProxyError::EmptyStatements.wire_code() as u16,
            ErrorKind::ER_EMPTY_QUERY as u16
        );
        assert_eq!(ProxyError::StmtNotFound(7).wire_code() as u16, 1243);
        assert_eq!(
            ProxyError::IdentityNotFound("app".into()).wire_code() as u16,
            1045
        );
    }

    #[test]
    fn wire_triple_carries_sqlstate() {
        let (code, state, msg) = ProxyError::NoReplicas.wire_triple();
        assert_eq!(code, 1040);
        assert_eq!(&state, b"08004");
        assert!(msg.contains("replica"));
    }
}

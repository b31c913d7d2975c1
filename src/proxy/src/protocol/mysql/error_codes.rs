/// Server error codes the proxy emits on its own behalf, with their
/// SQLSTATE values. Backend errors are relayed with whatever code the
/// backend produced; this enum only has to cover proxy-originated errors
/// plus the replication-lag codes the read path retries on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(non_camel_case_types)]
#[repr(u16)]
pub enum ErrorKind {
    ER_CON_COUNT_ERROR = 1040,
    ER_DBACCESS_DENIED_ERROR = 1044,
    ER_ACCESS_DENIED_ERROR = 1045,
    ER_NO_DB_ERROR = 1046,
    ER_UNKNOWN_COM_ERROR = 1047,
    ER_BAD_DB_ERROR = 1049,
    ER_PARSE_ERROR = 1064,
    ER_EMPTY_QUERY = 1065,
    ER_UNKNOWN_ERROR = 1105,
    ER_NO_SUCH_TABLE = 1146,
    ER_ABORTING_CONNECTION = 1152,
    ER_NET_READ_ERROR = 1158,
    ER_NOT_SUPPORTED_YET = 1235,
    ER_UNKNOWN_STMT_HANDLER = 1243,
}

impl ErrorKind {
    pub fn sqlstate(&self) -> &'static [u8; 5] {
        match self {
            ErrorKind::ER_CON_COUNT_ERROR => b"08004",
            ErrorKind::ER_DBACCESS_DENIED_ERROR => b"42000",
            ErrorKind::ER_ACCESS_DENIED_ERROR => b"28000",
            ErrorKind::ER_NO_DB_ERROR => b"3D000",
            ErrorKind::ER_UNKNOWN_COM_ERROR => b"08S01",
            ErrorKind::ER_BAD_DB_ERROR => b"42000",
            ErrorKind::ER_PARSE_ERROR => b"42000",
            ErrorKind::ER_EMPTY_QUERY => b"42000",
            ErrorKind::ER_UNKNOWN_ERROR => b"HY000",
            ErrorKind::ER_NO_SUCH_TABLE => b"42S02",
            ErrorKind::ER_ABORTING_CONNECTION => b"08S01",
            ErrorKind::ER_NET_READ_ERROR => b"08S01",
            ErrorKind::ER_NOT_SUPPORTED_YET => b"42000",
            ErrorKind::ER_UNKNOWN_STMT_HANDLER => b"HY000",
        }
    }
}

/// Replication-class errors: the object is missing on the replica because a
/// DDL statement from the primary has not been applied there yet.
pub const fn is_replication_lag(code: u16) -> bool {
    code == ErrorKind::ER_BAD_DB_ERROR as u16 || code == ErrorKind::ER_NO_SUCH_TABLE as u16
}

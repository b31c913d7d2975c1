use strum_macros::AsRefStr;

// max packet payload length, one u24 worth of bytes.
pub const MAX_PAYLOAD_LEN: usize = 16_777_215;

pub const PACKET_HEADER_LEN: usize = 4;

/// auth-plugin-data-part-1: the first 8 bytes of the scramble, sent in the
/// initial handshake before the filler byte.
pub const AUTH_PLUGIN_DATA_PART_1_LENGTH: usize = 8;

/// Scramble length for `mysql_native_password`
/// (auth-plugin-data-part-1 + auth-plugin-data-part-2).
pub const SCRAMBLE_SIZE: usize = 20;

#[derive(Debug, PartialEq, AsRefStr)]
pub enum AuthPluginName {
    #[strum(serialize = "mysql_old_password")]
    AuthMySQlOldPassword,
    #[strum(serialize = "caching_sha2_password")]
    AuthCachingSha2Password,
    #[strum(serialize = "sha256_password")]
    AuthSha256Password,
    #[strum(serialize = "mysql_native_password")]
    AuthNativePassword,
}

#[derive(Debug, PartialEq)]
#[repr(u8)]
pub enum HeaderInfo {
    OKHeader = 0x00,
    LocalInFileHeader = 0xfb,
    EOFHeader = 0xfe,
    ErrHeader = 0xff,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[repr(u8)]
pub enum CommandCode {
    ComSleep = 0,
    ComQuit,
    ComInitDB,
    ComQuery,
    ComFieldList,
    ComCreateDB,
    ComDropDB,
    ComRefresh,
    ComShutdown,
    ComStatistics,
    ComProcessInfo,
    ComConnect,
    ComProcessKill,
    ComDebug,
    ComPing,
    ComTime,
    ComDelayedInsert,
    ComChangeUser,
    ComBinlogDump,
    ComTableDump,
    ComConnectOut,
    ComRegisterSlave,
    ComStmtPrepare,
    ComStmtExecute,
    ComStmtSendLongData,
    ComStmtClose,
    ComStmtReset,
    ComSetOption,
    ComStmtFetch,
    ComDaemon,
    ComBinlogDumpGtid,
    ComResetConnection,
    ComEnd,
}

/// Display name for a raw command byte, used when logging commands the
/// session acknowledges without forwarding.
pub fn com_name(code: u8) -> &'static str {
    match code {
        0 => "ComSleep",
        1 => "ComQuit",
        2 => "ComInitDB",
        3 => "ComQuery",
        4 => "ComFieldList",
        5 => "ComCreateDB",
        6 => "ComDropDB",
        7 => "ComRefresh",
        8 => "ComShutdown",
        9 => "ComStatistics",
        10 => "ComProcessInfo",
        11 => "ComConnect",
        12 => "ComProcessKill",
        13 => "ComDebug",
        14 => "ComPing",
        15 => "ComTime",
        16 => "ComDelayedInsert",
        17 => "ComChangeUser",
        18 => "ComBinlogDump",
        19 => "ComTableDump",
        20 => "ComConnectOut",
        21 => "ComRegisterSlave",
        22 => "ComStmtPrepare",
        23 => "ComStmtExecute",
        24 => "ComStmtSendLongData",
        25 => "ComStmtClose",
        26 => "ComStmtReset",
        27 => "ComSetOption",
        28 => "ComStmtFetch",
        29 => "ComDaemon",
        30 => "ComBinlogDumpGtid",
        31 => "ComResetConnection",
        _ => "ComUnknown",
    }
}

#[cfg(test)]
mod test {
    use crate::protocol::mysql::constants::*;

    #[test]
    pub fn max_packet_size_test() {
        let max_u24_size = 16_777_215;
        assert_eq!(max_u24_size, MAX_PAYLOAD_LEN);
    }

    #[test]
    pub fn test_command_code() {
        assert_eq!(CommandCode::ComQuery as u8, 3);
        assert_eq!(com_name(CommandCode::ComStmtPrepare as u8), "ComStmtPrepare");
    }

    #[test]
    pub fn test_auth_plugin_name() {
        assert_eq!(
            AuthPluginName::AuthNativePassword.as_ref(),
            "mysql_native_password"
        );
    }
}

use std::collections::HashMap;
use std::sync::OnceLock;

/// utf8_general_ci, the collation advertised in the initial handshake.
pub const DEFAULT_COLLATION_ID: u8 = 33;

pub const UTF8_MB4_GENERAL_CI: u8 = 45;

pub const BINARY_COLLATION_ID: u8 = 63;

pub fn collation_names() -> &'static HashMap<&'static str, u8> {
    static COLLATIONS: OnceLock<HashMap<&'static str, u8>> = OnceLock::new();
    COLLATIONS.get_or_init(|| {
        HashMap::from([
            ("big5_chinese_ci", 1_u8),
            ("latin1_swedish_ci", 8_u8),
            ("ascii_general_ci", 11_u8),
            ("utf8_general_ci", DEFAULT_COLLATION_ID),
            ("utf8mb4_general_ci", UTF8_MB4_GENERAL_CI),
            ("binary", BINARY_COLLATION_ID),
            ("utf8mb4_0900_ai_ci", 255_u8),
        ])
    })
}

use crate::protocol::mysql::binary;
use crate::protocol::mysql::charset::DEFAULT_COLLATION_ID;
use crate::protocol::mysql::constants::AuthPluginName::AuthNativePassword;
use crate::protocol::mysql::constants::{AUTH_PLUGIN_DATA_PART_1_LENGTH, SCRAMBLE_SIZE};
use crate::protocol::mysql::error_codes::ErrorKind;
use crate::protocol::mysql::packet::packet_writer::PacketWriter;
use crate::protocol::mysql::text;

use byteorder::{LittleEndian, WriteBytesExt};
use mysql_common::constants::{CapabilityFlags, StatusFlags};
use mysql_common::io::WriteMysqlExt;
use mysql_common::packets::Column;
use mysql_common::row::Row;
use std::io::{self, Write};
use tokio::io::AsyncWrite;

/// The payload of an OK packet sent to the client. `header` is `0x00` for a
/// plain OK and `0xfe` when the packet terminates a result set under
/// `CLIENT_DEPRECATE_EOF`.
#[derive(Debug, Clone, Default)]
pub struct OkPayload {
    pub header: u8,
    pub affected_rows: u64,
    pub last_insert_id: u64,
    pub status_flags: StatusFlags,
    pub warnings: u16,
}

impl OkPayload {
    pub fn ok(affected_rows: u64, last_insert_id: u64, status_flags: StatusFlags) -> Self {
        OkPayload {
            header: 0x00,
            affected_rows,
            last_insert_id,
            status_flags,
            warnings: 0,
        }
    }

    pub fn resultset_end(status_flags: StatusFlags) -> Self {
        OkPayload {
            header: 0xfe,
            status_flags,
            ..Default::default()
        }
    }
}

pub async fn write_err_packet<W: AsyncWrite + Unpin>(
    err: ErrorKind,
    msg: &[u8],
    w: &mut PacketWriter<W>,
) -> io::Result<()> {
    write_server_err_packet(err as u16, err.sqlstate(), msg, w).await
}

/// ERR packet with an arbitrary code, used to relay backend server errors
/// with their original code and SQLSTATE.
pub async fn write_server_err_packet<W: AsyncWrite + Unpin>(
    code: u16,
    sqlstate: &[u8; 5],
    msg: &[u8],
    w: &mut PacketWriter<W>,
) -> io::Result<()> {
    w.write_u8(0xff)?;
    w.write_u16::<LittleEndian>(code)?;
    w.write_u8(b'#')?;
    w.write_all(sqlstate)?;
    w.write_all(msg)?;
    w.end_packet().await
}

pub async fn write_eof_packet<W: AsyncWrite + Unpin>(
    w: &mut PacketWriter<W>,
    s: StatusFlags,
) -> io::Result<()> {
    w.write_all(&[0xfe, 0x00, 0x00])?;
    w.write_u16::<LittleEndian>(s.bits())?;
    w.end_packet().await
}

pub async fn write_ok_packet<W: AsyncWrite + Unpin>(
    w: &mut PacketWriter<W>,
    client_capabilities: CapabilityFlags,
    ok: OkPayload,
) -> io::Result<()> {
    w.write_u8(ok.header)?;
    w.write_lenenc_int(ok.affected_rows)?;
    w.write_lenenc_int(ok.last_insert_id)?;
    if client_capabilities.contains(CapabilityFlags::CLIENT_PROTOCOL_41) {
        w.write_u16::<LittleEndian>(ok.status_flags.bits())?;
        w.write_u16::<LittleEndian>(ok.warnings)?;
    } else if client_capabilities.contains(CapabilityFlags::CLIENT_TRANSACTIONS) {
        w.write_u16::<LittleEndian>(ok.status_flags.bits())?;
    }
    if client_capabilities.contains(CapabilityFlags::CLIENT_SESSION_TRACK) {
        // no info string and no session state to report
        w.write_lenenc_str(b"")?;
    }
    w.end_packet().await
}

pub async fn write_initial_handshake<W: AsyncWrite + Unpin>(
    writer: &mut PacketWriter<W>,
    conn_id: u32,
    scramble: [u8; SCRAMBLE_SIZE],
    server_version: &[u8],
    server_capabilities: CapabilityFlags,
) -> io::Result<()> {
    writer.write_all(&[10])?; // protocol 10
    writer.write_all(server_version)?;
    writer.write_all(&[0x00])?;
    writer.write_u32::<LittleEndian>(conn_id)?;

    let server_capabilities_vec = server_capabilities.bits().to_le_bytes();
    writer.write_all(&scramble[0..AUTH_PLUGIN_DATA_PART_1_LENGTH])?; // auth-plugin-data-part-1
    writer.write_all(&[0x00])?;

    writer.write_all(&server_capabilities_vec[..2])?; // lower 2 capability bytes
    writer.write_all(&DEFAULT_COLLATION_ID.to_le_bytes())?;
    writer.write_all(&StatusFlags::SERVER_STATUS_AUTOCOMMIT.bits().to_le_bytes())?;
    writer.write_all(&server_capabilities_vec[2..4])?; // upper 2 capability bytes

    writer.write_all(&((scramble.len() + 1) as u8).to_le_bytes())?;
    writer.write_all(&[0x00; 10][..])?; // 10 bytes filler
    writer.write_all(&scramble[AUTH_PLUGIN_DATA_PART_1_LENGTH..])?; // auth-plugin-data-part-2
    writer.write_all(&[0x00])?;

    writer.write_all(AuthNativePassword.as_ref().as_bytes())?;
    writer.write_all(&[0x00])?;
    writer.end_packet().await?;
    writer.flush_all().await
}

/// AuthSwitchRequest: asks a client that answered with some other plugin to
/// redo the scramble with `mysql_native_password`.
pub async fn write_auth_switch_request<W: AsyncWrite + Unpin>(
    writer: &mut PacketWriter<W>,
    scramble: &[u8],
) -> io::Result<()> {
    writer.write_u8(0xfe)?;
    writer.write_all(AuthNativePassword.as_ref().as_bytes())?;
    writer.write_u8(0x00)?;
    writer.write_all(scramble)?;
    writer.write_u8(0x00)?;
    writer.end_packet().await?;
    writer.flush_all().await
}

// see: https://dev.mysql.com/doc/dev/mysql-server/latest/page_protocol_com_query_response_text_resultset_column_definition.html
pub async fn write_column_definitions_41<'a, I, W>(
    columns: I,
    w: &mut PacketWriter<W>,
    client_capabilities: CapabilityFlags,
    is_com_field_list: bool,
) -> io::Result<()>
where
    I: IntoIterator<Item = &'a Column>,
    W: AsyncWrite + Unpin,
{
    for c in columns {
        w.write_lenenc_str(b"def")?;
        w.write_lenenc_str(c.schema_str().as_bytes())?;
        w.write_lenenc_str(c.table_str().as_bytes())?;
        w.write_lenenc_str(c.org_table_str().as_bytes())?;
        w.write_lenenc_str(c.name_str().as_bytes())?;
        w.write_lenenc_str(c.org_name_str().as_bytes())?;
        w.write_lenenc_int(0xC)?;
        w.write_u16::<LittleEndian>(c.character_set())?;
        w.write_u32::<LittleEndian>(c.column_length())?;
        w.write_u8(c.column_type() as u8)?;
        w.write_u16::<LittleEndian>(c.flags().bits())?;
        w.write_u8(c.decimals())?;
        w.write_all(&[0x00, 0x00])?; // filler

        if is_com_field_list {
            w.write_all(&[0xfb])?; // no default values
        }
        w.end_packet().await?;
    }

    if !client_capabilities.contains(CapabilityFlags::CLIENT_DEPRECATE_EOF) {
        write_eof_packet(w, StatusFlags::empty()).await
    } else {
        Ok(())
    }
}

pub async fn write_prepare_ok<W: AsyncWrite + Unpin>(
    stmt_id: u32,
    params: &[Column],
    columns: &[Column],
    w: &mut PacketWriter<W>,
    client_capabilities: CapabilityFlags,
) -> io::Result<()> {
    // COM_STMT_PREPARE_OK
    w.write_u8(0x00)?;
    w.write_u32::<LittleEndian>(stmt_id)?;
    w.write_u16::<LittleEndian>(columns.len() as u16)?;
    w.write_u16::<LittleEndian>(params.len() as u16)?;
    w.write_u8(0x00)?; // filler
    w.write_u16::<LittleEndian>(0)?; // number of warnings
    w.end_packet().await?;

    if !params.is_empty() {
        write_column_definitions_41(params, w, client_capabilities, false).await?;
    }
    if !columns.is_empty() {
        write_column_definitions_41(columns, w, client_capabilities, false).await?;
    }
    Ok(())
}

async fn write_resultset_end<W: AsyncWrite + Unpin>(
    w: &mut PacketWriter<W>,
    client_capabilities: CapabilityFlags,
    status_flags: StatusFlags,
) -> io::Result<()> {
    if client_capabilities.contains(CapabilityFlags::CLIENT_DEPRECATE_EOF) {
        write_ok_packet(w, client_capabilities, OkPayload::resultset_end(status_flags)).await
    } else {
        write_eof_packet(w, status_flags).await
    }
}

/// Text protocol result set: column count, definitions, one packet per row
/// with every value rendered as a length-encoded string, then a terminator
/// carrying the session status flags.
pub async fn write_text_resultset<W: AsyncWrite + Unpin>(
    w: &mut PacketWriter<W>,
    client_capabilities: CapabilityFlags,
    columns: &[Column],
    rows: &[Row],
    status_flags: StatusFlags,
) -> io::Result<()> {
    w.write_lenenc_int(columns.len() as u64)?;
    w.end_packet().await?;
    write_column_definitions_41(columns, w, client_capabilities, false).await?;

    for row in rows {
        for idx in 0..columns.len() {
            match row.as_ref(idx).and_then(text::text_value) {
                Some(bytes) => {
                    w.write_lenenc_str(&bytes)?;
                }
                None => {
                    w.write_u8(0xfb)?;
                }
            }
        }
        w.end_packet().await?;
    }
    write_resultset_end(w, client_capabilities, status_flags).await
}

/// Binary protocol result set, the response shape of `COM_STMT_EXECUTE`.
pub async fn write_binary_resultset<W: AsyncWrite + Unpin>(
    w: &mut PacketWriter<W>,
    client_capabilities: CapabilityFlags,
    columns: &[Column],
    rows: &[Row],
    status_flags: StatusFlags,
) -> io::Result<()> {
    w.write_lenenc_int(columns.len() as u64)?;
    w.end_packet().await?;
    write_column_definitions_41(columns, w, client_capabilities, false).await?;

    for row in rows {
        let encoded = binary::encode_bin_row(row, columns)?;
        w.write_all(&encoded)?;
        w.end_packet().await?;
    }
    write_resultset_end(w, client_capabilities, status_flags).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ok_packet_bytes() {
        let mut w = PacketWriter::new(Vec::new());
        let caps = CapabilityFlags::CLIENT_PROTOCOL_41;
        write_ok_packet(
            &mut w,
            caps,
            OkPayload::ok(2, 0, StatusFlags::SERVER_STATUS_AUTOCOMMIT),
        )
        .await
        .unwrap();
        assert_eq!(
            w.inner_writer,
            vec![0x07, 0, 0, 0, 0x00, 0x02, 0x00, 0x02, 0x00, 0x00, 0x00]
        );
    }

    #[tokio::test]
    async fn test_err_packet_bytes() {
        let mut w = PacketWriter::new(Vec::new());
        write_err_packet(ErrorKind::ER_EMPTY_QUERY, b"empty", &mut w)
            .await
            .unwrap();
        let out = &w.inner_writer;
        assert_eq!(out[4], 0xff);
        assert_eq!(u16::from_le_bytes([out[5], out[6]]), 1065);
        assert_eq!(out[7], b'#');
        assert_eq!(&out[8..13], b"42000");
        assert_eq!(&out[13..], b"empty");
    }

    #[tokio::test]
    async fn test_initial_handshake_shape() {
        let mut w = PacketWriter::new(Vec::new());
        let scramble = [7u8; SCRAMBLE_SIZE];
        write_initial_handshake(
            &mut w,
            8,
            scramble,
            b"8.0.33-test",
            CapabilityFlags::CLIENT_PROTOCOL_41 | CapabilityFlags::CLIENT_PLUGIN_AUTH,
        )
        .await
        .unwrap();
        let out = &w.inner_writer;
        assert_eq!(out[4], 10); // protocol version
        assert_eq!(&out[5..16], b"8.0.33-test");
        assert_eq!(out[16], 0x00);
        assert_eq!(out[17..21], 8u32.to_le_bytes());
        assert!(out.ends_with(b"mysql_native_password\0"));
    }
}

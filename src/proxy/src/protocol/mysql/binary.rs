//! Binary-protocol value codec: decoding `COM_STMT_EXECUTE` parameter
//! blocks sent by clients and encoding result rows sent back to them.
//! See [binary protocol value](https://dev.mysql.com/doc/dev/mysql-server/latest/page_protocol_binary_resultset.html)

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use hashbrown::HashMap;
use mysql_common::constants::ColumnType;
use mysql_common::io::WriteMysqlExt;
use mysql_common::packets::Column;
use mysql_common::row::Row;
use mysql_common::value::Value;
use std::io::{self, Cursor, Read, Write};

fn invalid_data(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

fn column_type_from_u8(byte: u8) -> io::Result<ColumnType> {
    let col_type = match byte {
        0x00 => ColumnType::MYSQL_TYPE_DECIMAL,
        0x01 => ColumnType::MYSQL_TYPE_TINY,
        0x02 => ColumnType::MYSQL_TYPE_SHORT,
        0x03 => ColumnType::MYSQL_TYPE_LONG,
        0x04 => ColumnType::MYSQL_TYPE_FLOAT,
        0x05 => ColumnType::MYSQL_TYPE_DOUBLE,
        0x06 => ColumnType::MYSQL_TYPE_NULL,
        0x07 => ColumnType::MYSQL_TYPE_TIMESTAMP,
        0x08 => ColumnType::MYSQL_TYPE_LONGLONG,
        0x09 => ColumnType::MYSQL_TYPE_INT24,
        0x0a => ColumnType::MYSQL_TYPE_DATE,
        0x0b => ColumnType::MYSQL_TYPE_TIME,
        0x0c => ColumnType::MYSQL_TYPE_DATETIME,
        0x0d => ColumnType::MYSQL_TYPE_YEAR,
        0x0f => ColumnType::MYSQL_TYPE_VARCHAR,
        0x10 => ColumnType::MYSQL_TYPE_BIT,
        0xf5 => ColumnType::MYSQL_TYPE_JSON,
        0xf6 => ColumnType::MYSQL_TYPE_NEWDECIMAL,
        0xf7 => ColumnType::MYSQL_TYPE_ENUM,
        0xf8 => ColumnType::MYSQL_TYPE_SET,
        0xf9 => ColumnType::MYSQL_TYPE_TINY_BLOB,
        0xfa => ColumnType::MYSQL_TYPE_MEDIUM_BLOB,
        0xfb => ColumnType::MYSQL_TYPE_LONG_BLOB,
        0xfc => ColumnType::MYSQL_TYPE_BLOB,
        0xfd => ColumnType::MYSQL_TYPE_VAR_STRING,
        0xfe => ColumnType::MYSQL_TYPE_STRING,
        0xff => ColumnType::MYSQL_TYPE_GEOMETRY,
        other => return Err(invalid_data(format!("unknown column type {other:#x}"))),
    };
    Ok(col_type)
}

fn read_lenenc_int(cur: &mut Cursor<&[u8]>) -> io::Result<u64> {
    let first = cur.read_u8()?;
    let value = match first {
        0xfc => u64::from(cur.read_u16::<LittleEndian>()?),
        0xfd => u64::from(cur.read_u24::<LittleEndian>()?),
        0xfe => cur.read_u64::<LittleEndian>()?,
        other => u64::from(other),
    };
    Ok(value)
}

fn read_lenenc_bytes(cur: &mut Cursor<&[u8]>) -> io::Result<Vec<u8>> {
    let len = read_lenenc_int(cur)? as usize;
    let mut buf = vec![0u8; len];
    cur.read_exact(&mut buf)?;
    Ok(buf)
}

fn read_bin_date(cur: &mut Cursor<&[u8]>) -> io::Result<Value> {
    let len = cur.read_u8()?;
    let mut value = (0u16, 0u8, 0u8, 0u8, 0u8, 0u8, 0u32);
    if len >= 4 {
        value.0 = cur.read_u16::<LittleEndian>()?;
        value.1 = cur.read_u8()?;
        value.2 = cur.read_u8()?;
    }
    if len >= 7 {
        value.3 = cur.read_u8()?;
        value.4 = cur.read_u8()?;
        value.5 = cur.read_u8()?;
    }
    if len >= 11 {
        value.6 = cur.read_u32::<LittleEndian>()?;
    }
    Ok(Value::Date(
        value.0, value.1, value.2, value.3, value.4, value.5, value.6,
    ))
}

fn read_bin_time(cur: &mut Cursor<&[u8]>) -> io::Result<Value> {
    let len = cur.read_u8()?;
    let mut value = (false, 0u32, 0u8, 0u8, 0u8, 0u32);
    if len >= 8 {
        value.0 = cur.read_u8()? != 0;
        value.1 = cur.read_u32::<LittleEndian>()?;
        value.2 = cur.read_u8()?;
        value.3 = cur.read_u8()?;
        value.4 = cur.read_u8()?;
    }
    if len >= 12 {
        value.5 = cur.read_u32::<LittleEndian>()?;
    }
    Ok(Value::Time(
        value.0, value.1, value.2, value.3, value.4, value.5,
    ))
}

fn read_bin_value(
    cur: &mut Cursor<&[u8]>,
    col_type: ColumnType,
    unsigned: bool,
) -> io::Result<Value> {
    let value = match col_type {
        ColumnType::MYSQL_TYPE_NULL => Value::NULL,
        ColumnType::MYSQL_TYPE_TINY => {
            if unsigned {
                Value::UInt(u64::from(cur.read_u8()?))
            } else {
                Value::Int(i64::from(cur.read_i8()?))
            }
        }
        ColumnType::MYSQL_TYPE_SHORT | ColumnType::MYSQL_TYPE_YEAR => {
            if unsigned {
                Value::UInt(u64::from(cur.read_u16::<LittleEndian>()?))
            } else {
                Value::Int(i64::from(cur.read_i16::<LittleEndian>()?))
            }
        }
        ColumnType::MYSQL_TYPE_LONG | ColumnType::MYSQL_TYPE_INT24 => {
            if unsigned {
                Value::UInt(u64::from(cur.read_u32::<LittleEndian>()?))
            } else {
                Value::Int(i64::from(cur.read_i32::<LittleEndian>()?))
            }
        }
        ColumnType::MYSQL_TYPE_LONGLONG => {
            if unsigned {
                Value::UInt(cur.read_u64::<LittleEndian>()?)
            } else {
                Value::Int(cur.read_i64::<LittleEndian>()?)
            }
        }
        ColumnType::MYSQL_TYPE_FLOAT => Value::Float(cur.read_f32::<LittleEndian>()?),
        ColumnType::MYSQL_TYPE_DOUBLE => Value::Double(cur.read_f64::<LittleEndian>()?),
        ColumnType::MYSQL_TYPE_DATE
        | ColumnType::MYSQL_TYPE_DATETIME
        | ColumnType::MYSQL_TYPE_TIMESTAMP => read_bin_date(cur)?,
        ColumnType::MYSQL_TYPE_TIME => read_bin_time(cur)?,
        _ => Value::Bytes(read_lenenc_bytes(cur)?),
    };
    Ok(value)
}

/// Decodes the parameter block of a `COM_STMT_EXECUTE` payload.
///
/// `payload` starts at the null bitmap (statement id, flags and iteration
/// count already consumed). `bound_types` is the per-statement type cache:
/// the client sends types only when it rebinds, every later execute reuses
/// the cached ones. Parameters streamed via `COM_STMT_SEND_LONG_DATA` take
/// their value from `long_data` and carry nothing in the value block.
pub fn parse_stmt_execute_params(
    payload: &[u8],
    num_params: usize,
    bound_types: &mut Vec<(ColumnType, bool)>,
    long_data: &HashMap<u16, Vec<u8>>,
) -> io::Result<Vec<Value>> {
    if num_params == 0 {
        return Ok(Vec::new());
    }
    let mut cur = Cursor::new(payload);
    let mut null_bitmap = vec![0u8; (num_params + 7) / 8];
    cur.read_exact(&mut null_bitmap)?;

    let new_params_bound = cur.read_u8()?;
    if new_params_bound == 1 {
        bound_types.clear();
        for _ in 0..num_params {
            let col_type = column_type_from_u8(cur.read_u8()?)?;
            let flags = cur.read_u8()?;
            bound_types.push((col_type, flags & 0x80 != 0));
        }
    } else if bound_types.len() != num_params {
        return Err(invalid_data("execute without bound parameter types"));
    }

    let mut values = Vec::with_capacity(num_params);
    for idx in 0..num_params {
        if let Some(data) = long_data.get(&(idx as u16)) {
            values.push(Value::Bytes(data.clone()));
            continue;
        }
        if null_bitmap[idx / 8] & (1 << (idx % 8)) != 0 {
            values.push(Value::NULL);
            continue;
        }
        let (col_type, unsigned) = bound_types[idx];
        values.push(read_bin_value(&mut cur, col_type, unsigned)?);
    }
    Ok(values)
}

/// Encodes one value of a binary result-set row. The declared column type
/// decides the integer width; everything non-numeric and non-temporal goes
/// out as a length-encoded string.
pub fn write_bin_value(
    out: &mut Vec<u8>,
    value: &Value,
    col_type: ColumnType,
) -> io::Result<()> {
    match value {
        Value::NULL => Err(invalid_data("NULL belongs in the row null bitmap")),
        Value::Bytes(bytes) => {
            out.write_lenenc_str(bytes)?;
            Ok(())
        }
        Value::Int(v) => match col_type {
            ColumnType::MYSQL_TYPE_TINY => out.write_i8(*v as i8),
            ColumnType::MYSQL_TYPE_SHORT | ColumnType::MYSQL_TYPE_YEAR => {
                out.write_i16::<LittleEndian>(*v as i16)
            }
            ColumnType::MYSQL_TYPE_LONG | ColumnType::MYSQL_TYPE_INT24 => {
                out.write_i32::<LittleEndian>(*v as i32)
            }
            _ => out.write_i64::<LittleEndian>(*v),
        },
        Value::UInt(v) => match col_type {
            ColumnType::MYSQL_TYPE_TINY => out.write_u8(*v as u8),
            ColumnType::MYSQL_TYPE_SHORT | ColumnType::MYSQL_TYPE_YEAR => {
                out.write_u16::<LittleEndian>(*v as u16)
            }
            ColumnType::MYSQL_TYPE_LONG | ColumnType::MYSQL_TYPE_INT24 => {
                out.write_u32::<LittleEndian>(*v as u32)
            }
            _ => out.write_u64::<LittleEndian>(*v),
        },
        Value::Float(v) => out.write_f32::<LittleEndian>(*v),
        Value::Double(v) => out.write_f64::<LittleEndian>(*v),
        Value::Date(year, month, day, hour, minute, second, micros) => {
            if *micros > 0 {
                out.write_u8(11)?;
                out.write_u16::<LittleEndian>(*year)?;
                out.write_all(&[*month, *day, *hour, *minute, *second])?;
                out.write_u32::<LittleEndian>(*micros)
            } else if *hour > 0 || *minute > 0 || *second > 0 {
                out.write_u8(7)?;
                out.write_u16::<LittleEndian>(*year)?;
                out.write_all(&[*month, *day, *hour, *minute, *second])
            } else {
                out.write_u8(4)?;
                out.write_u16::<LittleEndian>(*year)?;
                out.write_all(&[*month, *day])
            }
        }
        Value::Time(negative, days, hours, minutes, seconds, micros) => {
            if *micros > 0 {
                out.write_u8(12)?;
                out.write_u8(u8::from(*negative))?;
                out.write_u32::<LittleEndian>(*days)?;
                out.write_all(&[*hours, *minutes, *seconds])?;
                out.write_u32::<LittleEndian>(*micros)
            } else if *days > 0 || *hours > 0 || *minutes > 0 || *seconds > 0 {
                out.write_u8(8)?;
                out.write_u8(u8::from(*negative))?;
                out.write_u32::<LittleEndian>(*days)?;
                out.write_all(&[*hours, *minutes, *seconds])
            } else {
                out.write_u8(0)
            }
        }
    }
}

/// One binary result-set row: 0x00 header, null bitmap at offset 2, then
/// the non-NULL values in column order.
pub fn encode_bin_row(row: &Row, columns: &[Column]) -> io::Result<Vec<u8>> {
    let mut bitmap = vec![0u8; (columns.len() + 7 + 2) / 8];
    let mut tail = Vec::new();
    for (idx, column) in columns.iter().enumerate() {
        match row.as_ref(idx) {
            Some(Value::NULL) | None => {
                bitmap[(idx + 2) / 8] |= 1 << ((idx + 2) % 8);
            }
            Some(value) => write_bin_value(&mut tail, value, column.column_type())?,
        }
    }
    let mut out = Vec::with_capacity(1 + bitmap.len() + tail.len());
    out.push(0x00);
    out.extend_from_slice(&bitmap);
    out.extend_from_slice(&tail);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_execute_params_with_fresh_bind() {
        // two params: LONG 42 and VAR_STRING "abc"
        let mut payload = vec![0x00]; // null bitmap
        payload.push(1); // new-params-bound
        payload.extend([0x03, 0x00, 0xfd, 0x00]); // types
        payload.extend(42i32.to_le_bytes());
        payload.extend([3, b'a', b'b', b'c']);

        let mut bound = Vec::new();
        let values =
            parse_stmt_execute_params(&payload, 2, &mut bound, &HashMap::new()).unwrap();
        assert_eq!(values, vec![Value::Int(42), Value::Bytes(b"abc".to_vec())]);
        assert_eq!(bound.len(), 2);
    }

    #[test]
    fn parse_execute_params_reuses_cached_types() {
        let mut bound = vec![(ColumnType::MYSQL_TYPE_LONGLONG, false)];
        let mut payload = vec![0x00, 0]; // bitmap, no rebind
        payload.extend(7i64.to_le_bytes());
        let values =
            parse_stmt_execute_params(&payload, 1, &mut bound, &HashMap::new()).unwrap();
        assert_eq!(values, vec![Value::Int(7)]);
    }

    #[test]
    fn parse_execute_params_null_bitmap() {
        let payload = vec![0x01, 1, 0x03, 0x00]; // param 0 NULL, bound as LONG
        let mut bound = Vec::new();
        let values =
            parse_stmt_execute_params(&payload, 1, &mut bound, &HashMap::new()).unwrap();
        assert_eq!(values, vec![Value::NULL]);
    }

    #[test]
    fn parse_execute_params_without_bind_fails() {
        let payload = vec![0x00, 0];
        let mut bound = Vec::new();
        assert!(parse_stmt_execute_params(&payload, 1, &mut bound, &HashMap::new()).is_err());
    }

    #[test]
    fn parse_execute_params_takes_long_data() {
        let payload = vec![0x00, 1, 0xfb, 0x00]; // LONG_BLOB bound, value streamed
        let mut bound = Vec::new();
        let mut long_data = HashMap::new();
        long_data.insert(0u16, b"streamed".to_vec());
        let values = parse_stmt_execute_params(&payload, 1, &mut bound, &long_data).unwrap();
        assert_eq!(values, vec![Value::Bytes(b"streamed".to_vec())]);
    }

    #[test]
    fn bin_value_integer_widths_follow_column_type() {
        let mut out = Vec::new();
        write_bin_value(&mut out, &Value::Int(-2), ColumnType::MYSQL_TYPE_TINY).unwrap();
        assert_eq!(out, vec![0xfe]);

        let mut out = Vec::new();
        write_bin_value(&mut out, &Value::Int(300), ColumnType::MYSQL_TYPE_LONG).unwrap();
        assert_eq!(out, 300i32.to_le_bytes().to_vec());

        let mut out = Vec::new();
        write_bin_value(&mut out, &Value::UInt(1), ColumnType::MYSQL_TYPE_LONGLONG).unwrap();
        assert_eq!(out, 1u64.to_le_bytes().to_vec());
    }

    #[test]
    fn bin_value_round_trip_temporal() {
        let date = Value::Date(2023, 7, 14, 10, 30, 0, 0);
        let mut out = Vec::new();
        write_bin_value(&mut out, &date, ColumnType::MYSQL_TYPE_DATETIME).unwrap();
        let mut cur = Cursor::new(&out[..]);
        let decoded = read_bin_date(&mut cur).unwrap();
        assert_eq!(decoded, date);

        let time = Value::Time(false, 0, 3, 25, 58, 11);
        let mut out = Vec::new();
        write_bin_value(&mut out, &time, ColumnType::MYSQL_TYPE_TIME).unwrap();
        let mut cur = Cursor::new(&out[..]);
        let decoded = read_bin_time(&mut cur).unwrap();
        assert_eq!(decoded, time);
    }
}

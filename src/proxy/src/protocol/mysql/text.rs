use mysql_common::value::Value;

/// Text-protocol rendering of a cell. `None` means SQL NULL, which is
/// serialized as the 0xfb marker byte by the row writer.
///
/// Backend text result sets decode every cell as `Value::Bytes`, so the
/// non-bytes arms only fire for values the proxy synthesizes itself.
pub fn text_value(v: &Value) -> Option<Vec<u8>> {
    match v {
        Value::NULL => None,
        Value::Bytes(bytes) => Some(bytes.clone()),
        Value::Int(v) => Some(v.to_string().into_bytes()),
        Value::UInt(v) => Some(v.to_string().into_bytes()),
        Value::Float(v) => Some(v.to_string().into_bytes()),
        Value::Double(v) => Some(v.to_string().into_bytes()),
        Value::Date(year, month, day, hour, minute, second, micros) => {
            let rendered = if *micros > 0 {
                format!("{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}.{micros:06}")
            } else {
                format!("{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}")
            };
            Some(rendered.into_bytes())
        }
        Value::Time(negative, days, hours, minutes, seconds, micros) => {
            let sign = if *negative { "-" } else { "" };
            let total_hours = u64::from(*days) * 24 + u64::from(*hours);
            let rendered = if *micros > 0 {
                format!("{sign}{total_hours:02}:{minutes:02}:{seconds:02}.{micros:06}")
            } else {
                format!("{sign}{total_hours:02}:{minutes:02}:{seconds:02}")
            };
            Some(rendered.into_bytes())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_renders_as_none() {
        assert!(text_value(&Value::NULL).is_none());
    }

    #[test]
    fn bytes_pass_through_untouched() {
        assert_eq!(
            text_value(&Value::Bytes(b"abc".to_vec())).unwrap(),
            b"abc".to_vec()
        );
    }

    #[test]
    fn numbers_render_decimal() {
        assert_eq!(text_value(&Value::Int(-7)).unwrap(), b"-7".to_vec());
        assert_eq!(text_value(&Value::UInt(42)).unwrap(), b"42".to_vec());
    }

    #[test]
    fn temporal_rendering() {
        assert_eq!(
            text_value(&Value::Date(2024, 2, 29, 13, 5, 9, 0)).unwrap(),
            b"2024-02-29 13:05:09".to_vec()
        );
        assert_eq!(
            text_value(&Value::Time(true, 1, 2, 3, 4, 0)).unwrap(),
            b"-26:03:04".to_vec()
        );
    }
}

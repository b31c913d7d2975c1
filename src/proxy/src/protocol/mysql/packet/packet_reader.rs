use crate::protocol::mysql::constants::{MAX_PAYLOAD_LEN, PACKET_HEADER_LEN};
use crate::protocol::mysql::packet::Packet;

use byteorder::{ByteOrder, LittleEndian};
use std::io;
use std::io::Read;
use tokio::io::{AsyncRead, AsyncReadExt};

/// [`PacketReader`] frames a byte stream into MySQL wire packets.
///
/// Returns `(sequence_id, payload)` per packet, where the payload has any
/// 16 MiB continuation packets already reassembled and the sequence id is
/// the one of the final fragment. A clean EOF on a packet boundary yields
/// `None`; EOF inside a packet is an error.
pub struct PacketReader<R> {
    pub r: R,
}

impl<R> PacketReader<R> {
    pub fn new(r: R) -> Self {
        PacketReader { r }
    }
}

fn truncated() -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, "truncated packet")
}

fn bad_continuation(expected: u8, got: u8) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("continuation packet out of order: expected seq {expected}, got {got}"),
    )
}

impl<R: AsyncRead + Unpin> PacketReader<R> {
    pub async fn next_async(&mut self) -> io::Result<Option<(u8, Packet)>> {
        let mut header = [0u8; PACKET_HEADER_LEN];
        let mut filled = 0;
        while filled < header.len() {
            let n = self.r.read(&mut header[filled..]).await?;
            if n == 0 {
                if filled == 0 {
                    return Ok(None);
                }
                return Err(truncated());
            }
            filled += n;
        }

        let mut chunk_len = LittleEndian::read_u24(&header) as usize;
        let mut seq = header[3];
        let mut payload = vec![0u8; chunk_len];
        self.r.read_exact(&mut payload).await?;
        let mut packet = Packet::from_vec(payload);

        while chunk_len == MAX_PAYLOAD_LEN {
            self.r.read_exact(&mut header).await?;
            chunk_len = LittleEndian::read_u24(&header) as usize;
            let next_seq = seq.wrapping_add(1);
            if header[3] != next_seq {
                return Err(bad_continuation(next_seq, header[3]));
            }
            seq = next_seq;
            let mut chunk = vec![0u8; chunk_len];
            self.r.read_exact(&mut chunk).await?;
            packet.extend_from_slice(&chunk);
        }
        Ok(Some((seq, packet)))
    }
}

impl<R: Read> PacketReader<R> {
    pub fn next_read(&mut self) -> io::Result<Option<(u8, Packet)>> {
        let mut header = [0u8; PACKET_HEADER_LEN];
        let mut filled = 0;
        while filled < header.len() {
            let n = self.r.read(&mut header[filled..])?;
            if n == 0 {
                if filled == 0 {
                    return Ok(None);
                }
                return Err(truncated());
            }
            filled += n;
        }

        let mut chunk_len = LittleEndian::read_u24(&header) as usize;
        let mut seq = header[3];
        let mut payload = vec![0u8; chunk_len];
        self.r.read_exact(&mut payload)?;
        let mut packet = Packet::from_vec(payload);

        while chunk_len == MAX_PAYLOAD_LEN {
            self.r.read_exact(&mut header)?;
            chunk_len = LittleEndian::read_u24(&header) as usize;
            let next_seq = seq.wrapping_add(1);
            if header[3] != next_seq {
                return Err(bad_continuation(next_seq, header[3]));
            }
            seq = next_seq;
            let mut chunk = vec![0u8; chunk_len];
            self.r.read_exact(&mut chunk)?;
            packet.extend_from_slice(&chunk);
        }
        Ok(Some((seq, packet)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_ping_packet() {
        let mut reader = PacketReader::new(Cursor::new(vec![0x01, 0, 0, 0, 0x0e]));
        let (seq, packet) = reader.next_read().unwrap().unwrap();
        assert_eq!(seq, 0);
        assert_eq!(&*packet, &[0x0e][..]);
        assert!(reader.next_read().unwrap().is_none());
    }

    #[test]
    fn test_two_packets() {
        let mut data = vec![0x01, 0, 0, 0, 0x10];
        data.extend(&[0x02, 0, 0, 1, 0xaa, 0xbb]);
        let mut reader = PacketReader::new(Cursor::new(data));
        let (seq, first) = reader.next_read().unwrap().unwrap();
        assert_eq!((seq, &*first), (0, &[0x10][..]));
        let (seq, second) = reader.next_read().unwrap().unwrap();
        assert_eq!((seq, &*second), (1, &[0xaa, 0xbb][..]));
    }

    #[test]
    fn test_long_exact() {
        let mut data = vec![0xff, 0xff, 0xff, 0];
        data.extend(&[0u8; MAX_PAYLOAD_LEN][..]);
        // trailing empty continuation, required when the payload is an
        // exact multiple of the max chunk size
        data.extend(&[0x00, 0x00, 0x00, 1]);

        let mut reader = PacketReader::new(Cursor::new(data));
        let (seq, packet) = reader.next_read().unwrap().unwrap();
        assert_eq!(seq, 1);
        assert_eq!(packet.len(), MAX_PAYLOAD_LEN);
    }

    #[test]
    fn test_long_more() {
        let mut data = vec![0xff, 0xff, 0xff, 0];
        data.extend(&[0u8; MAX_PAYLOAD_LEN][..]);
        data.extend(&[0x01, 0x00, 0x00, 1, 0x10]);

        let mut reader = PacketReader::new(Cursor::new(data));
        let (seq, packet) = reader.next_read().unwrap().unwrap();
        assert_eq!(seq, 1);
        assert_eq!(packet.len(), MAX_PAYLOAD_LEN + 1);
        assert_eq!(&packet[MAX_PAYLOAD_LEN..], &[0x10]);
    }

    #[test]
    fn test_out_of_order_continuation() {
        let mut data = vec![0xff, 0xff, 0xff, 0];
        data.extend(&[0u8; MAX_PAYLOAD_LEN][..]);
        data.extend(&[0x01, 0x00, 0x00, 7, 0x10]);

        let mut reader = PacketReader::new(Cursor::new(data));
        assert!(reader.next_read().is_err());
    }

    #[test]
    fn test_truncated_header() {
        let mut reader = PacketReader::new(Cursor::new(vec![0x01, 0]));
        assert!(reader.next_read().is_err());
    }
}

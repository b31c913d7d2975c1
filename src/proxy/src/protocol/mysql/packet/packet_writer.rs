use crate::protocol::mysql::constants::{MAX_PAYLOAD_LEN, PACKET_HEADER_LEN};

use byteorder::{ByteOrder, LittleEndian};
use std::io;
use std::io::prelude::*;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// [`PacketWriter`] buffers one logical payload via the blocking [`Write`]
/// impl, then [`end_packet`](PacketWriter::end_packet) frames it with
/// headers and sequence ids and hands it to the async transport. Payloads
/// over 16 MiB are split into continuation packets.
pub struct PacketWriter<W> {
    buf: Vec<u8>,
    seq: u8,
    pub inner_writer: W,
}

impl<W> PacketWriter<W> {
    pub fn new(write: W) -> Self {
        Self {
            buf: Vec::new(),
            seq: 0,
            inner_writer: write,
        }
    }

    fn take_buffer(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buf)
    }

    pub fn set_seq(&mut self, seq: u8) {
        self.seq = seq;
    }

    fn increase_seq(&mut self) {
        self.seq = self.seq.wrapping_add(1);
    }

    pub fn reset_seq(&mut self) {
        self.seq = 0;
    }

    pub fn seq(&self) -> u8 {
        self.seq
    }
}

impl<W> Write for PacketWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<W: AsyncWrite + Unpin> PacketWriter<W> {
    pub async fn end_packet(&mut self) -> io::Result<()> {
        let mut header = [0u8; PACKET_HEADER_LEN];
        let raw_packet = self.take_buffer();

        let mut offset = 0;
        loop {
            let chunk = &raw_packet[offset..(offset + MAX_PAYLOAD_LEN).min(raw_packet.len())];
            LittleEndian::write_u24(&mut header, chunk.len() as u32);
            header[3] = self.seq();
            self.increase_seq();
            self.inner_writer.write_all(&header).await?;
            self.inner_writer.write_all(chunk).await?;
            offset += chunk.len();
            if offset >= raw_packet.len() {
                // a payload that is an exact multiple of the chunk size is
                // terminated by an empty continuation packet
                if !raw_packet.is_empty() && raw_packet.len() % MAX_PAYLOAD_LEN == 0 {
                    LittleEndian::write_u24(&mut header, 0);
                    header[3] = self.seq();
                    self.increase_seq();
                    self.inner_writer.write_all(&header).await?;
                }
                break;
            }
        }
        Ok(())
    }

    pub async fn flush_all(&mut self) -> io::Result<()> {
        self.inner_writer.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_small_packet_framing() {
        let mut writer = PacketWriter::new(Vec::new());
        writer.write_all(&[0x10, 0x20]).unwrap();
        writer.end_packet().await.unwrap();
        assert_eq!(writer.inner_writer, vec![0x02, 0, 0, 0, 0x10, 0x20]);
        assert_eq!(writer.seq(), 1);
    }

    #[tokio::test]
    async fn test_empty_packet_framing() {
        let mut writer = PacketWriter::new(Vec::new());
        writer.set_seq(3);
        writer.end_packet().await.unwrap();
        assert_eq!(writer.inner_writer, vec![0x00, 0, 0, 3]);
    }

    #[tokio::test]
    async fn test_large_packet_split() {
        let mut writer = PacketWriter::new(Vec::new());
        let payload = vec![0xabu8; MAX_PAYLOAD_LEN + 5];
        writer.write_all(&payload).unwrap();
        writer.end_packet().await.unwrap();

        let out = &writer.inner_writer;
        assert_eq!(&out[..4], &[0xff, 0xff, 0xff, 0]);
        let second_header = &out[4 + MAX_PAYLOAD_LEN..4 + MAX_PAYLOAD_LEN + 4];
        assert_eq!(second_header, &[0x05, 0, 0, 1]);
        assert_eq!(out.len(), 4 + MAX_PAYLOAD_LEN + 4 + 5);
    }

    #[tokio::test]
    async fn test_exact_multiple_gets_empty_tail() {
        let mut writer = PacketWriter::new(Vec::new());
        let payload = vec![0u8; MAX_PAYLOAD_LEN];
        writer.write_all(&payload).unwrap();
        writer.end_packet().await.unwrap();

        let out = &writer.inner_writer;
        let tail = &out[out.len() - 4..];
        assert_eq!(tail, &[0x00, 0x00, 0x00, 1]);
    }
}
